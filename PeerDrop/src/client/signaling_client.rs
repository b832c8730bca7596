//! TLS client of the signaling relay.

use std::io::{self, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use peer_link::SignalingMessage;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, ClientConnection, RootCertStore, ServerName, StreamOwned};
use tracing::{debug, info, warn};

use crate::server::protocol::{read_line, LineRead};
use crate::server::tls::RELAY_SERVER_NAME;

use super::error::SessionError;
use super::peer_id::PeerIdentifier;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type ClientStream = StreamOwned<ClientConnection, TcpStream>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    /// The relay closed the connection.
    Disconnected,
    Error(String),
}

enum Outgoing {
    Line(String),
    Close,
}

pub struct SignalingClient {
    peer_id: PeerIdentifier,
    outgoing: Sender<Outgoing>,
    closed: Arc<AtomicBool>,
}

impl SignalingClient {
    /// Connects, completes the TLS handshake and registers as `peer_id`.
    ///
    /// `register` is queued before any other message. Events are delivered
    /// on the client's I/O thread.
    pub fn connect<F>(
        server_addr: &str,
        peer_id: PeerIdentifier,
        on_event: F,
    ) -> Result<Self, SessionError>
    where
        F: Fn(SignalingEvent) + Send + 'static,
    {
        let unavailable = |err: &dyn std::fmt::Display| {
            SessionError::RelayUnavailable(format!("{}: {}", server_addr, err))
        };

        let stream = open_stream(server_addr).map_err(|e| unavailable(&e))?;
        stream
            .set_read_timeout(Some(CONNECT_TIMEOUT))
            .map_err(|e| unavailable(&e))?;
        stream
            .set_write_timeout(Some(CONNECT_TIMEOUT))
            .map_err(|e| unavailable(&e))?;
        stream.set_nodelay(true).map_err(|e| unavailable(&e))?;

        let server_name = ServerName::try_from(RELAY_SERVER_NAME).map_err(|e| unavailable(&e))?;
        let connection =
            ClientConnection::new(build_client_config(), server_name).map_err(|e| unavailable(&e))?;
        let mut tls_stream = StreamOwned::new(connection, stream);
        while tls_stream.conn.is_handshaking() {
            tls_stream
                .conn
                .complete_io(&mut tls_stream.sock)
                .map_err(|e| unavailable(&e))?;
        }
        tls_stream
            .sock
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|e| unavailable(&e))?;

        let (out_tx, out_rx) = mpsc::channel::<Outgoing>();
        let register = SignalingMessage::Register {
            peer_id: peer_id.to_string(),
        }
        .to_json()
        .map_err(|e| unavailable(&e))?;
        out_tx
            .send(Outgoing::Line(register))
            .map_err(|e| unavailable(&e))?;

        let closed = Arc::new(AtomicBool::new(false));
        let loop_closed = Arc::clone(&closed);
        thread::Builder::new()
            .name(format!("signaling-{}", peer_id))
            .spawn(move || run_client_loop(tls_stream, on_event, out_rx, loop_closed))
            .map_err(|e| unavailable(&e))?;

        info!(%server_addr, %peer_id, "connected to relay");
        Ok(Self {
            peer_id,
            outgoing: out_tx,
            closed,
        })
    }

    pub fn peer_id(&self) -> &PeerIdentifier {
        &self.peer_id
    }

    pub fn send(&self, msg: &SignalingMessage) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::RelayUnavailable("relay connection closed".to_string()));
        }
        let line = msg
            .to_json()
            .map_err(|e| SessionError::RelayUnavailable(e.to_string()))?;
        self.outgoing
            .send(Outgoing::Line(line))
            .map_err(|_| SessionError::RelayUnavailable("relay connection closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Sends a TLS close_notify and stops the I/O thread. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}

/// Tries every resolved address, each bounded by `CONNECT_TIMEOUT`.
fn open_stream(server_addr: &str) -> io::Result<TcpStream> {
    let mut last_error = io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        "address resolved to nothing",
    );
    for addr in server_addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "relay address unreachable");
                last_error = err;
            }
        }
    }
    Err(last_error)
}

fn build_client_config() -> Arc<ClientConfig> {
    let root_store = RootCertStore::empty();
    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(InsecureVerifier));
    Arc::new(config)
}

/// The relay presents a throwaway self-signed certificate.
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn run_client_loop<F>(
    tls_stream: ClientStream,
    on_event: F,
    outgoing: Receiver<Outgoing>,
    closed: Arc<AtomicBool>,
) where
    F: Fn(SignalingEvent),
{
    let mut reader = BufReader::new(tls_stream);
    let mut pending = Vec::new();

    loop {
        match write_queued(reader.get_mut(), &outgoing) {
            Ok(true) => {}
            Ok(false) => {
                let stream = reader.get_mut();
                stream.conn.send_close_notify();
                if let Err(err) = stream.flush() {
                    debug!(error = %err, "close_notify not delivered");
                }
                debug!("relay connection closed locally");
                return;
            }
            Err(err) => {
                if !closed.swap(true, Ordering::SeqCst) {
                    on_event(SignalingEvent::Error(format!("relay write failed: {}", err)));
                }
                return;
            }
        }

        match read_line(&mut reader, &mut pending) {
            Ok(LineRead::Line(line)) => {
                if line.is_empty() {
                    continue;
                }
                match SignalingMessage::from_json(&line) {
                    Ok(msg) => on_event(SignalingEvent::Message(msg)),
                    Err(err) => warn!(error = %err, "ignoring malformed relay message"),
                }
            }
            Ok(LineRead::Idle) => continue,
            Ok(LineRead::Closed) => {
                if !closed.swap(true, Ordering::SeqCst) {
                    on_event(SignalingEvent::Disconnected);
                }
                return;
            }
            Err(err) => {
                if !closed.swap(true, Ordering::SeqCst) {
                    on_event(SignalingEvent::Error(format!("relay connection lost: {}", err)));
                }
                return;
            }
        }
    }
}

/// Writes queued lines; `Ok(false)` once the client asked to close.
fn write_queued(stream: &mut ClientStream, outgoing: &Receiver<Outgoing>) -> std::io::Result<bool> {
    let mut wrote = false;
    let open = loop {
        match outgoing.try_recv() {
            Ok(Outgoing::Line(line)) => {
                stream.write_all(line.as_bytes())?;
                stream.write_all(b"\n")?;
                wrote = true;
            }
            Ok(Outgoing::Close) | Err(mpsc::TryRecvError::Disconnected) => break false,
            Err(mpsc::TryRecvError::Empty) => break true,
        }
    };
    if wrote {
        stream.flush()?;
    }
    Ok(open)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn connect_to(addr: &str) -> Result<SignalingClient, SessionError> {
        SignalingClient::connect(addr, PeerIdentifier::generate(), |_| {})
    }

    #[test]
    fn test_unresolvable_address_is_relay_unavailable() {
        assert!(matches!(
            connect_to("no port here"),
            Err(SessionError::RelayUnavailable(_))
        ));
    }

    #[test]
    fn test_blackholed_relay_gives_up_within_connect_timeout() {
        // TEST-NET-1 is never routed; the attempt either times out or is refused early.
        let started = Instant::now();
        let result = connect_to("192.0.2.1:8443");

        assert!(matches!(result, Err(SessionError::RelayUnavailable(_))));
        assert!(started.elapsed() < CONNECT_TIMEOUT + Duration::from_secs(2));
    }
}
