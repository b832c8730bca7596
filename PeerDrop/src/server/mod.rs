//! PeerDrop signaling relay.
//!
//! One thread per client. Each thread owns its TLS stream, drains the
//! connection's outbound queue and reads newline-delimited JSON messages,
//! which [`handlers::dispatch`] registers or forwards.

pub mod error;
pub mod handlers;
pub mod protocol;
pub mod state;
pub mod tls;
pub mod types;
pub mod validation;

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rustls::{ServerConfig, ServerConnection, StreamOwned};
use tracing::{debug, error, info, warn};

use handlers::{dispatch, ConnectionContext};
use protocol::{flush_outgoing, read_line, LineRead};
use state::{ClientSlot, RelayState};
use types::TlsStream;

/// Read timeout between two drains of the outbound queue.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts clients until the listener fails.
pub fn serve(
    listener: TcpListener,
    state: Arc<RelayState>,
    tls_config: Arc<ServerConfig>,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, max_clients = state.max_clients, "relay listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "accept failed");
                continue;
            }
        };
        let addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(err) => {
                error!(error = %err, "could not read client address");
                continue;
            }
        };

        let Some(slot) = state.try_admit() else {
            warn!(%addr, "max clients reached, refusing connection");
            continue;
        };

        let state = Arc::clone(&state);
        let tls_config = Arc::clone(&tls_config);
        let spawned = thread::Builder::new()
            .name(format!("relay-{}", addr))
            .spawn(move || handle_client(stream, addr, state, tls_config, slot));
        if let Err(err) = spawned {
            error!(error = %err, "could not spawn client thread");
        }
    }
    Ok(())
}

/// Handles one client connection until it closes.
pub fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<RelayState>,
    tls_config: Arc<ServerConfig>,
    _slot: ClientSlot,
) {
    let connection_id = state.next_connection_id();
    info!(%addr, connection_id, "new connection");

    let mut tls_stream = match accept_tls(stream, tls_config) {
        Ok(tls_stream) => tls_stream,
        Err(err) => {
            warn!(%addr, error = %err, "TLS handshake failed");
            return;
        }
    };
    if let Err(err) = tls_stream.sock.set_read_timeout(Some(POLL_INTERVAL)) {
        warn!(%addr, error = %err, "could not set read timeout");
        return;
    }

    let mut reader = BufReader::new(tls_stream);
    let (tx, rx) = mpsc::channel::<String>();
    let mut ctx = ConnectionContext::new(connection_id, tx);
    let mut pending = Vec::new();

    loop {
        if let Err(err) = flush_outgoing(reader.get_mut(), &rx) {
            debug!(connection_id, error = %err, "write failed");
            break;
        }

        match read_line(&mut reader, &mut pending) {
            Ok(LineRead::Line(line)) => {
                if !line.is_empty() {
                    dispatch(&line, &mut ctx, &state);
                }
            }
            Ok(LineRead::Idle) => continue,
            Ok(LineRead::Closed) => break,
            Err(err) => {
                debug!(connection_id, error = %err, "read failed");
                break;
            }
        }
    }

    if let Some(peer_id) = ctx.registered.take() {
        state.unregister(&peer_id, connection_id);
    }
    info!(%addr, connection_id, "connection closed");
}

fn accept_tls(stream: TcpStream, tls_config: Arc<ServerConfig>) -> io::Result<TlsStream> {
    stream.set_read_timeout(Some(TLS_HANDSHAKE_TIMEOUT))?;
    stream.set_nodelay(true)?;

    let server_conn = ServerConnection::new(tls_config)
        .map_err(|err| io::Error::other(format!("TLS error: {}", err)))?;
    let mut tls_stream: TlsStream = StreamOwned::new(server_conn, stream);
    while tls_stream.conn.is_handshaking() {
        tls_stream.conn.complete_io(&mut tls_stream.sock)?;
    }
    Ok(tls_stream)
}
