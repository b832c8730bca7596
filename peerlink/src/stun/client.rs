//! Sends Binding Requests over UDP and waits for the matching response.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use tracing::debug;

use super::message::{BindingRequest, BindingResponse};
use super::StunError;

const ATTEMPTS: u32 = 2;
const MAX_DATAGRAM: usize = 1024;

/// STUN client bound to one server.
#[derive(Debug, Clone)]
pub struct StunClient {
    pub server: String,
    pub timeout: Duration,
}

impl StunClient {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }

    /// Address the server saw this host's requests come from.
    pub fn query(&self) -> Result<SocketAddr, StunError> {
        let server = self
            .server
            .to_socket_addrs()?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| StunError::Unresolved(self.server.clone()))?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;

        let mut last_error = StunError::Io(std::io::ErrorKind::TimedOut.into());
        for attempt in 1..=ATTEMPTS {
            match self.transaction(&socket, server) {
                Ok(mapped) => {
                    debug!(%server, %mapped, "reflexive address discovered");
                    return Ok(mapped);
                }
                Err(err) => {
                    debug!(%server, attempt, error = %err, "STUN binding failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn transaction(&self, socket: &UdpSocket, server: SocketAddr) -> Result<SocketAddr, StunError> {
        let request = BindingRequest::new();
        socket.send_to(&request.encode(), server)?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(StunError::Io(std::io::ErrorKind::TimedOut.into()));
            }
            socket.set_read_timeout(Some(left))?;

            let (len, from) = socket.recv_from(&mut buf)?;
            if from != server {
                continue;
            }
            // Stale or foreign datagrams are skipped until the deadline.
            match BindingResponse::decode(&buf[..len]) {
                Ok(response) if response.transaction_id == request.transaction_id => {
                    return Ok(response.mapped_address);
                }
                Ok(_) => debug!("response to another transaction ignored"),
                Err(err) => debug!(error = %err, "unreadable STUN datagram ignored"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stun::message::encode_success;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;

    /// Answers `replies` requests, each with a stale response first.
    fn fake_server(mapped: SocketAddrV4, replies: usize) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        thread::spawn(move || {
            let mut buf = [0u8; 64];
            for _ in 0..replies {
                let (len, from) = socket.recv_from(&mut buf).unwrap();
                assert_eq!(len, 20);
                let mut id = [0u8; 12];
                id.copy_from_slice(&buf[8..20]);

                socket.send_to(&encode_success([0xEE; 12], mapped), from).unwrap();
                socket.send_to(&encode_success(id, mapped), from).unwrap();
            }
        });
        addr
    }

    #[test]
    fn test_query_returns_mapped_address() {
        let mapped = SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 51000);
        let server = fake_server(mapped, 1);

        let client = StunClient::new(server.to_string(), Duration::from_secs(2));
        assert_eq!(client.query().unwrap(), SocketAddr::V4(mapped));
    }

    #[test]
    fn test_silent_server_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client = StunClient::new(
            silent.local_addr().unwrap().to_string(),
            Duration::from_millis(100),
        );

        let started = Instant::now();
        assert!(client.query().is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_unresolvable_server() {
        let client = StunClient::new("not an address", Duration::from_millis(100));
        assert!(client.query().is_err());
    }
}
