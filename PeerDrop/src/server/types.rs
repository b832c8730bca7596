//! Types shared by the relay modules.

use std::net::TcpStream;
use std::sync::mpsc::Sender;

use rustls::{ServerConnection, StreamOwned};

/// TLS stream of one relay client.
pub type TlsStream = StreamOwned<ServerConnection, TcpStream>;

/// Identifies one accepted connection for the lifetime of the relay.
pub type ConnectionId = u64;

/// Registered peer with the outbound queue of its connection.
#[derive(Debug, Clone)]
pub struct ConnectedPeer {
    pub connection_id: ConnectionId,
    pub sender: Sender<String>,
}
