use peer_link::PeerConnectionError;
use peer_link::transfer::TransferError;
use thiserror::Error;

/// Failures that end a transfer session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid link: {0}")]
    InvalidLink(String),
    #[error("signaling relay unavailable: {0}")]
    RelayUnavailable(String),
    #[error("handshake timed out after {0} s")]
    HandshakeTimeout(u64),
    #[error("connection failed: {0}")]
    Connection(#[from] PeerConnectionError),
    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("channel closed before the transfer completed")]
    ChannelClosed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
