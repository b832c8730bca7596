//! Error types for the direct peer connection.

use thiserror::Error;

/// Errors that can occur during peer connection operations.
#[derive(Debug, Error)]
pub enum PeerConnectionError {
    /// Input/output error returned by the operating system.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error converting or interpreting session descriptions.
    #[error("SDP error: {0}")]
    Sdp(String),
    /// Error originating from the ICE agent.
    #[error("ICE error: {0}")]
    Ice(String),
    /// The peer role does not allow the requested operation.
    #[error("Invalid role: {0}")]
    InvalidRole(&'static str),
    /// The connection or channel was already closed.
    #[error("connection closed")]
    Closed,
    /// A message that cannot be framed on the channel.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
