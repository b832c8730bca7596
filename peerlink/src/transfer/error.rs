use thiserror::Error;

use crate::rtc::peer_connection_error::PeerConnectionError;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chunk is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("malformed transfer message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("channel error: {0}")]
    Channel(#[from] PeerConnectionError),
}
