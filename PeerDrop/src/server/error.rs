use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("invalid peer identifier: {0}")]
    InvalidPeerId(String),
    #[error("peer identifier {0} is already registered")]
    PeerIdTaken(String),
    #[error("registry lock poisoned")]
    LockPoisoned,
}
