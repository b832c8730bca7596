//! STUN binding client (RFC 5389), used only to learn the address a NAT
//! presents for this host.

mod client;
pub(crate) mod message;

use thiserror::Error;

pub use client::StunClient;
pub use message::{BindingRequest, BindingResponse};

pub const MAGIC_COOKIE: u32 = 0x2112_A442;
pub const STUN_HEADER_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum StunError {
    #[error("STUN I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("STUN message too short ({0} bytes)")]
    TooShort(usize),
    #[error("invalid magic cookie")]
    BadCookie,
    #[error("unexpected STUN message type {0:#06x}")]
    UnexpectedType(u16),
    #[error("binding response carries no mapped address")]
    NoMappedAddress,
    #[error("no IPv4 address for STUN server {0}")]
    Unresolved(String),
}
