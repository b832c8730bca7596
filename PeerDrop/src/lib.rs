//! PeerDrop: direct file transfer between two peers, brokered by a small
//! signaling relay.

pub mod client;
pub mod config;
pub mod logger;
pub mod server;

pub use client::transfer_session::{TransferObserver, TransferSession};
pub use client::types::{ConnectionState, TransferRole};
pub use config::AppConfig;
pub use peer_link::transfer::ReceivedFile;
