pub mod error;
pub mod handshake;
pub mod p2p_client;
pub mod peer_id;
pub mod signaling_client;
pub mod transfer_session;
pub mod types;

mod session;
