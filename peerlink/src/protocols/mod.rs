pub mod file_transfer;
pub mod sdp;
pub mod signaling;
