pub mod ice;
pub mod protocols;
pub mod rtc;
pub mod stun;
pub mod transfer;

pub use ice::IceAgent;
pub use protocols::file_transfer::FileTransferMessage;
pub use protocols::signaling::SignalingMessage;
pub use rtc::data_channel::{ChannelEvent, DataChannel};
pub use rtc::peer_connection::{ConnectionEvent, PeerConnection, PeerConnectionRole, RtcConfig};
pub use rtc::peer_connection_error::PeerConnectionError;
