pub mod data_channel;
pub mod peer_connection;
pub mod peer_connection_error;
