//! Session-level enums shared by the client modules.

use std::fmt;

/// Side of the transfer, fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRole {
    Sender,
    Receiver,
}

/// Connection status reported to the observer.
///
/// `Disconnected` after `Waiting` or `Connected` is terminal for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Waiting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Waiting => "waiting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}
