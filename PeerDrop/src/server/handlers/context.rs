//! Per-connection context and message dispatcher.

use std::sync::mpsc::Sender;

use peer_link::SignalingMessage;
use tracing::warn;

use crate::server::state::RelayState;
use crate::server::types::ConnectionId;

use super::forward::handle_forward;
use super::register::handle_register;

/// What the relay knows about one client connection.
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    /// Identifier this connection registered, if any.
    pub registered: Option<String>,
    /// Outbound queue of this connection.
    pub tx: Sender<String>,
}

impl ConnectionContext {
    pub fn new(connection_id: ConnectionId, tx: Sender<String>) -> Self {
        Self {
            connection_id,
            registered: None,
            tx,
        }
    }
}

/// Parses one line and routes it to the matching handler.
///
/// Malformed lines and unknown message types are logged and ignored.
pub fn dispatch(line: &str, ctx: &mut ConnectionContext, state: &RelayState) {
    let msg = match SignalingMessage::from_json(line) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(connection_id = ctx.connection_id, error = %err, "ignoring malformed message");
            return;
        }
    };

    match msg {
        SignalingMessage::Register { peer_id } => handle_register(&peer_id, ctx, state),
        other => handle_forward(&other, line, ctx, state),
    }
}
