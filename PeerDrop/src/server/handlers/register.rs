//! `register`: binds a peer identifier to the connection.

use tracing::warn;

use crate::server::state::RelayState;

use super::context::ConnectionContext;

pub fn handle_register(peer_id: &str, ctx: &mut ConnectionContext, state: &RelayState) {
    if ctx.registered.as_deref() == Some(peer_id) {
        return;
    }

    match state.register(peer_id, ctx.connection_id, ctx.tx.clone()) {
        Ok(()) => {
            if let Some(previous) = ctx.registered.replace(peer_id.to_string()) {
                state.unregister(&previous, ctx.connection_id);
            }
        }
        Err(err) => warn!(
            connection_id = ctx.connection_id,
            %peer_id,
            error = %err,
            "registration refused"
        ),
    }
}
