//! Forwarding of `requestOffer`, `offer`, `answer` and `iceCandidate`.

use peer_link::SignalingMessage;
use tracing::{debug, warn};

use crate::server::state::RelayState;

use super::context::ConnectionContext;

/// Queues `raw` verbatim to the connection registered as the message's `to`.
///
/// Messages for unknown peers are dropped; the sender is not told.
pub fn handle_forward(
    msg: &SignalingMessage,
    raw: &str,
    ctx: &ConnectionContext,
    state: &RelayState,
) {
    let (Some(from), Some(to)) = (msg.from(), msg.to()) else {
        return;
    };

    let Some(registered) = ctx.registered.as_deref() else {
        warn!(
            connection_id = ctx.connection_id,
            kind = msg.kind(),
            "message from unregistered connection dropped"
        );
        return;
    };
    if registered != from {
        warn!(
            connection_id = ctx.connection_id,
            %registered,
            claimed = %from,
            "message with foreign sender dropped"
        );
        return;
    }

    match state.sender_for(to) {
        Some(sender) => {
            if sender.send(raw.to_string()).is_err() {
                debug!(%to, "recipient connection is closing");
            } else {
                debug!(%from, %to, kind = msg.kind(), "forwarded");
            }
        }
        None => debug!(%from, %to, kind = msg.kind(), "recipient not registered, dropped"),
    }
}
