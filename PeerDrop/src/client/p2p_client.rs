//! Direct connection of one session, seen from the session worker.

use std::sync::mpsc::Sender;
use std::sync::Arc;

use peer_link::{ChannelEvent, DataChannel, PeerConnection, PeerConnectionRole};
use tracing::{debug, warn};

use crate::config::AppConfig;

use super::error::SessionError;
use super::session::SessionEvent;
use super::types::TransferRole;

pub struct P2PClient {
    peer_connection: PeerConnection,
    channel: Option<Arc<DataChannel>>,
}

impl P2PClient {
    /// The sender offers and nominates, the receiver answers.
    pub(crate) fn new(
        config: &AppConfig,
        role: TransferRole,
        events: Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let rtc_role = match role {
            TransferRole::Sender => PeerConnectionRole::Controlling,
            TransferRole::Receiver => PeerConnectionRole::Controlled,
        };
        let peer_connection = PeerConnection::new(
            config.rtc_config(),
            rtc_role,
            Arc::new(move |event| {
                let _ = events.send(SessionEvent::Connection(event));
            }),
        )?;
        debug!(local_addr = %peer_connection.local_addr(), "direct listener ready");

        Ok(Self {
            peer_connection,
            channel: None,
        })
    }

    pub fn create_offer(&mut self) -> Result<String, SessionError> {
        Ok(self.peer_connection.create_offer()?)
    }

    pub fn accept_offer(&mut self, offer: &str) -> Result<String, SessionError> {
        Ok(self.peer_connection.process_offer(offer)?)
    }

    pub fn apply_answer(&mut self, answer: &str) -> Result<(), SessionError> {
        Ok(self.peer_connection.set_remote_description(answer)?)
    }

    /// A malformed candidate from the peer is skipped, not fatal.
    pub fn add_remote_candidate(&self, line: &str) {
        if let Err(err) = self.peer_connection.add_remote_candidate(line) {
            warn!(error = %err, candidate = %line, "remote candidate rejected");
        }
    }

    /// Keeps the opened channel and routes its frames to the session.
    pub(crate) fn attach_channel(
        &mut self,
        channel: DataChannel,
        events: Sender<SessionEvent>,
    ) -> Result<Arc<DataChannel>, SessionError> {
        if self.channel.is_some() {
            channel.close();
            return Err(SessionError::Connection(
                peer_link::PeerConnectionError::InvalidMessage(
                    "second data channel opened".to_string(),
                ),
            ));
        }

        channel.start_listener(move |event: ChannelEvent| {
            let _ = events.send(SessionEvent::Channel(event));
        })?;
        let channel = Arc::new(channel);
        self.channel = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Closes the channel and the listener. Idempotent.
    pub fn close(&mut self) {
        if let Some(channel) = &self.channel {
            channel.close();
        }
        self.peer_connection.close();
    }
}
