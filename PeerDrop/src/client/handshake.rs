//! Connection establishment as an explicit state machine.
//!
//! [`HandshakeMachine`] consumes [`HandshakeEvent`]s (relay messages and
//! local connection progress) and answers with [`HandshakeAction`]s for the
//! session to carry out. It performs no I/O.
//!
//! Sender: create the offer, wait for a `requestOffer`, send the offer to the
//! first peer asking, apply its answer. Receiver: ask the sender for its
//! offer, accept it, send the answer. Both trickle candidates once their own
//! description has been sent.

use std::collections::VecDeque;

use peer_link::SignalingMessage;

use super::types::{ConnectionState, TransferRole};

/// Remote candidates kept for a sender that has not been asked for its offer
/// yet; the oldest is dropped beyond this.
const MAX_EARLY_CANDIDATES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    LocalOfferReady(String),
    RequestOfferReceived { from: String },
    RemoteOfferReceived { from: String, payload: String },
    LocalAnswerReady(String),
    RemoteAnswerReceived { from: String, payload: String },
    LocalCandidateReady(String),
    RemoteCandidateReceived { from: String, payload: String },
    ChannelOpened,
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeAction {
    Signal(SignalingMessage),
    /// Create the local offer and report it with `LocalOfferReady`.
    CreateOffer,
    /// Process the remote offer and report the answer with `LocalAnswerReady`.
    AcceptOffer(String),
    ApplyAnswer(String),
    AddRemoteCandidate(String),
    StateChanged(ConnectionState),
}

#[derive(Debug)]
pub struct HandshakeMachine {
    role: TransferRole,
    local_id: String,
    remote_id: Option<String>,
    local_description: Option<String>,
    description_sent: bool,
    remote_description_applied: bool,
    pending_local_candidates: Vec<String>,
    pending_remote_candidates: VecDeque<(String, String)>,
    state: ConnectionState,
    finished: bool,
}

impl HandshakeMachine {
    /// Sender side; the receiver is bound by the first `requestOffer`.
    pub fn sender(local_id: impl Into<String>) -> Self {
        Self::new(TransferRole::Sender, local_id.into(), None)
    }

    /// Receiver side, connecting to the sender named by the share link.
    pub fn receiver(local_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self::new(TransferRole::Receiver, local_id.into(), Some(sender_id.into()))
    }

    fn new(role: TransferRole, local_id: String, remote_id: Option<String>) -> Self {
        Self {
            role,
            local_id,
            remote_id,
            local_description: None,
            description_sent: false,
            remote_description_applied: false,
            pending_local_candidates: Vec::new(),
            pending_remote_candidates: VecDeque::new(),
            state: ConnectionState::Disconnected,
            finished: false,
        }
    }

    pub fn role(&self) -> TransferRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The peer on the other side, once known.
    pub fn remote_peer(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn start(&mut self) -> Vec<HandshakeAction> {
        let mut actions = Vec::new();
        match self.role {
            TransferRole::Sender => actions.push(HandshakeAction::CreateOffer),
            TransferRole::Receiver => {
                if let Some(remote) = &self.remote_id {
                    actions.push(HandshakeAction::Signal(SignalingMessage::RequestOffer {
                        from: self.local_id.clone(),
                        to: remote.clone(),
                    }));
                }
            }
        }
        self.transition(ConnectionState::Waiting, &mut actions);
        actions
    }

    pub fn handle(&mut self, event: HandshakeEvent) -> Vec<HandshakeAction> {
        let mut actions = Vec::new();
        if self.finished {
            return actions;
        }

        match event {
            HandshakeEvent::LocalOfferReady(offer) => {
                if self.role == TransferRole::Sender {
                    self.local_description = Some(offer);
                    if self.remote_id.is_some() && !self.description_sent {
                        self.send_description(&mut actions);
                    }
                }
            }
            HandshakeEvent::RequestOfferReceived { from } => {
                if self.role == TransferRole::Sender {
                    self.on_request_offer(from, &mut actions);
                }
            }
            HandshakeEvent::RemoteOfferReceived { from, payload } => {
                if self.role == TransferRole::Receiver
                    && self.is_remote(&from)
                    && !self.remote_description_applied
                {
                    self.remote_description_applied = true;
                    actions.push(HandshakeAction::AcceptOffer(payload));
                }
            }
            HandshakeEvent::LocalAnswerReady(answer) => {
                if self.role == TransferRole::Receiver && !self.description_sent {
                    self.local_description = Some(answer);
                    self.send_description(&mut actions);
                }
            }
            HandshakeEvent::RemoteAnswerReceived { from, payload } => {
                if self.role == TransferRole::Sender
                    && self.is_remote(&from)
                    && !self.remote_description_applied
                {
                    self.remote_description_applied = true;
                    actions.push(HandshakeAction::ApplyAnswer(payload));
                }
            }
            HandshakeEvent::LocalCandidateReady(candidate) => {
                match (&self.remote_id, self.description_sent) {
                    (Some(remote), true) => {
                        actions.push(self.candidate_message(remote, candidate));
                    }
                    _ => self.pending_local_candidates.push(candidate),
                }
            }
            HandshakeEvent::RemoteCandidateReceived { from, payload } => {
                if self.is_remote(&from) {
                    actions.push(HandshakeAction::AddRemoteCandidate(payload));
                } else if self.role == TransferRole::Sender && self.remote_id.is_none() {
                    if self.pending_remote_candidates.len() == MAX_EARLY_CANDIDATES {
                        self.pending_remote_candidates.pop_front();
                    }
                    self.pending_remote_candidates.push_back((from, payload));
                }
            }
            HandshakeEvent::ChannelOpened => {
                self.transition(ConnectionState::Connected, &mut actions);
            }
            HandshakeEvent::ChannelClosed => {
                self.transition(ConnectionState::Disconnected, &mut actions);
            }
        }
        actions
    }

    fn on_request_offer(&mut self, from: String, actions: &mut Vec<HandshakeAction>) {
        match self.remote_id.clone() {
            None => {
                self.remote_id = Some(from.clone());
                if self.local_description.is_some() {
                    self.send_description(actions);
                }
                let replay = std::mem::take(&mut self.pending_remote_candidates);
                for (candidate_from, payload) in replay {
                    if candidate_from == from {
                        actions.push(HandshakeAction::AddRemoteCandidate(payload));
                    }
                }
            }
            Some(remote) if remote == from => {
                // Repeated request: the receiver may have missed the offer.
                if let (Some(offer), true) = (&self.local_description, self.description_sent) {
                    actions.push(HandshakeAction::Signal(SignalingMessage::Offer {
                        from: self.local_id.clone(),
                        to: remote,
                        payload: offer.clone(),
                    }));
                }
            }
            Some(_) => {}
        }
    }

    /// Sends the local description, then every buffered local candidate.
    fn send_description(&mut self, actions: &mut Vec<HandshakeAction>) {
        let (Some(remote), Some(description)) = (self.remote_id.clone(), self.local_description.clone())
        else {
            return;
        };

        let message = match self.role {
            TransferRole::Sender => SignalingMessage::Offer {
                from: self.local_id.clone(),
                to: remote.clone(),
                payload: description,
            },
            TransferRole::Receiver => SignalingMessage::Answer {
                from: self.local_id.clone(),
                to: remote.clone(),
                payload: description,
            },
        };
        actions.push(HandshakeAction::Signal(message));
        self.description_sent = true;

        for candidate in std::mem::take(&mut self.pending_local_candidates) {
            actions.push(self.candidate_message(&remote, candidate));
        }
    }

    fn candidate_message(&self, remote: &str, candidate: String) -> HandshakeAction {
        HandshakeAction::Signal(SignalingMessage::IceCandidate {
            from: self.local_id.clone(),
            to: remote.to_string(),
            payload: candidate,
        })
    }

    fn is_remote(&self, peer: &str) -> bool {
        self.remote_id.as_deref() == Some(peer)
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<HandshakeAction>) {
        if self.state != next {
            self.state = next;
            actions.push(HandshakeAction::StateChanged(next));
        }
        if next == ConnectionState::Disconnected {
            self.finished = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: &str = "senderSender123";
    const RECEIVER: &str = "receiverRecv123";
    const OTHER: &str = "otherOther12345";

    fn signals(actions: &[HandshakeAction]) -> Vec<&SignalingMessage> {
        actions
            .iter()
            .filter_map(|action| match action {
                HandshakeAction::Signal(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn started_sender() -> HandshakeMachine {
        let mut machine = HandshakeMachine::sender(SENDER);
        assert_eq!(
            machine.start(),
            vec![
                HandshakeAction::CreateOffer,
                HandshakeAction::StateChanged(ConnectionState::Waiting)
            ]
        );
        machine
    }

    #[test]
    fn test_sender_buffers_candidates_until_offer_sent() {
        let mut machine = started_sender();
        assert!(machine.handle(HandshakeEvent::LocalCandidateReady("c1".into())).is_empty());
        assert!(machine.handle(HandshakeEvent::LocalOfferReady("offer".into())).is_empty());
        assert!(machine.handle(HandshakeEvent::LocalCandidateReady("c2".into())).is_empty());

        let actions = machine.handle(HandshakeEvent::RequestOfferReceived {
            from: RECEIVER.into(),
        });
        let sent = signals(&actions);
        assert_eq!(sent.len(), 3);
        assert_eq!(
            sent[0],
            &SignalingMessage::Offer {
                from: SENDER.into(),
                to: RECEIVER.into(),
                payload: "offer".into(),
            }
        );
        assert!(matches!(sent[1], SignalingMessage::IceCandidate { payload, .. } if payload == "c1"));
        assert!(matches!(sent[2], SignalingMessage::IceCandidate { payload, .. } if payload == "c2"));

        // Later candidates go out immediately.
        let actions = machine.handle(HandshakeEvent::LocalCandidateReady("c3".into()));
        assert_eq!(signals(&actions).len(), 1);
    }

    #[test]
    fn test_sender_ignores_second_receiver_and_resends_to_first() {
        let mut machine = started_sender();
        machine.handle(HandshakeEvent::LocalOfferReady("offer".into()));
        machine.handle(HandshakeEvent::RequestOfferReceived {
            from: RECEIVER.into(),
        });

        assert!(machine
            .handle(HandshakeEvent::RequestOfferReceived { from: OTHER.into() })
            .is_empty());
        assert_eq!(machine.remote_peer(), Some(RECEIVER));

        let again = machine.handle(HandshakeEvent::RequestOfferReceived {
            from: RECEIVER.into(),
        });
        assert!(matches!(signals(&again)[..], [SignalingMessage::Offer { .. }]));
    }

    #[test]
    fn test_sender_applies_answer_once_from_bound_peer() {
        let mut machine = started_sender();
        machine.handle(HandshakeEvent::LocalOfferReady("offer".into()));
        machine.handle(HandshakeEvent::RequestOfferReceived {
            from: RECEIVER.into(),
        });

        assert!(machine
            .handle(HandshakeEvent::RemoteAnswerReceived {
                from: OTHER.into(),
                payload: "evil".into(),
            })
            .is_empty());
        assert_eq!(
            machine.handle(HandshakeEvent::RemoteAnswerReceived {
                from: RECEIVER.into(),
                payload: "answer".into(),
            }),
            vec![HandshakeAction::ApplyAnswer("answer".into())]
        );
        assert!(machine
            .handle(HandshakeEvent::RemoteAnswerReceived {
                from: RECEIVER.into(),
                payload: "answer".into(),
            })
            .is_empty());
    }

    #[test]
    fn test_sender_replays_early_remote_candidates() {
        let mut machine = started_sender();
        machine.handle(HandshakeEvent::LocalOfferReady("offer".into()));
        assert!(machine
            .handle(HandshakeEvent::RemoteCandidateReceived {
                from: RECEIVER.into(),
                payload: "early".into(),
            })
            .is_empty());

        let actions = machine.handle(HandshakeEvent::RequestOfferReceived {
            from: RECEIVER.into(),
        });
        assert!(actions.contains(&HandshakeAction::AddRemoteCandidate("early".into())));
    }

    #[test]
    fn test_early_remote_candidates_are_bounded() {
        let mut machine = started_sender();
        machine.handle(HandshakeEvent::LocalOfferReady("offer".into()));
        for n in 0..MAX_EARLY_CANDIDATES + 4 {
            machine.handle(HandshakeEvent::RemoteCandidateReceived {
                from: RECEIVER.into(),
                payload: format!("c{}", n),
            });
        }

        let replayed: Vec<HandshakeAction> = machine
            .handle(HandshakeEvent::RequestOfferReceived {
                from: RECEIVER.into(),
            })
            .into_iter()
            .filter(|action| matches!(action, HandshakeAction::AddRemoteCandidate(_)))
            .collect();

        assert_eq!(replayed.len(), MAX_EARLY_CANDIDATES);
        assert_eq!(replayed[0], HandshakeAction::AddRemoteCandidate("c4".into()));
        assert_eq!(
            replayed.last(),
            Some(&HandshakeAction::AddRemoteCandidate(format!(
                "c{}",
                MAX_EARLY_CANDIDATES + 3
            )))
        );
    }

    #[test]
    fn test_receiver_flow() {
        let mut machine = HandshakeMachine::receiver(RECEIVER, SENDER);
        assert_eq!(
            machine.start(),
            vec![
                HandshakeAction::Signal(SignalingMessage::RequestOffer {
                    from: RECEIVER.into(),
                    to: SENDER.into(),
                }),
                HandshakeAction::StateChanged(ConnectionState::Waiting),
            ]
        );

        // Candidates before the offer are fed to the connection right away.
        assert_eq!(
            machine.handle(HandshakeEvent::RemoteCandidateReceived {
                from: SENDER.into(),
                payload: "c-remote".into(),
            }),
            vec![HandshakeAction::AddRemoteCandidate("c-remote".into())]
        );
        assert!(machine
            .handle(HandshakeEvent::RemoteCandidateReceived {
                from: OTHER.into(),
                payload: "stranger".into(),
            })
            .is_empty());

        assert_eq!(
            machine.handle(HandshakeEvent::RemoteOfferReceived {
                from: SENDER.into(),
                payload: "offer".into(),
            }),
            vec![HandshakeAction::AcceptOffer("offer".into())]
        );
        assert!(machine
            .handle(HandshakeEvent::RemoteOfferReceived {
                from: SENDER.into(),
                payload: "offer".into(),
            })
            .is_empty());

        assert!(machine.handle(HandshakeEvent::LocalCandidateReady("c-local".into())).is_empty());
        let actions = machine.handle(HandshakeEvent::LocalAnswerReady("answer".into()));
        let sent = signals(&actions);
        assert!(matches!(sent[0], SignalingMessage::Answer { payload, .. } if payload == "answer"));
        assert!(matches!(sent[1], SignalingMessage::IceCandidate { payload, .. } if payload == "c-local"));
    }

    #[test]
    fn test_channel_events_drive_state() {
        let mut machine = HandshakeMachine::receiver(RECEIVER, SENDER);
        machine.start();

        assert_eq!(
            machine.handle(HandshakeEvent::ChannelOpened),
            vec![HandshakeAction::StateChanged(ConnectionState::Connected)]
        );
        assert!(machine.handle(HandshakeEvent::ChannelOpened).is_empty());
        assert_eq!(
            machine.handle(HandshakeEvent::ChannelClosed),
            vec![HandshakeAction::StateChanged(ConnectionState::Disconnected)]
        );
        assert!(machine.handle(HandshakeEvent::ChannelClosed).is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }
}
