//! Session worker: the single owner of a transfer's mutable state.
//!
//! Relay messages, connection progress, channel frames, the sender thread's
//! reports and cancellation all arrive as [`SessionEvent`]s on one queue, so
//! the handshake machine, the connection and the reassembler are only ever
//! touched from the worker thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use peer_link::transfer::{
    stream_file, ReassemblyStep, Reassembler, StreamOutcome, TransferError, CHUNK_DELAY,
};
use peer_link::{ChannelEvent, ConnectionEvent, DataChannel, SignalingMessage};
use tracing::{debug, error, info, warn};

use super::error::SessionError;
use super::handshake::{HandshakeAction, HandshakeEvent, HandshakeMachine};
use super::p2p_client::P2PClient;
use super::signaling_client::{SignalingClient, SignalingEvent};
use super::transfer_session::TransferObserver;
use super::types::{ConnectionState, TransferRole};

/// How long the sender waits for the receiver to hang up after the last chunk.
const LINGER_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) enum SessionEvent {
    Signal(SignalingEvent),
    Connection(ConnectionEvent),
    Channel(ChannelEvent),
    Outgoing(OutgoingEvent),
    Cancel,
}

/// Reports of the sender's streaming thread.
pub(crate) enum OutgoingEvent {
    Progress(u8),
    /// The thread returned; its result is collected by joining it.
    Done,
}

enum Outcome {
    Completed,
    Cancelled,
    Failed(SessionError),
}

#[derive(Clone, Copy)]
enum Deadline {
    Handshake(Instant),
    Linger(Instant),
}

impl Deadline {
    fn at(self) -> Instant {
        match self {
            Deadline::Handshake(at) | Deadline::Linger(at) => at,
        }
    }
}

pub(crate) struct Session {
    role: TransferRole,
    machine: HandshakeMachine,
    signaling: SignalingClient,
    p2p: P2PClient,
    observer: Arc<dyn TransferObserver>,
    events: Sender<SessionEvent>,
    file_path: Option<PathBuf>,
    cancelled: Arc<AtomicBool>,
    reassembler: Reassembler,
    handshake_timeout: Duration,
    deadline: Option<Deadline>,
    streamer: Option<JoinHandle<Result<StreamOutcome, TransferError>>>,
    sent: bool,
    last_progress: u8,
    done: bool,
}

pub(crate) struct SessionParts {
    pub machine: HandshakeMachine,
    pub signaling: SignalingClient,
    pub p2p: P2PClient,
    pub observer: Arc<dyn TransferObserver>,
    pub events: Sender<SessionEvent>,
    pub file_path: Option<PathBuf>,
    pub cancelled: Arc<AtomicBool>,
    pub handshake_timeout: Duration,
}

impl Session {
    pub(crate) fn new(parts: SessionParts) -> Self {
        Self {
            role: parts.machine.role(),
            machine: parts.machine,
            signaling: parts.signaling,
            p2p: parts.p2p,
            observer: parts.observer,
            events: parts.events,
            file_path: parts.file_path,
            cancelled: parts.cancelled,
            reassembler: Reassembler::new(),
            handshake_timeout: parts.handshake_timeout,
            deadline: None,
            streamer: None,
            sent: false,
            last_progress: 0,
            done: false,
        }
    }

    /// Runs the session until it completes, fails or is cancelled.
    pub(crate) fn run(mut self, queue: Receiver<SessionEvent>) {
        if self.role == TransferRole::Receiver {
            self.deadline = Some(Deadline::Handshake(Instant::now() + self.handshake_timeout));
        }
        let actions = self.machine.start();
        if let Err(err) = self.apply(actions) {
            self.fail(err);
        }

        while !self.done {
            let event = match self.deadline {
                Some(deadline) => {
                    let left = deadline.at().saturating_duration_since(Instant::now());
                    match queue.recv_timeout(left) {
                        Ok(event) => event,
                        Err(RecvTimeoutError::Timeout) => {
                            self.on_deadline(deadline);
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match queue.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };

            if let Err(err) = self.handle(event) {
                self.fail(err);
            }
        }

        if !self.done {
            self.finish(Outcome::Cancelled);
        }
    }

    fn handle(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match event {
            SessionEvent::Signal(event) => self.on_signal(event),
            SessionEvent::Connection(event) => self.on_connection(event),
            SessionEvent::Channel(event) => self.on_channel(event),
            SessionEvent::Outgoing(OutgoingEvent::Progress(value)) => {
                self.report_progress(value);
                Ok(())
            }
            SessionEvent::Outgoing(OutgoingEvent::Done) => self.on_stream_done(),
            SessionEvent::Cancel => {
                info!("transfer cancelled");
                self.finish(Outcome::Cancelled);
                Ok(())
            }
        }
    }

    fn on_deadline(&mut self, deadline: Deadline) {
        self.deadline = None;
        match deadline {
            Deadline::Handshake(_) => {
                self.fail(SessionError::HandshakeTimeout(self.handshake_timeout.as_secs()));
            }
            Deadline::Linger(_) => {
                debug!("receiver did not hang up, closing");
                self.finish(Outcome::Completed);
            }
        }
    }

    // ========== Relay ==========

    fn on_signal(&mut self, event: SignalingEvent) -> Result<(), SessionError> {
        let msg = match event {
            SignalingEvent::Message(msg) => msg,
            SignalingEvent::Disconnected => return self.on_relay_lost("relay closed the connection"),
            SignalingEvent::Error(reason) => return self.on_relay_lost(&reason),
        };

        debug!(kind = msg.kind(), from = msg.from(), "relay message");
        let event = match msg {
            SignalingMessage::Register { .. } => return Ok(()),
            SignalingMessage::RequestOffer { from, .. } => HandshakeEvent::RequestOfferReceived { from },
            SignalingMessage::Offer { from, payload, .. } => {
                HandshakeEvent::RemoteOfferReceived { from, payload }
            }
            SignalingMessage::Answer { from, payload, .. } => {
                HandshakeEvent::RemoteAnswerReceived { from, payload }
            }
            SignalingMessage::IceCandidate { from, payload, .. } => {
                HandshakeEvent::RemoteCandidateReceived { from, payload }
            }
        };
        self.drive(event)?;

        // The sender's clock starts once a receiver has asked for the offer.
        if self.role == TransferRole::Sender
            && self.deadline.is_none()
            && self.machine.state() == ConnectionState::Waiting
            && self.machine.remote_peer().is_some()
        {
            self.deadline = Some(Deadline::Handshake(Instant::now() + self.handshake_timeout));
        }
        Ok(())
    }

    fn on_relay_lost(&mut self, reason: &str) -> Result<(), SessionError> {
        if self.machine.state() == ConnectionState::Connected {
            warn!(%reason, "relay connection lost, direct channel stays up");
            return Ok(());
        }
        Err(SessionError::RelayUnavailable(reason.to_string()))
    }

    // ========== Direct connection ==========

    fn on_connection(&mut self, event: ConnectionEvent) -> Result<(), SessionError> {
        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                self.drive(HandshakeEvent::LocalCandidateReady(candidate.to_string()))
            }
            ConnectionEvent::CheckFailed { candidate, reason } => {
                debug!(%candidate, %reason, "connectivity check failed");
                Ok(())
            }
            ConnectionEvent::ChannelOpened(channel) => self.on_channel_opened(channel),
        }
    }

    fn on_channel_opened(&mut self, channel: DataChannel) -> Result<(), SessionError> {
        let peer_addr = channel.peer_addr();
        let channel = self.p2p.attach_channel(channel, self.events.clone())?;
        info!(%peer_addr, "direct channel open");

        self.deadline = None;
        self.drive(HandshakeEvent::ChannelOpened)?;

        if self.role == TransferRole::Sender {
            self.spawn_streamer(channel)?;
        }
        Ok(())
    }

    fn spawn_streamer(&mut self, channel: Arc<DataChannel>) -> Result<(), SessionError> {
        let Some(path) = self.file_path.clone() else {
            return Err(SessionError::Transfer(TransferError::Protocol(
                "no file to send".to_string(),
            )));
        };
        let events = self.events.clone();
        let cancelled = Arc::clone(&self.cancelled);

        let handle = thread::Builder::new()
            .name("peerdrop-send".to_string())
            .spawn(move || {
                let result = stream_file(&*channel, &path, CHUNK_DELAY, &cancelled, |value| {
                    let _ = events.send(SessionEvent::Outgoing(OutgoingEvent::Progress(value)));
                });
                let _ = events.send(SessionEvent::Outgoing(OutgoingEvent::Done));
                result
            })?;
        self.streamer = Some(handle);
        Ok(())
    }

    /// Joins the streaming thread, `None` when it was already collected.
    fn join_streamer(&mut self) -> Option<Result<StreamOutcome, TransferError>> {
        let handle = self.streamer.take()?;
        match handle.join() {
            Ok(result) => Some(result),
            Err(_) => Some(Err(TransferError::Protocol(
                "sender thread panicked".to_string(),
            ))),
        }
    }

    fn on_stream_done(&mut self) -> Result<(), SessionError> {
        match self.join_streamer() {
            Some(Ok(StreamOutcome::Completed)) => self.on_all_sent(),
            Some(Ok(StreamOutcome::Cancelled)) | None => Ok(()),
            Some(Err(err)) => Err(err.into()),
        }
    }

    fn on_all_sent(&mut self) -> Result<(), SessionError> {
        if !self.sent {
            self.sent = true;
            self.report_progress(100);
            self.deadline = Some(Deadline::Linger(Instant::now() + LINGER_TIMEOUT));
        }
        Ok(())
    }

    // ========== Channel ==========

    fn on_channel(&mut self, event: ChannelEvent) -> Result<(), SessionError> {
        match event {
            ChannelEvent::Message(text) => match self.role {
                TransferRole::Receiver => self.on_frame(&text),
                TransferRole::Sender => {
                    debug!("ignoring frame on the sending side");
                    Ok(())
                }
            },
            ChannelEvent::Closed => self.on_channel_closed(),
        }
    }

    fn on_frame(&mut self, text: &str) -> Result<(), SessionError> {
        match self.reassembler.handle_text(text)? {
            ReassemblyStep::Metadata(metadata) => {
                info!(name = %metadata.name, size = metadata.size, chunks = metadata.total_chunks, "receiving file");
            }
            ReassemblyStep::Chunk { percent } => {
                if let Some(value) = percent {
                    self.report_progress(value);
                }
            }
            ReassemblyStep::Complete { percent, file } => {
                if let Some(value) = percent {
                    self.report_progress(value);
                }
                info!(name = %file.name, size = file.size, "file received");
                self.observer.on_complete(file);
                self.finish(Outcome::Completed);
            }
            ReassemblyStep::Ignored => {}
        }
        Ok(())
    }

    fn on_channel_closed(&mut self) -> Result<(), SessionError> {
        if self.role == TransferRole::Sender && !self.sent {
            // The receiver may hang up before the streaming thread reported back.
            if let Some(Ok(StreamOutcome::Completed)) = self.join_streamer() {
                self.on_all_sent()?;
            }
        }

        if self.sent {
            debug!("receiver closed the channel");
            self.finish(Outcome::Completed);
            Ok(())
        } else {
            Err(SessionError::ChannelClosed)
        }
    }

    // ========== Handshake ==========

    fn drive(&mut self, event: HandshakeEvent) -> Result<(), SessionError> {
        let actions = self.machine.handle(event);
        self.apply(actions)
    }

    fn apply(&mut self, actions: Vec<HandshakeAction>) -> Result<(), SessionError> {
        for action in actions {
            match action {
                HandshakeAction::Signal(msg) => self.signaling.send(&msg)?,
                HandshakeAction::CreateOffer => {
                    let offer = self.p2p.create_offer()?;
                    self.drive(HandshakeEvent::LocalOfferReady(offer))?;
                }
                HandshakeAction::AcceptOffer(offer) => {
                    let answer = self.p2p.accept_offer(&offer)?;
                    self.drive(HandshakeEvent::LocalAnswerReady(answer))?;
                }
                HandshakeAction::ApplyAnswer(answer) => self.p2p.apply_answer(&answer)?,
                HandshakeAction::AddRemoteCandidate(line) => self.p2p.add_remote_candidate(&line),
                HandshakeAction::StateChanged(state) => {
                    info!(%state, role = ?self.role, "connection state");
                    self.observer.on_status_change(state);
                }
            }
        }
        Ok(())
    }

    // ========== Teardown ==========

    fn report_progress(&mut self, value: u8) {
        if value > self.last_progress {
            self.last_progress = value;
            self.observer.on_progress(value);
        }
    }

    fn fail(&mut self, err: SessionError) {
        if self.cancelled.load(Ordering::SeqCst) {
            debug!(error = %err, "error after cancellation");
            self.finish(Outcome::Cancelled);
        } else {
            self.finish(Outcome::Failed(err));
        }
    }

    /// Reports the outcome once, closes every connection and ends on `Disconnected`.
    fn finish(&mut self, outcome: Outcome) {
        if self.done {
            return;
        }
        self.done = true;
        self.deadline = None;
        self.cancelled.store(true, Ordering::SeqCst);

        let peer_id = self.signaling.peer_id();
        match &outcome {
            Outcome::Completed => info!(%peer_id, role = ?self.role, "transfer complete"),
            Outcome::Cancelled => debug!(%peer_id, role = ?self.role, "session cancelled"),
            Outcome::Failed(err) => {
                error!(%peer_id, role = ?self.role, error = %err, "transfer failed");
                self.observer.on_error(&err.to_string());
            }
        }
        if !self.reassembler.is_complete() {
            if let Some(metadata) = self.reassembler.metadata() {
                warn!(
                    name = %metadata.name,
                    received = self.reassembler.received_chunks(),
                    total = metadata.total_chunks,
                    "discarding partial file"
                );
            }
        }

        self.p2p.close();
        self.signaling.close();
        if let Some(Err(err)) = self.join_streamer() {
            debug!(error = %err, "sender stopped");
        }

        for action in self.machine.handle(HandshakeEvent::ChannelClosed) {
            if let HandshakeAction::StateChanged(state) = action {
                self.observer.on_status_change(state);
            }
        }
    }
}
