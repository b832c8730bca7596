//! Entry point of the client: start a send or a receive and observe it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use peer_link::transfer::{FileMetadata, ReceivedFile, CHUNK_SIZE};
use tracing::{debug, error, info};

use crate::config::AppConfig;

use super::error::SessionError;
use super::handshake::HandshakeMachine;
use super::p2p_client::P2PClient;
use super::peer_id::{parse_shared_identifier, PeerIdentifier};
use super::session::{Session, SessionEvent, SessionParts};
use super::signaling_client::SignalingClient;
use super::types::{ConnectionState, TransferRole};

/// Callbacks of a running transfer, invoked from the session's worker thread.
///
/// `on_complete` (receiver only) and `on_error` are terminal and fire at most
/// once; every session ends with `on_status_change(Disconnected)`.
pub trait TransferObserver: Send + Sync {
    fn on_status_change(&self, state: ConnectionState);
    fn on_progress(&self, percent: u8);
    fn on_complete(&self, file: ReceivedFile);
    fn on_error(&self, message: &str);
}

pub struct TransferSession {
    role: TransferRole,
    peer_id: PeerIdentifier,
    events: Sender<SessionEvent>,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl TransferSession {
    /// Offers the file at `path` and returns the session with its share link.
    pub fn start_sending(
        config: &AppConfig,
        path: impl AsRef<Path>,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<(Self, String), SessionError> {
        let path = path.as_ref();
        let metadata = FileMetadata::from_path(path, CHUNK_SIZE)?;
        info!(name = %metadata.name, size = metadata.size, "offering file");

        let peer_id = PeerIdentifier::generate();
        let link = peer_id.share_link(&config.link_base);
        let machine = HandshakeMachine::sender(peer_id.as_str());
        let session = Self::launch(config, peer_id, machine, Some(path), observer)?;
        Ok((session, link))
    }

    /// Connects to the sender named by `shared`, a share link or a bare identifier.
    pub fn start_receiving(
        config: &AppConfig,
        shared: &str,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<Self, SessionError> {
        let sender_id = parse_shared_identifier(shared)?;
        let peer_id = PeerIdentifier::generate();
        info!(sender = %sender_id, "receiving");

        let machine = HandshakeMachine::receiver(peer_id.as_str(), sender_id.as_str());
        Self::launch(config, peer_id, machine, None, observer)
    }

    fn launch(
        config: &AppConfig,
        peer_id: PeerIdentifier,
        machine: HandshakeMachine,
        file_path: Option<&Path>,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<Self, SessionError> {
        let role = machine.role();
        let (events, queue) = mpsc::channel();

        let started = Self::connect(config, &peer_id, role, &events).and_then(|(signaling, p2p)| {
            let cancelled = Arc::new(AtomicBool::new(false));
            let session = Session::new(SessionParts {
                machine,
                signaling,
                p2p,
                observer: Arc::clone(&observer),
                events: events.clone(),
                file_path: file_path.map(Path::to_path_buf),
                cancelled: Arc::clone(&cancelled),
                handshake_timeout: config.handshake_timeout(),
            });
            let worker = thread::Builder::new()
                .name(format!("session-{}", peer_id))
                .spawn(move || session.run(queue))?;
            Ok((cancelled, worker))
        });

        match started {
            Ok((cancelled, worker)) => Ok(Self {
                role,
                peer_id,
                events,
                cancelled,
                worker: Some(worker),
            }),
            Err(err) => {
                observer.on_error(&err.to_string());
                Err(err)
            }
        }
    }

    fn connect(
        config: &AppConfig,
        peer_id: &PeerIdentifier,
        role: TransferRole,
        events: &Sender<SessionEvent>,
    ) -> Result<(SignalingClient, P2PClient), SessionError> {
        let relay_events = events.clone();
        let signaling = SignalingClient::connect(&config.server_addr, peer_id.clone(), move |event| {
            let _ = relay_events.send(SessionEvent::Signal(event));
        })?;
        let p2p = P2PClient::new(config, role, events.clone())?;
        Ok((signaling, p2p))
    }

    pub fn role(&self) -> TransferRole {
        self.role
    }

    pub fn peer_id(&self) -> &PeerIdentifier {
        &self.peer_id
    }

    /// Stops the transfer. Idempotent; never reported through `on_error`.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(peer_id = %self.peer_id, "cancel requested");
        let _ = self.events.send(SessionEvent::Cancel);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|worker| worker.is_finished())
    }

    /// Blocks until the session has ended.
    pub fn wait(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(peer_id = %self.peer_id, "session worker panicked");
            }
        }
    }
}
