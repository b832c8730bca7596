//! Peer connection API based on ICE-style candidates over TCP.
//!
//! Each side listens on one TCP port and announces it as host candidates.
//! Once the remote credentials are known, every remote candidate is checked
//! (see [`crate::ice::connectivity`]). The controlling side nominates the
//! first connection validated in either direction; the controlled side opens
//! its channel when the nomination arrives. Exactly one [`DataChannel`] is
//! opened per connection object.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::ice::connectivity::NOMINATE;
use crate::ice::{answer_connectivity_check, perform_connectivity_check, IceAgent, IceCandidate};
use crate::protocols::sdp::SessionDescription;
use crate::stun::StunClient;

use super::data_channel::DataChannel;
pub use super::peer_connection_error::PeerConnectionError;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const NOMINATION_POLL: Duration = Duration::from_millis(250);
const MAX_NOMINATION_LINE: usize = 64;

/// Defines the role assumed by the peer within the signaling flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionRole {
    Controlling,
    Controlled,
}

impl PeerConnectionRole {
    pub fn is_controlling(self) -> bool {
        matches!(self, Self::Controlling)
    }
}

/// Settings for the direct connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcConfig {
    /// Listener address; a wildcard address gathers every usable interface.
    pub bind_addr: String,
    /// Base timeout of a single connectivity check.
    pub check_timeout: Duration,
    /// Announce a loopback candidate as well (same-host peers).
    pub include_loopback: bool,
    /// STUN server (`host:port`) asked for a server reflexive candidate.
    pub stun_server: Option<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".to_string(),
            check_timeout: Duration::from_secs(3),
            include_loopback: true,
            stun_server: None,
        }
    }
}

/// Notifications raised by a [`PeerConnection`], possibly from its own threads.
#[derive(Debug)]
pub enum ConnectionEvent {
    LocalCandidate(IceCandidate),
    ChannelOpened(DataChannel),
    CheckFailed {
        candidate: IceCandidate,
        reason: String,
    },
}

pub type ConnectionCallback = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

struct Shared {
    agent: Mutex<IceAgent>,
    on_event: ConnectionCallback,
    closed: AtomicBool,
    nominated: AtomicBool,
    connected: AtomicBool,
    check_timeout: Duration,
    controlling: bool,
}

impl Shared {
    fn emit(&self, event: ConnectionEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            (self.on_event)(event);
        }
    }

    fn agent(&self) -> Result<std::sync::MutexGuard<'_, IceAgent>, PeerConnectionError> {
        self.agent
            .lock()
            .map_err(|_| PeerConnectionError::Ice("ICE agent lock poisoned".to_string()))
    }
}

pub struct PeerConnection {
    role: PeerConnectionRole,
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    local_description: Option<String>,
    remote_description: Option<String>,
    candidates_announced: bool,
    acceptor: Option<JoinHandle<()>>,
}

impl PeerConnection {
    /// Binds the listener, gathers host candidates and starts accepting checks.
    pub fn new(
        config: RtcConfig,
        role: PeerConnectionRole,
        on_event: ConnectionCallback,
    ) -> Result<Self, PeerConnectionError> {
        let listener = TcpListener::bind(config.bind_addr.as_str())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let mut agent = IceAgent::new().set_controlling(role.is_controlling());
        agent.gather_candidates(local_addr, config.include_loopback);
        if let Some(server) = &config.stun_server {
            // Discovery is best effort; host candidates still work on a LAN.
            match StunClient::new(server.as_str(), config.check_timeout).query() {
                Ok(mapped) => {
                    agent.add_reflexive_candidate(mapped.ip(), local_addr.port());
                }
                Err(err) => warn!(%server, error = %err, "no server reflexive candidate"),
            }
        }
        if agent.local_candidates.is_empty() {
            return Err(PeerConnectionError::Ice(format!(
                "no usable host candidate for {}",
                local_addr
            )));
        }

        let shared = Arc::new(Shared {
            agent: Mutex::new(agent),
            on_event,
            closed: AtomicBool::new(false),
            nominated: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            check_timeout: config.check_timeout,
            controlling: role.is_controlling(),
        });

        let acceptor_shared = Arc::clone(&shared);
        let acceptor = thread::Builder::new()
            .name(format!("ice-accept-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, acceptor_shared))?;

        info!(%local_addr, ?role, "peer connection listening");

        Ok(Self {
            role,
            shared,
            local_addr,
            local_description: None,
            remote_description: None,
            candidates_announced: false,
            acceptor: Some(acceptor),
        })
    }

    // ========== Basic accessors ==========

    /// Returns the role configured for this connection.
    pub fn role(&self) -> PeerConnectionRole {
        self.role
    }

    /// Address of the listener receiving connectivity checks.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Access the generated local description.
    pub fn local_description(&self) -> Option<&str> {
        self.local_description.as_deref()
    }

    /// Access the remote description received.
    pub fn remote_description(&self) -> Option<&str> {
        self.remote_description.as_deref()
    }

    /// Indicates whether the data channel has been opened.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn local_candidates(&self) -> Result<Vec<IceCandidate>, PeerConnectionError> {
        Ok(self.shared.agent()?.local_candidates.clone())
    }

    // ========== SDP Negotiation ==========

    /// Generate an offer to start the negotiation as the controlling peer.
    pub fn create_offer(&mut self) -> Result<String, PeerConnectionError> {
        if !self.role.is_controlling() {
            return Err(PeerConnectionError::InvalidRole(
                "create_offer can only be used by a controlling peer",
            ));
        }
        self.ensure_open()?;

        let offer = SessionDescription::from_agent(&*self.shared.agent()?).to_string();
        self.local_description = Some(offer.clone());
        self.announce_candidates()?;

        Ok(offer)
    }

    /// Processes a remote offer and constructs the corresponding answer.
    pub fn process_offer(&mut self, offer_sdp: &str) -> Result<String, PeerConnectionError> {
        if self.role.is_controlling() {
            return Err(PeerConnectionError::InvalidRole(
                "process_offer can only be used by a controlled peer",
            ));
        }
        self.ensure_open()?;

        self.apply_remote(offer_sdp)?;
        let answer = SessionDescription::from_agent(&*self.shared.agent()?).to_string();
        self.local_description = Some(answer.clone());
        self.announce_candidates()?;
        self.start_checks()?;

        Ok(answer)
    }

    /// Sets the remote description when acting as a controller peer.
    pub fn set_remote_description(&mut self, remote_sdp: &str) -> Result<(), PeerConnectionError> {
        if !self.role.is_controlling() {
            return Err(PeerConnectionError::InvalidRole(
                "set_remote_description can only be used by a controlling peer",
            ));
        }
        self.ensure_open()?;

        self.apply_remote(remote_sdp)?;
        self.start_checks()
    }

    fn apply_remote(&mut self, remote_sdp: &str) -> Result<(), PeerConnectionError> {
        if self.remote_description.is_some() {
            return Err(PeerConnectionError::Sdp(
                "remote description already applied".to_string(),
            ));
        }
        let remote: SessionDescription = remote_sdp
            .parse()
            .map_err(|err: crate::protocols::sdp::SdpError| PeerConnectionError::Sdp(err.to_string()))?;

        {
            let mut agent = self.shared.agent()?;
            agent.set_remote_credentials(remote.ice_ufrag.clone(), remote.ice_pwd.clone());
            for candidate in remote.candidates {
                agent.add_remote_candidate(candidate);
            }
        }

        debug!(ufrag = %remote.ice_ufrag, "remote description applied");
        self.remote_description = Some(remote_sdp.to_string());
        Ok(())
    }

    // ========== ICE Connectivity ==========

    /// Feeds a trickled remote candidate line.
    ///
    /// Candidates may arrive before the remote description; they are checked
    /// as soon as the remote credentials are known.
    pub fn add_remote_candidate(&self, line: &str) -> Result<(), PeerConnectionError> {
        self.ensure_open()?;
        let candidate: IceCandidate = line.parse()?;

        let added = self.shared.agent()?.add_remote_candidate(candidate);
        if added {
            self.start_checks()?;
        }
        Ok(())
    }

    fn announce_candidates(&mut self) -> Result<(), PeerConnectionError> {
        if self.candidates_announced {
            return Ok(());
        }
        self.candidates_announced = true;

        let candidates = self.shared.agent()?.local_candidates.clone();
        for candidate in candidates {
            self.shared.emit(ConnectionEvent::LocalCandidate(candidate));
        }
        Ok(())
    }

    fn start_checks(&self) -> Result<(), PeerConnectionError> {
        if self.shared.nominated.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (credentials, pending) = {
            let mut agent = self.shared.agent()?;
            match agent.check_credentials() {
                Some(credentials) => (credentials, agent.take_pending_checks()),
                None => return Ok(()),
            }
        };

        for candidate in pending {
            let shared = Arc::clone(&self.shared);
            let credentials = credentials.clone();
            thread::Builder::new()
                .name(format!("ice-check-{}", candidate.port))
                .spawn(move || {
                    match perform_connectivity_check(&candidate, &credentials, shared.check_timeout) {
                        Ok(reader) => {
                            if let Ok(mut agent) = shared.agent() {
                                agent.mark_check_result(&candidate, true);
                            }
                            debug!(candidate = %candidate, "outbound check succeeded");
                            on_validated(&shared, reader);
                        }
                        Err(err) => {
                            if let Ok(mut agent) = shared.agent() {
                                agent.mark_check_result(&candidate, false);
                            }
                            shared.emit(ConnectionEvent::CheckFailed {
                                candidate,
                                reason: err.to_string(),
                            });
                        }
                    }
                })?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), PeerConnectionError> {
        if self.is_closed() {
            Err(PeerConnectionError::Closed)
        } else {
            Ok(())
        }
    }

    /// Stops the acceptor and discards outstanding checks. Idempotent.
    pub fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                warn!("ICE acceptor thread panicked");
            }
        }
        debug!(local_addr = %self.local_addr, "peer connection closed");
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.closed.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                debug!(%addr, "inbound connectivity check");
                let shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("ice-inbound-{}", addr.port()))
                    .spawn(move || handle_inbound(stream, &shared));
                if let Err(err) = spawned {
                    warn!(error = %err, "could not spawn check handler");
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn handle_inbound(stream: TcpStream, shared: &Shared) {
    let (ufrag, pwd, expected_initiator) = match shared.agent() {
        Ok(agent) => (
            agent.user_fragment().to_string(),
            agent.password().to_string(),
            agent.remote_credentials.as_ref().map(|(ufrag, _)| ufrag.clone()),
        ),
        Err(_) => return,
    };

    match answer_connectivity_check(stream, &ufrag, &pwd, shared.check_timeout) {
        Ok((reader, initiator)) => {
            if let Some(expected) = expected_initiator {
                if expected != initiator {
                    debug!(%initiator, "check from unexpected agent ignored");
                    return;
                }
            }
            on_validated(shared, reader);
        }
        Err(err) => debug!(error = %err, "inbound check rejected"),
    }
}

/// A connection passed its check; nominate it or wait for nomination.
fn on_validated(shared: &Shared, mut reader: BufReader<TcpStream>) {
    if shared.closed.load(Ordering::SeqCst) {
        return;
    }

    if shared.controlling {
        if shared
            .nominated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let nomination = format!("{}\n", NOMINATE);
        if let Err(err) = reader.get_mut().write_all(nomination.as_bytes()) {
            warn!(error = %err, "nomination failed");
            shared.nominated.store(false, Ordering::SeqCst);
            return;
        }
        open_channel(shared, reader);
        return;
    }

    match await_nomination(&mut reader, shared) {
        Ok(true) => {
            if shared
                .nominated
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                open_channel(shared, reader);
            }
        }
        Ok(false) => {}
        Err(err) => debug!(error = %err, "connection dropped before nomination"),
    }
}

fn await_nomination(
    reader: &mut BufReader<TcpStream>,
    shared: &Shared,
) -> Result<bool, PeerConnectionError> {
    reader.get_ref().set_read_timeout(Some(NOMINATION_POLL))?;

    let mut line = Vec::new();
    loop {
        if shared.closed.load(Ordering::SeqCst) || shared.nominated.load(Ordering::SeqCst) {
            return Ok(false);
        }
        match reader
            .by_ref()
            .take(MAX_NOMINATION_LINE as u64)
            .read_until(b'\n', &mut line)
        {
            Ok(0) => return Ok(false),
            Ok(_) if line.last() == Some(&b'\n') => {
                return Ok(String::from_utf8_lossy(&line).trim() == NOMINATE);
            }
            Ok(_) if line.len() >= MAX_NOMINATION_LINE => {
                return Err(PeerConnectionError::Ice("oversized nomination".to_string()));
            }
            Ok(_) => {}
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(err) => return Err(err.into()),
        }
    }
}

fn open_channel(shared: &Shared, reader: BufReader<TcpStream>) {
    match DataChannel::from_reader(reader) {
        Ok(channel) => {
            shared.connected.store(true, Ordering::SeqCst);
            info!(peer = %channel.peer_addr(), "data channel open");
            shared.emit(ConnectionEvent::ChannelOpened(channel));
        }
        Err(err) => warn!(error = %err, "could not open data channel"),
    }
}
