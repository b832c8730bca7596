//! ICE agent responsible for gathering candidates and scheduling connectivity checks.

use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info};

use super::candidate::IceCandidate;
use super::connectivity::{sort_pairs_by_priority, CheckCredentials};
use super::gathering::{create_host_candidate, create_srflx_candidate, host_addresses};
use super::pair::{CandidatePair, CandidatePairState};

/// ICE agent that handles candidate gathering and connectivity checks.
pub struct IceAgent {
    pub(crate) controlling: bool,
    pub(crate) user_fragment: String,
    pub(crate) password: String,
    pub local_candidates: Vec<IceCandidate>,
    pub(crate) remote_candidates: Vec<IceCandidate>,
    pub(crate) candidate_pairs: Vec<CandidatePair>,
    pub(crate) remote_credentials: Option<(String, String)>,
}

impl Default for IceAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl IceAgent {
    /// Create a new agent with a random fragment and password.
    pub fn new() -> Self {
        Self {
            controlling: false,
            user_fragment: Self::generate_random_string(8),
            password: Self::generate_random_string(24),
            local_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            candidate_pairs: Vec::new(),
            remote_credentials: None,
        }
    }

    /// Configures whether the agent behaves as a controller or controlled.
    pub fn set_controlling(mut self, is_controlling: bool) -> Self {
        self.controlling = is_controlling;
        self
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling
    }

    /// Register host candidates for the listener bound at `listen`.
    pub fn gather_candidates(&mut self, listen: SocketAddr, include_loopback: bool) {
        for (ip, local_pref) in host_addresses(listen, include_loopback) {
            let address = ip.to_string();
            if self
                .local_candidates
                .iter()
                .any(|c| c.address == address && c.port == listen.port())
            {
                continue;
            }
            let candidate = create_host_candidate(
                self.local_candidates.len() as u32 + 1,
                address,
                listen.port(),
                local_pref,
            );
            debug!(candidate = %candidate, "host candidate gathered");
            self.local_candidates.push(candidate);
        }

        info!(
            "Gathering complete: {} candidates",
            self.local_candidates.len()
        );
    }

    /// Register the public address a STUN server reported for this host.
    ///
    /// The listener port is announced unchanged, so the candidate is only
    /// reachable through a NAT that preserves or forwards it. Returns `false`
    /// when the address is already a local candidate (no NAT in between).
    pub fn add_reflexive_candidate(&mut self, mapped: IpAddr, port: u16) -> bool {
        let address = mapped.to_string();
        if self.local_candidates.iter().any(|c| c.address == address) {
            return false;
        }
        let candidate =
            create_srflx_candidate(self.local_candidates.len() as u32 + 1, address, port);
        info!(candidate = %candidate, "server reflexive candidate gathered");
        self.local_candidates.push(candidate);
        true
    }

    /// Add a remote candidate and generate all possible pairs with the local ones.
    ///
    /// Returns `false` when the transport address was already known.
    pub fn add_remote_candidate(&mut self, candidate: IceCandidate) -> bool {
        if self
            .remote_candidates
            .iter()
            .any(|known| known.same_address(&candidate))
        {
            return false;
        }

        debug!(candidate = %candidate, "adding remote candidate");
        self.remote_candidates.push(candidate.clone());

        for local in &self.local_candidates {
            self.candidate_pairs
                .push(CandidatePair::new(local.clone(), candidate.clone()));
        }
        true
    }

    /// Store the `ufrag` and password announced by the remote description.
    pub fn set_remote_credentials(&mut self, ufrag: String, pwd: String) {
        self.remote_credentials = Some((ufrag, pwd));
    }

    /// Credentials for outbound checks, once the remote description is known.
    pub fn check_credentials(&self) -> Option<CheckCredentials> {
        self.remote_credentials
            .as_ref()
            .map(|(ufrag, pwd)| CheckCredentials {
                local_ufrag: self.user_fragment.clone(),
                remote_ufrag: ufrag.clone(),
                remote_pwd: pwd.clone(),
            })
    }

    /// Remote candidates whose pairs are still waiting, in priority order.
    ///
    /// Nothing is scheduled before the remote credentials are known; the
    /// returned candidates move to `InProgress`.
    pub fn take_pending_checks(&mut self) -> Vec<IceCandidate> {
        if self.remote_credentials.is_none() {
            return Vec::new();
        }

        sort_pairs_by_priority(&mut self.candidate_pairs, self.controlling);

        let mut scheduled: Vec<IceCandidate> = Vec::new();
        for pair in &self.candidate_pairs {
            if pair.is_waiting() && !scheduled.iter().any(|c| pair.targets(c))
            {
                scheduled.push(pair.remote_candidate.clone());
            }
        }

        for pair in &mut self.candidate_pairs {
            if scheduled.iter().any(|c| pair.targets(c)) {
                pair.state = CandidatePairState::InProgress;
            }
        }
        scheduled
    }

    /// Record the outcome of a check against `remote`.
    pub fn mark_check_result(&mut self, remote: &IceCandidate, succeeded: bool) {
        for pair in self.candidate_pairs.iter_mut().filter(|pair| pair.targets(remote)) {
            pair.record_check(succeeded);
        }
    }

    /// Generates pseudo-random identifiers for `ufrag` and password.
    fn generate_random_string(len: usize) -> String {
        use rand::Rng;

        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                             abcdefghijklmnopqrstuvwxyz\
                             0123456789";

        let mut rng = rand::thread_rng();

        (0..len)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }

    /// Access the `ufrag` generated for the ICE session.
    pub fn user_fragment(&self) -> &str {
        &self.user_fragment
    }

    /// Returns the password generated for ICE negotiation.
    pub fn password(&self) -> &str {
        &self.password
    }
}
