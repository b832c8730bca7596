//! Local/remote candidate combinations and their check state.

use super::candidate::IceCandidate;

/// A local candidate matched with a remote one.
#[derive(Debug, Clone)]
pub struct CandidatePair {
    pub local_candidate: IceCandidate,
    pub remote_candidate: IceCandidate,
    pub state: CandidatePairState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidatePairState {
    Waiting,
    InProgress,
    Succeeded,
    Failed,
}

impl CandidatePair {
    pub fn new(local_candidate: IceCandidate, remote_candidate: IceCandidate) -> Self {
        Self {
            local_candidate,
            remote_candidate,
            state: CandidatePairState::Waiting,
        }
    }

    /// Pair priority of RFC 8445 §6.1.2.3, from the point of view of the
    /// controlling (`G`) or controlled (`D`) agent.
    pub fn priority(&self, controlling: bool) -> u64 {
        let local = u64::from(self.local_candidate.priority);
        let remote = u64::from(self.remote_candidate.priority);
        let (g, d) = if controlling { (local, remote) } else { (remote, local) };

        (1u64 << 32) * g.min(d) + 2 * g.max(d) + u64::from(g > d)
    }

    pub fn targets(&self, remote: &IceCandidate) -> bool {
        self.remote_candidate.same_address(remote)
    }

    pub fn is_waiting(&self) -> bool {
        self.state == CandidatePairState::Waiting
    }

    pub fn is_succeeded(&self) -> bool {
        self.state == CandidatePairState::Succeeded
    }

    /// Stores the outcome of a check; a succeeded pair never falls back to failed.
    pub fn record_check(&mut self, succeeded: bool) {
        if self.is_succeeded() {
            return;
        }
        self.state = if succeeded {
            CandidatePairState::Succeeded
        } else {
            CandidatePairState::Failed
        };
    }
}
