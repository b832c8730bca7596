//! Module that groups the ICE agent and auxiliary structures.
//!
//! Candidates here describe TCP listeners; a connectivity check is a short
//! credential exchange over a fresh TCP connection instead of a STUN binding.

mod agent;
mod candidate;
pub(crate) mod connectivity;
mod gathering;
mod pair;

pub use agent::IceAgent;
pub use candidate::{CandidateType, IceCandidate};
pub use connectivity::{
    answer_connectivity_check, perform_connectivity_check, sort_pairs_by_priority,
    CheckCredentials,
};
pub use gathering::{calculate_priority, create_host_candidate, create_srflx_candidate};
pub use pair::{CandidatePair, CandidatePairState};
