//! Candidate gathering functionality for ICE agent.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use super::candidate::{CandidateType, IceCandidate};

/// Local preference for the primary interface address.
const PRIMARY_LOCAL_PREF: u32 = 65535;
/// Local preference for the loopback address.
const LOOPBACK_LOCAL_PREF: u32 = 1024;

/// Attempt to determine the primary interface by performing a synthetic connection.
///
/// Connecting a UDP socket only selects a route; no packet leaves the host.
pub(crate) fn probe_default_ipv4() -> Option<IpAddr> {
    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), 80);
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(target).ok()?;
    socket
        .local_addr()
        .ok()
        .map(|addr| addr.ip())
        .filter(|ip| !ip.is_unspecified())
}

/// Addresses to announce for a listener bound to `listen`.
///
/// A listener bound to a concrete address only announces that address.
pub(crate) fn host_addresses(listen: SocketAddr, include_loopback: bool) -> Vec<(IpAddr, u32)> {
    if !listen.ip().is_unspecified() {
        return vec![(listen.ip(), PRIMARY_LOCAL_PREF)];
    }

    let mut addresses = Vec::new();
    if let Some(primary) = probe_default_ipv4().filter(|ip| !ip.is_loopback()) {
        addresses.push((primary, PRIMARY_LOCAL_PREF));
    }
    if include_loopback || addresses.is_empty() {
        addresses.push((IpAddr::V4(Ipv4Addr::LOCALHOST), LOOPBACK_LOCAL_PREF));
    }
    addresses
}

/// Calculate a candidate's priority as defined by RFC 8445.
pub fn calculate_priority(candidate_type: &CandidateType, local_pref: u32) -> u32 {
    let type_pref = match candidate_type {
        CandidateType::Host => 126,
        CandidateType::Srflx => 100,
        CandidateType::Relay => 0,
    };

    (1 << 24) * type_pref + (1 << 8) * local_pref + (256 - 1)
}

/// Create a host candidate from the given address.
pub fn create_host_candidate(foundation: u32, address: String, port: u16, local_pref: u32) -> IceCandidate {
    IceCandidate {
        foundation,
        address,
        port,
        candidate_type: CandidateType::Host,
        priority: calculate_priority(&CandidateType::Host, local_pref),
    }
}

/// Create a server reflexive candidate for an address learned through STUN.
pub fn create_srflx_candidate(foundation: u32, address: String, port: u16) -> IceCandidate {
    IceCandidate {
        foundation,
        address,
        port,
        candidate_type: CandidateType::Srflx,
        priority: calculate_priority(&CandidateType::Srflx, PRIMARY_LOCAL_PREF),
    }
}
