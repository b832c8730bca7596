//! Representations of local or remote ICE candidates.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::rtc::peer_connection_error::PeerConnectionError;

/// ICE candidate with its basic properties and priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub foundation: u32,
    pub address: String,
    pub port: u16,
    pub candidate_type: CandidateType,
    pub priority: u32,
}

/// Types of candidates available during ICE negotiations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateType {
    Host,
    Srflx,
    Relay,
}

impl CandidateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateType::Host => "host",
            CandidateType::Srflx => "srflx",
            CandidateType::Relay => "relay",
        }
    }
}

impl FromStr for CandidateType {
    type Err = PeerConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(CandidateType::Host),
            "srflx" => Ok(CandidateType::Srflx),
            "relay" => Ok(CandidateType::Relay),
            other => Err(PeerConnectionError::Ice(format!(
                "unknown candidate type '{}'",
                other
            ))),
        }
    }
}

impl IceCandidate {
    /// Socket address the remote side should connect to.
    pub fn socket_addr(&self) -> Result<SocketAddr, PeerConnectionError> {
        let ip = IpAddr::from_str(&self.address).map_err(|err| {
            PeerConnectionError::Ice(format!("invalid address {}: {}", self.address, err))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Same transport address, regardless of priority or foundation.
    pub fn same_address(&self, other: &IceCandidate) -> bool {
        self.address == other.address && self.port == other.port
    }
}

/// Serializes as an SDP candidate attribute value:
/// `candidate:<foundation> 1 TCP <priority> <address> <port> typ <type>`.
impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} 1 TCP {} {} {} typ {}",
            self.foundation,
            self.priority,
            self.address,
            self.port,
            self.candidate_type.as_str()
        )
    }
}

impl FromStr for IceCandidate {
    type Err = PeerConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let line = line.strip_prefix("a=").unwrap_or(line);
        let body = line
            .strip_prefix("candidate:")
            .ok_or_else(|| PeerConnectionError::Ice(format!("not a candidate line: {}", s)))?;

        let parts: Vec<&str> = body.split_whitespace().collect();
        if parts.len() < 8 || parts[6] != "typ" {
            return Err(PeerConnectionError::Ice(format!(
                "malformed candidate line: {}",
                s
            )));
        }
        if !parts[2].eq_ignore_ascii_case("tcp") {
            return Err(PeerConnectionError::Ice(format!(
                "unsupported candidate transport '{}'",
                parts[2]
            )));
        }

        let invalid = |field: &str| PeerConnectionError::Ice(format!("invalid {} in: {}", field, s));

        let foundation = parts[0].parse().map_err(|_| invalid("foundation"))?;
        let priority = parts[3].parse().map_err(|_| invalid("priority"))?;
        let address = parts[4];
        IpAddr::from_str(address).map_err(|_| invalid("address"))?;
        let port = parts[5].parse().map_err(|_| invalid("port"))?;
        let candidate_type = parts[7].parse()?;

        Ok(IceCandidate {
            foundation,
            address: address.to_string(),
            port,
            candidate_type,
            priority,
        })
    }
}
