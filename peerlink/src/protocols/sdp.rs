//! Minimal session descriptions exchanged as offer and answer payloads.
//!
//! Only the lines the direct channel needs are produced:
//!
//! ```text
//! v=0
//! o=- <session-id> <session-id> IN IP4 0.0.0.0
//! s=-
//! t=0 0
//! m=application 9 TCP webrtc-datachannel
//! c=IN IP4 0.0.0.0
//! a=ice-ufrag:<ufrag>
//! a=ice-pwd:<pwd>
//! a=ice-options:trickle
//! ```
//!
//! Candidates normally trickle through signaling, but `a=candidate:` lines
//! embedded in a description are accepted too.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::ice::{IceAgent, IceCandidate};

const VERSION_LINE: &str = "v=0";
const MEDIA_LINE: &str = "m=application 9 TCP webrtc-datachannel";
const ICE_UFRAG: &str = "a=ice-ufrag:";
const ICE_PWD: &str = "a=ice-pwd:";
const CANDIDATE: &str = "a=candidate:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    #[error("description is empty")]
    Empty,
    #[error("unsupported version line: {0}")]
    InvalidVersion(String),
    #[error("malformed origin line: {0}")]
    InvalidOrigin(String),
    #[error("malformed line: {0}")]
    InvalidLine(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),
}

/// Session description carrying the ICE credentials of one side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub session_id: u64,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub candidates: Vec<IceCandidate>,
}

impl SessionDescription {
    /// Builds the local description of `agent` without candidates.
    pub fn from_agent(agent: &IceAgent) -> Self {
        Self {
            session_id: rand::random::<u32>() as u64,
            ice_ufrag: agent.user_fragment().to_string(),
            ice_pwd: agent.password().to_string(),
            candidates: Vec::new(),
        }
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", VERSION_LINE)?;
        writeln!(f, "o=- {0} {0} IN IP4 0.0.0.0", self.session_id)?;
        writeln!(f, "s=-")?;
        writeln!(f, "t=0 0")?;
        writeln!(f, "{}", MEDIA_LINE)?;
        writeln!(f, "c=IN IP4 0.0.0.0")?;
        writeln!(f, "{}{}", ICE_UFRAG, self.ice_ufrag)?;
        writeln!(f, "{}{}", ICE_PWD, self.ice_pwd)?;
        writeln!(f, "a=ice-options:trickle")?;
        for candidate in &self.candidates {
            writeln!(f, "a={}", candidate)?;
        }
        Ok(())
    }
}

impl FromStr for SessionDescription {
    type Err = SdpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty());

        match lines.next() {
            None => return Err(SdpError::Empty),
            Some(VERSION_LINE) => {}
            Some(other) => return Err(SdpError::InvalidVersion(other.to_string())),
        }

        let mut session_id = None;
        let mut ice_ufrag = None;
        let mut ice_pwd = None;
        let mut candidates = Vec::new();

        for line in lines {
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                return Err(SdpError::InvalidLine(line.to_string()));
            }

            if let Some(origin) = line.strip_prefix("o=") {
                let id = origin
                    .split_whitespace()
                    .nth(1)
                    .and_then(|id| id.parse::<u64>().ok())
                    .ok_or_else(|| SdpError::InvalidOrigin(line.to_string()))?;
                session_id = Some(id);
            } else if let Some(ufrag) = line.strip_prefix(ICE_UFRAG) {
                ice_ufrag = Some(ufrag.trim().to_string());
            } else if let Some(pwd) = line.strip_prefix(ICE_PWD) {
                ice_pwd = Some(pwd.trim().to_string());
            } else if line.starts_with(CANDIDATE) {
                let candidate = line
                    .parse::<IceCandidate>()
                    .map_err(|err| SdpError::InvalidCandidate(err.to_string()))?;
                candidates.push(candidate);
            }
        }

        let ice_ufrag = ice_ufrag
            .filter(|ufrag| !ufrag.is_empty())
            .ok_or(SdpError::Missing("ice-ufrag"))?;
        let ice_pwd = ice_pwd
            .filter(|pwd| !pwd.is_empty())
            .ok_or(SdpError::Missing("ice-pwd"))?;

        Ok(Self {
            session_id: session_id.ok_or(SdpError::Missing("origin"))?,
            ice_ufrag,
            ice_pwd,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_from_agent_parses_back() {
        let agent = IceAgent::new();
        let description = SessionDescription::from_agent(&agent);

        let text = description.to_string();
        assert!(text.starts_with("v=0\n"));
        assert!(text.contains("a=ice-options:trickle"));

        let parsed: SessionDescription = text.parse().unwrap();
        assert_eq!(parsed.ice_ufrag, agent.user_fragment());
        assert_eq!(parsed.ice_pwd, agent.password());
        assert!(parsed.candidates.is_empty());
    }

    #[test]
    fn test_embedded_candidates_are_read() {
        let sdp = "v=0\r\no=- 7 7 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
                   a=ice-ufrag:abcd\r\na=ice-pwd:efgh\r\n\
                   a=candidate:1 1 TCP 2130706431 192.168.1.4 5000 typ host\r\n";

        let parsed: SessionDescription = sdp.parse().unwrap();
        assert_eq!(parsed.session_id, 7);
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.candidates[0].port, 5000);
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let sdp = "v=0\no=- 1 1 IN IP4 0.0.0.0\ns=-\nt=0 0\na=ice-ufrag:abcd\n";
        assert_eq!(
            sdp.parse::<SessionDescription>(),
            Err(SdpError::Missing("ice-pwd"))
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!("".parse::<SessionDescription>(), Err(SdpError::Empty));
        assert!(matches!(
            "hello".parse::<SessionDescription>(),
            Err(SdpError::InvalidVersion(_))
        ));
        assert!(matches!(
            "v=0\nnot a line\n".parse::<SessionDescription>(),
            Err(SdpError::InvalidLine(_))
        ));
    }
}
