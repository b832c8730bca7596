//! Per-session peer identifiers and the share link built from them.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use super::error::SessionError;

pub const PEER_ID_LEN: usize = 16;
pub const MIN_PEER_ID_LEN: usize = 11;
pub const MAX_PEER_ID_LEN: usize = 64;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                         abcdefghijklmnopqrstuvwxyz\
                         0123456789";

/// Random identifier a peer registers under for one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentifier(String);

impl PeerIdentifier {
    /// Fresh identifier; never reused across sessions.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..PEER_ID_LEN)
            .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn parse(value: &str) -> Result<Self, SessionError> {
        let value = value.trim();
        if value.len() < MIN_PEER_ID_LEN || value.len() > MAX_PEER_ID_LEN {
            return Err(SessionError::InvalidLink(format!(
                "peer identifier must have {} to {} characters",
                MIN_PEER_ID_LEN, MAX_PEER_ID_LEN
            )));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SessionError::InvalidLink(
                "peer identifier must be alphanumeric".to_string(),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Link handed to the receiver out of band.
    pub fn share_link(&self, link_base: &str) -> String {
        format!("{}{}", link_base, self.0)
    }
}

impl fmt::Display for PeerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PeerIdentifier {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Extracts the sender's identifier from whatever the user pasted.
///
/// Accepts a full share link, a URL carrying `?peer=<id>`, or the bare id.
pub fn parse_shared_identifier(shared: &str) -> Result<PeerIdentifier, SessionError> {
    let shared = shared.trim();
    if shared.is_empty() {
        return Err(SessionError::InvalidLink("empty link".to_string()));
    }

    if let Some((_, query)) = shared.split_once('?') {
        let query = query.split('#').next().unwrap_or_default();
        for pair in query.split('&') {
            if let Some(("peer", value)) = pair.split_once('=') {
                return PeerIdentifier::parse(value);
            }
        }
    }

    let path = shared.split(['?', '#']).next().unwrap_or_default();
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    PeerIdentifier::parse(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_LINK_BASE;

    #[test]
    fn test_generate_shape() {
        let id = PeerIdentifier::generate();
        assert_eq!(id.as_str().len(), PEER_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, PeerIdentifier::generate());
    }

    #[test]
    fn test_share_link_roundtrip() {
        let id = PeerIdentifier::generate();
        let link = id.share_link(DEFAULT_LINK_BASE);
        assert!(link.starts_with("peerdrop://receive/"));
        assert_eq!(parse_shared_identifier(&link).unwrap(), id);
    }

    #[test]
    fn test_parse_query_and_bare_forms() {
        let expected = PeerIdentifier::parse("AbCdEfGh12345678").unwrap();

        assert_eq!(
            parse_shared_identifier("https://drop.example/receive?peer=AbCdEfGh12345678&x=1").unwrap(),
            expected
        );
        assert_eq!(parse_shared_identifier("  AbCdEfGh12345678 ").unwrap(), expected);
        assert_eq!(
            parse_shared_identifier("https://drop.example/r/AbCdEfGh12345678/").unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_shared_identifier("").is_err());
        assert!(parse_shared_identifier("peerdrop://receive/").is_err());
        assert!(parse_shared_identifier("https://x/?peer=bad-id!").is_err());
        assert!(PeerIdentifier::parse("tooShort").is_err());
    }
}
