//! Validation of peer identifiers announced by `register`.

use crate::client::peer_id::{MAX_PEER_ID_LEN, MIN_PEER_ID_LEN};

use super::error::RelayError;

/// Identifiers are ASCII alphanumeric and between the accepted lengths.
pub fn validate_peer_id(peer_id: &str) -> Result<(), RelayError> {
    if peer_id.len() < MIN_PEER_ID_LEN {
        return Err(RelayError::InvalidPeerId(format!(
            "too short (min {})",
            MIN_PEER_ID_LEN
        )));
    }
    if peer_id.len() > MAX_PEER_ID_LEN {
        return Err(RelayError::InvalidPeerId(format!(
            "too long (max {})",
            MAX_PEER_ID_LEN
        )));
    }
    if !peer_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RelayError::InvalidPeerId(
            "only letters and digits are allowed".to_string(),
        ));
    }
    Ok(())
}
