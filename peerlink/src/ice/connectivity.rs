//! Connectivity checks for ICE agent.
//!
//! A check opens a TCP connection to the remote candidate and proves knowledge
//! of the remote credentials with a single request line:
//!
//! ```text
//! -> CHECK <remote_ufrag>:<local_ufrag> <remote_pwd>
//! <- OK <remote_ufrag>
//! ```

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::candidate::IceCandidate;
use super::pair::CandidatePair;
use crate::rtc::peer_connection_error::PeerConnectionError;

pub(crate) const CHECK_REQUEST: &str = "CHECK";
pub(crate) const CHECK_RESPONSE: &str = "OK";
pub(crate) const NOMINATE: &str = "NOMINATE";

const MAX_CONTROL_LINE: u64 = 512;
const CHECK_ATTEMPTS: u32 = 3;
const CHECK_RETRY_PAUSE: Duration = Duration::from_millis(200);

/// Credentials needed to run checks against a remote agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCredentials {
    pub local_ufrag: String,
    pub remote_ufrag: String,
    pub remote_pwd: String,
}

/// Perform a connectivity check on a single remote candidate.
///
/// Retries up to three times with increasing timeouts. On success the
/// returned reader wraps the validated connection, ready for nomination.
pub fn perform_connectivity_check(
    remote: &IceCandidate,
    credentials: &CheckCredentials,
    timeout: Duration,
) -> Result<BufReader<TcpStream>, PeerConnectionError> {
    let remote_addr = remote.socket_addr()?;
    let mut last_error = PeerConnectionError::Ice(format!("no check sent to {}", remote_addr));

    for attempt in 1..=CHECK_ATTEMPTS {
        match try_check(remote_addr, credentials, timeout * attempt) {
            Ok(reader) => return Ok(reader),
            Err(err) => {
                debug!(%remote_addr, attempt, error = %err, "connectivity check attempt failed");
                last_error = err;
            }
        }
        thread::sleep(CHECK_RETRY_PAUSE);
    }

    Err(last_error)
}

fn try_check(
    remote_addr: SocketAddr,
    credentials: &CheckCredentials,
    timeout: Duration,
) -> Result<BufReader<TcpStream>, PeerConnectionError> {
    let stream = TcpStream::connect_timeout(&remote_addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;

    let mut reader = BufReader::new(stream);
    let request = format!(
        "{} {}:{} {}\n",
        CHECK_REQUEST, credentials.remote_ufrag, credentials.local_ufrag, credentials.remote_pwd
    );
    reader.get_mut().write_all(request.as_bytes())?;

    let response = read_control_line(&mut reader)?;
    match response.split_once(' ') {
        Some((CHECK_RESPONSE, ufrag)) if ufrag == credentials.remote_ufrag => Ok(reader),
        _ => Err(PeerConnectionError::Ice(format!(
            "unexpected check response from {}: {}",
            remote_addr, response
        ))),
    }
}

/// Answer an inbound check against the local credentials.
///
/// Returns the validated connection and the initiator's `ufrag`.
pub fn answer_connectivity_check(
    stream: TcpStream,
    local_ufrag: &str,
    local_pwd: &str,
    timeout: Duration,
) -> Result<(BufReader<TcpStream>, String), PeerConnectionError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;

    let mut reader = BufReader::new(stream);
    let request = read_control_line(&mut reader)?;
    let mut parts = request.split_whitespace();

    let (Some(CHECK_REQUEST), Some(username), Some(pwd)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(PeerConnectionError::Ice(format!("malformed check: {}", request)));
    };
    let Some((target, initiator)) = username.split_once(':') else {
        return Err(PeerConnectionError::Ice(format!("malformed check username: {}", username)));
    };
    if target != local_ufrag || pwd != local_pwd {
        return Err(PeerConnectionError::Ice("check credentials rejected".to_string()));
    }

    let response = format!("{} {}\n", CHECK_RESPONSE, local_ufrag);
    reader.get_mut().write_all(response.as_bytes())?;

    Ok((reader, initiator.to_string()))
}

/// Read one short newline-terminated control line.
pub(crate) fn read_control_line(reader: &mut BufReader<TcpStream>) -> Result<String, PeerConnectionError> {
    let mut buf = Vec::new();
    reader.by_ref().take(MAX_CONTROL_LINE).read_until(b'\n', &mut buf)?;
    if buf.last() != Some(&b'\n') {
        return Err(PeerConnectionError::Ice("truncated control line".to_string()));
    }
    let line = String::from_utf8(buf)
        .map_err(|_| PeerConnectionError::Ice("control line is not UTF-8".to_string()))?;
    Ok(line.trim().to_string())
}

/// Sort candidate pairs by priority in descending order.
pub fn sort_pairs_by_priority(pairs: &mut [CandidatePair], controlling: bool) {
    pairs.sort_by_key(|pair| std::cmp::Reverse(pair.priority(controlling)));
}
