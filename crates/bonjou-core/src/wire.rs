//! Bonjou wire format: the discovery announcement.
//!
//! One announcement per UDP datagram, JSON-encoded, no length prefix.
//! Field names are part of the protocol and must not change:
//! `username`, `ip`, `port`, `ts`, `secret`.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Largest payload a listener will accept.
///
/// Receivers read into a buffer one byte larger than this; a datagram that
/// fills the buffer is treated as truncated and dropped.
pub const MAX_ANNOUNCEMENT_LEN: usize = 1024;

/// Seconds between periodic announcements.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 5;

/// Seconds after which a silent peer is pruned.
pub const PEER_TTL_SECS: u64 = 120;

/// Seconds a listener blocks in receive before re-checking for shutdown.
pub const READ_TIMEOUT_SECS: u64 = 3;

/// A broadcast advertising one instance's identity.
///
/// `ip` is informational. Receivers key peers on the datagram's source
/// address, never on this field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub username: String,
    pub ip: String,
    pub port: u16,
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub secret: String,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("announcement is {0} bytes, limit is {MAX_ANNOUNCEMENT_LEN}")]
    Oversized(usize),
    #[error("announcement truncated at {MAX_ANNOUNCEMENT_LEN} bytes")]
    Truncated,
    #[error("malformed announcement: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("failed to encode announcement: {0}")]
    Encode(#[source] serde_json::Error),
}

impl Announcement {
    /// Build an announcement stamped with the current unix time.
    pub fn new(username: impl Into<String>, ip: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ip: ip.into(),
            port,
            timestamp: unix_now(),
            secret: secret.into(),
        }
    }

    /// Serialize for the wire. Fails rather than emit a datagram receivers
    /// would reject.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let bytes = serde_json::to_vec(self).map_err(WireError::Encode)?;
        if bytes.len() > MAX_ANNOUNCEMENT_LEN {
            return Err(WireError::Oversized(bytes.len()));
        }
        Ok(bytes)
    }

    /// Parse a received datagram.
    ///
    /// Anything longer than `MAX_ANNOUNCEMENT_LEN` is assumed to have been
    /// cut off by the receive buffer and is not parsed.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() > MAX_ANNOUNCEMENT_LEN {
            return Err(WireError::Truncated);
        }
        serde_json::from_slice(data).map_err(WireError::Malformed)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
