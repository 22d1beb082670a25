//! Discovery error taxonomy.
//!
//! `DiscoveryError` is fatal and only produced while starting the service.
//! `ResolveError` is an expected outcome of user input and is returned to
//! the caller, never logged.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(
        "discovery port {port} already in use - another Bonjou instance or application may be running"
    )]
    AddressInUse { port: u16 },
    #[error(
        "permission denied to listen on UDP port {port} - use a port above 1024 or run with elevated privileges"
    )]
    PermissionDenied { port: u16 },
    #[error("discovery listener failed on UDP port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

impl DiscoveryError {
    /// Classify a listener bind failure by its OS error kind.
    pub fn from_bind(port: u16, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::AddrInUse => Self::AddressInUse { port },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { port },
            _ => Self::Bind { port, source: err },
        }
    }
}

/// One peer sharing an ambiguous username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub ip: Ipv4Addr,
    pub since_seen: Duration,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (last seen {}s ago)", self.ip, self.since_seen.as_secs())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("peer not found: {target}")]
    NotFound { target: String },
    #[error(
        "multiple peers named '{username}' found: {}. Use the IP address instead, e.g. {suggestion}",
        join_candidates(.candidates)
    )]
    AmbiguousPeer {
        username: String,
        candidates: Vec<Candidate>,
        suggestion: String,
    },
}

impl ResolveError {
    pub(crate) fn ambiguous(username: &str, candidates: Vec<Candidate>) -> Self {
        let suggestion = match candidates.first() {
            Some(first) => format!("@send {} <message>", first.ip),
            None => String::new(),
        };
        Self::AmbiguousPeer {
            username: username.to_string(),
            candidates,
            suggestion,
        }
    }
}

fn join_candidates(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(Candidate::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
