//! Tracks instances heard on the LAN.
//!
//! The registry is a map from packet source address to `Peer`, written by
//! the listener and read by everything else. Entries older than `PEER_TTL`
//! are invisible to every query and are pruned when the table is listed.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bonjou_core::wire::PEER_TTL_SECS;

use crate::error::{Candidate, ResolveError};

/// Freshness window for registry entries.
pub const PEER_TTL: Duration = Duration::from_secs(PEER_TTL_SECS);

/// A remote instance observed on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub username: String,
    /// Source address of the last datagram from this peer.
    pub ip: Ipv4Addr,
    /// Port the peer accepts transfers on.
    pub port: u16,
    pub last_seen: Instant,
    /// Pairing secret. Empty in anything handed out by `list` or `resolve`.
    pub secret: String,
}

impl Peer {
    pub fn since_seen(&self) -> Duration {
        self.last_seen.elapsed()
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) < PEER_TTL
    }

    fn redacted(&self) -> Peer {
        Peer {
            secret: String::new(),
            ..self.clone()
        }
    }
}

/// The peer table, shared between the listener and the query API.
///
/// Cloning is cheap and every clone sees the same table.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<Ipv4Addr, Peer>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `peer.ip`. Returns true for a new peer.
    pub fn upsert(&self, peer: Peer) -> bool {
        self.write().insert(peer.ip, peer).is_none()
    }

    /// `upsert`, but only if `still_valid` holds while the table is locked.
    /// Returns None when the peer was dropped. A `reset` issued after
    /// `still_valid` turns false cannot be overtaken by this insert.
    pub fn upsert_if(&self, peer: Peer, still_valid: impl FnOnce() -> bool) -> Option<bool> {
        let mut peers = self.write();
        if !still_valid() {
            return None;
        }
        Some(peers.insert(peer.ip, peer).is_none())
    }

    /// Live peers with secrets stripped. Expired entries are removed.
    pub fn list(&self) -> Vec<Peer> {
        self.list_at(Instant::now())
    }

    /// `list` evaluated as of `now`.
    pub fn list_at(&self, now: Instant) -> Vec<Peer> {
        let mut peers = self.write();
        peers.retain(|_, peer| peer.is_fresh(now));
        peers.values().map(Peer::redacted).collect()
    }

    /// Look a peer up by IP or, failing that, by username.
    pub fn resolve(&self, target: &str) -> Result<Peer, ResolveError> {
        self.resolve_at(target, Instant::now())
    }

    /// `resolve` evaluated as of `now`.
    pub fn resolve_at(&self, target: &str, now: Instant) -> Result<Peer, ResolveError> {
        let peers = self.read();

        if let Ok(ip) = target.parse::<Ipv4Addr>() {
            if let Some(peer) = peers.get(&ip).filter(|p| p.is_fresh(now)) {
                return Ok(peer.redacted());
            }
        }

        let mut matches: Vec<&Peer> = peers
            .values()
            .filter(|p| p.is_fresh(now) && p.username == target)
            .collect();

        match matches.len() {
            0 => Err(ResolveError::NotFound {
                target: target.to_string(),
            }),
            1 => Ok(matches[0].redacted()),
            _ => {
                matches.sort_by_key(|p| p.ip);
                let candidates = matches
                    .iter()
                    .map(|p| Candidate {
                        ip: p.ip,
                        since_seen: now.saturating_duration_since(p.last_seen),
                    })
                    .collect();
                Err(ResolveError::ambiguous(target, candidates))
            }
        }
    }

    /// Pairing secret for a peer. The IP wins over the username; among
    /// several peers sharing a username the most recently seen one answers.
    pub fn shared_secret(&self, username: &str, ip: Option<Ipv4Addr>) -> Option<String> {
        self.shared_secret_at(username, ip, Instant::now())
    }

    /// `shared_secret` evaluated as of `now`.
    pub fn shared_secret_at(&self, username: &str, ip: Option<Ipv4Addr>, now: Instant) -> Option<String> {
        let peers = self.read();

        if let Some(peer) = ip.and_then(|ip| peers.get(&ip)) {
            if peer.is_fresh(now) && !peer.secret.is_empty() {
                return Some(peer.secret.clone());
            }
        }
        if username.is_empty() {
            return None;
        }
        peers
            .values()
            .filter(|p| p.is_fresh(now) && p.username == username && !p.secret.is_empty())
            .max_by_key(|p| p.last_seen)
            .map(|p| p.secret.clone())
    }

    /// Drop every entry. Returns how many were removed.
    pub fn reset(&self) -> usize {
        let mut peers = self.write();
        let removed = peers.len();
        peers.clear();
        removed
    }

    /// Raw table size, including entries not yet pruned.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Ipv4Addr, Peer>> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Ipv4Addr, Peer>> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
