//! What this instance announces about itself.
//!
//! Guarded by its own lock so renames and endpoint changes never contend
//! with peer table reads.

use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalIdentity {
    pub username: String,
    /// None until a usable address is known.
    pub ip: Option<Ipv4Addr>,
    /// Transfer port. 0 means unknown.
    pub port: u16,
}

impl LocalIdentity {
    pub fn new(username: impl Into<String>, ip: Ipv4Addr, port: u16) -> Self {
        Self {
            username: username.into(),
            ip: usable(ip),
            port,
        }
    }

    /// Address and port, once both are known. An identity without an
    /// endpoint cannot be announced yet.
    pub fn endpoint(&self) -> Option<(Ipv4Addr, u16)> {
        let ip = self.ip?;
        (self.port != 0).then_some((ip, self.port))
    }

    /// A datagram from `ip` advertising `port` is our own.
    pub fn is_self(&self, ip: Ipv4Addr, port: u16) -> bool {
        self.ip == Some(ip) && self.port == port
    }
}

fn usable(ip: Ipv4Addr) -> Option<Ipv4Addr> {
    (!ip.is_unspecified()).then_some(ip)
}

/// Shared, lock-protected `LocalIdentity`.
#[derive(Debug, Clone, Default)]
pub struct IdentityHandle {
    inner: Arc<RwLock<LocalIdentity>>,
}

impl IdentityHandle {
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            inner: Arc::new(RwLock::new(identity)),
        }
    }

    pub fn snapshot(&self) -> LocalIdentity {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, identity: LocalIdentity) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// The current address and port are still the ones in `seen`.
    pub fn endpoint_unchanged(&self, seen: &LocalIdentity) -> bool {
        let current = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        current.ip == seen.ip && current.port == seen.port
    }

    pub fn set_username(&self, username: impl Into<String>) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .username = username.into();
    }

    /// Apply a partial endpoint update. A missing or unspecified address
    /// and a zero port leave their field alone. Returns false when there
    /// was nothing to apply.
    pub fn update_endpoint(&self, ip: Option<Ipv4Addr>, port: u16) -> bool {
        let ip = ip.and_then(usable);
        if ip.is_none() && port == 0 {
            return false;
        }
        let mut identity = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if ip.is_some() {
            identity.ip = ip;
        }
        if port != 0 {
            identity.port = port;
        }
        true
    }
}
