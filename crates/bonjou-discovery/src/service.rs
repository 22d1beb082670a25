//! The discovery service. Owns the announcer and listener tasks and exposes
//! the peer query API to the rest of the application.
//!
//! Lifecycle: Stopped → Starting → Running → Stopping → Stopped.
//! `start` and `stop` are both idempotent, and a stopped service can be
//! started again.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bonjou_core::BonjouConfig;

use crate::broadcast::{self, AnnounceContext, Announcer};
use crate::error::{DiscoveryError, ResolveError};
use crate::identity::{IdentityHandle, LocalIdentity};
use crate::listener::{self, Listener};
use crate::netif::{InterfaceSource, SystemInterfaces};
use crate::registry::{Peer, PeerRegistry};

/// Settings the discovery service needs from the application config.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port announcements are sent to and received on.
    pub port: u16,
    /// Pairing secret advertised to peers.
    pub secret: String,
}

impl From<&BonjouConfig> for DiscoveryConfig {
    fn from(config: &BonjouConfig) -> Self {
        Self {
            port: config.network.discovery_port,
            secret: config.identity.secret.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct RunningTasks {
    cancel: CancellationToken,
    announcer: JoinHandle<()>,
    listener: JoinHandle<()>,
}

struct Inner {
    config: DiscoveryConfig,
    registry: PeerRegistry,
    identity: IdentityHandle,
    interfaces: Arc<dyn InterfaceSource>,
    state: Mutex<ServiceState>,
    // Held across task joins so concurrent stop() calls all wait for exit.
    tasks: tokio::sync::Mutex<Option<RunningTasks>>,
}

/// LAN peer discovery. Cloning is cheap and every clone drives the same
/// service.
#[derive(Clone)]
pub struct DiscoveryService {
    inner: Arc<Inner>,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_interfaces(config, Arc::new(SystemInterfaces))
    }

    /// Use `interfaces` instead of the host's interface list for broadcast
    /// destinations and subnet checks.
    pub fn with_interfaces(config: DiscoveryConfig, interfaces: Arc<dyn InterfaceSource>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry: PeerRegistry::new(),
                identity: IdentityHandle::default(),
                interfaces,
                state: Mutex::new(ServiceState::Stopped),
                tasks: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServiceState) {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    pub fn local_identity(&self) -> LocalIdentity {
        self.inner.identity.snapshot()
    }

    /// Seed the local identity and launch the announcer and listener.
    ///
    /// A no-op if already running. Fails only if the discovery port cannot
    /// be bound, in which case the service stays stopped.
    pub async fn start(&self, username: &str, ip: Ipv4Addr, port: u16) -> Result<(), DiscoveryError> {
        let mut tasks = self.inner.tasks.lock().await;
        if tasks.is_some() {
            return Ok(());
        }
        self.set_state(ServiceState::Starting);
        self.inner.identity.set(LocalIdentity::new(username, ip, port));

        let socket = match listener::bind_socket(self.inner.config.port) {
            Ok(s) => s,
            Err(e) => {
                self.set_state(ServiceState::Stopped);
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let listener = Listener::new(
            socket,
            self.inner.registry.clone(),
            self.inner.identity.clone(),
            self.inner.interfaces.clone(),
            cancel.clone(),
        );
        let announcer = Announcer::new(self.announce_context(), cancel.clone());

        *tasks = Some(RunningTasks {
            listener: tokio::spawn(listener.run()),
            announcer: tokio::spawn(announcer.run()),
            cancel,
        });
        self.set_state(ServiceState::Running);

        tracing::info!(
            %username,
            %ip,
            port,
            discovery_port = self.inner.config.port,
            "discovery started"
        );
        Ok(())
    }

    /// Signal both tasks and wait for them to exit. Once this returns the
    /// registry is no longer written to. A no-op if not running.
    pub async fn stop(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        let Some(running) = tasks.take() else {
            return;
        };
        self.set_state(ServiceState::Stopping);
        running.cancel.cancel();

        for (task, handle) in [("announcer", running.announcer), ("listener", running.listener)] {
            if let Err(e) = handle.await {
                tracing::warn!(task, error = %e, "discovery task ended abnormally");
            }
        }

        self.set_state(ServiceState::Stopped);
        tracing::info!("discovery stopped");
    }

    /// Rename this instance. Takes effect from the next announcement.
    pub fn update_local_user(&self, username: &str) {
        self.inner.identity.set_username(username);
    }

    /// Record a new local address and/or port.
    ///
    /// `None` / 0 leave the corresponding field unchanged; if both are
    /// absent nothing happens. Otherwise every known peer is forgotten,
    /// since they were observed from the old network, and a fresh
    /// announcement is sent in the background. An announcement the
    /// listener judged against the old endpoint is dropped, even if it was
    /// received before the reset.
    pub fn update_local_endpoint(&self, ip: Option<Ipv4Addr>, port: u16) {
        if !self.inner.identity.update_endpoint(ip, port) {
            return;
        }
        let cleared = self.inner.registry.reset();
        tracing::info!(ip = ?ip, port, cleared, "local endpoint changed, peer table reset");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let service = self.clone();
                handle.spawn(async move { service.force_announce().await });
            }
            Err(_) => tracing::debug!("no runtime, skipping forced announcement"),
        }
    }

    /// Announce right now on a short-lived socket. Does nothing unless the
    /// service is running.
    pub async fn force_announce(&self) {
        if self.state() != ServiceState::Running {
            return;
        }
        match broadcast::announce_once(&self.announce_context()).await {
            Ok(sent) => tracing::debug!(destinations = sent, "forced announcement sent"),
            Err(e) => tracing::warn!(error = %e, "force announce socket"),
        }
    }

    /// Live peers, secrets removed.
    pub fn list_peers(&self) -> Vec<Peer> {
        self.inner.registry.list()
    }

    /// Find a peer by IP address or username.
    pub fn resolve(&self, target: &str) -> Result<Peer, ResolveError> {
        self.inner.registry.resolve(target)
    }

    /// The pairing secret a peer advertised, looked up by IP first.
    pub fn shared_secret(&self, username: &str, ip: Option<Ipv4Addr>) -> Option<String> {
        self.inner.registry.shared_secret(username, ip)
    }

    fn announce_context(&self) -> AnnounceContext {
        AnnounceContext {
            identity: self.inner.identity.clone(),
            secret: self.inner.config.secret.clone(),
            port: self.inner.config.port,
            interfaces: self.inner.interfaces.clone(),
        }
    }
}
