//! bonjou-discovery — LAN peer discovery over UDP broadcast.
//!
//! Each instance broadcasts its identity every few seconds and listens for
//! everyone else's. What it hears ends up in a `PeerRegistry` that the rest
//! of the application queries through `DiscoveryService`.

pub mod broadcast;
pub mod error;
pub mod identity;
pub mod listener;
pub mod netif;
pub mod registry;
pub mod service;

pub use error::{Candidate, DiscoveryError, ResolveError};
pub use identity::LocalIdentity;
pub use netif::{InterfaceSource, InterfaceV4, StaticInterfaces, SystemInterfaces};
pub use registry::{Peer, PeerRegistry, PEER_TTL};
pub use service::{DiscoveryConfig, DiscoveryService, ServiceState};
