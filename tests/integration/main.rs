//! Bonjou integration test harness.
//!
//! Every test drives a real `DiscoveryService` over loopback UDP. Nothing
//! depends on broadcast delivery: announcements are sent straight to the
//! service's discovery port, and the interface topology is pinned with
//! `StaticInterfaces` so subnet decisions do not depend on the host.
//!
//! Some tests send from 127.0.0.2, which Linux routes over `lo` without
//! extra configuration.

mod discovery;
mod lifecycle;

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use bonjou_core::Announcement;
use bonjou_discovery::{DiscoveryConfig, DiscoveryService, InterfaceV4, Peer, StaticInterfaces};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Transfer port the service under test advertises for itself.
pub const LOCAL_PORT: u16 = 9000;

/// Transfer port the simulated remote peers advertise.
pub const PEER_PORT: u16 = 9001;

/// A UDP port nothing is bound to right now.
pub fn free_udp_port() -> u16 {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.local_addr())
        .map(|a| a.port())
        .expect("failed to find a free UDP port")
}

/// `lo` with the given netmask on 127.0.0.1.
pub fn loopback(netmask: Ipv4Addr) -> Arc<StaticInterfaces> {
    Arc::new(StaticInterfaces(vec![InterfaceV4 {
        name: "lo".to_string(),
        addr: Ipv4Addr::LOCALHOST,
        netmask,
        up: true,
        broadcast: false,
        loopback: true,
    }]))
}

/// Start a service on a fresh discovery port with the local identity
/// 127.0.0.1:LOCAL_PORT. Returns the service and its discovery port.
pub async fn start_service(netmask: Ipv4Addr) -> Result<(DiscoveryService, u16)> {
    let port = free_udp_port();
    let service = DiscoveryService::with_interfaces(
        DiscoveryConfig {
            port,
            secret: "local-secret".to_string(),
        },
        loopback(netmask),
    );
    service
        .start("me", Ipv4Addr::LOCALHOST, LOCAL_PORT)
        .await
        .context("failed to start discovery")?;
    Ok((service, port))
}

/// Send raw bytes to the discovery port from `from`.
pub fn send_raw(from: Ipv4Addr, discovery_port: u16, data: &[u8]) -> Result<()> {
    let socket = UdpSocket::bind(SocketAddrV4::new(from, 0))
        .with_context(|| format!("failed to bind sender on {from}"))?;
    socket
        .send_to(data, SocketAddrV4::new(Ipv4Addr::LOCALHOST, discovery_port))
        .context("send_to failed")?;
    Ok(())
}

/// Send an announcement to the discovery port from `from`.
pub fn announce(
    from: Ipv4Addr,
    discovery_port: u16,
    username: &str,
    claimed_ip: &str,
    port: u16,
    secret: &str,
) -> Result<()> {
    let payload = Announcement::new(username, claimed_ip, port, secret).encode()?;
    send_raw(from, discovery_port, &payload)
}

/// Poll until the service lists at least `count` peers.
pub async fn wait_for_peers(service: &DiscoveryService, count: usize) -> Result<Vec<Peer>> {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let peers = service.list_peers();
        if peers.len() >= count {
            return Ok(peers);
        }
        if Instant::now() >= deadline {
            bail!("expected {count} peers, have {}", peers.len());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Give the listener time to process anything already queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

/// Netmask used by most tests: all of 127/8 is one subnet.
pub const LO_MASK: Ipv4Addr = Ipv4Addr::new(255, 0, 0, 0);

/// Netmask that puts 127.0.0.1 alone in its subnet.
pub const HOST_MASK: Ipv4Addr = Ipv4Addr::BROADCAST;

pub const SECOND_LOOPBACK: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);
