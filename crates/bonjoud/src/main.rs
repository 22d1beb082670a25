//! bonjoud — Bonjou LAN discovery daemon.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use anyhow::{Context, Result};

use bonjou_core::BonjouConfig;
use bonjou_discovery::{DiscoveryConfig, DiscoveryService};

/// How often the local address is re-probed.
const NETWORK_WATCH_INTERVAL: Duration = Duration::from_secs(5);

/// How often the peer table is logged.
const PEER_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BonjouConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = BonjouConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BonjouConfig::default()
    });

    if let Some(username) = std::env::args().nth(1) {
        config.identity.username = username;
    }

    let local_ip = probe_local_ip().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not determine local address, using loopback");
        Ipv4Addr::LOCALHOST
    });
    tracing::info!(
        username = %config.identity.username,
        addr = %local_ip,
        config = %BonjouConfig::file_path().display(),
        "bonjoud starting"
    );

    let discovery = DiscoveryService::new(DiscoveryConfig::from(&config));
    discovery
        .start(&config.identity.username, local_ip, config.network.listen_port)
        .await
        .context("failed to start discovery service")?;
    tracing::info!(
        discovery_port = discovery.config().port,
        listen_port = config.network.listen_port,
        "discovery running"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let network_watcher = {
        let discovery = discovery.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(NETWORK_WATCH_INTERVAL);
            let mut current = local_ip;
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = interval.tick() => {}
                }
                match probe_local_ip() {
                    Ok(ip) if ip != current => {
                        tracing::info!(old = %current, new = %ip, "network change detected");
                        current = ip;
                        discovery.update_local_endpoint(Some(ip), 0);
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!(error = %e, "local address probe failed"),
                }
            }
        })
    };

    let peer_printer = {
        let discovery = discovery.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PEER_SNAPSHOT_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = interval.tick() => {}
                }
                let peers = discovery.list_peers();
                tracing::info!(count = peers.len(), "peer table snapshot");
                for p in &peers {
                    tracing::info!(
                        username = %p.username,
                        peer = %p.ip,
                        port = p.port,
                        seen_secs_ago = p.since_seen().as_secs(),
                        "  peer"
                    );
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    shutdown_rx.recv().await.ok();
    tracing::info!("shutting down");

    for (name, task) in [("network watcher", network_watcher), ("peer printer", peer_printer)] {
        if let Err(e) = task.await {
            tracing::warn!(task = name, error = %e, "task exited abnormally");
        }
    }
    discovery.stop().await;

    Ok(())
}

/// Find the IPv4 address the OS would use for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
fn probe_local_ip() -> Result<Ipv4Addr> {
    let probe = UdpSocket::bind("0.0.0.0:0").context("bind probe socket")?;
    probe
        .connect("8.8.8.8:80")
        .context("no route to an external address")?;
    match probe.local_addr()? {
        SocketAddr::V4(v4) if !v4.ip().is_unspecified() => Ok(*v4.ip()),
        other => anyhow::bail!("unexpected local address {other}"),
    }
}
