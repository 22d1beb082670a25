//! Announcement listener.
//!
//! Binds the discovery port and turns valid announcements into registry
//! entries. This is the only writer of the peer table apart from an
//! explicit reset.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time;
use tokio_util::sync::CancellationToken;

use bonjou_core::wire::{Announcement, WireError, MAX_ANNOUNCEMENT_LEN, READ_TIMEOUT_SECS};

use crate::error::DiscoveryError;
use crate::identity::{IdentityHandle, LocalIdentity};
use crate::netif::{same_subnet, InterfaceSource};
use crate::registry::{Peer, PeerRegistry};

/// What the listener decided about one datagram.
#[derive(Debug)]
pub enum Verdict {
    Accepted(Peer),
    Malformed(WireError),
    /// Our own broadcast looped back.
    OwnAnnouncement,
    OffSubnet(Ipv4Addr),
    NotIpv4(SocketAddr),
}

/// Validate and filter one received datagram.
///
/// The resulting peer is keyed on the datagram's source address; the `ip`
/// field inside the payload is ignored.
pub fn evaluate(
    data: &[u8],
    source: SocketAddr,
    local: &LocalIdentity,
    interfaces: &dyn InterfaceSource,
) -> Verdict {
    let sender = match source {
        SocketAddr::V4(v4) => *v4.ip(),
        SocketAddr::V6(_) => return Verdict::NotIpv4(source),
    };

    let ann = match Announcement::decode(data) {
        Ok(a) => a,
        Err(e) => return Verdict::Malformed(e),
    };

    if local.is_self(sender, ann.port) {
        return Verdict::OwnAnnouncement;
    }

    let on_subnet = local
        .ip
        .is_some_and(|local_ip| same_subnet(sender, local_ip, interfaces));
    if !on_subnet {
        return Verdict::OffSubnet(sender);
    }

    Verdict::Accepted(Peer {
        username: ann.username,
        ip: sender,
        port: ann.port,
        last_seen: Instant::now(),
        secret: ann.secret,
    })
}

/// Bind the discovery port. Failures are classified so the operator can
/// tell a port conflict from a privilege problem.
pub fn bind_socket(port: u16) -> Result<UdpSocket, DiscoveryError> {
    let result = make_listener_socket(port).and_then(UdpSocket::from_std);
    result.map_err(|e| {
        let err = DiscoveryError::from_bind(port, e);
        tracing::error!(error = %err, "discovery listener failed");
        err
    })
}

fn make_listener_socket(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    Ok(socket.into())
}

pub struct Listener {
    socket: UdpSocket,
    registry: PeerRegistry,
    identity: IdentityHandle,
    interfaces: Arc<dyn InterfaceSource>,
    cancel: CancellationToken,
}

impl Listener {
    pub fn new(
        socket: UdpSocket,
        registry: PeerRegistry,
        identity: IdentityHandle,
        interfaces: Arc<dyn InterfaceSource>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket,
            registry,
            identity,
            interfaces,
            cancel,
        }
    }

    /// Receive announcements until cancelled.
    ///
    /// Each receive is bounded by READ_TIMEOUT_SECS; a timeout only means
    /// the stop condition is checked again.
    pub async fn run(self) {
        let read_timeout = Duration::from_secs(READ_TIMEOUT_SECS);
        // One spare byte so oversized datagrams are detectable.
        let mut buf = vec![0u8; MAX_ANNOUNCEMENT_LEN + 1];

        tracing::info!(
            addr = ?self.socket.local_addr().ok(),
            "discovery listener starting"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                r = time::timeout(read_timeout, self.socket.recv_from(&mut buf)) => r,
            };
            let (len, source) = match received {
                Err(_elapsed) => continue,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "discovery read error");
                    continue;
                }
                Ok(Ok(r)) => r,
            };
            self.handle_datagram(&buf[..len], source);
        }

        tracing::info!("discovery listener shutting down");
    }

    fn handle_datagram(&self, data: &[u8], source: SocketAddr) {
        let local = self.identity.snapshot();
        self.process(data, source, &local);
    }

    /// Apply one datagram judged against the `local` snapshot. The peer is
    /// only stored if our endpoint has not moved since the snapshot.
    fn process(&self, data: &[u8], source: SocketAddr, local: &LocalIdentity) {
        match evaluate(data, source, local, self.interfaces.as_ref()) {
            Verdict::Accepted(peer) => {
                let (username, ip, port) = (peer.username.clone(), peer.ip, peer.port);
                match self
                    .registry
                    .upsert_if(peer, || self.identity.endpoint_unchanged(local))
                {
                    Some(true) => tracing::debug!(%username, peer = %ip, port, "peer discovered"),
                    Some(false) => tracing::trace!(%username, peer = %ip, port, "peer refreshed"),
                    None => tracing::debug!(peer = %ip, "local endpoint changed, dropping announcement"),
                }
            }
            Verdict::Malformed(e) => {
                tracing::warn!(error = %e, from = %source, "invalid announcement");
            }
            Verdict::OwnAnnouncement => tracing::trace!("ignoring own announcement"),
            Verdict::OffSubnet(ip) => {
                tracing::debug!(peer = %ip, "ignoring announcement from another subnet");
            }
            Verdict::NotIpv4(addr) => {
                tracing::warn!(from = %addr, "received IPv6 datagram on IPv4 socket, ignoring");
            }
        }
    }
}
