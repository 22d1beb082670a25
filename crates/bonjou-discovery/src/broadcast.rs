//! Announcement broadcast.
//!
//! Periodically sends this instance's identity to the limited broadcast
//! address and to the directed broadcast of every eligible interface, so
//! peers can find us even if we never hear from them.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time;
use tokio_util::sync::CancellationToken;

use bonjou_core::wire::{Announcement, ANNOUNCE_INTERVAL_SECS};

use crate::identity::{IdentityHandle, LocalIdentity};
use crate::netif::{broadcast_destinations, InterfaceSource};

/// SO_SNDBUF hint for announcement sockets.
const SEND_BUFFER_BYTES: usize = 1024;

/// Everything needed to build and address an announcement.
#[derive(Clone)]
pub struct AnnounceContext {
    pub identity: IdentityHandle,
    pub secret: String,
    pub port: u16,
    pub interfaces: Arc<dyn InterfaceSource>,
}

impl AnnounceContext {
    /// Encode the current identity, or None if it cannot be announced yet.
    pub fn payload(&self) -> Option<Vec<u8>> {
        prepare_announcement(&self.identity.snapshot(), &self.secret)
    }

    pub fn destinations(&self) -> Vec<SocketAddrV4> {
        broadcast_destinations(self.port, self.interfaces.as_ref())
    }
}

/// Encode `identity`. Incomplete identities are skipped without error.
pub fn prepare_announcement(identity: &LocalIdentity, secret: &str) -> Option<Vec<u8>> {
    let (ip, port) = identity.endpoint()?;
    let ann = Announcement::new(&*identity.username, ip.to_string(), port, secret);
    match ann.encode() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode announcement");
            None
        }
    }
}

/// The long-lived announcer task.
pub struct Announcer {
    ctx: AnnounceContext,
    cancel: CancellationToken,
}

impl Announcer {
    pub fn new(ctx: AnnounceContext, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Announce immediately, then every ANNOUNCE_INTERVAL_SECS until cancelled.
    pub async fn run(self) {
        let socket = match make_broadcast_socket() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "discovery announcer failed");
                return;
            }
        };

        let mut interval = time::interval(Duration::from_secs(ANNOUNCE_INTERVAL_SECS));

        tracing::info!(
            port = self.ctx.port,
            interval_secs = ANNOUNCE_INTERVAL_SECS,
            "announcer starting"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("announcer shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let Some(payload) = self.ctx.payload() else {
                        tracing::trace!("identity incomplete, skipping announcement");
                        continue;
                    };
                    let dests = self.ctx.destinations();
                    send_announcement(&socket, &payload, &dests, Some(&self.cancel)).await;
                }
            }
        }
    }
}

/// Send one announcement on a throwaway socket.
///
/// Returns the number of destinations that accepted the datagram.
pub async fn announce_once(ctx: &AnnounceContext) -> std::io::Result<usize> {
    let Some(payload) = ctx.payload() else {
        return Ok(0);
    };
    let socket = make_broadcast_socket()?;
    let dests = ctx.destinations();
    Ok(send_announcement(&socket, &payload, &dests, None).await)
}

/// Send `payload` to each destination. Failures are logged per destination
/// and do not stop the remaining sends. Returns the number sent.
pub async fn send_announcement(
    socket: &UdpSocket,
    payload: &[u8],
    dests: &[SocketAddrV4],
    cancel: Option<&CancellationToken>,
) -> usize {
    let mut sent = 0;
    for dest in dests {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            break;
        }
        match socket.send_to(payload, *dest).await {
            Ok(n) => {
                sent += 1;
                tracing::trace!(bytes = n, dest = %dest, "announcement sent");
            }
            Err(e) => tracing::warn!(error = %e, dest = %dest, "announcement send failed"),
        }
    }
    sent
}

/// Create a UDP socket allowed to send to broadcast addresses.
pub fn make_broadcast_socket() -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_broadcast(true)?;
    if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER_BYTES) {
        tracing::debug!(error = %e, "SO_SNDBUF hint rejected");
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;

    UdpSocket::from_std(socket.into())
}
