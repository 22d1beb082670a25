//! Interface enumeration, broadcast destinations, and subnet matching.
//!
//! Both the announcer and the listener need to know the local IPv4
//! networks. They read them through `InterfaceSource` so the topology can
//! be pinned in tests.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;

/// One IPv4 address configured on a network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceV4 {
    pub name: String,
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub up: bool,
    pub broadcast: bool,
    pub loopback: bool,
}

impl InterfaceV4 {
    /// The network this address belongs to contains `ip`.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        network_contains(self.addr, self.netmask, ip)
    }

    /// Up, broadcast-capable and not loopback.
    fn can_broadcast(&self) -> bool {
        self.up && self.broadcast && !self.loopback
    }
}

pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> io::Result<Vec<InterfaceV4>>;
}

/// Reads the host's interfaces with getifaddrs(3).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> io::Result<Vec<InterfaceV4>> {
        let mut out = Vec::new();
        for ifa in getifaddrs()? {
            let addr = ifa.address.as_ref().and_then(|a| a.as_sockaddr_in());
            let mask = ifa.netmask.as_ref().and_then(|m| m.as_sockaddr_in());
            let (Some(addr), Some(mask)) = (addr, mask) else {
                continue;
            };
            out.push(InterfaceV4 {
                name: ifa.interface_name.clone(),
                addr: addr.ip(),
                netmask: mask.ip(),
                up: ifa.flags.contains(InterfaceFlags::IFF_UP),
                broadcast: ifa.flags.contains(InterfaceFlags::IFF_BROADCAST),
                loopback: ifa.flags.contains(InterfaceFlags::IFF_LOOPBACK),
            });
        }
        Ok(out)
    }
}

/// A fixed interface list.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub Vec<InterfaceV4>);

impl InterfaceSource for StaticInterfaces {
    fn interfaces(&self) -> io::Result<Vec<InterfaceV4>> {
        Ok(self.0.clone())
    }
}

/// Highest address of the network, `ip | !mask`. None for the degenerate
/// all-zero result.
pub fn directed_broadcast(ip: Ipv4Addr, mask: Ipv4Addr) -> Option<Ipv4Addr> {
    let bcast = Ipv4Addr::from(u32::from(ip) | !u32::from(mask));
    (!bcast.is_unspecified()).then_some(bcast)
}

pub fn network_contains(net: Ipv4Addr, mask: Ipv4Addr, ip: Ipv4Addr) -> bool {
    let mask = u32::from(mask);
    u32::from(net) & mask == u32::from(ip) & mask
}

/// Where to send announcements: the limited broadcast address plus the
/// directed broadcast of every eligible interface, deduplicated.
pub fn broadcast_destinations(port: u16, source: &dyn InterfaceSource) -> Vec<SocketAddrV4> {
    let global = SocketAddrV4::new(Ipv4Addr::BROADCAST, port);
    let mut seen = HashSet::from([global]);
    let mut dests = vec![global];

    let interfaces = match source.interfaces() {
        Ok(i) => i,
        Err(e) => {
            tracing::warn!(error = %e, "failed to list interfaces");
            return dests;
        }
    };

    for iface in interfaces.iter().filter(|i| i.can_broadcast()) {
        if iface.addr.is_unspecified() {
            continue;
        }
        let Some(bcast) = directed_broadcast(iface.addr, iface.netmask) else {
            continue;
        };
        let dest = SocketAddrV4::new(bcast, port);
        if seen.insert(dest) {
            dests.push(dest);
        }
    }
    dests
}

/// Decide whether `sender` is on the same subnet as `local`.
///
/// Uses the netmask of the interface that owns `local`. When no such
/// interface can be found the first three octets are compared, which
/// assumes a /24 and is only an approximation.
pub fn same_subnet(sender: Ipv4Addr, local: Ipv4Addr, source: &dyn InterfaceSource) -> bool {
    match source.interfaces() {
        Ok(interfaces) => {
            if let Some(iface) = interfaces.iter().find(|i| i.contains(local)) {
                return iface.contains(sender);
            }
        }
        Err(e) => tracing::debug!(error = %e, "interface lookup failed, using /24 fallback"),
    }
    sender.octets()[..3] == local.octets()[..3]
}
