//! Local address discovery for a named interface

use crate::error::PortalError;
use pnet::datalink::{self, NetworkInterface};
use std::net::{IpAddr, Ipv4Addr};

/// Usable IPv4 addresses configured on `interface`. Order is not meaningful.
pub fn resolve(interface: &str) -> Result<Vec<Ipv4Addr>, PortalError> {
    let nic = datalink::interfaces()
        .into_iter()
        .find(|iface: &NetworkInterface| iface.name == interface)
        .ok_or_else(|| PortalError::InterfaceNotFound(interface.to_string()))?;

    let addrs = usable_addresses(nic.ips.iter().map(|net| net.ip()));
    if addrs.is_empty() {
        return Err(PortalError::NoUsableAddress(interface.to_string()));
    }

    tracing::debug!(
        "Interface {} has {} usable address(es): {:?}",
        interface,
        addrs.len(),
        addrs
    );
    Ok(addrs)
}

/// Drops link-local unicast/multicast and anything that is not IPv4; the
/// portal protocol is IPv4-only.
pub fn usable_addresses(ips: impl IntoIterator<Item = IpAddr>) -> Vec<Ipv4Addr> {
    let mut out: Vec<Ipv4Addr> = Vec::new();
    for ip in ips {
        let IpAddr::V4(v4) = ip else { continue };
        if v4.is_link_local() || is_link_local_multicast(v4) || v4.is_unspecified() {
            continue;
        }
        if !out.contains(&v4) {
            out.push(v4);
        }
    }
    out
}

// 224.0.0.0/24
fn is_link_local_multicast(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    a == 224 && b == 0 && c == 0
}
