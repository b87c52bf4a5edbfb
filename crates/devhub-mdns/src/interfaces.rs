//! Local address enumeration

use std::net::{IpAddr, Ipv4Addr};

/// IPv4 addresses of this host worth advertising
///
/// Loopback, link-local (169.254/16) and unspecified addresses are skipped.
/// Enumeration failure yields an empty list: the device can still discover
/// peers, it just announces no address.
pub fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    let interfaces = match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            tracing::warn!("Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    let mut addrs = Vec::new();
    for iface in interfaces {
        let IpAddr::V4(ip) = iface.ip() else {
            continue;
        };
        if is_advertisable(ip) && !addrs.contains(&ip) {
            tracing::trace!("Advertising {} ({})", ip, iface.name);
            addrs.push(ip);
        }
    }
    addrs
}

fn is_advertisable(ip: Ipv4Addr) -> bool {
    !ip.is_loopback() && !ip.is_link_local() && !ip.is_unspecified()
}
