//! IP range classification.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Returns `true` if the IPv4 address is loopback, RFC1918, link-local or
/// unspecified.
pub fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()          // 127.0.0.0/8
        || ip.is_private()    // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local() // 169.254.0.0/16
        || ip.is_unspecified()
}

/// Returns `true` if the IPv6 address is loopback, link-local, unique-local,
/// unspecified, or an IPv4-mapped private address.
pub fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xffc0) == 0xfe80 // fe80::/10
        || (first & 0xfe00) == 0xfc00 // fc00::/7
        || ip.to_ipv4_mapped().is_some_and(is_private_ipv4)
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}
