//! Address-to-route encoding for discovered peers
//!
//! A peer `ip:port` is exposed under `/<ip>/<port>`. Decoding accepts only
//! the exact text `encode` produces, so the pair is a bijection: every
//! address has one path and every accepted path has one address.

use std::net::{Ipv4Addr, SocketAddrV4};

/// Path codec for peer proxy routes
pub struct PeerPath;

impl PeerPath {
    /// Route base for `addr`, e.g. `/10.0.0.5/4000`
    pub fn encode(addr: SocketAddrV4) -> String {
        format!("/{}/{}", addr.ip(), addr.port())
    }

    /// Recover the peer address and the remaining path from a request path
    ///
    /// Returns `None` unless the first two segments are a canonical IPv4
    /// address and a canonical port. The remainder is empty or starts with `/`.
    pub fn decode(path: &str) -> Option<(SocketAddrV4, &str)> {
        let path = path.strip_prefix('/')?;
        let (ip_segment, after_ip) = path.split_once('/')?;
        let (port_segment, rest) = match after_ip.find('/') {
            Some(i) => after_ip.split_at(i),
            None => (after_ip, ""),
        };

        let ip: Ipv4Addr = ip_segment.parse().ok()?;
        let port: u16 = port_segment.parse().ok()?;

        // Reject aliases such as `+80` or `010` so decode inverts encode exactly
        if ip.to_string() != ip_segment || port.to_string() != port_segment {
            return None;
        }

        Some((SocketAddrV4::new(ip, port), rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(a: [u8; 4], port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::from(a), port)
    }

    #[test]
    fn test_encode() {
        assert_eq!(PeerPath::encode(addr([10, 0, 0, 5], 4000)), "/10.0.0.5/4000");
    }

    #[test]
    fn test_decode_with_remainder() {
        let (peer, rest) = PeerPath::decode("/10.0.0.5/4000/api/v2/query").unwrap();
        assert_eq!(peer, addr([10, 0, 0, 5], 4000));
        assert_eq!(rest, "/api/v2/query");

        let (peer, rest) = PeerPath::decode("/10.0.0.5/4000").unwrap();
        assert_eq!(peer, addr([10, 0, 0, 5], 4000));
        assert_eq!(rest, "");
    }

    #[test]
    fn test_remainder_may_contain_separators() {
        let (peer, rest) = PeerPath::decode("/192.168.1.2/80/a:b/c.d/10.0.0.1/99").unwrap();
        assert_eq!(peer, addr([192, 168, 1, 2], 80));
        assert_eq!(rest, "/a:b/c.d/10.0.0.1/99");
    }

    #[test]
    fn test_non_canonical_paths_rejected() {
        for path in [
            "",
            "/",
            "/10.0.0.5",
            "/10.0.0.5/",
            "/10.0.0.5/+4000",
            "/10.0.0.5/04000",
            "/10.0.0.5/65536",
            "/10.0.0.256/80",
            "/10.0.0.05/80",
            "/influx/target",
            "10.0.0.5/4000",
        ] {
            assert!(PeerPath::decode(path).is_none(), "{:?} should not decode", path);
        }
    }

    #[test]
    fn test_encode_decode_inverse() {
        for peer in [addr([0, 0, 0, 0], 0), addr([255, 255, 255, 255], 65535), addr([127, 0, 0, 1], 8086)] {
            let path = PeerPath::encode(peer);
            assert_eq!(PeerPath::decode(&path), Some((peer, "")));
        }
    }
}
