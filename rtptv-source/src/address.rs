//! Source address identification for stream sharing.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A network endpoint that a live stream is received on.
///
/// When multiple sessions tune to the same address, they share one
/// socket and one ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceAddress {
    addr: SocketAddr,
}

impl SourceAddress {
    /// Create an address from a socket address.
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// The underlying socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Whether the address is a multicast group that must be joined.
    pub fn is_multicast(&self) -> bool {
        self.addr.ip().is_multicast()
    }
}

impl From<SocketAddr> for SourceAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr)
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    #[test]
    fn test_address_equality() {
        let a1 = SourceAddress::new(SocketAddr::new(Ipv4Addr::new(239, 0, 0, 1).into(), 5000));
        let a2: SourceAddress = "239.0.0.1:5000".parse::<SocketAddr>().unwrap().into();
        let a3 = SourceAddress::new(SocketAddr::new(Ipv4Addr::new(239, 0, 0, 1).into(), 5001));

        assert_eq!(a1, a2);
        assert_ne!(a1, a3);
    }

    #[test]
    fn test_address_in_hashmap() {
        let mut map = HashMap::new();
        let key = SourceAddress::new("239.0.0.2:1234".parse().unwrap());
        map.insert(key, 42);

        assert_eq!(map.get(&key), Some(&42));
    }

    #[test]
    fn test_multicast_detection() {
        let group = SourceAddress::new("239.255.0.1:5004".parse().unwrap());
        let unicast = SourceAddress::new("127.0.0.1:5004".parse().unwrap());
        let group_v6 = SourceAddress::new("[ff15::1]:5004".parse().unwrap());

        assert!(group.is_multicast());
        assert!(!unicast.is_multicast());
        assert!(group_v6.is_multicast());
        assert_eq!(group.to_string(), "239.255.0.1:5004");
    }
}
