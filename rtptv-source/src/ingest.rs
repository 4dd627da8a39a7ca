//! Datagram sources feeding the ingestion loop.
//!
//! [`Connector`] is the seam between the registry and the network: the
//! registry asks it for a [`PacketSource`] whenever a stream starts.
//! [`UdpConnector`] is the production implementation.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use log::{debug, info, warn};

use crate::address::SourceAddress;
use crate::config::StreamConfig;

/// A blocking source of datagrams.
pub trait PacketSource: Send {
    /// Receive one datagram into `buf`.
    ///
    /// Returns `Ok(None)` when the receive timed out without data, so the
    /// caller can check for a stop request. Any error ends ingestion.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// Opens packet sources for source addresses.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        address: &SourceAddress,
        config: &StreamConfig,
    ) -> io::Result<Box<dyn PacketSource>>;
}

/// Opens UDP sockets, joining multicast groups where needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpConnector;

impl Connector for UdpConnector {
    fn connect(
        &self,
        address: &SourceAddress,
        config: &StreamConfig,
    ) -> io::Result<Box<dyn PacketSource>> {
        let source = UdpPacketSource::open(address, config.recv_timeout)?;
        Ok(Box::new(source))
    }
}

/// A UDP socket receiving one unicast or multicast stream.
pub struct UdpPacketSource {
    socket: UdpSocket,
    address: SourceAddress,
}

impl UdpPacketSource {
    /// Bind a socket for `address`.
    ///
    /// Multicast groups are joined on the default interface. On unix the
    /// socket is bound to the group address itself, so several groups can
    /// share one port and each socket only sees its own group's datagrams.
    /// Unicast addresses are bound directly.
    pub fn open(address: &SourceAddress, recv_timeout: Duration) -> io::Result<Self> {
        let socket = if address.is_multicast() {
            let socket = UdpSocket::bind(multicast_bind_addr(address))?;
            match address.ip() {
                IpAddr::V4(group) => socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?,
                IpAddr::V6(group) => socket.join_multicast_v6(&group, 0)?,
            }
            info!("[UdpPacketSource] Joined multicast group {}", address);
            socket
        } else {
            UdpSocket::bind(address.socket_addr())?
        };

        socket.set_read_timeout(Some(recv_timeout))?;
        debug!(
            "[UdpPacketSource] Bound {} (local {:?})",
            address,
            socket.local_addr()
        );

        Ok(Self {
            socket,
            address: *address,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl PacketSource for UdpPacketSource {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for UdpPacketSource {
    fn drop(&mut self) {
        let result = match self.address.ip() {
            _ if !self.address.is_multicast() => Ok(()),
            IpAddr::V4(group) => self.socket.leave_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(group) => self.socket.leave_multicast_v6(&group, 0),
        };
        if let Err(e) = result {
            warn!("[UdpPacketSource] Failed to leave group {}: {}", self.address, e);
        }
        debug!("[UdpPacketSource] Socket closed for {}", self.address);
    }
}

/// Local address a multicast socket binds to.
#[cfg(unix)]
fn multicast_bind_addr(address: &SourceAddress) -> SocketAddr {
    address.socket_addr()
}

/// Local address a multicast socket binds to. Windows refuses binds to a
/// group address, so the wildcard address on the group's port is used.
#[cfg(not(unix))]
fn multicast_bind_addr(address: &SourceAddress) -> SocketAddr {
    use std::net::Ipv6Addr;

    let ip = match address.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, address.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_source_receives_and_times_out() {
        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = SourceAddress::new(probe.local_addr().unwrap());
        drop(probe);

        let mut source = UdpPacketSource::open(&address, Duration::from_millis(20)).unwrap();
        let mut buf = [0u8; 2048];

        // Nothing sent yet: the receive times out instead of failing.
        assert!(matches!(source.recv(&mut buf), Ok(None)));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[7u8; 100], address.socket_addr()).unwrap();

        let mut received = None;
        for _ in 0..50 {
            if let Some(n) = source.recv(&mut buf).unwrap() {
                received = Some(n);
                break;
            }
        }
        assert_eq!(received, Some(100));
        assert_eq!(&buf[..100], &[7u8; 100][..]);
    }

    fn free_port() -> u16 {
        let probe = UdpSocket::bind("0.0.0.0:0").unwrap();
        probe.local_addr().unwrap().port()
    }

    fn recv_one(source: &mut UdpPacketSource, buf: &mut [u8]) -> Option<usize> {
        for _ in 0..50 {
            if let Some(n) = source.recv(buf).unwrap() {
                return Some(n);
            }
        }
        None
    }

    #[test]
    fn test_multicast_groups_share_a_port() {
        let port = free_port();
        let group_a = SourceAddress::new(SocketAddr::new([239, 10, 0, 1].into(), port));
        let group_b = SourceAddress::new(SocketAddr::new([239, 10, 0, 2].into(), port));
        let timeout = Duration::from_millis(20);

        let mut source_a = UdpPacketSource::open(&group_a, timeout).unwrap();
        let mut source_b = UdpPacketSource::open(&group_b, timeout).unwrap();
        assert_ne!(source_a.local_addr().unwrap(), source_b.local_addr().unwrap());

        let sender = UdpSocket::bind("0.0.0.0:0").unwrap();
        sender.set_multicast_loop_v4(true).unwrap();
        sender.send_to(&[0xA1; 64], group_a.socket_addr()).unwrap();
        sender.send_to(&[0xB2; 32], group_b.socket_addr()).unwrap();

        let mut buf = [0u8; 2048];
        assert_eq!(recv_one(&mut source_a, &mut buf), Some(64));
        assert_eq!(&buf[..64], &[0xA1; 64][..]);
        assert!(matches!(source_a.recv(&mut buf), Ok(None)));

        assert_eq!(recv_one(&mut source_b, &mut buf), Some(32));
        assert_eq!(&buf[..32], &[0xB2; 32][..]);
        assert!(matches!(source_b.recv(&mut buf), Ok(None)));

        // Dropping leaves the group and frees the address for a new stream.
        drop(source_a);
        let mut reopened = UdpPacketSource::open(&group_a, timeout).unwrap();
        sender.send_to(&[0xC3; 16], group_a.socket_addr()).unwrap();
        assert_eq!(recv_one(&mut reopened, &mut buf), Some(16));
        assert!(matches!(source_b.recv(&mut buf), Ok(None)));
    }

    #[test]
    fn test_unicast_sources_are_separate() {
        let timeout = Duration::from_millis(20);
        let first = SourceAddress::new(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), free_port()));
        let mut source_1 = UdpPacketSource::open(&first, timeout).unwrap();
        let second = SourceAddress::new(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), free_port()));
        let mut source_2 = UdpPacketSource::open(&second, timeout).unwrap();
        assert_ne!(first, second);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[1u8; 10], first.socket_addr()).unwrap();

        let mut buf = [0u8; 2048];
        assert_eq!(recv_one(&mut source_1, &mut buf), Some(10));
        assert!(matches!(source_2.recv(&mut buf), Ok(None)));
    }

    #[test]
    fn test_connector_reports_bind_failure() {
        let holder = UdpSocket::bind("127.0.0.1:0").unwrap();
        let address = SourceAddress::new(holder.local_addr().unwrap());

        let result = UdpConnector.connect(&address, &StreamConfig::default());
        assert!(result.is_err());
    }
}
