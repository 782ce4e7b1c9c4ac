use core::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Data-link level peer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataLinkAddress {
    Ip(SocketAddr),
}

impl DataLinkAddress {
    pub const BACNET_IP_DEFAULT_PORT: u16 = 0xBAC0;

    pub fn local_broadcast(port: u16) -> Self {
        Self::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port))
    }

    /// Directed broadcast address of the subnet `ip/prefix_len`.
    pub fn subnet_broadcast(ip: Ipv4Addr, prefix_len: u8, port: u16) -> Self {
        let host_bits = if prefix_len >= 32 {
            0
        } else {
            u32::MAX >> u32::from(prefix_len)
        };
        let broadcast = Ipv4Addr::from(u32::from(ip) | host_bits);
        Self::Ip(SocketAddr::new(IpAddr::V4(broadcast), port))
    }

    pub fn bacnet_default(addr: IpAddr) -> Self {
        Self::Ip(SocketAddr::new(addr, Self::BACNET_IP_DEFAULT_PORT))
    }

    pub fn as_socket_addr(self) -> SocketAddr {
        match self {
            Self::Ip(addr) => addr,
        }
    }

    /// The six-octet BACnet/IP MAC (address then port) used as SADR/DADR.
    pub fn to_mac(self) -> [u8; 6] {
        let addr = self.as_socket_addr();
        let mut mac = [0u8; 6];
        if let IpAddr::V4(v4) = addr.ip() {
            mac[..4].copy_from_slice(&v4.octets());
        }
        mac[4..].copy_from_slice(&addr.port().to_be_bytes());
        mac
    }

    /// Inverse of [`to_mac`](Self::to_mac); `None` unless `mac` is six octets.
    pub fn from_mac(mac: &[u8]) -> Option<Self> {
        match mac {
            [a, b, c, d, p0, p1] => Some(Self::Ip(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(*a, *b, *c, *d)),
                u16::from_be_bytes([*p0, *p1]),
            ))),
            _ => None,
        }
    }
}

impl fmt::Display for DataLinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DataLinkAddress;
    use std::net::Ipv4Addr;

    #[test]
    fn subnet_broadcast_sets_host_bits() {
        let addr = DataLinkAddress::subnet_broadcast(Ipv4Addr::new(192, 168, 1, 20), 24, 47808);
        assert_eq!(addr.to_string(), "192.168.1.255:47808");
        let host = DataLinkAddress::subnet_broadcast(Ipv4Addr::new(10, 0, 0, 1), 32, 47808);
        assert_eq!(host.to_string(), "10.0.0.1:47808");
    }

    #[test]
    fn mac_form_carries_ip_and_port() {
        let addr: DataLinkAddress = DataLinkAddress::Ip("10.1.2.3:47809".parse().unwrap());
        let mac = addr.to_mac();
        assert_eq!(mac, [10, 1, 2, 3, 0xBA, 0xC1]);
        assert_eq!(DataLinkAddress::from_mac(&mac), Some(addr));
        assert_eq!(DataLinkAddress::from_mac(&[1, 2]), None);
    }
}
