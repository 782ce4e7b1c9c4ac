//! Peer addresses in the notation operators type: `a.b.c.d[:port]`,
//! `net:mac` for a device behind a router, and `net:*` for a directed
//! broadcast on a remote network.

use crate::ClientError;
use bacscope_core::npdu::NpduAddress;
use bacscope_datalink::DataLinkAddress;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// Device reachable directly on the local BACnet/IP network.
    Ip(SocketAddr),
    /// Device on network `network`, reached through a router.
    Remote { network: u16, mac: Vec<u8> },
    /// Every device on a remote network.
    RemoteBroadcast(u16),
}

impl Address {
    pub fn ip(addr: Ipv4Addr, port: u16) -> Self {
        Self::Ip(SocketAddr::new(IpAddr::V4(addr), port))
    }

    pub fn network(&self) -> Option<u16> {
        match self {
            Self::Ip(_) => None,
            Self::Remote { network, .. } | Self::RemoteBroadcast(network) => Some(*network),
        }
    }

    /// NPDU destination for routed addresses.
    pub fn npdu_destination(&self) -> Option<NpduAddress> {
        match self {
            Self::Ip(_) => None,
            Self::Remote { network, mac } => Some(NpduAddress::new(*network, mac)),
            Self::RemoteBroadcast(network) => Some(NpduAddress::broadcast(*network)),
        }
    }

    /// Address a reply came from: the routed source when the NPDU carries
    /// one, otherwise the data-link sender.
    pub fn from_source(datalink: DataLinkAddress, source: Option<NpduAddress>) -> Self {
        match source {
            Some(src) if src.mac_len == 0 => Self::RemoteBroadcast(src.network),
            Some(src) => Self::Remote {
                network: src.network,
                mac: src.mac().to_vec(),
            },
            None => Self::Ip(datalink.as_socket_addr()),
        }
    }
}

impl From<DataLinkAddress> for Address {
    fn from(value: DataLinkAddress) -> Self {
        Self::Ip(value.as_socket_addr())
    }
}

impl From<SocketAddr> for Address {
    fn from(value: SocketAddr) -> Self {
        Self::Ip(value)
    }
}

fn bad(text: &str) -> ClientError {
    ClientError::WrongParameter(format!("invalid address {text:?}"))
}

fn parse_ip_port(text: &str, whole: &str) -> Result<SocketAddr, ClientError> {
    let (host, port) = match text.split_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| bad(whole))?),
        None => (text, DataLinkAddress::BACNET_IP_DEFAULT_PORT),
    };
    let ip: Ipv4Addr = host.parse().map_err(|_| bad(whole))?;
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

fn parse_mac(text: &str, whole: &str) -> Result<Vec<u8>, ClientError> {
    if text.contains('.') {
        let addr = parse_ip_port(text, whole)?;
        return Ok(DataLinkAddress::Ip(addr).to_mac().to_vec());
    }
    if let Some(hex) = text.strip_prefix("0x") {
        if hex.is_empty() || hex.len() % 2 != 0 || hex.len() > 12 {
            return Err(bad(whole));
        }
        return (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| bad(whole)))
            .collect();
    }
    let station: u8 = text.parse().map_err(|_| bad(whole))?;
    Ok(vec![station])
}

impl FromStr for Address {
    type Err = ClientError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let Some((head, tail)) = text.split_once(':') else {
            return Ok(Self::Ip(parse_ip_port(text, text)?));
        };
        if head.contains('.') {
            return Ok(Self::Ip(parse_ip_port(text, text)?));
        }

        let network: u16 = head.parse().map_err(|_| bad(text))?;
        if !(1..=65534).contains(&network) {
            return Err(bad(text));
        }
        if tail == "*" {
            return Ok(Self::RemoteBroadcast(network));
        }
        Ok(Self::Remote {
            network,
            mac: parse_mac(tail, text)?,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::RemoteBroadcast(network) => write!(f, "{network}:*"),
            Self::Remote { network, mac } => match DataLinkAddress::from_mac(mac) {
                Some(ip) => write!(f, "{network}:{ip}"),
                None if mac.len() == 1 => write!(f, "{network}:{}", mac[0]),
                None => {
                    write!(f, "{network}:0x")?;
                    for b in mac {
                        write!(f, "{b:02x}")?;
                    }
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_forms() {
        let a: Address = "192.168.1.10".parse().unwrap();
        assert_eq!(a, Address::ip(Ipv4Addr::new(192, 168, 1, 10), 47808));
        let b: Address = "127.0.0.1:47809".parse().unwrap();
        assert_eq!(b.to_string(), "127.0.0.1:47809");
        assert!("300.1.1.1".parse::<Address>().is_err());
        assert!("10.0.0.1:notaport".parse::<Address>().is_err());
    }

    #[test]
    fn routed_forms() {
        let mstp: Address = "2:5".parse().unwrap();
        assert_eq!(mstp, Address::Remote { network: 2, mac: vec![5] });
        assert_eq!(mstp.to_string(), "2:5");

        let ip_mac: Address = "3:10.0.0.9".parse().unwrap();
        assert_eq!(ip_mac.network(), Some(3));
        assert_eq!(ip_mac.to_string(), "3:10.0.0.9:47808");

        let hex: Address = "4:0x0a0b".parse().unwrap();
        assert_eq!(hex, Address::Remote { network: 4, mac: vec![0x0a, 0x0b] });

        assert_eq!("7:*".parse::<Address>().unwrap(), Address::RemoteBroadcast(7));
        assert!("0:5".parse::<Address>().is_err());
        assert!("65535:5".parse::<Address>().is_err());
    }

    #[test]
    fn source_mapping() {
        let dl = DataLinkAddress::Ip("10.0.0.1:47808".parse().unwrap());
        assert_eq!(Address::from_source(dl, None), Address::Ip("10.0.0.1:47808".parse().unwrap()));
        let routed = Address::from_source(dl, Some(NpduAddress::new(9, &[3])));
        assert_eq!(routed, Address::Remote { network: 9, mac: vec![3] });
    }
}
