//! In-memory BACnet/IP segment.
//!
//! A [`ChannelHub`] stands in for a UDP subnet: every endpoint owns a socket
//! address, unicast frames go to the endpoint bound there and broadcast
//! frames (`255.255.255.255` or any `x.y.z.255` destination) reach every
//! other endpoint regardless of port. Tests and simulations run several
//! clients and simulated peers against one hub.

use bacscope_datalink::{DataLink, DataLinkAddress, DataLinkError};
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Frame = (Vec<u8>, DataLinkAddress);

#[derive(Debug, Default)]
pub struct ChannelHub {
    endpoints: Mutex<HashMap<SocketAddr, mpsc::UnboundedSender<Frame>>>,
}

impl ChannelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Binds a new endpoint at `addr`; fails with `AddrInUse` when taken.
    pub fn endpoint(self: &Arc<Self>, addr: SocketAddr) -> Result<ChannelDataLink, DataLinkError> {
        let mut endpoints = self
            .endpoints
            .lock()
            .map_err(|_| DataLinkError::Io(io::Error::other("hub poisoned")))?;
        if endpoints.contains_key(&addr) {
            return Err(DataLinkError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{addr} already bound"),
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.insert(addr, tx);
        Ok(ChannelDataLink {
            hub: Arc::clone(self),
            local: addr,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    pub fn bound(&self) -> Vec<SocketAddr> {
        self.endpoints
            .lock()
            .map(|endpoints| endpoints.keys().copied().collect())
            .unwrap_or_default()
    }

    fn is_broadcast(addr: &SocketAddr) -> bool {
        match addr.ip() {
            IpAddr::V4(ip) => ip.is_broadcast() || ip.octets()[3] == 255,
            IpAddr::V6(_) => false,
        }
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, payload: &[u8]) {
        let Ok(endpoints) = self.endpoints.lock() else {
            return;
        };
        let source = DataLinkAddress::Ip(from);
        if Self::is_broadcast(&to) {
            for (addr, tx) in endpoints.iter() {
                if *addr != from {
                    let _ = tx.send((payload.to_vec(), source));
                }
            }
        } else if let Some(tx) = endpoints.get(&to) {
            let _ = tx.send((payload.to_vec(), source));
        } else {
            log::trace!("hub: no endpoint at {to}, frame dropped");
        }
    }

    fn release(&self, addr: SocketAddr) {
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.remove(&addr);
        }
    }
}

/// One endpoint of a [`ChannelHub`]. Dropping it frees the address.
#[derive(Debug)]
pub struct ChannelDataLink {
    hub: Arc<ChannelHub>,
    local: SocketAddr,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl ChannelDataLink {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl Drop for ChannelDataLink {
    fn drop(&mut self) {
        self.hub.release(self.local);
    }
}

impl DataLink for ChannelDataLink {
    async fn send(&self, address: DataLinkAddress, payload: &[u8]) -> Result<(), DataLinkError> {
        self.hub.deliver(self.local, address.as_socket_addr(), payload);
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, DataLinkAddress), DataLinkError> {
        let mut rx = self.rx.lock().await;
        let (frame, source) = rx.recv().await.ok_or_else(|| {
            DataLinkError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "hub closed"))
        })?;
        if frame.len() > buf.len() {
            return Err(DataLinkError::FrameTooLarge);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok((frame.len(), source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> SocketAddr {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn unicast_and_broadcast_delivery() {
        let hub = ChannelHub::new();
        let a = hub.endpoint(addr("127.0.0.1:47808")).unwrap();
        let b = hub.endpoint(addr("127.0.0.1:47809")).unwrap();
        let c = hub.endpoint(addr("127.0.0.1:47810")).unwrap();

        a.send(DataLinkAddress::Ip(addr("127.0.0.1:47809")), &[1, 2])
            .await
            .unwrap();
        let mut buf = [0u8; 16];
        let (n, src) = b.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2]);
        assert_eq!(src, DataLinkAddress::Ip(addr("127.0.0.1:47808")));

        a.send(DataLinkAddress::Ip(addr("127.0.0.255:47808")), &[9])
            .await
            .unwrap();
        assert_eq!(b.recv(&mut buf).await.unwrap().0, 1);
        assert_eq!(c.recv(&mut buf).await.unwrap().0, 1);
    }

    #[tokio::test]
    async fn address_in_use_until_dropped() {
        let hub = ChannelHub::new();
        let first = hub.endpoint(addr("127.0.0.1:47808")).unwrap();
        let err = hub.endpoint(addr("127.0.0.1:47808")).unwrap_err();
        assert!(matches!(err, DataLinkError::Io(e) if e.kind() == io::ErrorKind::AddrInUse));
        drop(first);
        assert!(hub.endpoint(addr("127.0.0.1:47808")).is_ok());
    }
}
