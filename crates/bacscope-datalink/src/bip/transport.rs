use crate::bip::bvlc::{BvlcFunction, BvlcHeader};
use crate::{DataLink, DataLinkAddress, DataLinkError};
use bacscope_core::encoding::{reader::Reader, writer::Writer};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout, Duration};

const MAX_BIP_FRAME_LEN: usize = 1600;
const BBMD_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// BVLC result code for a refused foreign-device registration.
pub const RESULT_REGISTER_FOREIGN_DEVICE_NAK: u16 = 0x0030;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastDistributionEntry {
    pub address: SocketAddrV4,
    pub mask: Ipv4Addr,
}

impl BroadcastDistributionEntry {
    /// Parses `a.b.c.d[:port][/mask-bits]`, the notation used in `bdtable`
    /// configuration entries. A missing mask means a host route (/32).
    pub fn parse(text: &str) -> Option<Self> {
        let (host, bits) = match text.split_once('/') {
            Some((host, bits)) => (host, bits.parse::<u8>().ok().filter(|b| *b <= 32)?),
            None => (text, 32),
        };
        let address = match host.parse::<SocketAddrV4>() {
            Ok(addr) => addr,
            Err(_) => SocketAddrV4::new(
                host.parse().ok()?,
                DataLinkAddress::BACNET_IP_DEFAULT_PORT,
            ),
        };
        let mask = if bits == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(bits))
        };
        Some(Self {
            address,
            mask: Ipv4Addr::from(mask),
        })
    }

    /// Address a forwarded broadcast is sent to for this peer.
    pub fn forward_address(&self) -> SocketAddr {
        let ip = u32::from(*self.address.ip()) | !u32::from(self.mask);
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(ip), self.address.port()))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.address.ip().octets());
        out.extend_from_slice(&self.address.port().to_be_bytes());
        out.extend_from_slice(&self.mask.octets());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignDeviceTableEntry {
    pub address: SocketAddrV4,
    pub ttl_seconds: u16,
    pub remaining_seconds: u16,
}

/// A BBMD command waiting for its reply from the receive path.
#[derive(Debug)]
struct BvlcWaiter {
    expected: BvlcFunction,
    reply: oneshot::Sender<Result<Vec<u8>, DataLinkError>>,
}

#[derive(Debug, Default)]
struct BbmdState {
    bbmd: Option<SocketAddr>,
    waiter: Option<BvlcWaiter>,
    bdt: Vec<BroadcastDistributionEntry>,
}

/// BACnet/IP over UDP.
///
/// BBMD replies are consumed by [`DataLink::recv`] and handed to the command
/// that is waiting for them, so BBMD commands complete only while some task
/// keeps receiving (the client's dispatcher does).
#[derive(Debug, Clone)]
pub struct BacnetIpTransport {
    socket: Arc<UdpSocket>,
    state: Arc<Mutex<BbmdState>>,
    bbmd_command_lock: Arc<Mutex<()>>,
}

impl BacnetIpTransport {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, DataLinkError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: Arc::new(socket),
            state: Arc::new(Mutex::new(BbmdState::default())),
            bbmd_command_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn bind_foreign(
        bind_addr: SocketAddr,
        bbmd_addr: SocketAddr,
    ) -> Result<Self, DataLinkError> {
        let transport = Self::bind(bind_addr).await?;
        transport.state.lock().await.bbmd = Some(bbmd_addr);
        Ok(transport)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        self.socket.local_addr().map_err(DataLinkError::Io)
    }

    pub async fn bbmd_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.bbmd
    }

    /// Points subsequent BBMD commands and global broadcasts at `bbmd`.
    pub async fn set_bbmd(&self, bbmd: Option<SocketAddr>) {
        self.state.lock().await.bbmd = bbmd;
    }

    /// Installs the broadcast distribution table this node serves as a BBMD.
    pub async fn populate_bdt(&self, entries: Vec<BroadcastDistributionEntry>) {
        log::info!("serving broadcast distribution table with {} entries", entries.len());
        self.state.lock().await.bdt = entries;
    }

    pub async fn local_bdt(&self) -> Vec<BroadcastDistributionEntry> {
        self.state.lock().await.bdt.clone()
    }

    fn parse_bvlc_result(payload: &[u8]) -> Result<(), DataLinkError> {
        if payload.len() < 2 {
            return Err(DataLinkError::InvalidFrame);
        }
        let code = u16::from_be_bytes([payload[0], payload[1]]);
        if code == 0 {
            Ok(())
        } else {
            Err(DataLinkError::BvlcResult(code))
        }
    }

    fn encode_frame(function: BvlcFunction, parts: &[&[u8]]) -> Result<Vec<u8>, DataLinkError> {
        let total_len = parts
            .iter()
            .try_fold(4usize, |acc, p| acc.checked_add(p.len()))
            .ok_or(DataLinkError::FrameTooLarge)?;
        if total_len > MAX_BIP_FRAME_LEN {
            return Err(DataLinkError::FrameTooLarge);
        }

        let mut frame = vec![0u8; total_len];
        let mut w = Writer::new(&mut frame);
        BvlcHeader {
            function,
            length: total_len as u16,
        }
        .encode(&mut w)
        .map_err(|_| DataLinkError::InvalidFrame)?;
        for part in parts {
            w.write_all(part).map_err(|_| DataLinkError::InvalidFrame)?;
        }
        Ok(frame)
    }

    async fn send_frame(
        &self,
        function: BvlcFunction,
        parts: &[&[u8]],
        target: SocketAddr,
    ) -> Result<(), DataLinkError> {
        let frame = Self::encode_frame(function, parts)?;
        self.socket.send_to(&frame, target).await?;
        Ok(())
    }

    /// Sends a BBMD command and waits for the matching reply delivered by
    /// the receive path.
    async fn bbmd_command(
        &self,
        function: BvlcFunction,
        payload: &[u8],
        expected: BvlcFunction,
    ) -> Result<Vec<u8>, DataLinkError> {
        let _guard = self.bbmd_command_lock.lock().await;
        let (tx, rx) = oneshot::channel();
        let bbmd = {
            let mut state = self.state.lock().await;
            let bbmd = state.bbmd.ok_or(DataLinkError::BbmdNotConfigured)?;
            state.waiter = Some(BvlcWaiter {
                expected,
                reply: tx,
            });
            bbmd
        };

        let outcome = match self.send_frame(function, &[payload], bbmd).await {
            Ok(()) => match timeout(BBMD_REPLY_TIMEOUT, rx).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Err(DataLinkError::InvalidFrame),
                Err(_) => Err(DataLinkError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "bbmd response timeout",
                ))),
            },
            Err(e) => Err(e),
        };
        self.state.lock().await.waiter = None;
        outcome
    }

    pub async fn register_foreign_device_no_wait(
        &self,
        ttl_seconds: u16,
    ) -> Result<(), DataLinkError> {
        let _guard = self.bbmd_command_lock.lock().await;
        let bbmd = self
            .state
            .lock()
            .await
            .bbmd
            .ok_or(DataLinkError::BbmdNotConfigured)?;
        self.send_frame(
            BvlcFunction::RegisterForeignDevice,
            &[&ttl_seconds.to_be_bytes()[..]],
            bbmd,
        )
        .await
    }

    pub async fn register_foreign_device(&self, ttl_seconds: u16) -> Result<(), DataLinkError> {
        let payload = self
            .bbmd_command(
                BvlcFunction::RegisterForeignDevice,
                &ttl_seconds.to_be_bytes(),
                BvlcFunction::Result,
            )
            .await?;
        Self::parse_bvlc_result(&payload)?;
        log::info!("registered as foreign device (ttl {ttl_seconds}s)");
        Ok(())
    }

    /// Cancels the foreign-device registration by re-registering with a
    /// zero time-to-live, then forgets the BBMD.
    pub async fn unregister_foreign_device(&self) -> Result<(), DataLinkError> {
        self.register_foreign_device_no_wait(0).await?;
        self.state.lock().await.bbmd = None;
        log::info!("foreign device registration cancelled");
        Ok(())
    }

    pub async fn read_broadcast_distribution_table(
        &self,
    ) -> Result<Vec<BroadcastDistributionEntry>, DataLinkError> {
        let payload = self
            .bbmd_command(
                BvlcFunction::ReadBroadcastDistributionTable,
                &[],
                BvlcFunction::ReadBroadcastDistributionTableAck,
            )
            .await?;
        if payload.len() % 10 != 0 {
            return Err(DataLinkError::InvalidFrame);
        }

        Ok(payload
            .chunks_exact(10)
            .map(|chunk| BroadcastDistributionEntry {
                address: SocketAddrV4::new(
                    Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                    u16::from_be_bytes([chunk[4], chunk[5]]),
                ),
                mask: Ipv4Addr::new(chunk[6], chunk[7], chunk[8], chunk[9]),
            })
            .collect())
    }

    pub async fn write_broadcast_distribution_table(
        &self,
        entries: &[BroadcastDistributionEntry],
    ) -> Result<(), DataLinkError> {
        let mut payload = Vec::with_capacity(entries.len() * 10);
        for entry in entries {
            entry.encode(&mut payload);
        }
        let reply = self
            .bbmd_command(
                BvlcFunction::WriteBroadcastDistributionTable,
                &payload,
                BvlcFunction::Result,
            )
            .await?;
        Self::parse_bvlc_result(&reply)
    }

    pub async fn read_foreign_device_table(
        &self,
    ) -> Result<Vec<ForeignDeviceTableEntry>, DataLinkError> {
        let payload = self
            .bbmd_command(
                BvlcFunction::ReadForeignDeviceTable,
                &[],
                BvlcFunction::ReadForeignDeviceTableAck,
            )
            .await?;
        if payload.len() % 10 != 0 {
            return Err(DataLinkError::InvalidFrame);
        }

        Ok(payload
            .chunks_exact(10)
            .map(|chunk| ForeignDeviceTableEntry {
                address: SocketAddrV4::new(
                    Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]),
                    u16::from_be_bytes([chunk[4], chunk[5]]),
                ),
                ttl_seconds: u16::from_be_bytes([chunk[6], chunk[7]]),
                remaining_seconds: u16::from_be_bytes([chunk[8], chunk[9]]),
            })
            .collect())
    }

    pub async fn delete_foreign_device_table_entry(
        &self,
        address: SocketAddrV4,
    ) -> Result<(), DataLinkError> {
        let mut payload = [0u8; 6];
        payload[..4].copy_from_slice(&address.ip().octets());
        payload[4..].copy_from_slice(&address.port().to_be_bytes());
        let reply = self
            .bbmd_command(
                BvlcFunction::DeleteForeignDeviceTableEntry,
                &payload,
                BvlcFunction::Result,
            )
            .await?;
        Self::parse_bvlc_result(&reply)
    }

    /// Hands a BBMD reply to the waiting command. Returns `false` when no
    /// command was waiting for it.
    async fn deliver_bbmd_reply(
        &self,
        src: SocketAddr,
        function: BvlcFunction,
        payload: &[u8],
    ) -> bool {
        let mut state = self.state.lock().await;
        if state.bbmd != Some(src) {
            return false;
        }
        let Some(waiter) = state.waiter.take() else {
            return false;
        };
        let reply = if function == waiter.expected {
            Ok(payload.to_vec())
        } else if function == BvlcFunction::Result {
            match Self::parse_bvlc_result(payload) {
                Ok(()) => Err(DataLinkError::InvalidFrame),
                Err(e) => Err(e),
            }
        } else {
            state.waiter = Some(waiter);
            return false;
        };
        let _ = waiter.reply.send(reply);
        true
    }

    /// Answers BBMD requests from peers while acting as a BBMD. Only the
    /// broadcast distribution table is served; foreign registrations are
    /// refused.
    async fn answer_bbmd_request(
        &self,
        src: SocketAddr,
        function: BvlcFunction,
    ) -> Result<(), DataLinkError> {
        match function {
            BvlcFunction::ReadBroadcastDistributionTable => {
                let mut payload = Vec::new();
                for entry in &self.state.lock().await.bdt {
                    entry.encode(&mut payload);
                }
                self.send_frame(
                    BvlcFunction::ReadBroadcastDistributionTableAck,
                    &[payload.as_slice()],
                    src,
                )
                .await
            }
            BvlcFunction::RegisterForeignDevice => {
                self.send_frame(
                    BvlcFunction::Result,
                    &[&RESULT_REGISTER_FOREIGN_DEVICE_NAK.to_be_bytes()[..]],
                    src,
                )
                .await
            }
            _ => Ok(()),
        }
    }

    async fn forward_to_bdt(&self, payload: &[u8]) -> Result<(), DataLinkError> {
        let peers = self.state.lock().await.bdt.clone();
        if peers.is_empty() {
            return Ok(());
        }
        let local = self.local_addr()?;
        let origin = match local {
            SocketAddr::V4(v4) => v4,
            SocketAddr::V6(_) => return Ok(()),
        };
        let mut origin_octets = [0u8; 6];
        origin_octets[..4].copy_from_slice(&origin.ip().octets());
        origin_octets[4..].copy_from_slice(&origin.port().to_be_bytes());
        for peer in peers {
            if SocketAddr::V4(peer.address) == local {
                continue;
            }
            self.send_frame(
                BvlcFunction::ForwardedNpdu,
                &[&origin_octets[..], payload],
                peer.forward_address(),
            )
            .await?;
        }
        Ok(())
    }
}

impl DataLink for BacnetIpTransport {
    async fn send(&self, address: DataLinkAddress, payload: &[u8]) -> Result<(), DataLinkError> {
        let addr = address.as_socket_addr();
        let is_broadcast = matches!(addr.ip(), IpAddr::V4(v4) if v4.is_broadcast());

        if !is_broadcast {
            return self
                .send_frame(BvlcFunction::OriginalUnicastNpdu, &[payload], addr)
                .await;
        }

        let bbmd = self.state.lock().await.bbmd;
        match bbmd {
            Some(bbmd) => {
                self.send_frame(BvlcFunction::DistributeBroadcastToNetwork, &[payload], bbmd)
                    .await
            }
            None => {
                self.forward_to_bdt(payload).await?;
                self.send_frame(BvlcFunction::OriginalBroadcastNpdu, &[payload], addr)
                    .await
            }
        }
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<(usize, DataLinkAddress), DataLinkError> {
        let mut frame = [0u8; MAX_BIP_FRAME_LEN];
        loop {
            let (n, src) = self.socket.recv_from(&mut frame).await?;
            let mut r = Reader::new(&frame[..n]);
            let hdr = BvlcHeader::decode(&mut r).map_err(|_| DataLinkError::InvalidFrame)?;
            let body = r
                .read_exact(usize::from(hdr.length) - 4)
                .map_err(|_| DataLinkError::InvalidFrame)?;

            let (payload, origin) = match hdr.function {
                BvlcFunction::OriginalUnicastNpdu
                | BvlcFunction::OriginalBroadcastNpdu
                | BvlcFunction::DistributeBroadcastToNetwork => (body, src),
                BvlcFunction::ForwardedNpdu => {
                    if body.len() < 6 {
                        return Err(DataLinkError::InvalidFrame);
                    }
                    let origin_ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
                    let origin_port = u16::from_be_bytes([body[4], body[5]]);
                    (
                        &body[6..],
                        SocketAddr::new(IpAddr::V4(origin_ip), origin_port),
                    )
                }
                BvlcFunction::Result
                | BvlcFunction::ReadBroadcastDistributionTableAck
                | BvlcFunction::ReadForeignDeviceTableAck => {
                    if !self.deliver_bbmd_reply(src, hdr.function, body).await {
                        log::debug!("unsolicited {:?} from {src}", hdr.function);
                    }
                    continue;
                }
                BvlcFunction::Unknown(v) => return Err(DataLinkError::UnsupportedBvlcFunction(v)),
                other => {
                    self.answer_bbmd_request(src, other).await?;
                    continue;
                }
            };

            if payload.len() > buf.len() {
                return Err(DataLinkError::FrameTooLarge);
            }
            buf[..payload.len()].copy_from_slice(payload);
            return Ok((payload.len(), DataLinkAddress::Ip(origin)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BacnetIpTransport, BroadcastDistributionEntry, ForeignDeviceTableEntry};
    use crate::bip::bvlc::{BvlcFunction, BvlcHeader, BVLC_TYPE_BIP};
    use crate::{DataLink, DataLinkAddress, DataLinkError};
    use bacscope_core::encoding::{reader::Reader, writer::Writer};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
    use tokio::net::UdpSocket;
    use tokio::task::JoinHandle;
    use tokio::time::{timeout, Duration};

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    /// Keeps the receive path running so BBMD replies reach their waiter.
    fn pump(transport: &BacnetIpTransport) -> JoinHandle<()> {
        let t = transport.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1600];
            loop {
                let _ = t.recv(&mut buf).await;
            }
        })
    }

    async fn foreign_pair() -> (UdpSocket, BacnetIpTransport) {
        let bbmd = UdpSocket::bind(loopback()).await.unwrap();
        let transport = BacnetIpTransport::bind_foreign(loopback(), bbmd.local_addr().unwrap())
            .await
            .unwrap();
        (bbmd, transport)
    }

    #[tokio::test]
    async fn recv_forwarded_npdu_returns_forwarded_origin() {
        let transport = BacnetIpTransport::bind(loopback()).await.unwrap();
        let target = transport.local_addr().unwrap();
        let sender = UdpSocket::bind(loopback()).await.unwrap();

        let mut frame = [0u8; 64];
        let mut w = Writer::new(&mut frame);
        BvlcHeader {
            function: BvlcFunction::ForwardedNpdu,
            length: 4 + 6 + 3,
        }
        .encode(&mut w)
        .unwrap();
        w.write_all(&[10, 1, 2, 3]).unwrap();
        w.write_be_u16(47808).unwrap();
        w.write_all(&[1, 2, 3]).unwrap();

        sender.send_to(w.as_written(), target).await.unwrap();

        let mut out = [0u8; 16];
        let (n, src) = transport.recv(&mut out).await.unwrap();
        assert_eq!(&out[..n], &[1, 2, 3]);
        assert_eq!(
            src,
            DataLinkAddress::Ip(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
                47808
            ))
        );
    }

    #[tokio::test]
    async fn register_foreign_device_success() {
        let (bbmd, transport) = foreign_pair().await;
        let pump = pump(&transport);

        let responder = tokio::spawn(async move {
            let mut recv = [0u8; 64];
            let (n, src) = bbmd.recv_from(&mut recv).await.unwrap();
            let mut r = Reader::new(&recv[..n]);
            let hdr = BvlcHeader::decode(&mut r).unwrap();
            assert_eq!(hdr.function, BvlcFunction::RegisterForeignDevice);
            assert_eq!(r.read_be_u16().unwrap(), 60);

            let reply = [BVLC_TYPE_BIP, 0x00, 0x00, 0x06, 0x00, 0x00];
            bbmd.send_to(&reply, src).await.unwrap();
        });

        transport.register_foreign_device(60).await.unwrap();
        responder.await.unwrap();
        pump.abort();
    }

    #[tokio::test]
    async fn register_foreign_device_nak_surfaces_result_code() {
        let (bbmd, transport) = foreign_pair().await;
        let pump = pump(&transport);

        let responder = tokio::spawn(async move {
            let mut recv = [0u8; 64];
            let (_, src) = bbmd.recv_from(&mut recv).await.unwrap();
            let reply = [BVLC_TYPE_BIP, 0x00, 0x00, 0x06, 0x00, 0x30];
            bbmd.send_to(&reply, src).await.unwrap();
        });

        let err = transport.register_foreign_device(60).await.unwrap_err();
        assert!(matches!(err, DataLinkError::BvlcResult(0x0030)));
        responder.await.unwrap();
        pump.abort();
    }

    #[tokio::test]
    async fn unregister_sends_zero_ttl_and_forgets_bbmd() {
        let (bbmd, transport) = foreign_pair().await;

        transport.unregister_foreign_device().await.unwrap();

        let mut recv = [0u8; 64];
        let (n, _) = bbmd.recv_from(&mut recv).await.unwrap();
        let mut r = Reader::new(&recv[..n]);
        let hdr = BvlcHeader::decode(&mut r).unwrap();
        assert_eq!(hdr.function, BvlcFunction::RegisterForeignDevice);
        assert_eq!(r.read_be_u16().unwrap(), 0);
        assert_eq!(transport.bbmd_addr().await, None);
        assert!(matches!(
            transport.read_foreign_device_table().await,
            Err(DataLinkError::BbmdNotConfigured)
        ));
    }

    #[tokio::test]
    async fn read_broadcast_distribution_table_parses_entries() {
        let (bbmd, transport) = foreign_pair().await;
        let pump = pump(&transport);

        let responder = tokio::spawn(async move {
            let mut recv = [0u8; 128];
            let (n, src) = bbmd.recv_from(&mut recv).await.unwrap();
            let mut r = Reader::new(&recv[..n]);
            let hdr = BvlcHeader::decode(&mut r).unwrap();
            assert_eq!(hdr.function, BvlcFunction::ReadBroadcastDistributionTable);

            let mut reply = [0u8; 32];
            let mut w = Writer::new(&mut reply);
            BvlcHeader {
                function: BvlcFunction::ReadBroadcastDistributionTableAck,
                length: 14,
            }
            .encode(&mut w)
            .unwrap();
            w.write_all(&[192, 168, 10, 20]).unwrap();
            w.write_be_u16(47808).unwrap();
            w.write_all(&[255, 255, 255, 0]).unwrap();
            bbmd.send_to(w.as_written(), src).await.unwrap();
        });

        let entries = transport.read_broadcast_distribution_table().await.unwrap();
        assert_eq!(
            entries,
            vec![BroadcastDistributionEntry {
                address: SocketAddrV4::new(Ipv4Addr::new(192, 168, 10, 20), 47808),
                mask: Ipv4Addr::new(255, 255, 255, 0),
            }]
        );
        responder.await.unwrap();
        pump.abort();
    }

    #[tokio::test]
    async fn read_foreign_device_table_parses_entries() {
        let (bbmd, transport) = foreign_pair().await;
        let pump = pump(&transport);

        let responder = tokio::spawn(async move {
            let mut recv = [0u8; 128];
            let (_, src) = bbmd.recv_from(&mut recv).await.unwrap();
            let mut reply = [0u8; 32];
            let mut w = Writer::new(&mut reply);
            BvlcHeader {
                function: BvlcFunction::ReadForeignDeviceTableAck,
                length: 14,
            }
            .encode(&mut w)
            .unwrap();
            w.write_all(&[172, 16, 0, 42]).unwrap();
            w.write_be_u16(47808).unwrap();
            w.write_be_u16(120).unwrap();
            w.write_be_u16(90).unwrap();
            bbmd.send_to(w.as_written(), src).await.unwrap();
        });

        let entries = transport.read_foreign_device_table().await.unwrap();
        assert_eq!(
            entries,
            vec![ForeignDeviceTableEntry {
                address: SocketAddrV4::new(Ipv4Addr::new(172, 16, 0, 42), 47808),
                ttl_seconds: 120,
                remaining_seconds: 90,
            }]
        );
        responder.await.unwrap();
        pump.abort();
    }

    #[tokio::test]
    async fn bbmd_commands_are_serialized() {
        let (bbmd, transport) = foreign_pair().await;
        let pump = pump(&transport);

        let t1 = transport.clone();
        let t2 = transport.clone();
        let first = tokio::spawn(async move { t1.read_broadcast_distribution_table().await });
        let mut recv = [0u8; 128];
        let (n1, src1) = bbmd.recv_from(&mut recv).await.unwrap();
        let second = tokio::spawn(async move { t2.read_foreign_device_table().await });
        let mut r1 = Reader::new(&recv[..n1]);
        assert_eq!(
            BvlcHeader::decode(&mut r1).unwrap().function,
            BvlcFunction::ReadBroadcastDistributionTable
        );

        // The second command must wait for the first reply.
        let no_second_yet = timeout(Duration::from_millis(100), bbmd.recv_from(&mut recv)).await;
        assert!(no_second_yet.is_err());

        let empty_bdt = [BVLC_TYPE_BIP, 0x03, 0x00, 0x04];
        bbmd.send_to(&empty_bdt, src1).await.unwrap();

        let (n2, src2) = bbmd.recv_from(&mut recv).await.unwrap();
        let mut r2 = Reader::new(&recv[..n2]);
        assert_eq!(
            BvlcHeader::decode(&mut r2).unwrap().function,
            BvlcFunction::ReadForeignDeviceTable
        );
        let empty_fdt = [BVLC_TYPE_BIP, 0x07, 0x00, 0x04];
        bbmd.send_to(&empty_fdt, src2).await.unwrap();

        assert!(first.await.unwrap().unwrap().is_empty());
        assert!(second.await.unwrap().unwrap().is_empty());
        pump.abort();
    }

    #[tokio::test]
    async fn broadcast_uses_distribute_to_network_when_bbmd_configured() {
        let (bbmd, transport) = foreign_pair().await;

        transport
            .send(DataLinkAddress::local_broadcast(47808), &[1, 2, 3])
            .await
            .unwrap();

        let mut recv = [0u8; 64];
        let (n, _) = bbmd.recv_from(&mut recv).await.unwrap();
        let mut r = Reader::new(&recv[..n]);
        let hdr = BvlcHeader::decode(&mut r).unwrap();
        assert_eq!(hdr.function, BvlcFunction::DistributeBroadcastToNetwork);
    }

    #[tokio::test]
    async fn bbmd_mode_forwards_broadcasts_and_serves_its_table() {
        let peer = UdpSocket::bind(loopback()).await.unwrap();
        let SocketAddr::V4(peer_addr) = peer.local_addr().unwrap() else {
            unreachable!()
        };
        let transport = BacnetIpTransport::bind(loopback()).await.unwrap();
        let entry = BroadcastDistributionEntry {
            address: peer_addr,
            mask: Ipv4Addr::new(255, 255, 255, 255),
        };
        transport.populate_bdt(vec![entry]).await;

        // The local broadcast itself may be refused by the host; the
        // forwarded copy goes out first either way.
        let _ = transport
            .send(DataLinkAddress::local_broadcast(47808), &[9, 9])
            .await;
        let mut recv = [0u8; 64];
        let (n, _) = peer.recv_from(&mut recv).await.unwrap();
        let mut r = Reader::new(&recv[..n]);
        assert_eq!(
            BvlcHeader::decode(&mut r).unwrap().function,
            BvlcFunction::ForwardedNpdu
        );
        r.read_exact(6).unwrap();
        assert_eq!(r.read_exact(2).unwrap(), &[9, 9]);

        let pump = pump(&transport);
        peer.send_to(&[BVLC_TYPE_BIP, 0x02, 0x00, 0x04], transport.local_addr().unwrap())
            .await
            .unwrap();
        let (n, _) = peer.recv_from(&mut recv).await.unwrap();
        let mut r = Reader::new(&recv[..n]);
        assert_eq!(
            BvlcHeader::decode(&mut r).unwrap().function,
            BvlcFunction::ReadBroadcastDistributionTableAck
        );
        assert_eq!(r.remaining(), 10);
        pump.abort();
    }

    #[test]
    fn bdt_entry_parses_mask_and_port() {
        let entry = BroadcastDistributionEntry::parse("192.168.1.10:47809/24").unwrap();
        assert_eq!(entry.address, SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 47809));
        assert_eq!(entry.mask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(
            entry.forward_address(),
            "192.168.1.255:47809".parse::<SocketAddr>().unwrap()
        );

        let host = BroadcastDistributionEntry::parse("10.0.0.1").unwrap();
        assert_eq!(host.address.port(), 47808);
        assert_eq!(host.mask, Ipv4Addr::BROADCAST);
        assert!(BroadcastDistributionEntry::parse("10.0.0.1/40").is_none());
    }

    #[tokio::test]
    async fn unknown_bvlc_function_errors() {
        let transport = BacnetIpTransport::bind(loopback()).await.unwrap();
        let target = transport.local_addr().unwrap();
        let sender = UdpSocket::bind(loopback()).await.unwrap();

        let frame = [BVLC_TYPE_BIP, 0x99, 0x00, 0x04];
        sender.send_to(&frame, target).await.unwrap();

        let mut out = [0u8; 16];
        let err = transport.recv(&mut out).await.unwrap_err();
        assert!(matches!(err, DataLinkError::UnsupportedBvlcFunction(0x99)));
    }
}
