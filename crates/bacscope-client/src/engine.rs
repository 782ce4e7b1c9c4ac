//! Network engine: the receive dispatcher and the confirmed-request core.
//!
//! One dispatcher task owns the receive side of the data link. Outgoing
//! confirmed requests register a channel keyed by `(peer, invoke id)` before
//! sending; the dispatcher hands every ack, error, reject, abort and
//! segment-ack to that channel. Unsolicited traffic (I-Am, I-Have, router
//! messages) is fanned out on a broadcast channel, COV notifications go to
//! their subscription and requests addressed to us go to the local server.

use crate::cov::{CovNotification, CovRegistry};
use crate::discovery::{DiscoveredDevice, DiscoveredObject, Unsolicited};
use crate::server::{CovEvent, LocalServer};
use crate::{Address, ClientError, LocalDevice, RouterTable};
use bacscope_core::apdu::{
    AbortPdu, ApduType, BacnetError, ComplexAckHeader, ConfirmedRequestHeader, RejectPdu,
    SegmentAck, SimpleAck, UnconfirmedRequestHeader,
};
use bacscope_core::encoding::{reader::Reader, writer::Writer};
use bacscope_core::network::{NetworkMessage, MESSAGE_WHO_IS_ROUTER_TO_NETWORK};
use bacscope_core::npdu::{Npdu, NpduAddress, CONTROL_EXPECTING_REPLY};
use bacscope_core::services::cov_notification::{
    CovNotificationRequest, CovPropertyValue as WireCovValue, SERVICE_CONFIRMED_COV_NOTIFICATION,
    SERVICE_UNCONFIRMED_COV_NOTIFICATION,
};
use bacscope_core::services::i_am::{IAmRequest, SERVICE_I_AM};
use bacscope_core::services::time_synchronization::{
    TimeSynchronizationRequest, SERVICE_TIME_SYNCHRONIZATION, SERVICE_UTC_TIME_SYNCHRONIZATION,
};
use bacscope_core::services::who_has::{
    IHaveRequest, WhoHasRequest, SERVICE_I_HAVE, SERVICE_WHO_HAS,
};
use bacscope_core::services::who_is::{WhoIsRequest, SERVICE_WHO_IS};
use bacscope_core::types::{ErrorClass, ErrorCode, ObjectId, ObjectType, Segmentation};
use bacscope_core::{DecodeError, EncodeError};
use bacscope_datalink::{BacnetIpTransport, DataLink, DataLinkAddress, DataLinkError};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

const MIN_SEGMENT_DATA_LEN: usize = 32;
const MAX_COMPLEX_ACK_REASSEMBLY_BYTES: usize = 1024 * 1024;
const MAX_FRAME_LEN: usize = 2048;
const UNSOLICITED_CAPACITY: usize = 512;

/// DNET of a global broadcast.
pub const GLOBAL_NETWORK: u16 = 0xFFFF;

/// Where an unconfirmed request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastScope {
    /// Broadcast address of the local subnet.
    Local,
    /// Every network, through routers and the BBMD.
    Global,
    /// A single address: unicast, or `net:*` for a remote network broadcast.
    Address(Address),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Tuning {
    pub response_timeout: Duration,
    pub window_size: u8,
    pub retries: u8,
    pub segment_ack_timeout: Duration,
    /// How long Who-Is, Who-Has and router discovery collect replies.
    pub discovery_wait: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(3),
            window_size: 1,
            retries: 2,
            segment_ack_timeout: Duration::from_millis(500),
            discovery_wait: Duration::from_secs(3),
        }
    }
}

/// Outcome of a confirmed request.
#[derive(Debug)]
pub(crate) enum Ack {
    Simple,
    /// Reassembled service payload of a complex ack.
    Complex(Vec<u8>),
}

impl Ack {
    pub(crate) fn into_payload(self) -> Result<Vec<u8>, ClientError> {
        match self {
            Self::Complex(payload) => Ok(payload),
            Self::Simple => Err(ClientError::UnsupportedResponse),
        }
    }
}

type Waiters = HashMap<(Address, u8), mpsc::UnboundedSender<Vec<u8>>>;

#[derive(Debug)]
struct Pending {
    next_invoke_id: u8,
    waiters: Waiters,
}

/// Removes a request's channel from the pending table when the request ends.
struct PendingGuard<'a> {
    pending: &'a Mutex<Pending>,
    key: (Address, u8),
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).waiters.remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct Shared<D> {
    pub(crate) datalink: D,
    pub(crate) local: LocalDevice,
    pub(crate) server: LocalServer,
    pub(crate) routers: RouterTable,
    pub(crate) covs: Arc<CovRegistry>,
    /// Vendor ids peers announced in I-Am or were told to have.
    peer_vendors: RwLock<HashMap<Address, u32>>,
    unsolicited: broadcast::Sender<Unsolicited>,
    pending: Mutex<Pending>,
    send_lock: tokio::sync::Mutex<()>,
    tuning: RwLock<Tuning>,
}

impl<D: DataLink + 'static> Shared<D> {
    pub(crate) fn new(datalink: D, local: LocalDevice) -> Self {
        let (unsolicited, _) = broadcast::channel(UNSOLICITED_CAPACITY);
        Self {
            datalink,
            server: LocalServer::new(&local),
            local,
            routers: RouterTable::new(),
            covs: Arc::new(CovRegistry::default()),
            peer_vendors: RwLock::new(HashMap::new()),
            unsolicited,
            pending: Mutex::new(Pending {
                next_invoke_id: 1,
                waiters: HashMap::new(),
            }),
            send_lock: tokio::sync::Mutex::new(()),
            tuning: RwLock::new(Tuning::default()),
        }
    }

    pub(crate) fn tuning(&self) -> Tuning {
        self.tuning.read().map(|t| *t).unwrap_or_default()
    }

    pub(crate) fn set_tuning(&self, update: impl FnOnce(&mut Tuning)) {
        if let Ok(mut tuning) = self.tuning.write() {
            update(&mut tuning);
        }
    }

    pub(crate) fn remember_vendor(&self, address: Address, vendor_id: u32) {
        if let Ok(mut vendors) = self.peer_vendors.write() {
            vendors.insert(address, vendor_id);
        }
    }

    pub(crate) fn peer_vendor(&self, address: &Address) -> Option<u32> {
        self.peer_vendors.read().ok()?.get(address).copied()
    }

    pub(crate) fn device_object_id(&self) -> ObjectId {
        ObjectId::new(ObjectType::Device, self.local.device_id)
    }

    pub(crate) fn subscribe_unsolicited(&self) -> broadcast::Receiver<Unsolicited> {
        self.unsolicited.subscribe()
    }

    /// Spawns the receive loop.
    pub(crate) fn spawn_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.dispatch().await })
    }

    async fn dispatch(self: Arc<Self>) {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        loop {
            let (n, src) = match self.datalink.recv(&mut buf).await {
                Ok(v) => v,
                Err(DataLinkError::InvalidFrame | DataLinkError::FrameTooLarge) => continue,
                Err(DataLinkError::UnsupportedBvlcFunction(function)) => {
                    log::trace!("ignored BVLC function 0x{function:02x}");
                    continue;
                }
                Err(DataLinkError::Io(e))
                    if matches!(
                        e.kind(),
                        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected
                    ) =>
                {
                    log::error!("receive loop stopped: {e}");
                    return;
                }
                Err(e) => {
                    log::warn!("receive error: {e}");
                    continue;
                }
            };
            if let Err(e) = self.handle_frame(src, &buf[..n]).await {
                log::debug!("dropped frame from {src}: {e}");
            }
        }
    }

    async fn handle_frame(self: &Arc<Self>, src: DataLinkAddress, frame: &[u8]) -> Result<(), ClientError> {
        let mut r = Reader::new(frame);
        let npdu = Npdu::decode(&mut r)?;
        if npdu.is_network_message() {
            self.handle_network_message(src, &npdu, &mut r);
            return Ok(());
        }

        let apdu = r.read_exact(r.remaining())?;
        let peer = Address::from_source(src, npdu.source);
        let first = *apdu.first().ok_or(DecodeError::UnexpectedEof)?;
        match ApduType::from_u8(first >> 4) {
            Some(ApduType::ConfirmedRequest) => self.handle_confirmed(peer, src, apdu).await,
            Some(ApduType::UnconfirmedRequest) => self.handle_unconfirmed(peer, src, apdu).await,
            Some(_) => {
                self.route_response(peer, apdu);
                Ok(())
            }
            None => Err(DecodeError::InvalidValue.into()),
        }
    }

    fn handle_network_message(&self, src: DataLinkAddress, npdu: &Npdu, r: &mut Reader<'_>) {
        let Some(message_type) = npdu.message_type else {
            return;
        };
        match NetworkMessage::decode(message_type, r) {
            Ok(message) => {
                self.routers.apply(src, &message);
                if let NetworkMessage::IAmRouterToNetwork(networks) = message {
                    let _ = self.unsolicited.send(Unsolicited::IAmRouter {
                        router: src,
                        networks,
                    });
                }
            }
            Err(e) => log::trace!("ignored network message 0x{message_type:02x} from {src}: {e}"),
        }
    }

    /// Ack, error, reject, abort and segment-ack PDUs all carry the invoke
    /// id in their second octet.
    fn route_response(&self, peer: Address, apdu: &[u8]) {
        let Some(&invoke_id) = apdu.get(1) else {
            return;
        };
        let key = (peer, invoke_id);
        let pending = lock(&self.pending);
        match pending.waiters.get(&key) {
            Some(tx) => {
                let _ = tx.send(apdu.to_vec());
            }
            None => log::debug!("unexpected response from {} (invoke id {invoke_id})", key.0),
        }
    }

    async fn handle_unconfirmed(
        self: &Arc<Self>,
        peer: Address,
        src: DataLinkAddress,
        apdu: &[u8],
    ) -> Result<(), ClientError> {
        let mut r = Reader::new(apdu);
        let header = UnconfirmedRequestHeader::decode(&mut r)?;
        match header.service_choice {
            SERVICE_I_AM => {
                let i_am = IAmRequest::decode_after_header(&mut r)?;
                log::debug!("I-Am {} from {peer}", i_am.device_id.instance());
                self.remember_vendor(peer.clone(), i_am.vendor_id);
                let _ = self.unsolicited.send(Unsolicited::IAm(DiscoveredDevice {
                    address: peer,
                    device_id: i_am.device_id.instance(),
                    max_apdu: i_am.max_apdu,
                    segmentation: Segmentation::from_u32(i_am.segmentation),
                    vendor_id: i_am.vendor_id,
                }));
            }
            SERVICE_I_HAVE => {
                let i_have = IHaveRequest::decode_after_header(&mut r)?;
                let _ = self.unsolicited.send(Unsolicited::IHave(DiscoveredObject {
                    address: peer,
                    device_id: i_have.device_id,
                    object_id: i_have.object_id,
                    object_name: i_have.object_name.to_string(),
                }));
            }
            SERVICE_UNCONFIRMED_COV_NOTIFICATION => {
                let request = CovNotificationRequest::decode_after_header(&mut r)?;
                let notification = CovNotification::from_request(peer, false, request);
                let process_id = notification.subscriber_process_id;
                if !self.covs.deliver(notification) {
                    log::warn!("COV notification for unknown process id {process_id}");
                }
            }
            SERVICE_WHO_IS => {
                let request = WhoIsRequest::decode_after_header(&mut r)?;
                if request.matches(self.local.device_id) {
                    let apdu = encode_with_growth(|w| self.i_am_request().encode(w))?;
                    self.reply(&peer, src, &apdu).await?;
                }
            }
            SERVICE_WHO_HAS => {
                let request = WhoHasRequest::decode_after_header(&mut r)?;
                if !request.matches_device(self.local.device_id) {
                    return Ok(());
                }
                if let Some((object_id, object_name)) = self.server.who_has(&request.object) {
                    let i_have = IHaveRequest {
                        device_id: self.device_object_id(),
                        object_id,
                        object_name: &object_name,
                    };
                    let apdu = encode_with_growth(|w| i_have.encode(w))?;
                    self.reply(&peer, src, &apdu).await?;
                }
            }
            SERVICE_TIME_SYNCHRONIZATION | SERVICE_UTC_TIME_SYNCHRONIZATION => {
                let request = TimeSynchronizationRequest::decode_after_header(&mut r)?;
                log::info!(
                    "time synchronization from {peer}: {:?} {:?} (utc={})",
                    request.date,
                    request.time,
                    request.utc
                );
            }
            other => log::trace!("ignored unconfirmed service 0x{other:02x} from {peer}"),
        }
        Ok(())
    }

    async fn handle_confirmed(
        self: &Arc<Self>,
        peer: Address,
        src: DataLinkAddress,
        apdu: &[u8],
    ) -> Result<(), ClientError> {
        let mut r = Reader::new(apdu);
        let header = ConfirmedRequestHeader::decode(&mut r)?;
        log::debug!(
            "<- {peer} confirmed service 0x{:02x} invoke {}",
            header.service_choice,
            header.invoke_id
        );
        if header.segmented {
            let abort = AbortPdu {
                server: true,
                invoke_id: header.invoke_id,
                reason: AbortPdu::REASON_SEGMENTATION_NOT_SUPPORTED,
            };
            let reply = encode_with_growth(|w| abort.encode(w))?;
            return self.reply(&peer, src, &reply).await;
        }
        let payload = r.read_exact(r.remaining())?;

        if header.service_choice == SERVICE_CONFIRMED_COV_NOTIFICATION {
            let request = CovNotificationRequest::decode_after_header(&mut Reader::new(payload))?;
            let notification = CovNotification::from_request(peer.clone(), true, request);
            let process_id = notification.subscriber_process_id;
            if !self.covs.deliver(notification) {
                log::warn!("COV notification for unknown process id {process_id}");
            }
            let ack = SimpleAck {
                invoke_id: header.invoke_id,
                service_choice: header.service_choice,
            };
            let reply = encode_with_growth(|w| ack.encode(w))?;
            return self.reply(&peer, src, &reply).await;
        }

        let limit = max_apdu_octets(header.max_apdu).min(usize::from(self.local.max_apdu.octets()));
        let outcome = self.server.handle_confirmed(&peer, &header, payload, limit);
        if !outcome.reply.is_empty() {
            self.reply(&peer, src, &outcome.reply).await?;
        }
        self.notify(outcome.events).await;
        Ok(())
    }

    pub(crate) fn i_am_request(&self) -> IAmRequest {
        IAmRequest {
            device_id: self.device_object_id(),
            max_apdu: u32::from(self.local.max_apdu.octets()),
            segmentation: self.local.segmentation.to_u32(),
            vendor_id: u32::from(self.local.vendor_id),
        }
    }

    /// Sends COV notifications produced by the local server. Confirmed ones
    /// run on their own task so the dispatcher is free to receive the ack.
    pub(crate) async fn notify(self: &Arc<Self>, events: Vec<CovEvent>) {
        for event in events {
            if event.confirmed {
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = shared.send_cov_notification(&event).await {
                        log::warn!("COV notification to {} failed: {e}", event.subscriber);
                    }
                });
            } else if let Err(e) = self.send_cov_notification(&event).await {
                log::warn!("COV notification to {} failed: {e}", event.subscriber);
            }
        }
    }

    async fn send_cov_notification(&self, event: &CovEvent) -> Result<(), ClientError> {
        let request = CovNotificationRequest {
            subscriber_process_id: event.process_id,
            initiating_device_id: self.device_object_id(),
            monitored_object_id: event.object_id,
            time_remaining_seconds: event.time_remaining_seconds,
            values: event
                .values
                .iter()
                .map(|(property_id, value)| WireCovValue {
                    property_id: *property_id,
                    array_index: None,
                    value: value.to_data_value(),
                    priority: None,
                })
                .collect(),
        };
        if event.confirmed {
            self.request(
                &event.subscriber,
                SERVICE_CONFIRMED_COV_NOTIFICATION,
                |w, invoke_id| request.encode(w, Some(invoke_id)),
            )
            .await
            .map(|_| ())
        } else {
            let apdu = encode_with_growth(|w| request.encode(w, None))?;
            self.send_unconfirmed(&event.subscriber, &apdu).await
        }
    }

    /// Data-link target and NPDU for `address`. Replies to a routed peer go
    /// back through the router they came from (`via`).
    fn route(
        &self,
        address: &Address,
        via: Option<DataLinkAddress>,
        expecting_reply: bool,
    ) -> (DataLinkAddress, Npdu) {
        match address.npdu_destination() {
            None => {
                let control = if expecting_reply {
                    CONTROL_EXPECTING_REPLY
                } else {
                    0
                };
                let target = match (address, via) {
                    (Address::Ip(addr), _) => DataLinkAddress::Ip(*addr),
                    (_, Some(via)) => via,
                    _ => self.local.broadcast_addr(),
                };
                (target, Npdu::new(control))
            }
            Some(destination) => {
                let target = via
                    .or_else(|| self.routers.route_for(destination.network))
                    .unwrap_or_else(|| self.local.broadcast_addr());
                (target, Npdu::routed(destination, expecting_reply))
            }
        }
    }

    async fn send_frame(&self, target: DataLinkAddress, frame: &[u8]) -> Result<(), ClientError> {
        let _guard = self.send_lock.lock().await;
        self.datalink.send(target, frame).await?;
        Ok(())
    }

    async fn reply(&self, peer: &Address, src: DataLinkAddress, apdu: &[u8]) -> Result<(), ClientError> {
        let (target, npdu) = self.route(peer, Some(src), false);
        self.send_frame(target, &frame(&npdu, apdu)?).await
    }

    pub(crate) async fn send_unconfirmed(&self, address: &Address, apdu: &[u8]) -> Result<(), ClientError> {
        let (target, npdu) = self.route(address, None, false);
        self.send_frame(target, &frame(&npdu, apdu)?).await
    }

    /// Sends an unconfirmed APDU to `scope`.
    pub(crate) async fn broadcast(&self, apdu: &[u8], scope: &BroadcastScope) -> Result<(), ClientError> {
        match scope {
            BroadcastScope::Local => {
                let bytes = frame(&Npdu::new(0), apdu)?;
                self.send_frame(self.local.broadcast_addr(), &bytes).await
            }
            BroadcastScope::Global => {
                let npdu = Npdu::routed(NpduAddress::broadcast(GLOBAL_NETWORK), false);
                let bytes = frame(&npdu, apdu)?;
                self.send_frame(self.local.broadcast_addr(), &bytes).await
            }
            BroadcastScope::Address(address) => self.send_unconfirmed(address, apdu).await,
        }
    }

    pub(crate) async fn send_network_message(
        &self,
        message: &NetworkMessage,
        target: DataLinkAddress,
    ) -> Result<(), ClientError> {
        let bytes = encode_with_growth(|w| {
            Npdu::network_message(message.message_type()).encode(w)?;
            message.encode(w)
        })?;
        self.send_frame(target, &bytes).await
    }

    fn register(&self, address: &Address) -> Result<(u8, mpsc::UnboundedReceiver<Vec<u8>>), ClientError> {
        let mut pending = lock(&self.pending);
        for _ in 0..=u8::MAX {
            let invoke_id = pending.next_invoke_id;
            pending.next_invoke_id = match invoke_id.wrapping_add(1) {
                0 => 1,
                next => next,
            };
            let key = (address.clone(), invoke_id);
            if !pending.waiters.contains_key(&key) {
                let (tx, rx) = mpsc::unbounded_channel();
                pending.waiters.insert(key, tx);
                return Ok((invoke_id, rx));
            }
        }
        Err(ClientError::TooManyRequests(address.to_string()))
    }

    /// Applies the local segmentation and max-APDU settings to an encoded
    /// confirmed request.
    fn stamp_request_header(&self, apdu: &[u8]) -> Result<Vec<u8>, ClientError> {
        let mut r = Reader::new(apdu);
        let mut header = ConfirmedRequestHeader::decode(&mut r)?;
        let body = r.read_exact(r.remaining())?;
        header.segmented_response_accepted = matches!(
            self.local.segmentation,
            Segmentation::SegmentedBoth | Segmentation::SegmentedReceive
        );
        header.max_apdu = self.local.max_apdu.to_u32() as u8;
        encode_with_growth(|w| {
            header.encode(w)?;
            w.write_all(body)
        })
    }

    /// Sends a confirmed request and waits for its acknowledgement.
    ///
    /// `encode` writes the complete APDU for the invoke id it is given.
    pub(crate) async fn request<F>(
        &self,
        address: &Address,
        service_choice: u8,
        encode: F,
    ) -> Result<Ack, ClientError>
    where
        F: Fn(&mut Writer<'_>, u8) -> Result<(), EncodeError>,
    {
        if matches!(address, Address::RemoteBroadcast(_)) {
            return Err(ClientError::WrongParameter(format!(
                "confirmed request to broadcast address {address}"
            )));
        }
        let tuning = self.tuning();
        let (invoke_id, mut rx) = self.register(address)?;
        let _pending = PendingGuard {
            pending: &self.pending,
            key: (address.clone(), invoke_id),
        };
        let apdu = encode_with_growth(|w| encode(w, invoke_id))?;
        let apdu = self.stamp_request_header(&apdu)?;
        let deadline = Instant::now() + tuning.response_timeout;

        log::debug!("-> {address} service 0x{service_choice:02x} invoke {invoke_id}");
        self.send_confirmed_request(address, &apdu, &mut rx, deadline, &tuning)
            .await?;
        self.await_ack(address, invoke_id, service_choice, &mut rx, deadline)
            .await
    }

    async fn send_segment_ack(
        &self,
        address: &Address,
        invoke_id: u8,
        sequence_number: u8,
        window_size: u8,
    ) -> Result<(), ClientError> {
        let ack = SegmentAck {
            negative_ack: false,
            sent_by_server: false,
            invoke_id,
            sequence_number,
            actual_window_size: window_size,
        };
        let apdu = encode_with_growth(|w| ack.encode(w))?;
        let (target, npdu) = self.route(address, None, false);
        self.send_frame(target, &frame(&npdu, &apdu)?).await
    }

    async fn send_confirmed_request(
        &self,
        address: &Address,
        apdu: &[u8],
        rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        deadline: Instant,
        tuning: &Tuning,
    ) -> Result<(), ClientError> {
        let (target, npdu) = self.route(address, None, true);
        let npdu_bytes = encode_with_growth(|w| npdu.encode(w))?;

        let mut ar = Reader::new(apdu);
        let header = ConfirmedRequestHeader::decode(&mut ar)?;
        let service_payload = ar.read_exact(ar.remaining())?;

        let segment_data_len = max_apdu_octets(header.max_apdu)
            .saturating_sub(5)
            .max(MIN_SEGMENT_DATA_LEN);
        let segment_count = service_payload.len().div_ceil(segment_data_len);

        if segment_count <= 1 {
            let mut tx = npdu_bytes.clone();
            tx.extend_from_slice(apdu);
            return self.send_frame(target, &tx).await;
        }

        if segment_count > usize::from(u8::MAX) + 1 {
            return Err(ClientError::SegmentedRequestTooLarge);
        }

        let configured_window_size = tuning.window_size.max(1);
        let mut window_size = configured_window_size;
        let mut peer_window_ceiling = configured_window_size;
        let mut batch_start = 0usize;
        while batch_start < segment_count {
            let batch_end = (batch_start + usize::from(window_size)).min(segment_count);
            let expected_sequence = (batch_end - 1) as u8;

            let mut frames = Vec::with_capacity(batch_end - batch_start);
            for segment_index in batch_start..batch_end {
                let seq = segment_index as u8;
                let more_follows = segment_index + 1 < segment_count;
                let start = segment_index * segment_data_len;
                let end = ((segment_index + 1) * segment_data_len).min(service_payload.len());
                let segment = &service_payload[start..end];

                let seg_header = ConfirmedRequestHeader {
                    segmented: true,
                    more_follows,
                    sequence_number: Some(seq),
                    proposed_window_size: Some(window_size),
                    ..header
                };
                frames.push(encode_with_growth(|w| {
                    w.write_all(&npdu_bytes)?;
                    seg_header.encode(w)?;
                    w.write_all(segment)
                })?);
            }

            let mut retries_remaining = tuning.retries;
            loop {
                for frame in &frames {
                    self.send_frame(target, frame).await?;
                }

                if batch_end == segment_count {
                    break;
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(ClientError::NoResponseFromController);
                }
                let ack_wait_deadline = Instant::now() + remaining.min(tuning.segment_ack_timeout);
                match await_segment_ack(rx, header.service_choice, expected_sequence, ack_wait_deadline)
                    .await
                {
                    Ok(ack) => {
                        peer_window_ceiling =
                            peer_window_ceiling.min(ack.actual_window_size.max(1));
                        window_size = window_size
                            .saturating_add(1)
                            .min(configured_window_size)
                            .min(peer_window_ceiling)
                            .max(1);
                        break;
                    }
                    Err(
                        ClientError::NoResponseFromController
                        | ClientError::SegmentNegativeAck { .. },
                    ) if retries_remaining > 0 => {
                        retries_remaining -= 1;
                        window_size = window_size.saturating_div(2).max(1);
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            batch_start = batch_end;
        }

        Ok(())
    }

    async fn await_ack(
        &self,
        address: &Address,
        invoke_id: u8,
        service_choice: u8,
        rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        deadline: Instant,
    ) -> Result<Ack, ClientError> {
        loop {
            let apdu = next_apdu(rx, deadline).await?;
            let Some(&first) = apdu.first() else {
                continue;
            };
            match ApduType::from_u8(first >> 4) {
                Some(ApduType::SimpleAck) => {
                    let ack = SimpleAck::decode(&mut Reader::new(&apdu))?;
                    if ack.service_choice == service_choice {
                        return Ok(Ack::Simple);
                    }
                }
                Some(ApduType::ComplexAck) => {
                    let mut r = Reader::new(&apdu);
                    let header = ComplexAckHeader::decode(&mut r)?;
                    if header.service_choice != service_choice {
                        continue;
                    }
                    let first_payload = r.read_exact(r.remaining())?;
                    return self
                        .collect_complex_ack_payload(
                            address,
                            invoke_id,
                            service_choice,
                            header,
                            first_payload,
                            rx,
                            deadline,
                        )
                        .await
                        .map(Ack::Complex);
                }
                _ => {
                    if let Some(err) = failure(&apdu, service_choice)? {
                        return Err(err);
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn collect_complex_ack_payload(
        &self,
        address: &Address,
        invoke_id: u8,
        service_choice: u8,
        first_header: ComplexAckHeader,
        first_payload: &[u8],
        rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
        deadline: Instant,
    ) -> Result<Vec<u8>, ClientError> {
        let mut payload = first_payload.to_vec();
        if payload.len() > MAX_COMPLEX_ACK_REASSEMBLY_BYTES {
            return Err(ClientError::ResponseTooLarge {
                limit: MAX_COMPLEX_ACK_REASSEMBLY_BYTES,
            });
        }
        if !first_header.segmented {
            return Ok(payload);
        }

        let mut last_seq = first_header
            .sequence_number
            .ok_or(ClientError::UnsupportedResponse)?;
        let mut window_size = first_header.proposed_window_size.unwrap_or(1);
        self.send_segment_ack(address, invoke_id, last_seq, window_size)
            .await?;
        let mut more_follows = first_header.more_follows;

        while more_follows {
            let apdu = next_apdu(rx, deadline).await?;
            let Some(&first) = apdu.first() else {
                continue;
            };
            match ApduType::from_u8(first >> 4) {
                Some(ApduType::ComplexAck) => {
                    let mut r = Reader::new(&apdu);
                    let seg = ComplexAckHeader::decode(&mut r)?;
                    if seg.service_choice != service_choice {
                        continue;
                    }
                    if !seg.segmented {
                        return Err(ClientError::UnsupportedResponse);
                    }
                    let seq = seg
                        .sequence_number
                        .ok_or(ClientError::UnsupportedResponse)?;
                    if seq == last_seq {
                        // Duplicate segment: acknowledge again and keep waiting.
                        self.send_segment_ack(address, invoke_id, last_seq, window_size)
                            .await?;
                        continue;
                    }
                    if seq != last_seq.wrapping_add(1) {
                        continue;
                    }

                    let seg_payload = r.read_exact(r.remaining())?;
                    if payload.len().saturating_add(seg_payload.len())
                        > MAX_COMPLEX_ACK_REASSEMBLY_BYTES
                    {
                        return Err(ClientError::ResponseTooLarge {
                            limit: MAX_COMPLEX_ACK_REASSEMBLY_BYTES,
                        });
                    }
                    payload.extend_from_slice(seg_payload);

                    last_seq = seq;
                    more_follows = seg.more_follows;
                    window_size = seg.proposed_window_size.unwrap_or(window_size);
                    self.send_segment_ack(address, invoke_id, last_seq, window_size)
                        .await?;
                }
                _ => {
                    if let Some(err) = failure(&apdu, service_choice)? {
                        return Err(err);
                    }
                }
            }
        }

        Ok(payload)
    }

    /// Broadcasts Who-Is and collects I-Am replies for `wait`.
    pub(crate) async fn who_is(
        &self,
        range: Option<(u32, u32)>,
        scope: &BroadcastScope,
        wait: Duration,
    ) -> Result<Vec<DiscoveredDevice>, ClientError> {
        let request = match range {
            Some((low, high)) => WhoIsRequest {
                low_limit: Some(low),
                high_limit: Some(high),
            },
            None => WhoIsRequest::global(),
        };
        let mut unsolicited = self.subscribe_unsolicited();
        let apdu = encode_with_growth(|w| request.encode(w))?;
        self.broadcast(&apdu, scope).await?;

        let mut devices = Vec::new();
        let mut seen = HashSet::new();
        let deadline = Instant::now() + wait;
        while let Some(message) = next_unsolicited(&mut unsolicited, deadline).await {
            let Unsolicited::IAm(device) = message else {
                continue;
            };
            if device.device_id == self.local.device_id || !request.matches(device.device_id) {
                continue;
            }
            if seen.insert((device.address.clone(), device.device_id)) {
                devices.push(device);
            }
        }
        devices.sort_by(|a, b| (a.device_id, &a.address).cmp(&(b.device_id, &b.address)));
        Ok(devices)
    }

    pub(crate) async fn who_has(
        &self,
        request: &WhoHasRequest<'_>,
        scope: &BroadcastScope,
        wait: Duration,
    ) -> Result<Vec<DiscoveredObject>, ClientError> {
        let mut unsolicited = self.subscribe_unsolicited();
        let apdu = encode_with_growth(|w| request.encode(w))?;
        self.broadcast(&apdu, scope).await?;

        let mut objects = Vec::new();
        let mut seen = HashSet::new();
        let deadline = Instant::now() + wait;
        while let Some(message) = next_unsolicited(&mut unsolicited, deadline).await {
            let Unsolicited::IHave(object) = message else {
                continue;
            };
            if seen.insert((object.address.clone(), object.object_id)) {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Broadcasts Who-Is-Router-To-Network and collects router replies.
    pub(crate) async fn who_is_router_to_network(
        &self,
        network: Option<u16>,
        wait: Duration,
    ) -> Result<Vec<(DataLinkAddress, Vec<u16>)>, ClientError> {
        let mut unsolicited = self.subscribe_unsolicited();
        let message = NetworkMessage::WhoIsRouterToNetwork(network);
        debug_assert_eq!(message.message_type(), MESSAGE_WHO_IS_ROUTER_TO_NETWORK);
        self.send_network_message(&message, self.local.broadcast_addr())
            .await?;

        let mut routers: Vec<(DataLinkAddress, Vec<u16>)> = Vec::new();
        let deadline = Instant::now() + wait;
        while let Some(message) = next_unsolicited(&mut unsolicited, deadline).await {
            let Unsolicited::IAmRouter { router, networks } = message else {
                continue;
            };
            match routers.iter_mut().find(|(known, _)| *known == router) {
                Some((_, known)) => {
                    known.extend(networks);
                    known.sort_unstable();
                    known.dedup();
                }
                None => routers.push((router, networks)),
            }
        }
        Ok(routers)
    }
}

impl Shared<BacnetIpTransport> {
    /// Re-registers with the BBMD every `ttl / 2` seconds until aborted.
    pub(crate) fn spawn_foreign_renewal(self: &Arc<Self>, ttl_seconds: u16) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        let period = Duration::from_secs(u64::from(ttl_seconds.max(2) / 2));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = shared
                    .datalink
                    .register_foreign_device_no_wait(ttl_seconds)
                    .await
                {
                    log::warn!("foreign device renewal failed: {e}");
                }
            }
        })
    }
}

async fn next_apdu(
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    deadline: Instant,
) -> Result<Vec<u8>, ClientError> {
    match timeout_at(deadline, rx.recv()).await {
        Ok(Some(apdu)) => Ok(apdu),
        Ok(None) | Err(_) => Err(ClientError::NoResponseFromController),
    }
}

async fn next_unsolicited(
    rx: &mut broadcast::Receiver<Unsolicited>,
    deadline: Instant,
) -> Option<Unsolicited> {
    loop {
        match timeout_at(deadline, rx.recv()).await {
            Ok(Ok(message)) => return Some(message),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                log::warn!("missed {skipped} unsolicited messages");
            }
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return None,
        }
    }
}

async fn await_segment_ack(
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    service_choice: u8,
    expected_sequence: u8,
    deadline: Instant,
) -> Result<SegmentAck, ClientError> {
    loop {
        let apdu = next_apdu(rx, deadline).await?;
        let Some(&first) = apdu.first() else {
            continue;
        };
        if ApduType::from_u8(first >> 4) == Some(ApduType::SegmentAck) {
            let ack = SegmentAck::decode(&mut Reader::new(&apdu))?;
            if !ack.sent_by_server {
                continue;
            }
            if ack.negative_ack {
                return Err(ClientError::SegmentNegativeAck {
                    sequence_number: ack.sequence_number,
                });
            }
            if ack.sequence_number == expected_sequence {
                return Ok(ack);
            }
        } else if let Some(err) = failure(&apdu, service_choice)? {
            return Err(err);
        }
    }
}

/// Maps an Error, Reject or Abort PDU to the client error it stands for.
fn failure(apdu: &[u8], service_choice: u8) -> Result<Option<ClientError>, ClientError> {
    let Some(&first) = apdu.first() else {
        return Ok(None);
    };
    let mut r = Reader::new(apdu);
    Ok(match ApduType::from_u8(first >> 4) {
        Some(ApduType::Error) => {
            let err = BacnetError::decode(&mut r)?;
            (err.service_choice == service_choice).then(|| remote_service_error(err))
        }
        Some(ApduType::Reject) => Some(reject_error(RejectPdu::decode(&mut r)?.reason)),
        Some(ApduType::Abort) => {
            let abort = AbortPdu::decode(&mut r)?;
            Some(abort_error(abort.reason, abort.server))
        }
        _ => None,
    })
}

pub(crate) fn remote_service_error(err: BacnetError) -> ClientError {
    match err.error_code.and_then(ErrorCode::from_u32) {
        Some(ErrorCode::UnknownObject) => ClientError::UnknownObject,
        Some(ErrorCode::UnknownProperty) => ClientError::UnknownProperty,
        Some(ErrorCode::WriteAccessDenied) => ClientError::WriteAccessDenied,
        error_code => ClientError::RemoteServiceError {
            service_choice: err.service_choice,
            error_class_raw: err.error_class,
            error_code_raw: err.error_code,
            error_class: err.error_class.and_then(ErrorClass::from_u32),
            error_code,
        },
    }
}

fn reject_error(reason: u8) -> ClientError {
    match reason {
        RejectPdu::REASON_UNRECOGNIZED_SERVICE => ClientError::UnrecognizedService,
        RejectPdu::REASON_BUFFER_OVERFLOW => ClientError::BufferOverflow,
        reason => ClientError::RemoteReject { reason },
    }
}

fn abort_error(reason: u8, server: bool) -> ClientError {
    match reason {
        AbortPdu::REASON_SEGMENTATION_NOT_SUPPORTED => ClientError::SegmentationNotSupported,
        AbortPdu::REASON_BUFFER_OVERFLOW => ClientError::BufferOverflow,
        reason => ClientError::RemoteAbort { reason, server },
    }
}

pub(crate) fn encode_with_growth<F>(mut encode: F) -> Result<Vec<u8>, ClientError>
where
    F: FnMut(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    for size in [512usize, 1024, 2048, 4096, 8192, 16_384, 32_768, 65_536] {
        let mut buf = vec![0u8; size];
        let mut w = Writer::new(&mut buf);
        match encode(&mut w) {
            Ok(()) => {
                let written_len = w.as_written().len();
                buf.truncate(written_len);
                return Ok(buf);
            }
            Err(EncodeError::BufferTooSmall) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ClientError::SegmentedRequestTooLarge)
}

fn frame(npdu: &Npdu, apdu: &[u8]) -> Result<Vec<u8>, ClientError> {
    encode_with_growth(|w| {
        npdu.encode(w)?;
        w.write_all(apdu)
    })
}

pub(crate) const fn max_apdu_octets(max_apdu_code: u8) -> usize {
    match max_apdu_code & 0x0f {
        0 => 50,
        1 => 128,
        2 => 206,
        3 => 480,
        4 => 1024,
        5 => 1476,
        _ => 480,
    }
}
