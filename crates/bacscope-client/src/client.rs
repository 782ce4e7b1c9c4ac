use crate::cov::{CovCallback, CovSubscription};
use crate::discovery::{DiscoveredDevice, DiscoveredObject};
use crate::engine::{encode_with_growth, remote_service_error, BroadcastScope, Shared};
use crate::request::{ReadMultipleRequest, ReadRequest, WriteRequest};
use crate::schedule::{
    decode_date_list, decode_weekly_schedule, encode_date_list, encode_weekly_schedule,
    CalendarEntry, EventParameters, ObjectPropertyReference, TimeValue,
};
use crate::server::factory::ObjectConfig;
use crate::server::objects::{LocalObject, PRIORITY_SLOTS};
use crate::server::vendor::VendorInfo;
use crate::server::LocalServer;
use crate::value::bacnet_date_time;
use crate::{Address, ClientDataValue, ClientError, LocalDevice, RouterTable};
use bacscope_core::apdu::BacnetError;
use bacscope_core::encoding::reader::Reader;
use bacscope_core::services::device_management::{
    DeviceCommunicationControlRequest, DeviceCommunicationState, ReinitializeDeviceRequest,
    ReinitializeState, SERVICE_DEVICE_COMMUNICATION_CONTROL, SERVICE_REINITIALIZE_DEVICE,
};
use bacscope_core::services::read_property::{ReadPropertyAck, ReadPropertyRequest, SERVICE_READ_PROPERTY};
use bacscope_core::services::read_property_multiple::{
    PropertyReference, ReadAccessSpecification, ReadPropertyMultipleAck, ReadPropertyMultipleRequest,
    ReadResult, SERVICE_READ_PROPERTY_MULTIPLE,
};
use bacscope_core::services::read_range::{
    LogRecord, ReadRangeAck, ReadRangeRequest, ReadRangeSpecifier, ResultFlags, SERVICE_READ_RANGE,
};
use bacscope_core::services::subscribe_cov::{SubscribeCovRequest, SERVICE_SUBSCRIBE_COV};
use bacscope_core::services::time_synchronization::TimeSynchronizationRequest;
use bacscope_core::services::who_has::WhoHasRequest;
use bacscope_core::services::write_property::{WritePropertyRequest, SERVICE_WRITE_PROPERTY};
use bacscope_core::types::{ObjectId, ObjectType, PropertyId};
use bacscope_core::DecodeError;
use bacscope_datalink::{
    BacnetIpTransport, BroadcastDistributionEntry, DataLink, DataLinkAddress, DataLinkError,
    ForeignDeviceTableEntry,
};
use chrono::{Local, Utc};
use std::fmt;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Priority used for event-enrollment writes.
const EVENT_ENROLLMENT_PRIORITY: u8 = 15;

/// One property of a ReadPropertyMultiple answer.
#[derive(Debug)]
pub struct PropertyValue {
    pub property: PropertyId,
    pub array_index: Option<u32>,
    /// The value, or the error the peer reported for this property alone.
    pub value: Result<ClientDataValue, ClientError>,
}

/// The properties read for one object.
#[derive(Debug)]
pub struct ObjectValues {
    pub object_id: ObjectId,
    pub values: Vec<PropertyValue>,
}

impl ObjectValues {
    pub fn get(&self, property: PropertyId) -> Option<&ClientDataValue> {
        self.values
            .iter()
            .find(|v| v.property == property)
            .and_then(|v| v.value.as_ref().ok())
    }
}

/// Decoded ReadRange answer over a log buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRangeResult {
    pub flags: ResultFlags,
    pub item_count: u32,
    pub first_sequence_number: Option<u32>,
    pub records: Vec<LogRecord>,
}

/// A BACnet client bound to one data link, with its local server.
///
/// Dropping the client stops its receive loop and any foreign-device renewal.
pub struct BacnetClient<D: DataLink + 'static> {
    shared: Arc<Shared<D>>,
    dispatcher: JoinHandle<()>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl<D: DataLink + 'static> fmt::Debug for BacnetClient<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BacnetClient")
            .field("device_id", &self.shared.local.device_id)
            .field("object_name", &self.shared.local.object_name)
            .finish_non_exhaustive()
    }
}

impl<D: DataLink + 'static> Drop for BacnetClient<D> {
    fn drop(&mut self) {
        self.dispatcher.abort();
        if let Some(renewal) = self.take_renewal() {
            renewal.abort();
        }
    }
}

impl BacnetClient<BacnetIpTransport> {
    /// Binds the UDP socket described by `local`, serves its BDT when one is
    /// configured and registers with its BBMD when one is given.
    pub async fn bind(local: LocalDevice) -> Result<Self, ClientError> {
        let bind_addr = local.bind_addr();
        let datalink = BacnetIpTransport::bind(bind_addr).await.map_err(|e| match e {
            DataLinkError::Io(io) if io.kind() == std::io::ErrorKind::AddrInUse => {
                ClientError::InitializationError(format!("{bind_addr} is already in use"))
            }
            other => ClientError::InitializationError(format!("cannot bind {bind_addr}: {other}")),
        })?;
        log::info!(
            "device {} ({}) listening on {bind_addr}",
            local.device_id,
            local.object_name
        );

        let foreign = local.foreign;
        let bdt = local.bdt.clone();
        let client = Self::with_datalink(datalink, local);
        if !bdt.is_empty() {
            client.populate_bdt(bdt).await;
        }
        if let Some(foreign) = foreign {
            client.register_foreign(foreign.bbmd, foreign.ttl_seconds).await?;
        }
        Ok(client)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.shared.datalink.local_addr()?)
    }

    /// Registers with `bbmd` and keeps the registration alive every `ttl / 2`.
    pub async fn register_foreign(&self, bbmd: SocketAddr, ttl_seconds: u16) -> Result<(), ClientError> {
        self.shared.datalink.set_bbmd(Some(bbmd)).await;
        self.shared.datalink.register_foreign_device(ttl_seconds).await?;
        let renewal = self.shared.spawn_foreign_renewal(ttl_seconds);
        if let Some(previous) = self.replace_renewal(Some(renewal)) {
            previous.abort();
        }
        log::info!("foreign device of {bbmd} (ttl {ttl_seconds}s)");
        Ok(())
    }

    /// Stops renewal and removes our entry from the BBMD's foreign device table.
    pub async fn unregister_foreign(&self) -> Result<(), ClientError> {
        if let Some(renewal) = self.take_renewal() {
            renewal.abort();
        }
        if self.shared.datalink.bbmd_addr().await.is_none() {
            return Ok(());
        }
        if let Ok(SocketAddr::V4(local)) = self.shared.datalink.local_addr() {
            if !local.ip().is_unspecified() {
                if let Err(e) = self.shared.datalink.delete_foreign_device_table_entry(local).await {
                    log::warn!("cannot delete FDT entry for {local}: {e}");
                }
            }
        }
        self.shared.datalink.unregister_foreign_device().await?;
        Ok(())
    }

    /// Serves `entries` as this node's broadcast distribution table.
    pub async fn populate_bdt(&self, entries: Vec<BroadcastDistributionEntry>) {
        self.shared.datalink.populate_bdt(entries).await;
    }

    pub async fn read_bdt(&self) -> Result<Vec<BroadcastDistributionEntry>, ClientError> {
        Ok(self.shared.datalink.read_broadcast_distribution_table().await?)
    }

    pub async fn read_fdt(&self) -> Result<Vec<ForeignDeviceTableEntry>, ClientError> {
        Ok(self.shared.datalink.read_foreign_device_table().await?)
    }

    pub async fn delete_fdt_entry(&self, address: SocketAddrV4) -> Result<(), ClientError> {
        Ok(self.shared.datalink.delete_foreign_device_table_entry(address).await?)
    }
}

impl<D: DataLink + 'static> BacnetClient<D> {
    /// Starts a client over any data link. Must be called inside a tokio runtime.
    pub fn with_datalink(datalink: D, local: LocalDevice) -> Self {
        let shared = Arc::new(Shared::new(datalink, local));
        let dispatcher = shared.spawn_dispatcher();
        Self {
            shared,
            dispatcher,
            renewal: Mutex::new(None),
        }
    }

    pub fn with_response_timeout(self, timeout: Duration) -> Self {
        self.shared.set_tuning(|t| t.response_timeout = timeout);
        self
    }

    pub fn with_segmented_request_window_size(self, window_size: u8) -> Self {
        self.shared.set_tuning(|t| t.window_size = window_size.max(1));
        self
    }

    pub fn with_segmented_request_retries(self, retries: u8) -> Self {
        self.shared.set_tuning(|t| t.retries = retries);
        self
    }

    pub fn with_segment_ack_timeout(self, timeout: Duration) -> Self {
        self.shared.set_tuning(|t| t.segment_ack_timeout = timeout);
        self
    }

    pub fn with_discovery_wait(self, wait: Duration) -> Self {
        self.shared.set_tuning(|t| t.discovery_wait = wait);
        self
    }

    fn replace_renewal(&self, next: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut renewal = self.renewal.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *renewal, next)
    }

    fn take_renewal(&self) -> Option<JoinHandle<()>> {
        self.replace_renewal(None)
    }

    pub fn local_device(&self) -> &LocalDevice {
        &self.shared.local
    }

    pub fn response_timeout(&self) -> Duration {
        self.shared.tuning().response_timeout
    }

    /// The objects this client serves to the network.
    pub fn server(&self) -> &LocalServer {
        &self.shared.server
    }

    pub fn routers(&self) -> &RouterTable {
        &self.shared.routers
    }

    /// Adds a static route: `dnets` are reachable through `router`, which
    /// sits on `snet`.
    pub fn update_router_references(&self, snet: u16, router: DataLinkAddress, dnets: &[u16]) {
        self.shared.routers.update_router_references(snet, router, dnets);
    }

    /// `read ADDR OBJ_TYPE OBJ_INST PROP_ID [ARRAY_INDEX]`
    pub async fn read(&self, request: &str) -> Result<ClientDataValue, ClientError> {
        let request: ReadRequest = request.parse()?;
        self.read_request(&request).await
    }

    pub async fn read_request(&self, request: &ReadRequest) -> Result<ClientDataValue, ClientError> {
        self.read_property(&request.address, request.object_id, request.property, request.array_index)
            .await
    }

    pub async fn read_property(
        &self,
        address: &Address,
        object_id: ObjectId,
        property: PropertyId,
        array_index: Option<u32>,
    ) -> Result<ClientDataValue, ClientError> {
        let ack = self
            .shared
            .request(address, SERVICE_READ_PROPERTY, |w, invoke_id| {
                ReadPropertyRequest {
                    object_id,
                    property_id: property,
                    array_index,
                    invoke_id,
                }
                .encode(w)
            })
            .await?;
        let payload = ack.into_payload()?;
        let mut r = Reader::new(&payload);
        let parsed = ReadPropertyAck::decode_after_header(&mut r)?;
        Ok(parsed.value.into())
    }

    /// `readMulti ADDR ( OBJ_TYPE OBJ_INST (PROP_ID [ARRAY_INDEX])+ )+`
    pub async fn read_multiple(&self, request: &str) -> Result<Vec<ObjectValues>, ClientError> {
        let request: ReadMultipleRequest = request.parse()?;
        self.read_multiple_request(&request).await
    }

    pub async fn read_multiple_request(&self, request: &ReadMultipleRequest) -> Result<Vec<ObjectValues>, ClientError> {
        let references: Vec<Vec<PropertyReference>> = request
            .objects
            .iter()
            .map(|object| {
                object
                    .properties
                    .iter()
                    .map(|(property_id, array_index)| PropertyReference {
                        property_id: *property_id,
                        array_index: *array_index,
                    })
                    .collect()
            })
            .collect();
        let specs: Vec<ReadAccessSpecification<'_>> = request
            .objects
            .iter()
            .zip(&references)
            .map(|(object, properties)| ReadAccessSpecification {
                object_id: object.object_id,
                properties,
            })
            .collect();

        let ack = self
            .shared
            .request(&request.address, SERVICE_READ_PROPERTY_MULTIPLE, |w, invoke_id| {
                ReadPropertyMultipleRequest { specs: &specs, invoke_id }.encode(w)
            })
            .await?;
        let payload = ack.into_payload()?;
        let mut r = Reader::new(&payload);
        let parsed = ReadPropertyMultipleAck::decode_after_header(&mut r)?;

        Ok(parsed
            .results
            .into_iter()
            .map(|access| ObjectValues {
                object_id: access.object_id,
                values: access
                    .results
                    .into_iter()
                    .map(|element| PropertyValue {
                        property: element.property_id,
                        array_index: element.array_index,
                        value: match element.result {
                            ReadResult::Value(value) => Ok(value.into()),
                            ReadResult::Error { error_class, error_code } => Err(remote_service_error(BacnetError {
                                invoke_id: 0,
                                service_choice: SERVICE_READ_PROPERTY_MULTIPLE,
                                error_class: Some(error_class),
                                error_code: Some(error_code),
                            })),
                        },
                    })
                    .collect(),
            })
            .collect())
    }

    /// `write ADDR OBJ_TYPE OBJ_INST PROP_ID VALUE [ARRAY_INDEX | '-'] [PRIORITY]`
    pub async fn write(&self, request: &str) -> Result<(), ClientError> {
        let request: WriteRequest = request.parse()?;
        self.write_request(&request).await
    }

    pub async fn write_request(&self, request: &WriteRequest) -> Result<(), ClientError> {
        let value = self.cast_write(request)?;
        self.write_property(
            &request.address,
            request.object_id,
            request.property,
            &value,
            request.array_index,
            request.priority,
        )
        .await
    }

    /// The wire value of `request`. Proprietary properties take the datatype
    /// the target's vendor registered; an unknown vendor leaves the literal as parsed.
    fn cast_write(&self, request: &WriteRequest) -> Result<ClientDataValue, ClientError> {
        let datatype = match request.property {
            PropertyId::Proprietary(_) => request
                .vendor_id
                .or_else(|| self.shared.peer_vendor(&request.address))
                .and_then(|vendor| u16::try_from(vendor).ok())
                .and_then(|vendor| self.shared.server.vendors().datatype(vendor, request.property)),
            _ => None,
        };
        request.value.cast(request.object_id.object_type(), request.property, datatype)
    }

    /// Records the vendor of the device at `address`, as read from its
    /// vendorIdentifier, for later proprietary writes.
    pub fn remember_vendor(&self, address: &Address, vendor_id: u32) {
        self.shared.remember_vendor(address.clone(), vendor_id);
    }

    pub async fn write_property(
        &self,
        address: &Address,
        object_id: ObjectId,
        property: PropertyId,
        value: &ClientDataValue,
        array_index: Option<u32>,
        priority: Option<u8>,
    ) -> Result<(), ClientError> {
        let value = value.to_data_value();
        self.shared
            .request(address, SERVICE_WRITE_PROPERTY, |w, invoke_id| {
                WritePropertyRequest {
                    object_id,
                    property_id: property,
                    value: value.clone(),
                    array_index,
                    priority,
                    invoke_id,
                }
                .encode(w)
            })
            .await?;
        Ok(())
    }

    /// The 16 slots of a commandable object's priority array, `None` where
    /// relinquished. Falls back to indexed reads when the whole array does
    /// not fit in one unsegmented answer.
    pub async fn read_priority_array(
        &self,
        address: &Address,
        object_id: ObjectId,
    ) -> Result<Vec<Option<ClientDataValue>>, ClientError> {
        let slot = |value: &ClientDataValue| (!value.is_null()).then(|| value.clone());
        match self
            .read_property(address, object_id, PropertyId::PriorityArray, None)
            .await
        {
            Ok(value) => Ok(value.elements().iter().map(slot).collect()),
            Err(ClientError::SegmentationNotSupported | ClientError::BufferOverflow) => {
                let mut slots = Vec::with_capacity(PRIORITY_SLOTS);
                for index in 1..=PRIORITY_SLOTS as u32 {
                    let value = self
                        .read_property(address, object_id, PropertyId::PriorityArray, Some(index))
                        .await?;
                    slots.push(slot(&value));
                }
                Ok(slots)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn read_range(
        &self,
        address: &Address,
        object_id: ObjectId,
        range: ReadRangeSpecifier,
    ) -> Result<ReadRangeResult, ClientError> {
        let ack = self
            .shared
            .request(address, SERVICE_READ_RANGE, |w, invoke_id| {
                ReadRangeRequest {
                    object_id,
                    property_id: PropertyId::LogBuffer,
                    array_index: None,
                    range,
                    invoke_id,
                }
                .encode(w)
            })
            .await?;
        let payload = ack.into_payload()?;
        let mut r = Reader::new(&payload);
        let parsed = ReadRangeAck::decode_after_header(&mut r)?;
        Ok(ReadRangeResult {
            flags: ResultFlags::from_octet(parsed.result_flags.data.first().copied().unwrap_or(0)),
            item_count: parsed.item_count,
            first_sequence_number: parsed.first_sequence_number,
            records: parsed.log_records()?,
        })
    }

    /// Global Who-Is; `range` limits the device instances that answer.
    pub async fn who_is(&self, range: Option<(u32, u32)>) -> Result<Vec<DiscoveredDevice>, ClientError> {
        self.who_is_scoped(range, &BroadcastScope::Global).await
    }

    pub async fn who_is_scoped(
        &self,
        range: Option<(u32, u32)>,
        scope: &BroadcastScope,
    ) -> Result<Vec<DiscoveredDevice>, ClientError> {
        if let Some((low, high)) = range {
            if low > high {
                return Err(ClientError::WrongParameter(format!("who-is range {low}..{high}")));
            }
        }
        let wait = self.shared.tuning().discovery_wait;
        self.shared.who_is(range, scope, wait).await
    }

    pub async fn who_has_object_id(
        &self,
        object_id: ObjectId,
        scope: &BroadcastScope,
    ) -> Result<Vec<DiscoveredObject>, ClientError> {
        let wait = self.shared.tuning().discovery_wait;
        self.shared
            .who_has(&WhoHasRequest::for_object_id(object_id), scope, wait)
            .await
    }

    pub async fn who_has_object_name(
        &self,
        name: &str,
        scope: &BroadcastScope,
    ) -> Result<Vec<DiscoveredObject>, ClientError> {
        let wait = self.shared.tuning().discovery_wait;
        self.shared
            .who_has(&WhoHasRequest::for_object_name(name), scope, wait)
            .await
    }

    /// Broadcasts the local device's I-Am.
    pub async fn i_am(&self) -> Result<(), ClientError> {
        let request = self.shared.i_am_request();
        let apdu = encode_with_growth(|w| request.encode(w))?;
        self.shared.broadcast(&apdu, &BroadcastScope::Global).await
    }

    /// Sends the current clock, to `address` or as a global broadcast.
    pub async fn time_sync(&self, address: Option<&Address>, utc: bool) -> Result<(), ClientError> {
        let now = if utc {
            Utc::now().naive_utc()
        } else {
            Local::now().naive_local()
        };
        let (date, time) = bacnet_date_time(now);
        let request = if utc {
            TimeSynchronizationRequest::utc(date, time)
        } else {
            TimeSynchronizationRequest::local(date, time)
        };
        let apdu = encode_with_growth(|w| request.encode(w))?;
        match address {
            Some(address) => self.shared.send_unconfirmed(address, &apdu).await,
            None => self.shared.broadcast(&apdu, &BroadcastScope::Global).await,
        }
    }

    /// Routers that answered, with the networks each reaches. Answers also
    /// feed the router table.
    pub async fn who_is_router_to_network(
        &self,
        network: Option<u16>,
    ) -> Result<Vec<(DataLinkAddress, Vec<u16>)>, ClientError> {
        let wait = self.shared.tuning().discovery_wait;
        self.shared.who_is_router_to_network(network, wait).await
    }

    /// Global Who-Is plus a directed Who-Is on every network in `networks`,
    /// or on every network a router announces when `networks` is `None`.
    pub async fn discover(
        &self,
        networks: Option<&[u16]>,
        limits: Option<(u32, u32)>,
    ) -> Result<Vec<DiscoveredDevice>, ClientError> {
        let networks: Vec<u16> = match networks {
            Some(networks) => networks.to_vec(),
            None => {
                let mut networks: Vec<u16> = self
                    .who_is_router_to_network(None)
                    .await?
                    .into_iter()
                    .flat_map(|(_, networks)| networks)
                    .collect();
                networks.sort_unstable();
                networks.dedup();
                networks
            }
        };
        log::info!("discovering devices on the local network and {} remote networks", networks.len());

        let mut devices = self.who_is(limits).await?;
        for network in networks {
            let scope = BroadcastScope::Address(Address::RemoteBroadcast(network));
            for device in self.who_is_scoped(limits, &scope).await? {
                if !devices
                    .iter()
                    .any(|d| d.device_id == device.device_id && d.address == device.address)
                {
                    devices.push(device);
                }
            }
        }
        devices.sort_by_key(|d| d.device_id);
        Ok(devices)
    }

    /// DeviceCommunicationControl; `duration_minutes` of `None` means until told otherwise.
    pub async fn dcc(
        &self,
        address: &Address,
        duration_minutes: Option<u16>,
        state: DeviceCommunicationState,
        password: Option<&str>,
    ) -> Result<(), ClientError> {
        self.shared
            .request(address, SERVICE_DEVICE_COMMUNICATION_CONTROL, |w, invoke_id| {
                DeviceCommunicationControlRequest {
                    time_duration_minutes: duration_minutes,
                    enable_disable: state,
                    password,
                    invoke_id,
                }
                .encode(w)
            })
            .await?;
        log::info!("{address}: communication control {state:?}");
        Ok(())
    }

    pub async fn reinitialize(
        &self,
        address: &Address,
        state: ReinitializeState,
        password: Option<&str>,
    ) -> Result<(), ClientError> {
        self.shared
            .request(address, SERVICE_REINITIALIZE_DEVICE, |w, invoke_id| {
                ReinitializeDeviceRequest {
                    state,
                    password,
                    invoke_id,
                }
                .encode(w)
            })
            .await?;
        log::info!("{address}: reinitialize {state:?}");
        Ok(())
    }

    pub async fn read_weekly_schedule(
        &self,
        address: &Address,
        instance: u32,
    ) -> Result<Vec<Vec<TimeValue>>, ClientError> {
        let schedule = ObjectId::new(ObjectType::Schedule, instance);
        let value = self
            .read_property(address, schedule, PropertyId::WeeklySchedule, None)
            .await?;
        decode_weekly_schedule(&value).ok_or(ClientError::Decode(DecodeError::InvalidValue))
    }

    pub async fn write_weekly_schedule(
        &self,
        address: &Address,
        instance: u32,
        week: &[Vec<TimeValue>],
    ) -> Result<(), ClientError> {
        let schedule = ObjectId::new(ObjectType::Schedule, instance);
        let value = encode_weekly_schedule(week);
        self.write_property(address, schedule, PropertyId::WeeklySchedule, &value, None, None)
            .await
    }

    pub async fn read_calendar_date_list(
        &self,
        address: &Address,
        instance: u32,
    ) -> Result<Vec<CalendarEntry>, ClientError> {
        let calendar = ObjectId::new(ObjectType::Calendar, instance);
        let value = self
            .read_property(address, calendar, PropertyId::DateList, None)
            .await?;
        decode_date_list(&value).ok_or(ClientError::Decode(DecodeError::InvalidValue))
    }

    pub async fn write_calendar_date_list(
        &self,
        address: &Address,
        instance: u32,
        entries: &[CalendarEntry],
    ) -> Result<(), ClientError> {
        let calendar = ObjectId::new(ObjectType::Calendar, instance);
        let value = encode_date_list(entries);
        self.write_property(address, calendar, PropertyId::DateList, &value, None, None)
            .await
    }

    pub async fn write_object_property_reference(
        &self,
        address: &Address,
        instance: u32,
        reference: &ObjectPropertyReference,
    ) -> Result<(), ClientError> {
        let enrollment = ObjectId::new(ObjectType::EventEnrollment, instance);
        self.write_property(
            address,
            enrollment,
            PropertyId::ObjectPropertyReference,
            &reference.to_value(),
            None,
            Some(EVENT_ENROLLMENT_PRIORITY),
        )
        .await
    }

    pub async fn write_event_parameters(
        &self,
        address: &Address,
        instance: u32,
        parameters: &EventParameters,
    ) -> Result<(), ClientError> {
        let enrollment = ObjectId::new(ObjectType::EventEnrollment, instance);
        self.write_property(
            address,
            enrollment,
            PropertyId::EventParameters,
            &parameters.to_value(),
            None,
            Some(EVENT_ENROLLMENT_PRIORITY),
        )
        .await
    }

    /// Subscribes to COV on `object_id`. `lifetime_seconds` of 0 is
    /// indefinite; otherwise renewing before expiry is up to the caller.
    pub async fn subscribe_cov(
        &self,
        address: &Address,
        object_id: ObjectId,
        lifetime_seconds: u32,
        confirmed: bool,
        callback: CovCallback,
    ) -> Result<CovSubscription, ClientError> {
        let (process_id, rx) = self.shared.covs.register();
        let subscribed = self
            .send_subscribe_cov(address, object_id, process_id, Some(confirmed), lifetime_seconds)
            .await;
        if let Err(e) = subscribed {
            self.shared.covs.remove(process_id);
            return Err(e);
        }
        log::debug!("subscribed to COV of {object_id:?} at {address} as process {process_id}");
        Ok(CovSubscription::start(
            Arc::clone(&self.shared.covs),
            process_id,
            rx,
            callback,
            address.clone(),
            object_id,
            confirmed,
            lifetime_seconds,
        ))
    }

    /// Re-sends the subscription with its original lifetime.
    pub async fn renew_cov(&self, subscription: &CovSubscription) -> Result<(), ClientError> {
        self.send_subscribe_cov(
            &subscription.address,
            subscription.object_id,
            subscription.process_id,
            Some(subscription.confirmed),
            subscription.lifetime_seconds,
        )
        .await
    }

    /// Cancels the subscription at the peer, then stops local delivery.
    pub async fn cancel_cov(&self, subscription: CovSubscription) -> Result<(), ClientError> {
        let cancelled = self
            .send_subscribe_cov(&subscription.address, subscription.object_id, subscription.process_id, None, 0)
            .await;
        drop(subscription);
        cancelled
    }

    async fn send_subscribe_cov(
        &self,
        address: &Address,
        object_id: ObjectId,
        process_id: u32,
        confirmed: Option<bool>,
        lifetime_seconds: u32,
    ) -> Result<(), ClientError> {
        let request = SubscribeCovRequest {
            subscriber_process_id: process_id,
            monitored_object_id: object_id,
            issue_confirmed_notifications: confirmed,
            lifetime_seconds: (confirmed.is_some() && lifetime_seconds > 0).then_some(lifetime_seconds),
            invoke_id: 0,
        };
        self.shared
            .request(address, SERVICE_SUBSCRIBE_COV, |w, invoke_id| {
                SubscribeCovRequest { invoke_id, ..request }.encode(w)
            })
            .await?;
        Ok(())
    }

    pub fn register_vendor(&self, info: VendorInfo) {
        self.shared.server.vendors().register(info);
    }

    /// Hosts an object built from a definition.
    pub fn create_object(&self, config: &ObjectConfig) -> Result<ObjectId, ClientError> {
        self.shared.server.create(config)
    }

    pub fn add_object(&self, object: LocalObject) -> Result<ObjectId, ClientError> {
        self.shared.server.add_object(object)
    }

    pub fn remove_object(&self, object_id: ObjectId) -> bool {
        self.shared.server.remove_object(object_id)
    }

    /// Updates a hosted object's present value and notifies COV subscribers.
    pub async fn set_local_value(&self, object_id: ObjectId, value: &ClientDataValue) -> Result<(), ClientError> {
        let events = self.shared.server.set_present_value(object_id, value)?;
        self.shared.notify(events).await;
        Ok(())
    }

    /// Writes a hosted object's property under the same rules as a remote write.
    pub async fn write_local(
        &self,
        object_id: ObjectId,
        property: PropertyId,
        value: &ClientDataValue,
        array_index: Option<u32>,
        priority: Option<u8>,
    ) -> Result<(), ClientError> {
        let events = self
            .shared
            .server
            .write(object_id, property, value, array_index, priority)?;
        self.shared.notify(events).await;
        Ok(())
    }

    pub fn read_local(
        &self,
        object_id: ObjectId,
        property: PropertyId,
        array_index: Option<u32>,
    ) -> Result<ClientDataValue, ClientError> {
        self.shared.server.read(object_id, property, array_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ChannelDataLink, ChannelHub};
    use crate::server::vendor::{Datatype, ProprietaryProperty};
    use crate::LocalDeviceConfig;

    fn client(hub: &Arc<ChannelHub>, addr: &str, device_id: u32, vendor_id: u16) -> BacnetClient<ChannelDataLink> {
        let local = LocalDeviceConfig {
            device_id: Some(device_id),
            object_name: Some(format!("dev{device_id}")),
            vendor_id,
            ..LocalDeviceConfig::default()
        }
        .validate()
        .unwrap();
        BacnetClient::with_datalink(hub.endpoint(addr.parse().unwrap()).unwrap(), local)
            .with_discovery_wait(Duration::from_millis(200))
    }

    fn flow_rate(vendor_id: u16, datatype: Datatype) -> VendorInfo {
        VendorInfo::new(vendor_id, format!("vendor {vendor_id}")).with_property(
            "flowRate",
            ProprietaryProperty {
                id: 600,
                datatype,
                mutable: true,
            },
        )
    }

    #[tokio::test]
    async fn proprietary_writes_cast_with_the_target_vendor() {
        let hub = ChannelHub::new();
        let _controller = client(&hub, "10.0.0.2:47808", 2001, 7);
        let operator = client(&hub, "10.0.0.1:47808", 3001, 9);
        operator.register_vendor(flow_rate(7, Datatype::Real));
        operator.register_vendor(flow_rate(9, Datatype::Boolean));

        let target: Address = "10.0.0.2:47808".parse().unwrap();
        let request = WriteRequest::new(
            target.clone(),
            ObjectId::new(ObjectType::AnalogValue, 1),
            PropertyId::from_u32(600),
            12.0,
        );
        assert_eq!(operator.cast_write(&request).unwrap(), ClientDataValue::Unsigned(12));
        assert_eq!(
            operator.cast_write(&request.clone().with_vendor(7)).unwrap(),
            ClientDataValue::Real(12.0)
        );
        assert!(operator.cast_write(&request.clone().with_vendor(9)).is_err());

        operator.who_is(Some((2001, 2001))).await.unwrap();
        assert_eq!(operator.cast_write(&request).unwrap(), ClientDataValue::Real(12.0));
    }
}
