//! Lightweight local BACnet server.
//!
//! [`LocalServer`] hosts the local Device object plus any number of
//! analog, binary, multi-state, value and trend-log objects, and answers
//! ReadProperty, ReadPropertyMultiple, WriteProperty, SubscribeCOV and
//! ReadRange addressed to them. It never segments: an answer larger than the
//! requester accepts is aborted with segmentation-not-supported.

pub mod factory;
pub mod objects;
pub mod trend;
pub mod vendor;

use crate::{Address, ClientDataValue, ClientError, LocalDevice};
use bacscope_core::apdu::{AbortPdu, BacnetError, ConfirmedRequestHeader, RejectPdu, SimpleAck};
use bacscope_core::encoding::{reader::Reader, writer::Writer};
use bacscope_core::services::read_property::{ReadPropertyAck, ReadPropertyRequest, SERVICE_READ_PROPERTY};
use bacscope_core::services::read_property_multiple::{
    decode_read_access_specs, ReadAccessResult, ReadPropertyMultipleAck, ReadResult, ReadResultElement,
    SERVICE_READ_PROPERTY_MULTIPLE,
};
use bacscope_core::services::read_range::{ReadRangeLogAck, ReadRangeRequest, SERVICE_READ_RANGE};
use bacscope_core::services::subscribe_cov::{SubscribeCovRequest, SERVICE_SUBSCRIBE_COV};
use bacscope_core::services::who_has::WhoHasObject;
use bacscope_core::services::write_property::{WritePropertyRequest, SERVICE_WRITE_PROPERTY};
use bacscope_core::types::{
    ErrorClass, ErrorCode, ObjectId, ObjectType, PropertyId, Segmentation, StatusFlags,
};
use bacscope_core::{DecodeError, EncodeError};
use chrono::Local;
use factory::{Created, ObjectConfig, ObjectFactory};
use objects::{LocalObject, ValueKind};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use trend::LocalTrendLog;
use vendor::VendorRegistry;

/// Device instance meaning "whatever device receives this".
const WILDCARD_DEVICE_INSTANCE: u32 = 4_194_303;
const PROPERTY_ALL: u32 = 8;
const PROTOCOL_VERSION: u32 = 1;
const PROTOCOL_REVISION: u32 = 14;

/// A COV notification the engine must send on the server's behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct CovEvent {
    pub subscriber: Address,
    pub process_id: u32,
    pub object_id: ObjectId,
    pub confirmed: bool,
    pub time_remaining_seconds: u32,
    pub values: Vec<(PropertyId, ClientDataValue)>,
}

/// Encoded reply to a confirmed request and the notifications it triggered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerOutcome {
    pub reply: Vec<u8>,
    pub events: Vec<CovEvent>,
}

#[derive(Debug, Clone)]
struct CovSubscriber {
    subscriber: Address,
    process_id: u32,
    object_id: ObjectId,
    confirmed: bool,
    lifetime_seconds: u32,
    expires: Option<Instant>,
    last_value: ClientDataValue,
    last_flags: StatusFlags,
}

impl CovSubscriber {
    fn time_remaining(&self, now: Instant) -> u32 {
        self.expires
            .map_or(0, |at| at.saturating_duration_since(now).as_secs() as u32)
    }
}

#[derive(Debug)]
struct DeviceObject {
    id: ObjectId,
    name: String,
    vendor_name: String,
    vendor_id: u16,
    model_name: String,
    segmentation: Segmentation,
    max_apdu: u16,
}

#[derive(Debug)]
struct State {
    device: DeviceObject,
    objects: BTreeMap<ObjectId, LocalObject>,
    trend_logs: BTreeMap<ObjectId, LocalTrendLog>,
    subscriptions: Vec<CovSubscriber>,
    factory: ObjectFactory,
}

#[derive(Debug)]
pub struct LocalServer {
    state: RwLock<State>,
    vendors: Arc<VendorRegistry>,
}

fn error_class(code: ErrorCode) -> ErrorClass {
    match code {
        ErrorCode::UnknownObject => ErrorClass::Object,
        ErrorCode::CovSubscriptionFailed | ErrorCode::ServiceRequestDenied => ErrorClass::Services,
        ErrorCode::OptionalFunctionalityNotSupported => ErrorClass::Services,
        _ => ErrorClass::Property,
    }
}

fn local_error(code: ErrorCode) -> ClientError {
    match code {
        ErrorCode::UnknownObject => ClientError::UnknownObject,
        ErrorCode::UnknownProperty => ClientError::UnknownProperty,
        ErrorCode::WriteAccessDenied => ClientError::WriteAccessDenied,
        ErrorCode::InvalidDataType | ErrorCode::ValueOutOfRange => {
            ClientError::WritePropertyCastError(format!("{code:?}"))
        }
        other => ClientError::WrongParameter(format!("{other:?}")),
    }
}

impl State {
    fn resolve(&self, id: ObjectId) -> ObjectId {
        if id.object_type() == ObjectType::Device && id.instance() == WILDCARD_DEVICE_INSTANCE {
            self.device.id
        } else {
            id
        }
    }

    fn object_list(&self) -> Vec<ObjectId> {
        std::iter::once(self.device.id)
            .chain(self.objects.keys().copied())
            .chain(self.trend_logs.keys().copied())
            .collect()
    }

    fn read_device(&self, property: PropertyId, array_index: Option<u32>) -> Result<ClientDataValue, ErrorCode> {
        let d = &self.device;
        let value = match property {
            PropertyId::ObjectIdentifier => ClientDataValue::ObjectId(d.id),
            PropertyId::ObjectName => ClientDataValue::CharacterString(d.name.clone()),
            PropertyId::ObjectType => ClientDataValue::Enumerated(u32::from(ObjectType::Device.to_u16())),
            PropertyId::SystemStatus => ClientDataValue::Enumerated(0),
            PropertyId::VendorName => ClientDataValue::CharacterString(d.vendor_name.clone()),
            PropertyId::VendorIdentifier => ClientDataValue::Unsigned(u32::from(d.vendor_id)),
            PropertyId::ModelName => ClientDataValue::CharacterString(d.model_name.clone()),
            PropertyId::ProtocolVersion => ClientDataValue::Unsigned(PROTOCOL_VERSION),
            PropertyId::ProtocolRevision => ClientDataValue::Unsigned(PROTOCOL_REVISION),
            PropertyId::MaxApduLengthAccepted => ClientDataValue::Unsigned(u32::from(d.max_apdu)),
            PropertyId::SegmentationSupported => ClientDataValue::Enumerated(d.segmentation.to_u32()),
            PropertyId::Description => ClientDataValue::CharacterString(String::new()),
            PropertyId::StatusFlags => ClientDataValue::BitString {
                unused_bits: StatusFlags::UNUSED_BITS,
                data: vec![0],
            },
            PropertyId::ObjectList => {
                ClientDataValue::List(self.object_list().into_iter().map(ClientDataValue::ObjectId).collect())
            }
            PropertyId::PropertyList => ClientDataValue::List(
                DEVICE_PROPERTIES
                    .iter()
                    .map(|p| ClientDataValue::Enumerated(p.to_u32()))
                    .collect(),
            ),
            _ => return Err(ErrorCode::UnknownProperty),
        };
        match (array_index, value) {
            (None, value) => Ok(value),
            (Some(0), ClientDataValue::List(items)) => Ok(ClientDataValue::Unsigned(items.len() as u32)),
            (Some(i), ClientDataValue::List(items)) => {
                items.into_iter().nth(i as usize - 1).ok_or(ErrorCode::InvalidArrayIndex)
            }
            (Some(_), _) => Err(ErrorCode::PropertyIsNotAnArray),
        }
    }

    fn read(&self, id: ObjectId, property: PropertyId, array_index: Option<u32>) -> Result<ClientDataValue, ErrorCode> {
        let id = self.resolve(id);
        if id == self.device.id {
            return self.read_device(property, array_index);
        }
        if let Some(object) = self.objects.get(&id) {
            return object.read(property, array_index);
        }
        if let Some(log) = self.trend_logs.get(&id) {
            if array_index.is_some() {
                return Err(ErrorCode::PropertyIsNotAnArray);
            }
            return log.read(property);
        }
        Err(ErrorCode::UnknownObject)
    }

    fn property_list(&self, id: ObjectId) -> Result<Vec<PropertyId>, ErrorCode> {
        let id = self.resolve(id);
        if id == self.device.id {
            return Ok(DEVICE_PROPERTIES.to_vec());
        }
        if let Some(object) = self.objects.get(&id) {
            return Ok(object.property_list());
        }
        if self.trend_logs.contains_key(&id) {
            return Ok(TREND_LOG_PROPERTIES.to_vec());
        }
        Err(ErrorCode::UnknownObject)
    }

    /// Runs after `id` changed: feeds trend logs and collects due COV events.
    fn changed(&mut self, id: ObjectId) -> Vec<CovEvent> {
        let Some(object) = self.objects.get(&id) else {
            return Vec::new();
        };
        let value = object.present_value();
        let flags = object.status_flags();
        let increment = object.cov_increment().unwrap_or(0.0);
        let analog = object.kind() == ValueKind::Analog;
        let now = Instant::now();
        let at = Local::now().naive_local();

        for log in self.trend_logs.values_mut() {
            let (monitored, property) = log.monitored();
            if monitored != id {
                continue;
            }
            match object.read(property, None) {
                Ok(logged) => log.record(at, &logged, flags),
                Err(e) => log::debug!("trend log {} cannot read {property:?}: {e:?}", log.name()),
            }
        }

        self.subscriptions.retain(|s| s.expires.map_or(true, |at| at > now));
        let mut events = Vec::new();
        for sub in self.subscriptions.iter_mut().filter(|s| s.object_id == id) {
            let due = sub.last_flags != flags
                || match (analog, sub.last_value.as_f64(), value.as_f64()) {
                    (true, Some(before), Some(after)) => (after - before).abs() >= increment && before != after,
                    _ => sub.last_value != value,
                };
            if !due {
                continue;
            }
            sub.last_value = value.clone();
            sub.last_flags = flags;
            events.push(cov_event(sub, object, now));
        }
        events
    }
}

fn cov_event(sub: &CovSubscriber, object: &LocalObject, now: Instant) -> CovEvent {
    CovEvent {
        subscriber: sub.subscriber.clone(),
        process_id: sub.process_id,
        object_id: sub.object_id,
        confirmed: sub.confirmed,
        time_remaining_seconds: sub.time_remaining(now),
        values: vec![
            (PropertyId::PresentValue, object.present_value()),
            (PropertyId::StatusFlags, object.status_flags_value()),
        ],
    }
}

const DEVICE_PROPERTIES: &[PropertyId] = &[
    PropertyId::ObjectIdentifier,
    PropertyId::ObjectName,
    PropertyId::ObjectType,
    PropertyId::SystemStatus,
    PropertyId::VendorName,
    PropertyId::VendorIdentifier,
    PropertyId::ModelName,
    PropertyId::ProtocolVersion,
    PropertyId::ProtocolRevision,
    PropertyId::ObjectList,
    PropertyId::MaxApduLengthAccepted,
    PropertyId::SegmentationSupported,
    PropertyId::Description,
    PropertyId::StatusFlags,
];

const TREND_LOG_PROPERTIES: &[PropertyId] = &[
    PropertyId::ObjectIdentifier,
    PropertyId::ObjectName,
    PropertyId::ObjectType,
    PropertyId::Enable,
    PropertyId::BufferSize,
    PropertyId::RecordCount,
    PropertyId::TotalRecordCount,
    PropertyId::LogDeviceObjectProperty,
    PropertyId::StatusFlags,
];

impl LocalServer {
    pub fn new(local: &LocalDevice) -> Self {
        Self::with_vendors(local, Arc::new(VendorRegistry::new()))
    }

    pub fn with_vendors(local: &LocalDevice, vendors: Arc<VendorRegistry>) -> Self {
        let device = DeviceObject {
            id: ObjectId::new(ObjectType::Device, local.device_id),
            name: local.object_name.clone(),
            vendor_name: local.vendor_name.clone(),
            vendor_id: local.vendor_id,
            model_name: local.model_name.clone(),
            segmentation: local.segmentation,
            max_apdu: local.max_apdu.octets(),
        };
        let mut factory = ObjectFactory::new();
        factory.reserve(device.id, &device.name);
        Self {
            state: RwLock::new(State {
                device,
                objects: BTreeMap::new(),
                trend_logs: BTreeMap::new(),
                subscriptions: Vec::new(),
                factory,
            }),
            vendors,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn vendors(&self) -> &Arc<VendorRegistry> {
        &self.vendors
    }

    pub fn device_id(&self) -> ObjectId {
        self.read_state().device.id
    }

    /// Creates an object from a definition. Colliding names or instances
    /// are reallocated.
    pub fn create(&self, config: &ObjectConfig) -> Result<ObjectId, ClientError> {
        let mut state = self.write_state();
        let vendor_id = state.device.vendor_id;
        let created = state.factory.create(config, &self.vendors, vendor_id)?;
        Ok(match created {
            Created::Object(object) => {
                let id = object.id();
                log::info!("hosting {} as {id:?}", object.name());
                state.objects.insert(id, object);
                id
            }
            Created::TrendLog(log) => {
                let id = log.id();
                log::info!("hosting trend log {} as {id:?}", log.name());
                state.trend_logs.insert(id, log);
                id
            }
        })
    }

    /// Hosts a ready-made object; its id and name must be free.
    pub fn add_object(&self, object: LocalObject) -> Result<ObjectId, ClientError> {
        let mut state = self.write_state();
        let id = object.id();
        if state.objects.contains_key(&id) || state.objects.values().any(|o| o.name() == object.name()) {
            return Err(ClientError::WrongParameter(format!(
                "{id:?} or name {} already hosted",
                object.name()
            )));
        }
        state.factory.reserve(id, object.name());
        state.objects.insert(id, object);
        Ok(id)
    }

    pub fn remove_object(&self, id: ObjectId) -> bool {
        let mut state = self.write_state();
        state.subscriptions.retain(|s| s.object_id != id);
        let name = match (state.objects.remove(&id), state.trend_logs.remove(&id)) {
            (Some(object), _) => object.name().to_string(),
            (None, Some(log)) => log.name().to_string(),
            (None, None) => return false,
        };
        state.factory.release(id, &name);
        true
    }

    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.read_state().object_list()
    }

    pub fn object(&self, id: ObjectId) -> Option<LocalObject> {
        self.read_state().objects.get(&id).cloned()
    }

    pub fn trend_log(&self, id: ObjectId) -> Option<LocalTrendLog> {
        self.read_state().trend_logs.get(&id).cloned()
    }

    pub fn object_by_name(&self, name: &str) -> Option<ObjectId> {
        let state = self.read_state();
        state
            .objects
            .values()
            .find(|o| o.name() == name)
            .map(LocalObject::id)
            .or_else(|| state.trend_logs.values().find(|l| l.name() == name).map(LocalTrendLog::id))
    }

    pub fn read(&self, id: ObjectId, property: PropertyId, array_index: Option<u32>) -> Result<ClientDataValue, ClientError> {
        self.read_state().read(id, property, array_index).map_err(local_error)
    }

    /// Writes a property with the same access rules a remote peer gets.
    pub fn write(
        &self,
        id: ObjectId,
        property: PropertyId,
        value: &ClientDataValue,
        array_index: Option<u32>,
        priority: Option<u8>,
    ) -> Result<Vec<CovEvent>, ClientError> {
        self.write_inner(id, property, value, array_index, priority)
            .map_err(local_error)
    }

    /// Updates a present value from the local application.
    pub fn set_present_value(&self, id: ObjectId, value: &ClientDataValue) -> Result<Vec<CovEvent>, ClientError> {
        let mut state = self.write_state();
        let object = state.objects.get_mut(&id).ok_or(ClientError::UnknownObject)?;
        let changed = object.set_present_value(value).map_err(local_error)?;
        Ok(if changed { state.changed(id) } else { Vec::new() })
    }

    fn write_inner(
        &self,
        id: ObjectId,
        property: PropertyId,
        value: &ClientDataValue,
        array_index: Option<u32>,
        priority: Option<u8>,
    ) -> Result<Vec<CovEvent>, ErrorCode> {
        let mut state = self.write_state();
        let id = state.resolve(id);
        if id == state.device.id {
            return match property {
                PropertyId::ObjectName => match value {
                    ClientDataValue::CharacterString(name) if !name.is_empty() => {
                        state.device.name = name.clone();
                        Ok(Vec::new())
                    }
                    _ => Err(ErrorCode::InvalidDataType),
                },
                p if DEVICE_PROPERTIES.contains(&p) => Err(ErrorCode::WriteAccessDenied),
                _ => Err(ErrorCode::UnknownProperty),
            };
        }
        if let Some(log) = state.trend_logs.get_mut(&id) {
            log.write(property, value)?;
            return Ok(Vec::new());
        }
        let object = state.objects.get_mut(&id).ok_or(ErrorCode::UnknownObject)?;
        let changed = object.write(property, value, array_index, priority)?;
        Ok(if changed { state.changed(id) } else { Vec::new() })
    }

    /// Object matching a Who-Has query, by id or by name.
    pub fn who_has(&self, object: &WhoHasObject<'_>) -> Option<(ObjectId, String)> {
        let state = self.read_state();
        let mut hosted = state
            .objects
            .values()
            .map(|o| (o.id(), o.name()))
            .chain(state.trend_logs.values().map(|l| (l.id(), l.name())))
            .chain(std::iter::once((state.device.id, state.device.name.as_str())));
        hosted
            .find(|(id, name)| match object {
                WhoHasObject::ObjectId(wanted) => id == wanted,
                WhoHasObject::ObjectName(wanted) => name == wanted,
            })
            .map(|(id, name)| (id, name.to_string()))
    }

    /// Number of live COV subscriptions on hosted objects.
    pub fn subscription_count(&self) -> usize {
        let now = Instant::now();
        self.read_state()
            .subscriptions
            .iter()
            .filter(|s| s.expires.map_or(true, |at| at > now))
            .count()
    }

    /// Answers one confirmed request. `limit` is the largest APDU the
    /// requester accepts.
    pub fn handle_confirmed(
        &self,
        peer: &Address,
        header: &ConfirmedRequestHeader,
        payload: &[u8],
        limit: usize,
    ) -> ServerOutcome {
        let invoke_id = header.invoke_id;
        let service_choice = header.service_choice;
        let mut r = Reader::new(payload);

        let result = match service_choice {
            SERVICE_READ_PROPERTY => self.read_property(&mut r, invoke_id),
            SERVICE_READ_PROPERTY_MULTIPLE => self.read_property_multiple(&mut r, invoke_id),
            SERVICE_WRITE_PROPERTY => self.write_property(&mut r, invoke_id),
            SERVICE_SUBSCRIBE_COV => self.subscribe_cov(peer, &mut r, invoke_id),
            SERVICE_READ_RANGE => self.read_range(&mut r, invoke_id),
            other => {
                log::debug!("rejecting unsupported service 0x{other:02x} from {peer}");
                Err(Failure::Reject(RejectPdu::REASON_UNRECOGNIZED_SERVICE))
            }
        };

        let (reply, events) = match result {
            Ok(done) => (done.reply, done.events),
            Err(Failure::Error(code)) => (
                encode(|w| {
                    BacnetError {
                        invoke_id,
                        service_choice,
                        error_class: Some(error_class(code).to_u32()),
                        error_code: Some(code.to_u32()),
                    }
                    .encode(w)
                }),
                Vec::new(),
            ),
            Err(Failure::Reject(reason)) => (encode(|w| RejectPdu { invoke_id, reason }.encode(w)), Vec::new()),
        };

        if reply.len() > limit {
            log::debug!("{} byte answer exceeds {limit} accepted by {peer}", reply.len());
            return ServerOutcome {
                reply: encode(|w| {
                    AbortPdu {
                        server: true,
                        invoke_id,
                        reason: AbortPdu::REASON_SEGMENTATION_NOT_SUPPORTED,
                    }
                    .encode(w)
                }),
                events,
            };
        }
        ServerOutcome { reply, events }
    }

    fn read_property(&self, r: &mut Reader<'_>, invoke_id: u8) -> Result<ServerOutcome, Failure> {
        let request = ReadPropertyRequest::decode_after_header(r, invoke_id)?;
        let state = self.read_state();
        let object_id = state.resolve(request.object_id);
        let value = state.read(object_id, request.property_id, request.array_index)?;
        drop(state);
        Ok(reply(|w| {
            ReadPropertyAck {
                object_id,
                property_id: request.property_id,
                array_index: request.array_index,
                value: value.to_data_value(),
            }
            .encode(w, invoke_id)
        }))
    }

    fn read_property_multiple(&self, r: &mut Reader<'_>, invoke_id: u8) -> Result<ServerOutcome, Failure> {
        let specs = decode_read_access_specs(r)?;
        let state = self.read_state();

        let mut owned: Vec<(ObjectId, Vec<(PropertyId, Option<u32>, Result<ClientDataValue, ErrorCode>)>)> =
            Vec::with_capacity(specs.len());
        for spec in &specs {
            let object_id = state.resolve(spec.object_id);
            let mut results = Vec::new();
            for reference in &spec.properties {
                if reference.property_id.to_u32() == PROPERTY_ALL {
                    match state.property_list(object_id) {
                        Ok(properties) => {
                            for property in properties {
                                results.push((property, None, state.read(object_id, property, None)));
                            }
                        }
                        Err(code) => results.push((reference.property_id, None, Err(code))),
                    }
                    continue;
                }
                results.push((
                    reference.property_id,
                    reference.array_index,
                    state.read(object_id, reference.property_id, reference.array_index),
                ));
            }
            owned.push((object_id, results));
        }
        drop(state);

        let ack = ReadPropertyMultipleAck {
            results: owned
                .iter()
                .map(|(object_id, results)| ReadAccessResult {
                    object_id: *object_id,
                    results: results
                        .iter()
                        .map(|(property_id, array_index, result)| ReadResultElement {
                            property_id: *property_id,
                            array_index: *array_index,
                            result: match result {
                                Ok(value) => ReadResult::Value(value.to_data_value()),
                                Err(code) => ReadResult::Error {
                                    error_class: error_class(*code).to_u32(),
                                    error_code: code.to_u32(),
                                },
                            },
                        })
                        .collect(),
                })
                .collect(),
        };
        Ok(reply(|w| ack.encode(w, invoke_id)))
    }

    fn write_property(&self, r: &mut Reader<'_>, invoke_id: u8) -> Result<ServerOutcome, Failure> {
        let request = WritePropertyRequest::decode_after_header(r, invoke_id)?;
        let value = ClientDataValue::from(request.value.clone());
        let events = self.write_inner(
            request.object_id,
            request.property_id,
            &value,
            request.array_index,
            request.priority,
        )?;
        let mut outcome = reply(|w| {
            SimpleAck {
                invoke_id,
                service_choice: SERVICE_WRITE_PROPERTY,
            }
            .encode(w)
        });
        outcome.events = events;
        Ok(outcome)
    }

    fn subscribe_cov(&self, peer: &Address, r: &mut Reader<'_>, invoke_id: u8) -> Result<ServerOutcome, Failure> {
        let request = SubscribeCovRequest::decode_after_header(r, invoke_id)?;
        let mut state = self.write_state();
        let object_id = state.resolve(request.monitored_object_id);
        let matches = |s: &CovSubscriber| {
            s.subscriber == *peer && s.process_id == request.subscriber_process_id && s.object_id == object_id
        };

        let mut events = Vec::new();
        if request.is_cancellation() {
            state.subscriptions.retain(|s| !matches(s));
            log::debug!("{peer} cancelled COV on {object_id:?}");
        } else {
            let object = state.objects.get(&object_id).ok_or(ErrorCode::UnknownObject)?;
            let now = Instant::now();
            let lifetime_seconds = request.lifetime_seconds.unwrap_or(0);
            let subscription = CovSubscriber {
                subscriber: peer.clone(),
                process_id: request.subscriber_process_id,
                object_id,
                confirmed: request.issue_confirmed_notifications.unwrap_or(false),
                lifetime_seconds,
                expires: (lifetime_seconds > 0)
                    .then(|| now + Duration::from_secs(u64::from(lifetime_seconds))),
                last_value: object.present_value(),
                last_flags: object.status_flags(),
            };
            events.push(cov_event(&subscription, object, now));
            log::debug!(
                "{peer} subscribed to COV on {object_id:?} (process {}, lifetime {}s)",
                subscription.process_id,
                subscription.lifetime_seconds
            );
            state.subscriptions.retain(|s| !matches(s));
            state.subscriptions.push(subscription);
        }
        drop(state);

        let mut outcome = reply(|w| {
            SimpleAck {
                invoke_id,
                service_choice: SERVICE_SUBSCRIBE_COV,
            }
            .encode(w)
        });
        outcome.events = events;
        Ok(outcome)
    }

    fn read_range(&self, r: &mut Reader<'_>, invoke_id: u8) -> Result<ServerOutcome, Failure> {
        let request = ReadRangeRequest::decode_after_header(r, invoke_id)?;
        let state = self.read_state();
        if state.objects.contains_key(&request.object_id) {
            return Err(ErrorCode::PropertyIsNotAnArray.into());
        }
        let log = state
            .trend_logs
            .get(&request.object_id)
            .ok_or(ErrorCode::UnknownObject)?;
        if request.property_id != PropertyId::LogBuffer {
            return Err(ErrorCode::PropertyIsNotAnArray.into());
        }
        let range = log.range(&request.range);
        drop(state);
        Ok(reply(|w| {
            ReadRangeLogAck {
                object_id: request.object_id,
                property_id: request.property_id,
                result_flags: range.flags,
                records: &range.records,
                first_sequence_number: range.first_sequence_number,
            }
            .encode(w, invoke_id)
        }))
    }
}

enum Failure {
    Error(ErrorCode),
    Reject(u8),
}

impl From<ErrorCode> for Failure {
    fn from(code: ErrorCode) -> Self {
        Self::Error(code)
    }
}

impl From<DecodeError> for Failure {
    fn from(e: DecodeError) -> Self {
        Self::Reject(match e {
            DecodeError::InvalidTag => RejectPdu::REASON_INVALID_TAG,
            DecodeError::UnexpectedEof => RejectPdu::REASON_MISSING_REQUIRED_PARAMETER,
            _ => RejectPdu::REASON_OTHER,
        })
    }
}

/// Encodes into a growing buffer; an encoder failure yields an empty reply,
/// which the engine never sends.
fn encode<F>(f: F) -> Vec<u8>
where
    F: FnMut(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    match crate::engine::encode_with_growth(f) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("cannot encode server reply: {e}");
            Vec::new()
        }
    }
}

fn reply<F>(f: F) -> ServerOutcome
where
    F: FnMut(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    ServerOutcome {
        reply: encode(f),
        events: Vec::new(),
    }
}

#[cfg(test)]
mod tests;
