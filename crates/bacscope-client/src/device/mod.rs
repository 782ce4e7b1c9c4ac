//! Remote devices as seen by an operator: a state machine, a set of points
//! built from the object list, periodic polling and snapshots on disk.
//!
//! ```no_run
//! # async fn demo(client: std::sync::Arc<bacscope_client::BacnetClient<bacscope_datalink::BacnetIpTransport>>)
//! # -> Result<(), bacscope_client::ClientError> {
//! use bacscope_client::device::{Device, DeviceOptions};
//!
//! let device = Device::new(client, "192.168.1.20".parse()?, 5005, DeviceOptions::default());
//! device.connect().await?;
//! let temp = device.point("ZN-T")?;
//! println!("{:?}", temp.value().await?);
//! device.save(None).await?;
//! # Ok(())
//! # }
//! ```

mod discover;
mod persist;
mod point;
mod poll;
mod state;


pub use point::{History, Point, PointDefinition, PointKind, PointValue, DEFAULT_HISTORY_SIZE, OVERRIDE_PRIORITY};
pub use poll::{effective_poll_delay, PollMode, MIN_POLL_FAST, MIN_POLL_NORMAL, MIN_POLL_RP};
pub use state::{transition, DeviceState, Effect, Event, MAX_PING_FAILURES};

use crate::client::ObjectValues;
use crate::request::{ReadMultipleRequest, WriteValue};
use crate::trend::TrendLog;
use crate::{Address, BacnetClient, ClientDataValue, ClientError, CovCallback, CovSubscription};
use bacscope_core::types::{ObjectId, ObjectType, PropertyId};
use bacscope_datalink::DataLink;
use bacscope_store::HistoryFrame;
use poll::TaskHandle;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// Instance given to virtual points, which have no object behind them.
const VIRTUAL_INSTANCE: u32 = 4_194_303;

/// Per-device settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    /// Polling period; `None` disables polling.
    pub poll_delay: Option<Duration>,
    pub poll_mode: PollMode,
    pub history_size: usize,
    /// Objects per ReadPropertyMultiple before adaptation.
    pub points_per_request: usize,
    /// Save after this many successful polls.
    pub auto_save: Option<u32>,
    pub clear_history_after_save: bool,
    /// Resampling frequency for saves (`"1s"`, `"5min"`); `None` keeps raw samples.
    pub save_resampling: Option<String>,
    /// Snapshot to fall back to when the device does not answer.
    pub snapshot: Option<PathBuf>,
    /// Objects to build points from instead of the device's objectList.
    pub object_list: Option<Vec<ObjectId>>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            poll_delay: Some(MIN_POLL_NORMAL),
            poll_mode: PollMode::Normal,
            history_size: DEFAULT_HISTORY_SIZE,
            points_per_request: 25,
            auto_save: None,
            clear_history_after_save: false,
            save_resampling: Some("1s".to_string()),
            snapshot: None,
            object_list: None,
        }
    }
}

/// What the device reported about itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor_id: Option<u32>,
    pub segmentation_supported: bool,
    pub protocol_services_supported: Option<ClientDataValue>,
    pub object_list: Vec<ObjectId>,
    pub last_ping: Option<bool>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct OverrideScan {
    running: AtomicBool,
    /// Progress as `f32` bits.
    progress: AtomicU32,
    found: Mutex<Vec<String>>,
}

impl OverrideScan {
    fn set_progress(&self, fraction: f32) {
        self.progress.store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn progress(&self) -> f32 {
        f32::from_bits(self.progress.load(Ordering::Relaxed))
    }

    fn found(&self) -> Vec<String> {
        self.found.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

/// Clears the scan flag when the scan ends, however it ends.
struct ScanGuard<'a>(&'a OverrideScan);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

pub(crate) struct DeviceCore<D: DataLink + 'static> {
    client: RwLock<Option<Arc<BacnetClient<D>>>>,
    address: Address,
    device_id: u32,
    options: DeviceOptions,
    state: RwLock<DeviceState>,
    info: RwLock<DeviceInfo>,
    points: RwLock<BTreeMap<String, Arc<Point<D>>>>,
    snapshot: RwLock<Option<PathBuf>>,
    trends: tokio::sync::Mutex<BTreeMap<String, Arc<TrendLog<D>>>>,
    batch_size: AtomicUsize,
    ping_failures: AtomicU32,
    overrides: OverrideScan,
    poll: Mutex<Option<TaskHandle>>,
}

fn read_lock<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<D: DataLink + 'static> DeviceCore<D> {
    fn new(client: Option<Arc<BacnetClient<D>>>, address: Address, device_id: u32, options: DeviceOptions) -> Self {
        Self {
            client: RwLock::new(client),
            batch_size: AtomicUsize::new(options.points_per_request.max(1)),
            snapshot: RwLock::new(options.snapshot.clone()),
            address,
            device_id,
            options,
            state: RwLock::new(DeviceState::Disconnected),
            info: RwLock::new(DeviceInfo::default()),
            points: RwLock::new(BTreeMap::new()),
            trends: tokio::sync::Mutex::new(BTreeMap::new()),
            ping_failures: AtomicU32::new(0),
            overrides: OverrideScan::default(),
            poll: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> DeviceState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn object_id(&self) -> ObjectId {
        ObjectId::new(ObjectType::Device, self.device_id)
    }

    fn label(&self) -> String {
        let name = read_lock(&self.info).name;
        if name.is_empty() {
            format!("device {} at {}", self.device_id, self.address)
        } else {
            format!("{name} ({})", self.address)
        }
    }

    /// Applies `event` and returns the effects the caller must run.
    fn apply(&self, event: Event) -> Vec<Effect> {
        let mut state = write_lock(&self.state);
        let (next, effects) = transition(*state, event);
        if next != *state {
            log::info!("{} device {}: {} -> {next}", self.address, self.device_id, *state);
        }
        *state = next;
        effects
    }

    fn stop_polling(&self) {
        let handle = self
            .poll
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// The client, when the device is online.
    fn network(&self) -> Result<Arc<BacnetClient<D>>, ClientError> {
        if !self.state().is_connected() {
            return Err(ClientError::DeviceNotConnected);
        }
        read_lock(&self.client).ok_or(ClientError::DeviceNotConnected)
    }

    fn snapshot_available(&self) -> bool {
        read_lock(&self.snapshot)
            .map(bacscope_store::SnapshotPaths::for_name)
            .is_some_and(|paths| paths.exists())
    }

    fn all_points(&self) -> Vec<Arc<Point<D>>> {
        read_lock(&self.points).into_values().collect()
    }

    pub(crate) async fn read_object_property(
        &self,
        object_id: ObjectId,
        property: PropertyId,
        array_index: Option<u32>,
    ) -> Result<ClientDataValue, ClientError> {
        self.network()?
            .read_property(&self.address, object_id, property, array_index)
            .await
    }

    pub(crate) async fn write_object_property(
        &self,
        object_id: ObjectId,
        property: PropertyId,
        value: &WriteValue,
        priority: Option<u8>,
    ) -> Result<(), ClientError> {
        let client = self.network()?;
        let vendor = match property {
            PropertyId::Proprietary(_) => read_lock(&self.info)
                .vendor_id
                .and_then(|vendor| u16::try_from(vendor).ok())
                .and_then(|vendor| client.server().vendors().datatype(vendor, property)),
            _ => None,
        };
        let value = value.cast(object_id.object_type(), property, vendor)?;
        client
            .write_property(&self.address, object_id, property, &value, None, priority)
            .await
    }

    pub(crate) async fn subscribe_cov(
        &self,
        object_id: ObjectId,
        lifetime_seconds: u32,
        confirmed: bool,
        callback: CovCallback,
    ) -> Result<CovSubscription, ClientError> {
        self.network()?
            .subscribe_cov(&self.address, object_id, lifetime_seconds, confirmed, callback)
            .await
    }

    /// Cancels at the controller when online. Offline, dropping the
    /// subscription is all there is to do.
    pub(crate) async fn cancel_cov(&self, subscription: CovSubscription) -> Result<(), ClientError> {
        match self.network() {
            Ok(client) => client.cancel_cov(subscription).await,
            Err(_) => Ok(()),
        }
    }

    pub(crate) async fn read_priority_array(
        &self,
        object_id: ObjectId,
    ) -> Result<Vec<Option<ClientDataValue>>, ClientError> {
        self.network()?
            .read_priority_array(&self.address, object_id)
            .await
    }

    /// Reads `requests` with ReadPropertyMultiple in adaptive batches, or one
    /// property at a time once the device is in single-read mode. Stops
    /// between batches when `stop` is raised.
    async fn read_batched(
        &self,
        requests: &[(ObjectId, Vec<PropertyId>)],
        stop: Option<&watch::Receiver<bool>>,
    ) -> Result<Vec<ObjectValues>, ClientError> {
        let client = self.network()?;
        let stopped = || stop.is_some_and(|s| *s.borrow());
        let mut results = Vec::with_capacity(requests.len());
        let mut done = 0;

        while done < requests.len() && !stopped() {
            if self.state() == DeviceState::ConnectedRp {
                for (object_id, properties) in &requests[done..] {
                    if stopped() {
                        break;
                    }
                    results.push(self.read_singly(&client, *object_id, properties).await?);
                    tokio::task::yield_now().await;
                }
                break;
            }

            let batch = self.batch_size.load(Ordering::Relaxed).max(1);
            let chunk = &requests[done..(done + batch).min(requests.len())];
            let request = chunk
                .iter()
                .fold(ReadMultipleRequest::new(self.address.clone()), |request, (id, properties)| {
                    request.object(*id, properties)
                });
            match client.read_multiple_request(&request).await {
                Ok(values) => {
                    results.extend(values);
                    done += chunk.len();
                    tokio::task::yield_now().await;
                }
                Err(
                    ClientError::SegmentationNotSupported
                    | ClientError::BufferOverflow
                    | ClientError::ResponseTooLarge { .. },
                ) if batch > 1 => {
                    let smaller = (batch / 2).max(1);
                    log::warn!("{}: answer too large, {smaller} objects per request", self.label());
                    self.batch_size.store(smaller, Ordering::Relaxed);
                }
                Err(
                    ClientError::SegmentationNotSupported
                    | ClientError::BufferOverflow
                    | ClientError::ResponseTooLarge { .. },
                ) => {
                    log::warn!("{}: read property multiple unusable, reading one property at a time", self.label());
                    self.apply(Event::SegmentationRefused);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    async fn read_singly(
        &self,
        client: &BacnetClient<D>,
        object_id: ObjectId,
        properties: &[PropertyId],
    ) -> Result<ObjectValues, ClientError> {
        let mut values = Vec::with_capacity(properties.len());
        for property in properties {
            let value = match client.read_property(&self.address, object_id, *property, None).await {
                Err(ClientError::NoResponseFromController) => return Err(ClientError::NoResponseFromController),
                other => other,
            };
            values.push(crate::client::PropertyValue {
                property: *property,
                array_index: None,
                value,
            });
        }
        Ok(ObjectValues { object_id, values })
    }

    /// Reads presentValue of `points` and records what comes back.
    async fn read_present_values(
        &self,
        points: &[Arc<Point<D>>],
        stop: Option<&watch::Receiver<bool>>,
    ) -> Result<usize, ClientError> {
        let requests: Vec<(ObjectId, Vec<PropertyId>)> = points
            .iter()
            .filter(|p| !matches!(p.kind(), PointKind::Virtual | PointKind::Offline))
            .filter(|p| !p.is_cov_active())
            .map(|p| (p.object_id(), vec![PropertyId::PresentValue]))
            .collect();
        let by_id: BTreeMap<ObjectId, &Arc<Point<D>>> = points.iter().map(|p| (p.object_id(), p)).collect();

        let mut updated = 0;
        for object in self.read_batched(&requests, stop).await? {
            let Some(point) = by_id.get(&object.object_id) else {
                continue;
            };
            match object.values.first().map(|v| &v.value) {
                Some(Ok(value)) => {
                    if point.record_wire(value).is_some() {
                        updated += 1;
                    }
                }
                Some(Err(e)) => log::warn!("{}: cannot read {}: {e}", self.label(), point.name()),
                None => {}
            }
        }
        Ok(updated)
    }

    fn clear_histories(&self) {
        for point in self.all_points() {
            point.clear_history();
        }
    }
}

/// A remote BACnet device and its points.
pub struct Device<D: DataLink + 'static> {
    core: Arc<DeviceCore<D>>,
}

impl<D: DataLink + 'static> std::fmt::Debug for Device<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.core.address)
            .field("device_id", &self.core.device_id)
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl<D: DataLink + 'static> Drop for Device<D> {
    fn drop(&mut self) {
        self.core.stop_polling();
    }
}

impl<D: DataLink + 'static> Device<D> {
    /// A disconnected device; call [`connect`](Self::connect) to bring it online.
    pub fn new(client: Arc<BacnetClient<D>>, address: Address, device_id: u32, options: DeviceOptions) -> Self {
        Self {
            core: Arc::new(DeviceCore::new(Some(client), address, device_id, options)),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.core.state()
    }

    pub fn address(&self) -> &Address {
        &self.core.address
    }

    pub fn device_id(&self) -> u32 {
        self.core.device_id
    }

    pub fn name(&self) -> String {
        read_lock(&self.core.info).name
    }

    pub fn info(&self) -> DeviceInfo {
        read_lock(&self.core.info)
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.core.options
    }

    /// Objects per ReadPropertyMultiple after adaptation.
    pub fn points_per_request(&self) -> usize {
        self.core.batch_size.load(Ordering::Relaxed)
    }

    async fn run_effects(&self, effects: Vec<Effect>) -> Result<(), ClientError> {
        for effect in effects {
            match effect {
                Effect::DiscoverPoints => {
                    if let Err(e) = self.discover_points().await {
                        log::warn!("{}: point discovery failed: {e}", self.core.label());
                        let effects = self.core.apply(Event::Disconnect {
                            snapshot_available: false,
                        });
                        if effects.contains(&Effect::StopPolling) {
                            self.core.stop_polling();
                        }
                        return Err(e);
                    }
                }
                Effect::StartPolling => {
                    if let Some(delay) = self.core.options.poll_delay {
                        self.poll(delay);
                    }
                }
                Effect::StopPolling => self.core.stop_polling(),
                Effect::LoadSnapshot => {
                    let path = read_lock(&self.core.snapshot).ok_or_else(|| {
                        ClientError::BadDeviceDefinition("no snapshot to load".to_string())
                    })?;
                    self.core.restore(&path).await?;
                }
            }
        }
        Ok(())
    }

    /// Reads objectName and segmentationSupported, then builds the point
    /// list. A device that does not answer comes up from its snapshot when
    /// one exists.
    pub async fn connect(&self) -> Result<DeviceState, ClientError> {
        let client = read_lock(&self.core.client)
            .ok_or_else(|| ClientError::BadDeviceDefinition("no network to connect through".to_string()))?;
        let device = self.core.object_id();
        let address = &self.core.address;

        let name = client.read_property(address, device, PropertyId::ObjectName, None).await;
        let segmentation = match &name {
            Ok(_) => Some(
                client
                    .read_property(address, device, PropertyId::SegmentationSupported, None)
                    .await,
            ),
            Err(_) => None,
        };

        let (name, segmentation) = match (name, segmentation) {
            (Ok(name), Some(Ok(segmentation))) => (name, segmentation),
            (Err(e), _) | (_, Some(Err(e))) => {
                write_lock(&self.core.info).last_error = Some(e.to_string());
                if matches!(e, ClientError::NoResponseFromController) {
                    let effects = self.core.apply(Event::NoResponse {
                        snapshot_available: self.core.snapshot_available(),
                    });
                    if !effects.is_empty() {
                        log::warn!("{address} device {}: no answer, loading snapshot", self.core.device_id);
                        self.run_effects(effects).await?;
                        return Ok(self.state());
                    }
                }
                return Err(e);
            }
            (Ok(_), None) => return Err(ClientError::NoResponseFromController),
        };

        // segmentationSupported enumeration: 3 is noSegmentation.
        let segmentation_supported = segmentation.as_u32().is_some_and(|value| value != 3);
        let vendor_id = client
            .read_property(address, device, PropertyId::VendorIdentifier, None)
            .await
            .ok()
            .and_then(|v| v.as_u32());
        if let Some(vendor_id) = vendor_id {
            client.remember_vendor(address, vendor_id);
        }
        let services = client
            .read_property(address, device, PropertyId::ProtocolServicesSupported, None)
            .await
            .ok();
        {
            let mut info = write_lock(&self.core.info);
            info.name = name.as_str().map(str::to_string).unwrap_or_else(|| name.to_string());
            info.segmentation_supported = segmentation_supported;
            info.vendor_id = vendor_id;
            info.protocol_services_supported = services;
            info.last_error = None;
        }
        self.core.ping_failures.store(0, Ordering::Relaxed);
        self.core
            .batch_size
            .store(self.core.options.points_per_request.max(1), Ordering::Relaxed);

        let effects = self.core.apply(Event::Connected { segmentation_supported });
        self.run_effects(effects).await?;
        log::info!("{} connected with {} points", self.core.label(), self.points_name().len());
        Ok(self.state())
    }

    /// Goes offline: to the snapshot when one exists, otherwise disconnected.
    pub async fn disconnect(&self) -> Result<DeviceState, ClientError> {
        let effects = self.core.apply(Event::Disconnect {
            snapshot_available: self.core.snapshot_available(),
        });
        self.run_effects(effects).await?;
        Ok(self.state())
    }

    /// Reads objectName; three failures in a row disconnect the device.
    pub async fn ping(&self) -> Result<bool, ClientError> {
        let result = self
            .core
            .read_object_property(self.core.object_id(), PropertyId::ObjectName, None)
            .await;
        let ok = match result {
            Ok(_) => {
                self.core.ping_failures.store(0, Ordering::Relaxed);
                true
            }
            Err(ClientError::DeviceNotConnected) => return Err(ClientError::DeviceNotConnected),
            Err(e) => {
                let consecutive = self.core.ping_failures.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("{}: ping failed ({consecutive}): {e}", self.core.label());
                write_lock(&self.core.info).last_error = Some(e.to_string());
                let effects = self.core.apply(Event::PingFailed { consecutive });
                self.run_effects(effects).await?;
                false
            }
        };
        write_lock(&self.core.info).last_ping = Some(ok);
        Ok(ok)
    }

    pub fn point(&self, name: &str) -> Result<Arc<Point<D>>, ClientError> {
        read_lock(&self.core.points)
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::WrongParameter(format!("no point named {name}")))
    }

    pub fn points(&self) -> Vec<Arc<Point<D>>> {
        self.core.all_points()
    }

    pub fn points_name(&self) -> Vec<String> {
        read_lock(&self.core.points).into_keys().collect()
    }

    /// Adds a point whose values are supplied through [`Point::write`].
    pub fn add_virtual_point(&self, name: &str, description: &str) -> Result<Arc<Point<D>>, ClientError> {
        let mut points = write_lock(&self.core.points);
        if points.contains_key(name) {
            return Err(ClientError::WrongParameter(format!("point {name} already exists")));
        }
        let mut definition = PointDefinition::new(
            ObjectId::new(ObjectType::AnalogValue, VIRTUAL_INSTANCE),
            name,
            PointKind::Virtual,
        );
        definition.description = description.to_string();
        let point = Arc::new(Point::new(
            definition,
            self.core.options.history_size,
            Arc::downgrade(&self.core),
        ));
        points.insert(name.to_string(), Arc::clone(&point));
        Ok(point)
    }

    /// Reads presentValue of the named points, or of every point.
    pub async fn read_multiple(&self, names: Option<&[&str]>) -> Result<usize, ClientError> {
        let points = match names {
            Some(names) => names.iter().map(|n| self.point(n)).collect::<Result<Vec<_>, _>>()?,
            None => self.points(),
        };
        self.core.read_present_values(&points, None).await
    }

    /// Starts polling every `delay` (raised to the state's minimum),
    /// replacing any running poll.
    pub fn poll(&self, delay: Duration) {
        self.core.stop_polling();
        let handle = poll::spawn(&self.core, delay);
        *self
            .core
            .poll
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }

    /// Stops polling at the next batch boundary. Safe to call repeatedly.
    pub fn stop_polling(&self) {
        self.core.stop_polling();
    }

    pub fn is_polling(&self) -> bool {
        self.core
            .poll
            .lock()
            .map(|poll| poll.as_ref().is_some_and(TaskHandle::is_running))
            .unwrap_or(false)
    }

    /// The period polling actually runs at in the current state.
    pub fn poll_delay(&self) -> Option<Duration> {
        let requested = self
            .core
            .poll
            .lock()
            .ok()
            .and_then(|poll| poll.as_ref().map(TaskHandle::requested))
            .or(self.core.options.poll_delay)?;
        Some(effective_poll_delay(self.state(), self.core.options.poll_mode, requested))
    }

    pub async fn read_property(&self, property: PropertyId) -> Result<ClientDataValue, ClientError> {
        self.core
            .read_object_property(self.core.object_id(), property, None)
            .await
    }

    pub async fn write_property(&self, property: PropertyId, value: impl Into<WriteValue>) -> Result<(), ClientError> {
        self.core
            .write_object_property(self.core.object_id(), property, &value.into(), None)
            .await
    }

    /// Points whose priority 1 or 8 holds a value. A scan already in
    /// progress makes this return the last results at once unless `force`.
    pub async fn find_overrides(&self, force: bool) -> Result<Vec<String>, ClientError> {
        let scan = &self.core.overrides;
        if scan
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
            && !force
        {
            log::debug!("{}: override scan already running", self.core.label());
            return Ok(scan.found());
        }
        let _guard = ScanGuard(scan);
        scan.set_progress(0.0);

        let candidates: Vec<_> = self
            .points()
            .into_iter()
            .filter(|p| PointKind::is_commandable(p.object_id().object_type()))
            .filter(|p| !matches!(p.kind(), PointKind::Virtual | PointKind::Offline))
            .collect();
        let mut found = Vec::new();
        for (i, point) in candidates.iter().enumerate() {
            match point.is_overridden().await {
                Ok(true) => {
                    log::info!("{}: {} is overridden", self.core.label(), point.name());
                    found.push(point.name().to_string());
                }
                Ok(false) => {}
                Err(ClientError::NoResponseFromController) => return Err(ClientError::NoResponseFromController),
                Err(e) => log::debug!("{}: {} has no priority array ({e})", self.core.label(), point.name()),
            }
            scan.set_progress((i + 1) as f32 / candidates.len() as f32);
            tokio::task::yield_now().await;
        }
        scan.set_progress(1.0);
        *scan.found.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = found.clone();
        Ok(found)
    }

    /// Fraction of the current or last override scan that is done.
    pub fn override_scan_progress(&self) -> f32 {
        self.core.overrides.progress()
    }

    /// Writes null at priority 8 on every point the last scan found.
    pub async fn release_all_overrides(&self) -> Result<usize, ClientError> {
        let names = self.core.overrides.found();
        let mut released = 0;
        for name in &names {
            self.point(name)?.auto().await?;
            released += 1;
        }
        log::info!("{}: released {released} overrides", self.core.label());
        self.core
            .overrides
            .found
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        Ok(released)
    }

    /// All point histories as one frame, resampled when `resample` is given.
    pub fn history_frame(&self, resample: Option<chrono::Duration>) -> HistoryFrame {
        self.core.frame(resample)
    }

    pub fn clear_histories(&self) {
        self.core.clear_histories();
    }

    /// Trend log objects of the device, opened on first use and keyed by
    /// what they record.
    pub async fn trend_logs(&self) -> Result<Vec<Arc<TrendLog<D>>>, ClientError> {
        let client = self.core.network()?;
        let mut trends = self.core.trends.lock().await;
        if trends.is_empty() {
            let ids: Vec<ObjectId> = read_lock(&self.core.info)
                .object_list
                .into_iter()
                .filter(|id| id.object_type() == ObjectType::TrendLog)
                .collect();
            for id in ids {
                let log = TrendLog::open(Arc::clone(&client), self.core.address.clone(), id).await?;
                trends.insert(log.key().to_string(), Arc::new(log));
            }
        }
        Ok(trends.values().cloned().collect())
    }

    pub async fn trend_log(&self, key: &str) -> Result<Arc<TrendLog<D>>, ClientError> {
        self.trend_logs()
            .await?
            .into_iter()
            .find(|log| log.key() == key)
            .ok_or_else(|| ClientError::WrongParameter(format!("no trend log {key}")))
    }
}
