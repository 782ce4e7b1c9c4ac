//! Points: typed views of a device's objects with a bounded value history.

use super::poll::TaskHandle;
use super::DeviceCore;
use crate::request::WriteValue;
use crate::{ClientDataValue, ClientError, CovCallback, CovSubscription};
use bacscope_core::types::{units_name, ObjectId, ObjectType, PropertyId};
use bacscope_datalink::DataLink;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// Samples kept per point unless the device says otherwise.
pub const DEFAULT_HISTORY_SIZE: usize = 10_000;

/// Priority used by manual overrides.
pub const OVERRIDE_PRIORITY: u8 = 8;

const DEFAULT_BINARY_STATES: [&str; 2] = ["inactive", "active"];

/// How a point's value is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    Numeric,
    Boolean,
    Enumerated,
    /// Not backed by a controller object; values are set by the caller.
    Virtual,
    /// Restored from a snapshot.
    Offline,
}

impl PointKind {
    /// Kind of the points discovery builds for `object_type`.
    pub fn of(object_type: ObjectType) -> Option<Self> {
        match object_type {
            ObjectType::AnalogInput
            | ObjectType::AnalogOutput
            | ObjectType::AnalogValue
            | ObjectType::Accumulator
            | ObjectType::PulseConverter => Some(Self::Numeric),
            ObjectType::BinaryInput | ObjectType::BinaryOutput | ObjectType::BinaryValue => Some(Self::Boolean),
            ObjectType::MultiStateInput | ObjectType::MultiStateOutput | ObjectType::MultiStateValue => {
                Some(Self::Enumerated)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Enumerated => "enumerated",
            Self::Virtual => "virtual",
            Self::Offline => "offline",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Numeric, Self::Boolean, Self::Enumerated, Self::Virtual, Self::Offline]
            .into_iter()
            .find(|kind| kind.as_str() == name)
    }

    /// Whether present-value writes are accepted at a priority.
    pub fn is_commandable(object_type: ObjectType) -> bool {
        matches!(
            object_type,
            ObjectType::AnalogOutput
                | ObjectType::AnalogValue
                | ObjectType::BinaryOutput
                | ObjectType::BinaryValue
                | ObjectType::MultiStateOutput
                | ObjectType::MultiStateValue
        )
    }
}

/// One sample of a point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Number(f64),
    Binary(bool),
    /// Multi-state index, 1-based.
    State(u32),
    Text(String),
}

impl PointValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Binary(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::State(v) => Some(f64::from(*v)),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for PointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Binary(v) => write!(f, "{}", u8::from(*v)),
            Self::State(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Static description of a point, as discovered or restored.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDefinition {
    pub object_id: ObjectId,
    pub name: String,
    pub description: String,
    pub kind: PointKind,
    /// Engineering units of numeric points.
    pub units: Option<String>,
    /// State text: `[inactive, active]` for binary points, stateText for multi-state.
    pub states: Vec<String>,
    /// Kind the point had on the controller, kept by offline points.
    pub online_kind: Option<PointKind>,
}

impl PointDefinition {
    pub fn new(object_id: ObjectId, name: impl Into<String>, kind: PointKind) -> Self {
        Self {
            object_id,
            name: name.into(),
            description: String::new(),
            kind,
            units: None,
            states: Vec::new(),
            online_kind: None,
        }
    }

    pub(crate) fn units_from_value(value: &ClientDataValue) -> Option<String> {
        match value {
            ClientDataValue::Enumerated(v) => Some(units_name(*v).map_or_else(|| v.to_string(), str::to_string)),
            ClientDataValue::CharacterString(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Converts a wire value the way this point's kind reads it.
    pub fn interpret(&self, value: &ClientDataValue) -> Option<PointValue> {
        match self.kind {
            PointKind::Numeric => value.as_f64().map(PointValue::Number),
            PointKind::Boolean => value.as_bool().map(PointValue::Binary),
            PointKind::Enumerated => value.as_u32().map(PointValue::State),
            PointKind::Virtual | PointKind::Offline => match value.as_f64() {
                Some(v) => Some(PointValue::Number(v)),
                None if value.is_null() => None,
                None => Some(PointValue::Text(value.to_string())),
            },
        }
    }

    /// `index:label` for binary and multi-state values, plain text otherwise.
    pub fn render(&self, value: &PointValue) -> String {
        match value {
            PointValue::Binary(active) => {
                let index = usize::from(*active);
                let label = self
                    .states
                    .get(index)
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_BINARY_STATES[index]);
                format!("{index}:{label}")
            }
            PointValue::State(index) => match (*index as usize)
                .checked_sub(1)
                .and_then(|i| self.states.get(i))
            {
                Some(label) => format!("{index}:{label}"),
                None => "n/a".to_string(),
            },
            other => other.to_string(),
        }
    }

    /// Whether snapshots carry a `<name>_str` twin column.
    pub fn has_text_column(&self) -> bool {
        matches!(
            self.online_kind.unwrap_or(self.kind),
            PointKind::Boolean | PointKind::Enumerated
        )
    }
}

/// Bounded, time-ordered samples.
///
/// A sample older than the newest one held is stamped with the newest
/// timestamp instead, so the buffer never goes back in time.
#[derive(Debug, Clone)]
pub struct History {
    capacity: usize,
    samples: VecDeque<(DateTime<Utc>, PointValue)>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    pub fn push(&mut self, at: DateTime<Utc>, value: PointValue) {
        let at = match self.samples.back() {
            Some((newest, _)) if at < *newest => *newest,
            _ => at,
        };
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((at, value));
    }

    pub fn last(&self) -> Option<&(DateTime<Utc>, PointValue)> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DateTime<Utc>, PointValue)> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl From<PointValue> for WriteValue {
    fn from(value: PointValue) -> Self {
        match value {
            PointValue::Number(n) => Self::Number(n),
            PointValue::Binary(true) => Self::Active,
            PointValue::Binary(false) => Self::Inactive,
            PointValue::State(n) => Self::Number(f64::from(n)),
            PointValue::Text(text) => Self::Text(text),
        }
    }
}

/// Whether `current` already holds `target`, allowing for REAL rounding.
fn matches_target(current: Option<&PointValue>, target: &PointValue) -> bool {
    match (current.and_then(PointValue::as_f64), target.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() <= 1e-4 * b.abs().max(1.0),
        _ => current == Some(target),
    }
}

fn is_input(object_type: ObjectType) -> bool {
    matches!(
        object_type,
        ObjectType::AnalogInput | ObjectType::BinaryInput | ObjectType::MultiStateInput
    )
}

fn is_output(object_type: ObjectType) -> bool {
    matches!(
        object_type,
        ObjectType::AnalogOutput | ObjectType::BinaryOutput | ObjectType::MultiStateOutput
    )
}

/// A point of a [`Device`](super::Device).
pub struct Point<D: DataLink + 'static> {
    name: String,
    definition: RwLock<PointDefinition>,
    history: Mutex<History>,
    device: Weak<DeviceCore<D>>,
    cov: Mutex<Option<CovSubscription>>,
    matcher: Mutex<Option<TaskHandle>>,
}

impl<D: DataLink + 'static> fmt::Debug for Point<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Point")
            .field("definition", &*self.def())
            .field("last_value", &self.last_value())
            .finish()
    }
}

impl<D: DataLink + 'static> Point<D> {
    pub(crate) fn new(definition: PointDefinition, history_size: usize, device: Weak<DeviceCore<D>>) -> Self {
        Self {
            name: definition.name.clone(),
            definition: RwLock::new(definition),
            history: Mutex::new(History::new(history_size)),
            device,
            cov: Mutex::new(None),
            matcher: Mutex::new(None),
        }
    }

    fn def(&self) -> RwLockReadGuard<'_, PointDefinition> {
        self.definition.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn history_guard(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cov_guard(&self) -> MutexGuard<'_, Option<CovSubscription>> {
        self.cov.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn matcher_guard(&self) -> MutexGuard<'_, Option<TaskHandle>> {
        self.matcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn device(&self) -> Result<Arc<DeviceCore<D>>, ClientError> {
        self.device.upgrade().ok_or(ClientError::DeviceNotConnected)
    }

    pub fn definition(&self) -> PointDefinition {
        self.def().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object_id(&self) -> ObjectId {
        self.def().object_id
    }

    pub fn kind(&self) -> PointKind {
        self.def().kind
    }

    pub fn description(&self) -> String {
        self.def().description.clone()
    }

    pub(crate) fn record(&self, value: PointValue) {
        self.record_at(Utc::now(), value);
    }

    pub(crate) fn record_at(&self, at: DateTime<Utc>, value: PointValue) {
        self.history_guard().push(at, value);
    }

    /// Interprets and records a value read from the controller.
    pub(crate) fn record_wire(&self, value: &ClientDataValue) -> Option<PointValue> {
        let value = self.def().interpret(value)?;
        self.record(value.clone());
        Some(value)
    }

    /// Newest sample, without touching the network.
    pub fn last_value(&self) -> Option<PointValue> {
        self.history_guard().last().map(|(_, v)| v.clone())
    }

    /// Newest sample rendered as text (`1:active`, `2:Occupied`, `21.5`).
    pub fn last_text(&self) -> Option<String> {
        let value = self.last_value()?;
        Some(self.def().render(&value))
    }

    pub fn history(&self) -> Vec<(DateTime<Utc>, PointValue)> {
        self.history_guard().iter().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history_guard().len()
    }

    pub fn clear_history(&self) {
        self.history_guard().clear();
    }

    /// Reads presentValue from the controller and records it. Offline and
    /// virtual points answer with their newest sample.
    pub async fn value(&self) -> Result<PointValue, ClientError> {
        let device = self.device()?;
        if matches!(self.kind(), PointKind::Virtual | PointKind::Offline) || !device.state().is_connected() {
            return self.last_value().ok_or(ClientError::DeviceNotConnected);
        }
        let raw = device
            .read_object_property(self.object_id(), PropertyId::PresentValue, None)
            .await?;
        self.record_wire(&raw).ok_or_else(|| {
            ClientError::WrongParameter(format!("{}: unexpected present value {raw}", self.name()))
        })
    }

    /// Writes presentValue, then reads it back into the history. `None`
    /// priority lets the controller pick its default.
    pub async fn write(&self, value: impl Into<WriteValue>, priority: Option<u8>) -> Result<(), ClientError> {
        let value = value.into();
        let device = self.device()?;
        if self.kind() == PointKind::Virtual {
            let sample = match value {
                WriteValue::Null => None,
                WriteValue::Number(n) => Some(PointValue::Number(n)),
                WriteValue::Active => Some(PointValue::Binary(true)),
                WriteValue::Inactive => Some(PointValue::Binary(false)),
                WriteValue::Text(text) => Some(PointValue::Text(text)),
                WriteValue::Typed(raw) => self.def().interpret(&raw),
            };
            if let Some(sample) = sample {
                self.record(sample);
            }
            return Ok(());
        }
        device
            .write_object_property(self.object_id(), PropertyId::PresentValue, &value, priority)
            .await?;
        self.value().await.map(|_| ())
    }

    /// Writes relinquishDefault, the value a commandable object falls back
    /// to once every priority is released.
    pub async fn default(&self, value: impl Into<WriteValue>) -> Result<(), ClientError> {
        self.device()?
            .write_object_property(self.object_id(), PropertyId::RelinquishDefault, &value.into(), None)
            .await
    }

    /// Writes the object's description and keeps what the controller reports back.
    pub async fn update_description(&self, text: &str) -> Result<(), ClientError> {
        let device = self.device()?;
        let object_id = self.object_id();
        device
            .write_object_property(object_id, PropertyId::Description, &WriteValue::Text(text.to_string()), None)
            .await?;
        let stored = device
            .read_object_property(object_id, PropertyId::Description, None)
            .await?;
        let stored = stored.as_str().map_or_else(|| stored.to_string(), str::to_string);
        self.definition
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .description = stored;
        Ok(())
    }

    /// Writes at the override priority.
    pub async fn ovr(&self, value: impl Into<WriteValue>) -> Result<(), ClientError> {
        self.write(value, Some(OVERRIDE_PRIORITY)).await
    }

    /// Releases the override priority.
    pub async fn auto(&self) -> Result<(), ClientError> {
        self.write(WriteValue::Null, Some(OVERRIDE_PRIORITY)).await
    }

    /// Releases both manual priorities (1 and 8).
    pub async fn release_ovr(&self) -> Result<(), ClientError> {
        self.write(WriteValue::Null, Some(1)).await?;
        self.write(WriteValue::Null, Some(OVERRIDE_PRIORITY)).await
    }

    /// Puts the object out of service, then writes its present value.
    pub async fn sim(&self, value: impl Into<WriteValue>) -> Result<(), ClientError> {
        let device = self.device()?;
        device
            .write_object_property(self.object_id(), PropertyId::OutOfService, &WriteValue::Active, None)
            .await?;
        self.write(value, None).await
    }

    pub async fn release_sim(&self) -> Result<(), ClientError> {
        self.device()?
            .write_object_property(self.object_id(), PropertyId::OutOfService, &WriteValue::Inactive, None)
            .await
    }

    /// Commands the point the way its object expects: inputs are
    /// simulated, outputs overridden and everything else written.
    pub async fn set(&self, value: impl Into<WriteValue>) -> Result<(), ClientError> {
        let object_type = self.object_id().object_type();
        if self.kind() != PointKind::Virtual && is_input(object_type) {
            self.sim(value).await
        } else if is_output(object_type) {
            self.ovr(value).await
        } else {
            self.write(value, None).await
        }
    }

    /// Undoes [`set`](Self::set) on inputs and outputs. Values have nothing to release.
    pub async fn release(&self) -> Result<(), ClientError> {
        let object_type = self.object_id().object_type();
        if self.kind() == PointKind::Virtual {
            Ok(())
        } else if is_input(object_type) {
            self.release_sim().await
        } else if is_output(object_type) {
            self.auto().await
        } else {
            Ok(())
        }
    }

    /// Whether priority 1 or 8 holds a value.
    pub async fn is_overridden(&self) -> Result<bool, ClientError> {
        let slots = self.device()?.read_priority_array(self.object_id()).await?;
        let held = |priority: usize| slots.get(priority - 1).is_some_and(Option::is_some);
        Ok(held(1) || held(usize::from(OVERRIDE_PRIORITY)))
    }

    /// Subscribes to COV on the object; notified present values go to the
    /// history and the device's polling skips the point until
    /// [`cancel_cov`](Self::cancel_cov). Replaces an earlier subscription.
    pub async fn subscribe_cov(self: &Arc<Self>, lifetime_seconds: u32, confirmed: bool) -> Result<(), ClientError> {
        let device = self.device()?;
        let point = Arc::downgrade(self);
        let callback = CovCallback::sync(move |property, value| {
            if property != PropertyId::PresentValue {
                return;
            }
            if let Some(point) = point.upgrade() {
                if point.record_wire(&value).is_none() {
                    log::debug!("{}: ignored COV value {value}", point.name());
                }
            }
        });
        let subscription = device
            .subscribe_cov(self.object_id(), lifetime_seconds, confirmed, callback)
            .await?;
        log::info!("{}: COV subscription {} started", self.name(), subscription.process_id());
        let previous = self.cov_guard().replace(subscription);
        if let Some(previous) = previous {
            if let Err(e) = device.cancel_cov(previous).await {
                log::debug!("{}: cancelling the previous COV subscription failed: {e}", self.name());
            }
        }
        Ok(())
    }

    /// Cancels the COV subscription, if any, and lets polling read the point again.
    pub async fn cancel_cov(&self) -> Result<(), ClientError> {
        let Some(subscription) = self.cov_guard().take() else {
            return Ok(());
        };
        log::info!("{}: cancelling COV subscription {}", self.name(), subscription.process_id());
        match self.device() {
            Ok(device) => device.cancel_cov(subscription).await,
            Err(_) => Ok(()),
        }
    }

    pub fn is_cov_active(&self) -> bool {
        self.cov_guard().as_ref().is_some_and(CovSubscription::is_active)
    }

    /// Every `delay`, commands this point to the newest value of `command`
    /// when the two differ, like a status following its command. Replaces
    /// a running match; stopping it releases the point.
    pub fn match_point(self: &Arc<Self>, command: &Arc<Point<D>>, delay: Duration) {
        let command = Arc::downgrade(command);
        self.start_matching(delay, false, move || command.upgrade().and_then(|c| c.last_value()));
    }

    /// Every `delay`, reads the point and commands it to `value` when it
    /// holds something else.
    pub fn match_value(self: &Arc<Self>, value: PointValue, delay: Duration) {
        self.start_matching(delay, true, move || Some(value.clone()));
    }

    pub fn stop_match(&self) {
        let handle = self.matcher_guard().take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    pub fn is_matching(&self) -> bool {
        self.matcher_guard().as_ref().is_some_and(TaskHandle::is_running)
    }

    fn start_matching<F>(self: &Arc<Self>, delay: Duration, read_back: bool, target: F)
    where
        F: Fn() -> Option<PointValue> + Send + 'static,
    {
        self.stop_match();
        let (stop, mut stop_rx) = watch::channel(false);
        let point = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                let Some(this) = point.upgrade() else {
                    return;
                };
                if let Some(target) = target() {
                    let current = if read_back {
                        this.value().await.ok()
                    } else {
                        this.last_value()
                    };
                    if !matches_target(current.as_ref(), &target) {
                        log::debug!("{}: matching {target}", this.name());
                        if let Err(e) = this.set(target.clone()).await {
                            log::warn!("{}: cannot match {target}: {e}", this.name());
                        }
                    }
                }
                drop(this);
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if let Some(this) = point.upgrade() {
                if let Err(e) = this.release().await {
                    log::warn!("{}: release after matching failed: {e}", this.name());
                }
            }
        });
        *self.matcher_guard() = Some(TaskHandle::new(stop, task, delay));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn multi_state() -> PointDefinition {
        let mut def = PointDefinition::new(
            ObjectId::new(ObjectType::MultiStateValue, 1),
            "mode",
            PointKind::Enumerated,
        );
        def.states = vec!["Off".into(), "Occupied".into(), "Unoccupied".into()];
        def
    }

    #[test]
    fn kinds_follow_object_type() {
        assert_eq!(PointKind::of(ObjectType::AnalogInput), Some(PointKind::Numeric));
        assert_eq!(PointKind::of(ObjectType::BinaryValue), Some(PointKind::Boolean));
        assert_eq!(PointKind::of(ObjectType::MultiStateOutput), Some(PointKind::Enumerated));
        assert_eq!(PointKind::of(ObjectType::Device), None);
        assert!(PointKind::is_commandable(ObjectType::BinaryOutput));
        assert!(!PointKind::is_commandable(ObjectType::AnalogInput));
        assert_eq!(PointKind::from_name("boolean"), Some(PointKind::Boolean));
    }

    #[test]
    fn multi_state_renders_one_based_label() {
        let def = multi_state();
        assert_eq!(def.render(&PointValue::State(2)), "2:Occupied");
        assert_eq!(def.render(&PointValue::State(0)), "n/a");
        assert_eq!(def.render(&PointValue::State(4)), "n/a");
    }

    #[test]
    fn binary_renders_with_state_text_when_present() {
        let mut def = PointDefinition::new(ObjectId::new(ObjectType::BinaryInput, 3), "fan", PointKind::Boolean);
        assert_eq!(def.render(&PointValue::Binary(false)), "0:inactive");
        def.states = vec!["Stopped".into(), "Running".into()];
        assert_eq!(def.render(&PointValue::Binary(true)), "1:Running");
        assert_eq!(
            def.interpret(&ClientDataValue::Enumerated(1)),
            Some(PointValue::Binary(true))
        );
    }

    #[test]
    fn history_evicts_oldest_first() {
        let mut history = History::new(2);
        let t0 = Utc::now();
        for (i, v) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            history.push(t0 + Duration::seconds(i as i64), PointValue::Number(v));
        }
        let values: Vec<f64> = history.iter().filter_map(|(_, v)| v.as_f64()).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    proptest! {
        #[test]
        fn history_stays_bounded_and_ordered(
            capacity in 1usize..32,
            offsets in proptest::collection::vec(-50i64..50, 0..200),
        ) {
            let mut history = History::new(capacity);
            let t0 = Utc::now();
            for (i, offset) in offsets.iter().enumerate() {
                history.push(t0 + Duration::seconds(*offset), PointValue::Number(i as f64));
            }
            prop_assert!(history.len() <= capacity);
            prop_assert_eq!(history.len(), offsets.len().min(capacity));
            let stamps: Vec<_> = history.iter().map(|(t, _)| *t).collect();
            prop_assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
        }
    }
}
