//! Snapshots: histories to SQLite, definitions to a JSON sidecar, and back.

use super::{read_lock, write_lock, Device, DeviceCore, DeviceInfo, DeviceOptions, Effect, Event, Point, PointDefinition, PointKind, PointValue};
use crate::request::parse_object_type;
use crate::{Address, BacnetClient, ClientError};
use bacscope_core::types::ObjectId;
use bacscope_datalink::DataLink;
use bacscope_store::{
    parse_frequency, Aggregation, Column, DeviceMeta, FrameBuilder, HistoryFrame, HistoryStore, PointMeta, Sidecar,
    SnapshotPaths,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Suffix of the text twin of binary and multi-state columns.
const TEXT_SUFFIX: &str = "_str";

/// `"1s"`-style frequency to a resampling step; empty or `"0"` means none.
fn resampling_step(frequency: Option<&str>) -> Result<Option<chrono::Duration>, ClientError> {
    match frequency.map(str::trim) {
        None | Some("") | Some("0") => Ok(None),
        Some(text) => Ok(Some(parse_frequency(text)?)),
    }
}

fn parse_object_id(text: &str) -> Option<ObjectId> {
    let (object_type, instance) = text.rsplit_once(':')?;
    Some(ObjectId::new(parse_object_type(object_type).ok()?, instance.parse().ok()?))
}

fn point_meta(definition: &PointDefinition) -> PointMeta {
    PointMeta {
        name: definition.name.clone(),
        object_type: definition.object_id.object_type().name().map_or_else(
            || format!("@obj_{}", definition.object_id.object_type().to_u16()),
            str::to_string,
        ),
        instance: definition.object_id.instance(),
        kind: definition.online_kind.unwrap_or(definition.kind).as_str().to_string(),
        description: definition.description.clone(),
        units: definition.units.clone(),
        states: definition.states.clone(),
    }
}

/// An offline point remembering the kind it was saved with.
fn point_definition(meta: &PointMeta) -> PointDefinition {
    let object_type = parse_object_type(&meta.object_type).unwrap_or(bacscope_core::types::ObjectType::AnalogValue);
    let mut definition =
        PointDefinition::new(ObjectId::new(object_type, meta.instance), meta.name.clone(), PointKind::Offline);
    definition.online_kind = PointKind::from_name(&meta.kind).filter(|kind| *kind != PointKind::Offline);
    definition.description = meta.description.clone();
    definition.units = meta.units.clone();
    definition.states = meta.states.clone();
    definition
}

/// Stored columns that belong to no point of the sidecar.
fn unlisted_columns<'a>(frame: &'a HistoryFrame, points: &BTreeMap<String, PointMeta>) -> Vec<&'a str> {
    frame
        .column_names()
        .filter(|column| {
            let owner = column.strip_suffix(TEXT_SUFFIX).unwrap_or(*column);
            !points.contains_key(*column) && !points.contains_key(owner)
        })
        .collect()
}

/// A stored number back to the sample it was saved from.
fn restored_value(kind: PointKind, number: f64) -> PointValue {
    match kind {
        PointKind::Boolean => PointValue::Binary(number != 0.0),
        PointKind::Enumerated => PointValue::State(number.round().max(0.0) as u32),
        _ => PointValue::Number(number),
    }
}

/// Adds the columns of one point's samples to `builder`.
fn add_point_columns(
    builder: &mut FrameBuilder,
    definition: &PointDefinition,
    samples: &[(DateTime<Utc>, PointValue)],
) -> bool {
    let numbers: Vec<(DateTime<Utc>, f64)> = samples
        .iter()
        .filter_map(|(at, value)| value.as_f64().map(|v| (*at, v)))
        .collect();
    let stateful = samples
        .iter()
        .any(|(_, value)| matches!(value, PointValue::Binary(_) | PointValue::State(_)));

    if !numbers.is_empty() {
        let aggregation = if stateful { Aggregation::Last } else { Aggregation::Mean };
        builder.numeric(definition.name.clone(), numbers, aggregation);
        if stateful {
            let texts = samples.iter().map(|(at, value)| (*at, definition.render(value)));
            builder.text(format!("{}{TEXT_SUFFIX}", definition.name), texts);
        }
        return true;
    }

    let texts: Vec<(DateTime<Utc>, String)> = samples
        .iter()
        .filter_map(|(at, value)| match value {
            PointValue::Text(text) => Some((*at, text.clone())),
            _ => None,
        })
        .collect();
    if texts.is_empty() {
        return false;
    }
    builder.text(definition.name.clone(), texts);
    true
}

impl<D: DataLink + 'static> DeviceCore<D> {
    pub(crate) fn frame(&self, resample: Option<chrono::Duration>) -> HistoryFrame {
        let mut builder = FrameBuilder::new();
        for point in self.all_points() {
            let samples = point.history();
            if !add_point_columns(&mut builder, &point.definition(), &samples) {
                log::warn!("{}: {} has no history to save", self.label(), point.name());
            }
        }
        builder.build(resample)
    }

    fn sidecar(&self) -> Sidecar {
        let info = read_lock(&self.info);
        let points = self
            .all_points()
            .iter()
            .map(|point| (point.name().to_string(), point_meta(&point.definition())))
            .collect();
        Sidecar {
            device: DeviceMeta {
                name: info.name,
                address: self.address.to_string(),
                device_id: self.device_id,
                vendor_id: info.vendor_id,
                segmentation_supported: info.segmentation_supported,
                poll_delay_secs: self.options.poll_delay.map(|d| d.as_secs()),
                save_resampling: self.options.save_resampling.clone(),
                history_size: Some(self.options.history_size),
                object_list: info.object_list.iter().map(ObjectId::to_string).collect(),
            },
            points,
        }
    }

    /// Appends the histories to `<name>.db` and rewrites `<name>.json`.
    /// Returns the number of rows written.
    pub(crate) async fn save(&self, name: Option<&Path>) -> Result<usize, ClientError> {
        let base: PathBuf = match name {
            Some(name) => name.to_path_buf(),
            None => read_lock(&self.snapshot).unwrap_or_else(|| PathBuf::from(format!("Device_{}", self.device_id))),
        };
        let paths = SnapshotPaths::for_name(&base);
        let resample = resampling_step(self.options.save_resampling.as_deref())?;

        let frame = self.frame(resample);
        if frame.is_empty() {
            log::info!("{}: nothing to save", self.label());
            return Ok(0);
        }

        let store = HistoryStore::open(&paths.db).await?;
        let written = store.append(&frame).await;
        store.close().await;
        let written = written?;
        self.sidecar().write(&paths.sidecar)?;
        *write_lock(&self.snapshot) = Some(base);

        log::info!("{}: saved {written} rows to {}", self.label(), paths.db.display());
        if self.options.clear_history_after_save {
            self.clear_histories();
        }
        Ok(written)
    }

    /// Replaces points and info with what the snapshot at `name` holds.
    pub(crate) async fn restore(self: &Arc<Self>, name: &Path) -> Result<(), ClientError> {
        let paths = SnapshotPaths::for_name(name);
        let sidecar = Sidecar::read(&paths.sidecar)?;
        let store = HistoryStore::open(&paths.db).await?;
        let frame = store.load().await;
        store.close().await;
        let frame = frame?;

        let weak = Arc::downgrade(self);
        let mut points = BTreeMap::new();
        for (point_name, meta) in &sidecar.points {
            let definition = point_definition(meta);
            let kind = definition.online_kind.unwrap_or(PointKind::Offline);
            let point = Point::new(definition, self.options.history_size, weak.clone());
            match frame.column(point_name) {
                Some(Column::Numeric(_)) => {
                    for (at, number) in frame.numeric_series(point_name) {
                        point.record_at(at, restored_value(kind, number));
                    }
                }
                Some(Column::Text(cells)) => {
                    for (at, text) in frame.index().iter().zip(cells) {
                        if let Some(text) = text {
                            point.record_at(*at, PointValue::Text(text.clone()));
                        }
                    }
                }
                None => log::warn!("{}: {point_name} has no stored column", paths.db.display()),
            }
            points.insert(point_name.clone(), Arc::new(point));
        }

        for column in unlisted_columns(&frame, &sidecar.points) {
            log::warn!("{}: column {column} has no point in {}", paths.db.display(), paths.sidecar.display());
        }

        let object_list = sidecar
            .device
            .object_list
            .iter()
            .filter_map(|text| parse_object_id(text))
            .collect();
        *write_lock(&self.info) = DeviceInfo {
            name: sidecar.device.name.clone(),
            vendor_id: sidecar.device.vendor_id,
            segmentation_supported: sidecar.device.segmentation_supported,
            object_list,
            ..DeviceInfo::default()
        };
        log::info!("{}: restored {} points from {}", self.label(), points.len(), paths.db.display());
        *write_lock(&self.points) = points;
        *write_lock(&self.snapshot) = Some(name.to_path_buf());
        for effect in self.apply(Event::Restored) {
            if effect == Effect::StopPolling {
                self.stop_polling();
            }
        }
        Ok(())
    }
}

impl<D: DataLink + 'static> Device<D> {
    /// Saves the histories under `name`, or under the device's snapshot
    /// name (`Device_<id>` by default). Returns the number of rows written.
    pub async fn save(&self, name: Option<&Path>) -> Result<usize, ClientError> {
        self.core.save(name).await
    }

    /// Builds an offline device from the snapshot at `name`; every saved
    /// point comes back as a [`PointKind::Offline`] point. With a client the
    /// device can later [`connect`](Self::connect) to the live controller.
    pub async fn load(name: impl AsRef<Path>, client: Option<Arc<BacnetClient<D>>>) -> Result<Self, ClientError> {
        let name = name.as_ref();
        let sidecar = Sidecar::read(&SnapshotPaths::for_name(name).sidecar)?;
        let address: Address = sidecar.device.address.parse().map_err(|e| {
            ClientError::BadDeviceDefinition(format!("{}: bad address {:?} ({e})", name.display(), sidecar.device.address))
        })?;
        let defaults = DeviceOptions::default();
        let options = DeviceOptions {
            poll_delay: sidecar.device.poll_delay_secs.map(Duration::from_secs).or(defaults.poll_delay),
            history_size: sidecar.device.history_size.unwrap_or(defaults.history_size),
            save_resampling: sidecar.device.save_resampling.clone(),
            snapshot: Some(name.to_path_buf()),
            ..defaults
        };
        let device = Self {
            core: Arc::new(DeviceCore::new(client, address, sidecar.device.device_id, options)),
        };
        device.core.restore(name).await?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bacscope_core::types::ObjectType;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn zero_frequency_disables_resampling() {
        assert_eq!(resampling_step(None).unwrap(), None);
        assert_eq!(resampling_step(Some("0")).unwrap(), None);
        assert_eq!(resampling_step(Some("5min")).unwrap(), Some(chrono::Duration::minutes(5)));
        assert!(resampling_step(Some("fortnight")).is_err());
    }

    #[test]
    fn binary_points_get_a_text_twin() {
        let mut definition = PointDefinition::new(ObjectId::new(ObjectType::BinaryValue, 1), "fan", PointKind::Boolean);
        definition.states = vec!["Off".into(), "On".into()];
        let mut builder = FrameBuilder::new();
        assert!(add_point_columns(
            &mut builder,
            &definition,
            &[(at(0), PointValue::Binary(false)), (at(1), PointValue::Binary(true))],
        ));
        let frame = builder.build(None);
        assert_eq!(frame.last_number("fan"), Some(1.0));
        assert_eq!(frame.last_text("fan_str"), Some("1:On"));
    }

    #[test]
    fn empty_history_adds_nothing() {
        let definition = PointDefinition::new(ObjectId::new(ObjectType::AnalogInput, 1), "t", PointKind::Numeric);
        let mut builder = FrameBuilder::new();
        assert!(!add_point_columns(&mut builder, &definition, &[]));
        assert!(builder.build(None).is_empty());
    }

    #[test]
    fn restored_points_are_offline_but_remember_their_kind() {
        let mut definition = PointDefinition::new(ObjectId::new(ObjectType::MultiStateValue, 7), "mode", PointKind::Enumerated);
        definition.states = vec!["Off".into(), "Auto".into()];
        let meta = point_meta(&definition);
        assert_eq!(meta.object_type, "multiStateValue");

        let restored = point_definition(&meta);
        assert_eq!(restored.kind, PointKind::Offline);
        assert_eq!(restored.online_kind, Some(PointKind::Enumerated));
        assert_eq!(restored.states, definition.states);
        assert!(restored.has_text_column());
        assert_eq!(point_meta(&restored), meta);

        let mut unknown = meta.clone();
        unknown.kind = "thermostat".into();
        assert_eq!(point_definition(&unknown).online_kind, None);

        assert_eq!(restored_value(PointKind::Enumerated, 2.0), PointValue::State(2));
        assert_eq!(parse_object_id("multiStateValue:7"), Some(definition.object_id));
    }

    #[test]
    fn columns_without_a_point_are_reported() {
        let mut builder = FrameBuilder::new();
        builder.numeric("fan".to_string(), vec![(at(0), 1.0)], Aggregation::Last);
        builder.text("fan_str".to_string(), vec![(at(0), "1:On".to_string())]);
        builder.numeric("removed".to_string(), vec![(at(0), 4.0)], Aggregation::Mean);
        let frame = builder.build(None);

        let fan = PointDefinition::new(ObjectId::new(ObjectType::BinaryValue, 1), "fan", PointKind::Boolean);
        let points = BTreeMap::from([("fan".to_string(), point_meta(&fan))]);
        assert_eq!(unlisted_columns(&frame, &points), vec!["removed"]);
    }
}
