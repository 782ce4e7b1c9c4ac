//! Remote trend logs.
//!
//! A [`TrendLog`] pulls a controller's log buffer with ReadRange in batches
//! and keeps every record it has seen, keyed by sequence number. Nothing is
//! read until [`TrendLog::refresh`] is called; later refreshes only ask for
//! records newer than the last one held.

use crate::value::naive_date_time;
use crate::{Address, BacnetClient, ClientDataValue, ClientError};
use bacscope_core::services::read_range::{LogDatum, ReadRangeSpecifier};
use bacscope_core::types::{ObjectId, ObjectType, PropertyId};
use bacscope_datalink::DataLink;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Records requested per ReadRange.
pub const DEFAULT_BATCH: i16 = 50;

/// One entry of a remote log buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendRecord {
    pub sequence: u32,
    /// `None` when the controller sent a wildcard or invalid date/time.
    pub timestamp: Option<NaiveDateTime>,
    pub datum: LogDatum,
    pub status_flags: Option<u8>,
}

impl TrendRecord {
    pub fn value(&self) -> Option<f64> {
        self.datum.as_f64()
    }
}

/// `<logged-obj-type>_<instance>_<property>` for the property a log watches.
pub fn trend_key(logged: ObjectId, property: PropertyId) -> String {
    let object_type = logged.object_type();
    let type_name = object_type
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("@obj_{}", object_type.to_u16()));
    let property_name = property
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("@prop_{}", property.to_u32()));
    format!("{type_name}_{}_{property_name}", logged.instance())
}

/// Reads the object and property out of a logDeviceObjectProperty value.
fn logged_reference(value: &ClientDataValue) -> Option<(ObjectId, PropertyId)> {
    let items = match value {
        ClientDataValue::Constructed { values, .. } => values.as_slice(),
        other => other.elements(),
    };
    let mut object = None;
    let mut property = None;
    for item in items {
        match item {
            ClientDataValue::ObjectId(id) => object = Some(*id),
            ClientDataValue::Context { tag_num: 0, data } if data.len() == 4 => {
                let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                object = Some(ObjectId::from_raw(raw));
            }
            ClientDataValue::Context { tag_num: 1, data } if data.len() <= 4 => {
                let raw = data.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
                property = Some(PropertyId::from_u32(raw));
            }
            _ => {}
        }
    }
    Some((object?, property.unwrap_or(PropertyId::PresentValue)))
}

/// A trend log object on a remote device.
pub struct TrendLog<D: DataLink + 'static> {
    client: Arc<BacnetClient<D>>,
    address: Address,
    object_id: ObjectId,
    key: String,
    batch: i16,
    records: Mutex<BTreeMap<u32, TrendRecord>>,
}

impl<D: DataLink + 'static> std::fmt::Debug for TrendLog<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendLog")
            .field("address", &self.address)
            .field("object_id", &self.object_id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<D: DataLink + 'static> TrendLog<D> {
    /// Resolves what the log watches to build its key. A log whose
    /// logDeviceObjectProperty cannot be read is keyed by its own id.
    pub async fn open(
        client: Arc<BacnetClient<D>>,
        address: Address,
        object_id: ObjectId,
    ) -> Result<Self, ClientError> {
        if object_id.object_type() != ObjectType::TrendLog {
            return Err(ClientError::WrongParameter(format!("{object_id} is not a trend log")));
        }
        let key = match client
            .read_property(&address, object_id, PropertyId::LogDeviceObjectProperty, None)
            .await
        {
            Ok(value) => match logged_reference(&value) {
                Some((logged, property)) => trend_key(logged, property),
                None => trend_key(object_id, PropertyId::LogBuffer),
            },
            Err(e) => {
                log::debug!("{address} {object_id}: no logDeviceObjectProperty ({e})");
                trend_key(object_id, PropertyId::LogBuffer)
            }
        };
        Ok(Self {
            client,
            address,
            object_id,
            key,
            batch: DEFAULT_BATCH,
            records: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn with_batch(mut self, batch: i16) -> Self {
        self.batch = batch.max(1);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn last_sequence(&self) -> Option<u32> {
        self.records
            .lock()
            .ok()
            .and_then(|records| records.keys().next_back().copied())
    }

    /// Fetches records newer than the last one held. Returns how many were added.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        let mut added = 0;
        let mut position = 1i32;
        loop {
            let range = match self.last_sequence() {
                Some(last) => ReadRangeSpecifier::BySequenceNumber {
                    reference_sequence: last.saturating_add(1),
                    count: self.batch,
                },
                None => ReadRangeSpecifier::ByPosition {
                    reference_index: position,
                    count: self.batch,
                },
            };
            let result = self
                .client
                .read_range(&self.address, self.object_id, range)
                .await?;
            if result.records.is_empty() {
                break;
            }

            let first = result.first_sequence_number.unwrap_or(position as u32);
            let count = result.records.len();
            {
                let mut records = self
                    .records
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                for (offset, record) in result.records.into_iter().enumerate() {
                    let sequence = first.wrapping_add(offset as u32);
                    let entry = TrendRecord {
                        sequence,
                        timestamp: naive_date_time(record.date, record.time),
                        datum: record.datum,
                        status_flags: record.status_flags,
                    };
                    if records.insert(sequence, entry).is_none() {
                        added += 1;
                    }
                }
            }
            position = position.saturating_add(count as i32);

            if !result.flags.more_items {
                break;
            }
        }
        log::debug!("{} {}: {added} new trend records", self.address, self.key);
        Ok(added)
    }

    /// Records held so far, oldest first.
    pub fn history(&self) -> Vec<TrendRecord> {
        self.records
            .lock()
            .map(|records| records.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
