use crate::value::bacnet_date_time;
use crate::ClientDataValue;
use bacscope_core::services::read_range::{LogDatum, LogRecord, ReadRangeSpecifier, ResultFlags};
use bacscope_core::types::{ErrorCode, ObjectId, ObjectType, PropertyId, StatusFlags};
use chrono::NaiveDateTime;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    sequence: u32,
    at: NaiveDateTime,
    record: LogRecord,
}

/// A trend log hosted by the local server. It records one property of
/// another hosted object each time that property changes.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrendLog {
    id: ObjectId,
    name: String,
    monitored: ObjectId,
    property: PropertyId,
    buffer_size: usize,
    enabled: bool,
    entries: VecDeque<Entry>,
    next_sequence: u32,
}

/// Slice of a log answering one ReadRange.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRange {
    pub flags: ResultFlags,
    pub records: Vec<LogRecord>,
    pub first_sequence_number: Option<u32>,
}

impl LocalTrendLog {
    pub fn new(
        instance: u32,
        name: impl Into<String>,
        monitored: ObjectId,
        property: PropertyId,
        buffer_size: usize,
    ) -> Self {
        Self {
            id: ObjectId::new(ObjectType::TrendLog, instance),
            name: name.into(),
            monitored,
            property,
            buffer_size: buffer_size.max(1),
            enabled: true,
            entries: VecDeque::new(),
            next_sequence: 1,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn monitored(&self) -> (ObjectId, PropertyId) {
        (self.monitored, self.property)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_record_count(&self) -> u32 {
        self.next_sequence - 1
    }

    /// Appends a record, evicting the oldest one when the buffer is full.
    pub fn record(&mut self, at: NaiveDateTime, value: &ClientDataValue, status: StatusFlags) {
        if !self.enabled {
            return;
        }
        let (date, time) = bacnet_date_time(at);
        let datum = match value {
            ClientDataValue::Real(v) => LogDatum::Real(*v),
            ClientDataValue::Double(v) => LogDatum::Real(*v as f32),
            ClientDataValue::Boolean(v) => LogDatum::Boolean(*v),
            ClientDataValue::Enumerated(v) => LogDatum::Enumerated(*v),
            ClientDataValue::Unsigned(v) => LogDatum::Unsigned(*v),
            ClientDataValue::Signed(v) => LogDatum::Signed(*v),
            ClientDataValue::Null => LogDatum::Null,
            _ => LogDatum::Failure,
        };
        if self.entries.len() == self.buffer_size {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry {
            sequence: self.next_sequence,
            at,
            record: LogRecord {
                date,
                time,
                datum,
                status_flags: Some(status.to_octet() >> 4),
            },
        });
        self.next_sequence = self.next_sequence.wrapping_add(1).max(1);
    }

    pub fn read(&self, property: PropertyId) -> Result<ClientDataValue, ErrorCode> {
        Ok(match property {
            PropertyId::ObjectIdentifier => ClientDataValue::ObjectId(self.id),
            PropertyId::ObjectName => ClientDataValue::CharacterString(self.name.clone()),
            PropertyId::ObjectType => {
                ClientDataValue::Enumerated(u32::from(ObjectType::TrendLog.to_u16()))
            }
            PropertyId::Enable => ClientDataValue::Boolean(self.enabled),
            PropertyId::BufferSize => ClientDataValue::Unsigned(self.buffer_size as u32),
            PropertyId::RecordCount => ClientDataValue::Unsigned(self.entries.len() as u32),
            PropertyId::TotalRecordCount => ClientDataValue::Unsigned(self.total_record_count()),
            PropertyId::StatusFlags => ClientDataValue::BitString {
                unused_bits: StatusFlags::UNUSED_BITS,
                data: vec![0],
            },
            PropertyId::LogDeviceObjectProperty => ClientDataValue::List(vec![
                ClientDataValue::ObjectId(self.monitored),
                ClientDataValue::Enumerated(self.property.to_u32()),
            ]),
            PropertyId::LogBuffer => return Err(ErrorCode::ReadAccessDenied),
            _ => return Err(ErrorCode::UnknownProperty),
        })
    }

    pub fn write(&mut self, property: PropertyId, value: &ClientDataValue) -> Result<(), ErrorCode> {
        match (property, value) {
            (PropertyId::Enable, ClientDataValue::Boolean(enabled)) => self.enabled = *enabled,
            (PropertyId::RecordCount, ClientDataValue::Unsigned(0)) => self.entries.clear(),
            (PropertyId::ObjectName, ClientDataValue::CharacterString(name)) => {
                self.name = name.clone()
            }
            (PropertyId::Enable | PropertyId::RecordCount | PropertyId::ObjectName, _) => {
                return Err(ErrorCode::InvalidDataType)
            }
            (PropertyId::ObjectIdentifier | PropertyId::ObjectType | PropertyId::LogBuffer, _)
            | (PropertyId::TotalRecordCount | PropertyId::BufferSize, _) => {
                return Err(ErrorCode::WriteAccessDenied)
            }
            _ => return Err(ErrorCode::UnknownProperty),
        }
        Ok(())
    }

    /// Selects the records a ReadRange asks for.
    pub fn range(&self, spec: &ReadRangeSpecifier) -> LogRange {
        let len = self.entries.len();
        let selected = match *spec {
            ReadRangeSpecifier::ReadAll => (len > 0).then(|| (0, len)),
            ReadRangeSpecifier::ByPosition {
                reference_index,
                count,
            } => usize::try_from(reference_index)
                .ok()
                .filter(|r| (1..=len).contains(r))
                .and_then(|r| window(r - 1, count, len)),
            ReadRangeSpecifier::BySequenceNumber {
                reference_sequence,
                count,
            } => self
                .entries
                .iter()
                .position(|e| e.sequence == reference_sequence)
                .and_then(|start| window(start, count, len)),
            ReadRangeSpecifier::ByTime { date, time, count } => {
                crate::value::naive_date_time(date, time).and_then(|reference| {
                    let start = if count >= 0 {
                        self.entries.iter().position(|e| e.at >= reference)
                    } else {
                        self.entries.iter().rposition(|e| e.at <= reference)
                    };
                    start.and_then(|start| window(start, count, len))
                })
            }
        };

        match selected {
            Some((from, to)) => LogRange {
                flags: ResultFlags {
                    first_item: from == 0,
                    last_item: to == len,
                    more_items: match spec {
                        ReadRangeSpecifier::ByPosition { count, .. }
                        | ReadRangeSpecifier::BySequenceNumber { count, .. }
                        | ReadRangeSpecifier::ByTime { count, .. }
                            if *count < 0 =>
                        {
                            from > 0
                        }
                        _ => to < len,
                    },
                },
                records: self.entries.range(from..to).map(|e| e.record).collect(),
                first_sequence_number: self.entries.get(from).map(|e| e.sequence),
            },
            None => LogRange {
                flags: ResultFlags::default(),
                records: Vec::new(),
                first_sequence_number: None,
            },
        }
    }
}

/// Half-open index window of `count` items anchored at `anchor`; a negative
/// count reaches backwards and includes the anchor.
fn window(anchor: usize, count: i16, len: usize) -> Option<(usize, usize)> {
    let span = usize::from(count.unsigned_abs());
    if span == 0 {
        return None;
    }
    Some(if count > 0 {
        (anchor, (anchor + span).min(len))
    } else {
        ((anchor + 1).saturating_sub(span), anchor + 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(12, 0, second)
            .unwrap()
    }

    fn log_with(values: &[f32], buffer_size: usize) -> LocalTrendLog {
        let mut log = LocalTrendLog::new(
            1,
            "trend",
            ObjectId::new(ObjectType::AnalogValue, 0),
            PropertyId::PresentValue,
            buffer_size,
        );
        for (i, v) in values.iter().enumerate() {
            log.record(at(i as u32), &ClientDataValue::Real(*v), StatusFlags::default());
        }
        log
    }

    #[test]
    fn buffer_evicts_oldest_and_keeps_sequence() {
        let log = log_with(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(log.len(), 3);
        assert_eq!(log.total_record_count(), 4);
        let all = log.range(&ReadRangeSpecifier::ReadAll);
        assert_eq!(all.first_sequence_number, Some(2));
        assert_eq!(all.records[0].datum, LogDatum::Real(2.0));
        assert!(all.flags.first_item && all.flags.last_item && !all.flags.more_items);
    }

    #[test]
    fn by_position_both_directions() {
        let log = log_with(&[1.0, 2.0, 3.0, 4.0, 5.0], 10);
        let forward = log.range(&ReadRangeSpecifier::ByPosition {
            reference_index: 2,
            count: 2,
        });
        assert_eq!(forward.records.len(), 2);
        assert_eq!(forward.records[0].datum, LogDatum::Real(2.0));
        assert!(forward.flags.more_items);
        assert!(!forward.flags.first_item);

        let backward = log.range(&ReadRangeSpecifier::ByPosition {
            reference_index: 2,
            count: -5,
        });
        assert_eq!(backward.records.len(), 2);
        assert!(backward.flags.first_item);
        assert!(!backward.flags.more_items);

        let outside = log.range(&ReadRangeSpecifier::ByPosition {
            reference_index: 9,
            count: 1,
        });
        assert!(outside.records.is_empty());
    }

    #[test]
    fn by_sequence_and_time() {
        let log = log_with(&[1.0, 2.0, 3.0], 10);
        let by_seq = log.range(&ReadRangeSpecifier::BySequenceNumber {
            reference_sequence: 3,
            count: 1,
        });
        assert_eq!(by_seq.first_sequence_number, Some(3));

        let (date, time) = bacnet_date_time(at(1));
        let by_time = log.range(&ReadRangeSpecifier::ByTime {
            date,
            time,
            count: 10,
        });
        assert_eq!(by_time.records.len(), 2);
        assert_eq!(by_time.first_sequence_number, Some(2));
    }

    #[test]
    fn log_buffer_only_through_read_range() {
        let mut log = log_with(&[1.0], 10);
        assert_eq!(log.read(PropertyId::LogBuffer), Err(ErrorCode::ReadAccessDenied));
        log.write(PropertyId::RecordCount, &ClientDataValue::Unsigned(0))
            .unwrap();
        assert!(log.is_empty());
        assert_eq!(log.read(PropertyId::TotalRecordCount), Ok(ClientDataValue::Unsigned(1)));
    }
}
