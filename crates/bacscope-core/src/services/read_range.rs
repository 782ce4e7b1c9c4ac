use crate::apdu::{ComplexAckHeader, ConfirmedRequestHeader};
use crate::encoding::{
    primitives::{
        decode_app_signed, decode_app_unsigned, decode_signed, decode_unsigned, encode_app_signed,
        encode_app_unsigned, encode_ctx_object_id, encode_ctx_unsigned, encode_signed,
        encode_unsigned,
    },
    reader::Reader,
    tag::{AppTag, Tag},
    writer::Writer,
};
use crate::types::{Date, ObjectId, PropertyId, Time};
use crate::{DecodeError, EncodeError};

#[cfg(feature = "alloc")]
use crate::services::value_codec::decode_application_data_value_from_tag;
#[cfg(feature = "alloc")]
use crate::types::{BitString, DataValue};
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub const SERVICE_READ_RANGE: u8 = 0x1A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRangeSpecifier {
    ByPosition { reference_index: i32, count: i16 },
    BySequenceNumber { reference_sequence: u32, count: i16 },
    ByTime { date: Date, time: Time, count: i16 },
    ReadAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRangeRequest {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub range: ReadRangeSpecifier,
    pub invoke_id: u8,
}

impl ReadRangeRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        ConfirmedRequestHeader {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: true,
            max_segments: 0,
            max_apdu: 5,
            invoke_id: self.invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_READ_RANGE,
        }
        .encode(w)?;

        encode_ctx_object_id(w, 0, self.object_id.raw())?;
        encode_ctx_unsigned(w, 1, self.property_id.to_u32())?;
        if let Some(array_index) = self.array_index {
            encode_ctx_unsigned(w, 2, array_index)?;
        }

        match self.range {
            ReadRangeSpecifier::ByPosition {
                reference_index,
                count,
            } => {
                let reference_index =
                    u32::try_from(reference_index).map_err(|_| EncodeError::ValueOutOfRange)?;
                Tag::Opening { tag_num: 3 }.encode(w)?;
                encode_app_unsigned(w, reference_index)?;
                encode_app_signed(w, count as i32)?;
                Tag::Closing { tag_num: 3 }.encode(w)?;
            }
            ReadRangeSpecifier::BySequenceNumber {
                reference_sequence,
                count,
            } => {
                Tag::Opening { tag_num: 6 }.encode(w)?;
                encode_app_unsigned(w, reference_sequence)?;
                encode_app_signed(w, count as i32)?;
                Tag::Closing { tag_num: 6 }.encode(w)?;
            }
            ReadRangeSpecifier::ByTime { date, time, count } => {
                Tag::Opening { tag_num: 7 }.encode(w)?;
                Tag::Application {
                    tag: AppTag::Date,
                    len: 4,
                }
                .encode(w)?;
                w.write_all(&[date.year_since_1900, date.month, date.day, date.weekday])?;
                Tag::Application {
                    tag: AppTag::Time,
                    len: 4,
                }
                .encode(w)?;
                w.write_all(&[time.hour, time.minute, time.second, time.hundredths])?;
                encode_app_signed(w, count as i32)?;
                Tag::Closing { tag_num: 7 }.encode(w)?;
            }
            ReadRangeSpecifier::ReadAll => {}
        }

        Ok(())
    }

    /// Decodes the service parameters of an incoming request. A request
    /// without a range clause reads the whole buffer.
    pub fn decode_after_header(r: &mut Reader<'_>, invoke_id: u8) -> Result<Self, DecodeError> {
        let object_id = match Tag::decode(r)? {
            Tag::Context { tag_num: 0, len } => ObjectId::from_raw(decode_unsigned(r, len as usize)?),
            _ => return Err(DecodeError::InvalidTag),
        };
        let property_id = match Tag::decode(r)? {
            Tag::Context { tag_num: 1, len } => PropertyId::from_u32(decode_unsigned(r, len as usize)?),
            _ => return Err(DecodeError::InvalidTag),
        };

        let mut array_index = None;
        let mut range = ReadRangeSpecifier::ReadAll;
        while !r.is_empty() {
            match Tag::decode(r)? {
                Tag::Context { tag_num: 2, len } if array_index.is_none() => {
                    array_index = Some(decode_unsigned(r, len as usize)?);
                }
                Tag::Opening { tag_num: 3 } => {
                    let reference_index = i32::try_from(decode_app_unsigned(r)?)
                        .map_err(|_| DecodeError::InvalidValue)?;
                    let count = decode_count(r)?;
                    expect_closing(r, 3)?;
                    range = ReadRangeSpecifier::ByPosition {
                        reference_index,
                        count,
                    };
                }
                Tag::Opening { tag_num: 6 } => {
                    let reference_sequence = decode_app_unsigned(r)?;
                    let count = decode_count(r)?;
                    expect_closing(r, 6)?;
                    range = ReadRangeSpecifier::BySequenceNumber {
                        reference_sequence,
                        count,
                    };
                }
                Tag::Opening { tag_num: 7 } => {
                    let date = match decode_app_four(r, AppTag::Date)? {
                        [y, m, d, wd] => Date {
                            year_since_1900: y,
                            month: m,
                            day: d,
                            weekday: wd,
                        },
                    };
                    let time = match decode_app_four(r, AppTag::Time)? {
                        [h, m, sec, hs] => Time::new(h, m, sec, hs),
                    };
                    let count = decode_count(r)?;
                    expect_closing(r, 7)?;
                    range = ReadRangeSpecifier::ByTime { date, time, count };
                }
                _ => return Err(DecodeError::InvalidTag),
            }
        }

        Ok(Self {
            object_id,
            property_id,
            array_index,
            range,
            invoke_id,
        })
    }

    pub fn by_position(
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
        reference_index: i32,
        count: i16,
        invoke_id: u8,
    ) -> Self {
        Self {
            object_id,
            property_id,
            array_index,
            range: ReadRangeSpecifier::ByPosition {
                reference_index,
                count,
            },
            invoke_id,
        }
    }

    pub fn by_sequence_number(
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
        reference_sequence: u32,
        count: i16,
        invoke_id: u8,
    ) -> Self {
        Self {
            object_id,
            property_id,
            array_index,
            range: ReadRangeSpecifier::BySequenceNumber {
                reference_sequence,
                count,
            },
            invoke_id,
        }
    }

    pub fn by_time(
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
        date: Date,
        time: Time,
        count: i16,
        invoke_id: u8,
    ) -> Self {
        Self {
            object_id,
            property_id,
            array_index,
            range: ReadRangeSpecifier::ByTime { date, time, count },
            invoke_id,
        }
    }

    pub fn read_all(
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
        invoke_id: u8,
    ) -> Self {
        Self {
            object_id,
            property_id,
            array_index,
            range: ReadRangeSpecifier::ReadAll,
            invoke_id,
        }
    }
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRangeAck<'a> {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub result_flags: BitString<'a>,
    pub item_count: u32,
    pub items: Vec<DataValue<'a>>,
    pub first_sequence_number: Option<u32>,
}

#[cfg(feature = "alloc")]
impl<'a> ReadRangeAck<'a> {
    pub fn decode_after_header(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let object_id = match Tag::decode(r)? {
            Tag::Context { tag_num: 0, len } => {
                if len != 4 {
                    return Err(DecodeError::InvalidLength);
                }
                ObjectId::from_raw(r.read_be_u32()?)
            }
            _ => return Err(DecodeError::InvalidTag),
        };

        let property_id = match Tag::decode(r)? {
            Tag::Context { tag_num: 1, len } => {
                PropertyId::from_u32(decode_unsigned(r, len as usize)?)
            }
            _ => return Err(DecodeError::InvalidTag),
        };

        let next = Tag::decode(r)?;
        let (array_index, result_flags_tag) = match next {
            Tag::Context { tag_num: 2, len } => {
                let idx = decode_unsigned(r, len as usize)?;
                (Some(idx), Tag::decode(r)?)
            }
            other => (None, other),
        };

        let result_flags = match result_flags_tag {
            Tag::Context { tag_num: 3, len } => {
                if len == 0 {
                    return Err(DecodeError::InvalidLength);
                }
                let raw = r.read_exact(len as usize)?;
                if raw[0] > 7 {
                    return Err(DecodeError::InvalidValue);
                }
                BitString {
                    unused_bits: raw[0],
                    data: &raw[1..],
                }
            }
            _ => return Err(DecodeError::InvalidTag),
        };

        let item_count = match Tag::decode(r)? {
            Tag::Context { tag_num: 4, len } => decode_unsigned(r, len as usize)?,
            _ => return Err(DecodeError::InvalidTag),
        };

        match Tag::decode(r)? {
            Tag::Opening { tag_num: 5 } => {}
            _ => return Err(DecodeError::InvalidTag),
        }

        let mut items = Vec::new();
        loop {
            let tag = Tag::decode(r)?;
            if tag == (Tag::Closing { tag_num: 5 }) {
                break;
            }

            items.push(decode_application_data_value_from_tag(r, tag)?);
        }

        let first_sequence_number = if r.is_empty() {
            None
        } else {
            match Tag::decode(r)? {
                Tag::Context { tag_num: 6, len } => Some(decode_unsigned(r, len as usize)?),
                _ => return Err(DecodeError::InvalidTag),
            }
        };

        Ok(Self {
            object_id,
            property_id,
            array_index,
            result_flags,
            item_count,
            items,
            first_sequence_number,
        })
    }

    /// Groups the item list into trend log records. Items that are not log
    /// records are skipped.
    pub fn log_records(&self) -> Result<Vec<LogRecord>, DecodeError> {
        let mut records = Vec::new();
        let mut iter = self.items.iter().peekable();
        while let Some(item) = iter.next() {
            let DataValue::Constructed {
                tag_num: 0,
                values: stamp,
            } = item
            else {
                continue;
            };
            let (date, time) = match stamp.as_slice() {
                [DataValue::Date(d), DataValue::Time(t)] => (*d, *t),
                _ => return Err(DecodeError::InvalidValue),
            };
            let datum = match iter.next() {
                Some(DataValue::Constructed {
                    tag_num: 1,
                    values,
                }) => match values.as_slice() {
                    [DataValue::Context { tag_num, data }] => LogDatum::decode(*tag_num, data)?,
                    [DataValue::Constructed { tag_num: 8, .. }] => LogDatum::Failure,
                    _ => LogDatum::Other,
                },
                _ => return Err(DecodeError::InvalidValue),
            };
            let status_flags = match iter.peek() {
                Some(DataValue::Context { tag_num: 2, data }) if !data.is_empty() => {
                    iter.next();
                    Some(data.get(1).copied().unwrap_or(0) >> 4)
                }
                _ => None,
            };
            records.push(LogRecord {
                date,
                time,
                datum,
                status_flags,
            });
        }
        Ok(records)
    }
}

/// Bits of the ReadRange result-flags bit string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultFlags {
    pub first_item: bool,
    pub last_item: bool,
    pub more_items: bool,
}

impl ResultFlags {
    fn to_octet(self) -> u8 {
        (u8::from(self.first_item) << 7) | (u8::from(self.last_item) << 6) | (u8::from(self.more_items) << 5)
    }

    pub fn from_octet(octet: u8) -> Self {
        Self {
            first_item: octet & 0x80 != 0,
            last_item: octet & 0x40 != 0,
            more_items: octet & 0x20 != 0,
        }
    }
}

/// The datum carried by one trend log record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogDatum {
    LogStatus(u8),
    Boolean(bool),
    Real(f32),
    Enumerated(u32),
    Unsigned(u32),
    Signed(i32),
    Null,
    Failure,
    TimeChange(f32),
    Other,
}

impl LogDatum {
    fn decode(tag_num: u8, data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        Ok(match tag_num {
            0 => Self::LogStatus(data.get(1).copied().unwrap_or(0)),
            1 => Self::Boolean(data.first().copied().unwrap_or(0) != 0),
            2 => Self::Real(decode_real(data)?),
            3 => Self::Enumerated(decode_unsigned(&mut r, data.len())?),
            4 => Self::Unsigned(decode_unsigned(&mut r, data.len())?),
            5 => Self::Signed(decode_signed(&mut r, data.len())?),
            7 => Self::Null,
            9 => Self::TimeChange(decode_real(data)?),
            _ => Self::Other,
        })
    }

    fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        Tag::Opening { tag_num: 1 }.encode(w)?;
        match *self {
            Self::LogStatus(bits) => {
                Tag::Context { tag_num: 0, len: 2 }.encode(w)?;
                w.write_all(&[5, bits])?;
            }
            Self::Boolean(v) => {
                Tag::Context { tag_num: 1, len: 1 }.encode(w)?;
                w.write_u8(u8::from(v))?;
            }
            Self::Real(v) | Self::TimeChange(v) => {
                let tag_num = if matches!(self, Self::Real(_)) { 2 } else { 9 };
                Tag::Context { tag_num, len: 4 }.encode(w)?;
                w.write_be_u32(v.to_bits())?;
            }
            Self::Enumerated(v) | Self::Unsigned(v) => {
                let tag_num = if matches!(self, Self::Enumerated(_)) { 3 } else { 4 };
                let mut scratch = [0u8; 4];
                let len = encode_unsigned(&mut Writer::new(&mut scratch), v)?;
                Tag::Context {
                    tag_num,
                    len: len as u32,
                }
                .encode(w)?;
                w.write_all(&scratch[..len])?;
            }
            Self::Signed(v) => {
                let mut scratch = [0u8; 4];
                let len = encode_signed(&mut Writer::new(&mut scratch), v)?;
                Tag::Context {
                    tag_num: 5,
                    len: len as u32,
                }
                .encode(w)?;
                w.write_all(&scratch[..len])?;
            }
            Self::Null | Self::Failure | Self::Other => {
                Tag::Context { tag_num: 7, len: 0 }.encode(w)?;
            }
        }
        Tag::Closing { tag_num: 1 }.encode(w)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Boolean(v) => Some(if v { 1.0 } else { 0.0 }),
            Self::Real(v) => Some(f64::from(v)),
            Self::Enumerated(v) | Self::Unsigned(v) => Some(f64::from(v)),
            Self::Signed(v) => Some(f64::from(v)),
            _ => None,
        }
    }
}

/// One entry of a trend log buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogRecord {
    pub date: Date,
    pub time: Time,
    pub datum: LogDatum,
    /// Status flags in the low four bits, when present.
    pub status_flags: Option<u8>,
}

impl LogRecord {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        Tag::Opening { tag_num: 0 }.encode(w)?;
        Tag::Application {
            tag: AppTag::Date,
            len: 4,
        }
        .encode(w)?;
        w.write_all(&[
            self.date.year_since_1900,
            self.date.month,
            self.date.day,
            self.date.weekday,
        ])?;
        Tag::Application {
            tag: AppTag::Time,
            len: 4,
        }
        .encode(w)?;
        w.write_all(&[
            self.time.hour,
            self.time.minute,
            self.time.second,
            self.time.hundredths,
        ])?;
        Tag::Closing { tag_num: 0 }.encode(w)?;
        self.datum.encode(w)?;
        if let Some(flags) = self.status_flags {
            Tag::Context { tag_num: 2, len: 2 }.encode(w)?;
            w.write_all(&[4, (flags & 0x0F) << 4])?;
        }
        Ok(())
    }
}

/// ReadRange answer over a log buffer, as produced by a local trend log.
#[derive(Debug, Clone, Copy)]
pub struct ReadRangeLogAck<'r> {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub result_flags: ResultFlags,
    pub records: &'r [LogRecord],
    pub first_sequence_number: Option<u32>,
}

impl ReadRangeLogAck<'_> {
    pub fn encode(&self, w: &mut Writer<'_>, invoke_id: u8) -> Result<(), EncodeError> {
        ComplexAckHeader {
            segmented: false,
            more_follows: false,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_READ_RANGE,
        }
        .encode(w)?;
        encode_ctx_object_id(w, 0, self.object_id.raw())?;
        encode_ctx_unsigned(w, 1, self.property_id.to_u32())?;
        Tag::Context { tag_num: 3, len: 2 }.encode(w)?;
        w.write_all(&[5, self.result_flags.to_octet()])?;
        let count = u32::try_from(self.records.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
        encode_ctx_unsigned(w, 4, count)?;
        Tag::Opening { tag_num: 5 }.encode(w)?;
        for record in self.records {
            record.encode(w)?;
        }
        Tag::Closing { tag_num: 5 }.encode(w)?;
        if let Some(seq) = self.first_sequence_number {
            encode_ctx_unsigned(w, 6, seq)?;
        }
        Ok(())
    }
}

fn decode_real(data: &[u8]) -> Result<f32, DecodeError> {
    match data {
        [a, b, c, d] => Ok(f32::from_bits(u32::from_be_bytes([*a, *b, *c, *d]))),
        _ => Err(DecodeError::InvalidLength),
    }
}

fn decode_count(r: &mut Reader<'_>) -> Result<i16, DecodeError> {
    i16::try_from(decode_app_signed(r)?).map_err(|_| DecodeError::InvalidValue)
}

fn expect_closing(r: &mut Reader<'_>, tag_num: u8) -> Result<(), DecodeError> {
    match Tag::decode(r)? {
        Tag::Closing { tag_num: n } if n == tag_num => Ok(()),
        _ => Err(DecodeError::InvalidTag),
    }
}

fn decode_app_four(r: &mut Reader<'_>, expected: AppTag) -> Result<[u8; 4], DecodeError> {
    match Tag::decode(r)? {
        Tag::Application { tag, len: 4 } if tag == expected => {
            let b = r.read_exact(4)?;
            Ok([b[0], b[1], b[2], b[3]])
        }
        _ => Err(DecodeError::InvalidTag),
    }
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "alloc")]
    use super::ReadRangeAck;
    use super::{ReadRangeRequest, ReadRangeSpecifier, SERVICE_READ_RANGE};
    #[cfg(feature = "alloc")]
    use crate::apdu::ComplexAckHeader;
    use crate::apdu::ConfirmedRequestHeader;
    #[cfg(feature = "alloc")]
    use crate::encoding::primitives::{encode_app_real, encode_ctx_object_id, encode_ctx_unsigned};
    #[cfg(feature = "alloc")]
    use crate::encoding::tag::Tag;
    use crate::encoding::{reader::Reader, writer::Writer};
    use crate::types::{ObjectId, ObjectType, PropertyId};

    #[test]
    fn encode_read_range_request_by_position() {
        let req = ReadRangeRequest {
            object_id: ObjectId::new(ObjectType::TrendLog, 1),
            property_id: PropertyId::PresentValue,
            array_index: None,
            range: ReadRangeSpecifier::ByPosition {
                reference_index: 1,
                count: 10,
            },
            invoke_id: 3,
        };

        let mut buf = [0u8; 128];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
        assert_eq!(header.service_choice, SERVICE_READ_RANGE);
        assert_eq!(header.invoke_id, 3);
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn decode_read_range_ack_minimal() {
        let mut buf = [0u8; 256];
        let mut w = Writer::new(&mut buf);
        ComplexAckHeader {
            segmented: false,
            more_follows: false,
            invoke_id: 9,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_READ_RANGE,
        }
        .encode(&mut w)
        .unwrap();
        encode_ctx_object_id(&mut w, 0, ObjectId::new(ObjectType::TrendLog, 1).raw()).unwrap();
        encode_ctx_unsigned(&mut w, 1, PropertyId::PresentValue.to_u32()).unwrap();
        Tag::Context { tag_num: 3, len: 2 }.encode(&mut w).unwrap();
        w.write_u8(5).unwrap();
        w.write_u8(0b1110_0000).unwrap();
        encode_ctx_unsigned(&mut w, 4, 2).unwrap();
        Tag::Opening { tag_num: 5 }.encode(&mut w).unwrap();
        encode_app_real(&mut w, 10.0).unwrap();
        encode_app_real(&mut w, 11.0).unwrap();
        Tag::Closing { tag_num: 5 }.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let _ack = ComplexAckHeader::decode(&mut r).unwrap();
        let parsed = ReadRangeAck::decode_after_header(&mut r).unwrap();
        assert_eq!(parsed.item_count, 2);
        assert_eq!(parsed.items.len(), 2);
    }

    #[test]
    fn server_decodes_every_range_form() {
        use crate::types::{Date, Time};

        let object_id = ObjectId::new(ObjectType::TrendLog, 4);
        let requests = [
            ReadRangeRequest::by_position(object_id, PropertyId::LogBuffer, None, 1, 10, 1),
            ReadRangeRequest::by_sequence_number(object_id, PropertyId::LogBuffer, None, 40, -5, 2),
            ReadRangeRequest::by_time(
                object_id,
                PropertyId::LogBuffer,
                None,
                Date::new(2024, 3, 1, 5),
                Time::new(12, 0, 0, 0),
                100,
                3,
            ),
            ReadRangeRequest::read_all(object_id, PropertyId::LogBuffer, Some(2), 4),
        ];
        for req in requests {
            let mut buf = [0u8; 64];
            let mut w = Writer::new(&mut buf);
            req.encode(&mut w).unwrap();
            let mut r = Reader::new(w.as_written());
            let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
            assert_eq!(
                ReadRangeRequest::decode_after_header(&mut r, header.invoke_id).unwrap(),
                req
            );
        }
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn log_buffer_ack_yields_records() {
        use super::{LogDatum, LogRecord, ReadRangeLogAck, ResultFlags};
        use crate::types::{Date, Time};

        let records = [
            LogRecord {
                date: Date::new(2024, 3, 1, 5),
                time: Time::new(10, 0, 0, 0),
                datum: LogDatum::Real(21.5),
                status_flags: Some(0),
            },
            LogRecord {
                date: Date::new(2024, 3, 1, 5),
                time: Time::new(10, 15, 0, 0),
                datum: LogDatum::Enumerated(1),
                status_flags: None,
            },
        ];
        let ack = ReadRangeLogAck {
            object_id: ObjectId::new(ObjectType::TrendLog, 0),
            property_id: PropertyId::LogBuffer,
            result_flags: ResultFlags {
                first_item: true,
                last_item: true,
                more_items: false,
            },
            records: &records,
            first_sequence_number: Some(1),
        };
        let mut buf = [0u8; 128];
        let mut w = Writer::new(&mut buf);
        ack.encode(&mut w, 7).unwrap();

        let mut r = Reader::new(w.as_written());
        ComplexAckHeader::decode(&mut r).unwrap();
        let parsed = ReadRangeAck::decode_after_header(&mut r).unwrap();
        assert_eq!(parsed.item_count, 2);
        assert_eq!(parsed.first_sequence_number, Some(1));
        assert!(ResultFlags::from_octet(parsed.result_flags.data[0]).last_item);
        assert_eq!(parsed.log_records().unwrap(), records);
    }
}
