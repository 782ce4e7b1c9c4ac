use bacscope_core::types::{BitString, DataValue, Date, ObjectId, Time};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

/// BACnet date and time of a wall-clock instant (weekday 1 = Monday).
pub fn bacnet_date_time(at: NaiveDateTime) -> (Date, Time) {
    let date = Date::new(
        u16::try_from(at.year()).unwrap_or(0),
        at.month() as u8,
        at.day() as u8,
        at.weekday().number_from_monday() as u8,
    );
    let time = Time::new(
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
        (at.nanosecond() / 10_000_000).min(99) as u8,
    );
    (date, time)
}

/// Inverse of [`bacnet_date_time`]; `None` for wildcard or invalid fields.
pub fn naive_date_time(date: Date, time: Time) -> Option<NaiveDateTime> {
    let day = NaiveDate::from_ymd_opt(
        i32::from(date.year()?),
        u32::from(date.month),
        u32::from(date.day),
    )?;
    day.and_hms_milli_opt(
        u32::from(time.hour),
        u32::from(time.minute),
        u32::from(time.second),
        u32::from(time.hundredths) * 10,
    )
}

/// Owned counterpart of [`DataValue`], returned by every read.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientDataValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString { unused_bits: u8, data: Vec<u8> },
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectId(ObjectId),
    /// Context-tagged primitive whose meaning depends on the enclosing property.
    Context { tag_num: u8, data: Vec<u8> },
    Constructed { tag_num: u8, values: Vec<ClientDataValue> },
    /// Sequence of values, such as an array property read without an index.
    List(Vec<ClientDataValue>),
}

impl From<DataValue<'_>> for ClientDataValue {
    fn from(value: DataValue<'_>) -> Self {
        match value {
            DataValue::Null => Self::Null,
            DataValue::Boolean(v) => Self::Boolean(v),
            DataValue::Unsigned(v) => Self::Unsigned(v),
            DataValue::Signed(v) => Self::Signed(v),
            DataValue::Real(v) => Self::Real(v),
            DataValue::Double(v) => Self::Double(v),
            DataValue::OctetString(v) => Self::OctetString(v.to_vec()),
            DataValue::CharacterString(v) => Self::CharacterString(v.to_string()),
            DataValue::BitString(v) => Self::BitString {
                unused_bits: v.unused_bits,
                data: v.data.to_vec(),
            },
            DataValue::Enumerated(v) => Self::Enumerated(v),
            DataValue::Date(v) => Self::Date(v),
            DataValue::Time(v) => Self::Time(v),
            DataValue::ObjectId(v) => Self::ObjectId(v),
            DataValue::Context { tag_num, data } => Self::Context {
                tag_num,
                data: data.to_vec(),
            },
            DataValue::Constructed { tag_num, values } => Self::Constructed {
                tag_num,
                values: values.into_iter().map(Self::from).collect(),
            },
            DataValue::List(values) => Self::List(values.into_iter().map(Self::from).collect()),
        }
    }
}

impl ClientDataValue {
    /// Borrowed view for the wire encoders.
    pub fn to_data_value(&self) -> DataValue<'_> {
        match self {
            Self::Null => DataValue::Null,
            Self::Boolean(v) => DataValue::Boolean(*v),
            Self::Unsigned(v) => DataValue::Unsigned(*v),
            Self::Signed(v) => DataValue::Signed(*v),
            Self::Real(v) => DataValue::Real(*v),
            Self::Double(v) => DataValue::Double(*v),
            Self::OctetString(v) => DataValue::OctetString(v),
            Self::CharacterString(v) => DataValue::CharacterString(v),
            Self::BitString { unused_bits, data } => {
                DataValue::BitString(BitString::new(*unused_bits, data))
            }
            Self::Enumerated(v) => DataValue::Enumerated(*v),
            Self::Date(v) => DataValue::Date(*v),
            Self::Time(v) => DataValue::Time(*v),
            Self::ObjectId(v) => DataValue::ObjectId(*v),
            Self::Context { tag_num, data } => DataValue::Context {
                tag_num: *tag_num,
                data,
            },
            Self::Constructed { tag_num, values } => DataValue::Constructed {
                tag_num: *tag_num,
                values: values.iter().map(Self::to_data_value).collect(),
            },
            Self::List(values) => DataValue::List(values.iter().map(Self::to_data_value).collect()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Unsigned(v) | Self::Enumerated(v) => Some(f64::from(*v)),
            Self::Signed(v) => Some(f64::from(*v)),
            Self::Real(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Unsigned(v) | Self::Enumerated(v) => Some(*v),
            Self::Boolean(v) => Some(u32::from(*v)),
            Self::Signed(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::CharacterString(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            Self::Enumerated(v) | Self::Unsigned(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Elements of a list value; any other value is a list of one.
    pub fn elements(&self) -> &[ClientDataValue] {
        match self {
            Self::List(values) => values,
            other => std::slice::from_ref(other),
        }
    }

    /// Strings of a list of character strings (state text, object names).
    pub fn string_list(&self) -> Vec<String> {
        self.elements()
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }
}

impl fmt::Display for ClientDataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Unsigned(v) | Self::Enumerated(v) => write!(f, "{v}"),
            Self::Signed(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::OctetString(v) | Self::Context { data: v, .. } => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::CharacterString(v) => f.write_str(v),
            Self::BitString { data, unused_bits } => {
                let bits = data.len() * 8 - usize::from(*unused_bits).min(data.len() * 8);
                for i in 0..bits {
                    let set = data[i / 8] & (0x80 >> (i % 8)) != 0;
                    f.write_str(if set { "1" } else { "0" })?;
                }
                Ok(())
            }
            Self::Date(d) => match d.year() {
                Some(year) => write!(f, "{year:04}-{:02}-{:02}", d.month, d.day),
                None => write!(f, "*-{:02}-{:02}", d.month, d.day),
            },
            Self::Time(t) => write!(
                f,
                "{:02}:{:02}:{:02}.{:02}",
                t.hour, t.minute, t.second, t.hundredths
            ),
            Self::ObjectId(id) => write!(f, "{id}"),
            Self::Constructed { values, .. } | Self::List(values) => {
                f.write_str("[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_and_borrowed_forms_agree() {
        let value = ClientDataValue::Constructed {
            tag_num: 0,
            values: vec![
                ClientDataValue::Real(21.5),
                ClientDataValue::CharacterString("zone".into()),
                ClientDataValue::List(vec![ClientDataValue::Null, ClientDataValue::Unsigned(3)]),
            ],
        };
        assert_eq!(ClientDataValue::from(value.to_data_value()), value);
    }

    #[test]
    fn accessors_and_display() {
        assert_eq!(ClientDataValue::Real(99.9).as_f64().map(|v| v as f32), Some(99.9));
        assert_eq!(ClientDataValue::Enumerated(1).as_bool(), Some(true));
        let states = ClientDataValue::List(vec![
            ClientDataValue::CharacterString("Off".into()),
            ClientDataValue::CharacterString("On".into()),
        ]);
        assert_eq!(states.string_list(), vec!["Off", "On"]);
        assert_eq!(states.to_string(), "[Off, On]");
        let flags = ClientDataValue::BitString {
            unused_bits: 4,
            data: vec![0x20],
        };
        assert_eq!(flags.to_string(), "0010");
    }

    #[test]
    fn clock_conversion() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(14, 30, 7, 250)
            .unwrap();
        let (date, time) = bacnet_date_time(at);
        assert_eq!(date.weekday, 2);
        assert_eq!(time.hundredths, 25);
        assert_eq!(naive_date_time(date, time), Some(at));
        assert_eq!(naive_date_time(Date::new(0, 1, 1, 0xFF), time), None);
    }
}
