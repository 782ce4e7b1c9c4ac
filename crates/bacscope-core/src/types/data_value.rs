use crate::types::{BitString, Date, ObjectId, Time};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// A decoded BACnet property value borrowing from the receive buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue<'a> {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(&'a [u8]),
    CharacterString(&'a str),
    BitString(BitString<'a>),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectId(ObjectId),
    /// A context-tagged primitive inside a constructed value, kept as raw
    /// content octets since its type is only known from the enclosing
    /// production.
    Context { tag_num: u8, data: &'a [u8] },
    /// Values bracketed by an opening/closing tag pair.
    #[cfg(feature = "alloc")]
    Constructed {
        tag_num: u8,
        values: Vec<DataValue<'a>>,
    },
    /// A property value made of several consecutive elements (arrays and
    /// lists), encoded back to back with no enclosing tags.
    #[cfg(feature = "alloc")]
    List(Vec<DataValue<'a>>),
}

impl DataValue<'_> {
    /// Numeric view used for COV increments and trend comparisons.
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
}
