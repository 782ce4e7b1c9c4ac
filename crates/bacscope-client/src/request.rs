//! Textual and structured request values.
//!
//! ```text
//! read      : ADDR OBJ_TYPE OBJ_INST PROP_ID [ARRAY_INDEX]
//! readMulti : ADDR ( OBJ_TYPE OBJ_INST (PROP_ID [ARRAY_INDEX])+ )+
//! write     : ADDR OBJ_TYPE OBJ_INST PROP_ID VALUE [ARRAY_INDEX | '-'] [PRIORITY]
//! ```
//!
//! Strings are parsed once into [`ReadRequest`], [`ReadMultipleRequest`] and
//! [`WriteRequest`]; the client only ever executes the structured form.

use crate::server::objects::{coerce, ValueKind};
use crate::server::vendor::Datatype;
use crate::{Address, ClientDataValue, ClientError};
use bacscope_core::types::{ObjectId, ObjectType, PropertyId};
use std::fmt;
use std::str::FromStr;

const MAX_INSTANCE: u32 = 4_194_303;

fn wrong(msg: impl Into<String>) -> ClientError {
    ClientError::WrongParameter(msg.into())
}

/// Parses `@obj_<n>` or a standard object type name.
pub fn parse_object_type(token: &str) -> Result<ObjectType, ClientError> {
    if let Some(raw) = token.strip_prefix("@obj_") {
        let raw: u16 = raw
            .parse()
            .map_err(|_| wrong(format!("bad object type {token:?}")))?;
        return Ok(ObjectType::from_u16(raw));
    }
    ObjectType::from_name(token).ok_or_else(|| wrong(format!("unknown object type {token:?}")))
}

/// Parses `@prop_<n>` or a standard property name.
pub fn parse_property(token: &str) -> Result<PropertyId, ClientError> {
    if let Some(raw) = token.strip_prefix("@prop_") {
        let raw: u32 = raw
            .parse()
            .map_err(|_| wrong(format!("bad property {token:?}")))?;
        return Ok(PropertyId::from_u32(raw));
    }
    PropertyId::from_name(token).ok_or_else(|| wrong(format!("unknown property {token:?}")))
}

fn parse_instance(token: &str) -> Result<u32, ClientError> {
    token
        .parse::<u32>()
        .ok()
        .filter(|i| *i <= MAX_INSTANCE)
        .ok_or_else(|| wrong(format!("bad object instance {token:?}")))
}

fn parse_index(token: &str) -> Result<u32, ClientError> {
    token
        .parse()
        .map_err(|_| wrong(format!("bad array index {token:?}")))
}

/// Splits on whitespace, keeping double-quoted runs together (quotes kept).
fn tokenize(text: &str) -> Result<Vec<String>, ClientError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                current.push(c);
                quoted = !quoted;
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err(wrong(format!("unterminated quote in {text:?}")));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: Address,
    pub object_id: ObjectId,
    pub property: PropertyId,
    pub array_index: Option<u32>,
}

impl ReadRequest {
    pub fn new(address: Address, object_id: ObjectId, property: PropertyId) -> Self {
        Self {
            address,
            object_id,
            property,
            array_index: None,
        }
    }

    pub fn at_index(mut self, index: u32) -> Self {
        self.array_index = Some(index);
        self
    }
}

impl FromStr for ReadRequest {
    type Err = ClientError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(text)?;
        let [address, object_type, instance, property, rest @ ..] = tokens.as_slice() else {
            return Err(wrong(format!("read needs ADDR OBJ_TYPE OBJ_INST PROP_ID: {text:?}")));
        };
        let array_index = match rest {
            [] => None,
            [index] => Some(parse_index(index)?),
            _ => return Err(wrong(format!("trailing tokens in {text:?}"))),
        };
        Ok(Self {
            address: address.parse()?,
            object_id: ObjectId::new(parse_object_type(object_type)?, parse_instance(instance)?),
            property: parse_property(property)?,
            array_index,
        })
    }
}

/// One object of a [`ReadMultipleRequest`] with its property references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectProperties {
    pub object_id: ObjectId,
    pub properties: Vec<(PropertyId, Option<u32>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMultipleRequest {
    pub address: Address,
    pub objects: Vec<ObjectProperties>,
}

impl ReadMultipleRequest {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            objects: Vec::new(),
        }
    }

    pub fn object(mut self, object_id: ObjectId, properties: &[PropertyId]) -> Self {
        self.objects.push(ObjectProperties {
            object_id,
            properties: properties.iter().map(|p| (*p, None)).collect(),
        });
        self
    }

    pub fn property_count(&self) -> usize {
        self.objects.iter().map(|o| o.properties.len()).sum()
    }
}

impl FromStr for ReadMultipleRequest {
    type Err = ClientError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(text)?;
        let Some((address, tokens)) = tokens.split_first() else {
            return Err(wrong("empty readMulti request"));
        };
        let mut request = Self::new(address.parse()?);
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i].as_str();
            let next = tokens.get(i + 1).map(String::as_str);
            let after = tokens.get(i + 2).map(String::as_str);
            // A name that is both an object type and a property starts a new
            // object only when an instance and a property follow it.
            let starts_object = parse_object_type(token).is_ok()
                && next.is_some_and(|n| n.parse::<u32>().is_ok())
                && (parse_property(token).is_err() || after.is_some_and(|a| parse_property(a).is_ok()));

            if starts_object {
                let instance = parse_instance(next.unwrap_or_default())?;
                request.objects.push(ObjectProperties {
                    object_id: ObjectId::new(parse_object_type(token)?, instance),
                    properties: Vec::new(),
                });
                i += 2;
                continue;
            }

            let Some(current) = request.objects.last_mut() else {
                return Err(wrong(format!("readMulti expects an object before {token:?}")));
            };
            let property = parse_property(token)?;
            match next.map(str::parse::<u32>) {
                Some(Ok(index)) => {
                    current.properties.push((property, Some(index)));
                    i += 2;
                }
                _ => {
                    current.properties.push((property, None));
                    i += 1;
                }
            }
        }
        if request.objects.is_empty() || request.objects.iter().any(|o| o.properties.is_empty()) {
            return Err(wrong(format!("readMulti needs at least one property per object: {text:?}")));
        }
        Ok(request)
    }
}

/// A literal to write, before it is cast to the target property's datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Null,
    Number(f64),
    Active,
    Inactive,
    Text(String),
    /// Already typed; sent as is.
    Typed(ClientDataValue),
}

impl WriteValue {
    fn parse(token: &str) -> Result<Self, ClientError> {
        if let Some(inner) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            return Ok(Self::Text(inner.to_string()));
        }
        Ok(match token.to_ascii_lowercase().as_str() {
            "null" => Self::Null,
            "active" | "true" => Self::Active,
            "inactive" | "false" => Self::Inactive,
            _ => match token.parse::<f64>() {
                Ok(n) if n.is_finite() => Self::Number(n),
                _ => Self::Text(token.to_string()),
            },
        })
    }

    fn literal(&self) -> ClientDataValue {
        match self {
            Self::Null => ClientDataValue::Null,
            Self::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= f64::from(u32::MAX) => {
                ClientDataValue::Unsigned(*n as u32)
            }
            Self::Number(n) if n.fract() == 0.0 && *n >= f64::from(i32::MIN) && *n < 0.0 => {
                ClientDataValue::Signed(*n as i32)
            }
            Self::Number(n) => ClientDataValue::Real(*n as f32),
            Self::Active => ClientDataValue::Enumerated(1),
            Self::Inactive => ClientDataValue::Enumerated(0),
            Self::Text(text) => ClientDataValue::CharacterString(text.clone()),
            Self::Typed(value) => value.clone(),
        }
    }

    /// Casts the literal to what `property` of `object_type` holds.
    /// `vendor` gives the datatype of a proprietary property when known.
    pub fn cast(
        &self,
        object_type: ObjectType,
        property: PropertyId,
        vendor: Option<Datatype>,
    ) -> Result<ClientDataValue, ClientError> {
        let cast_error = |reason: &str| {
            ClientError::WritePropertyCastError(format!("{self} as {property:?} of {object_type:?}: {reason}"))
        };
        if let Self::Null | Self::Typed(_) = self {
            return Ok(self.literal());
        }
        if let Some(datatype) = vendor {
            return datatype
                .parse(&self.to_string())
                .ok_or_else(|| cast_error("vendor datatype mismatch"));
        }

        match property {
            PropertyId::PresentValue | PropertyId::RelinquishDefault => match ValueKind::of(object_type) {
                Some(kind) => coerce(kind, &self.literal(), None).map_err(|e| cast_error(&format!("{e:?}"))),
                None => Ok(self.literal()),
            },
            PropertyId::CovIncrement | PropertyId::HighLimit | PropertyId::LowLimit | PropertyId::Deadband => {
                match self {
                    Self::Number(n) => Ok(ClientDataValue::Real(*n as f32)),
                    _ => Err(cast_error("expected a number")),
                }
            }
            PropertyId::OutOfService => match self {
                Self::Active => Ok(ClientDataValue::Boolean(true)),
                Self::Inactive => Ok(ClientDataValue::Boolean(false)),
                Self::Number(n) if *n == 0.0 || *n == 1.0 => Ok(ClientDataValue::Boolean(*n == 1.0)),
                _ => Err(cast_error("expected a boolean")),
            },
            PropertyId::ObjectName | PropertyId::Description => match self {
                Self::Text(text) => Ok(ClientDataValue::CharacterString(text.clone())),
                Self::Number(n) => Ok(ClientDataValue::CharacterString(n.to_string())),
                _ => Err(cast_error("expected a string")),
            },
            PropertyId::Units => match self {
                Self::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Ok(ClientDataValue::Enumerated(*n as u32)),
                Self::Text(name) => bacscope_core::types::units_from_name(name)
                    .map(ClientDataValue::Enumerated)
                    .ok_or_else(|| cast_error("unknown units")),
                _ => Err(cast_error("expected units")),
            },
            _ => Ok(self.literal()),
        }
    }
}

impl fmt::Display for WriteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Active => f.write_str("active"),
            Self::Inactive => f.write_str("inactive"),
            Self::Text(text) => f.write_str(text),
            Self::Typed(value) => write!(f, "{value}"),
        }
    }
}

impl From<f64> for WriteValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for WriteValue {
    fn from(b: bool) -> Self {
        if b {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

impl From<&str> for WriteValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<ClientDataValue> for WriteValue {
    fn from(value: ClientDataValue) -> Self {
        match value {
            ClientDataValue::Null => Self::Null,
            other => Self::Typed(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub address: Address,
    pub object_id: ObjectId,
    pub property: PropertyId,
    pub value: WriteValue,
    pub array_index: Option<u32>,
    pub priority: Option<u8>,
    /// Vendor of the target device, for casting proprietary properties.
    /// `None` uses what the target announced in I-Am, if anything.
    pub vendor_id: Option<u32>,
}

impl WriteRequest {
    pub fn new(address: Address, object_id: ObjectId, property: PropertyId, value: impl Into<WriteValue>) -> Self {
        Self {
            address,
            object_id,
            property,
            value: value.into(),
            array_index: None,
            priority: None,
            vendor_id: None,
        }
    }

    pub fn with_vendor(mut self, vendor_id: u32) -> Self {
        self.vendor_id = Some(vendor_id);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Result<Self, ClientError> {
        self.priority = Some(check_priority(priority)?);
        Ok(self)
    }
}

fn check_priority(priority: u8) -> Result<u8, ClientError> {
    if (1..=16).contains(&priority) {
        Ok(priority)
    } else {
        Err(wrong(format!("priority {priority} outside 1..=16")))
    }
}

impl FromStr for WriteRequest {
    type Err = ClientError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(text)?;
        let [address, object_type, instance, property, value, rest @ ..] = tokens.as_slice() else {
            return Err(wrong(format!(
                "write needs ADDR OBJ_TYPE OBJ_INST PROP_ID VALUE: {text:?}"
            )));
        };
        let (array_index, priority) = match rest {
            [] => (None, None),
            [index] => (index_or_dash(index)?, None),
            [index, priority] => {
                let priority: u8 = priority
                    .parse()
                    .map_err(|_| wrong(format!("bad priority {priority:?}")))?;
                (index_or_dash(index)?, Some(check_priority(priority)?))
            }
            _ => return Err(wrong(format!("trailing tokens in {text:?}"))),
        };
        Ok(Self {
            address: address.parse()?,
            object_id: ObjectId::new(parse_object_type(object_type)?, parse_instance(instance)?),
            property: parse_property(property)?,
            value: WriteValue::parse(value)?,
            array_index,
            priority,
            vendor_id: None,
        })
    }
}

fn index_or_dash(token: &str) -> Result<Option<u32>, ClientError> {
    if token == "-" {
        Ok(None)
    } else {
        parse_index(token).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_with_vendor_property_and_index() {
        let request: ReadRequest = "2:5 @obj_130 1 @prop_2583 3".parse().unwrap();
        assert_eq!(request.address, Address::Remote { network: 2, mac: vec![5] });
        assert_eq!(request.object_id, ObjectId::new(ObjectType::Proprietary(130), 1));
        assert_eq!(request.property, PropertyId::from_u32(2583));
        assert_eq!(request.array_index, Some(3));

        assert!("127.0.0.1 analogValue presentValue".parse::<ReadRequest>().is_err());
        assert!("127.0.0.1 analogValue 1 bogusProperty".parse::<ReadRequest>().is_err());
    }

    #[test]
    fn read_multiple_groups_objects() {
        let request: ReadMultipleRequest =
            "192.168.1.10:47809 analogInput 1 presentValue units priorityArray 8 binaryValue 4 presentValue"
                .parse()
                .unwrap();
        assert_eq!(request.objects.len(), 2);
        assert_eq!(
            request.objects[0].properties,
            vec![
                (PropertyId::PresentValue, None),
                (PropertyId::Units, None),
                (PropertyId::PriorityArray, Some(8)),
            ]
        );
        assert_eq!(request.objects[1].object_id, ObjectId::new(ObjectType::BinaryValue, 4));
        assert_eq!(request.property_count(), 4);

        assert!("127.0.0.1 presentValue".parse::<ReadMultipleRequest>().is_err());
        assert!("127.0.0.1 analogInput 1".parse::<ReadMultipleRequest>().is_err());
    }

    #[test]
    fn write_release_with_dash_and_priority() {
        let request: WriteRequest = "127.0.0.1:47809 analogValue 1 presentValue null - 8"
            .parse()
            .unwrap();
        assert_eq!(request.value, WriteValue::Null);
        assert_eq!(request.array_index, None);
        assert_eq!(request.priority, Some(8));

        let quoted: WriteRequest = r#"127.0.0.1 analogValue 1 description "boiler room""#
            .parse()
            .unwrap();
        assert_eq!(quoted.value, WriteValue::Text("boiler room".into()));

        assert!("127.0.0.1 analogValue 1 presentValue 3 - 17".parse::<WriteRequest>().is_err());
    }

    #[test]
    fn cast_follows_object_kind() {
        let pv = PropertyId::PresentValue;
        assert_eq!(
            WriteValue::Number(11.2).cast(ObjectType::AnalogValue, pv, None).unwrap(),
            ClientDataValue::Real(11.2)
        );
        assert_eq!(
            WriteValue::Active.cast(ObjectType::BinaryOutput, pv, None).unwrap(),
            ClientDataValue::Enumerated(1)
        );
        assert_eq!(
            WriteValue::Number(3.0).cast(ObjectType::MultiStateValue, pv, None).unwrap(),
            ClientDataValue::Unsigned(3)
        );
        assert!(matches!(
            WriteValue::Text("warm".into()).cast(ObjectType::AnalogValue, pv, None),
            Err(ClientError::WritePropertyCastError(_))
        ));
        assert_eq!(
            WriteValue::Active.cast(ObjectType::AnalogInput, PropertyId::OutOfService, None).unwrap(),
            ClientDataValue::Boolean(true)
        );
        assert_eq!(
            WriteValue::Number(2.5)
                .cast(ObjectType::Proprietary(130), PropertyId::from_u32(2583), Some(Datatype::Real))
                .unwrap(),
            ClientDataValue::Real(2.5)
        );
    }
}
