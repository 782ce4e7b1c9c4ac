//! Builds hosted objects from JSON-style definitions.

use super::objects::{is_input, LocalObject, ValueKind};
use super::trend::LocalTrendLog;
use super::vendor::VendorRegistry;
use crate::request::parse_property;
use crate::{ClientDataValue, ClientError};
use bacscope_core::types::{units_from_name, Date, ObjectId, ObjectType, PropertyId, Time};
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

const DEFAULT_TREND_BUFFER: usize = 1000;

/// Definition of one hosted object.
///
/// ```json
/// { "objectType": "analogValue", "instance": 1, "name": "av1",
///   "presentValue": 21.5, "properties": { "units": "degreesCelsius" },
///   "isCommandable": true, "relinquishDefault": 90.0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectConfig {
    pub object_type: String,
    #[serde(default)]
    pub instance: Option<u32>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub present_value: Option<Value>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, alias = "is_commandable")]
    pub is_commandable: bool,
    #[serde(default)]
    pub relinquish_default: Option<Value>,
}

impl ObjectConfig {
    pub fn new(object_type: &str, instance: u32, name: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            instance: Some(instance),
            name: name.to_string(),
            description: String::new(),
            present_value: None,
            properties: BTreeMap::new(),
            is_commandable: false,
            relinquish_default: None,
        }
    }

    pub fn present_value(mut self, value: impl Into<Value>) -> Self {
        self.present_value = Some(value.into());
        self
    }

    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn commandable(mut self, relinquish_default: impl Into<Value>) -> Self {
        self.is_commandable = true;
        self.relinquish_default = Some(relinquish_default.into());
        self
    }
}

/// What a definition turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    Object(LocalObject),
    TrendLog(LocalTrendLog),
}

/// Tracks names and instances in use so new definitions never collide.
#[derive(Debug, Default)]
pub struct ObjectFactory {
    instances: HashMap<ObjectType, BTreeSet<u32>>,
    names: HashSet<String>,
}

fn bad(config: &ObjectConfig, reason: impl std::fmt::Display) -> ClientError {
    ClientError::BadDeviceDefinition(format!("{} ({}): {reason}", config.name, config.object_type))
}

impl ObjectFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an id and name as used.
    pub fn reserve(&mut self, id: ObjectId, name: &str) {
        self.instances
            .entry(id.object_type())
            .or_default()
            .insert(id.instance());
        self.names.insert(name.to_string());
    }

    pub fn release(&mut self, id: ObjectId, name: &str) {
        if let Some(set) = self.instances.get_mut(&id.object_type()) {
            set.remove(&id.instance());
        }
        self.names.remove(name);
    }

    /// Next free instance at or above the requested one, and a unique name.
    fn allocate(&mut self, object_type: ObjectType, requested: Option<u32>, name: &str) -> (u32, String) {
        let taken = self.instances.entry(object_type).or_default();
        let mut instance = requested.unwrap_or(0);
        while taken.contains(&instance) {
            instance += 1;
        }
        if requested.is_some_and(|r| r != instance) {
            log::warn!("instance {} of {object_type:?} already taken, using {instance}", requested.unwrap_or(0));
        }
        taken.insert(instance);

        let name = if self.names.contains(name) {
            let renamed = format!("{name}-{instance}");
            log::warn!("name {name} already taken, using {renamed}");
            renamed
        } else {
            name.to_string()
        };
        self.names.insert(name.clone());
        (instance, name)
    }

    pub fn create(&mut self, config: &ObjectConfig, vendors: &VendorRegistry, vendor_id: u16) -> Result<Created, ClientError> {
        let object_type = ObjectType::from_name(&config.object_type)
            .ok_or_else(|| bad(config, "unknown object type"))?;

        if object_type == ObjectType::TrendLog {
            return self.create_trend_log(config);
        }

        let kind = ValueKind::of(object_type).ok_or_else(|| bad(config, "object type cannot be hosted"))?;
        if kind == ValueKind::Analog && !config.properties.contains_key("units") {
            return Err(bad(config, "analog objects require units"));
        }

        let mut extra = Vec::new();
        for (name, value) in &config.properties {
            extra.extend(property_values(config, name, value, vendors, vendor_id)?);
        }

        let present_value = match &config.present_value {
            Some(value) => json_present_value(kind, value).ok_or_else(|| bad(config, "bad presentValue"))?,
            None => default_present_value(kind),
        };

        let (instance, name) = self.allocate(object_type, config.instance, &config.name);
        let id = ObjectId::new(object_type, instance);
        let mut object = LocalObject::new(id, name, present_value.clone())
            .map_err(|e| bad(config, format!("{e:?}")))?
            .with_property(
                PropertyId::Description,
                ClientDataValue::CharacterString(config.description.clone()),
            );
        for (property, value) in extra {
            object = object.with_property(property, value);
        }

        if config.is_commandable && !is_input(object_type) {
            let relinquish_default = match &config.relinquish_default {
                Some(value) => json_present_value(kind, value)
                    .ok_or_else(|| bad(config, "bad relinquishDefault"))?,
                None => present_value,
            };
            object = object
                .commandable(relinquish_default)
                .map_err(|e| bad(config, format!("{e:?}")))?;
        }
        log::debug!("created {} {:?}", object.name(), object.id());
        Ok(Created::Object(object))
    }

    fn create_trend_log(&mut self, config: &ObjectConfig) -> Result<Created, ClientError> {
        let reference = config
            .properties
            .get("logDeviceObjectProperty")
            .and_then(Value::as_str)
            .ok_or_else(|| bad(config, "trend logs require logDeviceObjectProperty"))?;
        let (monitored, property) = parse_object_property(reference)
            .ok_or_else(|| bad(config, format!("bad logDeviceObjectProperty {reference:?}")))?;
        let buffer_size = config
            .properties
            .get("bufferSize")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_TREND_BUFFER, |n| n as usize);
        let (instance, name) = self.allocate(ObjectType::TrendLog, config.instance, &config.name);
        Ok(Created::TrendLog(LocalTrendLog::new(
            instance,
            name,
            monitored,
            property,
            buffer_size,
        )))
    }
}

/// `analogValue:1` or `analogValue:1:presentValue`.
fn parse_object_property(text: &str) -> Option<(ObjectId, PropertyId)> {
    let mut parts = text.split(':');
    let object_type = ObjectType::from_name(parts.next()?)?;
    let instance = parts.next()?.parse().ok()?;
    let property = match parts.next() {
        Some(name) => PropertyId::from_name(name)?,
        None => PropertyId::PresentValue,
    };
    Some((ObjectId::new(object_type, instance), property))
}

fn default_present_value(kind: ValueKind) -> ClientDataValue {
    let now = Local::now().naive_local();
    match kind {
        ValueKind::Analog => ClientDataValue::Real(0.0),
        ValueKind::Binary => ClientDataValue::Enumerated(0),
        ValueKind::MultiState => ClientDataValue::Unsigned(1),
        ValueKind::CharacterString => ClientDataValue::CharacterString(String::new()),
        ValueKind::Date => ClientDataValue::Date(crate::value::bacnet_date_time(now).0),
        ValueKind::DateTime => date_time_value(now),
    }
}

fn date_time_value(at: NaiveDateTime) -> ClientDataValue {
    let (date, time): (Date, Time) = crate::value::bacnet_date_time(at);
    ClientDataValue::List(vec![ClientDataValue::Date(date), ClientDataValue::Time(time)])
}

fn json_present_value(kind: ValueKind, value: &Value) -> Option<ClientDataValue> {
    Some(match (kind, value) {
        (ValueKind::Analog, Value::Number(n)) => ClientDataValue::Real(n.as_f64()? as f32),
        (ValueKind::Binary, Value::Bool(b)) => ClientDataValue::Enumerated(u32::from(*b)),
        (ValueKind::Binary, Value::Number(n)) => ClientDataValue::Enumerated(u32::try_from(n.as_u64()?).ok()?),
        (ValueKind::Binary, Value::String(s)) => match s.as_str() {
            "active" => ClientDataValue::Enumerated(1),
            "inactive" => ClientDataValue::Enumerated(0),
            _ => return None,
        },
        (ValueKind::MultiState, Value::Number(n)) => ClientDataValue::Unsigned(u32::try_from(n.as_u64()?).ok()?),
        (ValueKind::CharacterString, Value::String(s)) => ClientDataValue::CharacterString(s.clone()),
        (ValueKind::Date, Value::String(s)) => {
            let day = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            ClientDataValue::Date(crate::value::bacnet_date_time(day.and_hms_opt(0, 0, 0)?).0)
        }
        (ValueKind::DateTime, Value::String(s)) => {
            date_time_value(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok()?)
        }
        _ => return None,
    })
}

/// Typed property values for one `properties` entry.
fn property_values(
    config: &ObjectConfig,
    name: &str,
    value: &Value,
    vendors: &VendorRegistry,
    vendor_id: u16,
) -> Result<Vec<(PropertyId, ClientDataValue)>, ClientError> {
    let typed = match name {
        "units" => {
            let units = match value {
                Value::String(s) => units_from_name(s),
                Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
                _ => None,
            }
            .ok_or_else(|| bad(config, format!("unknown units {value}")))?;
            vec![(PropertyId::Units, ClientDataValue::Enumerated(units))]
        }
        "stateText" => {
            let states: Vec<ClientDataValue> = value
                .as_array()
                .ok_or_else(|| bad(config, "stateText must be a list"))?
                .iter()
                .map(|s| {
                    s.as_str()
                        .map(|s| ClientDataValue::CharacterString(s.to_string()))
                        .ok_or_else(|| bad(config, "stateText entries must be strings"))
                })
                .collect::<Result<_, _>>()?;
            let count = states.len() as u32;
            vec![
                (PropertyId::StateText, ClientDataValue::List(states)),
                (PropertyId::NumberOfStates, ClientDataValue::Unsigned(count)),
            ]
        }
        "covIncrement" => vec![(
            PropertyId::CovIncrement,
            ClientDataValue::Real(value.as_f64().ok_or_else(|| bad(config, "covIncrement must be a number"))? as f32),
        )],
        "polarity" => {
            let polarity = match value {
                Value::String(s) if s == "normal" => 0,
                Value::String(s) if s == "reverse" => 1,
                Value::Number(n) if n.as_u64() == Some(0) => 0,
                Value::Number(n) if n.as_u64() == Some(1) => 1,
                _ => return Err(bad(config, "polarity is normal or reverse")),
            };
            vec![(PropertyId::Polarity, ClientDataValue::Enumerated(polarity))]
        }
        "trendLog_datatype" => Vec::new(),
        other => {
            let property = PropertyId::from_name(other)
                .or_else(|| parse_property(other).ok())
                .or_else(|| vendors.property(vendor_id, other).map(|(p, _)| p))
                .ok_or_else(|| bad(config, format!("unknown property {other}")))?;
            let datatype = vendors.datatype(vendor_id, property);
            let typed = match (datatype, value) {
                (Some(datatype), Value::String(s)) => datatype.parse(s),
                (Some(datatype), other) => datatype.parse(&other.to_string()),
                (None, value) => json_value(value),
            }
            .ok_or_else(|| bad(config, format!("bad value for {other}")))?;
            vec![(property, typed)]
        }
    };
    Ok(typed)
}

fn json_value(value: &Value) -> Option<ClientDataValue> {
    Some(match value {
        Value::Null => ClientDataValue::Null,
        Value::Bool(b) => ClientDataValue::Boolean(*b),
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(u), _) => ClientDataValue::Unsigned(u32::try_from(u).ok()?),
            (None, Some(i)) => ClientDataValue::Signed(i32::try_from(i).ok()?),
            _ => ClientDataValue::Real(n.as_f64()? as f32),
        },
        Value::String(s) => ClientDataValue::CharacterString(s.clone()),
        Value::Array(items) => ClientDataValue::List(items.iter().map(json_value).collect::<Option<_>>()?),
        Value::Object(_) => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(factory: &mut ObjectFactory, config: &ObjectConfig) -> Result<Created, ClientError> {
        factory.create(config, &VendorRegistry::new(), 0)
    }

    #[test]
    fn analog_requires_units() {
        let mut factory = ObjectFactory::new();
        let err = create(&mut factory, &ObjectConfig::new("analogValue", 0, "av0")).unwrap_err();
        assert!(matches!(err, ClientError::BadDeviceDefinition(_)));
    }

    #[test]
    fn collisions_reallocate_instance_and_name() {
        let mut factory = ObjectFactory::new();
        let config = ObjectConfig::new("analogValue", 1, "temp")
            .property("units", "degreesCelsius")
            .present_value(21.5);
        let Created::Object(first) = create(&mut factory, &config).unwrap() else {
            panic!("expected an object");
        };
        let Created::Object(second) = create(&mut factory, &config).unwrap() else {
            panic!("expected an object");
        };
        assert_eq!(first.id().instance(), 1);
        assert_eq!(second.id().instance(), 2);
        assert_eq!(second.name(), "temp-2");
    }

    #[test]
    fn definition_from_json() {
        let config: ObjectConfig = serde_json::from_str(
            r#"{
                "objectType": "multiStateValue",
                "instance": 3,
                "name": "mode",
                "presentValue": 2,
                "properties": {"stateText": ["off", "on", "auto"]},
                "is_commandable": true,
                "relinquishDefault": 1
            }"#,
        )
        .unwrap();
        let mut factory = ObjectFactory::new();
        let Created::Object(obj) = create(&mut factory, &config).unwrap() else {
            panic!("expected an object");
        };
        assert!(obj.is_commandable());
        assert_eq!(obj.present_value(), ClientDataValue::Unsigned(1));
        assert_eq!(
            obj.read(PropertyId::NumberOfStates, None).unwrap(),
            ClientDataValue::Unsigned(3)
        );
        assert_eq!(
            obj.read(PropertyId::StateText, Some(3)).unwrap(),
            ClientDataValue::CharacterString("auto".into())
        );
    }

    #[test]
    fn input_objects_get_out_of_service_not_priority_array() {
        let mut factory = ObjectFactory::new();
        let config = ObjectConfig::new("binaryInput", 0, "door")
            .present_value("active")
            .commandable(false);
        let Created::Object(obj) = create(&mut factory, &config).unwrap() else {
            panic!("expected an object");
        };
        assert!(!obj.is_commandable());
        assert_eq!(
            obj.read(PropertyId::OutOfService, None).unwrap(),
            ClientDataValue::Boolean(false)
        );
    }

    #[test]
    fn trend_log_definition() {
        let mut factory = ObjectFactory::new();
        let config = ObjectConfig::new("trendLog", 0, "log")
            .property("logDeviceObjectProperty", "analogValue:1")
            .property("bufferSize", 10);
        let Created::TrendLog(log) = create(&mut factory, &config).unwrap() else {
            panic!("expected a trend log");
        };
        assert_eq!(
            log.monitored(),
            (ObjectId::new(ObjectType::AnalogValue, 1), PropertyId::PresentValue)
        );
    }
}
