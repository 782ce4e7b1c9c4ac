//! Vendor-specific object types and property identifiers, keyed by vendor id.
//!
//! Request strings can always name a vendor property as `@prop_<n>`; a
//! registered vendor additionally lets callers and object definitions use
//! its own names.

use crate::ClientDataValue;
use bacscope_core::types::{ObjectType, PropertyId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Primitive datatype of a proprietary property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Datatype {
    Boolean,
    Unsigned,
    Signed,
    Real,
    Double,
    Enumerated,
    CharacterString,
}

impl Datatype {
    /// Parses a literal from a request string or a JSON definition.
    pub fn parse(self, text: &str) -> Option<ClientDataValue> {
        let text = text.trim();
        Some(match self {
            Self::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" | "active" => ClientDataValue::Boolean(true),
                "false" | "0" | "inactive" => ClientDataValue::Boolean(false),
                _ => return None,
            },
            Self::Unsigned => ClientDataValue::Unsigned(text.parse().ok()?),
            Self::Signed => ClientDataValue::Signed(text.parse().ok()?),
            Self::Real => ClientDataValue::Real(text.parse().ok()?),
            Self::Double => ClientDataValue::Double(text.parse().ok()?),
            Self::Enumerated => ClientDataValue::Enumerated(text.parse().ok()?),
            Self::CharacterString => {
                ClientDataValue::CharacterString(text.trim_matches('"').to_string())
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProprietaryProperty {
    pub id: u32,
    pub datatype: Datatype,
    #[serde(default)]
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProprietaryObject {
    pub object_type: u16,
    #[serde(default)]
    pub properties: HashMap<String, ProprietaryProperty>,
}

/// What one vendor adds to the standard tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorInfo {
    pub vendor_id: u16,
    pub vendor_name: String,
    #[serde(default)]
    pub properties: HashMap<String, ProprietaryProperty>,
    #[serde(default)]
    pub objects: HashMap<String, ProprietaryObject>,
}

impl VendorInfo {
    pub fn new(vendor_id: u16, vendor_name: impl Into<String>) -> Self {
        Self {
            vendor_id,
            vendor_name: vendor_name.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, property: ProprietaryProperty) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    pub fn with_object(mut self, name: impl Into<String>, object: ProprietaryObject) -> Self {
        self.objects.insert(name.into(), object);
        self
    }

    fn property_by_name(&self, name: &str) -> Option<&ProprietaryProperty> {
        self.properties.get(name).or_else(|| {
            self.objects
                .values()
                .find_map(|object| object.properties.get(name))
        })
    }
}

#[derive(Debug, Default)]
pub struct VendorRegistry {
    vendors: RwLock<HashMap<u16, VendorInfo>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a vendor's definitions.
    pub fn register(&self, info: VendorInfo) {
        if let Ok(mut vendors) = self.vendors.write() {
            log::debug!("registered vendor {} ({})", info.vendor_id, info.vendor_name);
            vendors.insert(info.vendor_id, info);
        }
    }

    pub fn get(&self, vendor_id: u16) -> Option<VendorInfo> {
        self.vendors.read().ok()?.get(&vendor_id).cloned()
    }

    pub fn property(&self, vendor_id: u16, name: &str) -> Option<(PropertyId, Datatype)> {
        let vendors = self.vendors.read().ok()?;
        let property = vendors.get(&vendor_id)?.property_by_name(name)?;
        Some((PropertyId::from_u32(property.id), property.datatype))
    }

    /// Datatype of a proprietary property id, searched across `vendor_id`'s tables.
    pub fn datatype(&self, vendor_id: u16, property: PropertyId) -> Option<Datatype> {
        let vendors = self.vendors.read().ok()?;
        let info = vendors.get(&vendor_id)?;
        info.properties
            .values()
            .chain(info.objects.values().flat_map(|o| o.properties.values()))
            .find(|p| p.id == property.to_u32())
            .map(|p| p.datatype)
    }

    pub fn object_type(&self, vendor_id: u16, name: &str) -> Option<ObjectType> {
        let vendors = self.vendors.read().ok()?;
        let object = vendors.get(&vendor_id)?.objects.get(name)?;
        Some(ObjectType::from_u16(object.object_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_definition_with_datatype_key() {
        let info: VendorInfo = serde_json::from_str(
            r#"{
                "vendorId": 5,
                "vendorName": "Example Controls",
                "properties": {
                    "cpuUsage": {"id": 2583, "datatype": "real"}
                },
                "objects": {
                    "networkIntegration": {
                        "objectType": 130,
                        "properties": {
                            "enabled": {"id": 673, "datatype": "boolean", "mutable": true}
                        }
                    }
                }
            }"#,
        )
        .unwrap();
        let registry = VendorRegistry::new();
        registry.register(info);

        assert_eq!(
            registry.property(5, "cpuUsage"),
            Some((PropertyId::from_u32(2583), Datatype::Real))
        );
        assert_eq!(
            registry.property(5, "enabled"),
            Some((PropertyId::from_u32(673), Datatype::Boolean))
        );
        assert_eq!(
            registry.object_type(5, "networkIntegration"),
            Some(ObjectType::Proprietary(130))
        );
        assert_eq!(
            registry.datatype(5, PropertyId::from_u32(673)),
            Some(Datatype::Boolean)
        );
        assert_eq!(registry.property(6, "cpuUsage"), None);
    }

    #[test]
    fn datatype_literals() {
        assert_eq!(Datatype::Boolean.parse("active"), Some(ClientDataValue::Boolean(true)));
        assert_eq!(Datatype::Unsigned.parse("-1"), None);
        assert_eq!(
            Datatype::CharacterString.parse("\"lobby\""),
            Some(ClientDataValue::CharacterString("lobby".into()))
        );
    }
}
