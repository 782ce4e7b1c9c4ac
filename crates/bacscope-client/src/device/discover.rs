//! Point discovery: read the object list, then describe every analog,
//! multi-state and binary object with one batched read per group.

use super::{read_lock, write_lock, Device, Point, PointDefinition, PointKind};
use crate::client::ObjectValues;
use crate::{BacnetClient, ClientDataValue, ClientError};
use bacscope_core::types::{ObjectId, PropertyId};
use bacscope_datalink::DataLink;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

const NUMERIC_PROPERTIES: &[PropertyId] = &[
    PropertyId::ObjectName,
    PropertyId::PresentValue,
    PropertyId::Units,
    PropertyId::Description,
];

const ENUMERATED_PROPERTIES: &[PropertyId] = &[
    PropertyId::ObjectName,
    PropertyId::PresentValue,
    PropertyId::StateText,
    PropertyId::Description,
];

const BOOLEAN_PROPERTIES: &[PropertyId] = &[
    PropertyId::ObjectName,
    PropertyId::PresentValue,
    PropertyId::InactiveText,
    PropertyId::ActiveText,
    PropertyId::Description,
];

fn properties_for(kind: PointKind) -> &'static [PropertyId] {
    match kind {
        PointKind::Enumerated => ENUMERATED_PROPERTIES,
        PointKind::Boolean => BOOLEAN_PROPERTIES,
        _ => NUMERIC_PROPERTIES,
    }
}

fn extract_object_ids(value: &ClientDataValue) -> Vec<ObjectId> {
    let values = match value {
        ClientDataValue::Constructed { values, .. } => values.as_slice(),
        other => other.elements(),
    };
    values
        .iter()
        .filter_map(|v| match v {
            ClientDataValue::ObjectId(id) => Some(*id),
            _ => None,
        })
        .collect()
}

/// The device's objectList, element by element when the whole array does
/// not fit in one answer.
pub(crate) async fn read_object_list<D: DataLink + 'static>(
    client: &BacnetClient<D>,
    address: &crate::Address,
    device: ObjectId,
) -> Result<Vec<ObjectId>, ClientError> {
    match client.read_property(address, device, PropertyId::ObjectList, None).await {
        Ok(value) => Ok(extract_object_ids(&value)),
        Err(
            ClientError::SegmentationNotSupported
            | ClientError::BufferOverflow
            | ClientError::ResponseTooLarge { .. }
            | ClientError::RemoteAbort { .. },
        ) => {
            let count = client
                .read_property(address, device, PropertyId::ObjectList, Some(0))
                .await?
                .as_u32()
                .ok_or(ClientError::UnsupportedResponse)?;
            log::info!("{address}: reading {count} objects one by one");
            let mut ids = Vec::with_capacity(count as usize);
            for index in 1..=count {
                match client
                    .read_property(address, device, PropertyId::ObjectList, Some(index))
                    .await?
                {
                    ClientDataValue::ObjectId(id) => ids.push(id),
                    other => log::warn!("{address}: objectList[{index}] is {other}"),
                }
                tokio::task::yield_now().await;
            }
            Ok(ids)
        }
        Err(e) => Err(e),
    }
}

/// Builds a definition from the values read for one object.
fn build_definition(object_id: ObjectId, kind: PointKind, read: &ObjectValues) -> (PointDefinition, Option<ClientDataValue>) {
    let mut definition = PointDefinition::new(object_id, object_id.to_string(), kind);
    let mut present_value = None;
    let mut inactive = None;
    let mut active = None;

    for value in &read.values {
        let Ok(v) = &value.value else {
            continue;
        };
        match value.property {
            PropertyId::ObjectName => {
                if let Some(name) = v.as_str() {
                    definition.name = name.to_string();
                }
            }
            PropertyId::PresentValue => present_value = Some(v.clone()),
            PropertyId::Description => definition.description = v.as_str().unwrap_or_default().to_string(),
            PropertyId::Units => definition.units = PointDefinition::units_from_value(v),
            PropertyId::StateText => definition.states = v.string_list(),
            PropertyId::InactiveText => inactive = v.as_str().map(str::to_string),
            PropertyId::ActiveText => active = v.as_str().map(str::to_string),
            _ => {}
        }
    }
    if kind == PointKind::Boolean {
        definition.states = vec![
            inactive.unwrap_or_else(|| "inactive".to_string()),
            active.unwrap_or_else(|| "active".to_string()),
        ];
    }
    (definition, present_value)
}

impl<D: DataLink + 'static> Device<D> {
    pub(crate) async fn discover_points(&self) -> Result<(), ClientError> {
        let client = self.core.network()?;
        let object_list = match &self.core.options.object_list {
            Some(list) => list.clone(),
            None => read_object_list(&client, &self.core.address, self.core.object_id()).await?,
        };
        write_lock(&self.core.info).object_list = object_list.clone();

        let mut groups: BTreeMap<u8, (PointKind, Vec<ObjectId>)> = BTreeMap::new();
        for id in &object_list {
            let Some(kind) = PointKind::of(id.object_type()) else {
                continue;
            };
            let order = match kind {
                PointKind::Numeric => 0,
                PointKind::Enumerated => 1,
                _ => 2,
            };
            groups.entry(order).or_insert_with(|| (kind, Vec::new())).1.push(*id);
        }

        let mut names: HashSet<String> = HashSet::new();
        let mut points = BTreeMap::new();
        for (kind, ids) in groups.into_values() {
            let requests: Vec<(ObjectId, Vec<PropertyId>)> =
                ids.iter().map(|id| (*id, properties_for(kind).to_vec())).collect();
            let described = self.core.read_batched(&requests, None).await?;
            log::debug!("{}: described {} {} objects", self.core.label(), described.len(), kind.as_str());

            for read in &described {
                let (mut definition, present_value) = build_definition(read.object_id, kind, read);
                if !names.insert(definition.name.clone()) {
                    let unique = format!("{}_{}", definition.name, read.object_id.instance());
                    log::warn!("{}: duplicate point name {}, using {unique}", self.core.label(), definition.name);
                    definition.name = unique;
                    names.insert(definition.name.clone());
                }
                let point = Point::new(definition, self.core.options.history_size, Arc::downgrade(&self.core));
                if let Some(value) = present_value {
                    point.record_wire(&value);
                }
                points.insert(point.name().to_string(), Arc::new(point));
            }
        }

        let virtuals: Vec<(String, Arc<Point<D>>)> = read_lock(&self.core.points)
            .into_iter()
            .filter(|(_, p)| p.kind() == PointKind::Virtual)
            .collect();
        points.extend(virtuals);
        *write_lock(&self.core.points) = points;
        self.core.trends.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PropertyValue;
    use bacscope_core::types::ObjectType;

    #[test]
    fn object_ids_from_list_or_single() {
        let a = ObjectId::new(ObjectType::AnalogInput, 1);
        let b = ObjectId::new(ObjectType::BinaryValue, 2);
        let list = ClientDataValue::List(vec![ClientDataValue::ObjectId(a), ClientDataValue::ObjectId(b)]);
        assert_eq!(extract_object_ids(&list), vec![a, b]);
        assert_eq!(extract_object_ids(&ClientDataValue::ObjectId(a)), vec![a]);
    }

    #[test]
    fn binary_definition_collects_state_text() {
        let id = ObjectId::new(ObjectType::BinaryOutput, 4);
        let read = ObjectValues {
            object_id: id,
            values: vec![
                PropertyValue {
                    property: PropertyId::ObjectName,
                    array_index: None,
                    value: Ok(ClientDataValue::CharacterString("FAN-CMD".into())),
                },
                PropertyValue {
                    property: PropertyId::PresentValue,
                    array_index: None,
                    value: Ok(ClientDataValue::Enumerated(1)),
                },
                PropertyValue {
                    property: PropertyId::ActiveText,
                    array_index: None,
                    value: Ok(ClientDataValue::CharacterString("On".into())),
                },
                PropertyValue {
                    property: PropertyId::InactiveText,
                    array_index: None,
                    value: Err(ClientError::UnknownProperty),
                },
            ],
        };
        let (definition, value) = build_definition(id, PointKind::Boolean, &read);
        assert_eq!(definition.name, "FAN-CMD");
        assert_eq!(definition.states, vec!["inactive".to_string(), "On".to_string()]);
        assert_eq!(value, Some(ClientDataValue::Enumerated(1)));
    }
}
