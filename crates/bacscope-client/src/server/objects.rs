use crate::ClientDataValue;
use bacscope_core::types::{ErrorCode, ObjectId, ObjectType, PropertyId, StatusFlags};
use std::collections::BTreeMap;

pub const PRIORITY_SLOTS: usize = 16;
/// Priority used when a write to a commandable property carries none.
pub const DEFAULT_WRITE_PRIORITY: u8 = 16;

/// The 16-slot command table of a commandable object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorityArray {
    slots: [Option<ClientDataValue>; PRIORITY_SLOTS],
}

impl PriorityArray {
    /// Sets slot `priority` (1-based); a `Null` value releases it.
    pub fn write(&mut self, priority: u8, value: ClientDataValue) -> Result<(), ErrorCode> {
        let slot = self.slot_mut(priority)?;
        *slot = (!value.is_null()).then_some(value);
        Ok(())
    }

    pub fn release(&mut self, priority: u8) -> Result<(), ErrorCode> {
        *self.slot_mut(priority)? = None;
        Ok(())
    }

    fn slot_mut(&mut self, priority: u8) -> Result<&mut Option<ClientDataValue>, ErrorCode> {
        match priority {
            1..=16 => Ok(&mut self.slots[usize::from(priority - 1)]),
            _ => Err(ErrorCode::ValueOutOfRange),
        }
    }

    pub fn get(&self, priority: u8) -> Option<&ClientDataValue> {
        match priority {
            1..=16 => self.slots[usize::from(priority - 1)].as_ref(),
            _ => None,
        }
    }

    /// Lowest-numbered occupied slot and its value.
    pub fn active(&self) -> Option<(u8, &ClientDataValue)> {
        self.slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.as_ref().map(|v| (i as u8 + 1, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_none()
    }

    /// The array as read over the wire: one element per slot, `Null` when free.
    pub fn to_value(&self) -> ClientDataValue {
        ClientDataValue::List(
            self.slots
                .iter()
                .map(|slot| slot.clone().unwrap_or(ClientDataValue::Null))
                .collect(),
        )
    }
}

/// Broad value family of a hosted object's present value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Analog,
    Binary,
    MultiState,
    CharacterString,
    Date,
    DateTime,
}

impl ValueKind {
    pub fn of(object_type: ObjectType) -> Option<Self> {
        Some(match object_type {
            ObjectType::AnalogInput | ObjectType::AnalogOutput | ObjectType::AnalogValue => {
                Self::Analog
            }
            ObjectType::BinaryInput | ObjectType::BinaryOutput | ObjectType::BinaryValue => {
                Self::Binary
            }
            ObjectType::MultiStateInput
            | ObjectType::MultiStateOutput
            | ObjectType::MultiStateValue => Self::MultiState,
            ObjectType::CharacterStringValue => Self::CharacterString,
            ObjectType::DateValue => Self::Date,
            ObjectType::DateTimeValue => Self::DateTime,
            _ => return None,
        })
    }
}

pub(crate) fn is_input(object_type: ObjectType) -> bool {
    matches!(
        object_type,
        ObjectType::AnalogInput | ObjectType::BinaryInput | ObjectType::MultiStateInput
    )
}

/// Properties computed from object state rather than stored.
const COMPUTED: &[PropertyId] = &[
    PropertyId::ObjectIdentifier,
    PropertyId::ObjectName,
    PropertyId::ObjectType,
    PropertyId::PresentValue,
    PropertyId::StatusFlags,
    PropertyId::PropertyList,
];

const READ_ONLY: &[PropertyId] = &[
    PropertyId::ObjectIdentifier,
    PropertyId::ObjectType,
    PropertyId::StatusFlags,
    PropertyId::PriorityArray,
    PropertyId::PropertyList,
    PropertyId::CurrentCommandPriority,
];

/// An object hosted by the local server.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalObject {
    id: ObjectId,
    name: String,
    kind: ValueKind,
    present_value: ClientDataValue,
    properties: BTreeMap<PropertyId, ClientDataValue>,
    priority_array: Option<PriorityArray>,
}

impl LocalObject {
    /// A plain object; use [`LocalObject::commandable`] for a priority array.
    pub fn new(
        id: ObjectId,
        name: impl Into<String>,
        present_value: ClientDataValue,
    ) -> Result<Self, ErrorCode> {
        let kind = ValueKind::of(id.object_type()).ok_or(ErrorCode::OptionalFunctionalityNotSupported)?;
        let present_value = coerce(kind, &present_value, None)?;
        let mut properties = BTreeMap::new();
        properties.insert(
            PropertyId::Description,
            ClientDataValue::CharacterString(String::new()),
        );
        if is_input(id.object_type()) {
            properties.insert(PropertyId::OutOfService, ClientDataValue::Boolean(false));
        }
        if kind == ValueKind::MultiState {
            properties.insert(PropertyId::NumberOfStates, ClientDataValue::Unsigned(2));
        }
        Ok(Self {
            id,
            name: name.into(),
            kind,
            present_value,
            properties,
            priority_array: None,
        })
    }

    /// Adds a priority array with `relinquish_default` as the fallback value.
    pub fn commandable(mut self, relinquish_default: ClientDataValue) -> Result<Self, ErrorCode> {
        let relinquish_default = coerce(self.kind, &relinquish_default, self.number_of_states())?;
        self.present_value = relinquish_default.clone();
        self.properties
            .insert(PropertyId::RelinquishDefault, relinquish_default);
        self.priority_array = Some(PriorityArray::default());
        Ok(self)
    }

    pub fn with_property(mut self, property: PropertyId, value: ClientDataValue) -> Self {
        self.properties.insert(property, value);
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn is_commandable(&self) -> bool {
        self.priority_array.is_some()
    }

    pub fn priority_array(&self) -> Option<&PriorityArray> {
        self.priority_array.as_ref()
    }

    pub fn out_of_service(&self) -> bool {
        self.properties.get(&PropertyId::OutOfService) == Some(&ClientDataValue::Boolean(true))
    }

    pub fn cov_increment(&self) -> Option<f64> {
        self.properties
            .get(&PropertyId::CovIncrement)
            .and_then(ClientDataValue::as_f64)
    }

    fn number_of_states(&self) -> Option<u32> {
        self.properties
            .get(&PropertyId::NumberOfStates)
            .and_then(ClientDataValue::as_u32)
    }

    /// Effective present value: the winning priority slot, else the
    /// relinquish default, for commandable objects.
    pub fn present_value(&self) -> ClientDataValue {
        match &self.priority_array {
            Some(array) => match array.active() {
                Some((_, value)) => value.clone(),
                None => self
                    .properties
                    .get(&PropertyId::RelinquishDefault)
                    .cloned()
                    .unwrap_or(ClientDataValue::Null),
            },
            None => self.present_value.clone(),
        }
    }

    pub fn status_flags(&self) -> StatusFlags {
        StatusFlags {
            overridden: self
                .priority_array
                .as_ref()
                .is_some_and(|array| array.active().is_some_and(|(p, _)| p < 16)),
            out_of_service: self.out_of_service(),
            ..StatusFlags::default()
        }
    }

    pub(crate) fn status_flags_value(&self) -> ClientDataValue {
        ClientDataValue::BitString {
            unused_bits: StatusFlags::UNUSED_BITS,
            data: vec![self.status_flags().to_octet()],
        }
    }

    pub fn property_list(&self) -> Vec<PropertyId> {
        let mut list: Vec<PropertyId> = COMPUTED.to_vec();
        list.extend(self.properties.keys().copied());
        if self.priority_array.is_some() {
            list.push(PropertyId::PriorityArray);
        }
        list.sort_by_key(|p| p.to_u32());
        list.dedup();
        list
    }

    pub fn read(&self, property: PropertyId, array_index: Option<u32>) -> Result<ClientDataValue, ErrorCode> {
        let value = match property {
            PropertyId::ObjectIdentifier => ClientDataValue::ObjectId(self.id),
            PropertyId::ObjectName => ClientDataValue::CharacterString(self.name.clone()),
            PropertyId::ObjectType => {
                ClientDataValue::Enumerated(u32::from(self.id.object_type().to_u16()))
            }
            PropertyId::PresentValue => self.present_value(),
            PropertyId::StatusFlags => self.status_flags_value(),
            PropertyId::PropertyList => ClientDataValue::List(
                self.property_list()
                    .into_iter()
                    .map(|p| ClientDataValue::Enumerated(p.to_u32()))
                    .collect(),
            ),
            PropertyId::PriorityArray => self
                .priority_array
                .as_ref()
                .map(PriorityArray::to_value)
                .ok_or(ErrorCode::UnknownProperty)?,
            PropertyId::CurrentCommandPriority => match &self.priority_array {
                Some(array) => array
                    .active()
                    .map(|(p, _)| ClientDataValue::Unsigned(u32::from(p)))
                    .unwrap_or(ClientDataValue::Null),
                None => return Err(ErrorCode::UnknownProperty),
            },
            other => self
                .properties
                .get(&other)
                .cloned()
                .ok_or(ErrorCode::UnknownProperty)?,
        };
        index_into(value, array_index)
    }

    /// Applies a write. Returns `true` when the present value or status
    /// flags changed.
    pub fn write(
        &mut self,
        property: PropertyId,
        value: &ClientDataValue,
        array_index: Option<u32>,
        priority: Option<u8>,
    ) -> Result<bool, ErrorCode> {
        if READ_ONLY.contains(&property) {
            return Err(ErrorCode::WriteAccessDenied);
        }
        let before = (self.present_value(), self.status_flags());
        match property {
            PropertyId::PresentValue => self.write_present_value(value, priority)?,
            PropertyId::ObjectName => match value {
                ClientDataValue::CharacterString(name) if !name.is_empty() => self.name = name.clone(),
                _ => return Err(ErrorCode::InvalidDataType),
            },
            PropertyId::RelinquishDefault if self.is_commandable() => {
                let coerced = coerce(self.kind, value, self.number_of_states())?;
                self.properties.insert(property, coerced);
            }
            other => {
                let Some(current) = self.properties.get_mut(&other) else {
                    return Err(ErrorCode::UnknownProperty);
                };
                match (array_index, current) {
                    (Some(0), _) => return Err(ErrorCode::WriteAccessDenied),
                    (Some(index), ClientDataValue::List(items)) => {
                        let slot = items
                            .get_mut(index as usize - 1)
                            .ok_or(ErrorCode::InvalidArrayIndex)?;
                        *slot = value.clone();
                    }
                    (Some(_), _) => return Err(ErrorCode::PropertyIsNotAnArray),
                    (None, current) => {
                        if !same_type(current, value) {
                            return Err(ErrorCode::InvalidDataType);
                        }
                        *current = value.clone();
                    }
                }
            }
        }
        Ok(before != (self.present_value(), self.status_flags()))
    }

    fn write_present_value(&mut self, value: &ClientDataValue, priority: Option<u8>) -> Result<(), ErrorCode> {
        let states = self.number_of_states();
        let kind = self.kind;
        if let Some(array) = self.priority_array.as_mut() {
            let priority = priority.unwrap_or(DEFAULT_WRITE_PRIORITY);
            if value.is_null() {
                return array.release(priority);
            }
            return array.write(priority, coerce(kind, value, states)?);
        }
        if is_input(self.id.object_type()) && !self.out_of_service() {
            return Err(ErrorCode::WriteAccessDenied);
        }
        self.present_value = coerce(kind, value, states)?;
        Ok(())
    }

    /// Sets the present value from the local application, bypassing the
    /// out-of-service rule of input objects. On a commandable object this
    /// moves the relinquish default.
    pub fn set_present_value(&mut self, value: &ClientDataValue) -> Result<bool, ErrorCode> {
        let before = self.present_value();
        let coerced = coerce(self.kind, value, self.number_of_states())?;
        if self.priority_array.is_some() {
            self.properties.insert(PropertyId::RelinquishDefault, coerced);
        } else {
            self.present_value = coerced;
        }
        Ok(before != self.present_value())
    }
}

fn same_type(a: &ClientDataValue, b: &ClientDataValue) -> bool {
    use ClientDataValue as V;
    matches!(
        (a, b),
        (V::Real(_), V::Real(_) | V::Unsigned(_) | V::Signed(_) | V::Double(_))
            | (V::Unsigned(_), V::Unsigned(_))
            | (V::Signed(_), V::Signed(_) | V::Unsigned(_))
            | (V::Boolean(_), V::Boolean(_))
            | (V::Enumerated(_), V::Enumerated(_))
            | (V::CharacterString(_), V::CharacterString(_))
            | (V::List(_), V::List(_))
            | (V::Date(_), V::Date(_))
            | (V::Time(_), V::Time(_))
            | (V::Double(_), V::Double(_))
            | (V::Null, _)
    )
}

fn index_into(value: ClientDataValue, array_index: Option<u32>) -> Result<ClientDataValue, ErrorCode> {
    let Some(index) = array_index else {
        return Ok(value);
    };
    let ClientDataValue::List(items) = value else {
        return Err(ErrorCode::PropertyIsNotAnArray);
    };
    if index == 0 {
        return Ok(ClientDataValue::Unsigned(items.len() as u32));
    }
    items
        .into_iter()
        .nth(index as usize - 1)
        .ok_or(ErrorCode::InvalidArrayIndex)
}

/// Converts `value` to the present-value datatype of `kind`.
pub(crate) fn coerce(
    kind: ValueKind,
    value: &ClientDataValue,
    number_of_states: Option<u32>,
) -> Result<ClientDataValue, ErrorCode> {
    use ClientDataValue as V;
    match kind {
        ValueKind::Analog => value
            .as_f64()
            .filter(|_| !matches!(value, V::Boolean(_) | V::Enumerated(_)))
            .map(|v| V::Real(v as f32))
            .ok_or(ErrorCode::InvalidDataType),
        ValueKind::Binary => match value {
            V::Enumerated(v @ (0 | 1)) | V::Unsigned(v @ (0 | 1)) => Ok(V::Enumerated(*v)),
            V::Boolean(b) => Ok(V::Enumerated(u32::from(*b))),
            V::Enumerated(_) | V::Unsigned(_) => Err(ErrorCode::ValueOutOfRange),
            _ => Err(ErrorCode::InvalidDataType),
        },
        ValueKind::MultiState => {
            let state = match value {
                V::Unsigned(v) | V::Enumerated(v) => *v,
                V::Signed(v) if *v > 0 => *v as u32,
                V::Real(v) if v.fract() == 0.0 && *v > 0.0 => *v as u32,
                _ => return Err(ErrorCode::InvalidDataType),
            };
            if state == 0 || number_of_states.is_some_and(|n| state > n) {
                return Err(ErrorCode::ValueOutOfRange);
            }
            Ok(V::Unsigned(state))
        }
        ValueKind::CharacterString => match value {
            V::CharacterString(_) => Ok(value.clone()),
            _ => Err(ErrorCode::InvalidDataType),
        },
        ValueKind::Date => match value {
            V::Date(_) => Ok(value.clone()),
            _ => Err(ErrorCode::InvalidDataType),
        },
        ValueKind::DateTime => match value {
            V::List(items) | V::Constructed { values: items, .. }
                if matches!(items.as_slice(), [V::Date(_), V::Time(_)]) =>
            {
                Ok(V::List(items.clone()))
            }
            _ => Err(ErrorCode::InvalidDataType),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn av(instance: u32) -> LocalObject {
        LocalObject::new(
            ObjectId::new(ObjectType::AnalogValue, instance),
            format!("av{instance}"),
            ClientDataValue::Real(0.0),
        )
        .unwrap()
        .commandable(ClientDataValue::Real(90.0))
        .unwrap()
    }

    #[test]
    fn lowest_priority_slot_wins_and_release_restores() {
        let mut obj = av(1);
        assert_eq!(obj.present_value(), ClientDataValue::Real(90.0));

        obj.write(PropertyId::PresentValue, &ClientDataValue::Real(10.0), None, Some(12))
            .unwrap();
        obj.write(PropertyId::PresentValue, &ClientDataValue::Real(5.0), None, Some(8))
            .unwrap();
        assert_eq!(obj.present_value(), ClientDataValue::Real(5.0));
        assert!(obj.status_flags().overridden);

        obj.write(PropertyId::PresentValue, &ClientDataValue::Null, None, Some(8))
            .unwrap();
        assert_eq!(obj.present_value(), ClientDataValue::Real(10.0));

        obj.write(PropertyId::PresentValue, &ClientDataValue::Null, None, Some(12))
            .unwrap();
        assert_eq!(obj.present_value(), ClientDataValue::Real(90.0));
        assert!(obj.priority_array().unwrap().is_empty());
    }

    #[test]
    fn priority_array_reads_by_index() {
        let mut obj = av(2);
        obj.write(PropertyId::PresentValue, &ClientDataValue::Real(1.5), None, Some(3))
            .unwrap();
        assert_eq!(
            obj.read(PropertyId::PriorityArray, Some(0)).unwrap(),
            ClientDataValue::Unsigned(16)
        );
        assert_eq!(
            obj.read(PropertyId::PriorityArray, Some(3)).unwrap(),
            ClientDataValue::Real(1.5)
        );
        assert_eq!(
            obj.read(PropertyId::PriorityArray, Some(4)).unwrap(),
            ClientDataValue::Null
        );
        assert_eq!(
            obj.read(PropertyId::PriorityArray, Some(17)),
            Err(ErrorCode::InvalidArrayIndex)
        );
        assert_eq!(
            obj.read(PropertyId::ObjectName, Some(1)),
            Err(ErrorCode::PropertyIsNotAnArray)
        );
    }

    #[test]
    fn input_present_value_needs_out_of_service() {
        let mut ai = LocalObject::new(
            ObjectId::new(ObjectType::AnalogInput, 0),
            "ai0",
            ClientDataValue::Real(20.0),
        )
        .unwrap();
        assert_eq!(
            ai.write(PropertyId::PresentValue, &ClientDataValue::Real(1.0), None, None),
            Err(ErrorCode::WriteAccessDenied)
        );
        ai.write(PropertyId::OutOfService, &ClientDataValue::Boolean(true), None, None)
            .unwrap();
        assert!(ai
            .write(PropertyId::PresentValue, &ClientDataValue::Real(1.0), None, None)
            .unwrap());
        assert_eq!(ai.present_value(), ClientDataValue::Real(1.0));
        assert!(ai.status_flags().out_of_service);
    }

    #[test]
    fn coercion_rules() {
        assert_eq!(
            coerce(ValueKind::Analog, &ClientDataValue::Unsigned(3), None),
            Ok(ClientDataValue::Real(3.0))
        );
        assert_eq!(
            coerce(ValueKind::Binary, &ClientDataValue::Boolean(true), None),
            Ok(ClientDataValue::Enumerated(1))
        );
        assert_eq!(
            coerce(ValueKind::MultiState, &ClientDataValue::Unsigned(4), Some(3)),
            Err(ErrorCode::ValueOutOfRange)
        );
        assert_eq!(
            coerce(ValueKind::CharacterString, &ClientDataValue::Real(1.0), None),
            Err(ErrorCode::InvalidDataType)
        );
    }

    #[test]
    fn read_only_properties_rejected() {
        let mut obj = av(3);
        assert_eq!(
            obj.write(
                PropertyId::ObjectIdentifier,
                &ClientDataValue::ObjectId(obj.id()),
                None,
                None
            ),
            Err(ErrorCode::WriteAccessDenied)
        );
        assert_eq!(
            obj.write(PropertyId::Units, &ClientDataValue::Enumerated(98), None, None),
            Err(ErrorCode::UnknownProperty)
        );
    }
}
