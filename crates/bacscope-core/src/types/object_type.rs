/// BACnet object type identifiers as defined in the BACnet specification.
///
/// Known standard types are represented as named variants; proprietary
/// vendor-specific types use the [`Proprietary`](Self::Proprietary) variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    Calendar,
    Command,
    Device,
    EventEnrollment,
    File,
    Group,
    Loop,
    MultiStateInput,
    MultiStateOutput,
    NotificationClass,
    Program,
    Schedule,
    Averaging,
    MultiStateValue,
    TrendLog,
    LifeSafetyPoint,
    LifeSafetyZone,
    Accumulator,
    PulseConverter,
    EventLog,
    GlobalGroup,
    TrendLogMultiple,
    StructuredView,
    AccessDoor,
    CharacterStringValue,
    DateValue,
    DateTimeValue,
    IntegerValue,
    LargeAnalogValue,
    PositiveIntegerValue,
    NetworkPort,
    Proprietary(u16),
}

const NAMES: &[(ObjectType, &str)] = &[
    (ObjectType::AnalogInput, "analogInput"),
    (ObjectType::AnalogOutput, "analogOutput"),
    (ObjectType::AnalogValue, "analogValue"),
    (ObjectType::BinaryInput, "binaryInput"),
    (ObjectType::BinaryOutput, "binaryOutput"),
    (ObjectType::BinaryValue, "binaryValue"),
    (ObjectType::Calendar, "calendar"),
    (ObjectType::Command, "command"),
    (ObjectType::Device, "device"),
    (ObjectType::EventEnrollment, "eventEnrollment"),
    (ObjectType::File, "file"),
    (ObjectType::Group, "group"),
    (ObjectType::Loop, "loop"),
    (ObjectType::MultiStateInput, "multiStateInput"),
    (ObjectType::MultiStateOutput, "multiStateOutput"),
    (ObjectType::NotificationClass, "notificationClass"),
    (ObjectType::Program, "program"),
    (ObjectType::Schedule, "schedule"),
    (ObjectType::Averaging, "averaging"),
    (ObjectType::MultiStateValue, "multiStateValue"),
    (ObjectType::TrendLog, "trendLog"),
    (ObjectType::LifeSafetyPoint, "lifeSafetyPoint"),
    (ObjectType::LifeSafetyZone, "lifeSafetyZone"),
    (ObjectType::Accumulator, "accumulator"),
    (ObjectType::PulseConverter, "pulseConverter"),
    (ObjectType::EventLog, "eventLog"),
    (ObjectType::GlobalGroup, "globalGroup"),
    (ObjectType::TrendLogMultiple, "trendLogMultiple"),
    (ObjectType::StructuredView, "structuredView"),
    (ObjectType::AccessDoor, "accessDoor"),
    (ObjectType::CharacterStringValue, "characterstringValue"),
    (ObjectType::DateValue, "dateValue"),
    (ObjectType::DateTimeValue, "datetimeValue"),
    (ObjectType::IntegerValue, "integerValue"),
    (ObjectType::LargeAnalogValue, "largeAnalogValue"),
    (ObjectType::PositiveIntegerValue, "positiveIntegerValue"),
    (ObjectType::NetworkPort, "networkPort"),
];

impl ObjectType {
    /// Converts this object type to its numeric BACnet identifier.
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::AnalogInput => 0,
            Self::AnalogOutput => 1,
            Self::AnalogValue => 2,
            Self::BinaryInput => 3,
            Self::BinaryOutput => 4,
            Self::BinaryValue => 5,
            Self::Calendar => 6,
            Self::Command => 7,
            Self::Device => 8,
            Self::EventEnrollment => 9,
            Self::File => 10,
            Self::Group => 11,
            Self::Loop => 12,
            Self::MultiStateInput => 13,
            Self::MultiStateOutput => 14,
            Self::NotificationClass => 15,
            Self::Program => 16,
            Self::Schedule => 17,
            Self::Averaging => 18,
            Self::MultiStateValue => 19,
            Self::TrendLog => 20,
            Self::LifeSafetyPoint => 21,
            Self::LifeSafetyZone => 22,
            Self::Accumulator => 23,
            Self::PulseConverter => 24,
            Self::EventLog => 25,
            Self::GlobalGroup => 26,
            Self::TrendLogMultiple => 27,
            Self::StructuredView => 29,
            Self::AccessDoor => 30,
            Self::CharacterStringValue => 40,
            Self::DateTimeValue => 44,
            Self::DateValue => 42,
            Self::IntegerValue => 45,
            Self::LargeAnalogValue => 46,
            Self::PositiveIntegerValue => 48,
            Self::NetworkPort => 56,
            Self::Proprietary(v) => v,
        }
    }

    /// Creates an `ObjectType` from its numeric BACnet identifier.
    ///
    /// Values without a known standard mapping become [`Proprietary`](Self::Proprietary).
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::AnalogInput,
            1 => Self::AnalogOutput,
            2 => Self::AnalogValue,
            3 => Self::BinaryInput,
            4 => Self::BinaryOutput,
            5 => Self::BinaryValue,
            6 => Self::Calendar,
            7 => Self::Command,
            8 => Self::Device,
            9 => Self::EventEnrollment,
            10 => Self::File,
            11 => Self::Group,
            12 => Self::Loop,
            13 => Self::MultiStateInput,
            14 => Self::MultiStateOutput,
            15 => Self::NotificationClass,
            16 => Self::Program,
            17 => Self::Schedule,
            18 => Self::Averaging,
            19 => Self::MultiStateValue,
            20 => Self::TrendLog,
            21 => Self::LifeSafetyPoint,
            22 => Self::LifeSafetyZone,
            23 => Self::Accumulator,
            24 => Self::PulseConverter,
            25 => Self::EventLog,
            26 => Self::GlobalGroup,
            27 => Self::TrendLogMultiple,
            29 => Self::StructuredView,
            30 => Self::AccessDoor,
            40 => Self::CharacterStringValue,
            42 => Self::DateValue,
            44 => Self::DateTimeValue,
            45 => Self::IntegerValue,
            46 => Self::LargeAnalogValue,
            48 => Self::PositiveIntegerValue,
            56 => Self::NetworkPort,
            v => Self::Proprietary(v),
        }
    }

    /// The camelCase name used in request strings, or `None` for proprietary types.
    pub fn name(self) -> Option<&'static str> {
        NAMES
            .iter()
            .find(|(object_type, _)| *object_type == self)
            .map(|(_, name)| *name)
    }

    /// Looks up a standard type by its camelCase name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(_, candidate)| candidate.eq_ignore_ascii_case(name))
            .map(|(object_type, _)| *object_type)
    }

    /// Analog, binary and multi-state inputs/outputs/values.
    pub const fn is_point(self) -> bool {
        matches!(
            self,
            Self::AnalogInput
                | Self::AnalogOutput
                | Self::AnalogValue
                | Self::BinaryInput
                | Self::BinaryOutput
                | Self::BinaryValue
                | Self::MultiStateInput
                | Self::MultiStateOutput
                | Self::MultiStateValue
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectType;

    #[test]
    fn names_resolve_both_ways() {
        assert_eq!(ObjectType::from_name("analogValue"), Some(ObjectType::AnalogValue));
        assert_eq!(ObjectType::from_name("MULTISTATEINPUT"), Some(ObjectType::MultiStateInput));
        assert_eq!(ObjectType::TrendLog.name(), Some("trendLog"));
        assert_eq!(ObjectType::Proprietary(600).name(), None);
        assert_eq!(ObjectType::from_name("nonsense"), None);
    }

    #[test]
    fn numeric_mapping_is_stable() {
        for raw in 0u16..64 {
            assert_eq!(ObjectType::from_u16(raw).to_u16(), raw);
        }
    }
}
