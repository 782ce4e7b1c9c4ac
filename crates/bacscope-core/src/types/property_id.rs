macro_rules! property_ids {
    ($($variant:ident = $value:literal => $name:literal,)+) => {
        /// BACnet property identifiers.
        ///
        /// Common standard properties are named variants; vendor-specific or
        /// unrecognised identifiers use [`Proprietary`](Self::Proprietary).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum PropertyId {
            $($variant,)+
            Proprietary(u32),
        }

        impl PropertyId {
            pub const fn to_u32(self) -> u32 {
                match self {
                    $(Self::$variant => $value,)+
                    Self::Proprietary(v) => v,
                }
            }

            pub const fn from_u32(value: u32) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    v => Self::Proprietary(v),
                }
            }
        }

        const NAMES: &[(PropertyId, &str)] = &[
            $((PropertyId::$variant, $name),)+
        ];
    };
}

property_ids! {
    AckedTransitions = 0 => "ackedTransitions",
    ActiveText = 4 => "activeText",
    AlarmValue = 6 => "alarmValue",
    ApduSegmentTimeout = 10 => "apduSegmentTimeout",
    ApduTimeout = 11 => "apduTimeout",
    ApplicationSoftwareVersion = 12 => "applicationSoftwareVersion",
    NotificationClass = 17 => "notificationClass",
    CovIncrement = 22 => "covIncrement",
    DateList = 23 => "dateList",
    DaylightSavingsStatus = 24 => "daylightSavingsStatus",
    Deadband = 25 => "deadband",
    Description = 28 => "description",
    DeviceAddressBinding = 30 => "deviceAddressBinding",
    EffectivePeriod = 32 => "effectivePeriod",
    EventEnable = 35 => "eventEnable",
    EventState = 36 => "eventState",
    EventType = 37 => "eventType",
    ExceptionSchedule = 38 => "exceptionSchedule",
    FirmwareRevision = 44 => "firmwareRevision",
    HighLimit = 45 => "highLimit",
    InactiveText = 46 => "inactiveText",
    ListOfObjectPropertyReferences = 54 => "listOfObjectPropertyReferences",
    LocalDate = 56 => "localDate",
    LocalTime = 57 => "localTime",
    Location = 58 => "location",
    LowLimit = 59 => "lowLimit",
    MaxApduLengthAccepted = 62 => "maxApduLengthAccepted",
    MaxPresValue = 65 => "maxPresValue",
    MinPresValue = 69 => "minPresValue",
    ModelName = 70 => "modelName",
    NumberOfApduRetries = 73 => "numberOfApduRetries",
    NumberOfStates = 74 => "numberOfStates",
    ObjectIdentifier = 75 => "objectIdentifier",
    ObjectList = 76 => "objectList",
    ObjectName = 77 => "objectName",
    ObjectPropertyReference = 78 => "objectPropertyReference",
    ObjectType = 79 => "objectType",
    OutOfService = 81 => "outOfService",
    EventParameters = 83 => "eventParameters",
    Polarity = 84 => "polarity",
    PresentValue = 85 => "presentValue",
    Priority = 86 => "priority",
    PriorityArray = 87 => "priorityArray",
    ProtocolObjectTypesSupported = 96 => "protocolObjectTypesSupported",
    ProtocolServicesSupported = 97 => "protocolServicesSupported",
    ProtocolVersion = 98 => "protocolVersion",
    Reliability = 103 => "reliability",
    RelinquishDefault = 104 => "relinquishDefault",
    Resolution = 106 => "resolution",
    SegmentationSupported = 107 => "segmentationSupported",
    StateText = 110 => "stateText",
    StatusFlags = 111 => "statusFlags",
    SystemStatus = 112 => "systemStatus",
    TimeDelay = 113 => "timeDelay",
    Units = 117 => "units",
    UtcOffset = 119 => "utcOffset",
    VendorIdentifier = 120 => "vendorIdentifier",
    VendorName = 121 => "vendorName",
    WeeklySchedule = 123 => "weeklySchedule",
    BufferSize = 126 => "bufferSize",
    LogBuffer = 131 => "logBuffer",
    LogDeviceObjectProperty = 132 => "logDeviceObjectProperty",
    Enable = 133 => "enable",
    LogInterval = 134 => "logInterval",
    ProtocolRevision = 139 => "protocolRevision",
    RecordsSinceNotification = 140 => "recordsSinceNotification",
    RecordCount = 141 => "recordCount",
    StartTime = 142 => "startTime",
    StopTime = 143 => "stopTime",
    StopWhenFull = 144 => "stopWhenFull",
    TotalRecordCount = 145 => "totalRecordCount",
    ActiveCovSubscriptions = 152 => "activeCovSubscriptions",
    DatabaseRevision = 155 => "databaseRevision",
    MaxSegmentsAccepted = 167 => "maxSegmentsAccepted",
    ScheduleDefault = 174 => "scheduleDefault",
    LastRestartReason = 196 => "lastRestartReason",
    PropertyList = 371 => "propertyList",
    CurrentCommandPriority = 431 => "currentCommandPriority",
}

impl PropertyId {
    /// The camelCase name used in request strings, or `None` for proprietary ids.
    pub fn name(self) -> Option<&'static str> {
        NAMES
            .iter()
            .find(|(property_id, _)| *property_id == self)
            .map(|(_, name)| *name)
    }

    /// Looks up a standard property by its camelCase name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES
            .iter()
            .find(|(_, candidate)| candidate.eq_ignore_ascii_case(name))
            .map(|(property_id, _)| *property_id)
    }
}

#[cfg(test)]
mod tests {
    use super::PropertyId;

    #[test]
    fn well_known_ids_match_wire_values() {
        assert_eq!(PropertyId::PresentValue.to_u32(), 85);
        assert_eq!(PropertyId::from_u32(87), PropertyId::PriorityArray);
        assert_eq!(PropertyId::from_u32(5000), PropertyId::Proprietary(5000));
    }

    #[test]
    fn names_resolve_both_ways() {
        assert_eq!(PropertyId::from_name("presentValue"), Some(PropertyId::PresentValue));
        assert_eq!(PropertyId::from_name("objectlist"), Some(PropertyId::ObjectList));
        assert_eq!(PropertyId::SegmentationSupported.name(), Some("segmentationSupported"));
        assert_eq!(PropertyId::Proprietary(512).name(), None);
    }
}
