/// Subset of the BACnetEngineeringUnits enumeration, looked up by name.
///
/// Units outside this table are still carried as raw enumerated values.
const UNITS: &[(u32, &str)] = &[
    (0, "squareMeters"),
    (2, "milliamperes"),
    (3, "amperes"),
    (5, "volts"),
    (19, "kilowattHours"),
    (29, "jouleKilogramDegreeKelvin"),
    (47, "watts"),
    (48, "kilowatts"),
    (53, "pascals"),
    (54, "kilopascals"),
    (55, "bars"),
    (56, "poundsForcePerSquareInch"),
    (62, "degreesCelsius"),
    (63, "degreesKelvin"),
    (64, "degreesFahrenheit"),
    (72, "hours"),
    (73, "minutes"),
    (74, "seconds"),
    (84, "cubicFeetPerMinute"),
    (85, "cubicMetersPerSecond"),
    (87, "litersPerSecond"),
    (95, "noUnits"),
    (98, "percent"),
    (99, "percentPerSecond"),
    (104, "revolutionsPerMinute"),
    (135, "cubicMetersPerHour"),
    (142, "litersPerHour"),
];

/// Enumerated value of a named engineering unit.
pub fn units_from_name(name: &str) -> Option<u32> {
    UNITS
        .iter()
        .find(|(_, candidate)| candidate.eq_ignore_ascii_case(name))
        .map(|(value, _)| *value)
}

/// Name of an engineering unit, when it is in the known table.
pub fn units_name(value: u32) -> Option<&'static str> {
    UNITS
        .iter()
        .find(|(candidate, _)| *candidate == value)
        .map(|(_, name)| *name)
}

/// The four BACnetStatusFlags bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusFlags {
    pub in_alarm: bool,
    pub fault: bool,
    pub overridden: bool,
    pub out_of_service: bool,
}

impl StatusFlags {
    /// Bit string content octet (bit 0 is the most significant bit).
    pub const fn to_octet(self) -> u8 {
        (self.in_alarm as u8) << 7
            | (self.fault as u8) << 6
            | (self.overridden as u8) << 5
            | (self.out_of_service as u8) << 4
    }

    pub const fn from_octet(octet: u8) -> Self {
        Self {
            in_alarm: octet & 0x80 != 0,
            fault: octet & 0x40 != 0,
            overridden: octet & 0x20 != 0,
            out_of_service: octet & 0x10 != 0,
        }
    }

    /// Unused-bits count for the 4-bit BACnet encoding.
    pub const UNUSED_BITS: u8 = 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_names_resolve() {
        assert_eq!(units_from_name("percent"), Some(98));
        assert_eq!(units_name(62), Some("degreesCelsius"));
        assert_eq!(units_from_name("furlongs"), None);
    }

    #[test]
    fn status_flags_octet() {
        let flags = StatusFlags {
            overridden: true,
            out_of_service: true,
            ..StatusFlags::default()
        };
        assert_eq!(flags.to_octet(), 0x30);
        assert_eq!(StatusFlags::from_octet(0x30), flags);
    }
}
