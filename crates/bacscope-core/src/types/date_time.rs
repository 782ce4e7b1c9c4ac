#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Date {
    pub year_since_1900: u8,
    pub month: u8,
    pub day: u8,
    pub weekday: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredths: u8,
}

/// Wildcard octet for unspecified date/time fields.
pub const UNSPECIFIED: u8 = 0xFF;

impl Date {
    pub const fn new(year: u16, month: u8, day: u8, weekday: u8) -> Self {
        let year_since_1900 = if year >= 1900 && year <= 2154 {
            (year - 1900) as u8
        } else {
            UNSPECIFIED
        };
        Self {
            year_since_1900,
            month,
            day,
            weekday,
        }
    }

    /// Calendar year, or `None` when the year is a wildcard.
    pub const fn year(self) -> Option<u16> {
        if self.year_since_1900 == UNSPECIFIED {
            None
        } else {
            Some(1900 + self.year_since_1900 as u16)
        }
    }
}

impl Time {
    pub const fn new(hour: u8, minute: u8, second: u8, hundredths: u8) -> Self {
        Self {
            hour,
            minute,
            second,
            hundredths,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_year_round_trips_through_offset() {
        let date = Date::new(2024, 3, 15, 5);
        assert_eq!(date.year_since_1900, 124);
        assert_eq!(date.year(), Some(2024));
        assert_eq!(Date::new(1800, 1, 1, UNSPECIFIED).year(), None);
    }
}
