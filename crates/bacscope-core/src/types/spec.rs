/// Segmentation capability advertised during device discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Segmentation {
    SegmentedBoth = 0,
    SegmentedTransmit = 1,
    SegmentedReceive = 2,
    NoSegmentation = 3,
}

/// Maximum APDU length accepted by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u16)]
pub enum MaxApdu {
    UpTo50 = 0,
    UpTo128 = 1,
    UpTo206 = 2,
    UpTo480 = 3,
    UpTo1024 = 4,
    UpTo1476 = 5,
}

/// BACnet error class reported in Error PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorClass {
    Device = 0,
    Object = 1,
    Property = 2,
    Resources = 3,
    Security = 4,
    Services = 5,
    Vt = 6,
    Communication = 7,
}

/// BACnet error code reported in Error PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Other = 0,
    ConfigurationInProgress = 2,
    DeviceBusy = 3,
    InconsistentParameters = 7,
    InvalidDataType = 9,
    NoSpaceToWriteProperty = 20,
    PasswordFailure = 26,
    ReadAccessDenied = 27,
    ServiceRequestDenied = 29,
    Timeout = 30,
    UnknownObject = 31,
    UnknownProperty = 32,
    ValueOutOfRange = 37,
    WriteAccessDenied = 40,
    InvalidArrayIndex = 42,
    CovSubscriptionFailed = 43,
    OptionalFunctionalityNotSupported = 45,
    PropertyIsNotAnArray = 50,
}

impl Segmentation {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::SegmentedBoth),
            1 => Some(Self::SegmentedTransmit),
            2 => Some(Self::SegmentedReceive),
            3 => Some(Self::NoSegmentation),
            _ => None,
        }
    }

    /// Whether a peer advertising this capability can send segmented
    /// responses (complex acks) to us.
    pub const fn can_transmit_segments(self) -> bool {
        matches!(self, Self::SegmentedBoth | Self::SegmentedTransmit)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::SegmentedBoth => "segmentedBoth",
            Self::SegmentedTransmit => "segmentedTransmit",
            Self::SegmentedReceive => "segmentedReceive",
            Self::NoSegmentation => "noSegmentation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            Self::SegmentedBoth,
            Self::SegmentedTransmit,
            Self::SegmentedReceive,
            Self::NoSegmentation,
        ]
        .into_iter()
        .find(|candidate| candidate.name().eq_ignore_ascii_case(name))
    }
}

impl MaxApdu {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::UpTo50),
            1 => Some(Self::UpTo128),
            2 => Some(Self::UpTo206),
            3 => Some(Self::UpTo480),
            4 => Some(Self::UpTo1024),
            5 => Some(Self::UpTo1476),
            _ => None,
        }
    }

    pub const fn octets(self) -> u16 {
        match self {
            Self::UpTo50 => 50,
            Self::UpTo128 => 128,
            Self::UpTo206 => 206,
            Self::UpTo480 => 480,
            Self::UpTo1024 => 1024,
            Self::UpTo1476 => 1476,
        }
    }

    pub const fn from_octets(octets: u32) -> Option<Self> {
        match octets {
            50 => Some(Self::UpTo50),
            128 => Some(Self::UpTo128),
            206 => Some(Self::UpTo206),
            480 => Some(Self::UpTo480),
            1024 => Some(Self::UpTo1024),
            1476 => Some(Self::UpTo1476),
            _ => None,
        }
    }
}

impl ErrorClass {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Device),
            1 => Some(Self::Object),
            2 => Some(Self::Property),
            3 => Some(Self::Resources),
            4 => Some(Self::Security),
            5 => Some(Self::Services),
            6 => Some(Self::Vt),
            7 => Some(Self::Communication),
            _ => None,
        }
    }
}

impl ErrorCode {
    pub const fn to_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Other),
            2 => Some(Self::ConfigurationInProgress),
            3 => Some(Self::DeviceBusy),
            7 => Some(Self::InconsistentParameters),
            9 => Some(Self::InvalidDataType),
            20 => Some(Self::NoSpaceToWriteProperty),
            26 => Some(Self::PasswordFailure),
            27 => Some(Self::ReadAccessDenied),
            29 => Some(Self::ServiceRequestDenied),
            30 => Some(Self::Timeout),
            31 => Some(Self::UnknownObject),
            32 => Some(Self::UnknownProperty),
            37 => Some(Self::ValueOutOfRange),
            40 => Some(Self::WriteAccessDenied),
            42 => Some(Self::InvalidArrayIndex),
            43 => Some(Self::CovSubscriptionFailed),
            45 => Some(Self::OptionalFunctionalityNotSupported),
            50 => Some(Self::PropertyIsNotAnArray),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segmentation_transmit_capability() {
        assert!(Segmentation::SegmentedBoth.can_transmit_segments());
        assert!(Segmentation::SegmentedTransmit.can_transmit_segments());
        assert!(!Segmentation::SegmentedReceive.can_transmit_segments());
        assert!(!Segmentation::NoSegmentation.can_transmit_segments());
        assert_eq!(
            Segmentation::from_name("noSegmentation"),
            Some(Segmentation::NoSegmentation)
        );
    }

    #[test]
    fn max_apdu_octets_round_trip() {
        for code in 0..=5 {
            let max = MaxApdu::from_u32(code).unwrap();
            assert_eq!(MaxApdu::from_octets(u32::from(max.octets())), Some(max));
        }
        assert_eq!(MaxApdu::from_octets(1000), None);
    }
}
