use crate::ClientError;
use bacscope_core::types::{MaxApdu, Segmentation};
use bacscope_datalink::{BroadcastDistributionEntry, DataLinkAddress};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::Path;

/// Instances handed out when no `deviceId` is configured.
pub const RANDOM_DEVICE_ID_RANGE: RangeInclusive<u32> = 3_056_000..=3_069_999;

pub const MAX_DEVICE_INSTANCE: u32 = 4_194_302;

fn default_port() -> u16 {
    DataLinkAddress::BACNET_IP_DEFAULT_PORT
}

fn default_segmentation() -> String {
    Segmentation::SegmentedBoth.name().to_string()
}

fn default_max_apdu() -> u32 {
    1476
}

fn default_vendor_name() -> String {
    "bacscope".to_string()
}

fn default_model_name() -> String {
    "bacscope local device".to_string()
}

fn default_ttl() -> u16 {
    900
}

/// Local device, network port and BBMD options, as read from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDeviceConfig {
    /// Local interface as `a.b.c.d/len`.
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub device_id: Option<u32>,
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default = "default_segmentation")]
    pub segmentation_supported: String,
    #[serde(rename = "maxAPDULengthAccepted", default = "default_max_apdu")]
    pub max_apdu_length_accepted: u32,
    #[serde(default)]
    pub bbmd_address: Option<String>,
    #[serde(rename = "bbmdTTL", default = "default_ttl")]
    pub bbmd_ttl: u16,
    #[serde(default)]
    pub bdtable: Vec<String>,
    #[serde(default)]
    pub vendor_id: u16,
    #[serde(default = "default_vendor_name")]
    pub vendor_name: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

impl Default for LocalDeviceConfig {
    fn default() -> Self {
        Self {
            ip: None,
            port: default_port(),
            device_id: None,
            object_name: None,
            segmentation_supported: default_segmentation(),
            max_apdu_length_accepted: default_max_apdu(),
            bbmd_address: None,
            bbmd_ttl: default_ttl(),
            bdtable: Vec::new(),
            vendor_id: 0,
            vendor_name: default_vendor_name(),
            model_name: default_model_name(),
        }
    }
}

/// Foreign-device registration target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignRegistration {
    pub bbmd: SocketAddr,
    pub ttl_seconds: u16,
}

/// A validated [`LocalDeviceConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDevice {
    pub interface: Ipv4Addr,
    pub prefix_len: u8,
    pub port: u16,
    pub device_id: u32,
    pub object_name: String,
    pub segmentation: Segmentation,
    pub max_apdu: MaxApdu,
    pub vendor_id: u16,
    pub vendor_name: String,
    pub model_name: String,
    pub foreign: Option<ForeignRegistration>,
    pub bdt: Vec<BroadcastDistributionEntry>,
}

impl LocalDevice {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.interface), self.port)
    }

    /// Broadcast address of the configured subnet.
    pub fn broadcast_addr(&self) -> DataLinkAddress {
        if self.interface.is_unspecified() {
            return DataLinkAddress::local_broadcast(self.port);
        }
        DataLinkAddress::subnet_broadcast(self.interface, self.prefix_len, self.port)
    }
}

fn init_error(msg: impl Into<String>) -> ClientError {
    ClientError::InitializationError(msg.into())
}

/// Parses `a.b.c.d/len` (the `/len` part defaults to 24).
pub fn parse_interface(text: &str) -> Result<(Ipv4Addr, u8), ClientError> {
    let (ip, len) = match text.trim().split_once('/') {
        Some((ip, len)) => (
            ip,
            len.parse::<u8>()
                .map_err(|_| init_error(format!("invalid mask in {text:?}")))?,
        ),
        None => (text.trim(), 24),
    };
    if len > 32 {
        return Err(init_error(format!("invalid mask in {text:?}")));
    }
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| init_error(format!("invalid IP address {text:?}")))?;
    Ok((ip, len))
}

impl LocalDeviceConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ClientError> {
        serde_json::from_str(text).map_err(|e| init_error(format!("bad configuration: {e}")))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ClientError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| init_error(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn validate(self) -> Result<LocalDevice, ClientError> {
        let (interface, prefix_len) = match &self.ip {
            Some(ip) => parse_interface(ip)?,
            None => (Ipv4Addr::UNSPECIFIED, 0),
        };

        let segmentation = Segmentation::from_name(&self.segmentation_supported).ok_or_else(|| {
            init_error(format!(
                "unknown segmentationSupported {:?}",
                self.segmentation_supported
            ))
        })?;
        let max_apdu = MaxApdu::from_octets(self.max_apdu_length_accepted).ok_or_else(|| {
            init_error(format!(
                "maxAPDULengthAccepted {} is not a standard size",
                self.max_apdu_length_accepted
            ))
        })?;

        let device_id = match self.device_id {
            Some(id) if id > MAX_DEVICE_INSTANCE => {
                return Err(init_error(format!("deviceId {id} out of range")))
            }
            Some(id) => id,
            None => rand::thread_rng().gen_range(RANDOM_DEVICE_ID_RANGE),
        };

        let foreign = match &self.bbmd_address {
            Some(text) => {
                let bbmd = match text.parse::<SocketAddr>() {
                    Ok(addr) => addr,
                    Err(_) => {
                        let ip: Ipv4Addr = text
                            .parse()
                            .map_err(|_| init_error(format!("invalid bbmdAddress {text:?}")))?;
                        SocketAddr::new(IpAddr::V4(ip), DataLinkAddress::BACNET_IP_DEFAULT_PORT)
                    }
                };
                Some(ForeignRegistration {
                    bbmd,
                    ttl_seconds: self.bbmd_ttl,
                })
            }
            None => None,
        };
        if foreign.is_some() && !self.bdtable.is_empty() {
            return Err(init_error("bbmdAddress and bdtable are mutually exclusive"));
        }

        let bdt = self
            .bdtable
            .iter()
            .map(|entry| {
                BroadcastDistributionEntry::parse(entry)
                    .ok_or_else(|| init_error(format!("invalid bdtable entry {entry:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LocalDevice {
            interface,
            prefix_len,
            port: self.port,
            device_id,
            object_name: self
                .object_name
                .unwrap_or_else(|| format!("bacscope-{device_id}")),
            segmentation,
            max_apdu,
            vendor_id: self.vendor_id,
            vendor_name: self.vendor_name,
            model_name: self.model_name,
            foreign,
            bdt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_option_names_from_json() {
        let config = LocalDeviceConfig::from_json_str(
            r#"{
                "ip": "192.168.1.20/24",
                "port": 47809,
                "deviceId": 1234,
                "segmentationSupported": "noSegmentation",
                "maxAPDULengthAccepted": 480,
                "bbmdAddress": "10.0.0.1",
                "bbmdTTL": 600,
                "vendorId": 842,
                "modelName": "lab"
            }"#,
        )
        .unwrap();
        let local = config.validate().unwrap();
        assert_eq!(local.device_id, 1234);
        assert_eq!(local.segmentation, Segmentation::NoSegmentation);
        assert_eq!(local.max_apdu, MaxApdu::UpTo480);
        assert_eq!(
            local.foreign,
            Some(ForeignRegistration {
                bbmd: "10.0.0.1:47808".parse().unwrap(),
                ttl_seconds: 600
            })
        );
        assert_eq!(local.broadcast_addr().to_string(), "192.168.1.255:47809");
        assert_eq!(local.model_name, "lab");
    }

    #[test]
    fn random_device_id_in_reserved_range() {
        for _ in 0..20 {
            let local = LocalDeviceConfig::default().validate().unwrap();
            assert!(RANDOM_DEVICE_ID_RANGE.contains(&local.device_id));
        }
    }

    #[test]
    fn rejects_bad_ip_and_sizes() {
        let bad_ip = LocalDeviceConfig {
            ip: Some("192.168.1/24".into()),
            ..LocalDeviceConfig::default()
        };
        assert!(matches!(
            bad_ip.validate(),
            Err(ClientError::InitializationError(_))
        ));

        let bad_mask = LocalDeviceConfig {
            ip: Some("192.168.1.2/33".into()),
            ..LocalDeviceConfig::default()
        };
        assert!(bad_mask.validate().is_err());

        let bad_apdu = LocalDeviceConfig {
            max_apdu_length_accepted: 1000,
            ..LocalDeviceConfig::default()
        };
        assert!(bad_apdu.validate().is_err());
    }

    #[test]
    fn bdt_entries_parse() {
        let config = LocalDeviceConfig {
            ip: Some("10.1.0.5/16".into()),
            bdtable: vec!["10.1.0.5".into(), "10.2.0.5:47808/16".into()],
            ..LocalDeviceConfig::default()
        };
        assert_eq!(config.validate().unwrap().bdt.len(), 2);
    }
}
