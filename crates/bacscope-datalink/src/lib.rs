#![allow(async_fn_in_trait)]
//! Data link layer for bacscope: the [`DataLink`] trait and the BACnet/IP
//! transport with foreign-device and BBMD support.

pub mod address;
pub mod bip;
pub mod traits;

pub use address::DataLinkAddress;
pub use bip::transport::{BacnetIpTransport, BroadcastDistributionEntry, ForeignDeviceTableEntry};
pub use traits::{DataLink, DataLinkError};
