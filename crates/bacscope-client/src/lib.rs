//! BACnet/IP client with a lightweight local server.
//!
//! [`BacnetClient`] reads, writes, discovers and subscribes over any
//! [`DataLink`](bacscope_datalink::DataLink) while answering requests for
//! its own local objects. [`device::Device`] layers points, polling and
//! snapshots on top of it.

pub mod address;
pub mod client;
pub mod config;
pub mod cov;
pub mod device;
pub mod discovery;
mod engine;
pub mod error;
pub mod hub;
pub mod request;
pub mod router;
pub mod schedule;
pub mod server;
pub mod trend;
pub mod value;

pub use address::Address;
pub use client::{BacnetClient, ObjectValues, PropertyValue, ReadRangeResult};
pub use config::{LocalDevice, LocalDeviceConfig};
pub use cov::{CovCallback, CovNotification, CovPropertyValue, CovSubscription};
pub use device::{Device, DeviceOptions, DeviceState, Point, PointValue};
pub use discovery::{DiscoveredDevice, DiscoveredObject};
pub use engine::{BroadcastScope, GLOBAL_NETWORK};
pub use error::{ClientError, ErrorKind};
pub use hub::{ChannelDataLink, ChannelHub};
pub use request::{ReadMultipleRequest, ReadRequest, WriteRequest, WriteValue};
pub use router::RouterTable;
pub use trend::{TrendLog, TrendRecord};
pub use value::ClientDataValue;

pub use bacscope_core::services::device_management::{DeviceCommunicationState, ReinitializeState};
pub use bacscope_datalink::bip::transport::{BroadcastDistributionEntry, ForeignDeviceTableEntry};
