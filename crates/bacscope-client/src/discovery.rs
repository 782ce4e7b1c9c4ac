use crate::Address;
use bacscope_core::types::{ObjectId, Segmentation};

/// A device that answered Who-Is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: Address,
    pub device_id: u32,
    pub max_apdu: u32,
    pub segmentation: Option<Segmentation>,
    pub vendor_id: u32,
}

/// An object reported by I-Have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredObject {
    pub address: Address,
    pub device_id: ObjectId,
    pub object_id: ObjectId,
    pub object_name: String,
}

/// Unsolicited traffic fanned out by the dispatcher to whoever is listening.
#[derive(Debug, Clone)]
pub enum Unsolicited {
    IAm(DiscoveredDevice),
    IHave(DiscoveredObject),
    IAmRouter {
        router: bacscope_datalink::DataLinkAddress,
        networks: Vec<u16>,
    },
}
