use crate::encoding::{reader::Reader, writer::Writer};
use crate::{DecodeError, EncodeError};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub const MESSAGE_WHO_IS_ROUTER_TO_NETWORK: u8 = 0x00;
pub const MESSAGE_I_AM_ROUTER_TO_NETWORK: u8 = 0x01;
pub const MESSAGE_REJECT_MESSAGE_TO_NETWORK: u8 = 0x03;
pub const MESSAGE_ROUTER_BUSY_TO_NETWORK: u8 = 0x04;
pub const MESSAGE_ROUTER_AVAILABLE_TO_NETWORK: u8 = 0x05;

/// Network-layer messages exchanged with BACnet routers.
///
/// The message type travels in the NPDU header; these payloads follow it.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    WhoIsRouterToNetwork(Option<u16>),
    IAmRouterToNetwork(Vec<u16>),
    RejectMessageToNetwork { reason: u8, network: u16 },
    RouterBusyToNetwork(Vec<u16>),
    RouterAvailableToNetwork(Vec<u16>),
}

#[cfg(feature = "alloc")]
impl NetworkMessage {
    pub const fn message_type(&self) -> u8 {
        match self {
            Self::WhoIsRouterToNetwork(_) => MESSAGE_WHO_IS_ROUTER_TO_NETWORK,
            Self::IAmRouterToNetwork(_) => MESSAGE_I_AM_ROUTER_TO_NETWORK,
            Self::RejectMessageToNetwork { .. } => MESSAGE_REJECT_MESSAGE_TO_NETWORK,
            Self::RouterBusyToNetwork(_) => MESSAGE_ROUTER_BUSY_TO_NETWORK,
            Self::RouterAvailableToNetwork(_) => MESSAGE_ROUTER_AVAILABLE_TO_NETWORK,
        }
    }

    /// Encodes the payload only (the NPDU header carries the type).
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::WhoIsRouterToNetwork(network) => {
                if let Some(network) = network {
                    w.write_be_u16(*network)?;
                }
                Ok(())
            }
            Self::IAmRouterToNetwork(networks)
            | Self::RouterBusyToNetwork(networks)
            | Self::RouterAvailableToNetwork(networks) => {
                for network in networks {
                    w.write_be_u16(*network)?;
                }
                Ok(())
            }
            Self::RejectMessageToNetwork { reason, network } => {
                w.write_u8(*reason)?;
                w.write_be_u16(*network)
            }
        }
    }

    /// Decodes the payload of a message of the given type. Returns
    /// `Unsupported` for message types the client does not track.
    pub fn decode(message_type: u8, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        match message_type {
            MESSAGE_WHO_IS_ROUTER_TO_NETWORK => {
                if r.remaining() >= 2 {
                    Ok(Self::WhoIsRouterToNetwork(Some(r.read_be_u16()?)))
                } else {
                    Ok(Self::WhoIsRouterToNetwork(None))
                }
            }
            MESSAGE_I_AM_ROUTER_TO_NETWORK => Ok(Self::IAmRouterToNetwork(decode_networks(r)?)),
            MESSAGE_REJECT_MESSAGE_TO_NETWORK => Ok(Self::RejectMessageToNetwork {
                reason: r.read_u8()?,
                network: r.read_be_u16()?,
            }),
            MESSAGE_ROUTER_BUSY_TO_NETWORK => Ok(Self::RouterBusyToNetwork(decode_networks(r)?)),
            MESSAGE_ROUTER_AVAILABLE_TO_NETWORK => {
                Ok(Self::RouterAvailableToNetwork(decode_networks(r)?))
            }
            _ => Err(DecodeError::Unsupported),
        }
    }
}

#[cfg(feature = "alloc")]
fn decode_networks(r: &mut Reader<'_>) -> Result<Vec<u16>, DecodeError> {
    if r.remaining() % 2 != 0 {
        return Err(DecodeError::InvalidLength);
    }
    let mut networks = Vec::with_capacity(r.remaining() / 2);
    while !r.is_empty() {
        networks.push(r.read_be_u16()?);
    }
    Ok(networks)
}

#[cfg(test)]
#[cfg(feature = "alloc")]
mod tests {
    use super::*;
    use crate::npdu::Npdu;
    use alloc::vec;

    #[test]
    fn i_am_router_lists_every_network() {
        let mut buf = [0u8; 32];
        let mut w = Writer::new(&mut buf);
        let msg = NetworkMessage::IAmRouterToNetwork(vec![3, 0x0102]);
        Npdu::network_message(msg.message_type())
            .encode(&mut w)
            .unwrap();
        msg.encode(&mut w).unwrap();
        assert_eq!(w.as_written(), &[0x01, 0x80, 0x01, 0x00, 0x03, 0x01, 0x02]);

        let mut r = Reader::new(w.as_written());
        let npdu = Npdu::decode(&mut r).unwrap();
        let decoded = NetworkMessage::decode(npdu.message_type.unwrap(), &mut r).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn who_is_router_network_is_optional() {
        let mut r = Reader::new(&[]);
        assert_eq!(
            NetworkMessage::decode(MESSAGE_WHO_IS_ROUTER_TO_NETWORK, &mut r).unwrap(),
            NetworkMessage::WhoIsRouterToNetwork(None)
        );
    }

    #[test]
    fn odd_length_network_list_is_rejected() {
        let mut r = Reader::new(&[0x00, 0x01, 0x02]);
        assert_eq!(
            NetworkMessage::decode(MESSAGE_ROUTER_BUSY_TO_NETWORK, &mut r),
            Err(DecodeError::InvalidLength)
        );
    }
}
