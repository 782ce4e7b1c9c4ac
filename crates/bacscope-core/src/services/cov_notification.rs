#[cfg(feature = "alloc")]
use crate::apdu::{ConfirmedRequestHeader, UnconfirmedRequestHeader};
#[cfg(feature = "alloc")]
use crate::encoding::{
    primitives::{decode_unsigned, encode_ctx_object_id, encode_ctx_unsigned},
    reader::Reader,
    tag::Tag,
    writer::Writer,
};
#[cfg(feature = "alloc")]
use crate::services::value_codec::{decode_property_value, encode_application_data_value};
#[cfg(feature = "alloc")]
use crate::services::{decode_required_ctx_object_id, decode_required_ctx_unsigned};
#[cfg(feature = "alloc")]
use crate::types::{DataValue, ObjectId, PropertyId};
#[cfg(feature = "alloc")]
use crate::{DecodeError, EncodeError};
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub const SERVICE_CONFIRMED_COV_NOTIFICATION: u8 = 0x01;
pub const SERVICE_UNCONFIRMED_COV_NOTIFICATION: u8 = 0x02;

#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq)]
pub struct CovPropertyValue<'a> {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: DataValue<'a>,
    pub priority: Option<u8>,
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq)]
pub struct CovNotificationRequest<'a> {
    pub subscriber_process_id: u32,
    pub initiating_device_id: ObjectId,
    pub monitored_object_id: ObjectId,
    pub time_remaining_seconds: u32,
    pub values: Vec<CovPropertyValue<'a>>,
}

#[cfg(feature = "alloc")]
impl<'a> CovNotificationRequest<'a> {
    /// Encodes a full notification APDU. `invoke_id` selects the confirmed
    /// service; `None` sends the unconfirmed one.
    pub fn encode(&self, w: &mut Writer<'_>, invoke_id: Option<u8>) -> Result<(), EncodeError> {
        match invoke_id {
            Some(invoke_id) => ConfirmedRequestHeader {
                segmented: false,
                more_follows: false,
                segmented_response_accepted: false,
                max_segments: 0,
                max_apdu: 5,
                invoke_id,
                sequence_number: None,
                proposed_window_size: None,
                service_choice: SERVICE_CONFIRMED_COV_NOTIFICATION,
            }
            .encode(w)?,
            None => UnconfirmedRequestHeader {
                service_choice: SERVICE_UNCONFIRMED_COV_NOTIFICATION,
            }
            .encode(w)?,
        }
        encode_ctx_unsigned(w, 0, self.subscriber_process_id)?;
        encode_ctx_object_id(w, 1, self.initiating_device_id.raw())?;
        encode_ctx_object_id(w, 2, self.monitored_object_id.raw())?;
        encode_ctx_unsigned(w, 3, self.time_remaining_seconds)?;
        Tag::Opening { tag_num: 4 }.encode(w)?;
        for value in &self.values {
            encode_ctx_unsigned(w, 0, value.property_id.to_u32())?;
            if let Some(idx) = value.array_index {
                encode_ctx_unsigned(w, 1, idx)?;
            }
            Tag::Opening { tag_num: 2 }.encode(w)?;
            encode_application_data_value(w, &value.value)?;
            Tag::Closing { tag_num: 2 }.encode(w)?;
            if let Some(priority) = value.priority {
                encode_ctx_unsigned(w, 3, u32::from(priority))?;
            }
        }
        Tag::Closing { tag_num: 4 }.encode(w)
    }

    pub fn decode_after_header(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let subscriber_process_id = decode_required_ctx_unsigned(r, 0)?;
        let initiating_device_id = decode_required_ctx_object_id(r, 1)?;
        let monitored_object_id = decode_required_ctx_object_id(r, 2)?;
        let time_remaining_seconds = decode_required_ctx_unsigned(r, 3)?;

        match Tag::decode(r)? {
            Tag::Opening { tag_num: 4 } => {}
            _ => return Err(DecodeError::InvalidTag),
        }

        let mut values = Vec::new();
        loop {
            let property_start = Tag::decode(r)?;
            if property_start == (Tag::Closing { tag_num: 4 }) {
                break;
            }

            let property_id = match property_start {
                Tag::Context { tag_num: 0, len } => {
                    PropertyId::from_u32(decode_unsigned(r, len as usize)?)
                }
                _ => return Err(DecodeError::InvalidTag),
            };

            let next = Tag::decode(r)?;
            let (array_index, value_open_tag) = match next {
                Tag::Context { tag_num: 1, len } => {
                    let idx = decode_unsigned(r, len as usize)?;
                    (Some(idx), Tag::decode(r)?)
                }
                other => (None, other),
            };
            if value_open_tag != (Tag::Opening { tag_num: 2 }) {
                return Err(DecodeError::InvalidTag);
            }

            let value = decode_property_value(r, 2)?;

            let checkpoint = *r;
            let priority = match Tag::decode(r)? {
                Tag::Context { tag_num: 3, len } => {
                    let p = decode_unsigned(r, len as usize)?;
                    if p > u8::MAX as u32 {
                        return Err(DecodeError::InvalidValue);
                    }
                    Some(p as u8)
                }
                _ => {
                    *r = checkpoint;
                    None
                }
            };

            values.push(CovPropertyValue {
                property_id,
                array_index,
                value,
                priority,
            });
        }

        Ok(Self {
            subscriber_process_id,
            initiating_device_id,
            monitored_object_id,
            time_remaining_seconds,
            values,
        })
    }
}
