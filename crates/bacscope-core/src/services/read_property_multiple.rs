use crate::apdu::ConfirmedRequestHeader;
use crate::encoding::{
    primitives::{encode_ctx_object_id, encode_ctx_unsigned},
    tag::Tag,
    writer::Writer,
};
use crate::types::{ObjectId, PropertyId};
use crate::EncodeError;

#[cfg(feature = "alloc")]
use crate::apdu::ComplexAckHeader;
#[cfg(feature = "alloc")]
use crate::encoding::{
    primitives::{decode_unsigned, encode_app_enumerated},
    reader::Reader,
    tag::AppTag,
};
#[cfg(feature = "alloc")]
use crate::services::value_codec::{decode_property_value, encode_application_data_value};
#[cfg(feature = "alloc")]
use crate::types::DataValue;
#[cfg(feature = "alloc")]
use crate::DecodeError;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub const SERVICE_READ_PROPERTY_MULTIPLE: u8 = 0x0E;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyReference {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadAccessSpecification<'a> {
    pub object_id: ObjectId,
    pub properties: &'a [PropertyReference],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPropertyMultipleRequest<'a> {
    pub specs: &'a [ReadAccessSpecification<'a>],
    pub invoke_id: u8,
}

impl<'a> ReadPropertyMultipleRequest<'a> {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        ConfirmedRequestHeader {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: true,
            max_segments: 0,
            max_apdu: 5,
            invoke_id: self.invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_READ_PROPERTY_MULTIPLE,
        }
        .encode(w)?;

        for spec in self.specs {
            encode_ctx_object_id(w, 0, spec.object_id.raw())?;
            Tag::Opening { tag_num: 1 }.encode(w)?;
            for prop in spec.properties {
                encode_ctx_unsigned(w, 0, prop.property_id.to_u32())?;
                if let Some(idx) = prop.array_index {
                    encode_ctx_unsigned(w, 1, idx)?;
                }
            }
            Tag::Closing { tag_num: 1 }.encode(w)?;
        }

        Ok(())
    }
}

/// A read-access specification decoded from an incoming request.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedReadAccessSpecification {
    pub object_id: ObjectId,
    pub properties: Vec<PropertyReference>,
}

/// Decodes the service parameters of an incoming ReadPropertyMultiple.
#[cfg(feature = "alloc")]
pub fn decode_read_access_specs(
    r: &mut Reader<'_>,
) -> Result<Vec<OwnedReadAccessSpecification>, DecodeError> {
    let mut specs = Vec::new();
    while !r.is_empty() {
        let object_id = match Tag::decode(r)? {
            Tag::Context { tag_num: 0, len } => {
                ObjectId::from_raw(decode_unsigned(r, len as usize)?)
            }
            _ => return Err(DecodeError::InvalidTag),
        };
        if Tag::decode(r)? != (Tag::Opening { tag_num: 1 }) {
            return Err(DecodeError::InvalidTag);
        }

        let mut properties = Vec::new();
        loop {
            match Tag::decode(r)? {
                Tag::Closing { tag_num: 1 } => break,
                Tag::Context { tag_num: 0, len } => {
                    let property_id = PropertyId::from_u32(decode_unsigned(r, len as usize)?);
                    let checkpoint = *r;
                    let array_index = match Tag::decode(r)? {
                        Tag::Context { tag_num: 1, len } => {
                            Some(decode_unsigned(r, len as usize)?)
                        }
                        _ => {
                            *r = checkpoint;
                            None
                        }
                    };
                    properties.push(PropertyReference {
                        property_id,
                        array_index,
                    });
                }
                _ => return Err(DecodeError::InvalidTag),
            }
        }
        specs.push(OwnedReadAccessSpecification {
            object_id,
            properties,
        });
    }
    Ok(specs)
}

/// Outcome of reading one property inside an RPM response.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq)]
pub enum ReadResult<'a> {
    Value(DataValue<'a>),
    Error { error_class: u32, error_code: u32 },
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResultElement<'a> {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub result: ReadResult<'a>,
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAccessResult<'a> {
    pub object_id: ObjectId,
    pub results: Vec<ReadResultElement<'a>>,
}

#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyMultipleAck<'a> {
    pub results: Vec<ReadAccessResult<'a>>,
}

#[cfg(feature = "alloc")]
impl<'a> ReadPropertyMultipleAck<'a> {
    /// Encodes a complete, unsegmented ComplexAck answering `invoke_id`.
    pub fn encode(&self, w: &mut Writer<'_>, invoke_id: u8) -> Result<(), EncodeError> {
        ComplexAckHeader {
            segmented: false,
            more_follows: false,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice: SERVICE_READ_PROPERTY_MULTIPLE,
        }
        .encode(w)?;
        for access in &self.results {
            encode_ctx_object_id(w, 0, access.object_id.raw())?;
            Tag::Opening { tag_num: 1 }.encode(w)?;
            for element in &access.results {
                encode_ctx_unsigned(w, 2, element.property_id.to_u32())?;
                if let Some(idx) = element.array_index {
                    encode_ctx_unsigned(w, 3, idx)?;
                }
                match &element.result {
                    ReadResult::Value(value) => {
                        Tag::Opening { tag_num: 4 }.encode(w)?;
                        encode_application_data_value(w, value)?;
                        Tag::Closing { tag_num: 4 }.encode(w)?;
                    }
                    ReadResult::Error {
                        error_class,
                        error_code,
                    } => {
                        Tag::Opening { tag_num: 5 }.encode(w)?;
                        encode_app_enumerated(w, *error_class)?;
                        encode_app_enumerated(w, *error_code)?;
                        Tag::Closing { tag_num: 5 }.encode(w)?;
                    }
                }
            }
            Tag::Closing { tag_num: 1 }.encode(w)?;
        }
        Ok(())
    }

    pub fn decode_after_header(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let mut all_results = Vec::new();

        while !r.is_empty() {
            let object_id = match Tag::decode(r)? {
                Tag::Context { tag_num: 0, len } => {
                    ObjectId::from_raw(decode_unsigned(r, len as usize)?)
                }
                _ => return Err(DecodeError::InvalidTag),
            };

            match Tag::decode(r)? {
                Tag::Opening { tag_num: 1 } => {}
                _ => return Err(DecodeError::InvalidTag),
            }

            let mut elements = Vec::new();
            loop {
                let tag = Tag::decode(r)?;
                if tag == (Tag::Closing { tag_num: 1 }) {
                    break;
                }

                let property_id = match tag {
                    Tag::Context { tag_num: 2, len } => {
                        PropertyId::from_u32(decode_unsigned(r, len as usize)?)
                    }
                    _ => return Err(DecodeError::InvalidTag),
                };

                let next = Tag::decode(r)?;
                let (array_index, result_open) = match next {
                    Tag::Context { tag_num: 3, len } => {
                        let idx = decode_unsigned(r, len as usize)?;
                        (Some(idx), Tag::decode(r)?)
                    }
                    other => (None, other),
                };

                let result = match result_open {
                    Tag::Opening { tag_num: 4 } => ReadResult::Value(decode_property_value(r, 4)?),
                    Tag::Opening { tag_num: 5 } => {
                        let error_class = decode_error_field(r)?;
                        let error_code = decode_error_field(r)?;
                        if Tag::decode(r)? != (Tag::Closing { tag_num: 5 }) {
                            return Err(DecodeError::InvalidTag);
                        }
                        ReadResult::Error {
                            error_class,
                            error_code,
                        }
                    }
                    _ => return Err(DecodeError::InvalidTag),
                };

                elements.push(ReadResultElement {
                    property_id,
                    array_index,
                    result,
                });
            }

            all_results.push(ReadAccessResult {
                object_id,
                results: elements,
            });
        }

        Ok(Self {
            results: all_results,
        })
    }
}

#[cfg(feature = "alloc")]
fn decode_error_field(r: &mut Reader<'_>) -> Result<u32, DecodeError> {
    match Tag::decode(r)? {
        Tag::Application {
            tag: AppTag::Enumerated,
            len,
        }
        | Tag::Context { len, .. } => decode_unsigned(r, len as usize),
        _ => Err(DecodeError::InvalidTag),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        PropertyReference, ReadAccessSpecification, ReadPropertyMultipleRequest,
        SERVICE_READ_PROPERTY_MULTIPLE,
    };
    use crate::apdu::ConfirmedRequestHeader;
    use crate::encoding::{reader::Reader, writer::Writer};
    use crate::types::{ObjectId, ObjectType, PropertyId};

    #[test]
    fn encode_read_property_multiple_request() {
        let props = [
            PropertyReference {
                property_id: PropertyId::ObjectName,
                array_index: None,
            },
            PropertyReference {
                property_id: PropertyId::PresentValue,
                array_index: Some(1),
            },
        ];

        let specs = [ReadAccessSpecification {
            object_id: ObjectId::new(ObjectType::Device, 123),
            properties: &props,
        }];

        let req = ReadPropertyMultipleRequest {
            specs: &specs,
            invoke_id: 7,
        };

        let mut buf = [0u8; 128];
        let mut w = Writer::new(&mut buf);
        req.encode(&mut w).unwrap();

        let mut r = Reader::new(w.as_written());
        let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
        assert_eq!(header.invoke_id, 7);
        assert_eq!(header.service_choice, SERVICE_READ_PROPERTY_MULTIPLE);

        #[cfg(feature = "alloc")]
        {
            let decoded = super::decode_read_access_specs(&mut r).unwrap();
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded[0].properties, props.to_vec());
        }
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn ack_surfaces_per_property_errors() {
        use super::{ReadAccessResult, ReadPropertyMultipleAck, ReadResult, ReadResultElement};
        use crate::apdu::ComplexAckHeader;
        use crate::types::DataValue;
        use alloc::vec;

        let ack = ReadPropertyMultipleAck {
            results: vec![ReadAccessResult {
                object_id: ObjectId::new(ObjectType::AnalogValue, 1),
                results: vec![
                    ReadResultElement {
                        property_id: PropertyId::PresentValue,
                        array_index: None,
                        result: ReadResult::Value(DataValue::Real(42.0)),
                    },
                    ReadResultElement {
                        property_id: PropertyId::Units,
                        array_index: None,
                        result: ReadResult::Error {
                            error_class: 2,
                            error_code: 32,
                        },
                    },
                ],
            }],
        };

        let mut buf = [0u8; 128];
        let mut w = Writer::new(&mut buf);
        ack.encode(&mut w, 9).unwrap();

        let mut r = Reader::new(w.as_written());
        let header = ComplexAckHeader::decode(&mut r).unwrap();
        assert_eq!(header.service_choice, SERVICE_READ_PROPERTY_MULTIPLE);
        let parsed = ReadPropertyMultipleAck::decode_after_header(&mut r).unwrap();
        assert_eq!(parsed, ack);
    }
}
