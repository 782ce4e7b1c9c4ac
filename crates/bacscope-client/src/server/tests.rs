use super::*;
use crate::LocalDeviceConfig;
use bacscope_core::apdu::ComplexAckHeader;
use bacscope_core::services::read_property::ReadPropertyAck;
use bacscope_core::services::read_property_multiple::{
    PropertyReference, ReadAccessSpecification, ReadPropertyMultipleRequest,
};
use bacscope_core::services::read_range::{ReadRangeAck, ReadRangeSpecifier};
use bacscope_core::types::DataValue;
use std::net::SocketAddr;

fn server() -> LocalServer {
    let local = LocalDeviceConfig {
        device_id: Some(3056),
        object_name: Some("local".into()),
        ..LocalDeviceConfig::default()
    }
    .validate()
    .unwrap();
    LocalServer::new(&local)
}

fn peer() -> Address {
    Address::from("192.168.1.20:47808".parse::<SocketAddr>().unwrap())
}

fn av(instance: u32) -> ObjectId {
    ObjectId::new(ObjectType::AnalogValue, instance)
}

/// Feeds an encoded confirmed request through the server.
fn ask<F>(server: &LocalServer, limit: usize, encode_request: F) -> ServerOutcome
where
    F: FnMut(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    let apdu = crate::engine::encode_with_growth(encode_request).unwrap();
    let mut r = Reader::new(&apdu);
    let header = ConfirmedRequestHeader::decode(&mut r).unwrap();
    let payload = r.read_exact(r.remaining()).unwrap();
    server.handle_confirmed(&peer(), &header, payload, limit)
}

fn read_pv(server: &LocalServer, object_id: ObjectId) -> ClientDataValue {
    let outcome = ask(server, 1476, |w| {
        ReadPropertyRequest {
            object_id,
            property_id: PropertyId::PresentValue,
            array_index: None,
            invoke_id: 1,
        }
        .encode(w)
    });
    let mut r = Reader::new(&outcome.reply);
    ComplexAckHeader::decode(&mut r).unwrap();
    let ack = ReadPropertyAck::decode_after_header(&mut r).unwrap();
    ClientDataValue::from(ack.value)
}

fn hosted_av(server: &LocalServer) -> ObjectId {
    server
        .create(
            &ObjectConfig::new("analogValue", 1, "av1")
                .present_value(99.9)
                .property("units", "degreesCelsius")
                .property("covIncrement", 1.0)
                .commandable(90.0),
        )
        .unwrap()
}

#[test]
fn read_property_of_hosted_object() {
    let server = server();
    let id = hosted_av(&server);
    assert_eq!(read_pv(&server, id), ClientDataValue::Real(90.0));
    server
        .set_present_value(id, &ClientDataValue::Real(99.9))
        .unwrap();
    assert_eq!(read_pv(&server, id), ClientDataValue::Real(99.9));
}

#[test]
fn wildcard_device_instance_reads_local_device() {
    let server = server();
    let outcome = ask(&server, 1476, |w| {
        ReadPropertyRequest {
            object_id: ObjectId::new(ObjectType::Device, WILDCARD_DEVICE_INSTANCE),
            property_id: PropertyId::ObjectName,
            array_index: None,
            invoke_id: 7,
        }
        .encode(w)
    });
    let mut r = Reader::new(&outcome.reply);
    ComplexAckHeader::decode(&mut r).unwrap();
    let ack = ReadPropertyAck::decode_after_header(&mut r).unwrap();
    assert_eq!(ack.object_id, ObjectId::new(ObjectType::Device, 3056));
    assert_eq!(ack.value, DataValue::CharacterString("local"));
}

#[test]
fn unknown_object_answers_error_pdu() {
    let server = server();
    let outcome = ask(&server, 1476, |w| {
        ReadPropertyRequest {
            object_id: av(42),
            property_id: PropertyId::PresentValue,
            array_index: None,
            invoke_id: 3,
        }
        .encode(w)
    });
    let mut r = Reader::new(&outcome.reply);
    let error = BacnetError::decode(&mut r).unwrap();
    assert_eq!(error.error_class, Some(ErrorClass::Object.to_u32()));
    assert_eq!(error.error_code, Some(ErrorCode::UnknownObject.to_u32()));
}

#[test]
fn write_at_priority_then_release() {
    let server = server();
    let id = hosted_av(&server);
    let outcome = ask(&server, 1476, |w| {
        WritePropertyRequest {
            object_id: id,
            property_id: PropertyId::PresentValue,
            value: DataValue::Real(11.2),
            array_index: None,
            priority: Some(8),
            invoke_id: 4,
        }
        .encode(w)
    });
    let mut r = Reader::new(&outcome.reply);
    assert_eq!(SimpleAck::decode(&mut r).unwrap().invoke_id, 4);
    assert_eq!(read_pv(&server, id), ClientDataValue::Real(11.2));

    ask(&server, 1476, |w| {
        WritePropertyRequest {
            object_id: id,
            property_id: PropertyId::PresentValue,
            value: DataValue::Null,
            array_index: None,
            priority: Some(8),
            invoke_id: 5,
        }
        .encode(w)
    });
    assert_eq!(read_pv(&server, id), ClientDataValue::Real(90.0));
}

#[test]
fn read_multiple_expands_all() {
    let server = server();
    let id = hosted_av(&server);
    let references = [PropertyReference {
        property_id: PropertyId::from_u32(PROPERTY_ALL),
        array_index: None,
    }];
    let specs = [ReadAccessSpecification {
        object_id: id,
        properties: &references,
    }];
    let outcome = ask(&server, 1476, |w| {
        ReadPropertyMultipleRequest {
            specs: &specs,
            invoke_id: 9,
        }
        .encode(w)
    });
    let mut r = Reader::new(&outcome.reply);
    ComplexAckHeader::decode(&mut r).unwrap();
    let ack = ReadPropertyMultipleAck::decode_after_header(&mut r).unwrap();
    let properties: Vec<PropertyId> = ack.results[0].results.iter().map(|e| e.property_id).collect();
    assert!(properties.contains(&PropertyId::PresentValue));
    assert!(properties.contains(&PropertyId::Units));
    assert!(properties.contains(&PropertyId::PriorityArray));
}

#[test]
fn oversized_answer_aborts_without_segmenting() {
    let server = server();
    for i in 0..40 {
        server
            .create(&ObjectConfig::new("binaryValue", i, &format!("bv{i}")))
            .unwrap();
    }
    let outcome = ask(&server, 50, |w| {
        ReadPropertyRequest {
            object_id: server.device_id(),
            property_id: PropertyId::ObjectList,
            array_index: None,
            invoke_id: 11,
        }
        .encode(w)
    });
    let mut r = Reader::new(&outcome.reply);
    let abort = AbortPdu::decode(&mut r).unwrap();
    assert!(abort.server);
    assert_eq!(abort.reason, AbortPdu::REASON_SEGMENTATION_NOT_SUPPORTED);
}

#[test]
fn unsupported_service_is_rejected() {
    let server = server();
    let header = ConfirmedRequestHeader {
        segmented: false,
        more_follows: false,
        segmented_response_accepted: false,
        max_segments: 0,
        max_apdu: 5,
        invoke_id: 12,
        sequence_number: None,
        proposed_window_size: None,
        service_choice: 0x1B,
    };
    let outcome = server.handle_confirmed(&peer(), &header, &[], 1476);
    let reject = RejectPdu::decode(&mut Reader::new(&outcome.reply)).unwrap();
    assert_eq!(reject.reason, RejectPdu::REASON_UNRECOGNIZED_SERVICE);
}

#[test]
fn cov_subscription_notifies_on_increment() {
    let server = server();
    let id = hosted_av(&server);
    let outcome = ask(&server, 1476, |w| {
        SubscribeCovRequest {
            subscriber_process_id: 17,
            monitored_object_id: id,
            issue_confirmed_notifications: Some(false),
            lifetime_seconds: Some(300),
            invoke_id: 2,
        }
        .encode(w)
    });
    assert_eq!(outcome.events.len(), 1, "initial notification");
    assert_eq!(outcome.events[0].process_id, 17);
    assert_eq!(server.subscription_count(), 1);

    let small = server.set_present_value(id, &ClientDataValue::Real(90.5)).unwrap();
    assert!(small.is_empty());
    let large = server.set_present_value(id, &ClientDataValue::Real(92.0)).unwrap();
    assert_eq!(large.len(), 1);
    assert_eq!(
        large[0].values[0],
        (PropertyId::PresentValue, ClientDataValue::Real(92.0))
    );
    assert!(large[0].time_remaining_seconds <= 300);

    ask(&server, 1476, |w| {
        SubscribeCovRequest {
            subscriber_process_id: 17,
            monitored_object_id: id,
            issue_confirmed_notifications: None,
            lifetime_seconds: None,
            invoke_id: 3,
        }
        .encode(w)
    });
    assert_eq!(server.subscription_count(), 0);
}

#[test]
fn trend_log_records_changes_and_serves_read_range() {
    let server = server();
    let id = hosted_av(&server);
    let log_id = server
        .create(
            &ObjectConfig::new("trendLog", 1, "av1-trend")
                .property("logDeviceObjectProperty", "analogValue:1"),
        )
        .unwrap();
    for v in [1.0, 2.0, 3.0] {
        server.set_present_value(id, &ClientDataValue::Real(v)).unwrap();
    }
    assert_eq!(server.trend_log(log_id).unwrap().len(), 3);

    let outcome = ask(&server, 1476, |w| {
        ReadRangeRequest {
            object_id: log_id,
            property_id: PropertyId::LogBuffer,
            array_index: None,
            range: ReadRangeSpecifier::ReadAll,
            invoke_id: 6,
        }
        .encode(w)
    });
    let mut r = Reader::new(&outcome.reply);
    ComplexAckHeader::decode(&mut r).unwrap();
    let ack = ReadRangeAck::decode_after_header(&mut r).unwrap();
    assert_eq!(ack.item_count, 3);
}

#[test]
fn who_has_by_name_and_id() {
    let server = server();
    let id = hosted_av(&server);
    assert_eq!(
        server.who_has(&WhoHasObject::ObjectName("av1")),
        Some((id, "av1".to_string()))
    );
    assert_eq!(
        server.who_has(&WhoHasObject::ObjectId(id)).map(|(_, n)| n),
        Some("av1".to_string())
    );
    assert!(server.remove_object(id));
    assert_eq!(server.who_has(&WhoHasObject::ObjectName("av1")), None);
}
