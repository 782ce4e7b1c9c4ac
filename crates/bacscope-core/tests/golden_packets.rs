#[cfg(feature = "alloc")]
use bacscope_core::encoding::reader::Reader;
use bacscope_core::encoding::writer::Writer;
use bacscope_core::npdu::{Npdu, NpduAddress};
use bacscope_core::services::device_management::{
    DeviceCommunicationControlRequest, DeviceCommunicationState, ReinitializeDeviceRequest,
    ReinitializeState,
};
use bacscope_core::services::read_property::ReadPropertyRequest;
use bacscope_core::services::read_range::ReadRangeRequest;
use bacscope_core::services::subscribe_cov::SubscribeCovRequest;
use bacscope_core::services::time_synchronization::TimeSynchronizationRequest;
use bacscope_core::services::who_has::WhoHasRequest;
use bacscope_core::services::who_is::WhoIsRequest;
use bacscope_core::services::write_property::WritePropertyRequest;
use bacscope_core::types::{DataValue, Date, ObjectId, ObjectType, PropertyId, Time};

#[test]
fn who_is_global_frame_matches_fixture() {
    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    WhoIsRequest::global().encode(&mut w).unwrap();

    assert_eq!(w.as_written(), &[0x01, 0x00, 0x10, 0x08]);
}

#[test]
fn read_property_frame_matches_fixture() {
    let mut buf = [0u8; 64];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    ReadPropertyRequest {
        object_id: ObjectId::new(ObjectType::Device, 123),
        property_id: PropertyId::ObjectName,
        array_index: None,
        invoke_id: 1,
    }
    .encode(&mut w)
    .unwrap();

    assert_eq!(
        w.as_written(),
        &[0x01, 0x00, 0x02, 0x05, 0x01, 0x0C, 0x0C, 0x02, 0x00, 0x00, 0x7B, 0x19, 0x4D,]
    );
}

#[test]
fn subscribe_cov_frame_matches_fixture() {
    let mut buf = [0u8; 64];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    SubscribeCovRequest {
        subscriber_process_id: 7,
        monitored_object_id: ObjectId::new(ObjectType::AnalogInput, 2),
        issue_confirmed_notifications: Some(false),
        lifetime_seconds: Some(600),
        invoke_id: 17,
    }
    .encode(&mut w)
    .unwrap();

    assert_eq!(
        w.as_written(),
        &[
            0x01, 0x00, 0x00, 0x05, 0x11, 0x05, 0x09, 0x07, 0x1C, 0x00, 0x00, 0x00, 0x02, 0x29,
            0x00, 0x3A, 0x02, 0x58,
        ]
    );
}

#[test]
fn read_range_frame_matches_fixture() {
    let mut buf = [0u8; 96];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    ReadRangeRequest::by_position(
        ObjectId::new(ObjectType::TrendLog, 1),
        PropertyId::LogBuffer,
        None,
        1,
        2,
        4,
    )
    .encode(&mut w)
    .unwrap();

    assert_eq!(
        w.as_written(),
        &[
            0x01, 0x00, 0x02, 0x05, 0x04, 0x1A, 0x0C, 0x05, 0x00, 0x00, 0x01, 0x19, 0x83, 0x3E,
            0x21, 0x01, 0x31, 0x02, 0x3F,
        ]
    );
}

#[test]
fn who_has_by_object_id_frame_matches_fixture() {
    let mut buf = [0u8; 32];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    WhoHasRequest::for_object_id(ObjectId::new(ObjectType::AnalogInput, 2))
        .encode(&mut w)
        .unwrap();

    assert_eq!(
        w.as_written(),
        &[0x01, 0x00, 0x10, 0x07, 0x2C, 0x00, 0x00, 0x00, 0x02]
    );
}

#[test]
fn dcc_frame_matches_fixture() {
    let mut buf = [0u8; 64];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    DeviceCommunicationControlRequest {
        time_duration_minutes: Some(120),
        enable_disable: DeviceCommunicationState::Disable,
        password: None,
        invoke_id: 7,
    }
    .encode(&mut w)
    .unwrap();

    assert_eq!(
        w.as_written(),
        &[0x01, 0x00, 0x00, 0x05, 0x07, 0x11, 0x09, 0x78, 0x19, 0x01]
    );
}

#[test]
fn reinitialize_frame_matches_fixture() {
    let mut buf = [0u8; 64];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    ReinitializeDeviceRequest {
        state: ReinitializeState::Warmstart,
        password: None,
        invoke_id: 9,
    }
    .encode(&mut w)
    .unwrap();

    assert_eq!(
        w.as_written(),
        &[0x01, 0x00, 0x00, 0x05, 0x09, 0x14, 0x09, 0x01]
    );
}

#[test]
fn time_sync_frame_matches_fixture() {
    let mut buf = [0u8; 64];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    TimeSynchronizationRequest::local(
        Date {
            year_since_1900: 126,
            month: 2,
            day: 7,
            weekday: 6,
        },
        Time {
            hour: 10,
            minute: 11,
            second: 12,
            hundredths: 13,
        },
    )
    .encode(&mut w)
    .unwrap();

    assert_eq!(
        w.as_written(),
        &[0x01, 0x00, 0x10, 0x06, 0xA4, 0x7E, 0x02, 0x07, 0x06, 0xB4, 0x0A, 0x0B, 0x0C, 0x0D,]
    );
}

#[test]
fn write_property_with_priority_frame_matches_fixture() {
    let mut buf = [0u8; 64];
    let mut w = Writer::new(&mut buf);
    Npdu::new(0).encode(&mut w).unwrap();
    WritePropertyRequest {
        object_id: ObjectId::new(ObjectType::AnalogValue, 0),
        property_id: PropertyId::PresentValue,
        value: DataValue::Real(55.5),
        array_index: None,
        priority: Some(8),
        invoke_id: 3,
    }
    .encode(&mut w)
    .unwrap();

    assert_eq!(
        w.as_written(),
        &[
            0x01, 0x00, 0x00, 0x05, 0x03, 0x0F, 0x0C, 0x00, 0x80, 0x00, 0x00, 0x19, 0x55, 0x3E,
            0x44, 0x42, 0x5E, 0x00, 0x00, 0x3F, 0x49, 0x08,
        ]
    );
}

#[test]
fn routed_npdu_frame_matches_fixture() {
    let mut buf = [0u8; 16];
    let mut w = Writer::new(&mut buf);
    Npdu::routed(NpduAddress::new(2001, &[0x0A]), true)
        .encode(&mut w)
        .unwrap();

    assert_eq!(
        w.as_written(),
        &[0x01, 0x24, 0x07, 0xD1, 0x01, 0x0A, 0xFF]
    );
}

#[test]
fn who_is_router_to_network_frame_matches_fixture() {
    use bacscope_core::network::NetworkMessage;

    let mut buf = [0u8; 16];
    let mut w = Writer::new(&mut buf);
    let msg = NetworkMessage::WhoIsRouterToNetwork(Some(5));
    Npdu::network_message(msg.message_type())
        .encode(&mut w)
        .unwrap();
    msg.encode(&mut w).unwrap();

    assert_eq!(w.as_written(), &[0x01, 0x80, 0x00, 0x00, 0x05]);
}

#[cfg(feature = "alloc")]
#[test]
fn cov_notification_fixture_decodes_expected() {
    use bacscope_core::apdu::UnconfirmedRequestHeader;
    use bacscope_core::services::cov_notification::{
        CovNotificationRequest, SERVICE_UNCONFIRMED_COV_NOTIFICATION,
    };

    let fixture = [
        0x10, 0x02, // unconfirmed COV
        0x09, 0x11, // [0] process id 17
        0x1C, 0x02, 0x00, 0x00, 0x01, // [1] initiating device: device,1
        0x2C, 0x00, 0x00, 0x00, 0x01, // [2] monitored object: analog-input,1
        0x39, 0x3C, // [3] time remaining 60
        0x4E, // [4] opening listOfValues
        0x09, 0x55, // [0] present-value
        0x2E, // [2] opening value
        0x44, 0x42, 0x20, 0x00, 0x00, // real 40.0
        0x2F, // [2] closing value
        0x4F, // [4] closing listOfValues
    ];

    let mut r = Reader::new(&fixture);
    let header = UnconfirmedRequestHeader::decode(&mut r).unwrap();
    assert_eq!(header.service_choice, SERVICE_UNCONFIRMED_COV_NOTIFICATION);

    let cov = CovNotificationRequest::decode_after_header(&mut r).unwrap();
    assert_eq!(cov.subscriber_process_id, 17);
    assert_eq!(cov.values.len(), 1);
    assert_eq!(cov.values[0].property_id, PropertyId::PresentValue);
}
