use bacscope_client::server::factory::ObjectConfig;
use bacscope_client::{
    Address, BacnetClient, ChannelDataLink, ChannelHub, ClientDataValue, CovCallback, LocalDeviceConfig,
};
use bacscope_core::types::{ObjectId, ObjectType, PropertyId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn client(hub: &Arc<ChannelHub>, addr: &str, device_id: u32) -> BacnetClient<ChannelDataLink> {
    let local = LocalDeviceConfig {
        device_id: Some(device_id),
        object_name: Some(format!("dev{device_id}")),
        ..LocalDeviceConfig::default()
    }
    .validate()
    .unwrap();
    BacnetClient::with_datalink(hub.endpoint(addr.parse().unwrap()).unwrap(), local)
        .with_response_timeout(Duration::from_millis(500))
        .with_discovery_wait(Duration::from_millis(200))
}

fn address(addr: &str) -> Address {
    Address::from(addr.parse::<SocketAddr>().unwrap())
}

fn close_to(value: &ClientDataValue, expected: f64) -> bool {
    value.as_f64().is_some_and(|v| (v - expected).abs() < 1e-3)
}

#[tokio::test]
async fn read_and_command_a_setpoint() {
    let _ = env_logger::builder().is_test(true).try_init();
    let hub = ChannelHub::new();
    let controller = client(&hub, "10.0.0.2:47808", 2001);
    controller
        .create_object(
            &ObjectConfig::new("analogValue", 1, "SP")
                .present_value(99.9)
                .commandable(90.0),
        )
        .unwrap();
    let operator = client(&hub, "10.0.0.1:47808", 3001);

    let value = operator.read("10.0.0.2:47808 analogValue 1 presentValue").await.unwrap();
    assert!(close_to(&value, 99.9), "{value}");

    operator.write("10.0.0.2:47808 analogValue 1 presentValue 11.2 - 8").await.unwrap();
    let value = operator.read("10.0.0.2:47808 analogValue 1 presentValue").await.unwrap();
    assert!(close_to(&value, 11.2), "{value}");

    operator.write("10.0.0.2:47808 analogValue 1 presentValue null - 8").await.unwrap();
    let value = operator.read("10.0.0.2:47808 analogValue 1 presentValue").await.unwrap();
    assert!(close_to(&value, 90.0), "{value}");

    let missing = operator.read("10.0.0.2:47808 analogValue 9 presentValue").await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn who_is_finds_every_controller_on_the_segment() {
    let hub = ChannelHub::new();
    let _controllers: Vec<_> = [(101, "10.0.0.11:47808"), (102, "10.0.0.12:47808"), (103, "10.0.0.13:47808")]
        .into_iter()
        .map(|(id, addr)| client(&hub, addr, id))
        .collect();
    let operator = client(&hub, "10.0.0.1:47808", 3001);

    let mut ids: Vec<u32> = operator
        .who_is(None)
        .await
        .unwrap()
        .into_iter()
        .map(|device| device.device_id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![101, 102, 103]);

    let ranged = operator.who_is(Some((102, 102))).await.unwrap();
    assert_eq!(ranged.len(), 1);
    assert_eq!(ranged[0].address, address("10.0.0.12:47808"));
    assert!(operator.who_is(Some((5, 1))).await.is_err());
}

#[tokio::test]
async fn cov_notifications_arrive_in_order() {
    let hub = ChannelHub::new();
    let controller = client(&hub, "10.0.0.2:47808", 2001);
    let temp = controller
        .create_object(&ObjectConfig::new("analogValue", 1, "ZN-T").present_value(20.0))
        .unwrap();
    let operator = client(&hub, "10.0.0.1:47808", 3001);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let callback = CovCallback::sync(move |property, value| {
        if property == PropertyId::PresentValue {
            let _ = tx.send(value);
        }
    });
    let subscription = operator
        .subscribe_cov(&address("10.0.0.2:47808"), temp, 300, false, callback)
        .await
        .unwrap();

    controller.set_local_value(temp, &ClientDataValue::Real(30.0)).await.unwrap();
    controller.set_local_value(temp, &ClientDataValue::Real(40.0)).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let value = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(value.as_f64().unwrap());
    }
    assert_eq!(seen, vec![20.0, 30.0, 40.0]);

    operator.cancel_cov(subscription).await.unwrap();
    controller.set_local_value(temp, &ClientDataValue::Real(50.0)).await.unwrap();
    let after_cancel = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(!matches!(after_cancel, Ok(Some(_))));
}

#[tokio::test]
async fn who_has_answers_by_name() {
    let hub = ChannelHub::new();
    let controller = client(&hub, "10.0.0.2:47808", 2001);
    let fan = controller
        .create_object(&ObjectConfig::new("binaryValue", 4, "FAN-CMD"))
        .unwrap();
    let operator = client(&hub, "10.0.0.1:47808", 3001);

    let found = operator
        .who_has_object_name("FAN-CMD", &bacscope_client::BroadcastScope::Global)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].object_id, fan);
    assert_eq!(found[0].device_id, ObjectId::new(ObjectType::Device, 2001));
}
