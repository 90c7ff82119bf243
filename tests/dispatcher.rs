//! End-to-end method calls through the command surface.

mod common;

use common::{Harness, BATTERY, HEART_RATE, LEVEL, MEASUREMENT};
use gatt_bridge::domain::models::{AppEvent, DeviceId, StreamEvent};
use gatt_bridge::infrastructure::bluetooth::subscriptions::StreamName;
use gatt_bridge::infrastructure::bluetooth::{BridgeError, CommandDispatcher, MethodCall};
use serde_json::{json, Value};
use std::time::Duration;

fn call(method: &str, arguments: Value) -> MethodCall {
    MethodCall::new(method, arguments)
}

#[tokio::test(flavor = "multi_thread")]
async fn full_session_over_method_calls() {
    let mut h = Harness::new();
    let dispatcher = CommandDispatcher::new(h.service.clone());
    let device = json!({ "deviceId": "AA:BB" });

    assert_eq!(dispatcher.handle(call("connect", device.clone())).await, Ok(Value::Null));
    h.platform.settle().await;
    assert_eq!(
        dispatcher.handle(call("discoverServices", device.clone())).await,
        Ok(Value::Null)
    );
    h.platform.settle().await;

    let target = json!({
        "deviceId": "AA:BB",
        "service": HEART_RATE,
        "characteristic": MEASUREMENT,
    });
    let mut write = target.clone();
    write["value"] = json!([0x0A, 0x0B]);
    assert_eq!(dispatcher.handle(call("writeValue", write)).await, Ok(Value::Null));
    assert_eq!(dispatcher.handle(call("readValue", target.clone())).await, Ok(Value::Null));

    let mut notify = target.clone();
    notify["bleInputProperty"] = json!("indication");
    assert_eq!(dispatcher.handle(call("setNotifiable", notify)).await, Ok(Value::Null));

    assert_eq!(
        dispatcher
            .handle(call("requestMtu", json!({ "deviceId": "AA:BB", "expectedMtu": 100 })))
            .await,
        Ok(Value::Null)
    );
    assert_eq!(dispatcher.handle(call("disconnect", device.clone())).await, Ok(Value::Null));

    let events = h.drain_events();
    let encoded: Vec<Value> = events
        .iter()
        .map(|event| serde_json::to_value(event).unwrap())
        .collect();
    assert_eq!(encoded[0], json!({ "type": "connectionState", "deviceId": "AA:BB", "state": "connected" }));
    assert_eq!(encoded[1]["type"], "serviceDiscovered");
    assert_eq!(encoded[1]["characteristics"], json!([MEASUREMENT]));
    assert!(events.contains(&AppEvent::CharacteristicValue {
        device_id: DeviceId::from("AA:BB"),
        characteristic: MEASUREMENT.to_string(),
        value: vec![0x0A, 0x0B],
    }));
    assert!(events.contains(&AppEvent::MtuChanged { mtu: 100 }));
    assert_eq!(
        encoded.last(),
        Some(&json!({ "type": "connectionState", "deviceId": "AA:BB", "state": "disconnected" }))
    );

    let result = dispatcher.handle(call("readValue", target)).await;
    assert_eq!(result.unwrap_err().code(), "IllegalArgument");
}

#[tokio::test(flavor = "multi_thread")]
async fn disconnect_of_unknown_device_fails() {
    let h = Harness::new();
    let dispatcher = CommandDispatcher::new(h.service.clone());
    assert_eq!(
        dispatcher
            .handle(call("disconnect", json!({ "deviceId": "12:34" })))
            .await,
        Err(BridgeError::UnknownDevice(DeviceId::from("12:34")))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn filtered_scan_reports_matching_devices() {
    let h = Harness::new();
    let dispatcher = CommandDispatcher::new(h.service.clone());
    let mut results = h.service.subscribe(StreamName::ScanResult);

    assert_eq!(
        dispatcher
            .handle(call("startScan", json!({ "advertisedServices": [BATTERY] })))
            .await,
        Ok(Value::Null)
    );
    let event = tokio::time::timeout(Duration::from_secs(5), results.recv())
        .await
        .expect("no scan result")
        .unwrap();
    match event {
        StreamEvent::ScanResult(result) => {
            assert_eq!(result.device_id, DeviceId::from("EE:FF"));
            assert_eq!(result.name, "Battery");
            assert_eq!(result.manufacturer_data_head, vec![0x59, 0x00, 0xAB, 0xCD]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    h.platform.settle().await;
    assert!(results.try_recv().is_err());
    assert_eq!(dispatcher.handle(call("stopScan", Value::Null)).await, Ok(Value::Null));
    assert!(!h.service.is_scanning());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_write_maps_to_unavailable_code() {
    let h = Harness::new();
    let dispatcher = CommandDispatcher::new(h.service.clone());
    h.connect_and_discover("EE:FF").await;

    let result = dispatcher
        .handle(call(
            "writeValue",
            json!({
                "deviceId": "EE:FF",
                "service": BATTERY,
                "characteristic": LEVEL,
                "value": [1],
            }),
        ))
        .await;
    assert_eq!(result.unwrap_err().code(), "CharacteristicUnavailable");
}
