//! Command surface.
//!
//! Decodes method calls coming from the embedding application, forwards them
//! to [`BluetoothService`] and encodes the reply as JSON. Every reply is
//! either `null` (acknowledged) or, for `isBluetoothAvailable`, a boolean;
//! values and negotiated MTUs travel as events.

use super::error::{BridgeError, Result};
use super::service::BluetoothService;
use crate::domain::models::{DeviceId, NotifyMode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// One call from the application: method name plus JSON arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: &str, arguments: Value) -> Self {
        Self {
            method: method.to_string(),
            arguments,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanArgs {
    #[serde(default)]
    advertised_services: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceArgs {
    device_id: DeviceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacteristicArgs {
    device_id: DeviceId,
    service: String,
    characteristic: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyArgs {
    #[serde(flatten)]
    target: CharacteristicArgs,
    ble_input_property: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteArgs {
    #[serde(flatten)]
    target: CharacteristicArgs,
    value: Vec<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MtuArgs {
    device_id: DeviceId,
    expected_mtu: u16,
}

fn decode<T: DeserializeOwned>(method: &str, arguments: &Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(arguments)
        .map_err(|e| BridgeError::InvalidArgument(format!("{}: {}", method, e)))
}

pub struct CommandDispatcher {
    service: Arc<BluetoothService>,
}

impl CommandDispatcher {
    pub fn new(service: Arc<BluetoothService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<BluetoothService> {
        &self.service
    }

    /// Execute a call. Characteristic operations return once the device has
    /// answered or the link is gone.
    pub async fn handle(&self, call: MethodCall) -> Result<Value> {
        debug!("{} {}", call.method, call.arguments);
        let result = self.dispatch(&call).await;
        if let Err(e) = &result {
            warn!("{} failed: {} ({})", call.method, e, e.code());
        }
        result
    }

    async fn dispatch(&self, call: &MethodCall) -> Result<Value> {
        let method = call.method.as_str();
        let arguments = &call.arguments;

        match method {
            "isBluetoothAvailable" => Ok(Value::Bool(self.service.is_available())),
            "startScan" => {
                let args: ScanArgs = decode(method, arguments)?;
                self.service
                    .start_scan(&args.advertised_services.unwrap_or_default());
                Ok(Value::Null)
            }
            "stopScan" => {
                self.service.stop_scan();
                Ok(Value::Null)
            }
            "connect" => {
                let args: DeviceArgs = decode(method, arguments)?;
                self.service.connect(&args.device_id)?;
                Ok(Value::Null)
            }
            "disconnect" => {
                let args: DeviceArgs = decode(method, arguments)?;
                self.service.disconnect(&args.device_id)?;
                Ok(Value::Null)
            }
            "discoverServices" => {
                let args: DeviceArgs = decode(method, arguments)?;
                self.service.discover_services(&args.device_id)?;
                Ok(Value::Null)
            }
            "setNotifiable" => {
                let args: NotifyArgs = decode(method, arguments)?;
                let mode = NotifyMode::from_property(&args.ble_input_property);
                let target = args.target;
                self.service
                    .set_notifiable(&target.device_id, &target.service, &target.characteristic, mode)
                    .await?;
                Ok(Value::Null)
            }
            "readValue" => {
                let target: CharacteristicArgs = decode(method, arguments)?;
                self.service
                    .read_value(&target.device_id, &target.service, &target.characteristic)
                    .await?;
                Ok(Value::Null)
            }
            "writeValue" => {
                let args: WriteArgs = decode(method, arguments)?;
                let target = args.target;
                self.service
                    .write_value(
                        &target.device_id,
                        &target.service,
                        &target.characteristic,
                        &args.value,
                    )
                    .await?;
                Ok(Value::Null)
            }
            "requestMtu" => {
                let args: MtuArgs = decode(method, arguments)?;
                self.service
                    .request_mtu(&args.device_id, args.expected_mtu)
                    .await?;
                Ok(Value::Null)
            }
            other => Err(BridgeError::NotImplemented(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppEvent;
    use crate::domain::settings::Settings;
    use crate::infrastructure::bluetooth::loopback::LoopbackPlatform;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn dispatcher() -> (CommandDispatcher, mpsc::UnboundedReceiver<AppEvent>) {
        let platform = LoopbackPlatform::new().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let service = BluetoothService::new(Arc::new(platform), tx, &Settings::default());
        (CommandDispatcher::new(Arc::new(service)), rx)
    }

    #[tokio::test]
    async fn test_availability_and_scan_acks() {
        let (dispatcher, _rx) = dispatcher();
        assert_eq!(
            dispatcher
                .handle(MethodCall::new("isBluetoothAvailable", Value::Null))
                .await,
            Ok(Value::Bool(true))
        );
        assert_eq!(
            dispatcher.handle(MethodCall::new("startScan", json!({}))).await,
            Ok(Value::Null)
        );
        assert!(dispatcher.service().is_scanning());
        assert_eq!(
            dispatcher.handle(MethodCall::new("stopScan", Value::Null)).await,
            Ok(Value::Null)
        );
    }

    #[tokio::test]
    async fn test_missing_fields_are_invalid() {
        let (dispatcher, _rx) = dispatcher();
        let result = dispatcher.handle(MethodCall::new("connect", json!({}))).await;
        assert!(matches!(result, Err(BridgeError::InvalidArgument(_))));

        let result = dispatcher
            .handle(MethodCall::new(
                "writeValue",
                json!({"deviceId": "AA:BB", "service": "180d", "characteristic": "2a37", "value": [1, 300]}),
            ))
            .await;
        assert_eq!(result.unwrap_err().code(), "IllegalArgument");

        let result = dispatcher
            .handle(MethodCall::new("requestMtu", json!({"deviceId": "AA:BB", "expectedMtu": -1})))
            .await;
        assert!(matches!(result, Err(BridgeError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_unknown_device_and_method() {
        let (dispatcher, _rx) = dispatcher();
        let result = dispatcher
            .handle(MethodCall::new(
                "readValue",
                json!({"deviceId": "AA:BB", "service": "180d", "characteristic": "2a37"}),
            ))
            .await;
        assert_eq!(result, Err(BridgeError::UnknownDevice(DeviceId::from("AA:BB"))));

        let result = dispatcher.handle(MethodCall::new("bond", Value::Null)).await;
        assert_eq!(result.unwrap_err().code(), "NotImplemented");
    }

    #[test]
    fn test_method_call_deserialize() {
        let call: MethodCall = serde_json::from_value(json!({
            "method": "setNotifiable",
            "arguments": {"deviceId": "AA:BB", "bleInputProperty": "indication"}
        }))
        .unwrap();
        assert_eq!(call.method, "setNotifiable");
        assert_eq!(call.arguments["bleInputProperty"], "indication");
    }
}
