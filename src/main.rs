use anyhow::Context;
use gatt_bridge::domain::models::{AppEvent, StreamEvent};
use gatt_bridge::domain::settings::SettingsService;
use gatt_bridge::infrastructure::bluetooth::loopback::{
    CharacteristicProfile, LoopbackPlatform, PeripheralProfile, ServiceProfile,
};
use gatt_bridge::infrastructure::bluetooth::subscriptions::StreamName;
use gatt_bridge::infrastructure::bluetooth::{BluetoothService, CommandDispatcher, MethodCall};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One line on stdin: a method call plus an optional id echoed in the reply.
#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    #[serde(flatten)]
    call: MethodCall,
}

fn demo_platform() -> anyhow::Result<LoopbackPlatform> {
    let platform = LoopbackPlatform::new().context("Failed to start loopback platform")?;
    platform.add_peripheral(
        PeripheralProfile::new("AA:BB:CC:DD:EE:01")
            .named("Heart Rate Monitor")
            .rssi(-52)
            .manufacturer(0x0059, &[0x01, 0x02])
            .service(
                ServiceProfile::new("0000180d-0000-1000-8000-00805f9b34fb")
                    .characteristic(
                        CharacteristicProfile::new("00002a37-0000-1000-8000-00805f9b34fb")
                            .with_value(&[0x06, 0x48])
                            .read_only(),
                    )
                    .characteristic(
                        CharacteristicProfile::new("00002a39-0000-1000-8000-00805f9b34fb")
                            .without_read()
                            .without_notify(),
                    ),
            ),
    );
    platform.add_peripheral(
        PeripheralProfile::new("AA:BB:CC:DD:EE:02")
            .named("Battery Sensor")
            .rssi(-77)
            .max_mtu(185)
            .service(
                ServiceProfile::new("0000180f-0000-1000-8000-00805f9b34fb").characteristic(
                    CharacteristicProfile::new("00002a19-0000-1000-8000-00805f9b34fb")
                        .with_value(&[0x5f]),
                ),
            ),
    );
    Ok(platform)
}

fn print_line(value: Value) {
    println!("{}", value);
}

fn stream_json(event: StreamEvent) -> Value {
    match event {
        StreamEvent::AvailabilityChanged(state) => {
            json!({ "stream": StreamName::AvailabilityChange.as_str(), "value": state.code() })
        }
        StreamEvent::ScanResult(result) => {
            json!({ "stream": StreamName::ScanResult.as_str(), "value": result })
        }
    }
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<AppEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_value(&event) {
            Ok(value) => print_line(json!({ "event": value })),
            Err(e) => warn!("Failed to encode event: {}", e),
        }
    }
}

async fn forward_stream(mut stream: mpsc::UnboundedReceiver<StreamEvent>) {
    while let Some(event) = stream.recv().await {
        print_line(stream_json(event));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = match std::env::args().nth(1) {
        Some(path) => SettingsService::from_path(PathBuf::from(path)),
        None => SettingsService::new()?,
    };

    let _logging_guard =
        gatt_bridge::infrastructure::logging::init_logger(&settings_service.get().log_settings)
            .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
            .ok();

    info!(
        "Starting GATT bridge (settings: {})",
        settings_service.path().display()
    );

    let platform = demo_platform()?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let service = Arc::new(BluetoothService::new(
        Arc::new(platform),
        event_tx,
        settings_service.get(),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(service.clone()));

    tokio::spawn(forward_events(event_rx));
    tokio::spawn(forward_stream(service.subscribe(StreamName::AvailabilityChange)));
    tokio::spawn(forward_stream(service.subscribe(StreamName::ScanResult)));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Malformed request: {}", e);
                print_line(json!({
                    "error": { "code": "IllegalArgument", "message": e.to_string() }
                }));
                continue;
            }
        };

        // Operations wait for the device, so each call runs on its own task
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let reply = match dispatcher.handle(request.call).await {
                Ok(result) => json!({ "id": request.id, "result": result }),
                Err(e) => json!({
                    "id": request.id,
                    "error": { "code": e.code(), "message": e.to_string() }
                }),
            };
            print_line(reply);
        });
    }

    info!("Input closed, shutting down");
    service.shutdown();
    Ok(())
}
