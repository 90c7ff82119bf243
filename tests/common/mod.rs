//! Shared fixtures for the scenario tests.
#![allow(dead_code)]

use gatt_bridge::domain::models::{AppEvent, DeviceId, LinkState};
use gatt_bridge::domain::settings::Settings;
use gatt_bridge::infrastructure::bluetooth::loopback::{
    CharacteristicProfile, LoopbackPlatform, PeripheralProfile, ServiceProfile,
};
use gatt_bridge::infrastructure::bluetooth::BluetoothService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const HEART_RATE: &str = "180D";
pub const MEASUREMENT: &str = "2A37";
pub const BATTERY: &str = "180F";
pub const LEVEL: &str = "2A19";
pub const STATUS: &str = "2A1A";

pub fn heart_rate_monitor(device_id: &str) -> PeripheralProfile {
    PeripheralProfile::new(device_id).named("HRM").service(
        ServiceProfile::new(HEART_RATE)
            .characteristic(CharacteristicProfile::new(MEASUREMENT).with_value(&[0x06, 0x48])),
    )
}

pub fn battery_sensor(device_id: &str) -> PeripheralProfile {
    PeripheralProfile::new(device_id)
        .named("Battery")
        .manufacturer(0x0059, &[0xAB, 0xCD])
        .max_mtu(185)
        .service(
            ServiceProfile::new(BATTERY)
                .characteristic(CharacteristicProfile::new(LEVEL).with_value(&[0x5f]).read_only())
                .characteristic(CharacteristicProfile::new(STATUS).without_read().without_notify()),
        )
}

pub struct Harness {
    pub platform: LoopbackPlatform,
    pub service: Arc<BluetoothService>,
    pub events: mpsc::UnboundedReceiver<AppEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let platform = LoopbackPlatform::new().unwrap();
        platform.add_peripheral(heart_rate_monitor("AA:BB"));
        platform.add_peripheral(heart_rate_monitor("CC:DD"));
        platform.add_peripheral(battery_sensor("EE:FF"));

        let (tx, events) = mpsc::unbounded_channel();
        let service = Arc::new(BluetoothService::new(
            Arc::new(platform.clone()),
            tx,
            &settings,
        ));
        Self {
            platform,
            service,
            events,
        }
    }

    pub async fn connect(&self, device_id: &str) -> DeviceId {
        let id = DeviceId::from(device_id);
        self.service.connect(&id).unwrap();
        self.platform.settle().await;
        id
    }

    pub async fn connect_and_discover(&self, device_id: &str) -> DeviceId {
        let id = self.connect(device_id).await;
        self.service.discover_services(&id).unwrap();
        self.platform.settle().await;
        id
    }

    pub fn drain_events(&mut self) -> Vec<AppEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }

    pub fn link_states(&mut self) -> Vec<LinkState> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                AppEvent::ConnectionState { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    /// Wait until an operation is outstanding on the device.
    pub async fn wait_pending(&self, device_id: &DeviceId) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.service.pending_operation(device_id).is_none() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("operation never became pending");
    }
}
