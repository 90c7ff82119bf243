//! BLE central bridge.
//!
//! Exposes a callback-driven Bluetooth Low Energy stack as awaitable GATT
//! operations: at most one operation is outstanding per device, every waiter
//! is resolved by its completion callback or by the teardown of its link.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{AppEvent, DeviceId, StreamEvent};
pub use domain::settings::{Settings, SettingsService};
pub use infrastructure::bluetooth::{
    BluetoothService, BridgeError, CommandDispatcher, MethodCall, PlatformError,
};
