use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform address of a peripheral, e.g. `"AA:BB:CC:DD:EE:FF"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Lifecycle of a device session.
///
/// A session only lives in the registry while it is `Connecting`, `Connected`
/// or `Disconnecting`. `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Link state reported by the platform and forwarded to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Adapter availability, with the integer codes sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AvailabilityState {
    Unknown = 0,
    Resetting = 1,
    Unsupported = 2,
    Unauthorized = 3,
    PoweredOff = 4,
    PoweredOn = 5,
}

impl AvailabilityState {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// The four GATT operations that go through the serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Notify,
    Read,
    Write,
    RequestMtu,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Notify => "notify",
            Self::Read => "read",
            Self::Write => "write",
            Self::RequestMtu => "request-mtu",
        };
        f.write_str(name)
    }
}

/// Client characteristic configuration requested by `setNotifiable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    Notification,
    Indication,
    Disable,
}

impl NotifyMode {
    /// Parse the wire property name. Anything unrecognised disables updates.
    pub fn from_property(property: &str) -> Self {
        match property {
            "notification" => Self::Notification,
            "indication" => Self::Indication,
            _ => Self::Disable,
        }
    }

    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::Disable)
    }
}

/// A single advertisement seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub name: String,
    pub device_id: DeviceId,
    /// Little-endian company id followed by its payload, or empty.
    pub manufacturer_data_head: Vec<u8>,
    pub rssi: i16,
}

/// Per-device notifications delivered to the embedding application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AppEvent {
    ConnectionState {
        device_id: DeviceId,
        state: LinkState,
    },
    ServiceDiscovered {
        device_id: DeviceId,
        service: String,
        characteristics: Vec<String>,
    },
    MtuChanged {
        mtu: u16,
    },
    CharacteristicValue {
        device_id: DeviceId,
        characteristic: String,
        value: Vec<u8>,
    },
}

/// Events published on the broadcast streams (availability, scan results).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    AvailabilityChanged(AvailabilityState),
    ScanResult(ScanResult),
}
