//! Platform Stack Boundary
//!
//! The native BLE stack is callback driven: commands are submitted and return
//! at once, and their outcome arrives later through one of the callback
//! traits below, on a delivery context owned by the platform.
//!
//! Implementations must not invoke a callback synchronously from inside a
//! command submission, and must not deliver anything through a connection's
//! callback once [`GattConnection::close`] has returned. Callbacks are routed
//! by device id only, so a late event from a closed handle would land on the
//! device's next session.

use super::error::PlatformError;
use super::protocol::GattStatus;
use crate::domain::models::{AvailabilityState, DeviceId, LinkState, NotifyMode};
use std::sync::Arc;

/// A service reported by a discovery pass, with its characteristics in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: String,
    pub characteristics: Vec<String>,
}

/// Raw advertisement as seen by the platform scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub device_id: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    /// First manufacturer-specific entry: company id and payload.
    pub manufacturer_data: Option<(u16, Vec<u8>)>,
    pub service_uuids: Vec<String>,
}

/// Adapter-level operations.
pub trait BlePlatform: Send + Sync {
    fn availability(&self) -> AvailabilityState;

    fn is_enabled(&self) -> bool {
        self.availability() == AvailabilityState::PoweredOn
    }

    /// Register the receiver of adapter state changes, replacing any prior one.
    fn set_adapter_callback(&self, callback: Arc<dyn AdapterCallback>);

    /// Start scanning. An empty filter list reports every advertisement.
    fn start_scan(
        &self,
        service_filters: &[String],
        callback: Arc<dyn ScanCallback>,
    ) -> Result<(), PlatformError>;

    fn stop_scan(&self);

    /// Open a GATT connection. Progress is reported through `callback`.
    fn connect(
        &self,
        device_id: &DeviceId,
        callback: Arc<dyn GattCallback>,
    ) -> Result<Box<dyn GattConnection>, PlatformError>;
}

/// Handle to one platform connection. Owned by exactly one device session.
pub trait GattConnection: Send {
    fn discover_services(&mut self) -> Result<(), PlatformError>;

    fn read_characteristic(
        &mut self,
        service: &str,
        characteristic: &str,
    ) -> Result<(), PlatformError>;

    fn write_characteristic(
        &mut self,
        service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), PlatformError>;

    /// Write the client characteristic configuration descriptor for `mode`.
    fn set_notifiable(
        &mut self,
        service: &str,
        characteristic: &str,
        mode: NotifyMode,
    ) -> Result<(), PlatformError>;

    fn request_mtu(&mut self, mtu: u16) -> Result<(), PlatformError>;

    fn disconnect(&mut self) -> Result<(), PlatformError>;

    /// Release the connection. Callbacks still queued for this handle are
    /// discarded; none may be delivered after this returns.
    fn close(&mut self) -> Result<(), PlatformError>;
}

/// Per-connection completion callbacks.
pub trait GattCallback: Send + Sync {
    fn on_connection_state_change(&self, device_id: &DeviceId, status: GattStatus, state: LinkState);

    fn on_services_discovered(
        &self,
        device_id: &DeviceId,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    );

    fn on_mtu_changed(&self, device_id: &DeviceId, mtu: u16, status: GattStatus);

    fn on_characteristic_read(
        &self,
        device_id: &DeviceId,
        characteristic: &str,
        value: Vec<u8>,
        status: GattStatus,
    );

    fn on_characteristic_write(&self, device_id: &DeviceId, characteristic: &str, status: GattStatus);

    /// Unsolicited notification or indication.
    fn on_characteristic_changed(&self, device_id: &DeviceId, characteristic: &str, value: Vec<u8>);

    fn on_descriptor_write(
        &self,
        device_id: &DeviceId,
        characteristic: &str,
        descriptor: &str,
        status: GattStatus,
    );
}

pub trait ScanCallback: Send + Sync {
    fn on_scan_result(&self, record: ScanRecord);

    fn on_scan_failed(&self, error_code: i32);
}

pub trait AdapterCallback: Send + Sync {
    fn on_availability_changed(&self, state: AvailabilityState);
}
