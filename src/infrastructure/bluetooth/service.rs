//! Bluetooth Service Module
//!
//! Main service that coordinates scanning, connections and GATT operations
//! for every device the application talks to.

use crate::domain::models::{
    AppEvent, AvailabilityState, ConnectionState, DeviceId, NotifyMode, OperationKind, StreamEvent,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::{
    connection::CompletionPayload,
    correlator::EventCorrelator,
    error::{BridgeError, Result},
    platform::BlePlatform,
    scanner::BleScanner,
    serializer::{OperationConfig, OperationSerializer},
    subscriptions::{AvailabilityRelay, StreamName, Subscriptions},
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    platform: Arc<dyn BlePlatform>,
    serializer: Arc<OperationSerializer>,
    correlator: Arc<EventCorrelator>,
    scanner: Mutex<BleScanner>,
    subscriptions: Arc<Subscriptions>,
}

impl BluetoothService {
    /// Create a new Bluetooth service on top of a platform stack
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        settings: &Settings,
    ) -> Self {
        let serializer = Arc::new(OperationSerializer::new(OperationConfig::from(settings)));
        let correlator = Arc::new(EventCorrelator::new(serializer.clone(), event_sender));
        let subscriptions = Arc::new(Subscriptions::new());

        platform.set_adapter_callback(Arc::new(AvailabilityRelay::new(subscriptions.clone())));

        Self {
            scanner: Mutex::new(BleScanner::new(platform.clone(), subscriptions.clone())),
            platform,
            serializer,
            correlator,
            subscriptions,
        }
    }

    /// Whether the adapter is powered on
    pub fn is_available(&self) -> bool {
        self.platform.is_enabled()
    }

    pub fn availability(&self) -> AvailabilityState {
        self.platform.availability()
    }

    /// Start listening on a broadcast stream, replacing any previous listener.
    ///
    /// The availability stream immediately receives the current state.
    pub fn subscribe(&self, name: StreamName) -> mpsc::UnboundedReceiver<StreamEvent> {
        let receiver = self.subscriptions.subscribe(name);
        if name == StreamName::AvailabilityChange {
            self.subscriptions.publish(
                name,
                StreamEvent::AvailabilityChanged(self.platform.availability()),
            );
        }
        receiver
    }

    pub fn unsubscribe(&self, name: StreamName) -> bool {
        self.subscriptions.unsubscribe(name)
    }

    /// Start scanning for devices
    pub fn start_scan(&self, service_filters: &[String]) {
        if let Err(e) = self.scanner.lock().start(service_filters) {
            warn!("Scan could not be started: {}", e);
        }
    }

    /// Stop scanning
    pub fn stop_scan(&self) {
        self.scanner.lock().stop();
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.lock().is_scanning()
    }

    /// Open a connection. Calling it again while the device is connecting or
    /// connected does nothing.
    ///
    /// The outcome arrives as a connection-state event.
    pub fn connect(&self, device_id: &DeviceId) -> Result<()> {
        let mut registry = self.serializer.registry();
        if registry.contains(device_id) {
            debug!("{}: already connecting or connected", device_id);
            return Ok(());
        }

        info!("Connecting to {}", device_id);
        let handle = self.platform.connect(device_id, self.correlator.clone())?;
        let mtu = self.serializer.config().default_mtu;
        if let Err(mut duplicate) = registry.add(device_id.clone(), handle, mtu) {
            // Unreachable while the registry lock is held, but never leak a handle
            let _ = duplicate.close();
        }
        Ok(())
    }

    /// Close a connection. Any pending operation fails with a dropped link.
    pub fn disconnect(&self, device_id: &DeviceId) -> Result<()> {
        match self.serializer.registry().lookup_mut(device_id) {
            Some(session) => session.set_state(ConnectionState::Disconnecting),
            None => return Err(BridgeError::UnknownDevice(device_id.clone())),
        }
        info!("Disconnecting from {}", device_id);
        self.correlator.drop_session(device_id);
        Ok(())
    }

    /// Start service discovery. Services arrive as events.
    pub fn discover_services(&self, device_id: &DeviceId) -> Result<()> {
        let mut registry = self.serializer.registry();
        let session = registry
            .lookup_mut(device_id)
            .ok_or_else(|| BridgeError::UnknownDevice(device_id.clone()))?;

        match session.handle_mut().map(|handle| handle.discover_services()) {
            Some(Ok(())) => debug!("{}: discovery started", device_id),
            Some(Err(e)) => warn!("{}: discovery not started: {}", device_id, e),
            None => warn!("{}: discovery requested without a handle", device_id),
        }
        Ok(())
    }

    /// Enable notifications or indications, or disable both. Returns once the
    /// descriptor write is confirmed.
    pub async fn set_notifiable(
        &self,
        device_id: &DeviceId,
        service: &str,
        characteristic: &str,
        mode: NotifyMode,
    ) -> Result<()> {
        self.serializer
            .execute_on_characteristic(
                device_id,
                OperationKind::Notify,
                service,
                characteristic,
                |handle, service, characteristic| handle.set_notifiable(service, characteristic, mode),
            )
            .await?;
        Ok(())
    }

    /// Read a characteristic. The value is also delivered as an event.
    pub async fn read_value(
        &self,
        device_id: &DeviceId,
        service: &str,
        characteristic: &str,
    ) -> Result<Vec<u8>> {
        let completion = self
            .serializer
            .execute_on_characteristic(
                device_id,
                OperationKind::Read,
                service,
                characteristic,
                |handle, service, characteristic| handle.read_characteristic(service, characteristic),
            )
            .await?;

        match completion.payload {
            CompletionPayload::Value(value) => Ok(value),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn write_value(
        &self,
        device_id: &DeviceId,
        service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<()> {
        self.serializer
            .execute_on_characteristic(
                device_id,
                OperationKind::Write,
                service,
                characteristic,
                |handle, service, characteristic| {
                    handle.write_characteristic(service, characteristic, value)
                },
            )
            .await?;
        Ok(())
    }

    /// Negotiate the ATT MTU and return the agreed value.
    pub async fn request_mtu(&self, device_id: &DeviceId, expected_mtu: u16) -> Result<u16> {
        let completion = self
            .serializer
            .execute_on_link(device_id, OperationKind::RequestMtu, |handle| {
                handle.request_mtu(expected_mtu)
            })
            .await?;

        match completion.payload {
            CompletionPayload::Mtu(mtu) => Ok(mtu),
            _ => Ok(self.mtu(device_id).unwrap_or(self.serializer.config().default_mtu)),
        }
    }

    pub fn session_state(&self, device_id: &DeviceId) -> Option<ConnectionState> {
        self.serializer
            .registry()
            .lookup(device_id)
            .map(|session| session.state())
    }

    /// Kind of the operation currently waiting on the device, if any.
    pub fn pending_operation(&self, device_id: &DeviceId) -> Option<OperationKind> {
        self.serializer
            .registry()
            .lookup(device_id)
            .and_then(|session| session.pending_kind())
    }

    pub fn mtu(&self, device_id: &DeviceId) -> Option<u16> {
        self.serializer
            .registry()
            .lookup(device_id)
            .map(|session| session.mtu())
    }

    /// Services recorded by discovery so far, in discovery order.
    pub fn discovered_services(&self, device_id: &DeviceId) -> Option<Vec<(String, Vec<String>)>> {
        self.serializer
            .registry()
            .lookup(device_id)
            .map(|session| session.services().to_vec())
    }

    pub fn connected_devices(&self) -> Vec<DeviceId> {
        let registry = self.serializer.registry();
        let mut devices: Vec<DeviceId> = registry
            .device_ids()
            .into_iter()
            .filter(|id| registry.lookup(id).map(|s| s.is_connected()).unwrap_or(false))
            .collect();
        devices.sort();
        devices
    }

    /// Stop scanning, tear down every session and drop all listeners.
    pub fn shutdown(&self) {
        self.stop_scan();
        let closed = self.correlator.drop_all_sessions();
        self.subscriptions.clear();
        info!("Bluetooth service shut down ({} sessions closed)", closed);
    }
}
