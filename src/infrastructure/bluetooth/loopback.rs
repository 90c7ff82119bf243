//! Loopback Platform
//!
//! In-memory BLE stack with simulated peripherals. Commands are accepted
//! synchronously and every callback is delivered later on a dedicated
//! delivery thread, like a native stack would.
//!
//! The delivery thread is a plain OS thread fed by a std channel: it stands
//! in for the native stack's own callback context, which runs independently
//! of any tokio runtime.
//!
//! Written values are stored and returned by subsequent reads. A peripheral
//! can be made unresponsive (completion callbacks are swallowed) or have its
//! link dropped, which exercises the teardown paths.

use super::error::PlatformError;
use super::platform::{
    AdapterCallback, BlePlatform, DiscoveredService, GattCallback, GattConnection, ScanCallback,
    ScanRecord,
};
use super::protocol::{self, GattStatus};
use crate::domain::models::{AvailabilityState, DeviceId, LinkState, NotifyMode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, trace};

type Job = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
pub struct CharacteristicProfile {
    pub uuid: String,
    pub readable: bool,
    pub writable: bool,
    pub notifiable: bool,
    pub value: Vec<u8>,
}

impl CharacteristicProfile {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            readable: true,
            writable: true,
            notifiable: true,
            value: Vec::new(),
        }
    }

    pub fn with_value(mut self, value: &[u8]) -> Self {
        self.value = value.to_vec();
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn without_read(mut self) -> Self {
        self.readable = false;
        self
    }

    pub fn without_notify(mut self) -> Self {
        self.notifiable = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServiceProfile {
    pub uuid: String,
    pub characteristics: Vec<CharacteristicProfile>,
}

impl ServiceProfile {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            characteristics: Vec::new(),
        }
    }

    pub fn characteristic(mut self, characteristic: CharacteristicProfile) -> Self {
        self.characteristics.push(characteristic);
        self
    }
}

#[derive(Debug, Clone)]
pub struct PeripheralProfile {
    pub device_id: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    pub manufacturer_data: Option<(u16, Vec<u8>)>,
    pub services: Vec<ServiceProfile>,
    pub max_mtu: u16,
    pub connectable: bool,
}

impl PeripheralProfile {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: DeviceId::from(device_id),
            name: None,
            rssi: -60,
            manufacturer_data: None,
            services: Vec::new(),
            max_mtu: 247,
            connectable: true,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn manufacturer(mut self, company_id: u16, payload: &[u8]) -> Self {
        self.manufacturer_data = Some((company_id, payload.to_vec()));
        self
    }

    pub fn service(mut self, service: ServiceProfile) -> Self {
        self.services.push(service);
        self
    }

    pub fn max_mtu(mut self, mtu: u16) -> Self {
        self.max_mtu = mtu;
        self
    }

    /// Connection attempts fail with a connection-state error.
    pub fn unreachable(mut self) -> Self {
        self.connectable = false;
        self
    }
}

struct Peripheral {
    profile: PeripheralProfile,
    responsive: bool,
    completion_status: GattStatus,
    discovery_status: GattStatus,
    cccd_writes: Vec<(String, Vec<u8>)>,
    notifying: HashMap<String, NotifyMode>,
}

impl Peripheral {
    fn new(profile: PeripheralProfile) -> Self {
        Self {
            profile,
            responsive: true,
            completion_status: protocol::GATT_SUCCESS,
            discovery_status: protocol::GATT_SUCCESS,
            cccd_writes: Vec::new(),
            notifying: HashMap::new(),
        }
    }

    fn characteristic_mut(
        &mut self,
        service: &str,
        characteristic: &str,
    ) -> Result<&mut CharacteristicProfile, PlatformError> {
        self.profile
            .services
            .iter_mut()
            .find(|s| protocol::uuid_eq(&s.uuid, service))
            .and_then(|s| {
                s.characteristics
                    .iter_mut()
                    .find(|c| protocol::uuid_eq(&c.uuid, characteristic))
            })
            .ok_or_else(|| PlatformError::CharacteristicUnavailable(characteristic.to_string()))
    }

    fn advertises(&self, filters: &[String]) -> bool {
        filters.is_empty()
            || self.profile.services.iter().any(|service| {
                filters
                    .iter()
                    .any(|filter| protocol::uuid_eq(filter, &service.uuid))
            })
    }

    fn scan_record(&self) -> ScanRecord {
        ScanRecord {
            device_id: self.profile.device_id.clone(),
            name: self.profile.name.clone(),
            rssi: self.profile.rssi,
            manufacturer_data: self.profile.manufacturer_data.clone(),
            service_uuids: self.profile.services.iter().map(|s| s.uuid.clone()).collect(),
        }
    }
}

struct Link {
    device_id: DeviceId,
    callback: Arc<dyn GattCallback>,
    connected: bool,
}

struct World {
    availability: AvailabilityState,
    adapter_callback: Option<Arc<dyn AdapterCallback>>,
    scan_callback: Option<Arc<dyn ScanCallback>>,
    peripherals: HashMap<DeviceId, Peripheral>,
    links: HashMap<u64, Link>,
    next_link: u64,
}

struct Inner {
    world: Mutex<World>,
    jobs: Mutex<std_mpsc::Sender<Job>>,
}

impl Inner {
    fn enqueue(&self, job: Job) {
        if self.jobs.lock().send(job).is_err() {
            debug!("Loopback delivery thread is gone");
        }
    }

    /// Queue a GATT callback for a link. It is skipped if the link has been
    /// closed by the time it runs.
    fn deliver<F>(self: &Arc<Self>, link_id: u64, f: F)
    where
        F: FnOnce(&dyn GattCallback, &DeviceId) + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.enqueue(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let target = inner
                .world
                .lock()
                .links
                .get(&link_id)
                .map(|link| (link.callback.clone(), link.device_id.clone()));
            match target {
                Some((callback, device_id)) => f(callback.as_ref(), &device_id),
                None => trace!("Link {} closed, callback suppressed", link_id),
            }
        }));
    }

    fn links_of(world: &World, device_id: &DeviceId) -> Vec<u64> {
        world
            .links
            .iter()
            .filter(|(_, link)| &link.device_id == device_id)
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Simulated BLE adapter.
#[derive(Clone)]
pub struct LoopbackPlatform {
    inner: Arc<Inner>,
}

impl LoopbackPlatform {
    /// Create a powered-on adapter with no peripherals.
    pub fn new() -> io::Result<Self> {
        let (tx, rx) = std_mpsc::channel::<Job>();
        thread::Builder::new()
            .name("loopback-gatt".to_string())
            .spawn(move || {
                for job in rx {
                    job();
                }
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                world: Mutex::new(World {
                    availability: AvailabilityState::PoweredOn,
                    adapter_callback: None,
                    scan_callback: None,
                    peripherals: HashMap::new(),
                    links: HashMap::new(),
                    next_link: 0,
                }),
                jobs: Mutex::new(tx),
            }),
        })
    }

    pub fn add_peripheral(&self, profile: PeripheralProfile) {
        let device_id = profile.device_id.clone();
        self.inner
            .world
            .lock()
            .peripherals
            .insert(device_id, Peripheral::new(profile));
    }

    /// When unresponsive, reads, writes, descriptor writes, MTU requests and
    /// discoveries are accepted but never answered.
    pub fn set_responsive(&self, device_id: &DeviceId, responsive: bool) {
        if let Some(p) = self.inner.world.lock().peripherals.get_mut(device_id) {
            p.responsive = responsive;
        }
    }

    /// Status reported by read, write and descriptor-write completions.
    pub fn set_completion_status(&self, device_id: &DeviceId, status: GattStatus) {
        if let Some(p) = self.inner.world.lock().peripherals.get_mut(device_id) {
            p.completion_status = status;
        }
    }

    pub fn set_discovery_status(&self, device_id: &DeviceId, status: GattStatus) {
        if let Some(p) = self.inner.world.lock().peripherals.get_mut(device_id) {
            p.discovery_status = status;
        }
    }

    /// Drop every link to a device as if it went out of range.
    pub fn drop_link(&self, device_id: &DeviceId) -> bool {
        let links = {
            let mut world = self.inner.world.lock();
            let links = Inner::links_of(&world, device_id);
            for link_id in &links {
                if let Some(link) = world.links.get_mut(link_id) {
                    link.connected = false;
                }
            }
            links
        };
        for link_id in &links {
            self.inner.deliver(*link_id, |callback, device_id| {
                callback.on_connection_state_change(
                    device_id,
                    protocol::GATT_ERROR,
                    LinkState::Disconnected,
                )
            });
        }
        !links.is_empty()
    }

    /// Push a value change. Only delivered when notifications or indications
    /// are enabled on the characteristic.
    pub fn notify(&self, device_id: &DeviceId, characteristic: &str, value: &[u8]) -> bool {
        let (links, uuid) = {
            let world = self.inner.world.lock();
            let Some(p) = world.peripherals.get(device_id) else {
                return false;
            };
            let Some((uuid, _)) = p
                .notifying
                .iter()
                .find(|(uuid, mode)| protocol::uuid_eq(uuid, characteristic) && mode.is_enabled())
            else {
                return false;
            };
            let links: Vec<u64> = Inner::links_of(&world, device_id)
                .into_iter()
                .filter(|id| world.links.get(id).map(|l| l.connected).unwrap_or(false))
                .collect();
            (links, uuid.clone())
        };
        for link_id in &links {
            let uuid = uuid.clone();
            let value = value.to_vec();
            self.inner.deliver(*link_id, move |callback, device_id| {
                callback.on_characteristic_changed(device_id, &uuid, value)
            });
        }
        !links.is_empty()
    }

    pub fn set_availability(&self, state: AvailabilityState) {
        let callback = {
            let mut world = self.inner.world.lock();
            world.availability = state;
            world.adapter_callback.clone()
        };
        if let Some(callback) = callback {
            self.inner
                .enqueue(Box::new(move || callback.on_availability_changed(state)));
        }
    }

    /// Every CCCD payload written to the device, in order.
    pub fn cccd_writes(&self, device_id: &DeviceId) -> Vec<(String, Vec<u8>)> {
        self.inner
            .world
            .lock()
            .peripherals
            .get(device_id)
            .map(|p| p.cccd_writes.clone())
            .unwrap_or_default()
    }

    pub fn characteristic_value(
        &self,
        device_id: &DeviceId,
        service: &str,
        characteristic: &str,
    ) -> Option<Vec<u8>> {
        self.inner
            .world
            .lock()
            .peripherals
            .get_mut(device_id)?
            .characteristic_mut(service, characteristic)
            .ok()
            .map(|c| c.value.clone())
    }

    /// Number of platform handles to the device that have not been closed.
    pub fn open_links(&self, device_id: &DeviceId) -> usize {
        Inner::links_of(&self.inner.world.lock(), device_id).len()
    }

    /// Wait until every callback queued so far has been delivered.
    pub async fn settle(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.inner.enqueue(Box::new(move || {
            let _ = tx.send(());
        }));
        let _ = rx.await;
    }
}

impl BlePlatform for LoopbackPlatform {
    fn availability(&self) -> AvailabilityState {
        self.inner.world.lock().availability
    }

    fn set_adapter_callback(&self, callback: Arc<dyn AdapterCallback>) {
        self.inner.world.lock().adapter_callback = Some(callback);
    }

    fn start_scan(
        &self,
        service_filters: &[String],
        callback: Arc<dyn ScanCallback>,
    ) -> Result<(), PlatformError> {
        let records: Vec<ScanRecord> = {
            let mut world = self.inner.world.lock();
            if world.availability != AvailabilityState::PoweredOn {
                return Err(PlatformError::AdapterUnavailable);
            }
            world.scan_callback = Some(callback.clone());
            world
                .peripherals
                .values()
                .filter(|p| p.advertises(service_filters))
                .map(Peripheral::scan_record)
                .collect()
        };

        let weak = Arc::downgrade(&self.inner);
        self.inner.enqueue(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            // Stopped before the advertisements came in
            let active = inner
                .world
                .lock()
                .scan_callback
                .as_ref()
                .map(|current| Arc::ptr_eq(current, &callback))
                .unwrap_or(false);
            if active {
                for record in records {
                    callback.on_scan_result(record);
                }
            }
        }));
        Ok(())
    }

    fn stop_scan(&self) {
        self.inner.world.lock().scan_callback = None;
    }

    fn connect(
        &self,
        device_id: &DeviceId,
        callback: Arc<dyn GattCallback>,
    ) -> Result<Box<dyn GattConnection>, PlatformError> {
        let link_id = {
            let mut world = self.inner.world.lock();
            if world.availability != AvailabilityState::PoweredOn {
                return Err(PlatformError::AdapterUnavailable);
            }
            world.next_link += 1;
            let link_id = world.next_link;
            world.links.insert(
                link_id,
                Link {
                    device_id: device_id.clone(),
                    callback,
                    connected: false,
                },
            );
            link_id
        };

        let weak = Arc::downgrade(&self.inner);
        self.inner.enqueue(Box::new(move || {
            let Some(inner) = weak.upgrade() else { return };
            let outcome = {
                let mut world = inner.world.lock();
                let reachable = world
                    .links
                    .get(&link_id)
                    .and_then(|link| world.peripherals.get(&link.device_id))
                    .map(|p| p.profile.connectable)
                    .unwrap_or(false);
                world.links.get_mut(&link_id).map(|link| {
                    link.connected = reachable;
                    (link.callback.clone(), link.device_id.clone(), reachable)
                })
            };
            match outcome {
                Some((callback, device_id, true)) => callback.on_connection_state_change(
                    &device_id,
                    protocol::GATT_SUCCESS,
                    LinkState::Connected,
                ),
                Some((callback, device_id, false)) => callback.on_connection_state_change(
                    &device_id,
                    protocol::GATT_ERROR,
                    LinkState::Disconnected,
                ),
                None => trace!("Link {} closed before connecting", link_id),
            }
        }));

        debug!("Loopback link {} opened to {}", link_id, device_id);
        Ok(Box::new(LoopbackConnection {
            inner: self.inner.clone(),
            link_id,
            device_id: device_id.clone(),
            closed: false,
        }))
    }
}

/// Platform handle for one loopback link.
pub struct LoopbackConnection {
    inner: Arc<Inner>,
    link_id: u64,
    device_id: DeviceId,
    closed: bool,
}

impl LoopbackConnection {
    fn with_peripheral<R>(
        &self,
        f: impl FnOnce(&mut Peripheral) -> Result<R, PlatformError>,
    ) -> Result<R, PlatformError> {
        if self.closed {
            return Err(PlatformError::Closed);
        }
        let mut world = self.inner.world.lock();
        let connected = world
            .links
            .get(&self.link_id)
            .map(|link| link.connected)
            .unwrap_or(false);
        if !connected {
            return Err(PlatformError::NotConnected);
        }
        let peripheral = world
            .peripherals
            .get_mut(&self.device_id)
            .ok_or(PlatformError::NotConnected)?;
        f(peripheral)
    }
}

impl GattConnection for LoopbackConnection {
    fn discover_services(&mut self) -> Result<(), PlatformError> {
        let (services, status, responsive) = self.with_peripheral(|p| {
            let services = p
                .profile
                .services
                .iter()
                .map(|s| DiscoveredService {
                    uuid: s.uuid.clone(),
                    characteristics: s.characteristics.iter().map(|c| c.uuid.clone()).collect(),
                })
                .collect::<Vec<_>>();
            Ok((services, p.discovery_status, p.responsive))
        })?;
        if responsive {
            self.inner.deliver(self.link_id, move |callback, device_id| {
                callback.on_services_discovered(device_id, status, services)
            });
        }
        Ok(())
    }

    fn read_characteristic(&mut self, service: &str, characteristic: &str) -> Result<(), PlatformError> {
        let (uuid, value, status, responsive) = self.with_peripheral(|p| {
            let (status, responsive) = (p.completion_status, p.responsive);
            let c = p.characteristic_mut(service, characteristic)?;
            if !c.readable {
                return Err(PlatformError::CharacteristicUnavailable(c.uuid.clone()));
            }
            Ok((c.uuid.clone(), c.value.clone(), status, responsive))
        })?;
        if responsive {
            self.inner.deliver(self.link_id, move |callback, device_id| {
                callback.on_characteristic_read(device_id, &uuid, value, status)
            });
        }
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        service: &str,
        characteristic: &str,
        value: &[u8],
    ) -> Result<(), PlatformError> {
        let (uuid, status, responsive) = self.with_peripheral(|p| {
            let (status, responsive) = (p.completion_status, p.responsive);
            let c = p.characteristic_mut(service, characteristic)?;
            if !c.writable {
                return Err(PlatformError::CharacteristicUnavailable(c.uuid.clone()));
            }
            c.value = value.to_vec();
            Ok((c.uuid.clone(), status, responsive))
        })?;
        if responsive {
            self.inner.deliver(self.link_id, move |callback, device_id| {
                callback.on_characteristic_write(device_id, &uuid, status)
            });
        }
        Ok(())
    }

    fn set_notifiable(
        &mut self,
        service: &str,
        characteristic: &str,
        mode: NotifyMode,
    ) -> Result<(), PlatformError> {
        let (uuid, status, responsive) = self.with_peripheral(|p| {
            let (status, responsive) = (p.completion_status, p.responsive);
            let c = p.characteristic_mut(service, characteristic)?;
            if !c.notifiable {
                return Err(PlatformError::CharacteristicUnavailable(c.uuid.clone()));
            }
            let uuid = c.uuid.clone();
            p.cccd_writes
                .push((uuid.clone(), protocol::descriptor_value(mode).to_vec()));
            p.notifying.insert(uuid.clone(), mode);
            Ok((uuid, status, responsive))
        })?;
        if responsive {
            self.inner.deliver(self.link_id, move |callback, device_id| {
                callback.on_descriptor_write(device_id, &uuid, protocol::CCCD_UUID, status)
            });
        }
        Ok(())
    }

    fn request_mtu(&mut self, mtu: u16) -> Result<(), PlatformError> {
        let (negotiated, responsive) = self.with_peripheral(|p| {
            let negotiated = mtu
                .min(p.profile.max_mtu)
                .min(protocol::MAX_ATT_MTU)
                .max(protocol::DEFAULT_ATT_MTU);
            Ok((negotiated, p.responsive))
        })?;
        if responsive {
            self.inner.deliver(self.link_id, move |callback, device_id| {
                callback.on_mtu_changed(device_id, negotiated, protocol::GATT_SUCCESS)
            });
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), PlatformError> {
        if self.closed {
            return Err(PlatformError::Closed);
        }
        let was_connected = match self.inner.world.lock().links.get_mut(&self.link_id) {
            Some(link) => std::mem::replace(&mut link.connected, false),
            None => false,
        };
        if was_connected {
            self.inner.deliver(self.link_id, |callback, device_id| {
                callback.on_connection_state_change(
                    device_id,
                    protocol::GATT_SUCCESS,
                    LinkState::Disconnected,
                )
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlatformError> {
        if self.closed {
            return Err(PlatformError::Closed);
        }
        self.closed = true;
        self.inner.world.lock().links.remove(&self.link_id);
        debug!("Loopback link {} to {} closed", self.link_id, self.device_id);
        Ok(())
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.inner.world.lock().links.remove(&self.link_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl GattCallback for Recorder {
        fn on_connection_state_change(&self, _: &DeviceId, status: GattStatus, state: LinkState) {
            self.calls.lock().push(format!("state {} {:?}", status, state));
        }
        fn on_services_discovered(&self, _: &DeviceId, _: GattStatus, services: Vec<DiscoveredService>) {
            self.calls.lock().push(format!("services {}", services.len()));
        }
        fn on_mtu_changed(&self, _: &DeviceId, mtu: u16, _: GattStatus) {
            self.calls.lock().push(format!("mtu {}", mtu));
        }
        fn on_characteristic_read(&self, _: &DeviceId, c: &str, value: Vec<u8>, _: GattStatus) {
            self.calls.lock().push(format!("read {} {:?}", c, value));
        }
        fn on_characteristic_write(&self, _: &DeviceId, c: &str, _: GattStatus) {
            self.calls.lock().push(format!("write {}", c));
        }
        fn on_characteristic_changed(&self, _: &DeviceId, c: &str, value: Vec<u8>) {
            self.calls.lock().push(format!("changed {} {:?}", c, value));
        }
        fn on_descriptor_write(&self, _: &DeviceId, c: &str, _: &str, _: GattStatus) {
            self.calls.lock().push(format!("descriptor {}", c));
        }
    }

    fn heart_rate_monitor() -> PeripheralProfile {
        PeripheralProfile::new("AA:BB").named("HRM").service(
            ServiceProfile::new("180d")
                .characteristic(CharacteristicProfile::new("2a37").with_value(&[0x06, 0x48]))
                .characteristic(CharacteristicProfile::new("2a38").read_only().without_notify()),
        )
    }

    #[tokio::test]
    async fn test_callbacks_arrive_in_submission_order() {
        let platform = LoopbackPlatform::new().unwrap();
        platform.add_peripheral(heart_rate_monitor());
        let recorder = Arc::new(Recorder::default());
        let id = DeviceId::from("AA:BB");

        let mut handle = platform.connect(&id, recorder.clone()).unwrap();
        platform.settle().await;
        handle.discover_services().unwrap();
        handle.write_characteristic("180D", "2A37", &[1, 2, 3]).unwrap();
        handle.read_characteristic("180d", "2a37").unwrap();
        handle.request_mtu(1000).unwrap();
        platform.settle().await;

        assert_eq!(
            *recorder.calls.lock(),
            vec![
                "state 0 Connected".to_string(),
                "services 1".to_string(),
                "write 2a37".to_string(),
                "read 2a37 [1, 2, 3]".to_string(),
                "mtu 247".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsupported_operations_are_rejected() {
        let platform = LoopbackPlatform::new().unwrap();
        platform.add_peripheral(heart_rate_monitor());
        let id = DeviceId::from("AA:BB");

        let mut handle = platform.connect(&id, Arc::new(Recorder::default())).unwrap();
        platform.settle().await;

        assert!(handle.write_characteristic("180d", "2a38", &[0]).is_err());
        assert!(handle
            .set_notifiable("180d", "2a38", NotifyMode::Notification)
            .is_err());
        assert!(handle.read_characteristic("180d", "2a99").is_err());

        assert!(platform.drop_link(&id));
        assert_eq!(
            handle.read_characteristic("180d", "2a37"),
            Err(PlatformError::NotConnected)
        );
    }

    /// Park the delivery thread until the returned sender is dropped.
    fn hold_delivery(platform: &LoopbackPlatform) -> std_mpsc::Sender<()> {
        let (tx, rx) = std_mpsc::channel::<()>();
        platform.inner.enqueue(Box::new(move || {
            let _ = rx.recv();
        }));
        tx
    }

    #[tokio::test]
    async fn test_closed_link_suppresses_callbacks() {
        let platform = LoopbackPlatform::new().unwrap();
        platform.add_peripheral(heart_rate_monitor());
        let recorder = Arc::new(Recorder::default());
        let id = DeviceId::from("AA:BB");

        let mut handle = platform.connect(&id, recorder.clone()).unwrap();
        platform.settle().await;

        let held = hold_delivery(&platform);
        handle.disconnect().unwrap();
        handle.close().unwrap();
        assert_eq!(handle.close(), Err(PlatformError::Closed));
        drop(held);
        platform.settle().await;

        assert_eq!(*recorder.calls.lock(), vec!["state 0 Connected".to_string()]);
        assert_eq!(platform.open_links(&id), 0);
    }

    #[tokio::test]
    async fn test_stale_link_never_reaches_new_link() {
        let platform = LoopbackPlatform::new().unwrap();
        platform.add_peripheral(heart_rate_monitor());
        let stale = Arc::new(Recorder::default());
        let fresh = Arc::new(Recorder::default());
        let id = DeviceId::from("AA:BB");

        let mut old = platform.connect(&id, stale.clone()).unwrap();
        platform.settle().await;

        let held = hold_delivery(&platform);
        assert!(platform.drop_link(&id));
        assert_eq!(old.request_mtu(100), Err(PlatformError::NotConnected));
        old.close().unwrap();
        let _new = platform.connect(&id, fresh.clone()).unwrap();
        drop(held);
        platform.settle().await;

        assert_eq!(*stale.calls.lock(), vec!["state 0 Connected".to_string()]);
        assert_eq!(*fresh.calls.lock(), vec!["state 0 Connected".to_string()]);
        assert_eq!(platform.open_links(&id), 1);
    }

    #[tokio::test]
    async fn test_notify_requires_subscription() {
        let platform = LoopbackPlatform::new().unwrap();
        platform.add_peripheral(heart_rate_monitor());
        let recorder = Arc::new(Recorder::default());
        let id = DeviceId::from("AA:BB");

        let mut handle = platform.connect(&id, recorder.clone()).unwrap();
        platform.settle().await;
        assert!(!platform.notify(&id, "2a37", &[9]));

        handle
            .set_notifiable("180d", "2a37", NotifyMode::Indication)
            .unwrap();
        assert!(platform.notify(&id, "2A37", &[9]));
        platform.settle().await;

        assert_eq!(
            platform.cccd_writes(&id),
            vec![("2a37".to_string(), vec![0x02, 0x00])]
        );
        assert!(recorder
            .calls
            .lock()
            .contains(&"changed 2a37 [9]".to_string()));
    }
}
