//! Event Correlator
//!
//! Single entry point for GATT callbacks. Each callback is routed to its
//! device session, turned into an [`AppEvent`] where the application cares,
//! and used to resolve the matching pending operation.
//!
//! Callbacks run on the platform's delivery context and only take the
//! registry lock briefly; they never wait on a caller.

use super::connection::{Completion, CompletionPayload};
use super::platform::{DiscoveredService, GattCallback};
use super::protocol::{self, GattStatus};
use super::serializer::OperationSerializer;
use crate::domain::models::{AppEvent, ConnectionState, DeviceId, LinkState, OperationKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

pub struct EventCorrelator {
    serializer: Arc<OperationSerializer>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl EventCorrelator {
    pub fn new(
        serializer: Arc<OperationSerializer>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            serializer,
            event_sender,
        }
    }

    fn emit(&self, event: AppEvent) {
        if self.event_sender.send(event).is_err() {
            trace!("Event receiver dropped, discarding event");
        }
    }

    fn emit_link_state(&self, device_id: &DeviceId, state: LinkState) {
        self.emit(AppEvent::ConnectionState {
            device_id: device_id.clone(),
            state,
        });
    }

    /// Tear a session down and tell the application, once per session.
    pub fn drop_session(&self, device_id: &DeviceId) -> bool {
        let removed = self.serializer.teardown(device_id);
        if removed {
            self.emit_link_state(device_id, LinkState::Disconnected);
        }
        removed
    }

    /// Tear every session down, emitting one disconnect per device.
    pub fn drop_all_sessions(&self) -> usize {
        let removed = self.serializer.teardown_all();
        for device_id in &removed {
            self.emit_link_state(device_id, LinkState::Disconnected);
        }
        removed.len()
    }
}

impl GattCallback for EventCorrelator {
    fn on_connection_state_change(&self, device_id: &DeviceId, status: GattStatus, state: LinkState) {
        debug!(
            "onConnectionStateChange: device({}) status({}), newState({:?})",
            device_id, status, state
        );

        if state == LinkState::Connected && status == protocol::GATT_SUCCESS {
            let known = match self.serializer.registry().lookup_mut(device_id) {
                Some(session) => {
                    session.set_state(ConnectionState::Connected);
                    true
                }
                None => false,
            };
            if known {
                info!("{}: connected", device_id);
                self.emit_link_state(device_id, LinkState::Connected);
            } else {
                debug!("{}: connected callback for a session already gone", device_id);
            }
        } else if self.drop_session(device_id) {
            info!("{}: link lost (status {})", device_id, status);
        }
    }

    fn on_services_discovered(
        &self,
        device_id: &DeviceId,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    ) {
        debug!("onServicesDiscovered {} {}", device_id, status);
        if status != protocol::GATT_SUCCESS {
            warn!("{}: service discovery failed with status {}", device_id, status);
            return;
        }

        {
            let mut registry = self.serializer.registry();
            let Some(session) = registry.lookup_mut(device_id) else {
                debug!("{}: discovery result for unknown session", device_id);
                return;
            };
            for service in &services {
                session.record_service(service.uuid.clone(), service.characteristics.clone());
            }
        }

        for service in services {
            trace!("Service {} {:?}", service.uuid, service.characteristics);
            self.emit(AppEvent::ServiceDiscovered {
                device_id: device_id.clone(),
                service: service.uuid,
                characteristics: service.characteristics,
            });
        }
    }

    fn on_mtu_changed(&self, device_id: &DeviceId, mtu: u16, status: GattStatus) {
        debug!("onMtuChanged {} {} {}", device_id, mtu, status);
        if status == protocol::GATT_SUCCESS {
            if let Some(session) = self.serializer.registry().lookup_mut(device_id) {
                session.set_mtu(mtu);
            }
            self.emit(AppEvent::MtuChanged { mtu });
        }
        self.serializer.signal(
            device_id,
            OperationKind::RequestMtu,
            Completion {
                status,
                payload: CompletionPayload::Mtu(mtu),
            },
        );
    }

    fn on_characteristic_read(
        &self,
        device_id: &DeviceId,
        characteristic: &str,
        value: Vec<u8>,
        status: GattStatus,
    ) {
        debug!("onCharacteristicRead {} {:02X?} {}", characteristic, value, status);
        self.emit(AppEvent::CharacteristicValue {
            device_id: device_id.clone(),
            characteristic: characteristic.to_string(),
            value: value.clone(),
        });
        self.serializer.signal(
            device_id,
            OperationKind::Read,
            Completion {
                status,
                payload: CompletionPayload::Value(value),
            },
        );
    }

    fn on_characteristic_write(&self, device_id: &DeviceId, characteristic: &str, status: GattStatus) {
        debug!("onCharacteristicWrite {} {}", characteristic, status);
        self.serializer
            .signal(device_id, OperationKind::Write, Completion::empty(status));
    }

    fn on_characteristic_changed(&self, device_id: &DeviceId, characteristic: &str, value: Vec<u8>) {
        trace!("onCharacteristicChanged {} {:02X?}", characteristic, value);
        self.emit(AppEvent::CharacteristicValue {
            device_id: device_id.clone(),
            characteristic: characteristic.to_string(),
            value,
        });
    }

    fn on_descriptor_write(
        &self,
        device_id: &DeviceId,
        characteristic: &str,
        descriptor: &str,
        status: GattStatus,
    ) {
        if !protocol::is_cccd(descriptor) {
            trace!("{}: ignoring write of descriptor {}", device_id, descriptor);
            return;
        }
        debug!("onDescriptorWrite {} CCCD {}", characteristic, status);
        self.serializer
            .signal(device_id, OperationKind::Notify, Completion::empty(status));
    }
}
