//! BLE Connection Module
//!
//! Device sessions and the registry that owns them. A session holds the
//! platform handle, the services discovered so far and the single
//! outstanding-operation slot.

use super::platform::GattConnection;
use super::protocol::{self, GattStatus};
use crate::domain::models::{ConnectionState, DeviceId, OperationKind};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Result carried from a completion callback to the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: GattStatus,
    pub payload: CompletionPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionPayload {
    Empty,
    Value(Vec<u8>),
    Mtu(u16),
}

impl Completion {
    pub fn empty(status: GattStatus) -> Self {
        Self {
            status,
            payload: CompletionPayload::Empty,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == protocol::GATT_SUCCESS
    }
}

/// The outstanding operation of a session.
///
/// Dropping it without resolving closes the channel, which the waiter reads
/// as a dropped link.
#[derive(Debug)]
pub struct PendingOperation {
    kind: OperationKind,
    ticket: u64,
    sender: oneshot::Sender<Completion>,
}

impl PendingOperation {
    pub fn new(kind: OperationKind, ticket: u64) -> (Self, oneshot::Receiver<Completion>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                kind,
                ticket,
                sender,
            },
            receiver,
        )
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn resolve(self, completion: Completion) {
        // The waiter may already be gone (timed out); nothing to do then.
        let _ = self.sender.send(completion);
    }
}

/// One connected (or connecting) device.
pub struct DeviceSession {
    device_id: DeviceId,
    generation: u64,
    state: ConnectionState,
    handle: Option<Box<dyn GattConnection>>,
    services: Vec<(String, Vec<String>)>,
    pending: Option<PendingOperation>,
    mtu: u16,
}

impl DeviceSession {
    fn new(device_id: DeviceId, generation: u64, handle: Box<dyn GattConnection>, mtu: u16) -> Self {
        Self {
            device_id,
            generation,
            state: ConnectionState::Connecting,
            handle: Some(handle),
            services: Vec::new(),
            pending: None,
            mtu,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Distinguishes successive sessions of the same device.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        debug!("{}: {:?} -> {:?}", self.device_id, self.state, state);
        self.state = state;
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu;
    }

    pub fn handle_mut(&mut self) -> Option<&mut (dyn GattConnection + 'static)> {
        self.handle.as_deref_mut()
    }

    /// Record (or replace) the characteristic list of a discovered service.
    pub fn record_service(&mut self, service: String, characteristics: Vec<String>) {
        match self
            .services
            .iter_mut()
            .find(|(uuid, _)| protocol::uuid_eq(uuid, &service))
        {
            Some((_, existing)) => *existing = characteristics,
            None => self.services.push((service, characteristics)),
        }
    }

    pub fn services(&self) -> &[(String, Vec<String>)] {
        &self.services
    }

    /// Resolve a service/characteristic pair to the identifiers the platform
    /// reported during discovery.
    pub fn resolve_characteristic(&self, service: &str, characteristic: &str) -> Option<(String, String)> {
        let (service_uuid, characteristics) = self
            .services
            .iter()
            .find(|(uuid, _)| protocol::uuid_eq(uuid, service))?;
        let characteristic_uuid = characteristics
            .iter()
            .find(|uuid| protocol::uuid_eq(uuid, characteristic))?;
        Some((service_uuid.clone(), characteristic_uuid.clone()))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_kind(&self) -> Option<OperationKind> {
        self.pending.as_ref().map(PendingOperation::kind)
    }

    /// Occupy the operation slot. Fails when another operation is outstanding.
    pub fn begin(&mut self, operation: PendingOperation) -> Result<(), PendingOperation> {
        if self.pending.is_some() {
            return Err(operation);
        }
        self.pending = Some(operation);
        Ok(())
    }

    /// Take the pending operation if it is of the given kind.
    pub fn take_pending(&mut self, kind: OperationKind) -> Option<PendingOperation> {
        match &self.pending {
            Some(pending) if pending.kind == kind => self.pending.take(),
            _ => None,
        }
    }

    /// Take the pending operation if it still is the one identified by `ticket`.
    pub fn take_pending_ticket(&mut self, ticket: u64) -> Option<PendingOperation> {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => self.pending.take(),
            _ => None,
        }
    }

    /// Release the platform handle and wake any waiter with a dropped link.
    ///
    /// Runs once per session; the registry has already given the session up.
    pub fn close(mut self) {
        self.state = ConnectionState::Disconnecting;
        if let Some(pending) = self.pending.take() {
            debug!("{}: dropping pending {} operation", self.device_id, pending.kind);
            drop(pending);
        }
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.disconnect() {
                debug!("{}: disconnect during teardown: {}", self.device_id, e);
            }
            if let Err(e) = handle.close() {
                debug!("{}: close during teardown: {}", self.device_id, e);
            }
        }
        self.state = ConnectionState::Disconnected;
        info!("{}: session closed", self.device_id);
    }
}

/// Set of live sessions, keyed by device id.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<DeviceId, DeviceSession>,
    next_generation: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.sessions.contains_key(device_id)
    }

    pub fn lookup(&self, device_id: &DeviceId) -> Option<&DeviceSession> {
        self.sessions.get(device_id)
    }

    pub fn lookup_mut(&mut self, device_id: &DeviceId) -> Option<&mut DeviceSession> {
        self.sessions.get_mut(device_id)
    }

    /// Insert a fresh `Connecting` session. An existing session for the same
    /// device is returned untouched and the new handle is handed back.
    pub fn add(
        &mut self,
        device_id: DeviceId,
        handle: Box<dyn GattConnection>,
        mtu: u16,
    ) -> Result<&mut DeviceSession, Box<dyn GattConnection>> {
        if self.sessions.contains_key(&device_id) {
            return Err(handle);
        }
        self.next_generation += 1;
        let session = DeviceSession::new(device_id.clone(), self.next_generation, handle, mtu);
        Ok(self.sessions.entry(device_id).or_insert(session))
    }

    pub fn remove(&mut self, device_id: &DeviceId) -> Option<DeviceSession> {
        self.sessions.remove(device_id)
    }

    pub fn drain(&mut self) -> Vec<DeviceSession> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.sessions.keys().cloned().collect()
    }
}
