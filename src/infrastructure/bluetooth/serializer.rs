//! Operation Serializer
//!
//! Turns "submit a GATT command, wait for the matching callback" into a
//! single awaitable call with a bounded outcome: the completion, or a dropped
//! link.
//!
//! # Locking
//!
//! Two locks cooperate:
//!
//! - the operation gate (async) is held from submission until the waiter
//!   resolves, so a device never has more than one operation outstanding.
//!   By default one gate covers every device, which serializes operations
//!   across the whole registry; [`OperationConfig::per_device`] switches to
//!   one gate per device.
//! - the registry lock (sync) guards the session set and the pending slots.
//!   It is never held across an `.await`, which lets callbacks take it from
//!   the platform's delivery context without blocking on a waiter.
//!
//! The pending slot is filled before the command is submitted, so a callback
//! racing the submission always finds its waiter.

use super::connection::{Completion, ConnectionRegistry, DeviceSession, PendingOperation};
use super::error::{BridgeError, PlatformError, Result};
use super::platform::GattConnection;
use super::protocol;
use crate::domain::models::{DeviceId, OperationKind};
use crate::domain::settings::Settings;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Behavior knobs for pending operations, derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct OperationConfig {
    /// `None` waits until a callback or a teardown resolves the operation.
    pub timeout: Option<Duration>,
    /// Fail operations whose completion carries a non-success status.
    pub propagate_gatt_status: bool,
    /// Serialize per device instead of across all devices.
    pub per_device: bool,
    pub default_mtu: u16,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            propagate_gatt_status: false,
            per_device: false,
            default_mtu: protocol::DEFAULT_ATT_MTU,
        }
    }
}

impl From<&Settings> for OperationConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            timeout: settings.operation_timeout(),
            propagate_gatt_status: settings.propagate_gatt_status,
            per_device: settings.serialize_per_device,
            default_mtu: settings.default_mtu,
        }
    }
}

pub struct OperationSerializer {
    registry: Mutex<ConnectionRegistry>,
    gate: Arc<TokioMutex<()>>,
    device_gates: Mutex<HashMap<DeviceId, Arc<TokioMutex<()>>>>,
    next_ticket: AtomicU64,
    config: OperationConfig,
}

impl OperationSerializer {
    pub fn new(config: OperationConfig) -> Self {
        Self {
            registry: Mutex::new(ConnectionRegistry::new()),
            gate: Arc::new(TokioMutex::new(())),
            device_gates: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// Lock the session set. Never hold the guard across an `.await`.
    pub fn registry(&self) -> MutexGuard<'_, ConnectionRegistry> {
        self.registry.lock()
    }

    async fn acquire_gate(&self, device_id: &DeviceId) -> OwnedMutexGuard<()> {
        let gate = if self.config.per_device {
            self.device_gates
                .lock()
                .entry(device_id.clone())
                .or_default()
                .clone()
        } else {
            self.gate.clone()
        };
        gate.lock_owned().await
    }

    /// Run an operation against a discovered characteristic.
    pub async fn execute_on_characteristic<F>(
        &self,
        device_id: &DeviceId,
        kind: OperationKind,
        service: &str,
        characteristic: &str,
        submit: F,
    ) -> Result<Completion>
    where
        F: FnOnce(&mut dyn GattConnection, &str, &str) -> std::result::Result<(), PlatformError>,
    {
        self.execute(
            device_id,
            kind,
            |session| {
                session
                    .resolve_characteristic(service, characteristic)
                    .ok_or_else(|| BridgeError::UnknownCharacteristic {
                        service: service.to_string(),
                        characteristic: characteristic.to_string(),
                    })
            },
            |handle, (service_uuid, characteristic_uuid)| {
                submit(handle, &service_uuid, &characteristic_uuid)
            },
        )
        .await
    }

    /// Run an operation that addresses the link itself (MTU exchange).
    pub async fn execute_on_link<F>(
        &self,
        device_id: &DeviceId,
        kind: OperationKind,
        submit: F,
    ) -> Result<Completion>
    where
        F: FnOnce(&mut dyn GattConnection) -> std::result::Result<(), PlatformError>,
    {
        self.execute(device_id, kind, |_| Ok(()), |handle, ()| submit(handle))
            .await
    }

    async fn execute<R, V, F>(
        &self,
        device_id: &DeviceId,
        kind: OperationKind,
        resolve: V,
        submit: F,
    ) -> Result<Completion>
    where
        V: FnOnce(&DeviceSession) -> Result<R>,
        F: FnOnce(&mut dyn GattConnection, R) -> std::result::Result<(), PlatformError>,
    {
        let _gate = self.acquire_gate(device_id).await;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let (generation, receiver) = {
            let mut registry = self.registry.lock();
            let session = registry
                .lookup_mut(device_id)
                .ok_or_else(|| BridgeError::UnknownDevice(device_id.clone()))?;
            let target = resolve(&*session)?;

            let (pending, receiver) = PendingOperation::new(kind, ticket);
            if let Err(rejected) = session.begin(pending) {
                warn!(
                    "{}: {} refused, {:?} still pending",
                    device_id,
                    rejected.kind(),
                    session.pending_kind()
                );
                return Err(BridgeError::Unavailable {
                    kind,
                    reason: "another operation is pending".to_string(),
                });
            }

            let submitted = match session.handle_mut() {
                Some(handle) => submit(handle, target),
                None => Err(PlatformError::Closed),
            };
            if let Err(e) = submitted {
                session.take_pending_ticket(ticket);
                debug!("{}: {} submission rejected: {}", device_id, kind, e);
                return Err(BridgeError::Unavailable {
                    kind,
                    reason: e.to_string(),
                });
            }

            debug!("{}: {} submitted (ticket {})", device_id, kind, ticket);
            (session.generation(), receiver)
        };

        let signaled = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    self.abandon(device_id, ticket);
                    warn!("{}: {} timed out after {:?}", device_id, kind, limit);
                    return Err(BridgeError::TimedOut(kind));
                }
            },
            None => receiver.await.ok(),
        };

        // A wake-up alone does not say whether the link survived.
        let still_connected = self
            .registry
            .lock()
            .lookup(device_id)
            .map(|session| session.generation() == generation && session.is_connected())
            .unwrap_or(false);

        match signaled {
            Some(completion) if still_connected => self.check_status(kind, completion),
            _ => {
                debug!("{}: {} resolved by link drop", device_id, kind);
                Err(BridgeError::LinkDropped(kind))
            }
        }
    }

    fn check_status(&self, kind: OperationKind, completion: Completion) -> Result<Completion> {
        if completion.is_success() {
            return Ok(completion);
        }
        match kind {
            OperationKind::RequestMtu => Err(BridgeError::Unavailable {
                kind,
                reason: format!("MTU exchange failed with status {}", completion.status),
            }),
            _ if self.config.propagate_gatt_status => Err(BridgeError::GattStatus {
                kind,
                status: completion.status,
            }),
            _ => {
                debug!("{} completed with status {}", kind, completion.status);
                Ok(completion)
            }
        }
    }

    /// Release a slot whose waiter gave up.
    fn abandon(&self, device_id: &DeviceId, ticket: u64) {
        if let Some(session) = self.registry.lock().lookup_mut(device_id) {
            session.take_pending_ticket(ticket);
        }
    }

    /// Resolve the pending operation of `kind` on a device.
    ///
    /// Returns `false` when no such operation is waiting; a completion for
    /// another kind never wakes the current waiter.
    pub fn signal(&self, device_id: &DeviceId, kind: OperationKind, completion: Completion) -> bool {
        let pending = self
            .registry
            .lock()
            .lookup_mut(device_id)
            .and_then(|session| session.take_pending(kind));
        match pending {
            Some(pending) => {
                debug!("{}: {} completed (ticket {})", device_id, kind, pending.ticket());
                pending.resolve(completion);
                true
            }
            None => {
                debug!("{}: no pending {} for completion", device_id, kind);
                false
            }
        }
    }

    /// Drop per-device gates nobody holds or waits on. A caller queued on a
    /// gate keeps it alive, so a reconnected session shares it.
    fn prune_gates(&self) {
        self.device_gates
            .lock()
            .retain(|_, gate| Arc::strong_count(gate) > 1);
    }

    /// Remove a session, release its handle and wake its waiter.
    ///
    /// Returns `false` if the session was already gone.
    pub fn teardown(&self, device_id: &DeviceId) -> bool {
        let session = self.registry.lock().remove(device_id);
        self.prune_gates();
        match session {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Tear down every session. Returns the ids that were removed.
    pub fn teardown_all(&self) -> Vec<DeviceId> {
        let sessions = self.registry.lock().drain();
        self.prune_gates();
        sessions
            .into_iter()
            .map(|session| {
                let device_id = session.device_id().clone();
                session.close();
                device_id
            })
            .collect()
    }
}
