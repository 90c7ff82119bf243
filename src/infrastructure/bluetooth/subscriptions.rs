//! Broadcast stream registrations.
//!
//! The availability and scan-result streams have at most one listener each.
//! Listening replaces any previous listener; events published while nobody
//! listens are dropped.

use super::platform::AdapterCallback;
use crate::domain::models::{AvailabilityState, StreamEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamName {
    AvailabilityChange,
    ScanResult,
}

impl StreamName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AvailabilityChange => "availabilityChange",
            Self::ScanResult => "scanResult",
        }
    }
}

#[derive(Default)]
pub struct Subscriptions {
    sinks: Mutex<HashMap<StreamName, mpsc::UnboundedSender<StreamEvent>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, name: StreamName) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.sinks.lock().insert(name, tx).is_some() {
            debug!("Replacing listener of {}", name.as_str());
        }
        rx
    }

    pub fn unsubscribe(&self, name: StreamName) -> bool {
        self.sinks.lock().remove(&name).is_some()
    }

    pub fn is_active(&self, name: StreamName) -> bool {
        self.sinks
            .lock()
            .get(&name)
            .map(|sink| !sink.is_closed())
            .unwrap_or(false)
    }

    /// Deliver an event to the stream's listener, if any.
    pub fn publish(&self, name: StreamName, event: StreamEvent) -> bool {
        let mut sinks = self.sinks.lock();
        let Some(sink) = sinks.get(&name) else {
            trace!("No listener on {}", name.as_str());
            return false;
        };
        if sink.send(event).is_err() {
            debug!("Listener of {} went away", name.as_str());
            sinks.remove(&name);
            return false;
        }
        true
    }

    pub fn clear(&self) {
        self.sinks.lock().clear();
    }
}

/// Forwards adapter state changes to the availability stream.
pub struct AvailabilityRelay {
    subscriptions: Arc<Subscriptions>,
}

impl AvailabilityRelay {
    pub fn new(subscriptions: Arc<Subscriptions>) -> Self {
        Self { subscriptions }
    }
}

impl AdapterCallback for AvailabilityRelay {
    fn on_availability_changed(&self, state: AvailabilityState) {
        debug!("Adapter availability changed: {:?}", state);
        self.subscriptions.publish(
            StreamName::AvailabilityChange,
            StreamEvent::AvailabilityChanged(state),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_listener_is_dropped() {
        let subscriptions = Subscriptions::new();
        assert!(!subscriptions.publish(
            StreamName::ScanResult,
            StreamEvent::AvailabilityChanged(AvailabilityState::PoweredOn)
        ));
    }

    #[test]
    fn test_resubscribe_replaces_listener() {
        let subscriptions = Subscriptions::new();
        let mut first = subscriptions.subscribe(StreamName::AvailabilityChange);
        let mut second = subscriptions.subscribe(StreamName::AvailabilityChange);

        assert!(subscriptions.publish(
            StreamName::AvailabilityChange,
            StreamEvent::AvailabilityChanged(AvailabilityState::PoweredOff)
        ));
        assert!(first.try_recv().is_err());
        assert_eq!(
            second.try_recv().unwrap(),
            StreamEvent::AvailabilityChanged(AvailabilityState::PoweredOff)
        );
    }

    #[test]
    fn test_unsubscribe_and_dropped_receiver() {
        let subscriptions = Subscriptions::new();
        let rx = subscriptions.subscribe(StreamName::ScanResult);
        assert!(subscriptions.is_active(StreamName::ScanResult));
        drop(rx);
        assert!(!subscriptions.is_active(StreamName::ScanResult));

        let _rx = subscriptions.subscribe(StreamName::AvailabilityChange);
        assert!(subscriptions.unsubscribe(StreamName::AvailabilityChange));
        assert!(!subscriptions.unsubscribe(StreamName::AvailabilityChange));
    }

    #[test]
    fn test_relay_publishes_availability() {
        let subscriptions = Arc::new(Subscriptions::new());
        let mut rx = subscriptions.subscribe(StreamName::AvailabilityChange);
        AvailabilityRelay::new(subscriptions).on_availability_changed(AvailabilityState::Resetting);
        assert_eq!(
            rx.try_recv().unwrap(),
            StreamEvent::AvailabilityChanged(AvailabilityState::Resetting)
        );
    }
}
