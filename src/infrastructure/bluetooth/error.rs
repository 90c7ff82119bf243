//! Bluetooth Error Types
//!
//! Every failure is returned synchronously to the caller of a command; none
//! travel over the event channel.

use crate::domain::models::{DeviceId, OperationKind};
use thiserror::Error;

/// Failure of a command issued through the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// No live session for this device.
    #[error("Unknown deviceId: {0}")]
    UnknownDevice(DeviceId),

    /// Service/characteristic pair not among the discovered services.
    #[error("Unknown characteristic: {service}/{characteristic}")]
    UnknownCharacteristic {
        service: String,
        characteristic: String,
    },

    /// The platform refused the command at submission time.
    #[error("{kind} unavailable: {reason}")]
    Unavailable { kind: OperationKind, reason: String },

    /// The link went away while the operation was pending.
    #[error("Device disconnected during {0}")]
    LinkDropped(OperationKind),

    /// The completion callback reported a non-success GATT status.
    #[error("{kind} failed with GATT status {status}")]
    GattStatus { kind: OperationKind, status: i32 },

    /// No completion arrived within the configured operation timeout.
    #[error("{0} timed out")]
    TimedOut(OperationKind),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Method not implemented: {0}")]
    NotImplemented(String),

    /// The platform refused a link-level command (connect, discovery).
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl BridgeError {
    /// Stable error code reported on the command surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownDevice(_) | Self::UnknownCharacteristic { .. } => "IllegalArgument",
            Self::InvalidArgument(_) => "IllegalArgument",
            Self::Unavailable { .. } => "CharacteristicUnavailable",
            Self::LinkDropped(_) => "DeviceDisconnected",
            Self::GattStatus { .. } => "GattError",
            Self::TimedOut(_) => "Timeout",
            Self::NotImplemented(_) => "NotImplemented",
            Self::Platform(_) => "PlatformError",
        }
    }
}

/// Submission failure reported by a platform stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("adapter is not available")]
    AdapterUnavailable,

    #[error("device is not connected")]
    NotConnected,

    #[error("characteristic {0} does not support this operation")]
    CharacteristicUnavailable(String),

    #[error("handle already closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            BridgeError::UnknownDevice(DeviceId::from("AA:BB")).code(),
            "IllegalArgument"
        );
        assert_eq!(
            BridgeError::LinkDropped(OperationKind::Read).code(),
            "DeviceDisconnected"
        );
        assert_eq!(
            BridgeError::LinkDropped(OperationKind::Read).to_string(),
            "Device disconnected during read"
        );
    }

    #[test]
    fn test_platform_error_conversion() {
        let error: BridgeError = PlatformError::AdapterUnavailable.into();
        assert_eq!(error.code(), "PlatformError");
        assert_eq!(error.to_string(), "Platform error: adapter is not available");
    }
}
