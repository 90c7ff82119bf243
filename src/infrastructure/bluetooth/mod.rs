//! Bluetooth Module
//!
//! Serializes GATT operations over a callback-driven BLE stack and correlates
//! the stack's callbacks back to the callers waiting on them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            CommandDispatcher  (JSON method calls)        │
//! └─────────────────────┬───────────────────────────────────┘
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Main coordinator - public API for the application)     │
//! └───────┬──────────────────┬──────────────────┬───────────┘
//!         │                  │                  │
//!         ▼                  ▼                  ▼
//! ┌─────────────┐  ┌──────────────────┐  ┌──────────────┐
//! │   Scanner   │  │    Serializer    │  │ Subscriptions│
//! │             │  │ - gate + waiters │  │ - availability│
//! │             │  │ - Registry       │  │ - scan results│
//! └──────┬──────┘  └────────▲─────────┘  └──────▲───────┘
//!        │                  │ signal / teardown  │
//!        ▼                  │                    │
//! ┌─────────────────────────┴────────────────────┴───────┐
//! │  BlePlatform  ──callbacks──▶  EventCorrelator         │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`platform`] - Traits the native stack implements
//! - [`loopback`] - In-memory platform with simulated peripherals
//! - [`protocol`] - GATT constants and UUID helpers
//! - [`connection`] - Device sessions and the connection registry
//! - [`serializer`] - One-operation-at-a-time execution and waiting
//! - [`correlator`] - Callback routing and event emission
//! - [`scanner`] - BLE device discovery
//! - [`subscriptions`] - Broadcast stream listeners
//! - [`service`] - Main service coordinator
//! - [`dispatcher`] - Method-call surface

pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod loopback;
pub mod platform;
pub mod protocol;
pub mod scanner;
pub mod serializer;
pub mod service;
pub mod subscriptions;

// Re-export main service for convenience
pub use dispatcher::{CommandDispatcher, MethodCall};
pub use error::{BridgeError, PlatformError};
pub use service::BluetoothService;
