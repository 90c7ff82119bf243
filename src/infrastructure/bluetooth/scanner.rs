//! BLE Scanner Module
//!
//! Starts and stops platform scans and forwards advertisements to the
//! scan-result stream.

use super::error::PlatformError;
use super::platform::{BlePlatform, ScanCallback, ScanRecord};
use super::protocol;
use super::subscriptions::{StreamName, Subscriptions};
use crate::domain::models::{ScanResult, StreamEvent};
use std::sync::Arc;
use tracing::{info, trace, warn};

/// BLE Scanner
pub struct BleScanner {
    platform: Arc<dyn BlePlatform>,
    subscriptions: Arc<Subscriptions>,
    scanning: bool,
}

impl BleScanner {
    /// Create a new scanner
    pub fn new(platform: Arc<dyn BlePlatform>, subscriptions: Arc<Subscriptions>) -> Self {
        Self {
            platform,
            subscriptions,
            scanning: false,
        }
    }

    /// Start scanning for BLE devices
    ///
    /// # Arguments
    /// * `service_filters` - Advertised service UUIDs to match (empty matches every device)
    pub fn start(&mut self, service_filters: &[String]) -> Result<(), PlatformError> {
        // Stop any existing scan
        self.stop();

        if service_filters.is_empty() {
            info!("Starting BLE scan for all devices");
        } else {
            info!("Starting BLE scan for services: {:?}", service_filters);
        }

        let relay = Arc::new(ScanRelay {
            subscriptions: self.subscriptions.clone(),
        });
        self.platform.start_scan(service_filters, relay)?;
        self.scanning = true;
        Ok(())
    }

    /// Stop scanning
    pub fn stop(&mut self) {
        if self.scanning {
            info!("Stopping BLE scan...");
            self.platform.stop_scan();
            self.scanning = false;
        }
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Converts platform advertisements into scan-result stream events.
struct ScanRelay {
    subscriptions: Arc<Subscriptions>,
}

impl ScanCallback for ScanRelay {
    fn on_scan_result(&self, record: ScanRecord) {
        trace!("onScanResult: {:?}", record);
        self.subscriptions
            .publish(StreamName::ScanResult, StreamEvent::ScanResult(to_scan_result(record)));
    }

    fn on_scan_failed(&self, error_code: i32) {
        warn!("onScanFailed: {}", error_code);
    }
}

fn to_scan_result(record: ScanRecord) -> ScanResult {
    let manufacturer_data_head = protocol::manufacturer_data_head(
        record
            .manufacturer_data
            .as_ref()
            .map(|(company_id, payload)| (*company_id, payload.as_slice())),
    );
    ScanResult {
        name: record.name.unwrap_or_default(),
        device_id: record.device_id,
        manufacturer_data_head,
        rssi: record.rssi,
    }
}
