use crate::{DeviceStatus, Measurement, Result};
use async_trait::async_trait;

/// Source of bearer tokens for the device API
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a valid access token, refreshing it first if needed
    async fn get_token(&self) -> Result<String>;
}

/// Fetches the current status of every device visible to the client
#[async_trait]
pub trait StatusReader: Send + Sync {
    /// Read all device statuses; fails as a whole if any request fails
    async fn read_statuses(&self) -> Result<Vec<DeviceStatus>>;
}

/// Maps device statuses into flat measurements
pub trait MeasurementExtractor: Send + Sync {
    /// Never fails; attributes that cannot be converted are skipped
    fn get_measurements(&self, statuses: &[DeviceStatus]) -> Vec<Measurement>;
}

/// Publishes measurements into the metrics registry
pub trait MetricSink: Send + Sync {
    fn record(&self, measurements: &[Measurement]);

    /// Called after a tick that completed with `devices` statuses
    fn poll_succeeded(&self, _devices: usize) {}

    /// Called after a tick that failed
    fn poll_failed(&self) {}
}
