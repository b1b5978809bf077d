//! Engine configuration.

use crate::DeviceId;
use serde::{Deserialize, Serialize};

/// Policy knobs for the sync engine and facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Identifier for this device; stamped on every logged operation.
    /// Stable for the process lifetime.
    pub device_id: DeviceId,
    /// Retryable failures requeue an operation until its `retry_count`
    /// reaches this bound; the next failure is terminal.
    pub max_retries: u32,
    /// Abort the drain on the first non-recovered failure instead of
    /// continuing with the remaining operations.
    pub stop_on_error: bool,
    /// Squash consecutive operations per entity before dispatch.
    pub enable_reduction: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            max_retries: 3,
            stop_on_error: false,
            enable_reduction: true,
        }
    }
}

impl SyncConfig {
    /// Default configuration with an explicit device id.
    pub fn with_device_id(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }
}
