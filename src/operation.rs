//! Operation types for expressing changes.
//!
//! Changes are expressed as operations, not direct mutations. Every
//! operation is an immutable record of one intent against one entity; the
//! log, reducer, and sync engine all speak this vocabulary.

use crate::{DeviceId, EntityId, EntityType, OperationId, Payload, Timestamp};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// The kind of change an operation describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    /// A domain-specific operation, carrying its name. Custom operations
    /// are never reduced and dispatch to [`RemoteAdapter::custom`].
    ///
    /// [`RemoteAdapter::custom`]: crate::remote::RemoteAdapter::custom
    Custom(String),
}

impl OperationKind {
    /// Returns true for [`OperationKind::Custom`].
    pub fn is_custom(&self) -> bool {
        matches!(self, OperationKind::Custom(_))
    }
}

/// Lifecycle state of an operation in the log.
///
/// `Synced` is reserved for audit-retention setups; the normal path removes
/// an operation from the log on success instead of marking it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

/// A recorded intent to change one entity.
///
/// Identity is the `operation_id`: equality and hashing consider nothing
/// else. The id doubles as the idempotency key remote adapters present to
/// the server to deduplicate retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Globally unique identifier, stable across retries
    pub operation_id: OperationId,
    /// Namespace key into the adapter and resolver registries
    pub entity_type: EntityType,
    /// Entity identifier within `entity_type`
    pub entity_id: EntityId,
    /// What kind of change this is
    pub kind: OperationKind,
    /// The domain payload; empty for deletes
    pub payload: Payload,
    /// Milliseconds since the Unix epoch; orders the log
    pub timestamp: Timestamp,
    /// Lifecycle state
    pub status: OperationStatus,
    /// Device that recorded the operation
    pub device_id: DeviceId,
    /// Times this operation has been requeued after a retryable failure
    pub retry_count: u32,
    /// Last failure or resolution message, if any
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl Operation {
    /// Create a new pending operation.
    pub fn new(
        operation_id: impl Into<OperationId>,
        kind: OperationKind,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        payload: Payload,
        timestamp: Timestamp,
        device_id: impl Into<DeviceId>,
    ) -> Self {
        Self {
            operation_id: operation_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            kind,
            payload,
            timestamp,
            status: OperationStatus::Pending,
            device_id: device_id.into(),
            retry_count: 0,
            error_message: None,
        }
    }

    /// The `(entity_type, entity_id)` pair this operation targets.
    pub fn entity_key(&self) -> (&str, &str) {
        (&self.entity_type, &self.entity_id)
    }

    /// Serialize the operation into a field map.
    pub fn to_map(&self) -> serde_json::Result<Payload> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "operation serialized to non-object value: {}",
                other
            ))),
        }
    }

    /// Deserialize an operation from a field map produced by [`to_map`].
    ///
    /// [`to_map`]: Operation::to_map
    pub fn from_map(map: Payload) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::Value::Object(map))
    }
}

// Identity is the operation_id alone.
impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.operation_id == other.operation_id
    }
}

impl Eq for Operation {}

impl Hash for Operation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.operation_id.hash(state);
    }
}
