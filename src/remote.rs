//! Remote adapter contract.
//!
//! One adapter per entity type converts an operation into a server
//! exchange and reports the outcome. Concrete transports (HTTP, GraphQL,
//! gRPC) live outside the core; the engine only sees this contract.

use crate::error::RemoteError;
use crate::operation::{Operation, OperationKind};
use crate::{Payload, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Outcome of dispatching one operation to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum SyncResult {
    /// The remote accepted the operation.
    #[serde(rename_all = "camelCase")]
    Success {
        /// Server-assigned identifier, if the remote re-keyed the entity
        #[serde(skip_serializing_if = "Option::is_none", default)]
        server_id: Option<String>,
        /// Server-side timestamp of the accepted write
        #[serde(skip_serializing_if = "Option::is_none", default)]
        server_timestamp: Option<Timestamp>,
        /// Authoritative entity snapshot the engine writes back to local
        /// storage verbatim (server-managed fields flow in through here)
        #[serde(skip_serializing_if = "Option::is_none", default)]
        resolved_payload: Option<Payload>,
    },
    /// The remote rejected the operation.
    Failure { message: String, retryable: bool },
    /// The remote holds a conflicting version of the entity.
    #[serde(rename_all = "camelCase")]
    Conflict { conflict_data: Payload },
}

impl SyncResult {
    /// A plain success with no server-returned state.
    pub fn ok() -> Self {
        SyncResult::Success {
            server_id: None,
            server_timestamp: None,
            resolved_payload: None,
        }
    }

    /// A success carrying an authoritative snapshot.
    pub fn resolved(payload: Payload) -> Self {
        SyncResult::Success {
            server_id: None,
            server_timestamp: None,
            resolved_payload: Some(payload),
        }
    }

    /// A failure verdict.
    pub fn failure(message: impl Into<String>, retryable: bool) -> Self {
        SyncResult::Failure {
            message: message.into(),
            retryable,
        }
    }

    /// A conflict carrying the remote's snapshot.
    pub fn conflict(conflict_data: Payload) -> Self {
        SyncResult::Conflict { conflict_data }
    }
}

/// Contract for exchanging operations with a remote authority.
///
/// Every method receiving an operation MUST present `op.operation_id` to
/// the server as an idempotency key and deduplicate on it: the engine
/// assumes that replaying an already-processed operation returns
/// [`SyncResult::Success`] and is safe.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// The entity type this adapter serves; the registry key.
    fn entity_type(&self) -> &str;

    /// Push a create. Idempotent on `op.operation_id`.
    async fn create(&self, op: &Operation) -> Result<SyncResult, RemoteError>;

    /// Push an update. Idempotent on `op.operation_id`.
    async fn update(&self, op: &Operation) -> Result<SyncResult, RemoteError>;

    /// Push a delete. Idempotent on `op.operation_id`.
    async fn delete(&self, op: &Operation) -> Result<SyncResult, RemoteError>;

    /// Push a custom operation. Adapters that serve no custom operations
    /// keep this default, a non-retryable failure.
    async fn custom(&self, op: &Operation) -> Result<SyncResult, RemoteError> {
        let name = match &op.kind {
            OperationKind::Custom(name) => name.as_str(),
            _ => "custom",
        };
        Ok(SyncResult::failure(
            format!("custom operation '{}' not implemented", name),
            false,
        ))
    }

    /// Point-read the remote's current snapshot of an entity, for
    /// out-of-band conflict fetches. Not used by the default engine path.
    async fn fetch_remote_state(&self, _entity_id: &str) -> Result<Option<Payload>, RemoteError> {
        Ok(None)
    }

    /// Route one operation to the method matching its kind.
    async fn dispatch(&self, op: &Operation) -> Result<SyncResult, RemoteError> {
        match &op.kind {
            OperationKind::Create => self.create(op).await,
            OperationKind::Update => self.update(op).await,
            OperationKind::Delete => self.delete(op).await,
            OperationKind::Custom(_) => self.custom(op).await,
        }
    }

    /// Dispatch a batch. The default loops serial per-operation calls;
    /// adapters with a batch endpoint override it.
    async fn sync_batch(&self, ops: &[Operation]) -> Result<Vec<SyncResult>, RemoteError> {
        let mut results = Vec::with_capacity(ops.len());
        for op in ops {
            results.push(self.dispatch(op).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAdapter;

    #[async_trait]
    impl RemoteAdapter for EchoAdapter {
        fn entity_type(&self) -> &str {
            "product"
        }

        async fn create(&self, _op: &Operation) -> Result<SyncResult, RemoteError> {
            Ok(SyncResult::ok())
        }

        async fn update(&self, _op: &Operation) -> Result<SyncResult, RemoteError> {
            Ok(SyncResult::failure("stale", true))
        }

        async fn delete(&self, _op: &Operation) -> Result<SyncResult, RemoteError> {
            Ok(SyncResult::ok())
        }
    }

    fn op(kind: OperationKind) -> Operation {
        Operation::new(
            "op-1",
            kind,
            "product",
            "p1",
            crate::Payload::new(),
            1000,
            "device-1",
        )
    }

    #[tokio::test]
    async fn dispatch_routes_by_kind() {
        let adapter = EchoAdapter;
        assert_eq!(
            adapter.dispatch(&op(OperationKind::Create)).await.unwrap(),
            SyncResult::ok()
        );
        assert_eq!(
            adapter.dispatch(&op(OperationKind::Update)).await.unwrap(),
            SyncResult::failure("stale", true)
        );
    }

    #[tokio::test]
    async fn custom_defaults_to_unimplemented_failure() {
        let adapter = EchoAdapter;
        let result = adapter
            .dispatch(&op(OperationKind::Custom("reorder".into())))
            .await
            .unwrap();
        assert_eq!(
            result,
            SyncResult::failure("custom operation 'reorder' not implemented", false)
        );
    }

    #[tokio::test]
    async fn sync_batch_defaults_to_serial_dispatch() {
        let adapter = EchoAdapter;
        let ops = vec![op(OperationKind::Create), op(OperationKind::Update)];
        let results = adapter.sync_batch(&ops).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], SyncResult::ok());
        assert_eq!(results[1], SyncResult::failure("stale", true));
    }

    #[test]
    fn sync_result_serialization() {
        let success = SyncResult::resolved(
            json!({"id": "p1", "version": 1})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        );
        let encoded = serde_json::to_string(&success).unwrap();
        assert!(encoded.contains("\"outcome\":\"success\""));
        assert!(encoded.contains("resolvedPayload"));

        let decoded: SyncResult = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, success);
    }
}
