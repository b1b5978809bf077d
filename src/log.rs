//! The operation log.
//!
//! A thin, stateless wrapper around the storage contract that provides the
//! operation-level vocabulary: append, query, requeue, remove, squash. It
//! exists to centralize naming and transactional grouping; all durability
//! comes from the backend.

use crate::error::{StorageError, StorageResult};
use crate::operation::Operation;
use crate::storage::StorageAdapter;
use crate::OperationId;
use std::sync::Arc;

/// Ordered, durable collection of operations over a storage backend.
#[derive(Clone)]
pub struct OperationLog {
    storage: Arc<dyn StorageAdapter>,
}

impl OperationLog {
    /// Create a log over the given backend.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self { storage }
    }

    /// Append an operation; fails on a duplicate `operation_id`.
    pub async fn append(&self, op: &Operation) -> StorageResult<()> {
        self.storage.add_operation(op).await?;
        tracing::debug!(
            op_id = %op.operation_id,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            "operation appended"
        );
        Ok(())
    }

    /// Operations awaiting dispatch, in non-decreasing timestamp order.
    ///
    /// Includes `Syncing` records left behind by an interrupted dispatch;
    /// see [`StorageAdapter::get_pending_operations`].
    pub async fn pending(&self) -> StorageResult<Vec<Operation>> {
        self.storage.get_pending_operations().await
    }

    /// All operations for one entity, ordered by timestamp.
    pub async fn for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<Operation>> {
        self.storage
            .get_operations_for_entity(entity_type, entity_id)
            .await
    }

    /// Replace the record with the same `operation_id`; fails if absent.
    pub async fn update(&self, op: &Operation) -> StorageResult<()> {
        self.storage.update_operation(op).await
    }

    /// Remove an operation. Idempotent.
    pub async fn remove(&self, operation_id: &str) -> StorageResult<()> {
        self.storage.delete_operation(operation_id).await
    }

    /// Remove a set of operations. Idempotent.
    pub async fn remove_many(&self, operation_ids: &[OperationId]) -> StorageResult<()> {
        self.storage.delete_operations(operation_ids).await
    }

    /// Atomically replace a group of operations with its reduced form.
    ///
    /// Every removal and every replacement insertion happens in one storage
    /// transaction: a fault mid-rewrite leaves the log unchanged.
    pub async fn squash(
        &self,
        remove: Vec<OperationId>,
        replacements: Vec<Operation>,
    ) -> StorageResult<()> {
        let removed = remove.len();
        let kept = replacements.len();
        let committed = self
            .storage
            .execute_transaction(Box::new(move |tx| {
                for operation_id in &remove {
                    tx.delete_operation(operation_id)?;
                }
                for op in replacements {
                    tx.add_operation(op)?;
                }
                Ok(())
            }))
            .await?;
        if !committed {
            return Err(StorageError::TransactionRolledBack);
        }
        tracing::debug!(removed, kept, "operation group squashed");
        Ok(())
    }

    /// Number of operations awaiting dispatch.
    pub async fn pending_count(&self) -> StorageResult<usize> {
        self.storage.get_pending_operations_count().await
    }
}
