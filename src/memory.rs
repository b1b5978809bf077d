//! In-memory storage backend.
//!
//! `MemoryStorage` is the reference implementation of the storage contract
//! and the substrate for the test suite. All state lives in maps behind a
//! mutex; transactions run against a clone of the state and commit by
//! swapping it in, so a failed transaction body rolls back completely.

use crate::error::{StorageError, StorageResult};
use crate::operation::{Operation, OperationStatus};
use crate::storage::{StorageAdapter, StorageTransaction, TransactionFn};
use crate::{OperationId, Payload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// An operation together with its insertion sequence number.
///
/// The sequence number breaks timestamp ties, giving the stable
/// insertion-order secondary sort the log contract requires.
#[derive(Debug, Clone)]
struct StoredOperation {
    op: Operation,
    seq: u64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    /// Entity snapshots by type, then id.
    entities: HashMap<String, HashMap<String, Payload>>,
    /// Operations by id.
    operations: HashMap<OperationId, StoredOperation>,
    /// Free-form metadata.
    metadata: HashMap<String, String>,
    /// Next insertion sequence number.
    next_seq: u64,
}

impl MemoryState {
    fn save_entity(&mut self, entity_type: &str, entity_id: &str, data: Payload) {
        self.entities
            .entry(entity_type.to_string())
            .or_default()
            .insert(entity_id.to_string(), data);
    }

    fn delete_entity(&mut self, entity_type: &str, entity_id: &str) {
        if let Some(bucket) = self.entities.get_mut(entity_type) {
            bucket.remove(entity_id);
            if bucket.is_empty() {
                self.entities.remove(entity_type);
            }
        }
    }

    fn add_operation(&mut self, op: Operation) -> StorageResult<()> {
        if self.operations.contains_key(&op.operation_id) {
            return Err(StorageError::DuplicateOperation(op.operation_id.clone()));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.operations
            .insert(op.operation_id.clone(), StoredOperation { op, seq });
        Ok(())
    }

    fn update_operation(&mut self, op: Operation) -> StorageResult<()> {
        match self.operations.get_mut(&op.operation_id) {
            Some(stored) => {
                stored.op = op;
                Ok(())
            }
            None => Err(StorageError::OperationNotFound(op.operation_id.clone())),
        }
    }

    fn delete_operation(&mut self, operation_id: &str) {
        self.operations.remove(operation_id);
    }

    fn save_metadata(&mut self, key: &str, value: String) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Operations matching the filter, sorted by `(timestamp, seq)`.
    fn sorted_operations<F>(&self, filter: F) -> Vec<Operation>
    where
        F: Fn(&Operation) -> bool,
    {
        let mut matches: Vec<&StoredOperation> =
            self.operations.values().filter(|s| filter(&s.op)).collect();
        matches.sort_by_key(|s| (s.op.timestamp, s.seq));
        matches.into_iter().map(|s| s.op.clone()).collect()
    }
}

fn is_pending(op: &Operation) -> bool {
    // Syncing records are interrupted dispatches; they must be driven again.
    matches!(
        op.status,
        OperationStatus::Pending | OperationStatus::Syncing
    )
}

/// In-memory reference implementation of [`StorageAdapter`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryState>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Transaction view over a cloned [`MemoryState`].
struct MemoryTransaction {
    state: MemoryState,
}

impl StorageTransaction for MemoryTransaction {
    fn save_entity(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        data: Payload,
    ) -> StorageResult<()> {
        self.state.save_entity(entity_type, entity_id, data);
        Ok(())
    }

    fn delete_entity(&mut self, entity_type: &str, entity_id: &str) -> StorageResult<()> {
        self.state.delete_entity(entity_type, entity_id);
        Ok(())
    }

    fn add_operation(&mut self, op: Operation) -> StorageResult<()> {
        self.state.add_operation(op)
    }

    fn update_operation(&mut self, op: Operation) -> StorageResult<()> {
        self.state.update_operation(op)
    }

    fn delete_operation(&mut self, operation_id: &str) -> StorageResult<()> {
        self.state.delete_operation(operation_id);
        Ok(())
    }

    fn save_metadata(&mut self, key: &str, value: String) -> StorageResult<()> {
        self.state.save_metadata(key, value);
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn save_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: Payload,
    ) -> StorageResult<()> {
        self.locked().save_entity(entity_type, entity_id, data);
        Ok(())
    }

    async fn get_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Option<Payload>> {
        Ok(self
            .locked()
            .entities
            .get(entity_type)
            .and_then(|bucket| bucket.get(entity_id))
            .cloned())
    }

    async fn get_all_entities(&self, entity_type: &str) -> StorageResult<Vec<Payload>> {
        Ok(self
            .locked()
            .entities
            .get(entity_type)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> StorageResult<()> {
        self.locked().delete_entity(entity_type, entity_id);
        Ok(())
    }

    async fn entity_exists(&self, entity_type: &str, entity_id: &str) -> StorageResult<bool> {
        Ok(self
            .locked()
            .entities
            .get(entity_type)
            .map(|bucket| bucket.contains_key(entity_id))
            .unwrap_or(false))
    }

    async fn add_operation(&self, op: &Operation) -> StorageResult<()> {
        self.locked().add_operation(op.clone())
    }

    async fn update_operation(&self, op: &Operation) -> StorageResult<()> {
        self.locked().update_operation(op.clone())
    }

    async fn get_operation(&self, operation_id: &str) -> StorageResult<Option<Operation>> {
        Ok(self
            .locked()
            .operations
            .get(operation_id)
            .map(|stored| stored.op.clone()))
    }

    async fn get_operations_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<Operation>> {
        Ok(self.locked().sorted_operations(|op| {
            op.entity_type == entity_type && op.entity_id == entity_id
        }))
    }

    async fn get_pending_operations(&self) -> StorageResult<Vec<Operation>> {
        Ok(self.locked().sorted_operations(is_pending))
    }

    async fn delete_operation(&self, operation_id: &str) -> StorageResult<()> {
        self.locked().delete_operation(operation_id);
        Ok(())
    }

    async fn delete_operations(&self, operation_ids: &[OperationId]) -> StorageResult<()> {
        let mut state = self.locked();
        for id in operation_ids {
            state.delete_operation(id);
        }
        Ok(())
    }

    async fn get_pending_operations_count(&self) -> StorageResult<usize> {
        Ok(self
            .locked()
            .operations
            .values()
            .filter(|s| is_pending(&s.op))
            .count())
    }

    async fn get_failed_operations(&self) -> StorageResult<Vec<Operation>> {
        Ok(self
            .locked()
            .sorted_operations(|op| op.status == OperationStatus::Failed))
    }

    async fn save_metadata(&self, key: &str, value: String) -> StorageResult<()> {
        self.locked().save_metadata(key, value);
        Ok(())
    }

    async fn get_metadata(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.locked().metadata.get(key).cloned())
    }

    async fn clear_metadata(&self) -> StorageResult<()> {
        self.locked().metadata.clear();
        Ok(())
    }

    async fn execute_transaction(&self, f: TransactionFn) -> StorageResult<bool> {
        let mut guard = self.locked();
        let mut tx = MemoryTransaction {
            state: guard.clone(),
        };
        match f(&mut tx) {
            Ok(()) => {
                *guard = tx.state;
                Ok(true)
            }
            Err(err) => {
                tracing::debug!(error = %err, "transaction rolled back");
                Ok(false)
            }
        }
    }

    async fn clear_all(&self) -> StorageResult<()> {
        let mut state = self.locked();
        state.entities.clear();
        state.operations.clear();
        state.metadata.clear();
        Ok(())
    }
}
