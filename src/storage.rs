//! Storage contract consumed by the log, engine, and facade.
//!
//! The core persists three logical namespaces through this contract:
//! entities keyed by `(entity_type, entity_id)`, operations keyed by
//! `operation_id`, and free-form metadata. Concrete backends (key-value
//! stores, relational databases) live outside the core; [`MemoryStorage`]
//! is the in-crate reference.
//!
//! [`MemoryStorage`]: crate::memory::MemoryStorage

use crate::error::StorageResult;
use crate::operation::Operation;
use crate::{OperationId, Payload};
use async_trait::async_trait;

/// Synchronous view of a backend inside a transaction.
///
/// A transaction closure receives this view and stages mutations against
/// it; the backend commits them atomically when the closure returns `Ok`
/// and discards them all when it returns `Err`.
pub trait StorageTransaction {
    /// Overwrite-or-insert an entity snapshot.
    fn save_entity(&mut self, entity_type: &str, entity_id: &str, data: Payload)
        -> StorageResult<()>;

    /// Remove an entity. Idempotent.
    fn delete_entity(&mut self, entity_type: &str, entity_id: &str) -> StorageResult<()>;

    /// Insert an operation; fails on a duplicate `operation_id`.
    fn add_operation(&mut self, op: Operation) -> StorageResult<()>;

    /// Replace the operation with the same `operation_id`; fails if absent.
    fn update_operation(&mut self, op: Operation) -> StorageResult<()>;

    /// Remove an operation. Idempotent.
    fn delete_operation(&mut self, operation_id: &str) -> StorageResult<()>;

    /// Set a metadata key.
    fn save_metadata(&mut self, key: &str, value: String) -> StorageResult<()>;
}

/// A transaction body passed to [`StorageAdapter::execute_transaction`].
pub type TransactionFn =
    Box<dyn FnOnce(&mut dyn StorageTransaction) -> StorageResult<()> + Send>;

/// Persistence contract for entities, operations, and metadata.
///
/// Implementations must provide linearizable single-call semantics: calls
/// from the sync engine and concurrent facade writes may interleave, but
/// each individual call is atomic.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Prepare the backend for use.
    async fn initialize(&self) -> StorageResult<()>;

    /// Release all resources held by the backend.
    async fn close(&self) -> StorageResult<()>;

    /// Overwrite-or-insert an entity snapshot.
    async fn save_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: Payload,
    ) -> StorageResult<()>;

    /// Fetch an entity snapshot; `None` if unknown.
    async fn get_entity(&self, entity_type: &str, entity_id: &str)
        -> StorageResult<Option<Payload>>;

    /// All entity snapshots of a type, in unspecified order.
    async fn get_all_entities(&self, entity_type: &str) -> StorageResult<Vec<Payload>>;

    /// Remove an entity. Idempotent.
    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> StorageResult<()>;

    /// Whether an entity snapshot exists.
    async fn entity_exists(&self, entity_type: &str, entity_id: &str) -> StorageResult<bool>;

    /// Insert an operation; fails on a duplicate `operation_id`.
    async fn add_operation(&self, op: &Operation) -> StorageResult<()>;

    /// Replace the operation with the same `operation_id`; fails if absent.
    async fn update_operation(&self, op: &Operation) -> StorageResult<()>;

    /// Fetch an operation by id.
    async fn get_operation(&self, operation_id: &str) -> StorageResult<Option<Operation>>;

    /// All operations for one entity, ordered by `(timestamp, insertion order)`.
    async fn get_operations_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> StorageResult<Vec<Operation>>;

    /// Operations awaiting dispatch, ordered by `(timestamp, insertion order)`.
    ///
    /// Returns operations in `Pending` *and* `Syncing` state: a `Syncing`
    /// record is an in-flight dispatch that never reported an outcome
    /// (process crash, cancellation at an await point), and must be driven
    /// again on the next drain. Replay is safe because adapters deduplicate
    /// on `operation_id`.
    async fn get_pending_operations(&self) -> StorageResult<Vec<Operation>>;

    /// Remove an operation. Idempotent.
    async fn delete_operation(&self, operation_id: &str) -> StorageResult<()>;

    /// Remove a set of operations. Idempotent.
    async fn delete_operations(&self, operation_ids: &[OperationId]) -> StorageResult<()>;

    /// Number of operations [`get_pending_operations`] would return.
    ///
    /// [`get_pending_operations`]: StorageAdapter::get_pending_operations
    async fn get_pending_operations_count(&self) -> StorageResult<usize>;

    /// Operations retained in `Failed` state, ordered by `(timestamp,
    /// insertion order)`.
    async fn get_failed_operations(&self) -> StorageResult<Vec<Operation>>;

    /// Set a metadata key.
    async fn save_metadata(&self, key: &str, value: String) -> StorageResult<()>;

    /// Fetch a metadata value.
    async fn get_metadata(&self, key: &str) -> StorageResult<Option<String>>;

    /// Remove all metadata keys.
    async fn clear_metadata(&self) -> StorageResult<()>;

    /// Run a transaction body atomically.
    ///
    /// Resolves to `Ok(true)` when the body committed, `Ok(false)` when the
    /// body failed and every staged mutation was rolled back. `Err` is
    /// reserved for backend faults.
    async fn execute_transaction(&self, f: TransactionFn) -> StorageResult<bool>;

    /// Erase entities, operations, and metadata.
    async fn clear_all(&self) -> StorageResult<()>;
}
