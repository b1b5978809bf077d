//! The sync engine.
//!
//! Drains the pending operation log against the registered remote
//! adapters. For each drain: load pending operations, squash them per
//! entity, then dispatch one at a time in timestamp order, applying retry
//! and conflict-resolution policy and reflecting authoritative server
//! state back into local storage. Progress is published on the status
//! stream throughout.
//!
//! At most one drain runs at a time; overlapping [`SyncEngine::sync`]
//! calls fail fast with [`Error::AlreadySyncing`].

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::log::OperationLog;
use crate::now_ms;
use crate::operation::{Operation, OperationStatus};
use crate::reducer::{OperationReducer, SquashReducer};
use crate::remote::{RemoteAdapter, SyncResult};
use crate::resolver::{ConflictResolver, LocalState, RemoteState, Resolution};
use crate::status::{StatusChannel, SyncStatusEvent};
use crate::storage::StorageAdapter;
use crate::{EntityId, EntityType, OperationId, Payload};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Metadata key stamped with the wall-clock time of the last completed
/// drain, in epoch milliseconds.
pub const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Operations dispatched (after reduction)
    pub total: usize,
    /// Accepted by the remote and removed from the log
    pub synced: usize,
    /// Requeued as pending (retryable failures, `UseLocal`, `Merge`)
    pub requeued: usize,
    /// Retained in the log as failed
    pub failed: usize,
}

/// What became of one dispatched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpOutcome {
    /// Removed from the log; the remote accepted it.
    Synced,
    /// Back in the log as pending; a later drain retries it.
    Requeued,
    /// Retained as failed for the application to inspect.
    Failed,
}

/// Orchestrates pending-operation drainage.
pub struct SyncEngine {
    storage: Arc<dyn StorageAdapter>,
    log: OperationLog,
    adapters: HashMap<EntityType, Arc<dyn RemoteAdapter>>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    reducer: Arc<dyn OperationReducer>,
    config: SyncConfig,
    is_syncing: AtomicBool,
    status: StatusChannel,
}

impl SyncEngine {
    /// Create an engine over a storage backend. Adapters and the resolver
    /// are registered before the engine is shared.
    pub fn new(storage: Arc<dyn StorageAdapter>, config: SyncConfig) -> Self {
        Self {
            log: OperationLog::new(storage.clone()),
            storage,
            adapters: HashMap::new(),
            resolver: None,
            reducer: Arc::new(SquashReducer),
            config,
            is_syncing: AtomicBool::new(false),
            status: StatusChannel::new(64),
        }
    }

    /// Register the adapter for its entity type. A later registration for
    /// the same type replaces the earlier one.
    pub fn register_adapter(&mut self, adapter: Arc<dyn RemoteAdapter>) {
        self.adapters
            .insert(adapter.entity_type().to_string(), adapter);
    }

    /// Install the conflict resolver.
    pub fn set_resolver(&mut self, resolver: Arc<dyn ConflictResolver>) {
        self.resolver = Some(resolver);
    }

    /// Replace the default [`SquashReducer`].
    pub fn set_reducer(&mut self, reducer: Arc<dyn OperationReducer>) {
        self.reducer = reducer;
    }

    /// The operation log this engine drains.
    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    /// The engine configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether a drain is currently in progress.
    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// The most recently emitted status event.
    pub fn status(&self) -> SyncStatusEvent {
        self.status.current()
    }

    /// Subscribe to status events emitted from this point on.
    pub fn status_stream(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.status.subscribe()
    }

    /// Drain pending operations against their adapters.
    ///
    /// Fails fast with [`Error::AlreadySyncing`] when a drain is already
    /// running. Storage faults abort the drain and propagate after an
    /// `Error` status event; per-operation failures only show up in the
    /// report and on the retained operations.
    pub async fn sync(&self) -> Result<SyncReport> {
        if self.is_syncing.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadySyncing);
        }
        let outcome = self.drain().await;
        self.is_syncing.store(false, Ordering::SeqCst);
        if let Err(err) = &outcome {
            tracing::error!(error = %err, "sync aborted");
            self.status.emit(SyncStatusEvent::error(err.to_string()));
        }
        outcome
    }

    /// Close the status stream and the storage backend.
    pub async fn close(&self) -> Result<()> {
        self.status.close();
        self.storage.close().await?;
        Ok(())
    }

    async fn drain(&self) -> Result<SyncReport> {
        let mut pending = self.log.pending().await?;
        if self.config.enable_reduction && !pending.is_empty() {
            pending = self.reduce_pending(pending).await?;
        }

        let total = pending.len();
        tracing::info!(total, "sync started");
        self.status.emit(SyncStatusEvent::syncing(total, 0));

        let mut report = SyncReport {
            total,
            ..SyncReport::default()
        };
        for (index, op) in pending.into_iter().enumerate() {
            let outcome = self.sync_one(op).await?;
            match outcome {
                OpOutcome::Synced => report.synced += 1,
                OpOutcome::Requeued => report.requeued += 1,
                OpOutcome::Failed => report.failed += 1,
            }
            self.status.emit(SyncStatusEvent::syncing(total, index + 1));

            if self.config.stop_on_error && outcome == OpOutcome::Failed {
                tracing::warn!(completed = index + 1, total, "sync stopped due to error");
                self.status
                    .emit(SyncStatusEvent::error("Sync stopped due to error"));
                return Ok(report);
            }
        }

        self.storage
            .save_metadata(LAST_SYNC_TIME_KEY, now_ms().to_string())
            .await?;
        self.status.emit(SyncStatusEvent::idle());
        tracing::info!(
            synced = report.synced,
            requeued = report.requeued,
            failed = report.failed,
            "sync finished"
        );
        Ok(report)
    }

    /// Squash each entity's run of pending operations in the log, then
    /// re-collect the survivors in timestamp order.
    async fn reduce_pending(&self, pending: Vec<Operation>) -> Result<Vec<Operation>> {
        // Group by entity, keeping first-seen group order. Within a group
        // the operations stay in log order.
        let mut order: Vec<(EntityType, EntityId)> = Vec::new();
        let mut groups: HashMap<(EntityType, EntityId), Vec<Operation>> = HashMap::new();
        for op in pending {
            let key = (op.entity_type.clone(), op.entity_id.clone());
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(op);
        }

        for key in order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            if group.len() < 2 {
                continue;
            }

            let ids: Vec<OperationId> =
                group.iter().map(|op| op.operation_id.clone()).collect();
            let reduced = self.reducer.reduce_many(group);

            if reduced.is_empty() {
                tracing::debug!(
                    entity_type = %key.0,
                    entity_id = %key.1,
                    removed = ids.len(),
                    "reduction cancelled the whole group"
                );
                self.log.remove_many(&ids).await?;
            } else if reduced.len() < ids.len() {
                self.log.squash(ids, reduced).await?;
            }
            // reduced.len() == ids.len(): nothing folded, leave the log be.
        }

        Ok(self.log.pending().await?)
    }

    /// Dispatch one operation and settle its outcome in the log.
    async fn sync_one(&self, mut op: Operation) -> Result<OpOutcome> {
        let Some(adapter) = self.adapters.get(&op.entity_type) else {
            let message = format!(
                "no adapter registered for entity type '{}'",
                op.entity_type
            );
            return self.fail_operation(op, message).await;
        };

        op.status = OperationStatus::Syncing;
        self.log.update(&op).await?;

        tracing::debug!(
            op_id = %op.operation_id,
            kind = ?op.kind,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            "dispatching operation"
        );

        match adapter.dispatch(&op).await {
            Ok(SyncResult::Success {
                resolved_payload, ..
            }) => {
                self.log.remove(&op.operation_id).await?;
                if let Some(payload) = resolved_payload {
                    // Authoritative overwrite; never merged with prior state.
                    self.storage
                        .save_entity(&op.entity_type, &op.entity_id, payload)
                        .await?;
                }
                tracing::debug!(op_id = %op.operation_id, "operation synced");
                Ok(OpOutcome::Synced)
            }
            Ok(SyncResult::Conflict { conflict_data }) => {
                self.resolve_conflict(op, conflict_data).await
            }
            Ok(SyncResult::Failure { message, retryable }) => {
                self.handle_failure(op, message, retryable).await
            }
            // An adapter fault is indistinguishable from a flaky transport;
            // treat it as retryable.
            Err(err) => self.handle_failure(op, err.to_string(), true).await,
        }
    }

    /// Apply the configured resolver to a remote conflict.
    async fn resolve_conflict(
        &self,
        mut op: Operation,
        conflict_data: Payload,
    ) -> Result<OpOutcome> {
        let Some(resolver) = self.resolver.as_ref() else {
            return self
                .fail_operation(op, "conflict received but no resolver configured".to_string())
                .await;
        };

        let Some(local_data) = self
            .storage
            .get_entity(&op.entity_type, &op.entity_id)
            .await?
        else {
            // Local forgot the entity; nothing to reconcile against, and
            // the remote copy stands.
            tracing::debug!(
                op_id = %op.operation_id,
                "conflict on an entity absent locally, dropping operation"
            );
            self.log.remove(&op.operation_id).await?;
            return Ok(OpOutcome::Synced);
        };

        let local = LocalState::new(local_data, op.timestamp);
        let remote = RemoteState::new(conflict_data, now_ms());
        let pending = self.log.for_entity(&op.entity_type, &op.entity_id).await?;

        match resolver.resolve(&local, &remote, &pending).await {
            Ok(Resolution::UseLocal) => {
                op.status = OperationStatus::Pending;
                op.retry_count += 1;
                self.log.update(&op).await?;
                tracing::debug!(op_id = %op.operation_id, "conflict resolved: local wins, retrying");
                Ok(OpOutcome::Requeued)
            }
            Ok(Resolution::UseRemote(data)) => {
                self.storage
                    .save_entity(&op.entity_type, &op.entity_id, data)
                    .await?;
                self.log.remove(&op.operation_id).await?;
                tracing::debug!(op_id = %op.operation_id, "conflict resolved: remote wins");
                Ok(OpOutcome::Synced)
            }
            Ok(Resolution::Merge(data)) => {
                self.storage
                    .save_entity(&op.entity_type, &op.entity_id, data.clone())
                    .await?;
                op.payload = data;
                op.status = OperationStatus::Pending;
                self.log.update(&op).await?;
                tracing::debug!(op_id = %op.operation_id, "conflict resolved: merged, requeued");
                Ok(OpOutcome::Requeued)
            }
            Ok(Resolution::Manual) => {
                self.fail_operation(op, "manual conflict resolution required".to_string())
                    .await
            }
            Err(err) => self.fail_operation(op, err.to_string()).await,
        }
    }

    /// Requeue a retryable failure while budget remains, else fail it.
    async fn handle_failure(
        &self,
        mut op: Operation,
        message: String,
        retryable: bool,
    ) -> Result<OpOutcome> {
        if retryable && op.retry_count < self.config.max_retries {
            op.status = OperationStatus::Pending;
            op.retry_count += 1;
            op.error_message = Some(message.clone());
            self.log.update(&op).await?;
            tracing::debug!(
                op_id = %op.operation_id,
                retry_count = op.retry_count,
                error = %message,
                "operation requeued"
            );
            Ok(OpOutcome::Requeued)
        } else {
            self.fail_operation(op, message).await
        }
    }

    /// Retain the operation as terminally failed.
    async fn fail_operation(&self, mut op: Operation, message: String) -> Result<OpOutcome> {
        op.status = OperationStatus::Failed;
        op.error_message = Some(message.clone());
        self.log.update(&op).await?;
        tracing::warn!(op_id = %op.operation_id, error = %message, "operation failed");
        Ok(OpOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::memory::MemoryStorage;
    use crate::operation::OperationKind;
    use crate::resolver::LastWriteWins;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type RemoteOutcome = std::result::Result<SyncResult, RemoteError>;

    fn payload(value: serde_json::Value) -> Payload {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    /// Scripted adapter: pops queued results in order and records every
    /// dispatched operation. An empty queue answers plain success.
    struct ScriptedAdapter {
        entity_type: String,
        script: Mutex<VecDeque<RemoteOutcome>>,
        calls: Mutex<Vec<Operation>>,
    }

    impl ScriptedAdapter {
        fn new(entity_type: &str) -> Self {
            Self {
                entity_type: entity_type.to_string(),
                script: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, result: RemoteOutcome) {
            self.script.lock().unwrap().push_back(result);
        }

        fn calls(&self) -> Vec<Operation> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, op: &Operation) -> RemoteOutcome {
            self.calls.lock().unwrap().push(op.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SyncResult::ok()))
        }
    }

    #[async_trait]
    impl RemoteAdapter for ScriptedAdapter {
        fn entity_type(&self) -> &str {
            &self.entity_type
        }

        async fn create(&self, op: &Operation) -> RemoteOutcome {
            self.answer(op)
        }

        async fn update(&self, op: &Operation) -> RemoteOutcome {
            self.answer(op)
        }

        async fn delete(&self, op: &Operation) -> RemoteOutcome {
            self.answer(op)
        }

        async fn custom(&self, op: &Operation) -> RemoteOutcome {
            self.answer(op)
        }
    }

    struct Harness {
        storage: Arc<MemoryStorage>,
        adapter: Arc<ScriptedAdapter>,
        engine: SyncEngine,
    }

    fn harness(config: SyncConfig) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        let adapter = Arc::new(ScriptedAdapter::new("product"));
        let mut engine = SyncEngine::new(storage.clone(), config);
        engine.register_adapter(adapter.clone());
        engine.set_resolver(Arc::new(LastWriteWins));
        Harness {
            storage,
            adapter,
            engine,
        }
    }

    fn op(id: &str, kind: OperationKind, body: serde_json::Value, ts: i64) -> Operation {
        Operation::new(id, kind, "product", "p1", payload(body), ts, "device-1")
    }

    #[tokio::test]
    async fn successful_drain_empties_log() {
        let h = harness(SyncConfig::with_device_id("device-1"));
        h.engine
            .log()
            .append(&op("op-1", OperationKind::Create, json!({"name": "A"}), 1000))
            .await
            .unwrap();

        let report = h.engine.sync().await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(h.engine.log().pending_count().await.unwrap(), 0);
        assert_eq!(h.adapter.calls().len(), 1);
    }

    #[tokio::test]
    async fn resolved_payload_overwrites_entity() {
        let h = harness(SyncConfig::with_device_id("device-1"));
        h.storage
            .save_entity("product", "p1", payload(json!({"name": "A", "version": 0})))
            .await
            .unwrap();
        h.engine
            .log()
            .append(&op("op-1", OperationKind::Update, json!({"name": "A"}), 1000))
            .await
            .unwrap();
        h.adapter.push(Ok(SyncResult::resolved(payload(
            json!({"name": "A", "version": 1}),
        ))));

        h.engine.sync().await.unwrap();
        assert_eq!(
            h.storage.get_entity("product", "p1").await.unwrap(),
            Some(payload(json!({"name": "A", "version": 1})))
        );
    }

    #[tokio::test]
    async fn no_adapter_fails_operation() {
        let h = harness(SyncConfig::with_device_id("device-1"));
        let orphan = Operation::new(
            "op-1",
            OperationKind::Create,
            "customer",
            "c1",
            Payload::new(),
            1000,
            "device-1",
        );
        h.engine.log().append(&orphan).await.unwrap();

        let report = h.engine.sync().await.unwrap();
        assert_eq!(report.failed, 1);

        let failed = h.storage.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("no adapter registered for entity type 'customer'")
        );
    }

    #[tokio::test]
    async fn adapter_error_is_retryable() {
        let h = harness(SyncConfig::with_device_id("device-1"));
        h.engine
            .log()
            .append(&op("op-1", OperationKind::Create, json!({"n": 1}), 1000))
            .await
            .unwrap();
        h.adapter
            .push(Err(RemoteError::Transport("connection reset".into())));

        let report = h.engine.sync().await.unwrap();
        assert_eq!(report.requeued, 1);

        let requeued = h.storage.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(requeued.status, OperationStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(
            requeued.error_message.as_deref(),
            Some("transport failure: connection reset")
        );
    }

    #[tokio::test]
    async fn fatal_failure_is_terminal() {
        let h = harness(SyncConfig::with_device_id("device-1"));
        h.engine
            .log()
            .append(&op("op-1", OperationKind::Create, json!({"n": 1}), 1000))
            .await
            .unwrap();
        h.adapter.push(Ok(SyncResult::failure("rejected", false)));

        let report = h.engine.sync().await.unwrap();
        assert_eq!(report.failed, 1);
        let failed = h.storage.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(failed.status, OperationStatus::Failed);
        assert_eq!(failed.retry_count, 0);
    }

    #[tokio::test]
    async fn conflict_without_resolver_fails_operation() {
        let storage = Arc::new(MemoryStorage::new());
        let adapter = Arc::new(ScriptedAdapter::new("product"));
        let mut engine = SyncEngine::new(storage.clone(), SyncConfig::with_device_id("device-1"));
        engine.register_adapter(adapter.clone());
        // No resolver installed.

        storage
            .save_entity("product", "p1", payload(json!({"name": "Local"})))
            .await
            .unwrap();
        engine
            .log()
            .append(&op("op-1", OperationKind::Update, json!({"name": "Local"}), 1000))
            .await
            .unwrap();
        adapter.push(Ok(SyncResult::conflict(payload(json!({"name": "Remote"})))));

        let report = engine.sync().await.unwrap();
        assert_eq!(report.failed, 1);
        let failed = storage.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(
            failed.error_message.as_deref(),
            Some("conflict received but no resolver configured")
        );
    }

    #[tokio::test]
    async fn conflict_on_locally_absent_entity_is_benign() {
        let h = harness(SyncConfig::with_device_id("device-1"));
        h.engine
            .log()
            .append(&op("op-1", OperationKind::Update, json!({"name": "A"}), 1000))
            .await
            .unwrap();
        h.adapter.push(Ok(SyncResult::conflict(payload(json!({"name": "Remote"})))));

        let report = h.engine.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(h.engine.log().pending_count().await.unwrap(), 0);
        // The entity stays absent; local had forgotten it.
        assert!(h.storage.get_entity("product", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reduction_can_be_disabled() {
        let mut config = SyncConfig::with_device_id("device-1");
        config.enable_reduction = false;
        let h = harness(config);

        h.engine
            .log()
            .append(&op("op-1", OperationKind::Create, json!({"name": "A"}), 1000))
            .await
            .unwrap();
        h.engine
            .log()
            .append(&op("op-2", OperationKind::Update, json!({"name": "B"}), 2000))
            .await
            .unwrap();

        let report = h.engine.sync().await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(h.adapter.calls().len(), 2);
    }

    #[tokio::test]
    async fn stop_on_error_halts_drain() {
        let mut config = SyncConfig::with_device_id("device-1");
        config.stop_on_error = true;
        let h = harness(config);

        let other = Operation::new(
            "op-2",
            OperationKind::Create,
            "product",
            "p2",
            payload(json!({"n": 2})),
            2000,
            "device-1",
        );
        h.engine
            .log()
            .append(&op("op-1", OperationKind::Create, json!({"n": 1}), 1000))
            .await
            .unwrap();
        h.engine.log().append(&other).await.unwrap();
        h.adapter.push(Ok(SyncResult::failure("rejected", false)));

        let mut events = h.engine.status_stream();
        let report = h.engine.sync().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.synced, 0);
        // The second operation was never dispatched.
        assert_eq!(h.adapter.calls().len(), 1);

        // Events: syncing(2,0), syncing(2,1), error.
        assert_eq!(events.recv().await.unwrap(), SyncStatusEvent::syncing(2, 0));
        assert_eq!(events.recv().await.unwrap(), SyncStatusEvent::syncing(2, 1));
        let last = events.recv().await.unwrap();
        assert_eq!(last.status, crate::status::SyncStatus::Error);
        assert_eq!(last.error.as_deref(), Some("Sync stopped due to error"));
    }

    #[tokio::test]
    async fn overlapping_sync_is_rejected() {
        // A second start while the flag is held must fail fast.
        let h = harness(SyncConfig::with_device_id("device-1"));
        h.engine.is_syncing.store(true, Ordering::SeqCst);
        assert!(matches!(h.engine.sync().await, Err(Error::AlreadySyncing)));
        h.engine.is_syncing.store(false, Ordering::SeqCst);
        assert!(!h.engine.is_syncing());
    }

    #[tokio::test]
    async fn empty_drain_emits_zero_progress_then_idle() {
        let h = harness(SyncConfig::with_device_id("device-1"));
        let mut events = h.engine.status_stream();

        let report = h.engine.sync().await.unwrap();
        assert_eq!(report.total, 0);

        assert_eq!(events.recv().await.unwrap(), SyncStatusEvent::syncing(0, 0));
        assert_eq!(events.recv().await.unwrap(), SyncStatusEvent::idle());

        // An empty drain still counts as a sync.
        assert!(h
            .storage
            .get_metadata(LAST_SYNC_TIME_KEY)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn syncing_status_visible_to_adapter() {
        // The log records Syncing before dispatch; the adapter observes it.
        let h = harness(SyncConfig::with_device_id("device-1"));
        h.engine
            .log()
            .append(&op("op-1", OperationKind::Create, json!({"n": 1}), 1000))
            .await
            .unwrap();

        h.engine.sync().await.unwrap();
        assert_eq!(h.adapter.calls()[0].status, OperationStatus::Syncing);
    }
}
