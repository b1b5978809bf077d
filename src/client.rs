//! The client facade.
//!
//! [`SyncClient`] is the application-facing entry point. It supports two
//! usage modes over the same core:
//!
//! - **Hybrid**: the application owns entity storage and calls the
//!   `log_*` helpers, which only append to the operation log.
//! - **Source-of-truth**: the application calls [`save`](SyncClient::save)
//!   / [`delete`](SyncClient::delete), which update entity storage *and*
//!   append the matching operation.
//!
//! Either way, every logged operation gets a fresh uuid, the current
//! wall-clock timestamp, the configured device id, and pending status.

use crate::config::SyncConfig;
use crate::engine::{SyncEngine, SyncReport, LAST_SYNC_TIME_KEY};
use crate::error::Result;
use crate::log::OperationLog;
use crate::now_ms;
use crate::operation::{Operation, OperationKind, OperationStatus};
use crate::reducer::OperationReducer;
use crate::remote::RemoteAdapter;
use crate::resolver::ConflictResolver;
use crate::status::SyncStatusEvent;
use crate::storage::StorageAdapter;
use crate::{Payload, Timestamp};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Application-facing entry point: logging helpers, optional integrated
/// CRUD, and sync.
pub struct SyncClient {
    storage: Arc<dyn StorageAdapter>,
    log: OperationLog,
    engine: Arc<SyncEngine>,
}

impl SyncClient {
    /// Start building a client over a storage backend.
    pub fn builder(storage: Arc<dyn StorageAdapter>) -> SyncClientBuilder {
        SyncClientBuilder::new(storage)
    }

    /// Prepare the storage backend.
    pub async fn initialize(&self) -> Result<()> {
        self.storage.initialize().await?;
        Ok(())
    }

    /// The device id stamped on logged operations.
    pub fn device_id(&self) -> &str {
        &self.engine.config().device_id
    }

    // --- Hybrid mode: log-only helpers -----------------------------------

    /// Record a create intent. The entity itself is the application's to
    /// store.
    pub async fn log_create(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: Payload,
    ) -> Result<Operation> {
        self.append(OperationKind::Create, entity_type, entity_id, payload)
            .await
    }

    /// Record an update intent.
    pub async fn log_update(
        &self,
        entity_type: &str,
        entity_id: &str,
        payload: Payload,
    ) -> Result<Operation> {
        self.append(OperationKind::Update, entity_type, entity_id, payload)
            .await
    }

    /// Record a delete intent.
    pub async fn log_delete(&self, entity_type: &str, entity_id: &str) -> Result<Operation> {
        self.append(OperationKind::Delete, entity_type, entity_id, Payload::new())
            .await
    }

    /// Record a domain-specific intent.
    pub async fn log_custom(
        &self,
        name: &str,
        entity_type: &str,
        entity_id: &str,
        payload: Payload,
    ) -> Result<Operation> {
        self.append(
            OperationKind::Custom(name.to_string()),
            entity_type,
            entity_id,
            payload,
        )
        .await
    }

    // --- Source-of-truth mode: storage and log move together --------------

    /// Write the entity to storage and log the matching operation.
    ///
    /// `is_new` forces the create/update decision; when `None`, it is
    /// inferred from [`StorageAdapter::entity_exists`].
    pub async fn save(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: Payload,
        is_new: Option<bool>,
    ) -> Result<Operation> {
        let exists = match is_new {
            Some(is_new) => !is_new,
            None => self.storage.entity_exists(entity_type, entity_id).await?,
        };
        self.storage
            .save_entity(entity_type, entity_id, data.clone())
            .await?;
        let kind = if exists {
            OperationKind::Update
        } else {
            OperationKind::Create
        };
        self.append(kind, entity_type, entity_id, data).await
    }

    /// Remove the entity from storage and log the delete.
    pub async fn delete(&self, entity_type: &str, entity_id: &str) -> Result<Operation> {
        self.storage.delete_entity(entity_type, entity_id).await?;
        self.append(OperationKind::Delete, entity_type, entity_id, Payload::new())
            .await
    }

    /// Read an entity snapshot.
    pub async fn get(&self, entity_type: &str, entity_id: &str) -> Result<Option<Payload>> {
        Ok(self.storage.get_entity(entity_type, entity_id).await?)
    }

    /// Read all entity snapshots of a type.
    pub async fn get_all(&self, entity_type: &str) -> Result<Vec<Payload>> {
        Ok(self.storage.get_all_entities(entity_type).await?)
    }

    /// Whether an entity snapshot exists.
    pub async fn entity_exists(&self, entity_type: &str, entity_id: &str) -> Result<bool> {
        Ok(self.storage.entity_exists(entity_type, entity_id).await?)
    }

    // --- Sync -------------------------------------------------------------

    /// Drain pending operations against the registered adapters.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.engine.sync().await
    }

    /// The most recent status event.
    pub fn status(&self) -> SyncStatusEvent {
        self.engine.status()
    }

    /// Whether a drain is in progress.
    pub fn is_syncing(&self) -> bool {
        self.engine.is_syncing()
    }

    /// Subscribe to status events.
    pub fn status_stream(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.engine.status_stream()
    }

    /// Wall-clock time of the last completed drain, if any.
    pub async fn last_sync_time(&self) -> Result<Option<Timestamp>> {
        let value = self.storage.get_metadata(LAST_SYNC_TIME_KEY).await?;
        Ok(value.and_then(|raw| raw.parse().ok()))
    }

    // --- Log inspection ---------------------------------------------------

    /// Operations awaiting dispatch, in timestamp order.
    pub async fn pending_operations(&self) -> Result<Vec<Operation>> {
        Ok(self.log.pending().await?)
    }

    /// Number of operations awaiting dispatch.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self.log.pending_count().await?)
    }

    /// Operations retained as failed, with their error messages.
    pub async fn failed_operations(&self) -> Result<Vec<Operation>> {
        Ok(self.storage.get_failed_operations().await?)
    }

    /// Requeue every failed operation as pending with a fresh retry
    /// budget. Returns how many were requeued.
    pub async fn retry_failed(&self) -> Result<usize> {
        let failed = self.storage.get_failed_operations().await?;
        let count = failed.len();
        for mut op in failed {
            op.status = OperationStatus::Pending;
            op.retry_count = 0;
            op.error_message = None;
            self.log.update(&op).await?;
        }
        if count > 0 {
            tracing::info!(count, "failed operations requeued");
        }
        Ok(count)
    }

    /// Drop every failed operation from the log. Returns how many were
    /// dropped.
    pub async fn discard_failed(&self) -> Result<usize> {
        let failed = self.storage.get_failed_operations().await?;
        let ids: Vec<_> = failed.iter().map(|op| op.operation_id.clone()).collect();
        self.log.remove_many(&ids).await?;
        Ok(ids.len())
    }

    // --- Lifecycle --------------------------------------------------------

    /// Erase entities, operations, and metadata.
    pub async fn clear(&self) -> Result<()> {
        self.storage.clear_all().await?;
        Ok(())
    }

    /// Close the status stream and release the storage backend.
    pub async fn close(&self) -> Result<()> {
        self.engine.close().await
    }

    async fn append(
        &self,
        kind: OperationKind,
        entity_type: &str,
        entity_id: &str,
        payload: Payload,
    ) -> Result<Operation> {
        let op = Operation::new(
            uuid::Uuid::new_v4().to_string(),
            kind,
            entity_type,
            entity_id,
            payload,
            now_ms(),
            self.engine.config().device_id.clone(),
        );
        self.log.append(&op).await?;
        Ok(op)
    }
}

/// Builder collecting the adapters, resolver, and configuration for a
/// [`SyncClient`].
pub struct SyncClientBuilder {
    storage: Arc<dyn StorageAdapter>,
    config: SyncConfig,
    adapters: Vec<Arc<dyn RemoteAdapter>>,
    resolver: Option<Arc<dyn ConflictResolver>>,
    reducer: Option<Arc<dyn OperationReducer>>,
}

impl SyncClientBuilder {
    fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            config: SyncConfig::default(),
            adapters: Vec::new(),
            resolver: None,
            reducer: None,
        }
    }

    /// Use this configuration instead of the defaults.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a remote adapter for its entity type.
    pub fn adapter(mut self, adapter: Arc<dyn RemoteAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Install a conflict resolver.
    pub fn resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the default reducer.
    pub fn reducer(mut self, reducer: Arc<dyn OperationReducer>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// Assemble the client.
    pub fn build(self) -> SyncClient {
        let mut engine = SyncEngine::new(self.storage.clone(), self.config);
        for adapter in self.adapters {
            engine.register_adapter(adapter);
        }
        if let Some(resolver) = self.resolver {
            engine.set_resolver(resolver);
        }
        if let Some(reducer) = self.reducer {
            engine.set_reducer(reducer);
        }
        SyncClient {
            log: OperationLog::new(self.storage.clone()),
            storage: self.storage,
            engine: Arc::new(engine),
        }
    }
}
