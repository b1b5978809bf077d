//! # Courier
//!
//! An offline-first operation-log sync engine.
//!
//! Courier records domain-level change intents as operations in a durable
//! local log, squashes redundant operations per entity, and drives the
//! pending log through pluggable remote adapters with retry and
//! conflict-resolution policy. Server-returned canonical state flows back
//! into local storage.
//!
//! ## Design Principles
//!
//! - **Local-first**: every mutation lands locally before the network is
//!   involved; sync is a background concern
//! - **Pluggable edges**: storage backends, remote transports, and conflict
//!   resolvers are contracts, not implementations
//! - **Idempotent**: every operation carries a stable id the remote can
//!   deduplicate on, so retries and replays are safe
//! - **Observable**: a broadcast status stream reports drain progress
//!
//! ## Core Concepts
//!
//! ### Operations
//!
//! Changes are expressed as [`Operation`] records, not direct mutations:
//! a [`Create`](OperationKind::Create), [`Update`](OperationKind::Update),
//! [`Delete`](OperationKind::Delete), or domain-specific
//! [`Custom`](OperationKind::Custom) intent against one entity, carrying an
//! opaque payload map.
//!
//! ### Operation log
//!
//! The [`OperationLog`] is the ordered, durable collection of operations,
//! a thin vocabulary layer over the [`StorageAdapter`] contract. Pending
//! operations come back in non-decreasing timestamp order.
//!
//! ### Reduction
//!
//! Before dispatch, the [`SquashReducer`] folds consecutive operations on
//! the same entity into an equivalent shorter sequence: create-then-update
//! becomes a single create, create-then-delete cancels outright.
//!
//! ### Sync engine
//!
//! [`SyncEngine::sync`] drains the pending log: each operation is handed to
//! the [`RemoteAdapter`] registered for its entity type, and the outcome
//! (success, conflict, failure) decides whether the operation is removed,
//! requeued for retry, resolved via the [`ConflictResolver`], or retained
//! as failed.
//!
//! ## Quick Start
//!
//! ```ignore
//! use courier::{MemoryStorage, SyncClient, SyncConfig};
//! use std::sync::Arc;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let client = SyncClient::builder(storage)
//!     .config(SyncConfig::with_device_id("device-1"))
//!     .adapter(Arc::new(ProductApi::new(http)))
//!     .resolver(Arc::new(courier::LastWriteWins))
//!     .build();
//!
//! // Source-of-truth mode: storage and log move together.
//! client.save("product", "p1", payload, Some(true)).await?;
//!
//! // Drain the log against the remote.
//! let report = client.sync().await?;
//! assert_eq!(report.synced, 1);
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod log;
pub mod memory;
pub mod operation;
pub mod reducer;
pub mod remote;
pub mod resolver;
pub mod status;
pub mod storage;

// Re-export main types at crate root
pub use client::{SyncClient, SyncClientBuilder};
pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncReport};
pub use error::{Error, RemoteError, ResolverError, Result, StorageError, StorageResult};
pub use log::OperationLog;
pub use memory::MemoryStorage;
pub use operation::{Operation, OperationKind, OperationStatus};
pub use reducer::{shallow_merge, OperationReducer, Reduction, SquashReducer};
pub use remote::{RemoteAdapter, SyncResult};
pub use resolver::{
    ConflictResolver, FieldMerge, LastWriteWins, LocalState, RemoteState, Resolution,
};
pub use status::{SyncStatus, SyncStatusEvent};
pub use storage::{StorageAdapter, StorageTransaction, TransactionFn};

/// Type aliases for clarity
pub type OperationId = String;
pub type EntityType = String;
pub type EntityId = String;
pub type DeviceId = String;
pub type Timestamp = i64;

/// An entity snapshot or operation payload: an opaque field-to-value map.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
