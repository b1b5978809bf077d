//! Conflict resolution.
//!
//! When the remote reports a conflicting version of an entity, the engine
//! hands both sides, plus the entity's pending operations, to a resolver
//! and applies its verdict. Two policies ship with the crate: last-write-
//! wins and field-level merge. Domain-specific policies implement
//! [`ConflictResolver`].

use crate::error::ResolverError;
use crate::operation::{Operation, OperationKind};
use crate::{Payload, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The local side of a conflict: the stored snapshot and the timestamp of
/// the operation that tripped the conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalState {
    pub data: Payload,
    pub timestamp: Timestamp,
}

impl LocalState {
    pub fn new(data: Payload, timestamp: Timestamp) -> Self {
        Self { data, timestamp }
    }
}

/// The remote side of a conflict: the server's snapshot and its timestamp
/// (or the observation time when the server supplies none).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteState {
    pub data: Payload,
    pub timestamp: Timestamp,
}

impl RemoteState {
    pub fn new(data: Payload, timestamp: Timestamp) -> Self {
        Self { data, timestamp }
    }
}

/// A resolver's verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Retry the pending operation as-is; the entity is not touched.
    UseLocal,
    /// Overwrite the entity with this snapshot and drop the operation.
    UseRemote(Payload),
    /// Overwrite the entity with this snapshot, rewrite the operation's
    /// payload to it, and requeue the operation.
    Merge(Payload),
    /// No automatic answer; the operation is retained as failed for the
    /// application to handle.
    Manual,
}

/// Decides how local and remote versions of an entity reconcile.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(
        &self,
        local: &LocalState,
        remote: &RemoteState,
        pending: &[Operation],
    ) -> Result<Resolution, ResolverError>;
}

/// Prefer the side with the higher timestamp; ties prefer local.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

#[async_trait]
impl ConflictResolver for LastWriteWins {
    async fn resolve(
        &self,
        local: &LocalState,
        remote: &RemoteState,
        _pending: &[Operation],
    ) -> Result<Resolution, ResolverError> {
        if remote.timestamp > local.timestamp {
            Ok(Resolution::UseRemote(remote.data.clone()))
        } else {
            Ok(Resolution::UseLocal)
        }
    }
}

/// Combine non-overlapping field writes; escalate overlapping ones.
///
/// The fields "written locally" are the union of keys across the pending
/// `Create`/`Update` payloads for the entity. Starting from the remote
/// snapshot, each written field is carried over from local unless the
/// remote holds a different value for it; any such overlap makes the whole
/// conflict manual.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldMerge;

#[async_trait]
impl ConflictResolver for FieldMerge {
    async fn resolve(
        &self,
        local: &LocalState,
        remote: &RemoteState,
        pending: &[Operation],
    ) -> Result<Resolution, ResolverError> {
        // BTreeSet keeps the scan order deterministic.
        let mut written: BTreeSet<&String> = BTreeSet::new();
        for op in pending {
            if matches!(op.kind, OperationKind::Create | OperationKind::Update) {
                written.extend(op.payload.keys());
            }
        }

        let mut merged = remote.data.clone();
        let mut conflicting: Vec<&String> = Vec::new();
        for key in written {
            match (local.data.get(key), remote.data.get(key)) {
                // Remote never saw this field; the local write stands.
                (Some(local_value), None) => {
                    merged.insert(key.clone(), local_value.clone());
                }
                // Both sides agree; the remote value already in `merged`.
                (Some(local_value), Some(remote_value)) if local_value == remote_value => {}
                // Both sides wrote different values.
                (Some(_), Some(_)) => conflicting.push(key),
                // Written by a pending op but gone from the local snapshot.
                (None, _) => {}
            }
        }

        if conflicting.is_empty() {
            Ok(Resolution::Merge(merged))
        } else {
            tracing::debug!(fields = ?conflicting, "field merge escalated to manual");
            Ok(Resolution::Manual)
        }
    }
}
