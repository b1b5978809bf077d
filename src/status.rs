//! Sync status reporting.
//!
//! The engine publishes progress on a broadcast channel. Subscribers only
//! observe events emitted after they subscribe; a slow subscriber lags and
//! misses events rather than blocking the engine.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;

/// Coarse engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

/// One status event. Progress fields are meaningful while `Syncing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusEvent {
    pub status: SyncStatus,
    pub total: usize,
    pub completed: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl SyncStatusEvent {
    /// The quiescent state.
    pub fn idle() -> Self {
        Self {
            status: SyncStatus::Idle,
            total: 0,
            completed: 0,
            error: None,
        }
    }

    /// A drain in progress.
    pub fn syncing(total: usize, completed: usize) -> Self {
        Self {
            status: SyncStatus::Syncing,
            total,
            completed,
            error: None,
        }
    }

    /// An engine-level failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Error,
            total: 0,
            completed: 0,
            error: Some(message.into()),
        }
    }
}

/// Multi-subscriber status channel with a synchronous last-value read.
pub(crate) struct StatusChannel {
    sender: Mutex<Option<broadcast::Sender<SyncStatusEvent>>>,
    current: Mutex<SyncStatusEvent>,
}

impl StatusChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(Some(sender)),
            current: Mutex::new(SyncStatusEvent::idle()),
        }
    }

    /// Subscribe to events emitted from this point on. After
    /// [`close`](StatusChannel::close), the returned stream ends
    /// immediately.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncStatusEvent> {
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => sender.subscribe(),
            // Sender already dropped: hand out a receiver whose channel is
            // closed so the subscriber sees the end of the stream.
            None => broadcast::channel(1).1,
        }
    }

    /// Record the event as current and fan it out. Emitting with no
    /// subscribers is not an error.
    pub(crate) fn emit(&self, event: SyncStatusEvent) {
        {
            let mut current = self
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *current = event.clone();
        }
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = guard.as_ref() {
            let _ = sender.send(event);
        }
    }

    /// The most recently emitted event.
    pub(crate) fn current(&self) -> SyncStatusEvent {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the sender so every subscriber stream ends.
    pub(crate) fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
