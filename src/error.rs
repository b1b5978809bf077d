//! Error types for the Courier engine.

use crate::OperationId;
use thiserror::Error;

/// Errors reported by storage backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("duplicate operation: {0}")]
    DuplicateOperation(OperationId),

    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("transaction rolled back")]
    TransactionRolledBack,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage contract calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors reported by remote adapters.
///
/// An adapter error is distinct from a [`SyncResult::Failure`]: the latter
/// is a remote *verdict* on the operation, while this type covers faults in
/// reaching a verdict at all. The engine treats adapter errors as retryable.
///
/// [`SyncResult::Failure`]: crate::remote::SyncResult::Failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("invalid remote response: {0}")]
    InvalidResponse(String),
}

/// Error raised by a conflict resolver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("resolver failed: {0}")]
pub struct ResolverError(pub String);

impl ResolverError {
    /// Create a resolver error from any displayable cause.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Engine-level errors.
///
/// Per-operation failures never surface here; they are recorded on the
/// retained operation (`status = Failed`, `error_message`). This type covers
/// faults that abort a drain outright.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sync already in progress")]
    AlreadySyncing,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
