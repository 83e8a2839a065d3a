//! Store error type

use thiserror::Error;
use uuid::Uuid;

use tabflow_core::RunError;

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("flow not found: {0}")]
    FlowNotFound(Uuid),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("queue item not found: {0}")]
    QueueItemNotFound(Uuid),

    #[error("trigger not found: {0}")]
    TriggerNotFound(Uuid),

    /// The run is terminal; no further status changes or events
    #[error("run {0} is terminal")]
    RunTerminal(Uuid),

    /// A record already exists where a fresh insert was required
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("flow schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersion { expected: u32, actual: u32 },

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend failure; the enclosing operation was rolled back
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        RunError::internal(err.to_string())
    }
}
