use thiserror::Error;

use crate::event::StreamName;

/// Errors from event store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("concurrency conflict on stream {stream}: expected {expected}, found version {actual}")]
    ConcurrencyConflict {
        stream: StreamName,
        expected: String,
        actual: u64,
    },

    #[error("event integrity verification failed at sequence {sequence}")]
    IntegrityFailure { sequence: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("event store is closed")]
    Closed,
}

impl EventStoreError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for EventStoreError {
    fn from(e: serde_json::Error) -> Self {
        EventStoreError::Serialization(e.to_string())
    }
}
