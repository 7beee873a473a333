use thiserror::Error;

use content_eventstore::EventStoreError;

/// Result type for projection operations.
pub type ProjectionResult<T> = Result<T, ProjectionError>;

/// Errors from the content graph projection and its snapshot storage.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("failed to decode event at sequence {sequence}: {reason}")]
    Decode { sequence: u64, reason: String },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for ProjectionError {
    fn from(e: serde_json::Error) -> Self {
        ProjectionError::Serialization(e.to_string())
    }
}

/// Errors in the node type schema. Raised once, while loading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeTypeError {
    #[error("node type '{node_type}' extends unknown super type '{super_type}'")]
    UnknownSuperType { node_type: String, super_type: String },

    #[error("node type '{0}' inherits from itself")]
    InheritanceCycle(String),

    #[error("reference '{reference}' of node type '{node_type}' is constrained to unknown node type '{target}'")]
    UnknownReferenceTarget {
        node_type: String,
        reference: String,
        target: String,
    },
}
