use thiserror::Error;

use content_dimension::DimensionError;
use content_eventstore::EventStoreError;
use content_graph::{
    ContentStreamId, ContentStreamStatus, NodeAggregateId, NodeName, NodeTypeError, NodeTypeName,
    ProjectionError, PropertyType, ReferenceName, WorkspaceName,
};

/// Result type for repository operations.
pub type ContentRepositoryResult<T> = Result<T, ContentRepositoryError>;

/// Errors surfaced by the content repository.
#[derive(Debug, Error)]
pub enum ContentRepositoryError {
    /// Invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("content stream {0} does not exist")]
    ContentStreamDoesNotExist(ContentStreamId),

    #[error("content stream {0} already exists")]
    ContentStreamAlreadyExists(ContentStreamId),

    #[error("content stream {id} does not accept writes, it is {status}")]
    ContentStreamIsClosed {
        id: ContentStreamId,
        status: ContentStreamStatus,
    },

    #[error("content stream {0} is not closed")]
    ContentStreamIsNotClosed(ContentStreamId),

    #[error("workspace '{0}' does not exist")]
    WorkspaceDoesNotExist(WorkspaceName),

    #[error("workspace '{0}' already exists")]
    WorkspaceAlreadyExists(WorkspaceName),

    #[error("workspace '{0}' has no base workspace")]
    WorkspaceHasNoBase(WorkspaceName),

    #[error("workspace '{0}' is outdated, rebase it first")]
    WorkspaceIsOutdated(WorkspaceName),

    #[error("workspace '{0}' contains unpublished changes")]
    WorkspaceHasPendingChanges(WorkspaceName),

    #[error("workspace '{workspace}' is the base of {dependents:?}")]
    WorkspaceHasDependents {
        workspace: WorkspaceName,
        dependents: Vec<WorkspaceName>,
    },

    #[error("using '{base}' as base of '{workspace}' would create a cycle")]
    BaseWorkspaceCycle {
        workspace: WorkspaceName,
        base: WorkspaceName,
    },

    #[error("rebase of workspace '{workspace}' failed with {} conflicting command(s)", conflicts.len())]
    WorkspaceRebaseFailed {
        workspace: WorkspaceName,
        conflicts: Vec<CommandConflict>,
    },

    #[error("projection at {checkpoint} did not reach {requested} in time")]
    ProjectionLagging { checkpoint: u64, requested: u64 },

    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),

    #[error("event store error: {0}")]
    EventStore(EventStoreError),

    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ContentRepositoryError {
    /// Whether re-running the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ContentRepositoryError::ConcurrencyConflict(_)
                | ContentRepositoryError::ContentStreamIsClosed { .. }
                | ContentRepositoryError::ProjectionLagging { .. }
        )
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, ContentRepositoryError::InvariantViolation(_))
    }
}

impl From<EventStoreError> for ContentRepositoryError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict { .. } => ContentRepositoryError::ConcurrencyConflict(e.to_string()),
            other => ContentRepositoryError::EventStore(other),
        }
    }
}

impl From<DimensionError> for ContentRepositoryError {
    fn from(e: DimensionError) -> Self {
        match e {
            DimensionError::PointNotAllowed(point) | DimensionError::InvalidPoint(point) => {
                InvariantViolation::DimensionSpacePointNotAllowed(point).into()
            }
            other => ContentRepositoryError::Configuration(other.to_string()),
        }
    }
}

impl From<NodeTypeError> for ContentRepositoryError {
    fn from(e: NodeTypeError) -> Self {
        ContentRepositoryError::Configuration(e.to_string())
    }
}

impl From<serde_json::Error> for ContentRepositoryError {
    fn from(e: serde_json::Error) -> Self {
        ContentRepositoryError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for ContentRepositoryError {
    fn from(e: serde_yaml::Error) -> Self {
        ContentRepositoryError::Configuration(e.to_string())
    }
}

/// A command that could not be replayed during a rebase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConflict {
    pub command_type: String,
    pub node_aggregate_id: NodeAggregateId,
    pub reason: String,
}

/// A command was rejected by a domain rule. Nothing was appended.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("node aggregate {0} does not exist")]
    NodeAggregateDoesNotExist(NodeAggregateId),

    #[error("node aggregate {0} already exists")]
    NodeAggregateCurrentlyExists(NodeAggregateId),

    #[error("node aggregate {0} is a root node aggregate")]
    NodeAggregateIsRoot(NodeAggregateId),

    #[error("node type '{0}' is not declared")]
    NodeTypeNotFound(NodeTypeName),

    #[error("node type '{0}' is abstract")]
    NodeTypeIsAbstract(NodeTypeName),

    #[error("node type '{0}' is not a root type")]
    NodeTypeIsNotRoot(NodeTypeName),

    #[error("node type '{0}' is a root type")]
    NodeTypeIsRoot(NodeTypeName),

    #[error("a root node aggregate of type '{0}' already exists")]
    RootNodeAggregateTypeAlreadyOccupied(NodeTypeName),

    #[error("dimension space point {0} is not allowed")]
    DimensionSpacePointNotAllowed(String),

    #[error("node aggregate {node_aggregate_id} has no variant at {origin}")]
    DimensionSpacePointIsNotYetOccupied {
        node_aggregate_id: NodeAggregateId,
        origin: String,
    },

    #[error("node aggregate {node_aggregate_id} already has a variant at {origin}")]
    DimensionSpacePointIsAlreadyOccupied {
        node_aggregate_id: NodeAggregateId,
        origin: String,
    },

    #[error("node aggregate {node_aggregate_id} does not cover {point}")]
    NodeAggregateDoesNotCoverPoint {
        node_aggregate_id: NodeAggregateId,
        point: String,
    },

    #[error("parent node aggregate {parent} does not cover {point}")]
    ParentDoesNotCoverPoint { parent: NodeAggregateId, point: String },

    #[error("parent {parent} already has a child named '{name}'")]
    NodeNameIsAlreadyCovered { parent: NodeAggregateId, name: NodeName },

    #[error("property '{property}' is not declared on node type '{node_type}'")]
    PropertyIsNotDeclared { node_type: NodeTypeName, property: String },

    #[error("property '{property}' of node type '{node_type}' expects {expected:?}")]
    PropertyTypeMismatch {
        node_type: NodeTypeName,
        property: String,
        expected: PropertyType,
    },

    #[error("reference '{reference}' is not declared on node type '{node_type}'")]
    ReferenceIsNotDeclared {
        node_type: NodeTypeName,
        reference: ReferenceName,
    },

    #[error("reference '{reference}' does not accept target {target} of type '{target_type}'")]
    ReferenceTargetTypeNotAllowed {
        reference: ReferenceName,
        target: NodeAggregateId,
        target_type: NodeTypeName,
    },

    #[error("point set for {node_aggregate_id} is missing covered specialization {missing}")]
    PointSetNotGeneralizationClosed {
        node_aggregate_id: NodeAggregateId,
        missing: String,
    },

    #[error("point set for {0} is empty")]
    EmptyPointSet(NodeAggregateId),

    #[error("no new node aggregate id is mapped for {0}")]
    NodeAggregateIdNotMapped(NodeAggregateId),

    #[error("moving {node_aggregate_id} below {new_parent} would create a cycle")]
    CyclicMove {
        node_aggregate_id: NodeAggregateId,
        new_parent: NodeAggregateId,
    },
}
