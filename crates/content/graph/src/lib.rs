//! Content repository domain model and read side.
//!
//! - identifiers, value types, node type schema
//! - commands and the events they produce
//! - the content graph projection: an arena read model keyed by
//!   `(content stream, dimension space point)` with traversal queries

pub mod command;
pub mod error;
pub mod event;
pub mod ids;
pub mod model;
pub mod node_type;
pub mod projection;

pub use command::{ContentStreamCommand, NodeCommand, WorkspaceCommand};
pub use error::{NodeTypeError, ProjectionError, ProjectionResult};
pub use event::ContentRepositoryEvent;
pub use ids::{ContentStreamId, NodeAggregateId, NodeAnchor, NodeName, NodeTypeName, ReferenceName, WorkspaceName};
pub use model::{
    ClosePurpose, ContentStreamStatus, InsertPosition, NodeAggregateClassification,
    NodeIdToPublishOrDiscard, NodeReferenceToWrite, NodeSubtreeSnapshot, NodeVariantSelectionStrategy, PropertyValues,
    RebaseErrorHandlingStrategy, RelationDistributionStrategy,
};
pub use node_type::{NodeType, NodeTypeConfig, NodeTypeManager, PropertyType, ReferenceConfig};
pub use projection::{
    CatchUpStatus, ContentGraph, ContentGraphProjection, ContentStream, ContentSubgraph,
    GraphState, InMemoryProjectionStore, Node, NodeAggregate, ProjectionSnapshot,
    ProjectionStore, ReadTransaction, Reference, Subtree, VisibilityConstraints, Workspace,
    WorkspaceStatus,
};
