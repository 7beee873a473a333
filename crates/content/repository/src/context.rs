//! Shared write-side runtime and the per-command read context.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use content_dimension::{DimensionSpace, DimensionSpacePoint};
use content_eventstore::{EventMetadata, EventStore, ExpectedVersion, StreamName};
use content_graph::{
    ContentGraph, ContentGraphProjection, ContentRepositoryEvent, ContentStream, ContentStreamId,
    ContentSubgraph, NodeAggregate, NodeAggregateId, NodeType, NodeTypeManager, NodeTypeName,
    PropertyValues, ReadTransaction, VisibilityConstraints, Workspace, WorkspaceName,
};

use crate::config::CatchUpMode;
use crate::error::{ContentRepositoryError, ContentRepositoryResult, InvariantViolation};

/// Outcome of a handled command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandResult {
    /// Global sequence the projection must reach to reflect the command.
    pub sequence: u64,
    /// Number of events the command appended. `0` for a no-op.
    pub events: usize,
}

impl CommandResult {
    pub(crate) fn noop(sequence: u64) -> Self {
        Self { sequence, events: 0 }
    }

    pub fn is_noop(&self) -> bool {
        self.events == 0
    }
}

/// Everything the handlers share: static configuration, the log and the
/// read model.
pub(crate) struct Core {
    pub dimensions: DimensionSpace,
    pub node_types: NodeTypeManager,
    pub events: Arc<dyn EventStore>,
    pub projection: Arc<ContentGraphProjection>,
    pub catch_up: CatchUpMode,
    pub catch_up_timeout: Duration,
}

impl Core {
    /// Open a read context for one command's validation.
    pub async fn context(&self) -> CommandContext<'_> {
        CommandContext {
            tx: self.projection.read().await,
            core: self,
        }
    }

    /// Append one command's events as a single batch.
    pub async fn commit(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        events: &[ContentRepositoryEvent],
        metadata: EventMetadata,
    ) -> ContentRepositoryResult<CommandResult> {
        let batch = events.iter().map(|event| (event.clone(), metadata.clone())).collect();
        self.commit_recorded(stream, expected, batch).await
    }

    /// Append events that keep their own metadata, e.g. changes copied from
    /// another content stream.
    pub async fn commit_recorded(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        events: Vec<(ContentRepositoryEvent, EventMetadata)>,
    ) -> ContentRepositoryResult<CommandResult> {
        let count = events.len();
        let batch = events
            .iter()
            .map(|(event, metadata)| event.to_new_event(metadata.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let appended = self.events.append(stream, expected, batch).await?;
        debug!(
            stream = %stream,
            version = appended.version,
            sequence = appended.sequence,
            events = count,
            "events committed"
        );
        if self.catch_up == CatchUpMode::Synchronous {
            self.projection.catch_up().await?;
        }
        Ok(CommandResult {
            sequence: appended.sequence,
            events: count,
        })
    }

    /// Bring the projection up to the head of the log, whatever the mode.
    pub async fn sync(&self) -> ContentRepositoryResult<u64> {
        Ok(self.projection.catch_up().await?)
    }

    /// Expectation matching the current version of `stream`.
    pub async fn current_version(&self, stream: &StreamName) -> ContentRepositoryResult<ExpectedVersion> {
        Ok(match self.events.stream_version(stream).await? {
            Some(version) => ExpectedVersion::Exact(version),
            None => ExpectedVersion::NoStream,
        })
    }

    pub async fn head(&self) -> ContentRepositoryResult<u64> {
        Ok(self.events.head().await?)
    }
}

/// Read transaction scoped to one command. Validation sees a single
/// consistent state of the read model; nothing is cached past it.
pub struct CommandContext<'a> {
    tx: ReadTransaction,
    core: &'a Core,
}

impl<'a> CommandContext<'a> {
    pub fn graph(&self) -> ContentGraph<'_> {
        self.tx.content_graph()
    }

    /// Unrestricted view of one point; validation must see disabled nodes.
    pub fn subgraph(&self, content_stream_id: ContentStreamId, point: &DimensionSpacePoint) -> ContentSubgraph<'_> {
        self.tx
            .subgraph(content_stream_id, point.clone(), VisibilityConstraints::without_restrictions())
    }

    pub fn dimensions(&self) -> &DimensionSpace {
        &self.core.dimensions
    }

    pub fn checkpoint(&self) -> u64 {
        self.tx.checkpoint()
    }

    pub fn content_stream(&self, id: &ContentStreamId) -> ContentRepositoryResult<ContentStream> {
        self.graph()
            .content_stream(id)
            .ok_or(ContentRepositoryError::ContentStreamDoesNotExist(*id))
    }

    /// The stream, provided it accepts writes.
    pub fn writable_stream(&self, id: &ContentStreamId) -> ContentRepositoryResult<ContentStream> {
        let stream = self.content_stream(id)?;
        if !stream.status.accepts_writes() {
            return Err(ContentRepositoryError::ContentStreamIsClosed {
                id: *id,
                status: stream.status,
            });
        }
        Ok(stream)
    }

    pub fn workspace(&self, name: &WorkspaceName) -> ContentRepositoryResult<Workspace> {
        self.graph()
            .workspace(name)
            .ok_or_else(|| ContentRepositoryError::WorkspaceDoesNotExist(name.clone()))
    }

    pub fn node_aggregate(
        &self,
        content_stream_id: &ContentStreamId,
        id: &NodeAggregateId,
    ) -> ContentRepositoryResult<NodeAggregate> {
        self.graph()
            .find_node_aggregate_by_id(content_stream_id, id)
            .ok_or_else(|| InvariantViolation::NodeAggregateDoesNotExist(id.clone()).into())
    }

    pub fn ensure_aggregate_absent(
        &self,
        content_stream_id: &ContentStreamId,
        id: &NodeAggregateId,
    ) -> ContentRepositoryResult<()> {
        if self.graph().find_node_aggregate_by_id(content_stream_id, id).is_some() {
            return Err(InvariantViolation::NodeAggregateCurrentlyExists(id.clone()).into());
        }
        Ok(())
    }

    pub fn node_type(&self, name: &NodeTypeName) -> ContentRepositoryResult<&'a NodeType> {
        self.core
            .node_types
            .get(name)
            .ok_or_else(|| InvariantViolation::NodeTypeNotFound(name.clone()).into())
    }

    pub fn ensure_allowed(&self, point: &DimensionSpacePoint) -> ContentRepositoryResult<()> {
        Ok(self.core.dimensions.ensure_allowed(point)?)
    }

    pub fn ensure_covers(&self, aggregate: &NodeAggregate, point: &DimensionSpacePoint) -> ContentRepositoryResult<()> {
        if !aggregate.covers(point) {
            return Err(InvariantViolation::NodeAggregateDoesNotCoverPoint {
                node_aggregate_id: aggregate.node_aggregate_id.clone(),
                point: point.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Every property must be declared with a matching type.
    pub fn validate_properties(&self, node_type: &NodeType, values: &PropertyValues) -> ContentRepositoryResult<()> {
        for (property, value) in values {
            let Some(expected) = node_type.property_type(property) else {
                return Err(InvariantViolation::PropertyIsNotDeclared {
                    node_type: node_type.name.clone(),
                    property: property.clone(),
                }
                .into());
            };
            if !expected.accepts(value) {
                return Err(InvariantViolation::PropertyTypeMismatch {
                    node_type: node_type.name.clone(),
                    property: property.clone(),
                    expected,
                }
                .into());
            }
        }
        Ok(())
    }
}
