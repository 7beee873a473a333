//! Domain events. The event log is the only source of truth; everything in
//! the read model is derived from these.

use serde::{Deserialize, Serialize};

use content_dimension::{DimensionSpacePointSet, OriginDimensionSpacePoint};
use content_eventstore::{EventEnvelope, EventMetadata, EventStoreError, NewEvent, StreamName};

use crate::ids::{ContentStreamId, NodeAggregateId, NodeName, NodeTypeName, ReferenceName, WorkspaceName};
use crate::model::{
    ClosePurpose, ContentStreamStatus, InsertPosition, NodeAggregateClassification,
    NodeIdToPublishOrDiscard, NodeReferenceToWrite, PropertyValues,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentRepositoryEvent {
    // ── Content streams ──
    ContentStreamWasCreated {
        content_stream_id: ContentStreamId,
    },
    ContentStreamWasForked {
        new_content_stream_id: ContentStreamId,
        source_content_stream_id: ContentStreamId,
        /// Version of the source stream at the time of the fork.
        version_of_source_content_stream: u64,
    },
    ContentStreamWasClosed {
        content_stream_id: ContentStreamId,
        #[serde(default)]
        purpose: ClosePurpose,
    },
    ContentStreamWasReopened {
        content_stream_id: ContentStreamId,
        previous_status: ContentStreamStatus,
    },
    ContentStreamWasRemoved {
        content_stream_id: ContentStreamId,
    },

    // ── Workspaces ──
    RootWorkspaceWasCreated {
        workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    WorkspaceWasCreated {
        workspace_name: WorkspaceName,
        base_workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    WorkspaceWasRebased {
        workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
        previous_content_stream_id: ContentStreamId,
        /// Commands dropped by a forced rebase.
        #[serde(default)]
        skipped_commands: usize,
    },
    WorkspaceWasPublished {
        source_workspace_name: WorkspaceName,
        target_workspace_name: WorkspaceName,
        new_source_content_stream_id: ContentStreamId,
        previous_source_content_stream_id: ContentStreamId,
    },
    WorkspaceWasPartiallyPublished {
        source_workspace_name: WorkspaceName,
        target_workspace_name: WorkspaceName,
        new_source_content_stream_id: ContentStreamId,
        previous_source_content_stream_id: ContentStreamId,
        published_nodes: Vec<NodeIdToPublishOrDiscard>,
    },
    WorkspaceWasDiscarded {
        workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
        previous_content_stream_id: ContentStreamId,
    },
    WorkspaceWasPartiallyDiscarded {
        workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
        previous_content_stream_id: ContentStreamId,
        discarded_nodes: Vec<NodeIdToPublishOrDiscard>,
    },
    WorkspaceBaseWorkspaceWasChanged {
        workspace_name: WorkspaceName,
        base_workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    WorkspaceWasRemoved {
        workspace_name: WorkspaceName,
    },

    // ── Nodes ──
    RootNodeAggregateWithNodeWasCreated {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        node_type_name: NodeTypeName,
        covered_dimension_space_points: DimensionSpacePointSet,
    },
    NodeAggregateWithNodeWasCreated {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        node_type_name: NodeTypeName,
        origin_dimension_space_point: OriginDimensionSpacePoint,
        covered_dimension_space_points: DimensionSpacePointSet,
        parent_node_aggregate_id: NodeAggregateId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_name: Option<NodeName>,
        #[serde(default)]
        initial_property_values: PropertyValues,
        #[serde(default)]
        position: InsertPosition,
    },
    NodeSpecializationVariantWasCreated {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        specialization_origin: OriginDimensionSpacePoint,
        specialization_coverage: DimensionSpacePointSet,
    },
    NodeGeneralizationVariantWasCreated {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        generalization_origin: OriginDimensionSpacePoint,
        generalization_coverage: DimensionSpacePointSet,
    },
    NodePeerVariantWasCreated {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        peer_origin: OriginDimensionSpacePoint,
        peer_coverage: DimensionSpacePointSet,
    },
    NodePropertiesWereSet {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        origin_dimension_space_point: OriginDimensionSpacePoint,
        property_values: PropertyValues,
    },
    NodeReferencesWereSet {
        content_stream_id: ContentStreamId,
        source_node_aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        reference_name: ReferenceName,
        references: Vec<NodeReferenceToWrite>,
    },
    NodeAggregateWasDisabled {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        affected_dimension_space_points: DimensionSpacePointSet,
    },
    NodeAggregateWasEnabled {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        affected_dimension_space_points: DimensionSpacePointSet,
    },
    NodeAggregateWasMoved {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        /// `None` keeps the current parent and only reorders.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_parent_node_aggregate_id: Option<NodeAggregateId>,
        #[serde(default)]
        position: InsertPosition,
        affected_dimension_space_points: DimensionSpacePointSet,
    },
    NodeAggregateWasRemoved {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        affected_occupied_dimension_space_points: Vec<OriginDimensionSpacePoint>,
        affected_covered_dimension_space_points: DimensionSpacePointSet,
    },
}

impl ContentRepositoryEvent {
    pub fn event_type(&self) -> &'static str {
        use ContentRepositoryEvent::*;
        match self {
            ContentStreamWasCreated { .. } => "ContentStreamWasCreated",
            ContentStreamWasForked { .. } => "ContentStreamWasForked",
            ContentStreamWasClosed { .. } => "ContentStreamWasClosed",
            ContentStreamWasReopened { .. } => "ContentStreamWasReopened",
            ContentStreamWasRemoved { .. } => "ContentStreamWasRemoved",
            RootWorkspaceWasCreated { .. } => "RootWorkspaceWasCreated",
            WorkspaceWasCreated { .. } => "WorkspaceWasCreated",
            WorkspaceWasRebased { .. } => "WorkspaceWasRebased",
            WorkspaceWasPublished { .. } => "WorkspaceWasPublished",
            WorkspaceWasPartiallyPublished { .. } => "WorkspaceWasPartiallyPublished",
            WorkspaceWasDiscarded { .. } => "WorkspaceWasDiscarded",
            WorkspaceWasPartiallyDiscarded { .. } => "WorkspaceWasPartiallyDiscarded",
            WorkspaceBaseWorkspaceWasChanged { .. } => "WorkspaceBaseWorkspaceWasChanged",
            WorkspaceWasRemoved { .. } => "WorkspaceWasRemoved",
            RootNodeAggregateWithNodeWasCreated { .. } => "RootNodeAggregateWithNodeWasCreated",
            NodeAggregateWithNodeWasCreated { .. } => "NodeAggregateWithNodeWasCreated",
            NodeSpecializationVariantWasCreated { .. } => "NodeSpecializationVariantWasCreated",
            NodeGeneralizationVariantWasCreated { .. } => "NodeGeneralizationVariantWasCreated",
            NodePeerVariantWasCreated { .. } => "NodePeerVariantWasCreated",
            NodePropertiesWereSet { .. } => "NodePropertiesWereSet",
            NodeReferencesWereSet { .. } => "NodeReferencesWereSet",
            NodeAggregateWasDisabled { .. } => "NodeAggregateWasDisabled",
            NodeAggregateWasEnabled { .. } => "NodeAggregateWasEnabled",
            NodeAggregateWasMoved { .. } => "NodeAggregateWasMoved",
            NodeAggregateWasRemoved { .. } => "NodeAggregateWasRemoved",
        }
    }

    /// The content stream a node or content stream event belongs to.
    pub fn content_stream_id(&self) -> Option<ContentStreamId> {
        use ContentRepositoryEvent::*;
        match self {
            ContentStreamWasCreated { content_stream_id }
            | ContentStreamWasClosed { content_stream_id, .. }
            | ContentStreamWasReopened { content_stream_id, .. }
            | ContentStreamWasRemoved { content_stream_id }
            | RootNodeAggregateWithNodeWasCreated { content_stream_id, .. }
            | NodeAggregateWithNodeWasCreated { content_stream_id, .. }
            | NodeSpecializationVariantWasCreated { content_stream_id, .. }
            | NodeGeneralizationVariantWasCreated { content_stream_id, .. }
            | NodePeerVariantWasCreated { content_stream_id, .. }
            | NodePropertiesWereSet { content_stream_id, .. }
            | NodeReferencesWereSet { content_stream_id, .. }
            | NodeAggregateWasDisabled { content_stream_id, .. }
            | NodeAggregateWasEnabled { content_stream_id, .. }
            | NodeAggregateWasMoved { content_stream_id, .. }
            | NodeAggregateWasRemoved { content_stream_id, .. } => Some(*content_stream_id),
            ContentStreamWasForked {
                new_content_stream_id,
                ..
            } => Some(*new_content_stream_id),
            _ => None,
        }
    }

    pub fn is_node_event(&self) -> bool {
        use ContentRepositoryEvent::*;
        matches!(
            self,
            RootNodeAggregateWithNodeWasCreated { .. }
                | NodeAggregateWithNodeWasCreated { .. }
                | NodeSpecializationVariantWasCreated { .. }
                | NodeGeneralizationVariantWasCreated { .. }
                | NodePeerVariantWasCreated { .. }
                | NodePropertiesWereSet { .. }
                | NodeReferencesWereSet { .. }
                | NodeAggregateWasDisabled { .. }
                | NodeAggregateWasEnabled { .. }
                | NodeAggregateWasMoved { .. }
                | NodeAggregateWasRemoved { .. }
        )
    }

    /// Copy of a node event re-targeted at another content stream. Other
    /// events are returned unchanged.
    pub fn with_content_stream_id(&self, target: ContentStreamId) -> Self {
        use ContentRepositoryEvent::*;
        let mut event = self.clone();
        match &mut event {
            RootNodeAggregateWithNodeWasCreated { content_stream_id, .. }
            | NodeAggregateWithNodeWasCreated { content_stream_id, .. }
            | NodeSpecializationVariantWasCreated { content_stream_id, .. }
            | NodeGeneralizationVariantWasCreated { content_stream_id, .. }
            | NodePeerVariantWasCreated { content_stream_id, .. }
            | NodePropertiesWereSet { content_stream_id, .. }
            | NodeReferencesWereSet { content_stream_id, .. }
            | NodeAggregateWasDisabled { content_stream_id, .. }
            | NodeAggregateWasEnabled { content_stream_id, .. }
            | NodeAggregateWasMoved { content_stream_id, .. }
            | NodeAggregateWasRemoved { content_stream_id, .. } => *content_stream_id = target,
            _ => {}
        }
        event
    }

    /// Name of the stream this event is appended to.
    pub fn stream_name(&self) -> StreamName {
        use ContentRepositoryEvent::*;
        match self {
            RootWorkspaceWasCreated { workspace_name, .. }
            | WorkspaceWasCreated { workspace_name, .. }
            | WorkspaceWasRebased { workspace_name, .. }
            | WorkspaceWasDiscarded { workspace_name, .. }
            | WorkspaceWasPartiallyDiscarded { workspace_name, .. }
            | WorkspaceBaseWorkspaceWasChanged { workspace_name, .. }
            | WorkspaceWasRemoved { workspace_name } => workspace_name.stream_name(),
            WorkspaceWasPublished {
                source_workspace_name,
                ..
            }
            | WorkspaceWasPartiallyPublished {
                source_workspace_name,
                ..
            } => source_workspace_name.stream_name(),
            other => match other.content_stream_id() {
                Some(id) => id.stream_name(),
                None => StreamName::new("ContentRepository"),
            },
        }
    }

    pub fn to_new_event(&self, metadata: EventMetadata) -> Result<NewEvent, EventStoreError> {
        Ok(NewEvent::from_typed(self.event_type(), self)?.with_metadata(metadata))
    }

    pub fn from_envelope(envelope: &EventEnvelope) -> Result<Self, EventStoreError> {
        envelope.decode()
    }
}
