//! Commands accepted by the write side.
//!
//! Node commands are stored in the metadata of the events they produce, so
//! they must stay serializable and re-targetable at another content stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use content_dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint};

use crate::ids::{ContentStreamId, NodeAggregateId, NodeName, NodeTypeName, ReferenceName, WorkspaceName};
use crate::model::{
    ContentStreamStatus, InsertPosition, NodeIdToPublishOrDiscard, NodeReferenceToWrite, NodeSubtreeSnapshot,
    NodeVariantSelectionStrategy, PropertyValues, RebaseErrorHandlingStrategy,
    RelationDistributionStrategy,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeCommand {
    CreateRootNodeAggregateWithNode {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        node_type_name: NodeTypeName,
    },
    CreateNodeAggregateWithNode {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        node_type_name: NodeTypeName,
        origin_dimension_space_point: OriginDimensionSpacePoint,
        parent_node_aggregate_id: NodeAggregateId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_name: Option<NodeName>,
        #[serde(default)]
        initial_property_values: PropertyValues,
        #[serde(default)]
        position: InsertPosition,
    },
    CreateNodeVariant {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        target_origin: OriginDimensionSpacePoint,
    },
    SetNodeProperties {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        origin_dimension_space_point: OriginDimensionSpacePoint,
        property_values: PropertyValues,
    },
    SetNodeReferences {
        content_stream_id: ContentStreamId,
        source_node_aggregate_id: NodeAggregateId,
        source_origin: OriginDimensionSpacePoint,
        reference_name: ReferenceName,
        references: Vec<NodeReferenceToWrite>,
    },
    DisableNodeAggregate {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        covered_dimension_space_point: DimensionSpacePoint,
        #[serde(default)]
        strategy: NodeVariantSelectionStrategy,
    },
    EnableNodeAggregate {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        covered_dimension_space_point: DimensionSpacePoint,
        #[serde(default)]
        strategy: NodeVariantSelectionStrategy,
    },
    MoveNodeAggregate {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        dimension_space_point: DimensionSpacePoint,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_parent_node_aggregate_id: Option<NodeAggregateId>,
        #[serde(default)]
        position: InsertPosition,
        #[serde(default)]
        strategy: RelationDistributionStrategy,
    },
    RemoveNodeAggregate {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        covered_dimension_space_point: DimensionSpacePoint,
        #[serde(default)]
        strategy: NodeVariantSelectionStrategy,
    },
    RemoveNodesFromAggregate {
        content_stream_id: ContentStreamId,
        node_aggregate_id: NodeAggregateId,
        dimension_space_point_set: DimensionSpacePointSet,
    },
    /// Insert a copy of a captured subtree under new aggregate ids. Every
    /// node of the snapshot needs an entry in `node_aggregate_id_mapping`.
    CopyNodesRecursively {
        content_stream_id: ContentStreamId,
        node_tree_to_insert: NodeSubtreeSnapshot,
        target_origin: OriginDimensionSpacePoint,
        target_parent_node_aggregate_id: NodeAggregateId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_node_name: Option<NodeName>,
        #[serde(default)]
        position: InsertPosition,
        node_aggregate_id_mapping: BTreeMap<NodeAggregateId, NodeAggregateId>,
    },
}

impl NodeCommand {
    pub fn command_type(&self) -> &'static str {
        use NodeCommand::*;
        match self {
            CreateRootNodeAggregateWithNode { .. } => "CreateRootNodeAggregateWithNode",
            CreateNodeAggregateWithNode { .. } => "CreateNodeAggregateWithNode",
            CreateNodeVariant { .. } => "CreateNodeVariant",
            SetNodeProperties { .. } => "SetNodeProperties",
            SetNodeReferences { .. } => "SetNodeReferences",
            DisableNodeAggregate { .. } => "DisableNodeAggregate",
            EnableNodeAggregate { .. } => "EnableNodeAggregate",
            MoveNodeAggregate { .. } => "MoveNodeAggregate",
            RemoveNodeAggregate { .. } => "RemoveNodeAggregate",
            RemoveNodesFromAggregate { .. } => "RemoveNodesFromAggregate",
            CopyNodesRecursively { .. } => "CopyNodesRecursively",
        }
    }

    pub fn content_stream_id(&self) -> ContentStreamId {
        use NodeCommand::*;
        match self {
            CreateRootNodeAggregateWithNode { content_stream_id, .. }
            | CreateNodeAggregateWithNode { content_stream_id, .. }
            | CreateNodeVariant { content_stream_id, .. }
            | SetNodeProperties { content_stream_id, .. }
            | SetNodeReferences { content_stream_id, .. }
            | DisableNodeAggregate { content_stream_id, .. }
            | EnableNodeAggregate { content_stream_id, .. }
            | MoveNodeAggregate { content_stream_id, .. }
            | RemoveNodeAggregate { content_stream_id, .. }
            | RemoveNodesFromAggregate { content_stream_id, .. }
            | CopyNodesRecursively { content_stream_id, .. } => *content_stream_id,
        }
    }

    /// The aggregate the command is about.
    pub fn node_aggregate_id(&self) -> &NodeAggregateId {
        use NodeCommand::*;
        match self {
            CreateRootNodeAggregateWithNode { node_aggregate_id, .. }
            | CreateNodeAggregateWithNode { node_aggregate_id, .. }
            | CreateNodeVariant { node_aggregate_id, .. }
            | SetNodeProperties { node_aggregate_id, .. }
            | DisableNodeAggregate { node_aggregate_id, .. }
            | EnableNodeAggregate { node_aggregate_id, .. }
            | MoveNodeAggregate { node_aggregate_id, .. }
            | RemoveNodeAggregate { node_aggregate_id, .. }
            | RemoveNodesFromAggregate { node_aggregate_id, .. } => node_aggregate_id,
            SetNodeReferences {
                source_node_aggregate_id,
                ..
            } => source_node_aggregate_id,
            // the copy's root, under its new id
            CopyNodesRecursively {
                node_tree_to_insert,
                node_aggregate_id_mapping,
                ..
            } => node_aggregate_id_mapping
                .get(&node_tree_to_insert.node_aggregate_id)
                .unwrap_or(&node_tree_to_insert.node_aggregate_id),
        }
    }

    /// The point the command was issued at, where it has one.
    pub fn dimension_space_point(&self) -> Option<DimensionSpacePoint> {
        use NodeCommand::*;
        match self {
            CreateRootNodeAggregateWithNode { .. } | RemoveNodesFromAggregate { .. } => None,
            CreateNodeAggregateWithNode {
                origin_dimension_space_point,
                ..
            }
            | SetNodeProperties {
                origin_dimension_space_point,
                ..
            } => Some(origin_dimension_space_point.to_point()),
            CreateNodeVariant { target_origin, .. } | CopyNodesRecursively { target_origin, .. } => {
                Some(target_origin.to_point())
            }
            SetNodeReferences { source_origin, .. } => Some(source_origin.to_point()),
            DisableNodeAggregate {
                covered_dimension_space_point,
                ..
            }
            | EnableNodeAggregate {
                covered_dimension_space_point,
                ..
            }
            | RemoveNodeAggregate {
                covered_dimension_space_point,
                ..
            } => Some(covered_dimension_space_point.clone()),
            MoveNodeAggregate {
                dimension_space_point,
                ..
            } => Some(dimension_space_point.clone()),
        }
    }

    /// Whether this command touches the selected change.
    pub fn matches(&self, selection: &NodeIdToPublishOrDiscard) -> bool {
        if self.node_aggregate_id() != &selection.node_aggregate_id {
            return false;
        }
        match &selection.dimension_space_point {
            None => true,
            Some(point) => self.dimension_space_point().map_or(true, |own| &own == point),
        }
    }

    /// Copy of this command re-targeted at another content stream.
    pub fn with_content_stream_id(&self, target: ContentStreamId) -> Self {
        use NodeCommand::*;
        let mut command = self.clone();
        match &mut command {
            CreateRootNodeAggregateWithNode { content_stream_id, .. }
            | CreateNodeAggregateWithNode { content_stream_id, .. }
            | CreateNodeVariant { content_stream_id, .. }
            | SetNodeProperties { content_stream_id, .. }
            | SetNodeReferences { content_stream_id, .. }
            | DisableNodeAggregate { content_stream_id, .. }
            | EnableNodeAggregate { content_stream_id, .. }
            | MoveNodeAggregate { content_stream_id, .. }
            | RemoveNodeAggregate { content_stream_id, .. }
            | RemoveNodesFromAggregate { content_stream_id, .. }
            | CopyNodesRecursively { content_stream_id, .. } => *content_stream_id = target,
        }
        command
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentStreamCommand {
    CreateContentStream {
        content_stream_id: ContentStreamId,
    },
    ForkContentStream {
        new_content_stream_id: ContentStreamId,
        source_content_stream_id: ContentStreamId,
    },
    CloseContentStream {
        content_stream_id: ContentStreamId,
    },
    /// Reopen restores an explicitly given status; it is never inferred.
    ReopenContentStream {
        content_stream_id: ContentStreamId,
        previous_status: ContentStreamStatus,
    },
    RemoveContentStream {
        content_stream_id: ContentStreamId,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkspaceCommand {
    CreateRootWorkspace {
        workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    CreateWorkspace {
        workspace_name: WorkspaceName,
        base_workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    RebaseWorkspace {
        workspace_name: WorkspaceName,
        rebased_content_stream_id: ContentStreamId,
        #[serde(default)]
        error_handling: RebaseErrorHandlingStrategy,
    },
    PublishWorkspace {
        workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    PublishIndividualNodesFromWorkspace {
        workspace_name: WorkspaceName,
        nodes_to_publish: Vec<NodeIdToPublishOrDiscard>,
        content_stream_id_for_matching_part: ContentStreamId,
        content_stream_id_for_remaining_part: ContentStreamId,
    },
    DiscardWorkspace {
        workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    DiscardIndividualNodesFromWorkspace {
        workspace_name: WorkspaceName,
        nodes_to_discard: Vec<NodeIdToPublishOrDiscard>,
        new_content_stream_id: ContentStreamId,
    },
    ChangeBaseWorkspace {
        workspace_name: WorkspaceName,
        base_workspace_name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    },
    DeleteWorkspace {
        workspace_name: WorkspaceName,
    },
}
