//! Value types shared by commands, events and the read model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use content_dimension::DimensionSpacePoint;

use crate::ids::{NodeAggregateId, NodeName, NodeTypeName, ReferenceName};

/// Property values keyed by property name. `null` unsets a property.
pub type PropertyValues = BTreeMap<String, Value>;

/// Root aggregates cover every allowed point and cannot be varied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAggregateClassification {
    Root,
    Regular,
}

/// Status of a content stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStreamStatus {
    Open,
    /// Writes paused.
    Closed,
    /// Closed while a workspace operation rebuilds on top of it.
    Rebasing,
    /// Terminal.
    Removed,
}

impl ContentStreamStatus {
    pub fn accepts_writes(&self) -> bool {
        matches!(self, ContentStreamStatus::Open)
    }
}

impl fmt::Display for ContentStreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentStreamStatus::Open => "open",
            ContentStreamStatus::Closed => "closed",
            ContentStreamStatus::Rebasing => "rebasing",
            ContentStreamStatus::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Why a content stream was closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosePurpose {
    #[default]
    Pause,
    Rebase,
}

impl ClosePurpose {
    pub fn status(&self) -> ContentStreamStatus {
        match self {
            ClosePurpose::Pause => ContentStreamStatus::Closed,
            ClosePurpose::Rebase => ContentStreamStatus::Rebasing,
        }
    }
}

/// Where a node goes among its new siblings.
///
/// Resolved per dimension space point: a sibling that is absent at a point
/// degrades to [`InsertPosition::Last`] there.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    First,
    #[default]
    Last,
    Before(NodeAggregateId),
    After(NodeAggregateId),
}

/// Which variants of an aggregate a command applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeVariantSelectionStrategy {
    /// Every point the aggregate covers.
    AllVariants,
    /// The given point and all of its specializations.
    #[default]
    AllSpecializations,
    /// Only the given point.
    OnlyGivenVariant,
}

/// Which points a move applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationDistributionStrategy {
    /// Only the given point.
    Scatter,
    /// The given point and its covered specializations.
    #[default]
    GatherSpecializations,
    /// Every covered point.
    GatherAll,
}

/// What to do with commands that fail while being replayed during a rebase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebaseErrorHandlingStrategy {
    /// Abort the rebase and leave the workspace untouched.
    #[default]
    Fail,
    /// Drop conflicting commands and keep the rest.
    Force,
}

/// A reference to write: target plus reference properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeReferenceToWrite {
    pub target: NodeAggregateId,
    #[serde(default)]
    pub properties: PropertyValues,
}

impl NodeReferenceToWrite {
    pub fn to(target: NodeAggregateId) -> Self {
        Self {
            target,
            properties: PropertyValues::new(),
        }
    }
}

/// A subtree captured at one dimension space point, carried by
/// `CopyNodesRecursively` so that replaying the command inserts the same
/// content wherever it runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSubtreeSnapshot {
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<NodeName>,
    #[serde(default)]
    pub properties: PropertyValues,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<ReferenceName, Vec<NodeReferenceToWrite>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_nodes: Vec<NodeSubtreeSnapshot>,
}

impl NodeSubtreeSnapshot {
    /// Every node of the subtree, parents before their children.
    pub fn walk(&self) -> Vec<(&NodeSubtreeSnapshot, Option<&NodeAggregateId>)> {
        let mut nodes = vec![(self, None)];
        let mut cursor = 0;
        while cursor < nodes.len() {
            let (node, _) = nodes[cursor];
            nodes.extend(node.child_nodes.iter().map(|child| (child, Some(&node.node_aggregate_id))));
            cursor += 1;
        }
        nodes
    }

    /// A fresh aggregate id for every node of the subtree.
    pub fn fresh_id_mapping(&self) -> BTreeMap<NodeAggregateId, NodeAggregateId> {
        self.walk()
            .into_iter()
            .map(|(node, _)| (node.node_aggregate_id.clone(), NodeAggregateId::create()))
            .collect()
    }
}

/// Selects changes of a workspace for partial publishing or discarding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdToPublishOrDiscard {
    pub node_aggregate_id: NodeAggregateId,
    /// Restrict the selection to changes made at this point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_space_point: Option<DimensionSpacePoint>,
}

impl NodeIdToPublishOrDiscard {
    pub fn new(node_aggregate_id: NodeAggregateId) -> Self {
        Self {
            node_aggregate_id,
            dimension_space_point: None,
        }
    }

    pub fn at(mut self, point: DimensionSpacePoint) -> Self {
        self.dimension_space_point = Some(point);
        self
    }
}
