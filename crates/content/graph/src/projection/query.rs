//! Read access to the content graph.

use std::collections::{BTreeMap, BTreeSet};

use content_dimension::{DimensionSpacePoint, DimensionSpacePointSet, OriginDimensionSpacePoint};

use crate::ids::{ContentStreamId, NodeAggregateId, NodeName, NodeTypeName, ReferenceName, WorkspaceName};
use crate::model::{
    ContentStreamStatus, NodeAggregateClassification, NodeReferenceToWrite, NodeSubtreeSnapshot, PropertyValues,
};
use crate::projection::state::{
    AggregateRecord, ContentStreamRecord, GraphState, StreamGraph, Subgraph, WorkspaceRecord,
};

/// Which restricted nodes a query returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VisibilityConstraints {
    pub include_disabled: bool,
}

impl VisibilityConstraints {
    /// Hides disabled nodes and everything below them.
    pub fn frontend() -> Self {
        Self {
            include_disabled: false,
        }
    }

    pub fn without_restrictions() -> Self {
        Self {
            include_disabled: true,
        }
    }
}

/// A node variant as seen from one dimension space point.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub origin_dimension_space_point: OriginDimensionSpacePoint,
    /// The point the node is being viewed from.
    pub dimension_space_point: DimensionSpacePoint,
    pub node_type_name: NodeTypeName,
    pub node_name: Option<NodeName>,
    pub classification: NodeAggregateClassification,
    pub properties: PropertyValues,
    pub parent_node_aggregate_id: Option<NodeAggregateId>,
    /// Disabled here or below a disabled ancestor.
    pub restricted: bool,
}

impl Node {
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.get(name)
    }
}

/// A reference edge resolved to its other end.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub name: ReferenceName,
    pub properties: PropertyValues,
    pub node: Node,
}

/// A node with its descendants, as returned by [`ContentSubgraph::find_subtree`].
#[derive(Clone, Debug, PartialEq)]
pub struct Subtree {
    pub level: usize,
    pub node: Node,
    pub children: Vec<Subtree>,
}

impl Subtree {
    /// Number of nodes in this subtree.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(Subtree::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// All variants of one node aggregate in one content stream.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeAggregate {
    pub content_stream_id: ContentStreamId,
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    pub node_name: Option<NodeName>,
    pub classification: NodeAggregateClassification,
    pub occupied_dimension_space_points: BTreeSet<OriginDimensionSpacePoint>,
    /// Covered point -> origin of the variant visible there.
    pub coverage_by_origin: BTreeMap<DimensionSpacePoint, OriginDimensionSpacePoint>,
    pub disabled_dimension_space_points: DimensionSpacePointSet,
}

impl NodeAggregate {
    fn from_record(content_stream_id: ContentStreamId, record: &AggregateRecord) -> Self {
        Self {
            content_stream_id,
            node_aggregate_id: record.node_aggregate_id.clone(),
            node_type_name: record.node_type_name.clone(),
            node_name: record.node_name.clone(),
            classification: record.classification,
            occupied_dimension_space_points: record
                .occupation
                .values()
                .map(|o| o.origin.clone())
                .collect(),
            coverage_by_origin: record
                .coverage
                .values()
                .map(|c| (c.point.clone(), c.origin.clone()))
                .collect(),
            disabled_dimension_space_points: record.disabled.values().cloned().collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.classification == NodeAggregateClassification::Root
    }

    pub fn covers(&self, point: &DimensionSpacePoint) -> bool {
        self.coverage_by_origin.contains_key(point)
    }

    pub fn occupies(&self, origin: &OriginDimensionSpacePoint) -> bool {
        self.occupied_dimension_space_points.contains(origin)
    }

    pub fn covering_origin(&self, point: &DimensionSpacePoint) -> Option<&OriginDimensionSpacePoint> {
        self.coverage_by_origin.get(point)
    }

    pub fn covered_dimension_space_points(&self) -> DimensionSpacePointSet {
        self.coverage_by_origin.keys().cloned().collect()
    }

    /// Points covered by the variant at `origin`.
    pub fn coverage_of(&self, origin: &OriginDimensionSpacePoint) -> DimensionSpacePointSet {
        self.coverage_by_origin
            .iter()
            .filter(|(_, o)| *o == origin)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn is_disabled_at(&self, point: &DimensionSpacePoint) -> bool {
        self.disabled_dimension_space_points.contains(point)
    }
}

/// Content stream as known to the read model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentStream {
    pub id: ContentStreamId,
    pub status: ContentStreamStatus,
    pub source_content_stream_id: Option<ContentStreamId>,
    pub source_content_stream_version: Option<u64>,
    pub version: u64,
}

impl From<&ContentStreamRecord> for ContentStream {
    fn from(record: &ContentStreamRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            source_content_stream_id: record.source_content_stream_id,
            source_content_stream_version: record.source_content_stream_version,
            version: record.version,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceStatus {
    UpToDate,
    /// The base workspace moved on since this workspace was last forked.
    Outdated,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    pub name: WorkspaceName,
    pub base_workspace_name: Option<WorkspaceName>,
    pub current_content_stream_id: ContentStreamId,
    pub status: WorkspaceStatus,
}

impl Workspace {
    pub fn is_root(&self) -> bool {
        self.base_workspace_name.is_none()
    }
}

// ---------------------------------------------------------------------------
// ContentGraph: queries across dimension space points
// ---------------------------------------------------------------------------

pub struct ContentGraph<'a> {
    state: &'a GraphState,
}

impl<'a> ContentGraph<'a> {
    pub(crate) fn new(state: &'a GraphState) -> Self {
        Self { state }
    }

    pub fn content_stream(&self, id: &ContentStreamId) -> Option<ContentStream> {
        self.state.content_streams.get(id).map(ContentStream::from)
    }

    pub fn content_streams(&self) -> Vec<ContentStream> {
        let mut streams: Vec<ContentStream> =
            self.state.content_streams.values().map(ContentStream::from).collect();
        streams.sort_by_key(|s| s.id);
        streams
    }

    pub fn workspace(&self, name: &WorkspaceName) -> Option<Workspace> {
        self.state.workspaces.get(name).map(|w| self.workspace_view(w))
    }

    pub fn workspaces(&self) -> Vec<Workspace> {
        self.state
            .workspaces
            .values()
            .map(|w| self.workspace_view(w))
            .collect()
    }

    /// Workspaces whose base is `name`.
    pub fn dependent_workspaces(&self, name: &WorkspaceName) -> Vec<Workspace> {
        self.state
            .workspaces
            .values()
            .filter(|w| w.base_workspace_name.as_ref() == Some(name))
            .map(|w| self.workspace_view(w))
            .collect()
    }

    pub fn workspace_by_content_stream(&self, id: &ContentStreamId) -> Option<Workspace> {
        self.state
            .workspaces
            .values()
            .find(|w| &w.current_content_stream_id == id)
            .map(|w| self.workspace_view(w))
    }

    fn workspace_view(&self, record: &WorkspaceRecord) -> Workspace {
        let status = match &record.base_workspace_name {
            None => WorkspaceStatus::UpToDate,
            Some(base) => {
                let own = self.state.content_streams.get(&record.current_content_stream_id);
                let base_stream = self
                    .state
                    .workspaces
                    .get(base)
                    .and_then(|b| self.state.content_streams.get(&b.current_content_stream_id));
                match (own, base_stream) {
                    (Some(own), Some(base_stream))
                        if own.source_content_stream_id == Some(base_stream.id)
                            && own.source_content_stream_version == Some(base_stream.version) =>
                    {
                        WorkspaceStatus::UpToDate
                    }
                    _ => WorkspaceStatus::Outdated,
                }
            }
        };
        Workspace {
            name: record.name.clone(),
            base_workspace_name: record.base_workspace_name.clone(),
            current_content_stream_id: record.current_content_stream_id,
            status,
        }
    }

    pub fn find_node_aggregate_by_id(
        &self,
        content_stream_id: &ContentStreamId,
        id: &NodeAggregateId,
    ) -> Option<NodeAggregate> {
        let graph = self.state.graphs.get(content_stream_id)?;
        graph
            .aggregates
            .get(id)
            .map(|record| NodeAggregate::from_record(*content_stream_id, record))
    }

    pub fn find_root_node_aggregates(&self, content_stream_id: &ContentStreamId) -> Vec<NodeAggregate> {
        let Some(graph) = self.state.graphs.get(content_stream_id) else {
            return Vec::new();
        };
        let mut roots: Vec<NodeAggregate> = graph
            .aggregates
            .values()
            .filter(|a| a.classification == NodeAggregateClassification::Root)
            .map(|a| NodeAggregate::from_record(*content_stream_id, a))
            .collect();
        roots.sort_by(|a, b| a.node_aggregate_id.cmp(&b.node_aggregate_id));
        roots
    }

    pub fn find_root_node_aggregate_by_type(
        &self,
        content_stream_id: &ContentStreamId,
        node_type_name: &NodeTypeName,
    ) -> Option<NodeAggregate> {
        self.find_root_node_aggregates(content_stream_id)
            .into_iter()
            .find(|a| &a.node_type_name == node_type_name)
    }

    /// Distinct parent aggregates of `child` over all covered points.
    pub fn find_parent_node_aggregates(
        &self,
        content_stream_id: &ContentStreamId,
        child: &NodeAggregateId,
    ) -> Vec<NodeAggregate> {
        let Some(graph) = self.state.graphs.get(content_stream_id) else {
            return Vec::new();
        };
        let Some(record) = graph.aggregates.get(child) else {
            return Vec::new();
        };
        let parents: BTreeSet<&NodeAggregateId> = record
            .coverage
            .values()
            .filter_map(|c| graph.subgraph(&c.point))
            .filter_map(|s| s.parents.get(child))
            .collect();
        parents
            .into_iter()
            .filter_map(|p| graph.aggregates.get(p))
            .map(|a| NodeAggregate::from_record(*content_stream_id, a))
            .collect()
    }

    /// Distinct child aggregates of `parent` over all points `parent` covers.
    pub fn find_child_node_aggregates(
        &self,
        content_stream_id: &ContentStreamId,
        parent: &NodeAggregateId,
    ) -> Vec<NodeAggregate> {
        let Some(graph) = self.state.graphs.get(content_stream_id) else {
            return Vec::new();
        };
        let Some(record) = graph.aggregates.get(parent) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut children = Vec::new();
        for coverage in record.coverage.values() {
            let Some(subgraph) = graph.subgraph(&coverage.point) else {
                continue;
            };
            for child in subgraph.children_of(parent) {
                if seen.insert(child.clone()) {
                    if let Some(aggregate) = graph.aggregates.get(child) {
                        children.push(NodeAggregate::from_record(*content_stream_id, aggregate));
                    }
                }
            }
        }
        children
    }

    /// Number of node aggregates in a content stream.
    pub fn count_node_aggregates(&self, content_stream_id: &ContentStreamId) -> usize {
        self.state
            .graphs
            .get(content_stream_id)
            .map_or(0, |g| g.aggregates.len())
    }
}

// ---------------------------------------------------------------------------
// ContentSubgraph: queries at one dimension space point
// ---------------------------------------------------------------------------

/// The node tree of one content stream as seen from one dimension space
/// point.
pub struct ContentSubgraph<'a> {
    content_stream_id: ContentStreamId,
    dimension_space_point: DimensionSpacePoint,
    visibility: VisibilityConstraints,
    graph: Option<&'a StreamGraph>,
    subgraph: Option<&'a Subgraph>,
    state: &'a GraphState,
}

impl<'a> ContentSubgraph<'a> {
    pub(crate) fn new(
        state: &'a GraphState,
        content_stream_id: ContentStreamId,
        dimension_space_point: DimensionSpacePoint,
        visibility: VisibilityConstraints,
    ) -> Self {
        let graph = state.graphs.get(&content_stream_id);
        let subgraph = graph.and_then(|g| g.subgraph(&dimension_space_point));
        Self {
            content_stream_id,
            dimension_space_point,
            visibility,
            graph,
            subgraph,
            state,
        }
    }

    pub fn content_stream_id(&self) -> ContentStreamId {
        self.content_stream_id
    }

    pub fn dimension_space_point(&self) -> &DimensionSpacePoint {
        &self.dimension_space_point
    }

    pub fn visibility(&self) -> VisibilityConstraints {
        self.visibility
    }

    pub fn find_node_by_aggregate_id(&self, id: &NodeAggregateId) -> Option<Node> {
        let node = self.build_node(id)?;
        (self.visibility.include_disabled || !node.restricted).then_some(node)
    }

    pub fn find_root_nodes(&self) -> Vec<Node> {
        let Some(subgraph) = self.subgraph else {
            return Vec::new();
        };
        subgraph
            .roots
            .iter()
            .filter_map(|id| self.find_node_by_aggregate_id(id))
            .collect()
    }

    /// Children of `parent` in their stored order.
    pub fn find_child_nodes(&self, parent: &NodeAggregateId) -> Vec<Node> {
        if self.find_node_by_aggregate_id(parent).is_none() {
            return Vec::new();
        }
        let Some(subgraph) = self.subgraph else {
            return Vec::new();
        };
        subgraph
            .children_of(parent)
            .iter()
            .filter_map(|id| self.find_node_by_aggregate_id(id))
            .collect()
    }

    pub fn find_child_node_by_name(&self, parent: &NodeAggregateId, name: &NodeName) -> Option<Node> {
        self.find_child_nodes(parent)
            .into_iter()
            .find(|n| n.node_name.as_ref() == Some(name))
    }

    pub fn find_parent_node(&self, child: &NodeAggregateId) -> Option<Node> {
        let child = self.find_node_by_aggregate_id(child)?;
        self.find_node_by_aggregate_id(child.parent_node_aggregate_id.as_ref()?)
    }

    /// Outgoing references of `source`, optionally of one name only.
    pub fn find_referenced_nodes(
        &self,
        source: &NodeAggregateId,
        name: Option<&ReferenceName>,
    ) -> Vec<Reference> {
        if self.find_node_by_aggregate_id(source).is_none() {
            return Vec::new();
        }
        let Some(record) = self.record_of(source) else {
            return Vec::new();
        };
        let mut references = Vec::new();
        for (reference_name, targets) in &record.references {
            if name.is_some_and(|n| n != reference_name) {
                continue;
            }
            for target in targets {
                if let Some(node) = self.find_node_by_aggregate_id(&target.target) {
                    references.push(Reference {
                        name: reference_name.clone(),
                        properties: target.properties.clone(),
                        node,
                    });
                }
            }
        }
        references
    }

    /// Incoming references of `target`, optionally of one name only.
    pub fn find_referencing_nodes(
        &self,
        target: &NodeAggregateId,
        name: Option<&ReferenceName>,
    ) -> Vec<Reference> {
        if self.find_node_by_aggregate_id(target).is_none() {
            return Vec::new();
        }
        let Some(graph) = self.graph else {
            return Vec::new();
        };
        let mut sources: Vec<&NodeAggregateId> = graph.aggregates.keys().collect();
        sources.sort();

        let mut references = Vec::new();
        for source in sources {
            let Some(record) = self.record_of(source) else {
                continue;
            };
            for (reference_name, targets) in &record.references {
                if name.is_some_and(|n| n != reference_name) {
                    continue;
                }
                for reference in targets.iter().filter(|r| &r.target == target) {
                    if let Some(node) = self.find_node_by_aggregate_id(source) {
                        references.push(Reference {
                            name: reference_name.clone(),
                            properties: reference.properties.clone(),
                            node,
                        });
                    }
                }
            }
        }
        references
    }

    /// `root` and its descendants down to `max_levels` below it.
    pub fn find_subtree(&self, root: &NodeAggregateId, max_levels: usize) -> Option<Subtree> {
        let node = self.find_node_by_aggregate_id(root)?;
        Some(self.build_subtree(node, 0, max_levels))
    }

    /// Capture `root` with its properties, outgoing references and visible
    /// descendants, ready to be copied elsewhere.
    pub fn snapshot_subtree(&self, root: &NodeAggregateId) -> Option<NodeSubtreeSnapshot> {
        let node = self.find_node_by_aggregate_id(root)?;
        Some(self.snapshot_node(node))
    }

    fn snapshot_node(&self, node: Node) -> NodeSubtreeSnapshot {
        let mut references: BTreeMap<ReferenceName, Vec<NodeReferenceToWrite>> = BTreeMap::new();
        for reference in self.find_referenced_nodes(&node.node_aggregate_id, None) {
            references.entry(reference.name).or_default().push(NodeReferenceToWrite {
                target: reference.node.node_aggregate_id,
                properties: reference.properties,
            });
        }
        let child_nodes = self
            .find_child_nodes(&node.node_aggregate_id)
            .into_iter()
            .map(|child| self.snapshot_node(child))
            .collect();
        NodeSubtreeSnapshot {
            node_aggregate_id: node.node_aggregate_id,
            node_type_name: node.node_type_name,
            node_name: node.node_name,
            properties: node.properties,
            references,
            child_nodes,
        }
    }

    /// Number of visible nodes in this subgraph.
    pub fn count_nodes(&self) -> usize {
        self.find_root_nodes()
            .into_iter()
            .filter_map(|root| self.find_subtree(&root.node_aggregate_id, usize::MAX))
            .map(|tree| tree.len())
            .sum()
    }

    fn build_subtree(&self, node: Node, level: usize, max_levels: usize) -> Subtree {
        let children = if level < max_levels {
            self.find_child_nodes(&node.node_aggregate_id)
                .into_iter()
                .map(|child| self.build_subtree(child, level + 1, max_levels))
                .collect()
        } else {
            Vec::new()
        };
        Subtree {
            level,
            node,
            children,
        }
    }

    fn record_of(&self, id: &NodeAggregateId) -> Option<&'a crate::projection::state::NodeRecord> {
        let aggregate = self.graph?.aggregates.get(id)?;
        let origin = aggregate.covering_origin(&self.dimension_space_point)?;
        self.state.nodes.get(aggregate.anchor_for(origin)?)
    }

    fn build_node(&self, id: &NodeAggregateId) -> Option<Node> {
        let subgraph = self.subgraph?;
        if !subgraph.contains(id) {
            return None;
        }
        let aggregate = self.graph?.aggregates.get(id)?;
        let record = self.record_of(id)?;
        Some(Node {
            content_stream_id: self.content_stream_id,
            node_aggregate_id: id.clone(),
            origin_dimension_space_point: record.origin.clone(),
            dimension_space_point: self.dimension_space_point.clone(),
            node_type_name: aggregate.node_type_name.clone(),
            node_name: aggregate.node_name.clone(),
            classification: aggregate.classification,
            properties: record.properties.clone(),
            parent_node_aggregate_id: subgraph.parents.get(id).cloned(),
            restricted: self.is_restricted(id),
        })
    }

    /// Disabled at this point, itself or through an ancestor.
    fn is_restricted(&self, id: &NodeAggregateId) -> bool {
        let (Some(graph), Some(subgraph)) = (self.graph, self.subgraph) else {
            return false;
        };
        let mut current = Some(id);
        while let Some(node) = current {
            if graph
                .aggregates
                .get(node)
                .is_some_and(|a| a.is_disabled_at(&self.dimension_space_point))
            {
                return true;
            }
            current = subgraph.parents.get(node);
        }
        false
    }
}
