//! Arena read model and the single dispatcher that applies events to it.
//!
//! Node records live in one flat map keyed by [`NodeAnchor`]. Content
//! streams reference records by anchor; a fork shares every record with its
//! source until one side writes to it (copy on write). Hierarchy edges are
//! stored per `(content stream, dimension space point)` as identifier pairs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use content_dimension::{
    DimensionSpacePoint, DimensionSpacePointHash, DimensionSpacePointSet, OriginDimensionSpacePoint,
};

use crate::event::ContentRepositoryEvent;
use crate::ids::{ContentStreamId, NodeAggregateId, NodeAnchor, NodeName, NodeTypeName, ReferenceName, WorkspaceName};
use crate::model::{
    ContentStreamStatus, InsertPosition, NodeAggregateClassification, NodeReferenceToWrite, PropertyValues,
};

/// Position of an event in the log, as far as the read model cares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventPosition {
    pub sequence: u64,
    pub stream_version: u64,
    pub event_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentStreamRecord {
    pub id: ContentStreamId,
    pub status: ContentStreamStatus,
    pub source_content_stream_id: Option<ContentStreamId>,
    pub source_content_stream_version: Option<u64>,
    /// Version of the underlying event stream as last seen.
    pub version: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub name: WorkspaceName,
    pub base_workspace_name: Option<WorkspaceName>,
    pub current_content_stream_id: ContentStreamId,
}

/// One stored node variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_aggregate_id: NodeAggregateId,
    pub origin: OriginDimensionSpacePoint,
    pub properties: PropertyValues,
    pub references: BTreeMap<ReferenceName, Vec<NodeReferenceToWrite>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Occupation {
    pub origin: OriginDimensionSpacePoint,
    pub anchor: NodeAnchor,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub point: DimensionSpacePoint,
    pub origin: OriginDimensionSpacePoint,
}

/// Per content stream state of one node aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub node_aggregate_id: NodeAggregateId,
    pub node_type_name: NodeTypeName,
    pub node_name: Option<NodeName>,
    pub classification: NodeAggregateClassification,
    /// Origin hash -> variant
    pub occupation: BTreeMap<DimensionSpacePointHash, Occupation>,
    /// Covered point hash -> covering origin
    pub coverage: BTreeMap<DimensionSpacePointHash, Coverage>,
    /// Points at which the aggregate was explicitly disabled.
    pub disabled: BTreeMap<DimensionSpacePointHash, DimensionSpacePoint>,
}

impl AggregateRecord {
    pub fn covering_origin(&self, point: &DimensionSpacePoint) -> Option<&OriginDimensionSpacePoint> {
        self.coverage.get(&point.hash()).map(|c| &c.origin)
    }

    pub fn anchor_for(&self, origin: &OriginDimensionSpacePoint) -> Option<&NodeAnchor> {
        self.occupation.get(&origin.hash()).map(|o| &o.anchor)
    }

    pub fn is_disabled_at(&self, point: &DimensionSpacePoint) -> bool {
        self.disabled.contains_key(&point.hash())
    }
}

/// Hierarchy at one dimension space point of one content stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub point: DimensionSpacePoint,
    pub roots: Vec<NodeAggregateId>,
    pub parents: HashMap<NodeAggregateId, NodeAggregateId>,
    pub children: HashMap<NodeAggregateId, Vec<NodeAggregateId>>,
}

impl Subgraph {
    fn new(point: DimensionSpacePoint) -> Self {
        Self {
            point,
            roots: Vec::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &NodeAggregateId) -> bool {
        self.parents.contains_key(id) || self.roots.contains(id)
    }

    pub fn children_of(&self, id: &NodeAggregateId) -> &[NodeAggregateId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn insert_child(&mut self, parent: &NodeAggregateId, child: &NodeAggregateId, position: &InsertPosition) {
        let siblings = self.children.entry(parent.clone()).or_default();
        let index = match position {
            InsertPosition::First => 0,
            InsertPosition::Last => siblings.len(),
            InsertPosition::Before(sibling) => siblings
                .iter()
                .position(|s| s == sibling)
                .unwrap_or(siblings.len()),
            InsertPosition::After(sibling) => siblings
                .iter()
                .position(|s| s == sibling)
                .map(|i| i + 1)
                .unwrap_or(siblings.len()),
        };
        siblings.insert(index, child.clone());
        self.parents.insert(child.clone(), parent.clone());
    }

    fn detach(&mut self, id: &NodeAggregateId) {
        if let Some(parent) = self.parents.remove(id) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|s| s != id);
            }
        }
        self.roots.retain(|r| r != id);
    }

    /// `id` and all of its descendants, depth first.
    pub fn subtree_of(&self, id: &NodeAggregateId) -> Vec<NodeAggregateId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            for child in self.children_of(&current).iter().rev() {
                stack.push(child.clone());
            }
            out.push(current);
        }
        out
    }
}

/// Node aggregates and hierarchy of one content stream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamGraph {
    pub aggregates: HashMap<NodeAggregateId, AggregateRecord>,
    pub subgraphs: HashMap<DimensionSpacePointHash, Subgraph>,
}

impl StreamGraph {
    pub fn subgraph(&self, point: &DimensionSpacePoint) -> Option<&Subgraph> {
        self.subgraphs.get(&point.hash())
    }

    fn subgraph_mut(&mut self, point: &DimensionSpacePoint) -> &mut Subgraph {
        self.subgraphs
            .entry(point.hash())
            .or_insert_with(|| Subgraph::new(point.clone()))
    }

    fn anchors(&self) -> impl Iterator<Item = &NodeAnchor> {
        self.aggregates
            .values()
            .flat_map(|a| a.occupation.values().map(|o| &o.anchor))
    }
}

/// The complete read model: content streams, workspaces and node graphs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    /// Global sequence of the last applied event.
    pub checkpoint: u64,
    pub content_streams: HashMap<ContentStreamId, ContentStreamRecord>,
    pub workspaces: BTreeMap<WorkspaceName, WorkspaceRecord>,
    pub nodes: HashMap<NodeAnchor, NodeRecord>,
    pub anchor_usage: HashMap<NodeAnchor, usize>,
    pub graphs: HashMap<ContentStreamId, StreamGraph>,
}

impl GraphState {
    /// Apply one event. Events at or below the checkpoint are skipped, which
    /// makes re-delivery harmless. Returns whether the event was applied.
    pub fn apply(&mut self, position: EventPosition, event: &ContentRepositoryEvent) -> bool {
        if position.sequence <= self.checkpoint {
            return false;
        }
        self.dispatch(position, event);
        if let Some(id) = event.content_stream_id() {
            if let Some(record) = self.content_streams.get_mut(&id) {
                record.version = record.version.max(position.stream_version);
            }
        }
        self.checkpoint = position.sequence;
        debug!(sequence = position.sequence, event_type = event.event_type(), "event applied");
        true
    }

    fn dispatch(&mut self, position: EventPosition, event: &ContentRepositoryEvent) {
        use ContentRepositoryEvent::*;
        match event {
            ContentStreamWasCreated { content_stream_id } => {
                self.content_streams.insert(
                    *content_stream_id,
                    ContentStreamRecord {
                        id: *content_stream_id,
                        status: ContentStreamStatus::Open,
                        source_content_stream_id: None,
                        source_content_stream_version: None,
                        version: 0,
                    },
                );
                self.graphs.insert(*content_stream_id, StreamGraph::default());
            }
            ContentStreamWasForked {
                new_content_stream_id,
                source_content_stream_id,
                version_of_source_content_stream,
            } => {
                let graph = self
                    .graphs
                    .get(source_content_stream_id)
                    .cloned()
                    .unwrap_or_default();
                for anchor in graph.anchors() {
                    *self.anchor_usage.entry(anchor.clone()).or_insert(0) += 1;
                }
                self.graphs.insert(*new_content_stream_id, graph);
                self.content_streams.insert(
                    *new_content_stream_id,
                    ContentStreamRecord {
                        id: *new_content_stream_id,
                        status: ContentStreamStatus::Open,
                        source_content_stream_id: Some(*source_content_stream_id),
                        source_content_stream_version: Some(*version_of_source_content_stream),
                        version: 0,
                    },
                );
            }
            ContentStreamWasClosed {
                content_stream_id,
                purpose,
            } => self.set_status(content_stream_id, purpose.status()),
            ContentStreamWasReopened {
                content_stream_id,
                previous_status,
            } => self.set_status(content_stream_id, *previous_status),
            ContentStreamWasRemoved { content_stream_id } => {
                self.set_status(content_stream_id, ContentStreamStatus::Removed);
                if let Some(graph) = self.graphs.remove(content_stream_id) {
                    let anchors: Vec<NodeAnchor> = graph.anchors().cloned().collect();
                    for anchor in anchors {
                        self.release_anchor(&anchor);
                    }
                }
            }

            RootWorkspaceWasCreated {
                workspace_name,
                new_content_stream_id,
            } => {
                self.workspaces.insert(
                    workspace_name.clone(),
                    WorkspaceRecord {
                        name: workspace_name.clone(),
                        base_workspace_name: None,
                        current_content_stream_id: *new_content_stream_id,
                    },
                );
            }
            WorkspaceWasCreated {
                workspace_name,
                base_workspace_name,
                new_content_stream_id,
            }
            | WorkspaceBaseWorkspaceWasChanged {
                workspace_name,
                base_workspace_name,
                new_content_stream_id,
            } => {
                self.workspaces.insert(
                    workspace_name.clone(),
                    WorkspaceRecord {
                        name: workspace_name.clone(),
                        base_workspace_name: Some(base_workspace_name.clone()),
                        current_content_stream_id: *new_content_stream_id,
                    },
                );
            }
            WorkspaceWasRebased {
                workspace_name,
                new_content_stream_id,
                ..
            }
            | WorkspaceWasDiscarded {
                workspace_name,
                new_content_stream_id,
                ..
            }
            | WorkspaceWasPartiallyDiscarded {
                workspace_name,
                new_content_stream_id,
                ..
            }
            | WorkspaceWasPublished {
                source_workspace_name: workspace_name,
                new_source_content_stream_id: new_content_stream_id,
                ..
            }
            | WorkspaceWasPartiallyPublished {
                source_workspace_name: workspace_name,
                new_source_content_stream_id: new_content_stream_id,
                ..
            } => {
                if let Some(workspace) = self.workspaces.get_mut(workspace_name) {
                    workspace.current_content_stream_id = *new_content_stream_id;
                }
            }
            WorkspaceWasRemoved { workspace_name } => {
                self.workspaces.remove(workspace_name);
            }

            RootNodeAggregateWithNodeWasCreated {
                content_stream_id,
                node_aggregate_id,
                node_type_name,
                covered_dimension_space_points,
            } => self.create_root_aggregate(
                position,
                content_stream_id,
                node_aggregate_id,
                node_type_name,
                covered_dimension_space_points,
            ),
            NodeAggregateWithNodeWasCreated {
                content_stream_id,
                node_aggregate_id,
                node_type_name,
                origin_dimension_space_point,
                covered_dimension_space_points,
                parent_node_aggregate_id,
                node_name,
                initial_property_values,
                position: insert_position,
            } => self.create_aggregate(
                position,
                content_stream_id,
                NewAggregate {
                    id: node_aggregate_id,
                    node_type_name,
                    origin: origin_dimension_space_point,
                    coverage: covered_dimension_space_points,
                    parent: parent_node_aggregate_id,
                    node_name: node_name.as_ref(),
                    properties: initial_property_values,
                    insert_position,
                },
            ),
            NodeSpecializationVariantWasCreated {
                content_stream_id,
                node_aggregate_id,
                source_origin,
                specialization_origin: target,
                specialization_coverage: coverage,
            }
            | NodeGeneralizationVariantWasCreated {
                content_stream_id,
                node_aggregate_id,
                source_origin,
                generalization_origin: target,
                generalization_coverage: coverage,
            }
            | NodePeerVariantWasCreated {
                content_stream_id,
                node_aggregate_id,
                source_origin,
                peer_origin: target,
                peer_coverage: coverage,
            } => self.create_variant(position, content_stream_id, node_aggregate_id, source_origin, target, coverage),
            NodePropertiesWereSet {
                content_stream_id,
                node_aggregate_id,
                origin_dimension_space_point,
                property_values,
            } => {
                if let Some(record) =
                    self.record_for_write(position, content_stream_id, node_aggregate_id, origin_dimension_space_point)
                {
                    for (name, value) in property_values {
                        if value.is_null() {
                            record.properties.remove(name);
                        } else {
                            record.properties.insert(name.clone(), value.clone());
                        }
                    }
                }
            }
            NodeReferencesWereSet {
                content_stream_id,
                source_node_aggregate_id,
                source_origin,
                reference_name,
                references,
            } => {
                if let Some(record) =
                    self.record_for_write(position, content_stream_id, source_node_aggregate_id, source_origin)
                {
                    if references.is_empty() {
                        record.references.remove(reference_name);
                    } else {
                        record.references.insert(reference_name.clone(), references.clone());
                    }
                }
            }
            NodeAggregateWasDisabled {
                content_stream_id,
                node_aggregate_id,
                affected_dimension_space_points,
            } => {
                if let Some(aggregate) = self.aggregate_mut(content_stream_id, node_aggregate_id) {
                    for point in affected_dimension_space_points {
                        aggregate.disabled.insert(point.hash(), point.clone());
                    }
                }
            }
            NodeAggregateWasEnabled {
                content_stream_id,
                node_aggregate_id,
                affected_dimension_space_points,
            } => {
                if let Some(aggregate) = self.aggregate_mut(content_stream_id, node_aggregate_id) {
                    for point in affected_dimension_space_points {
                        aggregate.disabled.remove(&point.hash());
                    }
                }
            }
            NodeAggregateWasMoved {
                content_stream_id,
                node_aggregate_id,
                new_parent_node_aggregate_id,
                position: insert_position,
                affected_dimension_space_points,
            } => {
                let Some(graph) = self.graphs.get_mut(content_stream_id) else {
                    return;
                };
                for point in affected_dimension_space_points {
                    let subgraph = graph.subgraph_mut(point);
                    let Some(current_parent) = subgraph.parents.get(node_aggregate_id).cloned() else {
                        continue;
                    };
                    let new_parent = new_parent_node_aggregate_id.clone().unwrap_or(current_parent);
                    if !subgraph.contains(&new_parent) {
                        warn!(node = %node_aggregate_id, point = %point, "move target parent missing, skipped");
                        continue;
                    }
                    subgraph.detach(node_aggregate_id);
                    subgraph.insert_child(&new_parent, node_aggregate_id, insert_position);
                }
            }
            NodeAggregateWasRemoved {
                content_stream_id,
                node_aggregate_id,
                affected_occupied_dimension_space_points,
                affected_covered_dimension_space_points,
            } => self.remove_aggregate(
                content_stream_id,
                node_aggregate_id,
                affected_occupied_dimension_space_points,
                affected_covered_dimension_space_points,
            ),
        }
    }

    fn set_status(&mut self, id: &ContentStreamId, status: ContentStreamStatus) {
        if let Some(record) = self.content_streams.get_mut(id) {
            record.status = status;
        }
    }

    fn aggregate_mut(&mut self, stream: &ContentStreamId, id: &NodeAggregateId) -> Option<&mut AggregateRecord> {
        self.graphs.get_mut(stream)?.aggregates.get_mut(id)
    }

    fn store_record(&mut self, anchor: NodeAnchor, record: NodeRecord) {
        *self.anchor_usage.entry(anchor.clone()).or_insert(0) += 1;
        self.nodes.insert(anchor, record);
    }

    fn release_anchor(&mut self, anchor: &NodeAnchor) {
        let remaining = match self.anchor_usage.get_mut(anchor) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.anchor_usage.remove(anchor);
            self.nodes.remove(anchor);
        }
    }

    /// Mutable record of one variant, copied first if another content stream
    /// still shares it.
    fn record_for_write(
        &mut self,
        position: EventPosition,
        stream: &ContentStreamId,
        id: &NodeAggregateId,
        origin: &OriginDimensionSpacePoint,
    ) -> Option<&mut NodeRecord> {
        let anchor = self
            .graphs
            .get(stream)?
            .aggregates
            .get(id)?
            .anchor_for(origin)?
            .clone();

        let shared = self.anchor_usage.get(&anchor).copied().unwrap_or(0) > 1;
        let anchor = if shared {
            let copy = self.nodes.get(&anchor)?.clone();
            let new_anchor = NodeAnchor::derive(&position.event_id, &[id.as_str(), origin.hash().as_str()]);
            self.release_anchor(&anchor);
            self.store_record(new_anchor.clone(), copy);
            if let Some(occupation) = self
                .aggregate_mut(stream, id)
                .and_then(|a| a.occupation.get_mut(&origin.hash()))
            {
                occupation.anchor = new_anchor.clone();
            }
            new_anchor
        } else {
            anchor
        };
        self.nodes.get_mut(&anchor)
    }

    fn create_root_aggregate(
        &mut self,
        position: EventPosition,
        stream: &ContentStreamId,
        id: &NodeAggregateId,
        node_type_name: &NodeTypeName,
        coverage: &DimensionSpacePointSet,
    ) {
        let origin = OriginDimensionSpacePoint::empty();
        let anchor = NodeAnchor::derive(&position.event_id, &[id.as_str()]);
        self.store_record(
            anchor.clone(),
            NodeRecord {
                node_aggregate_id: id.clone(),
                origin: origin.clone(),
                properties: PropertyValues::new(),
                references: BTreeMap::new(),
            },
        );

        let graph = self.graphs.entry(*stream).or_default();
        let mut aggregate = AggregateRecord {
            node_aggregate_id: id.clone(),
            node_type_name: node_type_name.clone(),
            node_name: None,
            classification: NodeAggregateClassification::Root,
            occupation: BTreeMap::new(),
            coverage: BTreeMap::new(),
            disabled: BTreeMap::new(),
        };
        aggregate.occupation.insert(origin.hash(), Occupation { origin: origin.clone(), anchor });
        for point in coverage {
            aggregate.coverage.insert(
                point.hash(),
                Coverage {
                    point: point.clone(),
                    origin: origin.clone(),
                },
            );
            graph.subgraph_mut(point).roots.push(id.clone());
        }
        graph.aggregates.insert(id.clone(), aggregate);
    }

    fn create_aggregate(&mut self, position: EventPosition, stream: &ContentStreamId, new: NewAggregate<'_>) {
        let anchor = NodeAnchor::derive(&position.event_id, &[new.id.as_str(), new.origin.hash().as_str()]);
        self.store_record(
            anchor.clone(),
            NodeRecord {
                node_aggregate_id: new.id.clone(),
                origin: new.origin.clone(),
                properties: new
                    .properties
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                references: BTreeMap::new(),
            },
        );

        let graph = self.graphs.entry(*stream).or_default();
        let mut aggregate = AggregateRecord {
            node_aggregate_id: new.id.clone(),
            node_type_name: new.node_type_name.clone(),
            node_name: new.node_name.cloned(),
            classification: NodeAggregateClassification::Regular,
            occupation: BTreeMap::new(),
            coverage: BTreeMap::new(),
            disabled: BTreeMap::new(),
        };
        aggregate.occupation.insert(
            new.origin.hash(),
            Occupation {
                origin: new.origin.clone(),
                anchor,
            },
        );
        for point in new.coverage {
            let subgraph = graph.subgraph_mut(point);
            if !subgraph.contains(new.parent) {
                warn!(node = %new.id, point = %point, "parent missing at covered point, skipped");
                continue;
            }
            subgraph.insert_child(new.parent, new.id, new.insert_position);
            aggregate.coverage.insert(
                point.hash(),
                Coverage {
                    point: point.clone(),
                    origin: new.origin.clone(),
                },
            );
        }
        graph.aggregates.insert(new.id.clone(), aggregate);
    }

    fn create_variant(
        &mut self,
        position: EventPosition,
        stream: &ContentStreamId,
        id: &NodeAggregateId,
        source: &OriginDimensionSpacePoint,
        target: &OriginDimensionSpacePoint,
        coverage: &DimensionSpacePointSet,
    ) {
        let Some(graph) = self.graphs.get(stream) else {
            return;
        };
        let Some(aggregate) = graph.aggregates.get(id) else {
            return;
        };
        let Some(source_anchor) = aggregate.anchor_for(source) else {
            return;
        };
        let Some(mut record) = self.nodes.get(source_anchor).cloned() else {
            return;
        };
        // The parent is shared by all variants of an aggregate.
        let parent = aggregate
            .coverage
            .values()
            .find(|c| &c.origin == source)
            .or_else(|| aggregate.coverage.values().next())
            .and_then(|c| graph.subgraph(&c.point))
            .and_then(|s| s.parents.get(id))
            .cloned();

        record.origin = target.clone();
        let anchor = NodeAnchor::derive(&position.event_id, &[id.as_str(), target.hash().as_str()]);
        self.store_record(anchor.clone(), record);

        let Some(graph) = self.graphs.get_mut(stream) else {
            return;
        };
        let mut covered = Vec::new();
        for point in coverage {
            let already_placed = graph
                .aggregates
                .get(id)
                .is_some_and(|a| a.coverage.contains_key(&point.hash()));
            if !already_placed {
                let Some(parent) = &parent else { continue };
                let subgraph = graph.subgraph_mut(point);
                if !subgraph.contains(parent) {
                    continue;
                }
                subgraph.insert_child(parent, id, &InsertPosition::Last);
            }
            covered.push(point.clone());
        }

        let replaced = graph.aggregates.get_mut(id).and_then(|aggregate| {
            for point in covered {
                aggregate.coverage.insert(
                    point.hash(),
                    Coverage {
                        point,
                        origin: target.clone(),
                    },
                );
            }
            aggregate.occupation.insert(
                target.hash(),
                Occupation {
                    origin: target.clone(),
                    anchor,
                },
            )
        });
        if let Some(previous) = replaced {
            self.release_anchor(&previous.anchor);
        }
        self.drop_unreferenced_variants(stream, std::slice::from_ref(id));
    }

    fn remove_aggregate(
        &mut self,
        stream: &ContentStreamId,
        id: &NodeAggregateId,
        occupied: &[OriginDimensionSpacePoint],
        covered: &DimensionSpacePointSet,
    ) {
        let Some(graph) = self.graphs.get_mut(stream) else {
            return;
        };

        let mut touched: BTreeSet<NodeAggregateId> = BTreeSet::new();
        touched.insert(id.clone());
        for point in covered {
            let Some(subgraph) = graph.subgraphs.get_mut(&point.hash()) else {
                continue;
            };
            if !subgraph.contains(id) {
                continue;
            }
            let subtree = subgraph.subtree_of(id);
            subgraph.detach(id);
            for member in &subtree {
                subgraph.parents.remove(member);
                subgraph.children.remove(member);
                if let Some(aggregate) = graph.aggregates.get_mut(member) {
                    aggregate.coverage.remove(&point.hash());
                    aggregate.disabled.remove(&point.hash());
                }
                touched.insert(member.clone());
            }
        }

        let mut released = Vec::new();
        if let Some(aggregate) = graph.aggregates.get_mut(id) {
            for origin in occupied {
                if let Some(occupation) = aggregate.occupation.remove(&origin.hash()) {
                    released.push(occupation.anchor);
                }
            }
        }
        for anchor in released {
            self.release_anchor(&anchor);
        }

        let touched: Vec<NodeAggregateId> = touched.into_iter().collect();
        self.drop_unreferenced_variants(stream, &touched);
    }

    /// Drop variants that no longer cover any point, then aggregates without
    /// any variant.
    fn drop_unreferenced_variants(&mut self, stream: &ContentStreamId, ids: &[NodeAggregateId]) {
        let Some(graph) = self.graphs.get_mut(stream) else {
            return;
        };
        let mut released = Vec::new();
        for id in ids {
            let Some(aggregate) = graph.aggregates.get_mut(id) else {
                continue;
            };
            let live: BTreeSet<DimensionSpacePointHash> =
                aggregate.coverage.values().map(|c| c.origin.hash()).collect();
            let dead: Vec<DimensionSpacePointHash> = aggregate
                .occupation
                .keys()
                .filter(|origin| !live.contains(*origin))
                .cloned()
                .collect();
            for origin in dead {
                if let Some(occupation) = aggregate.occupation.remove(&origin) {
                    released.push(occupation.anchor);
                }
            }
            if aggregate.occupation.is_empty() {
                graph.aggregates.remove(id);
            }
        }
        for anchor in released {
            self.release_anchor(&anchor);
        }
    }
}

struct NewAggregate<'a> {
    id: &'a NodeAggregateId,
    node_type_name: &'a NodeTypeName,
    origin: &'a OriginDimensionSpacePoint,
    coverage: &'a DimensionSpacePointSet,
    parent: &'a NodeAggregateId,
    node_name: Option<&'a NodeName>,
    properties: &'a PropertyValues,
    insert_position: &'a InsertPosition,
}
