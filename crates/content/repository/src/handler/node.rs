//! Node aggregate command handler.
//!
//! Each command is validated against one [`CommandContext`], turned into
//! events and appended with a compare-and-swap on the content stream version
//! the validation saw. The serialized command travels in the event metadata
//! so workspace operations can re-handle it on another content stream.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{instrument, warn};
use uuid::Uuid;

use content_dimension::{
    DimensionSpacePoint, DimensionSpacePointSet, InterDimensionalVariationGraph, OriginDimensionSpacePoint,
    VariantType,
};
use content_eventstore::{EventMetadata, ExpectedVersion};
use content_graph::{
    ContentRepositoryEvent, ContentStreamId, InsertPosition, NodeAggregate, NodeAggregateId, NodeCommand, NodeName,
    NodeReferenceToWrite, NodeTypeName, NodeVariantSelectionStrategy, RelationDistributionStrategy,
};

use crate::context::{CommandContext, CommandResult, Core};
use crate::error::{ContentRepositoryResult, InvariantViolation};

/// Events a command decided on, plus the stream version they build upon.
#[derive(Debug)]
pub(crate) struct Decision {
    pub content_stream_id: ContentStreamId,
    pub expected_version: u64,
    pub events: Vec<ContentRepositoryEvent>,
    pub checkpoint: u64,
}

#[derive(Clone)]
pub struct NodeAggregateCommandHandler {
    core: Arc<Core>,
}

impl NodeAggregateCommandHandler {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    pub async fn handle(&self, command: NodeCommand) -> ContentRepositoryResult<CommandResult> {
        self.handle_caused_by(command, Uuid::new_v4()).await
    }

    /// Handle `command` under a given causation id. Re-handling a recorded
    /// change keeps its id so the copy can be recognized on other streams.
    #[instrument(skip(self, command), fields(command = command.command_type(), node = %command.node_aggregate_id()))]
    pub(crate) async fn handle_caused_by(&self, command: NodeCommand, causation: Uuid) -> ContentRepositoryResult<CommandResult> {
        let decision = {
            let ctx = self.core.context().await;
            decide(&ctx, &command)?
        };
        if decision.events.is_empty() {
            return Ok(CommandResult::noop(decision.checkpoint));
        }

        let metadata = EventMetadata::caused_by(causation, serde_json::to_value(&command)?);
        let result = self
            .core
            .commit(
                &decision.content_stream_id.stream_name(),
                ExpectedVersion::Exact(decision.expected_version),
                &decision.events,
                metadata,
            )
            .await;
        if let Err(e) = &result {
            if e.is_retryable() {
                warn!(error = %e, "node command lost a race");
            }
        }
        result
    }
}

/// Validate `command` and construct its events. Pure with respect to `ctx`.
pub(crate) fn decide(ctx: &CommandContext<'_>, command: &NodeCommand) -> ContentRepositoryResult<Decision> {
    let content_stream_id = command.content_stream_id();
    let stream = ctx.writable_stream(&content_stream_id)?;
    let variation = ctx.dimensions().variation_graph();
    let cs = &content_stream_id;

    let events = match command {
        NodeCommand::CreateRootNodeAggregateWithNode {
            node_aggregate_id,
            node_type_name,
            ..
        } => {
            let node_type = ctx.node_type(node_type_name)?;
            if !node_type.is_root {
                return Err(InvariantViolation::NodeTypeIsNotRoot(node_type_name.clone()).into());
            }
            if node_type.is_abstract {
                return Err(InvariantViolation::NodeTypeIsAbstract(node_type_name.clone()).into());
            }
            ctx.ensure_aggregate_absent(cs, node_aggregate_id)?;
            if ctx.graph().find_root_node_aggregate_by_type(cs, node_type_name).is_some() {
                return Err(InvariantViolation::RootNodeAggregateTypeAlreadyOccupied(node_type_name.clone()).into());
            }
            vec![ContentRepositoryEvent::RootNodeAggregateWithNodeWasCreated {
                content_stream_id,
                node_aggregate_id: node_aggregate_id.clone(),
                node_type_name: node_type_name.clone(),
                covered_dimension_space_points: ctx.dimensions().allowed_dimension_subspace().clone(),
            }]
        }

        NodeCommand::CreateNodeAggregateWithNode {
            node_aggregate_id,
            node_type_name,
            origin_dimension_space_point,
            parent_node_aggregate_id,
            node_name,
            initial_property_values,
            position,
            ..
        } => {
            let node_type = ctx.node_type(node_type_name)?;
            if node_type.is_abstract {
                return Err(InvariantViolation::NodeTypeIsAbstract(node_type_name.clone()).into());
            }
            if node_type.is_root {
                return Err(InvariantViolation::NodeTypeIsRoot(node_type_name.clone()).into());
            }
            let origin = origin_dimension_space_point.to_point();
            ctx.ensure_allowed(&origin)?;
            ctx.ensure_aggregate_absent(cs, node_aggregate_id)?;
            let parent = ctx.node_aggregate(cs, parent_node_aggregate_id)?;
            if !parent.covers(&origin) {
                return Err(InvariantViolation::ParentDoesNotCoverPoint {
                    parent: parent_node_aggregate_id.clone(),
                    point: origin.to_string(),
                }
                .into());
            }
            ctx.validate_properties(node_type, initial_property_values)?;

            let coverage: DimensionSpacePointSet = variation
                .specialization_set(&origin, true)
                .iter()
                .filter(|p| parent.covers(p))
                .cloned()
                .collect();
            if let Some(name) = node_name {
                ensure_name_is_free(ctx, cs, parent_node_aggregate_id, name, &coverage, None)?;
            }

            vec![ContentRepositoryEvent::NodeAggregateWithNodeWasCreated {
                content_stream_id,
                node_aggregate_id: node_aggregate_id.clone(),
                node_type_name: node_type_name.clone(),
                origin_dimension_space_point: origin_dimension_space_point.clone(),
                covered_dimension_space_points: coverage,
                parent_node_aggregate_id: parent_node_aggregate_id.clone(),
                node_name: node_name.clone(),
                initial_property_values: initial_property_values.clone(),
                position: position.clone(),
            }]
        }

        NodeCommand::CreateNodeVariant {
            node_aggregate_id,
            source_origin,
            target_origin,
            ..
        } => {
            let aggregate = ctx.node_aggregate(cs, node_aggregate_id)?;
            if aggregate.is_root() {
                return Err(InvariantViolation::NodeAggregateIsRoot(node_aggregate_id.clone()).into());
            }
            ensure_occupied(&aggregate, source_origin)?;
            let target = target_origin.to_point();
            ctx.ensure_allowed(&target)?;
            if aggregate.occupies(target_origin) {
                return Err(InvariantViolation::DimensionSpacePointIsAlreadyOccupied {
                    node_aggregate_id: node_aggregate_id.clone(),
                    origin: target_origin.to_string(),
                }
                .into());
            }
            let parents = ctx.graph().find_parent_node_aggregates(cs, node_aggregate_id);
            let Some(parent) = parents.iter().find(|p| p.covers(&target)) else {
                return Err(InvariantViolation::ParentDoesNotCoverPoint {
                    parent: parents
                        .first()
                        .map_or_else(|| node_aggregate_id.clone(), |p| p.node_aggregate_id.clone()),
                    point: target.to_string(),
                }
                .into());
            };

            let coverage = variant_coverage(variation, &aggregate, parent, &target);
            let content_stream_id = *cs;
            let node_aggregate_id = node_aggregate_id.clone();
            let source_origin = source_origin.clone();
            let target_origin = target_origin.clone();
            let variant_type = variation.variant_type(source_origin.as_point(), &target);
            let event = match variant_type {
                VariantType::Specialization => ContentRepositoryEvent::NodeSpecializationVariantWasCreated {
                    content_stream_id,
                    node_aggregate_id,
                    source_origin,
                    specialization_origin: target_origin,
                    specialization_coverage: coverage,
                },
                VariantType::Generalization => ContentRepositoryEvent::NodeGeneralizationVariantWasCreated {
                    content_stream_id,
                    node_aggregate_id,
                    source_origin,
                    generalization_origin: target_origin,
                    generalization_coverage: coverage,
                },
                VariantType::Peer | VariantType::Same => ContentRepositoryEvent::NodePeerVariantWasCreated {
                    content_stream_id,
                    node_aggregate_id,
                    source_origin,
                    peer_origin: target_origin,
                    peer_coverage: coverage,
                },
            };
            vec![event]
        }

        NodeCommand::SetNodeProperties {
            node_aggregate_id,
            origin_dimension_space_point,
            property_values,
            ..
        } => {
            let aggregate = ctx.node_aggregate(cs, node_aggregate_id)?;
            ensure_occupied(&aggregate, origin_dimension_space_point)?;
            let node_type = ctx.node_type(&aggregate.node_type_name)?;
            ctx.validate_properties(node_type, property_values)?;
            vec![ContentRepositoryEvent::NodePropertiesWereSet {
                content_stream_id,
                node_aggregate_id: node_aggregate_id.clone(),
                origin_dimension_space_point: origin_dimension_space_point.clone(),
                property_values: property_values.clone(),
            }]
        }

        NodeCommand::SetNodeReferences {
            source_node_aggregate_id,
            source_origin,
            reference_name,
            references,
            ..
        } => {
            let aggregate = ctx.node_aggregate(cs, source_node_aggregate_id)?;
            ensure_occupied(&aggregate, source_origin)?;
            let node_type = ctx.node_type(&aggregate.node_type_name)?;
            let Some(declaration) = node_type.reference(reference_name) else {
                return Err(InvariantViolation::ReferenceIsNotDeclared {
                    node_type: node_type.name.clone(),
                    reference: reference_name.clone(),
                }
                .into());
            };

            for reference in references {
                let target = ctx.node_aggregate(cs, &reference.target)?;
                if !declaration.constraints.is_empty() {
                    let target_type = ctx.node_type(&target.node_type_name)?;
                    let accepted = declaration
                        .constraints
                        .iter()
                        .any(|allowed| target_type.is_of_type(&NodeTypeName::new(allowed.as_str())));
                    if !accepted {
                        return Err(InvariantViolation::ReferenceTargetTypeNotAllowed {
                            reference: reference_name.clone(),
                            target: reference.target.clone(),
                            target_type: target.node_type_name.clone(),
                        }
                        .into());
                    }
                }
                for (property, value) in &reference.properties {
                    let property_name = format!("{reference_name}.{property}");
                    match declaration.properties.get(property) {
                        None => {
                            return Err(InvariantViolation::PropertyIsNotDeclared {
                                node_type: node_type.name.clone(),
                                property: property_name,
                            }
                            .into())
                        }
                        Some(expected) if !expected.accepts(value) => {
                            return Err(InvariantViolation::PropertyTypeMismatch {
                                node_type: node_type.name.clone(),
                                property: property_name,
                                expected: *expected,
                            }
                            .into())
                        }
                        Some(_) => {}
                    }
                }
            }

            vec![ContentRepositoryEvent::NodeReferencesWereSet {
                content_stream_id,
                source_node_aggregate_id: source_node_aggregate_id.clone(),
                source_origin: source_origin.clone(),
                reference_name: reference_name.clone(),
                references: references.clone(),
            }]
        }

        NodeCommand::DisableNodeAggregate {
            node_aggregate_id,
            covered_dimension_space_point,
            strategy,
            ..
        }
        | NodeCommand::EnableNodeAggregate {
            node_aggregate_id,
            covered_dimension_space_point,
            strategy,
            ..
        } => {
            let disable = matches!(command, NodeCommand::DisableNodeAggregate { .. });
            let aggregate = ctx.node_aggregate(cs, node_aggregate_id)?;
            // Root lookups ignore visibility, so roots never change state.
            if aggregate.is_root() {
                return Err(InvariantViolation::NodeAggregateIsRoot(node_aggregate_id.clone()).into());
            }
            ctx.ensure_allowed(covered_dimension_space_point)?;
            ctx.ensure_covers(&aggregate, covered_dimension_space_point)?;

            // Points already in the requested state are left alone.
            let affected: DimensionSpacePointSet =
                select_variants(variation, &aggregate, covered_dimension_space_point, *strategy)
                    .iter()
                    .filter(|p| aggregate.is_disabled_at(p) != disable)
                    .cloned()
                    .collect();
            if affected.is_empty() {
                Vec::new()
            } else if disable {
                vec![ContentRepositoryEvent::NodeAggregateWasDisabled {
                    content_stream_id,
                    node_aggregate_id: node_aggregate_id.clone(),
                    affected_dimension_space_points: affected,
                }]
            } else {
                vec![ContentRepositoryEvent::NodeAggregateWasEnabled {
                    content_stream_id,
                    node_aggregate_id: node_aggregate_id.clone(),
                    affected_dimension_space_points: affected,
                }]
            }
        }

        NodeCommand::MoveNodeAggregate {
            node_aggregate_id,
            dimension_space_point,
            new_parent_node_aggregate_id,
            position,
            strategy,
            ..
        } => {
            let aggregate = ctx.node_aggregate(cs, node_aggregate_id)?;
            if aggregate.is_root() {
                return Err(InvariantViolation::NodeAggregateIsRoot(node_aggregate_id.clone()).into());
            }
            ctx.ensure_allowed(dimension_space_point)?;
            ctx.ensure_covers(&aggregate, dimension_space_point)?;

            let covered = aggregate.covered_dimension_space_points();
            let affected = match strategy {
                RelationDistributionStrategy::Scatter => DimensionSpacePointSet::single(dimension_space_point.clone()),
                RelationDistributionStrategy::GatherSpecializations => variation
                    .specialization_set(dimension_space_point, true)
                    .intersection(&covered),
                RelationDistributionStrategy::GatherAll => covered,
            };

            if let Some(new_parent_id) = new_parent_node_aggregate_id {
                let new_parent = ctx.node_aggregate(cs, new_parent_id)?;
                for point in &affected {
                    if !new_parent.covers(point) {
                        return Err(InvariantViolation::ParentDoesNotCoverPoint {
                            parent: new_parent_id.clone(),
                            point: point.to_string(),
                        }
                        .into());
                    }
                    let subgraph = ctx.subgraph(*cs, point);
                    let mut ancestor = Some(new_parent_id.clone());
                    while let Some(current) = ancestor {
                        if &current == node_aggregate_id {
                            return Err(InvariantViolation::CyclicMove {
                                node_aggregate_id: node_aggregate_id.clone(),
                                new_parent: new_parent_id.clone(),
                            }
                            .into());
                        }
                        ancestor = subgraph.find_parent_node(&current).map(|n| n.node_aggregate_id);
                    }
                }
                if let Some(name) = &aggregate.node_name {
                    ensure_name_is_free(ctx, cs, new_parent_id, name, &affected, Some(node_aggregate_id))?;
                }
            }

            vec![ContentRepositoryEvent::NodeAggregateWasMoved {
                content_stream_id,
                node_aggregate_id: node_aggregate_id.clone(),
                new_parent_node_aggregate_id: new_parent_node_aggregate_id.clone(),
                position: position.clone(),
                affected_dimension_space_points: affected,
            }]
        }

        NodeCommand::RemoveNodeAggregate {
            node_aggregate_id,
            covered_dimension_space_point,
            strategy,
            ..
        } => {
            let aggregate = ctx.node_aggregate(cs, node_aggregate_id)?;
            if aggregate.is_root() {
                return Err(InvariantViolation::NodeAggregateIsRoot(node_aggregate_id.clone()).into());
            }
            ctx.ensure_allowed(covered_dimension_space_point)?;
            ctx.ensure_covers(&aggregate, covered_dimension_space_point)?;
            let affected = select_variants(variation, &aggregate, covered_dimension_space_point, *strategy);
            vec![removal(*cs, &aggregate, affected)]
        }

        NodeCommand::RemoveNodesFromAggregate {
            node_aggregate_id,
            dimension_space_point_set,
            ..
        } => {
            let aggregate = ctx.node_aggregate(cs, node_aggregate_id)?;
            if aggregate.is_root() {
                return Err(InvariantViolation::NodeAggregateIsRoot(node_aggregate_id.clone()).into());
            }
            if dimension_space_point_set.is_empty() {
                return Err(InvariantViolation::EmptyPointSet(node_aggregate_id.clone()).into());
            }
            for point in dimension_space_point_set {
                ctx.ensure_covers(&aggregate, point)?;
            }
            for point in dimension_space_point_set {
                for specialization in variation.specializations_of(point, true) {
                    if aggregate.covers(specialization) && !dimension_space_point_set.contains(specialization) {
                        return Err(InvariantViolation::PointSetNotGeneralizationClosed {
                            node_aggregate_id: node_aggregate_id.clone(),
                            missing: specialization.to_string(),
                        }
                        .into());
                    }
                }
            }
            vec![removal(*cs, &aggregate, dimension_space_point_set.clone())]
        }

        NodeCommand::CopyNodesRecursively {
            node_tree_to_insert,
            target_origin,
            target_parent_node_aggregate_id,
            target_node_name,
            position,
            node_aggregate_id_mapping,
            ..
        } => {
            let origin = target_origin.to_point();
            ctx.ensure_allowed(&origin)?;
            let parent = ctx.node_aggregate(cs, target_parent_node_aggregate_id)?;
            if !parent.covers(&origin) {
                return Err(InvariantViolation::ParentDoesNotCoverPoint {
                    parent: target_parent_node_aggregate_id.clone(),
                    point: origin.to_string(),
                }
                .into());
            }
            let coverage: DimensionSpacePointSet = variation
                .specialization_set(&origin, true)
                .iter()
                .filter(|p| parent.covers(p))
                .cloned()
                .collect();
            let root_name = target_node_name.as_ref().or(node_tree_to_insert.node_name.as_ref());
            if let Some(name) = root_name {
                ensure_name_is_free(ctx, cs, target_parent_node_aggregate_id, name, &coverage, None)?;
            }

            let mapped = |id: &NodeAggregateId| -> ContentRepositoryResult<NodeAggregateId> {
                node_aggregate_id_mapping
                    .get(id)
                    .cloned()
                    .ok_or_else(|| InvariantViolation::NodeAggregateIdNotMapped(id.clone()).into())
            };

            let mut fresh = BTreeSet::new();
            let mut created = Vec::new();
            let mut references = Vec::new();
            for (node, parent_in_tree) in node_tree_to_insert.walk() {
                let node_type = ctx.node_type(&node.node_type_name)?;
                if node_type.is_abstract {
                    return Err(InvariantViolation::NodeTypeIsAbstract(node.node_type_name.clone()).into());
                }
                if node_type.is_root {
                    return Err(InvariantViolation::NodeTypeIsRoot(node.node_type_name.clone()).into());
                }
                ctx.validate_properties(node_type, &node.properties)?;
                let node_aggregate_id = mapped(&node.node_aggregate_id)?;
                ctx.ensure_aggregate_absent(cs, &node_aggregate_id)?;
                if !fresh.insert(node_aggregate_id.clone()) {
                    return Err(InvariantViolation::NodeAggregateCurrentlyExists(node_aggregate_id).into());
                }

                let (parent_node_aggregate_id, node_name, position) = match parent_in_tree {
                    None => (target_parent_node_aggregate_id.clone(), root_name.cloned(), position.clone()),
                    Some(parent_id) => (mapped(parent_id)?, node.node_name.clone(), InsertPosition::Last),
                };
                created.push(ContentRepositoryEvent::NodeAggregateWithNodeWasCreated {
                    content_stream_id,
                    node_aggregate_id: node_aggregate_id.clone(),
                    node_type_name: node.node_type_name.clone(),
                    origin_dimension_space_point: target_origin.clone(),
                    covered_dimension_space_points: coverage.clone(),
                    parent_node_aggregate_id,
                    node_name,
                    initial_property_values: node.properties.clone(),
                    position,
                });

                for (reference_name, targets) in &node.references {
                    if node_type.reference(reference_name).is_none() {
                        return Err(InvariantViolation::ReferenceIsNotDeclared {
                            node_type: node_type.name.clone(),
                            reference: reference_name.clone(),
                        }
                        .into());
                    }
                    // Targets inside the copied tree follow the copy.
                    let mut written = Vec::with_capacity(targets.len());
                    for reference in targets {
                        let target = match node_aggregate_id_mapping.get(&reference.target) {
                            Some(copy) => copy.clone(),
                            None => ctx.node_aggregate(cs, &reference.target)?.node_aggregate_id,
                        };
                        written.push(NodeReferenceToWrite {
                            target,
                            properties: reference.properties.clone(),
                        });
                    }
                    references.push(ContentRepositoryEvent::NodeReferencesWereSet {
                        content_stream_id,
                        source_node_aggregate_id: node_aggregate_id.clone(),
                        source_origin: target_origin.clone(),
                        reference_name: reference_name.clone(),
                        references: written,
                    });
                }
            }
            created.extend(references);
            created
        }
    };

    Ok(Decision {
        content_stream_id,
        expected_version: stream.version,
        events,
        checkpoint: ctx.checkpoint(),
    })
}

fn ensure_occupied(aggregate: &NodeAggregate, origin: &OriginDimensionSpacePoint) -> ContentRepositoryResult<()> {
    if !aggregate.occupies(origin) {
        return Err(InvariantViolation::DimensionSpacePointIsNotYetOccupied {
            node_aggregate_id: aggregate.node_aggregate_id.clone(),
            origin: origin.to_string(),
        }
        .into());
    }
    Ok(())
}

/// No other child of `parent` may carry `name` at any of `points`.
fn ensure_name_is_free(
    ctx: &CommandContext<'_>,
    content_stream_id: &ContentStreamId,
    parent: &NodeAggregateId,
    name: &NodeName,
    points: &DimensionSpacePointSet,
    except: Option<&NodeAggregateId>,
) -> ContentRepositoryResult<()> {
    for point in points {
        let subgraph = ctx.subgraph(*content_stream_id, point);
        if let Some(sibling) = subgraph.find_child_node_by_name(parent, name) {
            if Some(&sibling.node_aggregate_id) != except {
                return Err(InvariantViolation::NodeNameIsAlreadyCovered {
                    parent: parent.clone(),
                    name: name.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Covered points a selection strategy applies to.
fn select_variants(
    variation: &InterDimensionalVariationGraph,
    aggregate: &NodeAggregate,
    point: &DimensionSpacePoint,
    strategy: NodeVariantSelectionStrategy,
) -> DimensionSpacePointSet {
    let covered = aggregate.covered_dimension_space_points();
    match strategy {
        NodeVariantSelectionStrategy::OnlyGivenVariant => DimensionSpacePointSet::single(point.clone()),
        NodeVariantSelectionStrategy::AllSpecializations => {
            variation.specialization_set(point, true).intersection(&covered)
        }
        NodeVariantSelectionStrategy::AllVariants => covered,
    }
}

/// Points a new variant at `target` takes over: `target` and its
/// specializations the parent covers, unless the aggregate already covers
/// them from an origin that is nearer in their fallback order.
pub(crate) fn variant_coverage(
    variation: &InterDimensionalVariationGraph,
    aggregate: &NodeAggregate,
    parent: &NodeAggregate,
    target: &DimensionSpacePoint,
) -> DimensionSpacePointSet {
    variation
        .specialization_set(target, true)
        .iter()
        .filter(|p| parent.covers(p))
        .filter(|p| match aggregate.covering_origin(p) {
            None => true,
            Some(current) => {
                let offered = variation.fallback_rank(p, target);
                let existing = variation.fallback_rank(p, current.as_point());
                match (offered, existing) {
                    (Some(offered), Some(existing)) => offered < existing,
                    (Some(_), None) => true,
                    (None, _) => false,
                }
            }
        })
        .cloned()
        .collect()
}

/// Removal event for `affected`. A variant is dropped only when every point
/// it covers is affected.
fn removal(
    content_stream_id: ContentStreamId,
    aggregate: &NodeAggregate,
    affected: DimensionSpacePointSet,
) -> ContentRepositoryEvent {
    let occupied = aggregate
        .occupied_dimension_space_points
        .iter()
        .filter(|origin| aggregate.coverage_of(origin).is_subset(&affected))
        .cloned()
        .collect();
    ContentRepositoryEvent::NodeAggregateWasRemoved {
        content_stream_id,
        node_aggregate_id: aggregate.node_aggregate_id.clone(),
        affected_occupied_dimension_space_points: occupied,
        affected_covered_dimension_space_points: affected,
    }
}
