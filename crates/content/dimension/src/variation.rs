//! Inter-dimensional variation graph.
//!
//! Built once from the catalog and the allowed subspace. For every allowed
//! point it knows which points it falls back to (generalizations) and which
//! points fall back to it (specializations), ordered by a deterministic
//! weight.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::catalog::DimensionCatalog;
use crate::error::{DimensionError, DimensionResult};
use crate::point::{DimensionSpacePoint, DimensionSpacePointSet};

/// Distance between a point and one of its generalizations: the number of
/// fallback steps taken per dimension, in declaration order.
///
/// Ordered by total steps first. Equal totals compare the step vector
/// lexicographically, so relaxing a later-declared dimension is nearer than
/// relaxing an earlier one.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VariationWeight {
    steps: Vec<usize>,
}

impl VariationWeight {
    pub fn total(&self) -> usize {
        self.steps.iter().sum()
    }

    pub fn steps(&self) -> &[usize] {
        &self.steps
    }
}

impl Ord for VariationWeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total()
            .cmp(&other.total())
            .then_with(|| self.steps.cmp(&other.steps))
    }
}

impl PartialOrd for VariationWeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How a target point relates to the origin a variant is created from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariantType {
    Same,
    Specialization,
    Generalization,
    Peer,
}

#[derive(Debug, Default)]
struct Vertex {
    /// (index, weight), nearest first
    generalizations: Vec<(usize, VariationWeight)>,
    direct_generalizations: Vec<usize>,
    /// (index, weight), nearest first
    specializations: Vec<(usize, VariationWeight)>,
    direct_specializations: Vec<usize>,
}

/// Arena of allowed points with weighted variation edges between them.
#[derive(Debug)]
pub struct InterDimensionalVariationGraph {
    points: Vec<DimensionSpacePoint>,
    index: HashMap<DimensionSpacePoint, usize>,
    vertices: Vec<Vertex>,
}

impl InterDimensionalVariationGraph {
    pub fn new(
        catalog: &DimensionCatalog,
        subspace: &DimensionSpacePointSet,
    ) -> DimensionResult<Self> {
        let points: Vec<DimensionSpacePoint> = subspace.iter().cloned().collect();
        let index: HashMap<DimensionSpacePoint, usize> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i))
            .collect();
        let mut vertices: Vec<Vertex> = points.iter().map(|_| Vertex::default()).collect();

        for (i, point) in points.iter().enumerate() {
            for (j, candidate) in points.iter().enumerate() {
                if i == j {
                    continue;
                }
                if let Some(weight) = generalization_weight(catalog, point, candidate) {
                    vertices[i].generalizations.push((j, weight.clone()));
                    vertices[j].specializations.push((i, weight));
                }
            }
        }

        for vertex in &mut vertices {
            vertex.generalizations.sort_by(|a, b| a.1.cmp(&b.1));
            vertex.specializations.sort_by(|a, b| a.1.cmp(&b.1));
        }

        // g is a direct generalization of p when no other generalization of p
        // lies between them.
        for i in 0..vertices.len() {
            let direct: Vec<usize> = vertices[i]
                .generalizations
                .iter()
                .map(|(g, _)| *g)
                .filter(|g| {
                    !vertices[i].generalizations.iter().any(|(h, _)| {
                        h != g && vertices[*h].generalizations.iter().any(|(x, _)| x == g)
                    })
                })
                .collect();
            for g in &direct {
                vertices[*g].direct_specializations.push(i);
            }
            vertices[i].direct_generalizations = direct;
        }

        let graph = Self {
            points,
            index,
            vertices,
        };
        graph.ensure_acyclic()?;

        debug!(points = graph.points.len(), "variation graph built");
        Ok(graph)
    }

    pub fn points(&self) -> &[DimensionSpacePoint] {
        &self.points
    }

    pub fn contains(&self, point: &DimensionSpacePoint) -> bool {
        self.index.contains_key(point)
    }

    /// Weighted generalizations of `point`, nearest first.
    pub fn weighted_generalizations_of(
        &self,
        point: &DimensionSpacePoint,
    ) -> Vec<(&DimensionSpacePoint, &VariationWeight)> {
        self.vertex(point)
            .map(|v| {
                v.generalizations
                    .iter()
                    .map(|(i, w)| (&self.points[*i], w))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Generalizations of `point`, nearest first.
    pub fn generalizations_of(&self, point: &DimensionSpacePoint) -> Vec<&DimensionSpacePoint> {
        self.weighted_generalizations_of(point)
            .into_iter()
            .map(|(p, _)| p)
            .collect()
    }

    /// The nearest generalization, if any.
    pub fn primary_generalization(&self, point: &DimensionSpacePoint) -> Option<&DimensionSpacePoint> {
        self.vertex(point)
            .and_then(|v| v.generalizations.first())
            .map(|(i, _)| &self.points[*i])
    }

    pub fn direct_generalizations_of(&self, point: &DimensionSpacePoint) -> Vec<&DimensionSpacePoint> {
        self.vertex(point)
            .map(|v| v.direct_generalizations.iter().map(|i| &self.points[*i]).collect())
            .unwrap_or_default()
    }

    /// Specializations of `point`, nearest first. Without `recursive` only
    /// the directly connected ones are returned.
    pub fn specializations_of(
        &self,
        point: &DimensionSpacePoint,
        recursive: bool,
    ) -> Vec<&DimensionSpacePoint> {
        let Some(vertex) = self.vertex(point) else {
            return Vec::new();
        };
        if recursive {
            vertex
                .specializations
                .iter()
                .map(|(i, _)| &self.points[*i])
                .collect()
        } else {
            vertex
                .specializations
                .iter()
                .filter(|(i, _)| vertex.direct_specializations.contains(i))
                .map(|(i, _)| &self.points[*i])
                .collect()
        }
    }

    /// `origin` plus all of its specializations.
    pub fn specialization_set(
        &self,
        origin: &DimensionSpacePoint,
        include_origin: bool,
    ) -> DimensionSpacePointSet {
        let mut set: DimensionSpacePointSet =
            self.specializations_of(origin, true).into_iter().cloned().collect();
        if include_origin && self.contains(origin) {
            set.insert(origin.clone());
        }
        set
    }

    /// True iff `a` and `b` differ only in `dimension` and are connected by a
    /// direct edge in either direction.
    pub fn is_direct_variant_of(
        &self,
        a: &DimensionSpacePoint,
        b: &DimensionSpacePoint,
        dimension: &str,
    ) -> bool {
        if !a.differs_only_in(b, dimension) {
            return false;
        }
        let (Some(ia), Some(ib)) = (self.index.get(a), self.index.get(b)) else {
            return false;
        };
        self.vertices[*ia].direct_generalizations.contains(ib)
            || self.vertices[*ib].direct_generalizations.contains(ia)
    }

    pub fn variant_type(&self, source: &DimensionSpacePoint, target: &DimensionSpacePoint) -> VariantType {
        if source == target {
            return VariantType::Same;
        }
        match (self.index.get(source), self.index.get(target)) {
            (Some(s), Some(t)) => {
                if self.vertices[*t].generalizations.iter().any(|(i, _)| i == s) {
                    VariantType::Specialization
                } else if self.vertices[*s].generalizations.iter().any(|(i, _)| i == t) {
                    VariantType::Generalization
                } else {
                    VariantType::Peer
                }
            }
            _ => VariantType::Peer,
        }
    }

    /// Position of `candidate` in the fallback order of `point`: `0` for the
    /// point itself, `n` for its n-th nearest generalization, `None` when
    /// `point` does not fall back to `candidate`.
    pub fn fallback_rank(
        &self,
        point: &DimensionSpacePoint,
        candidate: &DimensionSpacePoint,
    ) -> Option<usize> {
        if point == candidate {
            return self.contains(point).then_some(0);
        }
        let target = self.index.get(candidate)?;
        self.vertex(point)?
            .generalizations
            .iter()
            .position(|(i, _)| i == target)
            .map(|rank| rank + 1)
    }

    /// Points without any generalization.
    pub fn root_points(&self) -> Vec<&DimensionSpacePoint> {
        self.points
            .iter()
            .zip(&self.vertices)
            .filter(|(_, v)| v.generalizations.is_empty())
            .map(|(p, _)| p)
            .collect()
    }

    fn vertex(&self, point: &DimensionSpacePoint) -> Option<&Vertex> {
        self.index.get(point).map(|i| &self.vertices[*i])
    }

    fn ensure_acyclic(&self) -> DimensionResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.points.len()];
        for start in 0..self.points.len() {
            if marks[start] != Mark::New {
                continue;
            }
            // Iterative DFS over direct edges: (vertex, next edge to visit).
            let mut stack = vec![(start, 0usize)];
            marks[start] = Mark::Active;
            while let Some((vertex, edge)) = stack.pop() {
                let edges = &self.vertices[vertex].direct_generalizations;
                if edge < edges.len() {
                    stack.push((vertex, edge + 1));
                    let next = edges[edge];
                    match marks[next] {
                        Mark::Active => {
                            return Err(DimensionError::VariationCycle(self.points[next].to_json()))
                        }
                        Mark::New => {
                            marks[next] = Mark::Active;
                            stack.push((next, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[vertex] = Mark::Done;
                }
            }
        }
        Ok(())
    }
}

/// Weight of `candidate` as a generalization of `point`, or `None` if every
/// coordinate of `candidate` is not reachable from `point`'s coordinate via
/// the dimension's fallback chain.
fn generalization_weight(
    catalog: &DimensionCatalog,
    point: &DimensionSpacePoint,
    candidate: &DimensionSpacePoint,
) -> Option<VariationWeight> {
    let mut steps = Vec::with_capacity(catalog.dimensions().len());
    for dimension in catalog.dimensions() {
        let id = dimension.id.as_str();
        let own = point.coordinate(id)?;
        let other = candidate.coordinate(id)?;
        if own == other {
            steps.push(0);
            continue;
        }
        let distance = dimension
            .fallback_chain(own)
            .iter()
            .position(|v| *v == other)?;
        steps.push(distance + 1);
    }
    if steps.iter().all(|s| *s == 0) {
        return None;
    }
    Some(VariationWeight { steps })
}
