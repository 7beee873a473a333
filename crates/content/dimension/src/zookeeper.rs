use tracing::debug;

use crate::catalog::DimensionCatalog;
use crate::error::{DimensionError, DimensionResult};
use crate::point::{DimensionSpacePoint, DimensionSpacePointSet};

/// Computes the allowed dimension subspace: every combination of declared
/// values that does not violate a constraint.
///
/// The subspace is computed once on construction and kept for the lifetime
/// of the zookeeper.
#[derive(Clone, Debug)]
pub struct ContentDimensionZookeeper {
    catalog: DimensionCatalog,
    allowed: DimensionSpacePointSet,
}

impl ContentDimensionZookeeper {
    pub fn new(catalog: DimensionCatalog) -> Self {
        let allowed = compute_allowed_subspace(&catalog);
        debug!(
            dimensions = catalog.dimensions().len(),
            points = allowed.len(),
            "allowed dimension subspace computed"
        );
        Self { catalog, allowed }
    }

    pub fn catalog(&self) -> &DimensionCatalog {
        &self.catalog
    }

    pub fn allowed_dimension_subspace(&self) -> &DimensionSpacePointSet {
        &self.allowed
    }

    pub fn is_allowed(&self, point: &DimensionSpacePoint) -> bool {
        self.allowed.contains(point)
    }

    pub fn ensure_allowed(&self, point: &DimensionSpacePoint) -> DimensionResult<()> {
        if self.is_allowed(point) {
            Ok(())
        } else {
            Err(DimensionError::PointNotAllowed(point.to_json()))
        }
    }
}

fn compute_allowed_subspace(catalog: &DimensionCatalog) -> DimensionSpacePointSet {
    // Cartesian product in declaration order.
    let mut candidates = vec![DimensionSpacePoint::empty()];
    for dimension in catalog.dimensions() {
        let mut next = Vec::with_capacity(candidates.len() * dimension.values().len());
        for candidate in &candidates {
            for value in dimension.values() {
                next.push(candidate.vary(dimension.id.as_str(), &value.value));
            }
        }
        candidates = next;
    }

    candidates
        .into_iter()
        .filter(|point| satisfies_constraints(catalog, point))
        .collect()
}

fn satisfies_constraints(catalog: &DimensionCatalog, point: &DimensionSpacePoint) -> bool {
    for dimension in catalog.dimensions() {
        let Some(coordinate) = point.coordinate(dimension.id.as_str()) else {
            return false;
        };
        let Some(value) = dimension.value(coordinate) else {
            return false;
        };
        for (constrained, rule) in &value.constraints {
            match point.coordinate(constrained.as_str()) {
                Some(other) if rule.allows(other) => {}
                _ => return false,
            }
        }
    }
    true
}
