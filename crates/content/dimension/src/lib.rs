//! Dimension space for the content repository.
//!
//! - [`DimensionCatalog`]: validated dimensions, values, fallbacks, constraints
//! - [`ContentDimensionZookeeper`]: the allowed subspace of point combinations
//! - [`InterDimensionalVariationGraph`]: generalization/specialization edges
//!   with deterministic fallback ordering
//!
//! Everything here is static configuration: built once at startup, shared
//! read-only afterwards.

pub mod catalog;
pub mod error;
pub mod point;
pub mod variation;
pub mod zookeeper;

pub use catalog::{
    ContentDimension, ContentDimensionId, ContentDimensionValue, DimensionCatalog,
    DimensionConfig, DimensionConstraint, DimensionValueConfig,
};
pub use error::{DimensionError, DimensionResult};
pub use point::{
    DimensionSpacePoint, DimensionSpacePointHash, DimensionSpacePointSet,
    OriginDimensionSpacePoint,
};
pub use variation::{InterDimensionalVariationGraph, VariantType, VariationWeight};
pub use zookeeper::ContentDimensionZookeeper;

/// Catalog, allowed subspace and variation graph bundled together.
#[derive(Debug)]
pub struct DimensionSpace {
    zookeeper: ContentDimensionZookeeper,
    graph: InterDimensionalVariationGraph,
}

impl DimensionSpace {
    pub fn from_config(configs: &[DimensionConfig]) -> DimensionResult<Self> {
        let catalog = DimensionCatalog::from_config(configs)?;
        let zookeeper = ContentDimensionZookeeper::new(catalog);
        let graph = InterDimensionalVariationGraph::new(
            zookeeper.catalog(),
            zookeeper.allowed_dimension_subspace(),
        )?;
        Ok(Self { zookeeper, graph })
    }

    pub fn catalog(&self) -> &DimensionCatalog {
        self.zookeeper.catalog()
    }

    pub fn zookeeper(&self) -> &ContentDimensionZookeeper {
        &self.zookeeper
    }

    pub fn variation_graph(&self) -> &InterDimensionalVariationGraph {
        &self.graph
    }

    pub fn allowed_dimension_subspace(&self) -> &DimensionSpacePointSet {
        self.zookeeper.allowed_dimension_subspace()
    }

    pub fn is_allowed(&self, point: &DimensionSpacePoint) -> bool {
        self.zookeeper.is_allowed(point)
    }

    pub fn ensure_allowed(&self, point: &DimensionSpacePoint) -> DimensionResult<()> {
        self.zookeeper.ensure_allowed(point)
    }
}
