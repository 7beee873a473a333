//! Property tests: fallback chains built from any acyclic configuration
//! terminate, and configurations with a cycle are rejected.

use content_dimension::{DimensionConfig, DimensionError, DimensionSpace, DimensionValueConfig};
use proptest::prelude::*;
use proptest::sample::Index;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Values `v0..vn` where each value may fall back to an earlier one, so the
/// result is always a forest.
fn arb_forest(id: &'static str) -> impl Strategy<Value = DimensionConfig> {
    prop::collection::vec((any::<bool>(), any::<Index>()), 1..7).prop_map(move |parents| {
        let values = parents
            .iter()
            .enumerate()
            .map(|(i, (has_fallback, parent))| {
                let value = DimensionValueConfig::new(format!("v{i}"));
                if i > 0 && *has_fallback {
                    value.with_fallback(format!("v{}", parent.index(i)))
                } else {
                    value
                }
            })
            .collect();
        DimensionConfig {
            id: id.to_string(),
            values,
        }
    })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Walking the nearest generalization always reaches a root point.
    #[test]
    fn generalization_chains_terminate(
        language in arb_forest("language"),
        market in arb_forest("market"),
    ) {
        let bound = language.values.len() + market.values.len();
        let space = DimensionSpace::from_config(&[language, market]).unwrap();
        let graph = space.variation_graph();

        for point in space.allowed_dimension_subspace().iter() {
            let mut current = point.clone();
            let mut steps = 0;
            while let Some(next) = graph.primary_generalization(&current) {
                current = next.clone();
                steps += 1;
                prop_assert!(steps <= bound, "chain from {} does not terminate", point);
            }
            prop_assert!(graph.root_points().contains(&&current));

            let generalizations = graph.generalizations_of(point);
            prop_assert!(!generalizations.contains(&point));
            for (rank, generalization) in generalizations.iter().enumerate() {
                prop_assert_eq!(graph.fallback_rank(point, generalization), Some(rank + 1));
            }
        }
    }

    /// Building the same configuration twice yields the same fallback order.
    #[test]
    fn fallback_order_is_deterministic(language in arb_forest("language"), market in arb_forest("market")) {
        let configs = [language, market];
        let first = DimensionSpace::from_config(&configs).unwrap();
        let second = DimensionSpace::from_config(&configs).unwrap();

        for point in first.allowed_dimension_subspace().iter() {
            prop_assert_eq!(
                first.variation_graph().generalizations_of(point),
                second.variation_graph().generalizations_of(point)
            );
        }
    }

    /// Closing a linear chain into a loop is a configuration error.
    #[test]
    fn fallback_cycles_are_rejected(length in 2usize..7) {
        let mut values: Vec<DimensionValueConfig> = (0..length)
            .map(|i| {
                let value = DimensionValueConfig::new(format!("v{i}"));
                if i > 0 { value.with_fallback(format!("v{}", i - 1)) } else { value }
            })
            .collect();
        values[0] = DimensionValueConfig::new("v0").with_fallback(format!("v{}", length - 1));

        let result = DimensionSpace::from_config(&[DimensionConfig { id: "language".to_string(), values }]);
        prop_assert!(matches!(result, Err(DimensionError::FallbackCycle { .. })), "cycle of {} accepted", length);
    }
}
