//! Property tests: a node read at any point resolves to the variant at the
//! nearest occupied generalization, whatever order the variants were
//! created in.

use std::collections::BTreeSet;

use content_dimension::{DimensionConfig, DimensionSpacePoint, DimensionValueConfig, OriginDimensionSpacePoint};
use content_graph::{NodeCommand, VisibilityConstraints};
use content_tests::{create_page, id, live_site, site_config};
use proptest::prelude::*;
use proptest::sample::Index;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn point(value: &str) -> DimensionSpacePoint {
    DimensionSpacePoint::new([("language", value)])
}

/// A tree rooted at `v0`: every other value falls back to an earlier one.
fn arb_tree() -> impl Strategy<Value = Vec<DimensionValueConfig>> {
    prop::collection::vec(any::<Index>(), 1..7).prop_map(|parents| {
        parents
            .iter()
            .enumerate()
            .map(|(i, parent)| {
                let value = DimensionValueConfig::new(format!("v{i}"));
                if i == 0 {
                    value
                } else {
                    value.with_fallback(format!("v{}", parent.index(i)))
                }
            })
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn reads_resolve_to_the_nearest_occupied_generalization(
        values in arb_tree(),
        picks in prop::collection::vec(any::<Index>(), 0..5),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let mut config = site_config();
            config.dimensions = vec![DimensionConfig { id: "language".to_string(), values: values.clone() }];
            let (repository, live) = live_site(config).await;
            repository.handle_node(create_page(live, "home", "sites", "v0")).await.unwrap();

            let mut occupied = BTreeSet::from(["v0".to_string()]);
            for pick in &picks {
                let target = format!("v{}", pick.index(values.len()));
                if !occupied.insert(target.clone()) {
                    continue;
                }
                repository
                    .handle_node(NodeCommand::CreateNodeVariant {
                        content_stream_id: live,
                        node_aggregate_id: id("home"),
                        source_origin: OriginDimensionSpacePoint::from(point("v0")),
                        target_origin: OriginDimensionSpacePoint::from(point(&target)),
                    })
                    .await
                    .unwrap();
            }

            let graph = repository.dimensions().variation_graph();
            let tx = repository.read().await;
            for value in &values {
                let at = point(&value.value);
                let expected = std::iter::once(&at)
                    .chain(graph.generalizations_of(&at))
                    .find(|candidate| occupied.contains(candidate.coordinate("language").unwrap_or_default()))
                    .cloned();

                let subgraph = tx.subgraph(live, at.clone(), VisibilityConstraints::frontend());
                let first = subgraph.find_node_by_aggregate_id(&id("home")).map(|n| n.origin_dimension_space_point);
                let second = subgraph.find_node_by_aggregate_id(&id("home")).map(|n| n.origin_dimension_space_point);
                assert_eq!(first, second);
                assert_eq!(first, expected.map(OriginDimensionSpacePoint::from), "resolution at {}", at);
            }
        });
    }
}
