//! End-to-end test: removing nodes from an aggregate must keep the
//! remaining coverage closed under generalization.

use content_dimension::DimensionSpacePointSet;
use content_graph::NodeCommand;
use content_repository::{ContentRepositoryError, InvariantViolation};
use content_tests::{create_page, id, language, live_site, site_config, title};
use serde_json::json;

fn remove_at(live: content_graph::ContentStreamId, points: &[&str]) -> NodeCommand {
    NodeCommand::RemoveNodesFromAggregate {
        content_stream_id: live,
        node_aggregate_id: id("home"),
        dimension_space_point_set: points.iter().map(|p| language(p)).collect::<DimensionSpacePointSet>(),
    }
}

#[tokio::test]
async fn removal_that_strands_a_specialization_appends_nothing() {
    let (repository, live) = live_site(site_config()).await;
    repository.handle_node(create_page(live, "home", "sites", "en")).await.unwrap();
    let events = repository.event_store();
    let head = events.head().await.unwrap();
    let version = events.stream_version(&live.stream_name()).await.unwrap();

    // Removing en alone would leave de covered by a variant it cannot fall back to.
    let err = repository.handle_node(remove_at(live, &["en"])).await.unwrap_err();
    assert!(matches!(
        err,
        ContentRepositoryError::InvariantViolation(InvariantViolation::PointSetNotGeneralizationClosed { .. })
    ));
    assert_eq!(events.head().await.unwrap(), head);
    assert_eq!(events.stream_version(&live.stream_name()).await.unwrap(), version);
    assert_eq!(title(&repository, live, "home", "de").await, Some(json!("home")));
}

#[tokio::test]
async fn closed_sets_are_removed_point_by_point() {
    let (repository, live) = live_site(site_config()).await;
    repository.handle_node(create_page(live, "home", "sites", "en")).await.unwrap();

    repository.handle_node(remove_at(live, &["de"])).await.unwrap();
    assert_eq!(title(&repository, live, "home", "de").await, None);
    assert_eq!(title(&repository, live, "home", "en").await, Some(json!("home")));

    let err = repository.handle_node(remove_at(live, &["de"])).await.unwrap_err();
    assert!(err.is_invariant_violation());

    repository.handle_node(remove_at(live, &["en"])).await.unwrap();
    let tx = repository.read().await;
    assert!(tx.content_graph().find_node_aggregate_by_id(&live, &id("home")).is_none());
}
