//! End-to-end test: the `live` workspace with `language: en | de`, where
//! `de` falls back to `en`.

use content_graph::{NodeCommand, NodeVariantSelectionStrategy, VisibilityConstraints};
use content_tests::{create_page, id, language, live_site, origin, set_title, site_config, title};
use serde_json::json;

#[tokio::test]
async fn german_reads_fall_back_to_english_until_translated() {
    let (repository, live) = live_site(site_config()).await;
    repository.handle_node(create_page(live, "home", "sites", "en")).await.unwrap();
    repository.handle_node(create_page(live, "about", "home", "en")).await.unwrap();

    // No German variant yet: de resolves the English node.
    assert_eq!(title(&repository, live, "home", "de").await, Some(json!("home")));
    {
        let tx = repository.read().await;
        let home = tx
            .subgraph(live, language("de"), VisibilityConstraints::frontend())
            .find_node_by_aggregate_id(&id("home"))
            .unwrap();
        assert_eq!(home.origin_dimension_space_point, origin("en"));
    }

    repository
        .handle_node(NodeCommand::CreateNodeVariant {
            content_stream_id: live,
            node_aggregate_id: id("home"),
            source_origin: origin("en"),
            target_origin: origin("de"),
        })
        .await
        .unwrap();
    repository.handle_node(set_title(live, "home", "de", "Startseite")).await.unwrap();

    assert_eq!(title(&repository, live, "home", "de").await, Some(json!("Startseite")));
    assert_eq!(title(&repository, live, "home", "en").await, Some(json!("home")));

    // The untranslated child hangs below the German variant at de.
    let tx = repository.read().await;
    let de = tx.subgraph(live, language("de"), VisibilityConstraints::frontend());
    let parent = de.find_parent_node(&id("about")).unwrap();
    assert_eq!(parent.node_aggregate_id, id("home"));
    assert_eq!(parent.origin_dimension_space_point, origin("de"));
    let children: Vec<_> = de.find_child_nodes(&id("home")).into_iter().map(|n| n.node_aggregate_id).collect();
    assert_eq!(children, vec![id("about")]);
}

#[tokio::test]
async fn disabling_in_german_hides_the_subtree_there_only() {
    let (repository, live) = live_site(site_config()).await;
    repository.handle_node(create_page(live, "home", "sites", "en")).await.unwrap();
    repository.handle_node(create_page(live, "about", "home", "en")).await.unwrap();

    repository
        .handle_node(NodeCommand::DisableNodeAggregate {
            content_stream_id: live,
            node_aggregate_id: id("home"),
            covered_dimension_space_point: language("de"),
            strategy: NodeVariantSelectionStrategy::OnlyGivenVariant,
        })
        .await
        .unwrap();

    assert_eq!(title(&repository, live, "home", "de").await, None);
    assert_eq!(title(&repository, live, "about", "de").await, None);
    assert_eq!(title(&repository, live, "about", "en").await, Some(json!("about")));

    let tx = repository.read().await;
    let unrestricted = tx.subgraph(live, language("de"), VisibilityConstraints::without_restrictions());
    let about = unrestricted.find_node_by_aggregate_id(&id("about")).unwrap();
    assert!(about.restricted);
}

#[tokio::test]
async fn points_outside_the_dimension_space_are_rejected() {
    let (repository, live) = live_site(site_config()).await;
    let err = repository
        .handle_node(create_page(live, "home", "sites", "fr"))
        .await
        .unwrap_err();
    assert!(err.is_invariant_violation());
    assert_eq!(repository.read().await.content_graph().count_node_aggregates(&live), 1);
}
