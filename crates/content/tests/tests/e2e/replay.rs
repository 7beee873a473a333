//! End-to-end test: the read model is a pure function of the event log.

use content_graph::{ContentStreamId, NodeCommand, NodeVariantSelectionStrategy, WorkspaceCommand};
use content_repository::ContentRepository;
use content_tests::{create_page, id, language, live_site, origin, set_title, site_config, workspace};

async fn build_history(repository: &ContentRepository, live: ContentStreamId) {
    repository.handle_node(create_page(live, "home", "sites", "en")).await.unwrap();
    repository.handle_node(create_page(live, "about", "home", "en")).await.unwrap();
    repository
        .handle_node(NodeCommand::CreateNodeVariant {
            content_stream_id: live,
            node_aggregate_id: id("home"),
            source_origin: origin("en"),
            target_origin: origin("de"),
        })
        .await
        .unwrap();
    repository
        .handle_node(NodeCommand::DisableNodeAggregate {
            content_stream_id: live,
            node_aggregate_id: id("about"),
            covered_dimension_space_point: language("de"),
            strategy: NodeVariantSelectionStrategy::AllSpecializations,
        })
        .await
        .unwrap();

    repository
        .handle_workspace(WorkspaceCommand::CreateWorkspace {
            workspace_name: workspace("feature"),
            base_workspace_name: workspace("live"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();
    let feature = repository
        .read()
        .await
        .content_graph()
        .workspace(&workspace("feature"))
        .unwrap()
        .current_content_stream_id;
    repository.handle_node(set_title(feature, "home", "de", "Startseite")).await.unwrap();
    repository
        .handle_workspace(WorkspaceCommand::PublishWorkspace {
            workspace_name: workspace("feature"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn rebuilding_yields_the_same_state() {
    let (repository, live) = live_site(site_config()).await;
    build_history(&repository, live).await;
    let projection = repository.projection();
    let before = projection.state().await;

    let checkpoint = repository.rebuild_projection().await.unwrap();
    assert_eq!(checkpoint, before.checkpoint);
    assert_eq!(projection.state().await, before);

    repository.rebuild_projection().await.unwrap();
    assert_eq!(projection.state().await, before);
}

#[tokio::test]
async fn a_second_repository_on_the_same_log_agrees() {
    let (repository, live) = live_site(site_config()).await;
    build_history(&repository, live).await;

    let replica = ContentRepository::new(site_config(), repository.event_store()).await.unwrap();
    assert_eq!(replica.projection().state().await, repository.projection().state().await);

    let report = replica.verify_integrity().await.unwrap();
    assert_eq!(report.total_events, report.verified_events);
    assert!(report.corrupted_sequences.is_empty());
}
