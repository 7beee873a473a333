//! End-to-end test: a `feature` workspace branches off `live`, stays
//! isolated while it is edited and hands its changes over on publish.

use content_graph::{ContentStreamId, RebaseErrorHandlingStrategy, WorkspaceCommand, WorkspaceStatus};
use content_repository::ContentRepositoryError;
use content_tests::{create_page, live_site, set_title, site_config, title, workspace};
use serde_json::json;

async fn feature_stream(repository: &content_repository::ContentRepository) -> ContentStreamId {
    repository
        .read()
        .await
        .content_graph()
        .workspace(&workspace("feature"))
        .unwrap()
        .current_content_stream_id
}

#[tokio::test]
async fn feature_changes_are_isolated_until_published() {
    let (repository, live) = live_site(site_config()).await;
    repository.handle_node(create_page(live, "home", "sites", "en")).await.unwrap();

    repository
        .handle_workspace(WorkspaceCommand::CreateWorkspace {
            workspace_name: workspace("feature"),
            base_workspace_name: workspace("live"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();
    let feature = feature_stream(&repository).await;

    repository.handle_node(set_title(feature, "home", "en", "New home")).await.unwrap();
    repository.handle_node(create_page(feature, "launch", "home", "en")).await.unwrap();

    assert_eq!(title(&repository, live, "home", "en").await, Some(json!("home")));
    assert_eq!(title(&repository, live, "launch", "en").await, None);
    assert_eq!(title(&repository, feature, "home", "en").await, Some(json!("New home")));
    // Fallback works inside the branch as well.
    assert_eq!(title(&repository, feature, "launch", "de").await, Some(json!("launch")));

    repository
        .handle_workspace(WorkspaceCommand::PublishWorkspace {
            workspace_name: workspace("feature"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();

    assert_eq!(title(&repository, live, "home", "en").await, Some(json!("New home")));
    assert_eq!(title(&repository, live, "launch", "de").await, Some(json!("launch")));

    let graph_tx = repository.read().await;
    let graph = graph_tx.content_graph();
    let feature_ws = graph.workspace(&workspace("feature")).unwrap();
    assert_eq!(feature_ws.status, WorkspaceStatus::UpToDate);
    assert_ne!(feature_ws.current_content_stream_id, feature);
    assert_eq!(
        graph.count_node_aggregates(&feature_ws.current_content_stream_id),
        graph.count_node_aggregates(&live)
    );
}

#[tokio::test]
async fn concurrent_live_edits_require_a_rebase() {
    let (repository, live) = live_site(site_config()).await;
    repository.handle_node(create_page(live, "home", "sites", "en")).await.unwrap();
    repository
        .handle_workspace(WorkspaceCommand::CreateWorkspace {
            workspace_name: workspace("feature"),
            base_workspace_name: workspace("live"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();
    let feature = feature_stream(&repository).await;
    repository.handle_node(create_page(feature, "launch", "home", "en")).await.unwrap();
    repository.handle_node(set_title(live, "home", "en", "Hotfix")).await.unwrap();

    let err = repository
        .handle_workspace(WorkspaceCommand::PublishWorkspace {
            workspace_name: workspace("feature"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ContentRepositoryError::WorkspaceIsOutdated(_)));

    repository
        .handle_workspace(WorkspaceCommand::RebaseWorkspace {
            workspace_name: workspace("feature"),
            rebased_content_stream_id: ContentStreamId::create(),
            error_handling: RebaseErrorHandlingStrategy::Fail,
        })
        .await
        .unwrap();
    let rebased = feature_stream(&repository).await;
    assert_eq!(title(&repository, rebased, "home", "en").await, Some(json!("Hotfix")));
    assert_eq!(title(&repository, rebased, "launch", "en").await, Some(json!("launch")));

    repository
        .handle_workspace(WorkspaceCommand::PublishWorkspace {
            workspace_name: workspace("feature"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();
    assert_eq!(title(&repository, live, "launch", "en").await, Some(json!("launch")));
    assert_eq!(title(&repository, live, "home", "en").await, Some(json!("Hotfix")));
}
