//! End-to-end test: a review chain `live <- review <- user` with partial
//! publishing, partial discarding, base changes and deletion.

use content_graph::{ContentStreamId, ContentStreamStatus, NodeIdToPublishOrDiscard, WorkspaceCommand};
use content_repository::{ContentRepository, ContentRepositoryError};
use content_tests::{create_page, id, live_site, site_config, title, workspace};
use serde_json::json;

async fn branch(repository: &ContentRepository, name: &str, base: &str) -> ContentStreamId {
    let stream = ContentStreamId::create();
    repository
        .handle_workspace(WorkspaceCommand::CreateWorkspace {
            workspace_name: workspace(name),
            base_workspace_name: workspace(base),
            new_content_stream_id: stream,
        })
        .await
        .unwrap();
    stream
}

async fn current(repository: &ContentRepository, name: &str) -> ContentStreamId {
    repository
        .read()
        .await
        .content_graph()
        .workspace(&workspace(name))
        .unwrap()
        .current_content_stream_id
}

#[tokio::test]
async fn publishing_through_a_review_workspace() {
    let (repository, live) = live_site(site_config()).await;
    let review = branch(&repository, "review", "live").await;
    let user = branch(&repository, "user", "review").await;

    repository.handle_node(create_page(user, "news", "sites", "en")).await.unwrap();
    repository.handle_node(create_page(user, "draft", "sites", "en")).await.unwrap();

    repository
        .handle_workspace(WorkspaceCommand::PublishIndividualNodesFromWorkspace {
            workspace_name: workspace("user"),
            nodes_to_publish: vec![NodeIdToPublishOrDiscard::new(id("news"))],
            content_stream_id_for_matching_part: ContentStreamId::create(),
            content_stream_id_for_remaining_part: ContentStreamId::create(),
        })
        .await
        .unwrap();
    assert_eq!(title(&repository, review, "news", "en").await, Some(json!("news")));
    assert_eq!(title(&repository, review, "draft", "en").await, None);
    assert_eq!(title(&repository, live, "news", "en").await, None);
    let user = current(&repository, "user").await;
    assert_eq!(title(&repository, user, "draft", "en").await, Some(json!("draft")));

    repository
        .handle_workspace(WorkspaceCommand::PublishWorkspace {
            workspace_name: workspace("review"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();
    assert_eq!(title(&repository, live, "news", "de").await, Some(json!("news")));

    let discarded = repository
        .discard_individual_nodes(
            workspace("user"),
            vec![NodeIdToPublishOrDiscard::new(id("draft"))],
            ContentStreamId::create(),
        )
        .await
        .unwrap();
    assert_eq!(discarded.number_of_discarded_changes, 1);
    let user = current(&repository, "user").await;
    assert_eq!(title(&repository, user, "draft", "en").await, None);
}

#[tokio::test]
async fn rebasing_the_chain_after_live_moves() {
    let (repository, live) = live_site(site_config()).await;
    branch(&repository, "review", "live").await;
    let user = branch(&repository, "user", "review").await;
    repository.handle_node(create_page(user, "news", "sites", "en")).await.unwrap();
    repository.handle_node(create_page(live, "hotfix", "sites", "en")).await.unwrap();

    // review has nothing of its own; it only needs to catch up.
    repository
        .rebase_workspace(workspace("review"), ContentStreamId::create())
        .await
        .unwrap();
    repository
        .rebase_workspace(workspace("user"), ContentStreamId::create())
        .await
        .unwrap();

    let user = current(&repository, "user").await;
    assert_eq!(title(&repository, user, "hotfix", "en").await, Some(json!("hotfix")));
    assert_eq!(title(&repository, user, "news", "en").await, Some(json!("news")));
}

#[tokio::test]
async fn moving_and_deleting_workspaces() {
    let (repository, _live) = live_site(site_config()).await;
    branch(&repository, "review", "live").await;
    let user = branch(&repository, "user", "review").await;

    let err = repository
        .handle_workspace(WorkspaceCommand::DeleteWorkspace {
            workspace_name: workspace("review"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ContentRepositoryError::WorkspaceHasDependents { .. }));

    repository
        .handle_workspace(WorkspaceCommand::ChangeBaseWorkspace {
            workspace_name: workspace("user"),
            base_workspace_name: workspace("live"),
            new_content_stream_id: ContentStreamId::create(),
        })
        .await
        .unwrap();
    repository
        .handle_workspace(WorkspaceCommand::DeleteWorkspace {
            workspace_name: workspace("review"),
        })
        .await
        .unwrap();

    let tx = repository.read().await;
    let graph = tx.content_graph();
    assert!(graph.workspace(&workspace("review")).is_none());
    let moved = graph.workspace(&workspace("user")).unwrap();
    assert_eq!(moved.base_workspace_name, Some(workspace("live")));
    assert_eq!(graph.content_stream(&user).unwrap().status, ContentStreamStatus::Removed);
}
