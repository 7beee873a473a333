//! End-to-end test: appends to one stream are serialized by their expected
//! version.

use content_eventstore::{EventStore, EventStoreError, ExpectedVersion, InMemoryEventStore, NewEvent, StreamName};
use content_repository::ContentRepositoryResult;
use content_tests::{create_page, id, live_site, site_config};
use futures::future::join_all;
use serde_json::json;

#[tokio::test]
async fn same_expected_version_has_exactly_one_winner() {
    let store = InMemoryEventStore::new();
    let stream = StreamName::new("ContentStream:race");
    store
        .append(&stream, ExpectedVersion::NoStream, vec![NewEvent::new("Seeded", json!({}))])
        .await
        .unwrap();

    let (left, right) = tokio::join!(
        store.append(&stream, ExpectedVersion::Exact(1), vec![NewEvent::new("Left", json!({}))]),
        store.append(&stream, ExpectedVersion::Exact(1), vec![NewEvent::new("Right", json!({}))]),
    );
    let outcomes = [left, right];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(EventStoreError::ConcurrencyConflict { actual: 2, .. }))));
    assert_eq!(store.stream_version(&stream).await.unwrap(), Some(2));
}

#[tokio::test]
async fn retried_commands_converge() {
    let (repository, live) = live_site(site_config()).await;
    let pages: Vec<String> = (0..8).map(|i| format!("page-{i}")).collect();

    let outcomes: Vec<ContentRepositoryResult<()>> = join_all(pages.iter().map(|page| {
        let repository = &repository;
        async move {
            loop {
                match repository.handle_node(create_page(live, page, "sites", "en")).await {
                    Ok(_) => return Ok(()),
                    Err(e) if e.is_retryable() => {
                        repository.projection().catch_up().await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }))
    .await;
    assert!(outcomes.iter().all(|r| r.is_ok()));

    let tx = repository.read().await;
    let graph = tx.content_graph();
    assert_eq!(graph.count_node_aggregates(&live), pages.len() + 1);
    for page in &pages {
        assert!(graph.find_node_aggregate_by_id(&live, &id(page)).is_some());
    }
}
