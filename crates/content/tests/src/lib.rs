//! Shared scenario helpers for the content repository suites.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use content_dimension::{DimensionConfig, DimensionSpacePoint, DimensionValueConfig, OriginDimensionSpacePoint};
use content_graph::{
    ContentStreamId, InsertPosition, NodeAggregateId, NodeCommand, NodeName, NodeTypeConfig, NodeTypeName,
    PropertyType, ReferenceConfig, VisibilityConstraints, WorkspaceCommand, WorkspaceName,
};
use content_repository::{ContentRepository, RepositoryConfig};

pub fn language(value: &str) -> DimensionSpacePoint {
    DimensionSpacePoint::new([("language", value)])
}

pub fn origin(value: &str) -> OriginDimensionSpacePoint {
    OriginDimensionSpacePoint::from(language(value))
}

pub fn id(value: &str) -> NodeAggregateId {
    NodeAggregateId::new(value)
}

pub fn workspace(name: &str) -> WorkspaceName {
    WorkspaceName::new(name)
}

/// `language: en <- de`, the `Neos:Sites` root type and `Acme:Page`.
pub fn site_config() -> RepositoryConfig {
    let mut node_types = BTreeMap::new();
    node_types.insert(
        "Neos:Sites".to_string(),
        NodeTypeConfig {
            root: true,
            ..NodeTypeConfig::default()
        },
    );
    node_types.insert(
        "Acme:Page".to_string(),
        NodeTypeConfig {
            properties: [("title".to_string(), PropertyType::String)].into_iter().collect(),
            references: [("related".to_string(), ReferenceConfig::default())].into_iter().collect(),
            ..NodeTypeConfig::default()
        },
    );
    RepositoryConfig {
        dimensions: vec![DimensionConfig {
            id: "language".to_string(),
            values: vec![DimensionValueConfig::new("en"), DimensionValueConfig::new("de").with_fallback("en")],
        }],
        node_types,
        ..RepositoryConfig::default()
    }
}

/// A repository with the `live` root workspace and a `sites` root node.
pub async fn live_site(config: RepositoryConfig) -> (ContentRepository, ContentStreamId) {
    let repository = ContentRepository::in_memory(config)
        .await
        .expect("repository starts");
    let live = ContentStreamId::create();
    repository
        .handle_workspace(WorkspaceCommand::CreateRootWorkspace {
            workspace_name: workspace("live"),
            new_content_stream_id: live,
        })
        .await
        .expect("live workspace");
    let result = repository
        .handle_node(NodeCommand::CreateRootNodeAggregateWithNode {
            content_stream_id: live,
            node_aggregate_id: id("sites"),
            node_type_name: NodeTypeName::new("Neos:Sites"),
        })
        .await
        .expect("sites root");
    repository.read_after(&result).await.expect("projection caught up");
    (repository, live)
}

pub fn create_page(stream: ContentStreamId, page: &str, parent: &str, at: &str) -> NodeCommand {
    NodeCommand::CreateNodeAggregateWithNode {
        content_stream_id: stream,
        node_aggregate_id: id(page),
        node_type_name: NodeTypeName::new("Acme:Page"),
        origin_dimension_space_point: origin(at),
        parent_node_aggregate_id: id(parent),
        node_name: Some(NodeName::new(page)),
        initial_property_values: [("title".to_string(), json!(page))].into_iter().collect(),
        position: InsertPosition::Last,
    }
}

pub fn set_title(stream: ContentStreamId, page: &str, at: &str, title: &str) -> NodeCommand {
    NodeCommand::SetNodeProperties {
        content_stream_id: stream,
        node_aggregate_id: id(page),
        origin_dimension_space_point: origin(at),
        property_values: [("title".to_string(), json!(title))].into_iter().collect(),
    }
}

/// Title of `page` as the frontend sees it at `at`.
pub async fn title(repository: &ContentRepository, stream: ContentStreamId, page: &str, at: &str) -> Option<Value> {
    let tx = repository.read().await;
    let node = tx
        .subgraph(stream, language(at), VisibilityConstraints::frontend())
        .find_node_by_aggregate_id(&id(page))?;
    node.property("title").cloned()
}
