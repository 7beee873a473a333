//! The content repository facade: one event store, one projection and the
//! command handlers sharing them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use content_dimension::{DimensionSpace, DimensionSpacePoint, OriginDimensionSpacePoint};
use content_eventstore::{EventStore, InMemoryEventStore, IntegrityReport};
use content_graph::{
    CatchUpStatus, ContentStreamCommand, ContentStreamId, ContentGraphProjection,
    NodeAggregateClassification, NodeAggregateId, NodeCommand, NodeIdToPublishOrDiscard, NodeTypeManager,
    ProjectionStore, ReadTransaction, VisibilityConstraints, WorkspaceCommand, WorkspaceName,
};

use crate::config::{CatchUpMode, RepositoryConfig};
use crate::context::{CommandResult, Core};
use crate::error::{ContentRepositoryError, ContentRepositoryResult};
use crate::handler::{
    ContentStreamCommandHandler, DiscardingResult, NodeAggregateCommandHandler, WorkspaceCommandHandler,
};

pub struct ContentRepository {
    config: RepositoryConfig,
    core: Arc<Core>,
    nodes: NodeAggregateCommandHandler,
    content_streams: ContentStreamCommandHandler,
    workspaces: WorkspaceCommandHandler,
    catch_up_task: Option<JoinHandle<()>>,
}

impl ContentRepository {
    /// Build a repository on `events`. Invalid dimension or node type
    /// configuration fails here, before anything is read.
    ///
    /// The projection is rebuilt from the log on every start. Snapshots need
    /// a store that outlives the process, see
    /// [`ContentRepository::with_projection_store`].
    pub async fn new(config: RepositoryConfig, events: Arc<dyn EventStore>) -> ContentRepositoryResult<Self> {
        if config.projection.snapshot_interval > 0 {
            warn!(
                snapshot_interval = config.projection.snapshot_interval,
                "no projection store given, snapshots are disabled"
            );
        }
        Self::build(config, events, None).await
    }

    /// Like [`ContentRepository::new`] with snapshots written to and
    /// restored from `store` every `snapshot_interval` events.
    pub async fn with_projection_store(
        config: RepositoryConfig,
        events: Arc<dyn EventStore>,
        store: Arc<dyn ProjectionStore>,
    ) -> ContentRepositoryResult<Self> {
        Self::build(config, events, Some(store)).await
    }

    pub async fn in_memory(config: RepositoryConfig) -> ContentRepositoryResult<Self> {
        Self::new(config, Arc::new(InMemoryEventStore::new())).await
    }

    #[instrument(skip_all)]
    async fn build(
        config: RepositoryConfig,
        events: Arc<dyn EventStore>,
        snapshots: Option<Arc<dyn ProjectionStore>>,
    ) -> ContentRepositoryResult<Self> {
        let dimensions = DimensionSpace::from_config(&config.dimensions)
            .map_err(|e| ContentRepositoryError::Configuration(e.to_string()))?;
        let node_types = NodeTypeManager::from_config(&config.node_types)?;

        let mut projection = ContentGraphProjection::new(Arc::clone(&events));
        if let Some(store) = snapshots {
            projection = projection.with_snapshots(store, config.projection.snapshot_interval.max(1));
        }
        let projection = Arc::new(projection);
        if let Some(checkpoint) = projection.restore().await? {
            debug!(checkpoint, "resuming projection from snapshot");
        }
        let checkpoint = projection.catch_up().await?;

        let catch_up_task = match config.projection.catch_up {
            CatchUpMode::Synchronous => None,
            CatchUpMode::Asynchronous => Some(projection.spawn_catch_up()),
        };

        let core = Arc::new(Core {
            dimensions,
            node_types,
            events,
            projection,
            catch_up: config.projection.catch_up,
            catch_up_timeout: Duration::from_millis(config.projection.catch_up_timeout_ms),
        });
        let nodes = NodeAggregateCommandHandler::new(Arc::clone(&core));
        let content_streams = ContentStreamCommandHandler::new(Arc::clone(&core));
        let workspaces = WorkspaceCommandHandler::new(Arc::clone(&core), nodes.clone(), content_streams.clone());

        info!(
            checkpoint,
            dimensions = config.dimensions.len(),
            node_types = config.node_types.len(),
            catch_up = ?config.projection.catch_up,
            "content repository ready"
        );
        Ok(Self {
            config,
            core,
            nodes,
            content_streams,
            workspaces,
            catch_up_task,
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn dimensions(&self) -> &DimensionSpace {
        &self.core.dimensions
    }

    pub fn node_types(&self) -> &NodeTypeManager {
        &self.core.node_types
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.core.events)
    }

    pub fn projection(&self) -> Arc<ContentGraphProjection> {
        Arc::clone(&self.core.projection)
    }

    // ── Commands ──

    pub async fn handle_node(&self, command: NodeCommand) -> ContentRepositoryResult<CommandResult> {
        self.nodes.handle(command).await
    }

    pub async fn handle_content_stream(&self, command: ContentStreamCommand) -> ContentRepositoryResult<CommandResult> {
        self.content_streams.handle(command).await
    }

    pub async fn handle_workspace(&self, command: WorkspaceCommand) -> ContentRepositoryResult<CommandResult> {
        self.workspaces.handle(command).await
    }

    /// Rebase with the configured error handling strategy.
    pub async fn rebase_workspace(
        &self,
        workspace_name: WorkspaceName,
        rebased_content_stream_id: ContentStreamId,
    ) -> ContentRepositoryResult<CommandResult> {
        self.workspaces
            .handle(WorkspaceCommand::RebaseWorkspace {
                workspace_name,
                rebased_content_stream_id,
                error_handling: self.config.rebase.error_handling,
            })
            .await
    }

    pub async fn discard_individual_nodes(
        &self,
        workspace_name: WorkspaceName,
        nodes_to_discard: Vec<NodeIdToPublishOrDiscard>,
        new_content_stream_id: ContentStreamId,
    ) -> ContentRepositoryResult<DiscardingResult> {
        self.workspaces
            .discard_individual_nodes(workspace_name, nodes_to_discard, new_content_stream_id)
            .await
    }

    /// Create a variant at `target` for every node visible at `source`,
    /// parents before children. Aggregates already occupying `target` are
    /// left alone. Returns the number of variants created.
    #[instrument(skip(self))]
    pub async fn create_variants_recursively(
        &self,
        content_stream_id: ContentStreamId,
        source: DimensionSpacePoint,
        target: OriginDimensionSpacePoint,
    ) -> ContentRepositoryResult<usize> {
        self.core.dimensions.ensure_allowed(&source)?;
        self.core.dimensions.ensure_allowed(target.as_point())?;
        self.core.sync().await?;

        let plan: Vec<(NodeAggregateId, OriginDimensionSpacePoint)> = {
            let tx = self.core.projection.read().await;
            let subgraph = tx.subgraph(content_stream_id, source, VisibilityConstraints::without_restrictions());
            let mut plan = Vec::new();
            let mut level = subgraph.find_root_nodes();
            while !level.is_empty() {
                let mut next = Vec::new();
                for node in level {
                    next.extend(subgraph.find_child_nodes(&node.node_aggregate_id));
                    if node.classification != NodeAggregateClassification::Root {
                        plan.push((node.node_aggregate_id, node.origin_dimension_space_point));
                    }
                }
                level = next;
            }
            plan
        };

        let mut created = 0;
        for (node_aggregate_id, source_origin) in plan {
            let occupied = self
                .core
                .context()
                .await
                .node_aggregate(&content_stream_id, &node_aggregate_id)?
                .occupies(&target);
            if occupied {
                continue;
            }
            self.nodes
                .handle(NodeCommand::CreateNodeVariant {
                    content_stream_id,
                    node_aggregate_id,
                    source_origin,
                    target_origin: target.clone(),
                })
                .await?;
            self.core.sync().await?;
            created += 1;
        }
        info!(content_stream = %content_stream_id, target = %target, created, "variants created");
        Ok(created)
    }

    // ── Reading ──

    /// Read transaction on the projection as it is now.
    pub async fn read(&self) -> ReadTransaction {
        self.core.projection.read().await
    }

    /// Wait, up to the configured timeout, for the projection to reflect
    /// `result`.
    pub async fn wait_for(&self, result: &CommandResult) -> CatchUpStatus {
        self.core
            .projection
            .wait_for(result.sequence, self.core.catch_up_timeout)
            .await
    }

    /// Read transaction that includes `result`, or `ProjectionLagging`.
    pub async fn read_after(&self, result: &CommandResult) -> ContentRepositoryResult<ReadTransaction> {
        match self.wait_for(result).await {
            CatchUpStatus::CaughtUp { .. } => Ok(self.read().await),
            CatchUpStatus::Lagging { checkpoint, requested } => {
                Err(ContentRepositoryError::ProjectionLagging { checkpoint, requested })
            }
        }
    }

    /// Drop the read model and replay the whole log.
    pub async fn rebuild_projection(&self) -> ContentRepositoryResult<u64> {
        Ok(self.core.projection.rebuild().await?)
    }

    pub async fn verify_integrity(&self) -> ContentRepositoryResult<IntegrityReport> {
        Ok(self.core.events.verify_integrity().await?)
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> Arc<Core> {
        Arc::clone(&self.core)
    }

    #[cfg(test)]
    pub(crate) fn handlers(&self) -> (NodeAggregateCommandHandler, ContentStreamCommandHandler, WorkspaceCommandHandler) {
        (self.nodes.clone(), self.content_streams.clone(), self.workspaces.clone())
    }
}

impl Drop for ContentRepository {
    fn drop(&mut self) {
        if let Some(task) = self.catch_up_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use content_dimension::DimensionValueConfig;
    use content_graph::InMemoryProjectionStore;
    use serde_json::json;

    use crate::config::ProjectionConfig;
    use crate::testing::{config, create_page, de, de_ch, en, set_title};

    async fn bootstrap(repository: &ContentRepository) -> ContentStreamId {
        let live = ContentStreamId::create();
        repository
            .handle_workspace(WorkspaceCommand::CreateRootWorkspace {
                workspace_name: WorkspaceName::new("live"),
                new_content_stream_id: live,
            })
            .await
            .unwrap();
        let result = repository
            .handle_node(NodeCommand::CreateRootNodeAggregateWithNode {
                content_stream_id: live,
                node_aggregate_id: NodeAggregateId::new("sites"),
                node_type_name: content_graph::NodeTypeName::new("Neos:Sites"),
            })
            .await
            .unwrap();
        repository.read_after(&result).await.unwrap();
        live
    }

    #[tokio::test]
    async fn invalid_configuration_fails_at_startup() {
        let mut invalid = config();
        invalid.dimensions[0]
            .values
            .push(DimensionValueConfig::new("fr").with_fallback("it"));
        let err = ContentRepository::in_memory(invalid).await.err().unwrap();
        assert!(matches!(err, ContentRepositoryError::Configuration(_)));

        let mut invalid = config();
        invalid
            .node_types
            .get_mut("Acme:Page")
            .unwrap()
            .super_types
            .push("Acme:Missing".to_string());
        let err = ContentRepository::in_memory(invalid).await.err().unwrap();
        assert!(matches!(err, ContentRepositoryError::Configuration(_)));
    }

    #[tokio::test]
    async fn asynchronous_catch_up_serves_read_your_writes() {
        let mut settings = config();
        settings.projection = ProjectionConfig {
            catch_up: CatchUpMode::Asynchronous,
            ..ProjectionConfig::default()
        };
        let repository = ContentRepository::in_memory(settings).await.unwrap();
        let live = bootstrap(&repository).await;

        let result = repository.handle_node(create_page(live, "home", "sites", en())).await.unwrap();
        let tx = repository.read_after(&result).await.unwrap();
        let subgraph = tx.subgraph(live, de(), VisibilityConstraints::frontend());
        assert!(subgraph.find_node_by_aggregate_id(&NodeAggregateId::new("home")).is_some());
    }

    #[tokio::test]
    async fn variants_are_created_top_down() {
        let repository = ContentRepository::in_memory(config()).await.unwrap();
        let live = bootstrap(&repository).await;
        repository.handle_node(create_page(live, "home", "sites", en())).await.unwrap();
        repository.handle_node(create_page(live, "news", "home", en())).await.unwrap();
        repository.handle_node(create_page(live, "item", "news", en())).await.unwrap();

        let target = OriginDimensionSpacePoint::from(de());
        let created = repository
            .create_variants_recursively(live, en(), target.clone())
            .await
            .unwrap();
        assert_eq!(created, 3);

        let again = repository
            .create_variants_recursively(live, en(), target.clone())
            .await
            .unwrap();
        assert_eq!(again, 0);

        let tx = repository.read().await;
        let subgraph = tx.subgraph(live, de_ch(), VisibilityConstraints::frontend());
        let item = subgraph.find_node_by_aggregate_id(&NodeAggregateId::new("item")).unwrap();
        assert_eq!(item.origin_dimension_space_point, target);
    }

    #[tokio::test]
    async fn snapshots_require_a_projection_store() {
        let mut settings = config();
        settings.projection.snapshot_interval = 2;
        let repository = ContentRepository::in_memory(settings.clone()).await.unwrap();
        assert!(!repository.core.projection.snapshots_enabled());

        let store: Arc<dyn ProjectionStore> = Arc::new(InMemoryProjectionStore::new());
        let repository =
            ContentRepository::with_projection_store(settings, Arc::new(InMemoryEventStore::new()), store)
                .await
                .unwrap();
        assert!(repository.core.projection.snapshots_enabled());
    }

    #[tokio::test]
    async fn restart_restores_from_snapshot_and_catches_up() {
        let events: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let store: Arc<dyn ProjectionStore> = Arc::new(InMemoryProjectionStore::new());
        let mut settings = config();
        settings.projection.snapshot_interval = 2;

        let live = {
            let repository = ContentRepository::with_projection_store(settings.clone(), Arc::clone(&events), Arc::clone(&store))
                .await
                .unwrap();
            let live = bootstrap(&repository).await;
            repository.handle_node(create_page(live, "home", "sites", en())).await.unwrap();
            live
        };
        events
            .append(
                &live.stream_name(),
                content_eventstore::ExpectedVersion::Any,
                vec![content_graph::ContentRepositoryEvent::NodePropertiesWereSet {
                    content_stream_id: live,
                    node_aggregate_id: NodeAggregateId::new("home"),
                    origin_dimension_space_point: OriginDimensionSpacePoint::from(en()),
                    property_values: [("title".to_string(), json!("Restored"))].into_iter().collect(),
                }
                .to_new_event(Default::default())
                .unwrap()],
            )
            .await
            .unwrap();

        let repository = ContentRepository::with_projection_store(settings, Arc::clone(&events), store)
            .await
            .unwrap();
        let tx = repository.read().await;
        assert_eq!(tx.checkpoint(), events.head().await.unwrap());
        let home = tx
            .subgraph(live, en(), VisibilityConstraints::frontend())
            .find_node_by_aggregate_id(&NodeAggregateId::new("home"))
            .unwrap();
        assert_eq!(home.property("title"), Some(&json!("Restored")));
    }

    #[tokio::test]
    async fn configured_rebase_strategy_applies() {
        let mut settings = config();
        settings.rebase.error_handling = content_graph::RebaseErrorHandlingStrategy::Force;
        let repository = ContentRepository::in_memory(settings).await.unwrap();
        let live = bootstrap(&repository).await;
        repository.handle_node(create_page(live, "home", "sites", en())).await.unwrap();

        let user = ContentStreamId::create();
        repository
            .handle_workspace(WorkspaceCommand::CreateWorkspace {
                workspace_name: WorkspaceName::new("user"),
                base_workspace_name: WorkspaceName::new("live"),
                new_content_stream_id: user,
            })
            .await
            .unwrap();
        repository.handle_node(set_title(user, "home", en(), "Draft")).await.unwrap();
        repository
            .handle_node(NodeCommand::RemoveNodeAggregate {
                content_stream_id: live,
                node_aggregate_id: NodeAggregateId::new("home"),
                covered_dimension_space_point: en(),
                strategy: content_graph::NodeVariantSelectionStrategy::AllVariants,
            })
            .await
            .unwrap();

        repository
            .rebase_workspace(WorkspaceName::new("user"), ContentStreamId::create())
            .await
            .unwrap();
        let report = repository.verify_integrity().await.unwrap();
        assert!(report.corrupted_sequences.is_empty());
    }
}
