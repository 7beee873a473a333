//! Workspace command handler.
//!
//! A workspace is a named pointer to a content stream. Operations that swap
//! the pointer run inside an exclusive section per workspace and follow the
//! same shape: close the current stream, build the replacement, commit the
//! pointer change, then remove the old stream. Any failure before the
//! pointer commit removes the streams the operation forked and reopens the
//! old stream, so the workspace always points at a live stream.
//!
//! A process that dies mid-operation leaves the stream closed for rebasing.
//! The next command on the workspace removes the forks tagged with that
//! stream and reopens it before running. Changes carry their causation id
//! into every stream they are copied to, so a publish that already reached
//! the base is not appended twice when re-run.
//!
//! Changes are moved between streams by re-handling the commands recorded in
//! the event metadata, which re-validates every invariant against the new
//! base.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::TryStreamExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use content_eventstore::{EventMetadata, ExpectedVersion};
use content_graph::{
    ClosePurpose, ContentRepositoryEvent, ContentStream, ContentStreamId, ContentStreamStatus, NodeCommand,
    NodeIdToPublishOrDiscard, RebaseErrorHandlingStrategy, WorkspaceCommand, WorkspaceName, WorkspaceStatus,
};

use crate::context::{CommandResult, Core};
use crate::error::{CommandConflict, ContentRepositoryError, ContentRepositoryResult};
use crate::handler::content_stream::ContentStreamCommandHandler;
use crate::handler::node::NodeAggregateCommandHandler;

/// Outcome of discarding selected changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardingResult {
    pub number_of_discarded_changes: usize,
    pub result: CommandResult,
}

/// The events one command appended to a content stream.
#[derive(Debug, Clone)]
struct Change {
    causation_id: Option<Uuid>,
    command: Option<NodeCommand>,
    events: Vec<(ContentRepositoryEvent, EventMetadata)>,
}

impl Change {
    /// Changes without a recorded command are never selected.
    fn is_selected_by(&self, selection: &[NodeIdToPublishOrDiscard]) -> bool {
        self.command
            .as_ref()
            .is_some_and(|command| selection.iter().any(|s| command.matches(s)))
    }
}

/// Changes of a workspace measured against its base.
#[derive(Debug)]
struct Pending {
    /// Changes the base does not hold yet.
    changes: Vec<Change>,
    /// Changes an interrupted publish already appended to the base.
    landed: usize,
    /// The base moved on with node changes from elsewhere.
    outdated: bool,
}

fn partition(changes: Vec<Change>, selection: &[NodeIdToPublishOrDiscard]) -> (Vec<Change>, Vec<Change>) {
    changes.into_iter().partition(|change| change.is_selected_by(selection))
}

fn retarget(changes: &[Change], target: ContentStreamId) -> Vec<(ContentRepositoryEvent, EventMetadata)> {
    changes
        .iter()
        .flat_map(|change| change.events.iter())
        .map(|(event, metadata)| (event.with_content_stream_id(target), metadata.clone()))
        .collect()
}

#[derive(Clone)]
pub struct WorkspaceCommandHandler {
    core: Arc<Core>,
    nodes: NodeAggregateCommandHandler,
    content_streams: ContentStreamCommandHandler,
    locks: Arc<Mutex<HashMap<WorkspaceName, Arc<Mutex<()>>>>>,
}

impl WorkspaceCommandHandler {
    pub(crate) fn new(
        core: Arc<Core>,
        nodes: NodeAggregateCommandHandler,
        content_streams: ContentStreamCommandHandler,
    ) -> Self {
        Self {
            core,
            nodes,
            content_streams,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn handle(&self, command: WorkspaceCommand) -> ContentRepositoryResult<CommandResult> {
        let name = match &command {
            WorkspaceCommand::CreateRootWorkspace { workspace_name, .. }
            | WorkspaceCommand::CreateWorkspace { workspace_name, .. }
            | WorkspaceCommand::RebaseWorkspace { workspace_name, .. }
            | WorkspaceCommand::PublishWorkspace { workspace_name, .. }
            | WorkspaceCommand::PublishIndividualNodesFromWorkspace { workspace_name, .. }
            | WorkspaceCommand::DiscardWorkspace { workspace_name, .. }
            | WorkspaceCommand::DiscardIndividualNodesFromWorkspace { workspace_name, .. }
            | WorkspaceCommand::ChangeBaseWorkspace { workspace_name, .. }
            | WorkspaceCommand::DeleteWorkspace { workspace_name } => workspace_name.clone(),
        };
        let _section = self.lock(&name).await;
        self.resume(&name).await?;

        let outcome = match command {
            WorkspaceCommand::CreateRootWorkspace {
                workspace_name,
                new_content_stream_id,
            } => self.create_root(workspace_name, new_content_stream_id).await,
            WorkspaceCommand::CreateWorkspace {
                workspace_name,
                base_workspace_name,
                new_content_stream_id,
            } => self.create(workspace_name, base_workspace_name, new_content_stream_id).await,
            WorkspaceCommand::RebaseWorkspace {
                workspace_name,
                rebased_content_stream_id,
                error_handling,
            } => self.rebase(workspace_name, rebased_content_stream_id, error_handling).await,
            WorkspaceCommand::PublishWorkspace {
                workspace_name,
                new_content_stream_id,
            } => self.publish(workspace_name, new_content_stream_id).await,
            WorkspaceCommand::PublishIndividualNodesFromWorkspace {
                workspace_name,
                nodes_to_publish,
                content_stream_id_for_matching_part,
                content_stream_id_for_remaining_part,
            } => {
                self.publish_nodes(
                    workspace_name,
                    nodes_to_publish,
                    content_stream_id_for_matching_part,
                    content_stream_id_for_remaining_part,
                )
                .await
            }
            WorkspaceCommand::DiscardWorkspace {
                workspace_name,
                new_content_stream_id,
            } => self.discard(workspace_name, new_content_stream_id).await,
            WorkspaceCommand::DiscardIndividualNodesFromWorkspace {
                workspace_name,
                nodes_to_discard,
                new_content_stream_id,
            } => self
                .discard_nodes(workspace_name, nodes_to_discard, new_content_stream_id)
                .await
                .map(|discarded| discarded.result),
            WorkspaceCommand::ChangeBaseWorkspace {
                workspace_name,
                base_workspace_name,
                new_content_stream_id,
            } => self.change_base(workspace_name, base_workspace_name, new_content_stream_id).await,
            WorkspaceCommand::DeleteWorkspace { workspace_name } => self.delete(workspace_name).await,
        };
        // The pointer change is visible once the call returns, whatever the
        // catch-up mode.
        if outcome.is_ok() {
            self.core.sync().await?;
        }
        outcome
    }

    /// Discard the selected changes and report how many were dropped.
    pub async fn discard_individual_nodes(
        &self,
        workspace_name: WorkspaceName,
        nodes_to_discard: Vec<NodeIdToPublishOrDiscard>,
        new_content_stream_id: ContentStreamId,
    ) -> ContentRepositoryResult<DiscardingResult> {
        let _section = self.lock(&workspace_name).await;
        self.resume(&workspace_name).await?;
        let discarded = self
            .discard_nodes(workspace_name, nodes_to_discard, new_content_stream_id)
            .await?;
        self.core.sync().await?;
        Ok(discarded)
    }

    async fn lock(&self, name: &WorkspaceName) -> OwnedMutexGuard<()> {
        let section = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(name.clone()).or_default())
        };
        section.lock_owned().await
    }

    /// Drop the section of a deleted workspace. Called while holding it, so
    /// two references mean nobody else is queued.
    async fn forget(&self, name: &WorkspaceName) {
        let mut locks = self.locks.lock().await;
        if locks.get(name).is_some_and(|section| Arc::strong_count(section) <= 2) {
            locks.remove(name);
        }
    }

    /// Clean up after an operation that never finished: remove the streams
    /// it forked and reopen the workspace's stream.
    async fn resume(&self, name: &WorkspaceName) -> ContentRepositoryResult<()> {
        self.core.sync().await?;
        let (old, candidates) = {
            let ctx = self.core.context().await;
            let Some(workspace) = ctx.graph().workspace(name) else {
                return Ok(());
            };
            let old = workspace.current_content_stream_id;
            if ctx.content_stream(&old)?.status != ContentStreamStatus::Rebasing {
                return Ok(());
            }
            let candidates: Vec<ContentStreamId> = ctx
                .graph()
                .content_streams()
                .into_iter()
                .filter(|s| s.status != ContentStreamStatus::Removed && s.source_content_stream_id.is_some())
                .filter(|s| ctx.graph().workspace_by_content_stream(&s.id).is_none())
                .map(|s| s.id)
                .collect();
            (old, candidates)
        };

        let mut orphans = Vec::new();
        for id in candidates {
            let mut events = self.core.events.read_stream(&id.stream_name(), 1).await?;
            if let Some(first) = events.try_next().await? {
                if first.metadata.causation_id == Some(old.as_uuid()) {
                    orphans.push(id);
                }
            }
        }
        warn!(workspace = %name, content_stream = %old, orphans = orphans.len(), "resuming interrupted workspace operation");
        self.discard_streams(&orphans).await;
        self.content_streams.reopen(old, ContentStreamStatus::Open).await?;
        self.core.sync().await?;
        Ok(())
    }

    // ── Creation ──

    #[instrument(skip(self))]
    async fn create_root(&self, name: WorkspaceName, content_stream_id: ContentStreamId) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        if self.core.context().await.graph().workspace(&name).is_some() {
            return Err(ContentRepositoryError::WorkspaceAlreadyExists(name));
        }
        let expected = self.core.current_version(&name.stream_name()).await?;
        self.content_streams.create(content_stream_id).await?;
        let event = ContentRepositoryEvent::RootWorkspaceWasCreated {
            workspace_name: name.clone(),
            new_content_stream_id: content_stream_id,
        };
        let result = self.commit_pointer(&name, expected, event, content_stream_id).await?;
        info!(workspace = %name, content_stream = %content_stream_id, "root workspace created");
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn create(
        &self,
        name: WorkspaceName,
        base: WorkspaceName,
        content_stream_id: ContentStreamId,
    ) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        let base_stream = {
            let ctx = self.core.context().await;
            if ctx.graph().workspace(&name).is_some() {
                return Err(ContentRepositoryError::WorkspaceAlreadyExists(name));
            }
            ctx.workspace(&base)?.current_content_stream_id
        };
        let expected = self.core.current_version(&name.stream_name()).await?;
        self.content_streams.fork(base_stream, content_stream_id).await?;
        let event = ContentRepositoryEvent::WorkspaceWasCreated {
            workspace_name: name.clone(),
            base_workspace_name: base.clone(),
            new_content_stream_id: content_stream_id,
        };
        let result = self.commit_pointer(&name, expected, event, content_stream_id).await?;
        info!(workspace = %name, base = %base, content_stream = %content_stream_id, "workspace created");
        Ok(result)
    }

    /// Commit a pointer event for a freshly created workspace, removing the
    /// stream this call just created for it if the commit fails.
    async fn commit_pointer(
        &self,
        name: &WorkspaceName,
        expected: ExpectedVersion,
        event: ContentRepositoryEvent,
        created: ContentStreamId,
    ) -> ContentRepositoryResult<CommandResult> {
        match self
            .core
            .commit(&name.stream_name(), expected, &[event], EventMetadata::default())
            .await
        {
            Ok(result) => Ok(result),
            Err(e) => {
                self.discard_streams(&[created]).await;
                Err(e)
            }
        }
    }

    // ── Rebase ──

    #[instrument(skip(self))]
    async fn rebase(
        &self,
        name: WorkspaceName,
        new_content_stream_id: ContentStreamId,
        strategy: RebaseErrorHandlingStrategy,
    ) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        let (workspace, own, base_stream, checkpoint) = {
            let ctx = self.core.context().await;
            let workspace = ctx.workspace(&name)?;
            let base = workspace
                .base_workspace_name
                .clone()
                .ok_or_else(|| ContentRepositoryError::WorkspaceHasNoBase(name.clone()))?;
            let base_stream = ctx.workspace(&base)?.current_content_stream_id;
            let own = ctx.content_stream(&workspace.current_content_stream_id)?;
            (workspace, own, base_stream, ctx.checkpoint())
        };
        if workspace.status == WorkspaceStatus::UpToDate {
            return Ok(CommandResult::noop(checkpoint));
        }

        let old = workspace.current_content_stream_id;
        let pending = self.pending(&own, base_stream).await?;
        self.ensure_unused(&[new_content_stream_id]).await?;
        let expected = self.core.current_version(&name.stream_name()).await?;
        let previous = self.begin(old).await?;

        let mut created = Vec::new();
        let outcome = async {
            self.fork(old, base_stream, new_content_stream_id, &mut created).await?;
            let conflicts = self.replay(new_content_stream_id, &pending.changes).await?;
            if !conflicts.is_empty() {
                if strategy == RebaseErrorHandlingStrategy::Fail {
                    return Err(ContentRepositoryError::WorkspaceRebaseFailed {
                        workspace: name.clone(),
                        conflicts,
                    });
                }
                for conflict in &conflicts {
                    warn!(
                        workspace = %name,
                        command = %conflict.command_type,
                        node = %conflict.node_aggregate_id,
                        reason = %conflict.reason,
                        "skipping conflicting command"
                    );
                }
            }
            let event = ContentRepositoryEvent::WorkspaceWasRebased {
                workspace_name: name.clone(),
                new_content_stream_id,
                previous_content_stream_id: old,
                skipped_commands: conflicts.len(),
            };
            self.core
                .commit(&name.stream_name(), expected, &[event], EventMetadata::default())
                .await
        }
        .await;

        let result = self
            .settle(old, previous, &created, new_content_stream_id, outcome)
            .await?;
        info!(
            workspace = %name,
            content_stream = %new_content_stream_id,
            changes = pending.changes.len(),
            "workspace rebased"
        );
        Ok(result)
    }

    // ── Publishing ──

    /// Append the pending changes to the base, then point the workspace at
    /// a fresh fork of it. Changes a previous attempt already appended are
    /// not appended again.
    #[instrument(skip(self))]
    async fn publish(&self, name: WorkspaceName, new_content_stream_id: ContentStreamId) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        let (workspace, own, base, base_stream, checkpoint) = {
            let ctx = self.core.context().await;
            let workspace = ctx.workspace(&name)?;
            let base = workspace
                .base_workspace_name
                .clone()
                .ok_or_else(|| ContentRepositoryError::WorkspaceHasNoBase(name.clone()))?;
            let base_stream = ctx.workspace(&base)?.current_content_stream_id;
            ctx.writable_stream(&base_stream)?;
            let own = ctx.content_stream(&workspace.current_content_stream_id)?;
            (workspace, own, base, base_stream, ctx.checkpoint())
        };

        let old = workspace.current_content_stream_id;
        let pending = self.pending(&own, base_stream).await?;
        if pending.outdated {
            return Err(ContentRepositoryError::WorkspaceIsOutdated(name));
        }
        if pending.changes.is_empty() && pending.landed == 0 {
            return Ok(CommandResult::noop(checkpoint));
        }
        self.ensure_unused(&[new_content_stream_id]).await?;
        let base_tip = self.core.current_version(&base_stream.stream_name()).await?;
        let expected = self.core.current_version(&name.stream_name()).await?;
        let previous = self.begin(old).await?;

        let mut created = Vec::new();
        let outcome = async {
            if !pending.changes.is_empty() {
                self.core
                    .commit_recorded(
                        &base_stream.stream_name(),
                        base_tip,
                        retarget(&pending.changes, base_stream),
                    )
                    .await?;
                self.core.sync().await?;
            }
            self.fork(old, base_stream, new_content_stream_id, &mut created).await?;
            let event = ContentRepositoryEvent::WorkspaceWasPublished {
                source_workspace_name: name.clone(),
                target_workspace_name: base.clone(),
                new_source_content_stream_id: new_content_stream_id,
                previous_source_content_stream_id: old,
            };
            self.core
                .commit(&name.stream_name(), expected, &[event], EventMetadata::default())
                .await
        }
        .await;

        let result = self
            .settle(old, previous, &created, new_content_stream_id, outcome)
            .await?;
        info!(
            workspace = %name,
            base = %base,
            changes = pending.changes.len(),
            already_published = pending.landed,
            "workspace published"
        );
        Ok(result)
    }

    /// Publish the selected changes. They are first replayed onto a fork of
    /// the base so they are validated without the unselected changes, then
    /// appended to the base. The remaining changes are replayed onto a new
    /// fork of the updated base; those that no longer apply are dropped.
    #[instrument(skip(self, selection))]
    async fn publish_nodes(
        &self,
        name: WorkspaceName,
        selection: Vec<NodeIdToPublishOrDiscard>,
        matching_part: ContentStreamId,
        remaining_part: ContentStreamId,
    ) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        let (workspace, own, base, base_stream, checkpoint) = {
            let ctx = self.core.context().await;
            let workspace = ctx.workspace(&name)?;
            let base = workspace
                .base_workspace_name
                .clone()
                .ok_or_else(|| ContentRepositoryError::WorkspaceHasNoBase(name.clone()))?;
            let base_stream = ctx.workspace(&base)?.current_content_stream_id;
            ctx.writable_stream(&base_stream)?;
            let own = ctx.content_stream(&workspace.current_content_stream_id)?;
            (workspace, own, base, base_stream, ctx.checkpoint())
        };

        let old = workspace.current_content_stream_id;
        let pending = self.pending(&own, base_stream).await?;
        let (matching, remaining) = partition(pending.changes, &selection);
        if matching.is_empty() && pending.landed == 0 {
            return Ok(CommandResult::noop(checkpoint));
        }
        self.ensure_unused(&[matching_part, remaining_part]).await?;
        let expected = self.core.current_version(&name.stream_name()).await?;
        let previous = self.begin(old).await?;

        let mut created = Vec::new();
        let outcome = async {
            if !matching.is_empty() {
                self.fork(old, base_stream, matching_part, &mut created).await?;
                let base_version = self
                    .core
                    .context()
                    .await
                    .content_stream(&matching_part)?
                    .source_content_stream_version
                    .unwrap_or_default();
                let conflicts = self.replay(matching_part, &matching).await?;
                if !conflicts.is_empty() {
                    return Err(ContentRepositoryError::WorkspaceRebaseFailed {
                        workspace: name.clone(),
                        conflicts,
                    });
                }
                let validated = self.changes_of(matching_part).await?;
                self.core
                    .commit_recorded(
                        &base_stream.stream_name(),
                        ExpectedVersion::Exact(base_version),
                        retarget(&validated, base_stream),
                    )
                    .await?;
                self.core.sync().await?;
            }

            self.fork(old, base_stream, remaining_part, &mut created).await?;
            for conflict in self.replay(remaining_part, &remaining).await? {
                warn!(
                    workspace = %name,
                    command = %conflict.command_type,
                    node = %conflict.node_aggregate_id,
                    reason = %conflict.reason,
                    "dropping change that no longer applies after partial publish"
                );
            }
            let event = ContentRepositoryEvent::WorkspaceWasPartiallyPublished {
                source_workspace_name: name.clone(),
                target_workspace_name: base.clone(),
                new_source_content_stream_id: remaining_part,
                previous_source_content_stream_id: old,
                published_nodes: selection.clone(),
            };
            self.core
                .commit(&name.stream_name(), expected, &[event], EventMetadata::default())
                .await
        }
        .await;

        let result = self.settle(old, previous, &created, remaining_part, outcome).await?;
        info!(
            workspace = %name,
            base = %base,
            published = matching.len(),
            already_published = pending.landed,
            remaining = remaining.len(),
            "workspace partially published"
        );
        Ok(result)
    }

    // ── Discarding ──

    #[instrument(skip(self))]
    async fn discard(&self, name: WorkspaceName, new_content_stream_id: ContentStreamId) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        let (workspace, base_stream, checkpoint) = self.with_base(&name).await?;
        let old = workspace.current_content_stream_id;
        let changes = self.changes_of(old).await?;
        if changes.is_empty() && workspace.status == WorkspaceStatus::UpToDate {
            return Ok(CommandResult::noop(checkpoint));
        }
        self.ensure_unused(&[new_content_stream_id]).await?;
        let expected = self.core.current_version(&name.stream_name()).await?;
        let previous = self.begin(old).await?;

        let mut created = Vec::new();
        let outcome = async {
            self.fork(old, base_stream, new_content_stream_id, &mut created).await?;
            let event = ContentRepositoryEvent::WorkspaceWasDiscarded {
                workspace_name: name.clone(),
                new_content_stream_id,
                previous_content_stream_id: old,
            };
            self.core
                .commit(&name.stream_name(), expected, &[event], EventMetadata::default())
                .await
        }
        .await;

        let result = self
            .settle(old, previous, &created, new_content_stream_id, outcome)
            .await?;
        info!(workspace = %name, discarded = changes.len(), "workspace discarded");
        Ok(result)
    }

    #[instrument(skip(self, selection))]
    async fn discard_nodes(
        &self,
        name: WorkspaceName,
        selection: Vec<NodeIdToPublishOrDiscard>,
        new_content_stream_id: ContentStreamId,
    ) -> ContentRepositoryResult<DiscardingResult> {
        self.core.sync().await?;
        let (workspace, base_stream, checkpoint) = self.with_base(&name).await?;
        let old = workspace.current_content_stream_id;
        let own = self.core.context().await.content_stream(&old)?;
        let (matching, remaining) = partition(self.pending(&own, base_stream).await?.changes, &selection);
        if matching.is_empty() {
            return Ok(DiscardingResult {
                number_of_discarded_changes: 0,
                result: CommandResult::noop(checkpoint),
            });
        }
        self.ensure_unused(&[new_content_stream_id]).await?;
        let expected = self.core.current_version(&name.stream_name()).await?;
        let previous = self.begin(old).await?;

        let mut created = Vec::new();
        let outcome = async {
            self.fork(old, base_stream, new_content_stream_id, &mut created).await?;
            let conflicts = self.replay(new_content_stream_id, &remaining).await?;
            if !conflicts.is_empty() {
                return Err(ContentRepositoryError::WorkspaceRebaseFailed {
                    workspace: name.clone(),
                    conflicts,
                });
            }
            let event = ContentRepositoryEvent::WorkspaceWasPartiallyDiscarded {
                workspace_name: name.clone(),
                new_content_stream_id,
                previous_content_stream_id: old,
                discarded_nodes: selection.clone(),
            };
            self.core
                .commit(&name.stream_name(), expected, &[event], EventMetadata::default())
                .await
        }
        .await;

        let result = self
            .settle(old, previous, &created, new_content_stream_id, outcome)
            .await?;
        info!(workspace = %name, discarded = matching.len(), kept = remaining.len(), "workspace partially discarded");
        Ok(DiscardingResult {
            number_of_discarded_changes: matching.len(),
            result,
        })
    }

    // ── Base and removal ──

    #[instrument(skip(self))]
    async fn change_base(
        &self,
        name: WorkspaceName,
        new_base: WorkspaceName,
        new_content_stream_id: ContentStreamId,
    ) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        let (workspace, base_stream, checkpoint) = {
            let ctx = self.core.context().await;
            let workspace = ctx.workspace(&name)?;
            let current_base = workspace
                .base_workspace_name
                .clone()
                .ok_or_else(|| ContentRepositoryError::WorkspaceHasNoBase(name.clone()))?;
            if current_base == new_base {
                return Ok(CommandResult::noop(ctx.checkpoint()));
            }
            let base_stream = ctx.workspace(&new_base)?.current_content_stream_id;

            let mut visited = BTreeSet::new();
            let mut cursor = Some(new_base.clone());
            while let Some(ancestor) = cursor {
                if ancestor == name || !visited.insert(ancestor.clone()) {
                    return Err(ContentRepositoryError::BaseWorkspaceCycle {
                        workspace: name,
                        base: new_base,
                    });
                }
                cursor = ctx.graph().workspace(&ancestor).and_then(|w| w.base_workspace_name);
            }
            (workspace, base_stream, ctx.checkpoint())
        };

        let old = workspace.current_content_stream_id;
        if !self.changes_of(old).await?.is_empty() {
            return Err(ContentRepositoryError::WorkspaceHasPendingChanges(name));
        }
        self.ensure_unused(&[new_content_stream_id]).await?;
        let expected = self.core.current_version(&name.stream_name()).await?;
        let previous = self.begin(old).await?;

        let mut created = Vec::new();
        let outcome = async {
            self.fork(old, base_stream, new_content_stream_id, &mut created).await?;
            let event = ContentRepositoryEvent::WorkspaceBaseWorkspaceWasChanged {
                workspace_name: name.clone(),
                base_workspace_name: new_base.clone(),
                new_content_stream_id,
            };
            self.core
                .commit(&name.stream_name(), expected, &[event], EventMetadata::default())
                .await
        }
        .await;

        let result = self
            .settle(old, previous, &created, new_content_stream_id, outcome)
            .await?;
        info!(workspace = %name, base = %new_base, checkpoint, "base workspace changed");
        Ok(result)
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: WorkspaceName) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        let workspace = {
            let ctx = self.core.context().await;
            let workspace = ctx.workspace(&name)?;
            let dependents: Vec<WorkspaceName> = ctx
                .graph()
                .dependent_workspaces(&name)
                .into_iter()
                .map(|w| w.name)
                .collect();
            if !dependents.is_empty() {
                return Err(ContentRepositoryError::WorkspaceHasDependents {
                    workspace: name,
                    dependents,
                });
            }
            workspace
        };
        let expected = self.core.current_version(&name.stream_name()).await?;
        let result = self
            .core
            .commit(
                &name.stream_name(),
                expected,
                &[ContentRepositoryEvent::WorkspaceWasRemoved {
                    workspace_name: name.clone(),
                }],
                EventMetadata::default(),
            )
            .await?;
        self.discard_streams(&[workspace.current_content_stream_id]).await;
        self.forget(&name).await;
        info!(workspace = %name, "workspace deleted");
        Ok(result)
    }

    // ── Steps shared by the pointer-swapping operations ──

    async fn with_base(
        &self,
        name: &WorkspaceName,
    ) -> ContentRepositoryResult<(content_graph::Workspace, ContentStreamId, u64)> {
        let ctx = self.core.context().await;
        let workspace = ctx.workspace(name)?;
        let base = workspace
            .base_workspace_name
            .clone()
            .ok_or_else(|| ContentRepositoryError::WorkspaceHasNoBase(name.clone()))?;
        let base_stream = ctx.workspace(&base)?.current_content_stream_id;
        Ok((workspace, base_stream, ctx.checkpoint()))
    }

    /// Reject stream ids that are taken, before anything is changed.
    async fn ensure_unused(&self, ids: &[ContentStreamId]) -> ContentRepositoryResult<()> {
        let mut seen = BTreeSet::new();
        for id in ids {
            let known = self.core.context().await.graph().content_stream(id).is_some();
            if !seen.insert(*id) || known || self.core.events.stream_version(&id.stream_name()).await?.is_some() {
                return Err(ContentRepositoryError::ContentStreamAlreadyExists(*id));
            }
        }
        Ok(())
    }

    /// Node changes recorded on `id`, grouped by the command that made them.
    async fn changes_of(&self, id: ContentStreamId) -> ContentRepositoryResult<Vec<Change>> {
        let mut events = self.core.events.read_stream(&id.stream_name(), 1).await?;
        let mut changes: Vec<Change> = Vec::new();
        let mut current: Option<Uuid> = None;
        while let Some(envelope) = events.try_next().await? {
            let event = ContentRepositoryEvent::from_envelope(&envelope)?;
            if !event.is_node_event() {
                current = None;
                continue;
            }
            let causation = envelope.metadata.causation_id;
            match changes.last_mut() {
                Some(last) if causation.is_some() && causation == current => {
                    last.events.push((event, envelope.metadata));
                }
                _ => {
                    let command = match &envelope.metadata.command {
                        Some(value) => Some(serde_json::from_value::<NodeCommand>(value.clone())?),
                        None => None,
                    };
                    current = causation;
                    changes.push(Change {
                        causation_id: causation,
                        command,
                        events: vec![(event, envelope.metadata)],
                    });
                }
            }
        }
        Ok(changes)
    }

    /// Compare the changes on `own` with what its base gained since the
    /// fork. Base events sharing a causation id with one of our changes
    /// were appended by an earlier publish of that change.
    async fn pending(&self, own: &ContentStream, base_stream: ContentStreamId) -> ContentRepositoryResult<Pending> {
        let changes = self.changes_of(own.id).await?;
        let since = match (own.source_content_stream_id, own.source_content_stream_version) {
            (Some(source), Some(version)) if source == base_stream => version,
            _ => {
                return Ok(Pending {
                    changes,
                    landed: 0,
                    outdated: true,
                })
            }
        };

        let ours: BTreeSet<Uuid> = changes.iter().filter_map(|c| c.causation_id).collect();
        let mut landed = BTreeSet::new();
        let mut outdated = false;
        let mut events = self.core.events.read_stream(&base_stream.stream_name(), since + 1).await?;
        while let Some(envelope) = events.try_next().await? {
            if !ContentRepositoryEvent::from_envelope(&envelope)?.is_node_event() {
                continue;
            }
            match envelope.metadata.causation_id {
                Some(causation) if ours.contains(&causation) => {
                    landed.insert(causation);
                }
                _ => outdated = true,
            }
        }

        let changes = changes
            .into_iter()
            .filter(|c| c.causation_id.map_or(true, |id| !landed.contains(&id)))
            .collect();
        Ok(Pending {
            changes,
            landed: landed.len(),
            outdated,
        })
    }

    /// Close the workspace's stream for the duration of the operation.
    async fn begin(&self, id: ContentStreamId) -> ContentRepositoryResult<ContentStreamStatus> {
        let status = self.core.context().await.content_stream(&id)?.status;
        self.content_streams.close(id, ClosePurpose::Rebase).await?;
        self.core.sync().await?;
        Ok(status)
    }

    /// Fork `id` off `source` on behalf of the operation on `old`. The fork
    /// is tagged with `old` and recorded in `created` once it exists.
    async fn fork(
        &self,
        old: ContentStreamId,
        source: ContentStreamId,
        id: ContentStreamId,
        created: &mut Vec<ContentStreamId>,
    ) -> ContentRepositoryResult<()> {
        let tag = EventMetadata {
            causation_id: Some(old.as_uuid()),
            command: None,
        };
        self.content_streams.fork_with(source, id, tag).await?;
        created.push(id);
        self.core.sync().await?;
        Ok(())
    }

    /// Re-handle `changes` on `target` under their original causation ids.
    /// Invariant violations are collected; any other failure aborts.
    async fn replay(&self, target: ContentStreamId, changes: &[Change]) -> ContentRepositoryResult<Vec<CommandConflict>> {
        let mut conflicts = Vec::new();
        for change in changes {
            match &change.command {
                Some(command) => {
                    let causation = change.causation_id.unwrap_or_else(Uuid::new_v4);
                    match self
                        .nodes
                        .handle_caused_by(command.with_content_stream_id(target), causation)
                        .await
                    {
                        Ok(_) => {}
                        Err(ContentRepositoryError::InvariantViolation(violation)) => conflicts.push(CommandConflict {
                            command_type: command.command_type().to_string(),
                            node_aggregate_id: command.node_aggregate_id().clone(),
                            reason: violation.to_string(),
                        }),
                        Err(e) => return Err(e),
                    }
                }
                None => {
                    let stream = target.stream_name();
                    let expected = self.core.current_version(&stream).await?;
                    self.core
                        .commit_recorded(&stream, expected, retarget(std::slice::from_ref(change), target))
                        .await?;
                }
            }
            self.core.sync().await?;
        }
        Ok(conflicts)
    }

    /// Finish a pointer swap. On success the old stream and every created
    /// stream but `current` are removed. On failure only the streams this
    /// operation created are removed and the old stream is reopened.
    async fn settle(
        &self,
        old: ContentStreamId,
        previous: ContentStreamStatus,
        created: &[ContentStreamId],
        current: ContentStreamId,
        outcome: ContentRepositoryResult<CommandResult>,
    ) -> ContentRepositoryResult<CommandResult> {
        self.core.sync().await?;
        match outcome {
            Ok(result) => {
                let temporary: Vec<ContentStreamId> = created.iter().copied().filter(|id| *id != current).collect();
                self.discard_streams(&[old]).await;
                self.discard_streams(&temporary).await;
                self.core.sync().await?;
                Ok(result)
            }
            Err(e) => {
                warn!(content_stream = %old, error = %e, "rolling back workspace operation");
                self.discard_streams(created).await;
                if let Err(reopen) = self.content_streams.reopen(old, previous).await {
                    warn!(content_stream = %old, error = %reopen, "failed to reopen content stream");
                }
                self.core.sync().await?;
                Err(e)
            }
        }
    }

    /// Best-effort removal of streams no workspace points at.
    async fn discard_streams(&self, ids: &[ContentStreamId]) {
        for id in ids {
            let live = matches!(
                self.core.context().await.graph().content_stream(id),
                Some(stream) if stream.status != ContentStreamStatus::Removed
            );
            if !live {
                continue;
            }
            if let Err(e) = self.content_streams.remove(*id).await {
                warn!(content_stream = %id, error = %e, "failed to remove content stream");
            }
        }
    }
}
