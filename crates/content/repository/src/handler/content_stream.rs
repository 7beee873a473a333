//! Content stream lifecycle: create, fork, close, reopen, remove.

use std::sync::Arc;

use tracing::{info, instrument};

use content_eventstore::{EventMetadata, ExpectedVersion};
use content_graph::{
    ClosePurpose, ContentRepositoryEvent, ContentStreamCommand, ContentStreamId, ContentStreamStatus,
};

use crate::context::{CommandResult, Core};
use crate::error::{ContentRepositoryError, ContentRepositoryResult};

#[derive(Clone)]
pub struct ContentStreamCommandHandler {
    core: Arc<Core>,
}

impl ContentStreamCommandHandler {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    pub async fn handle(&self, command: ContentStreamCommand) -> ContentRepositoryResult<CommandResult> {
        match command {
            ContentStreamCommand::CreateContentStream { content_stream_id } => self.create(content_stream_id).await,
            ContentStreamCommand::ForkContentStream {
                new_content_stream_id,
                source_content_stream_id,
            } => self.fork(source_content_stream_id, new_content_stream_id).await,
            ContentStreamCommand::CloseContentStream { content_stream_id } => {
                self.close(content_stream_id, ClosePurpose::Pause).await
            }
            ContentStreamCommand::ReopenContentStream {
                content_stream_id,
                previous_status,
            } => self.reopen(content_stream_id, previous_status).await,
            ContentStreamCommand::RemoveContentStream { content_stream_id } => self.remove(content_stream_id).await,
        }
    }

    #[instrument(skip(self))]
    pub(crate) async fn create(&self, id: ContentStreamId) -> ContentRepositoryResult<CommandResult> {
        if self.core.context().await.graph().content_stream(&id).is_some() {
            return Err(ContentRepositoryError::ContentStreamAlreadyExists(id));
        }
        let result = self
            .core
            .commit(
                &id.stream_name(),
                ExpectedVersion::NoStream,
                &[ContentRepositoryEvent::ContentStreamWasCreated { content_stream_id: id }],
                EventMetadata::default(),
            )
            .await?;
        info!(content_stream = %id, "content stream created");
        Ok(result)
    }

    /// New stream starting from the source's state at its current version.
    pub(crate) async fn fork(&self, source: ContentStreamId, id: ContentStreamId) -> ContentRepositoryResult<CommandResult> {
        self.fork_with(source, id, EventMetadata::default()).await
    }

    /// Fork whose first event carries `metadata`, so the operation that
    /// built the stream can find it again.
    #[instrument(skip(self, metadata))]
    pub(crate) async fn fork_with(
        &self,
        source: ContentStreamId,
        id: ContentStreamId,
        metadata: EventMetadata,
    ) -> ContentRepositoryResult<CommandResult> {
        let event = {
            let ctx = self.core.context().await;
            let source_stream = ctx.content_stream(&source)?;
            if source_stream.status == ContentStreamStatus::Removed {
                return Err(ContentRepositoryError::ContentStreamDoesNotExist(source));
            }
            if ctx.graph().content_stream(&id).is_some() {
                return Err(ContentRepositoryError::ContentStreamAlreadyExists(id));
            }
            ContentRepositoryEvent::ContentStreamWasForked {
                new_content_stream_id: id,
                source_content_stream_id: source,
                version_of_source_content_stream: source_stream.version,
            }
        };
        let result = self
            .core
            .commit(&id.stream_name(), ExpectedVersion::NoStream, &[event], metadata)
            .await?;
        info!(content_stream = %id, source = %source, "content stream forked");
        Ok(result)
    }

    #[instrument(skip(self))]
    pub(crate) async fn close(&self, id: ContentStreamId, purpose: ClosePurpose) -> ContentRepositoryResult<CommandResult> {
        let version = self.core.context().await.writable_stream(&id)?.version;
        let result = self
            .core
            .commit(
                &id.stream_name(),
                ExpectedVersion::Exact(version),
                &[ContentRepositoryEvent::ContentStreamWasClosed {
                    content_stream_id: id,
                    purpose,
                }],
                EventMetadata::default(),
            )
            .await?;
        info!(content_stream = %id, status = %purpose.status(), "content stream closed");
        Ok(result)
    }

    /// Reopen a closed stream. `previous_status` is restored as given.
    #[instrument(skip(self))]
    pub(crate) async fn reopen(
        &self,
        id: ContentStreamId,
        previous_status: ContentStreamStatus,
    ) -> ContentRepositoryResult<CommandResult> {
        let stream = self.core.context().await.content_stream(&id)?;
        if !matches!(stream.status, ContentStreamStatus::Closed | ContentStreamStatus::Rebasing) {
            return Err(ContentRepositoryError::ContentStreamIsNotClosed(id));
        }
        let result = self
            .core
            .commit(
                &id.stream_name(),
                ExpectedVersion::Exact(stream.version),
                &[ContentRepositoryEvent::ContentStreamWasReopened {
                    content_stream_id: id,
                    previous_status,
                }],
                EventMetadata::default(),
            )
            .await?;
        info!(content_stream = %id, status = %previous_status, "content stream reopened");
        Ok(result)
    }

    /// Terminal. The stream's events stay in the log.
    #[instrument(skip(self))]
    pub(crate) async fn remove(&self, id: ContentStreamId) -> ContentRepositoryResult<CommandResult> {
        let stream = self.core.context().await.content_stream(&id)?;
        if stream.status == ContentStreamStatus::Removed {
            return Err(ContentRepositoryError::ContentStreamDoesNotExist(id));
        }
        let result = self
            .core
            .commit(
                &id.stream_name(),
                ExpectedVersion::Exact(stream.version),
                &[ContentRepositoryEvent::ContentStreamWasRemoved { content_stream_id: id }],
                EventMetadata::default(),
            )
            .await?;
        info!(content_stream = %id, "content stream removed");
        Ok(result)
    }
}
