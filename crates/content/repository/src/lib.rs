//! Content repository write side.
//!
//! Commands are validated against the content graph projection and turned
//! into events appended to the event store. Workspaces layer branchable
//! change sets on top of content streams; rebase, publish and discard move
//! changes between streams by replaying the commands recorded with them.
//!
//! ```ignore
//! let repository = ContentRepository::in_memory(RepositoryConfig::load("repository.yaml")?).await?;
//! repository
//!     .handle_workspace(WorkspaceCommand::CreateRootWorkspace {
//!         workspace_name: WorkspaceName::new("live"),
//!         new_content_stream_id: ContentStreamId::create(),
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod repository;
pub mod telemetry;

pub use config::{CatchUpMode, ProjectionConfig, RebaseConfig, RepositoryConfig};
pub use context::{CommandContext, CommandResult};
pub use error::{CommandConflict, ContentRepositoryError, ContentRepositoryResult, InvariantViolation};
pub use handler::{
    ContentStreamCommandHandler, DiscardingResult, NodeAggregateCommandHandler, WorkspaceCommandHandler,
};
pub use repository::ContentRepository;
pub use telemetry::init_tracing;
