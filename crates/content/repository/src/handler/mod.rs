//! Command handlers. Each validates against the projection and appends to
//! the event log; none of them touches the read model directly.

pub mod content_stream;
pub mod node;
pub mod workspace;

pub use content_stream::ContentStreamCommandHandler;
pub use node::NodeAggregateCommandHandler;
pub use workspace::{DiscardingResult, WorkspaceCommandHandler};
