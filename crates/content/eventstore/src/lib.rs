//! Event store for the content repository.
//!
//! All state changes are stored as immutable events in named streams. The
//! store provides:
//! - Atomic batch appends with per-stream optimistic concurrency
//! - A global order across streams, readable lazily from any position
//! - Commit notifications for projections
//! - Integrity verification (BLAKE3 per event)

pub mod error;
pub mod event;
pub mod memory;
pub mod traits;

pub use error::EventStoreError;
pub use event::{EventEnvelope, EventMetadata, NewEvent, StreamName};
pub use memory::InMemoryEventStore;
pub use traits::{AppendResult, EventStore, EventStream, ExpectedVersion, IntegrityReport};
