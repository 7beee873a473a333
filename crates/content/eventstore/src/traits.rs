use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::EventStoreError;
use crate::event::{EventEnvelope, NewEvent, StreamName};

/// Expected state of a stream when appending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// No check.
    Any,
    /// The stream must not contain any event yet.
    NoStream,
    /// The stream must exist.
    StreamExists,
    /// The stream's last version must be exactly this.
    Exact(u64),
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::NoStream => f.write_str("no stream"),
            ExpectedVersion::StreamExists => f.write_str("stream exists"),
            ExpectedVersion::Exact(v) => write!(f, "version {v}"),
        }
    }
}

/// Result of a successful append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendResult {
    /// Version of the stream after the append.
    pub version: u64,
    /// Global sequence of the last appended event.
    pub sequence: u64,
}

/// Outcome of re-hashing every stored event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub total_events: u64,
    pub verified_events: u64,
    pub corrupted_sequences: Vec<u64>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted_sequences.is_empty()
    }
}

/// Lazy, ordered, finite sequence of stored events.
pub type EventStream = BoxStream<'static, Result<EventEnvelope, EventStoreError>>;

/// Append-only event log keyed by `(stream, version)` with a global order.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append `events` to `stream` as one indivisible batch.
    ///
    /// Either every event is stored with contiguous versions and sequences,
    /// or nothing is. A stale `expected` fails with
    /// [`EventStoreError::ConcurrencyConflict`].
    async fn append(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, EventStoreError>;

    /// Events of one stream with `version >= from_version`.
    async fn read_stream(&self, stream: &StreamName, from_version: u64) -> Result<EventStream, EventStoreError>;

    /// Events of all streams with `sequence >= from_sequence`, in global order.
    async fn read_all(&self, from_sequence: u64) -> Result<EventStream, EventStoreError>;

    /// Current version of `stream`, `None` if it holds no events.
    async fn stream_version(&self, stream: &StreamName) -> Result<Option<u64>, EventStoreError>;

    /// Global sequence of the most recent event, 0 when empty.
    async fn head(&self) -> Result<u64, EventStoreError>;

    /// Receive the global sequence of every committed batch's last event.
    fn subscribe(&self) -> broadcast::Receiver<u64>;

    /// Re-hash every stored event.
    async fn verify_integrity(&self) -> Result<IntegrityReport, EventStoreError>;
}
