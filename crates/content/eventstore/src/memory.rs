use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::error::EventStoreError;
use crate::event::{EventEnvelope, NewEvent, StreamName};
use crate::traits::{AppendResult, EventStore, EventStream, ExpectedVersion, IntegrityReport};

const NOTIFY_CAPACITY: usize = 1024;

/// In-memory event store used for tests, local demos, and embedding.
#[derive(Clone)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<StoreState>>,
    notifier: broadcast::Sender<u64>,
}

#[derive(Default)]
struct StoreState {
    /// All events in global order; `events[i].sequence == i + 1`.
    events: Vec<EventEnvelope>,
    /// Per stream, indices into `events` in version order.
    streams: HashMap<StreamName, Vec<usize>>,
}

impl StoreState {
    fn version(&self, stream: &StreamName) -> Option<u64> {
        self.streams
            .get(stream)
            .filter(|indices| !indices.is_empty())
            .map(|indices| indices.len() as u64)
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(StoreState::default())),
            notifier,
        }
    }

    /// Names of all streams holding at least one event.
    pub async fn streams(&self) -> Vec<StreamName> {
        let state = self.inner.read().await;
        let mut names: Vec<StreamName> = state.streams.keys().cloned().collect();
        names.sort();
        names
    }

    #[cfg(test)]
    async fn tamper(&self, sequence: u64, payload: serde_json::Value) {
        let mut state = self.inner.write().await;
        state.events[(sequence - 1) as usize].payload = payload;
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_expected(
    stream: &StreamName,
    expected: ExpectedVersion,
    actual: Option<u64>,
) -> Result<(), EventStoreError> {
    let ok = match expected {
        ExpectedVersion::Any => true,
        ExpectedVersion::NoStream => actual.is_none(),
        ExpectedVersion::StreamExists => actual.is_some(),
        ExpectedVersion::Exact(v) => actual.unwrap_or(0) == v,
    };
    if ok {
        Ok(())
    } else {
        Err(EventStoreError::ConcurrencyConflict {
            stream: stream.clone(),
            expected: expected.to_string(),
            actual: actual.unwrap_or(0),
        })
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream: &StreamName,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, EventStoreError> {
        let mut state = self.inner.write().await;
        let current = state.version(stream);
        if let Err(e) = check_expected(stream, expected, current) {
            warn!(stream = %stream, expected = %expected, actual = current.unwrap_or(0), "append rejected");
            return Err(e);
        }

        let count = events.len();
        let mut version = current.unwrap_or(0);
        let mut sequence = state.events.len() as u64;
        let mut indices = Vec::with_capacity(count);
        // Everything below is infallible, so the batch lands completely.
        for event in events {
            version += 1;
            sequence += 1;
            indices.push(state.events.len());
            state
                .events
                .push(EventEnvelope::record(sequence, stream.clone(), version, event));
        }
        state.streams.entry(stream.clone()).or_default().extend(indices);
        drop(state);

        if count > 0 {
            debug!(stream = %stream, count, version, sequence, "events appended");
            // No receivers is fine.
            let _ = self.notifier.send(sequence);
        }

        Ok(AppendResult { version, sequence })
    }

    async fn read_stream(&self, stream: &StreamName, from_version: u64) -> Result<EventStream, EventStoreError> {
        let inner = Arc::clone(&self.inner);
        let stream = stream.clone();
        let start = from_version.max(1);
        let events = stream::unfold(start, move |version| {
            let inner = Arc::clone(&inner);
            let stream = stream.clone();
            async move {
                let state = inner.read().await;
                let index = *state.streams.get(&stream)?.get((version - 1) as usize)?;
                Some((Ok(state.events[index].clone()), version + 1))
            }
        });
        Ok(events.boxed())
    }

    async fn read_all(&self, from_sequence: u64) -> Result<EventStream, EventStoreError> {
        let inner = Arc::clone(&self.inner);
        let start = from_sequence.max(1);
        let events = stream::unfold(start, move |sequence| {
            let inner = Arc::clone(&inner);
            async move {
                let state = inner.read().await;
                let event = state.events.get((sequence - 1) as usize)?.clone();
                Some((Ok(event), sequence + 1))
            }
        });
        Ok(events.boxed())
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<Option<u64>, EventStoreError> {
        Ok(self.inner.read().await.version(stream))
    }

    async fn head(&self) -> Result<u64, EventStoreError> {
        Ok(self.inner.read().await.events.len() as u64)
    }

    fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.notifier.subscribe()
    }

    async fn verify_integrity(&self) -> Result<IntegrityReport, EventStoreError> {
        let state = self.inner.read().await;
        let mut report = IntegrityReport {
            total_events: state.events.len() as u64,
            ..IntegrityReport::default()
        };
        for event in &state.events {
            if event.verify_integrity() {
                report.verified_events += 1;
            } else {
                warn!(sequence = event.sequence, "event integrity mismatch");
                report.corrupted_sequences.push(event.sequence);
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    fn events(n: usize) -> Vec<NewEvent> {
        (0..n).map(|i| NewEvent::new("Test", json!({ "i": i }))).collect()
    }

    #[tokio::test]
    async fn append_assigns_contiguous_positions() {
        let store = InMemoryEventStore::new();
        let a = StreamName::new("a");
        let b = StreamName::new("b");

        let first = store.append(&a, ExpectedVersion::NoStream, events(2)).await.unwrap();
        assert_eq!(first, AppendResult { version: 2, sequence: 2 });
        let second = store.append(&b, ExpectedVersion::NoStream, events(1)).await.unwrap();
        assert_eq!(second, AppendResult { version: 1, sequence: 3 });
        let third = store.append(&a, ExpectedVersion::Exact(2), events(3)).await.unwrap();
        assert_eq!(third, AppendResult { version: 5, sequence: 6 });

        let stored: Vec<EventEnvelope> = store.read_stream(&a, 0).await.unwrap().try_collect().await.unwrap();
        let versions: Vec<u64> = stored.iter().map(|e| e.version).collect();
        let sequences: Vec<u64> = stored.iter().map(|e| e.sequence).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(sequences, vec![1, 2, 4, 5, 6]);
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_conflict() {
        let store = InMemoryEventStore::new();
        let a = StreamName::new("a");
        store.append(&a, ExpectedVersion::NoStream, events(1)).await.unwrap();

        let err = store.append(&a, ExpectedVersion::Exact(0), events(2)).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        let err = store.append(&a, ExpectedVersion::NoStream, events(1)).await.unwrap_err();
        assert!(err.is_concurrency_conflict());
        let err = store
            .append(&StreamName::new("missing"), ExpectedVersion::StreamExists, events(1))
            .await
            .unwrap_err();
        assert!(err.is_concurrency_conflict());

        // Nothing partial was written.
        assert_eq!(store.head().await.unwrap(), 1);
        assert_eq!(store.stream_version(&a).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn concurrent_appends_with_same_tip_admit_one_writer() {
        let store = InMemoryEventStore::new();
        let a = StreamName::new("a");
        store.append(&a, ExpectedVersion::NoStream, events(1)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let a = a.clone();
            handles.push(tokio::spawn(async move {
                store.append(&a, ExpectedVersion::Exact(1), events(3)).await
            }));
        }
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(e.is_concurrency_conflict()),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.stream_version(&a).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn read_all_is_restartable_from_any_position() {
        let store = InMemoryEventStore::new();
        store.append(&StreamName::new("a"), ExpectedVersion::Any, events(3)).await.unwrap();
        store.append(&StreamName::new("b"), ExpectedVersion::Any, events(2)).await.unwrap();

        let tail: Vec<EventEnvelope> = store.read_all(4).await.unwrap().try_collect().await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].stream, StreamName::new("b"));

        let all: Vec<EventEnvelope> = store.read_all(0).await.unwrap().try_collect().await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(store.streams().await.len(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_batch_tips() {
        let store = InMemoryEventStore::new();
        let mut rx = store.subscribe();
        store.append(&StreamName::new("a"), ExpectedVersion::Any, events(3)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn verify_integrity_reports_tampered_events() {
        let store = InMemoryEventStore::new();
        store.append(&StreamName::new("a"), ExpectedVersion::Any, events(4)).await.unwrap();
        assert!(store.verify_integrity().await.unwrap().is_clean());

        store.tamper(2, json!({ "i": 99 })).await;
        let report = store.verify_integrity().await.unwrap();
        assert_eq!(report.total_events, 4);
        assert_eq!(report.verified_events, 3);
        assert_eq!(report.corrupted_sequences, vec![2]);
    }
}
