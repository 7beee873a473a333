use std::fmt;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EventStoreError;

/// Name of an event stream, e.g. `ContentStream:<uuid>` or `Workspace:live`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Causal metadata attached to every stored event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Identity of the command that produced the event. Events sharing it
    /// were appended by the same command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<Uuid>,
    /// The serialized command itself, kept so it can be re-handled later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Value>,
}

impl EventMetadata {
    pub fn caused_by(causation_id: Uuid, command: Value) -> Self {
        Self {
            causation_id: Some(causation_id),
            command: Some(command),
        }
    }
}

/// An event ready to be appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub metadata: EventMetadata,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            metadata: EventMetadata::default(),
        }
    }

    /// Serialize a typed event. `event_type` is the tag stored alongside.
    pub fn from_typed<E: Serialize>(event_type: impl Into<String>, event: &E) -> Result<Self, EventStoreError> {
        Ok(Self::new(event_type, serde_json::to_value(event)?))
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A stored event. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Position in the global order of all streams, starting at 1.
    pub sequence: u64,
    pub stream: StreamName,
    /// Position within `stream`, starting at 1.
    pub version: u64,
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: Value,
    pub metadata: EventMetadata,
    pub recorded_at: DateTime<Utc>,
    /// BLAKE3 hash of (stream + version + event_id + event_type + payload)
    pub integrity_hash: String,
}

impl EventEnvelope {
    pub(crate) fn record(sequence: u64, stream: StreamName, version: u64, event: NewEvent) -> Self {
        let integrity_hash = Self::compute_hash(
            &stream,
            version,
            &event.event_id,
            &event.event_type,
            &event.payload,
        );
        Self {
            sequence,
            stream,
            version,
            event_id: event.event_id,
            event_type: event.event_type,
            payload: event.payload,
            metadata: event.metadata,
            recorded_at: Utc::now(),
            integrity_hash,
        }
    }

    pub fn verify_integrity(&self) -> bool {
        let expected = Self::compute_hash(
            &self.stream,
            self.version,
            &self.event_id,
            &self.event_type,
            &self.payload,
        );
        self.integrity_hash == expected
    }

    /// Deserialize the payload into a typed event.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, EventStoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    fn compute_hash(
        stream: &StreamName,
        version: u64,
        event_id: &Uuid,
        event_type: &str,
        payload: &Value,
    ) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"content-event-v1:");
        hasher.update(stream.as_str().as_bytes());
        hasher.update(&version.to_le_bytes());
        hasher.update(event_id.as_bytes());
        hasher.update(event_type.as_bytes());
        if let Ok(payload_bytes) = serde_json::to_vec(payload) {
            hasher.update(&payload_bytes);
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integrity_hash_detects_payload_tampering() {
        let event = NewEvent::new("NodePropertiesWereSet", json!({"title": "Hello"}));
        let mut envelope = EventEnvelope::record(1, StreamName::new("ContentStream:a"), 1, event);
        assert!(envelope.verify_integrity());

        envelope.payload = json!({"title": "Tampered"});
        assert!(!envelope.verify_integrity());
    }

    #[test]
    fn integrity_hash_covers_position() {
        let event = NewEvent::new("X", json!({}));
        let mut envelope = EventEnvelope::record(1, StreamName::new("s"), 1, event);
        envelope.version = 2;
        assert!(!envelope.verify_integrity());
    }

    #[test]
    fn metadata_is_omitted_when_empty() {
        let json = serde_json::to_value(EventMetadata::default()).unwrap();
        assert_eq!(json, json!({}));
    }
}
