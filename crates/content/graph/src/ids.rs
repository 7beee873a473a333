//! Identifiers of the content repository domain.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use content_eventstore::StreamName;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Stable identity of a node across all its variants and across time.
    NodeAggregateId
);
string_id!(
    /// Name of a workspace, e.g. `live`.
    WorkspaceName
);
string_id!(NodeTypeName);
string_id!(
    /// Name of a node below its parent. Unique among siblings.
    NodeName
);
string_id!(ReferenceName);

impl NodeAggregateId {
    pub fn create() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl WorkspaceName {
    pub fn stream_name(&self) -> StreamName {
        StreamName::new(format!("Workspace:{}", self.0))
    }
}

/// Identity of a content stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentStreamId(Uuid);

impl ContentStreamId {
    pub fn create() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn stream_name(&self) -> StreamName {
        StreamName::new(format!("ContentStream:{}", self.0))
    }
}

impl fmt::Display for ContentStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one stored node record in the projection arena.
///
/// Derived from the event that created the record, so rebuilding the
/// projection yields the same anchors.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAnchor(String);

impl NodeAnchor {
    pub fn derive(event_id: &Uuid, parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(event_id.as_bytes());
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        Self(hasher.finalize().to_hex()[..32].to_string())
    }
}

impl fmt::Display for NodeAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_are_prefixed() {
        let workspace = WorkspaceName::new("live");
        assert_eq!(workspace.stream_name().as_str(), "Workspace:live");

        let stream = ContentStreamId::create();
        assert!(stream.stream_name().as_str().starts_with("ContentStream:"));
    }

    #[test]
    fn anchors_are_deterministic() {
        let event = Uuid::new_v4();
        assert_eq!(NodeAnchor::derive(&event, &["a", "b"]), NodeAnchor::derive(&event, &["a", "b"]));
        assert_ne!(NodeAnchor::derive(&event, &["ab"]), NodeAnchor::derive(&event, &["a", "b"]));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = NodeAggregateId::new("sir-david");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"sir-david\"");
    }
}
