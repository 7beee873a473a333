use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProjectionError, ProjectionResult};

/// Persisted state of a projection at a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    pub namespace: String,
    pub key: String,
    pub schema_version: String,
    /// Global sequence of the last event folded into `data`.
    pub checkpoint: u64,
    pub data: Value,
    /// BLAKE3 hex digest of `data`.
    pub snapshot_hash: String,
    pub created_at: DateTime<Utc>,
}

impl ProjectionSnapshot {
    pub fn new(namespace: &str, key: &str, schema_version: &str, checkpoint: u64, data: Value) -> Self {
        let snapshot_hash = hash_data(&data);
        Self {
            namespace: namespace.to_string(),
            key: key.to_string(),
            schema_version: schema_version.to_string(),
            checkpoint,
            data,
            snapshot_hash,
            created_at: Utc::now(),
        }
    }

    pub fn verify(&self) -> bool {
        hash_data(&self.data) == self.snapshot_hash
    }
}

fn hash_data(data: &Value) -> String {
    let bytes = serde_json::to_vec(data).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Storage interface for read-model/projection snapshots.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn upsert_projection(&self, snapshot: ProjectionSnapshot) -> ProjectionResult<()>;
    async fn get_projection(&self, namespace: &str, key: &str) -> ProjectionResult<Option<ProjectionSnapshot>>;
}

/// In-memory snapshot store.
#[derive(Default)]
pub struct InMemoryProjectionStore {
    projections: RwLock<HashMap<(String, String), ProjectionSnapshot>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryProjectionStore {
    async fn upsert_projection(&self, snapshot: ProjectionSnapshot) -> ProjectionResult<()> {
        let mut guard = self
            .projections
            .write()
            .map_err(|_| ProjectionError::Backend("projection lock poisoned".to_string()))?;
        guard.insert((snapshot.namespace.clone(), snapshot.key.clone()), snapshot);
        Ok(())
    }

    async fn get_projection(&self, namespace: &str, key: &str) -> ProjectionResult<Option<ProjectionSnapshot>> {
        let guard = self
            .projections
            .read()
            .map_err(|_| ProjectionError::Backend("projection lock poisoned".to_string()))?;
        Ok(guard.get(&(namespace.to_string(), key.to_string())).cloned())
    }
}
