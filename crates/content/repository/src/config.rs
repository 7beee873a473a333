//! Repository configuration

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use content_dimension::{DimensionConfig, DimensionValueConfig};
use content_graph::{NodeTypeConfig, RebaseErrorHandlingStrategy};

use crate::error::{ContentRepositoryError, ContentRepositoryResult};

/// Main repository configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Content dimensions in declaration order
    #[serde(
        default,
        serialize_with = "serialize_dimensions",
        deserialize_with = "deserialize_dimensions"
    )]
    pub dimensions: Vec<DimensionConfig>,

    /// Node type schema
    #[serde(default)]
    pub node_types: BTreeMap<String, NodeTypeConfig>,

    /// Projection configuration
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Rebase defaults
    #[serde(default)]
    pub rebase: RebaseConfig,
}

/// How the content graph projection follows the event log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatchUpMode {
    /// Every command returns after the projection applied its events.
    #[default]
    Synchronous,
    /// A background task follows the log; callers wait on the watermark.
    Asynchronous,
}

/// Projection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub catch_up: CatchUpMode,

    /// Snapshot every N applied events. `0` disables snapshots. Only takes
    /// effect with a projection store, see `ContentRepository::with_projection_store`.
    #[serde(default)]
    pub snapshot_interval: u64,

    /// Upper bound for waiting on the projection
    #[serde(default = "default_catch_up_timeout_ms")]
    pub catch_up_timeout_ms: u64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            catch_up: CatchUpMode::default(),
            snapshot_interval: 0,
            catch_up_timeout_ms: default_catch_up_timeout_ms(),
        }
    }
}

/// Rebase configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseConfig {
    #[serde(default)]
    pub error_handling: RebaseErrorHandlingStrategy,
}

fn default_catch_up_timeout_ms() -> u64 {
    5_000
}

impl RepositoryConfig {
    /// Load configuration from a YAML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> ContentRepositoryResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ContentRepositoryError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> ContentRepositoryResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> ContentRepositoryResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

// ── dimensions: ordered map id -> { values } ──

#[derive(Serialize, Deserialize)]
struct DimensionBody {
    values: Vec<DimensionValueConfig>,
}

#[derive(Serialize)]
struct DimensionBodyRef<'a> {
    values: &'a [DimensionValueConfig],
}

fn serialize_dimensions<S: Serializer>(dimensions: &[DimensionConfig], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(dimensions.len()))?;
    for dimension in dimensions {
        map.serialize_entry(&dimension.id, &DimensionBodyRef { values: &dimension.values })?;
    }
    map.end()
}

fn deserialize_dimensions<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<DimensionConfig>, D::Error> {
    struct OrderedDimensions;

    impl<'de> Visitor<'de> for OrderedDimensions {
        type Value = Vec<DimensionConfig>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of dimension id to its values")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut dimensions = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((id, body)) = access.next_entry::<String, DimensionBody>()? {
                dimensions.push(DimensionConfig { id, values: body.values });
            }
            Ok(dimensions)
        }
    }

    deserializer.deserialize_map(OrderedDimensions)
}
