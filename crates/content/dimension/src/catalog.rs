//! Dimension catalog: the declared content dimensions, their values,
//! fallback chains and value-combination constraints.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DimensionError, DimensionResult};

/// Key of the wildcard rule inside a constraint block.
pub const WILDCARD: &str = "*";

/// Identifier of a content dimension, e.g. `language`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDimensionId(String);

impl ContentDimensionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Declaration of one dimension as it appears in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub id: String,
    pub values: Vec<DimensionValueConfig>,
}

/// Declaration of one dimension value.
///
/// `constraints` maps another dimension to allow/deny rules keyed by that
/// dimension's values; `"*"` sets the default for unlisted values.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionValueConfig {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, BTreeMap<String, bool>>,
}

impl DimensionValueConfig {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            fallback: None,
            constraints: BTreeMap::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn with_constraint(
        mut self,
        dimension: impl Into<String>,
        value: impl Into<String>,
        allowed: bool,
    ) -> Self {
        self.constraints
            .entry(dimension.into())
            .or_default()
            .insert(value.into(), allowed);
        self
    }
}

// ---------------------------------------------------------------------------
// Validated catalog
// ---------------------------------------------------------------------------

/// Allow/deny rule a dimension value imposes on another dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimensionConstraint {
    wildcard: bool,
    values: BTreeMap<String, bool>,
}

impl DimensionConstraint {
    pub fn allows(&self, value: &str) -> bool {
        self.values.get(value).copied().unwrap_or(self.wildcard)
    }
}

/// A validated dimension value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentDimensionValue {
    pub value: String,
    pub fallback: Option<String>,
    /// Number of fallback steps to the root of this value's chain.
    pub depth: usize,
    pub constraints: BTreeMap<ContentDimensionId, DimensionConstraint>,
}

/// A validated dimension with values in declaration order.
#[derive(Clone, Debug)]
pub struct ContentDimension {
    pub id: ContentDimensionId,
    values: Vec<ContentDimensionValue>,
    index: HashMap<String, usize>,
}

impl ContentDimension {
    pub fn values(&self) -> &[ContentDimensionValue] {
        &self.values
    }

    pub fn value(&self, value: &str) -> Option<&ContentDimensionValue> {
        self.index.get(value).map(|i| &self.values[*i])
    }

    pub fn has_value(&self, value: &str) -> bool {
        self.index.contains_key(value)
    }

    /// Values `value` falls back to, nearest first.
    pub fn fallback_chain(&self, value: &str) -> Vec<&str> {
        let mut chain = Vec::new();
        let mut current = self.value(value).and_then(|v| v.fallback.as_deref());
        while let Some(fallback) = current {
            chain.push(fallback);
            current = self.value(fallback).and_then(|v| v.fallback.as_deref());
        }
        chain
    }

    /// Values that do not fall back to anything.
    pub fn root_values(&self) -> impl Iterator<Item = &ContentDimensionValue> {
        self.values.iter().filter(|v| v.fallback.is_none())
    }
}

/// The complete, validated set of dimensions in declaration order.
#[derive(Clone, Debug, Default)]
pub struct DimensionCatalog {
    dimensions: Vec<ContentDimension>,
}

impl DimensionCatalog {
    /// Validate configuration and build the catalog.
    ///
    /// Unknown fallbacks, fallback cycles and constraints that reference
    /// unknown dimensions or values are rejected here so that they surface
    /// at startup.
    pub fn from_config(configs: &[DimensionConfig]) -> DimensionResult<Self> {
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.id.as_str()) {
                return Err(DimensionError::DuplicateDimension(config.id.clone()));
            }
            if config.values.is_empty() {
                return Err(DimensionError::EmptyDimension(config.id.clone()));
            }
        }

        let declared: HashMap<&str, HashSet<&str>> = configs
            .iter()
            .map(|c| {
                (
                    c.id.as_str(),
                    c.values.iter().map(|v| v.value.as_str()).collect(),
                )
            })
            .collect();

        let mut dimensions = Vec::with_capacity(configs.len());
        for config in configs {
            dimensions.push(build_dimension(config, &declared)?);
        }

        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> &[ContentDimension] {
        &self.dimensions
    }

    pub fn dimension(&self, id: &str) -> Option<&ContentDimension> {
        self.dimensions.iter().find(|d| d.id.as_str() == id)
    }

    /// Position of a dimension in declaration order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.dimensions.iter().position(|d| d.id.as_str() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

fn build_dimension(
    config: &DimensionConfig,
    declared: &HashMap<&str, HashSet<&str>>,
) -> DimensionResult<ContentDimension> {
    let mut index = HashMap::new();
    for (i, value) in config.values.iter().enumerate() {
        if index.insert(value.value.clone(), i).is_some() {
            return Err(DimensionError::DuplicateValue {
                dimension: config.id.clone(),
                value: value.value.clone(),
            });
        }
    }

    for value in &config.values {
        if let Some(fallback) = &value.fallback {
            if !index.contains_key(fallback) {
                return Err(DimensionError::UnknownFallback {
                    dimension: config.id.clone(),
                    value: value.value.clone(),
                    fallback: fallback.clone(),
                });
            }
        }
    }

    let mut values = Vec::with_capacity(config.values.len());
    for value in &config.values {
        let depth = chain_depth(config, &index, &value.value)?;
        let constraints = build_constraints(config, value, declared)?;
        values.push(ContentDimensionValue {
            value: value.value.clone(),
            fallback: value.fallback.clone(),
            depth,
            constraints,
        });
    }

    Ok(ContentDimension {
        id: ContentDimensionId::new(config.id.clone()),
        values,
        index,
    })
}

fn chain_depth(
    config: &DimensionConfig,
    index: &HashMap<String, usize>,
    start: &str,
) -> DimensionResult<usize> {
    let mut depth = 0;
    let mut current = start;
    while let Some(fallback) = config.values[index[current]].fallback.as_deref() {
        depth += 1;
        if depth > config.values.len() {
            return Err(DimensionError::FallbackCycle {
                dimension: config.id.clone(),
                value: start.to_string(),
            });
        }
        current = fallback;
    }
    Ok(depth)
}

fn build_constraints(
    config: &DimensionConfig,
    value: &DimensionValueConfig,
    declared: &HashMap<&str, HashSet<&str>>,
) -> DimensionResult<BTreeMap<ContentDimensionId, DimensionConstraint>> {
    let mut constraints = BTreeMap::new();
    for (constrained, rules) in &value.constraints {
        if constrained == &config.id {
            return Err(DimensionError::SelfConstraint {
                dimension: config.id.clone(),
                value: value.value.clone(),
            });
        }
        let Some(known_values) = declared.get(constrained.as_str()) else {
            return Err(DimensionError::UnknownConstraintDimension {
                dimension: config.id.clone(),
                value: value.value.clone(),
                constrained: constrained.clone(),
            });
        };

        let mut wildcard = true;
        let mut values = BTreeMap::new();
        for (key, allowed) in rules {
            if key == WILDCARD {
                wildcard = *allowed;
            } else if known_values.contains(key.as_str()) {
                values.insert(key.clone(), *allowed);
            } else {
                return Err(DimensionError::UnknownConstraintValue {
                    dimension: config.id.clone(),
                    value: value.value.clone(),
                    constrained: constrained.clone(),
                    constrained_value: key.clone(),
                });
            }
        }

        constraints.insert(
            ContentDimensionId::new(constrained.clone()),
            DimensionConstraint { wildcard, values },
        );
    }
    Ok(constraints)
}
