//! Node type schema: declared properties, references and inheritance.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NodeTypeError;
use crate::ids::{NodeTypeName, ReferenceName};

/// Declared type of a property or reference property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
    Any,
}

impl PropertyType {
    /// Whether `value` is acceptable for this type. `null` always is; it
    /// unsets the property.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (PropertyType::Any, _) => true,
            (PropertyType::String, Value::String(_)) => true,
            (PropertyType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (PropertyType::Float, Value::Number(_)) => true,
            (PropertyType::Boolean, Value::Bool(_)) => true,
            (PropertyType::Array, Value::Array(_)) => true,
            (PropertyType::Object, Value::Object(_)) => true,
            _ => false,
        }
    }
}

/// Node type declaration as it appears in configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTypeConfig {
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub super_types: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyType>,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceConfig>,
}

/// Reference declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceConfig {
    /// Node types a target must be of. Empty allows every type.
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyType>,
}

/// A resolved node type with inherited declarations merged in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeType {
    pub name: NodeTypeName,
    pub is_abstract: bool,
    pub is_root: bool,
    /// All super types, transitively.
    pub super_types: BTreeSet<NodeTypeName>,
    pub properties: BTreeMap<String, PropertyType>,
    pub references: BTreeMap<ReferenceName, ReferenceConfig>,
}

impl NodeType {
    pub fn is_of_type(&self, name: &NodeTypeName) -> bool {
        &self.name == name || self.super_types.contains(name)
    }

    pub fn property_type(&self, property: &str) -> Option<PropertyType> {
        self.properties.get(property).copied()
    }

    pub fn reference(&self, name: &ReferenceName) -> Option<&ReferenceConfig> {
        self.references.get(name)
    }
}

/// Registry of all node types.
#[derive(Clone, Debug, Default)]
pub struct NodeTypeManager {
    types: HashMap<NodeTypeName, NodeType>,
}

impl NodeTypeManager {
    pub fn from_config(configs: &BTreeMap<String, NodeTypeConfig>) -> Result<Self, NodeTypeError> {
        let mut types = HashMap::with_capacity(configs.len());
        for name in configs.keys() {
            let mut super_types = BTreeSet::new();
            collect_super_types(configs, name, name, &mut super_types)?;

            // Own declarations win over inherited ones; super types are merged
            // in declaration order.
            let mut properties = BTreeMap::new();
            let mut references = BTreeMap::new();
            merge_declarations(configs, name, &mut properties, &mut references, &mut BTreeSet::new());

            let config = &configs[name];
            types.insert(
                NodeTypeName::new(name.clone()),
                NodeType {
                    name: NodeTypeName::new(name.clone()),
                    is_abstract: config.is_abstract,
                    is_root: config.root,
                    super_types: super_types.into_iter().map(NodeTypeName::new).collect(),
                    properties,
                    references: references
                        .into_iter()
                        .map(|(k, v)| (ReferenceName::new(k), v))
                        .collect(),
                },
            );
        }

        for node_type in types.values() {
            for (reference, config) in &node_type.references {
                for target in &config.constraints {
                    if !configs.contains_key(target) {
                        return Err(NodeTypeError::UnknownReferenceTarget {
                            node_type: node_type.name.to_string(),
                            reference: reference.to_string(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { types })
    }

    pub fn get(&self, name: &NodeTypeName) -> Option<&NodeType> {
        self.types.get(name)
    }

    pub fn has(&self, name: &NodeTypeName) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn collect_super_types(
    configs: &BTreeMap<String, NodeTypeConfig>,
    origin: &str,
    current: &str,
    out: &mut BTreeSet<String>,
) -> Result<(), NodeTypeError> {
    for super_type in &configs[current].super_types {
        if super_type == origin {
            return Err(NodeTypeError::InheritanceCycle(origin.to_string()));
        }
        if !configs.contains_key(super_type) {
            return Err(NodeTypeError::UnknownSuperType {
                node_type: current.to_string(),
                super_type: super_type.clone(),
            });
        }
        if out.insert(super_type.clone()) {
            collect_super_types(configs, origin, super_type, out)?;
        }
    }
    Ok(())
}

fn merge_declarations(
    configs: &BTreeMap<String, NodeTypeConfig>,
    name: &str,
    properties: &mut BTreeMap<String, PropertyType>,
    references: &mut BTreeMap<String, ReferenceConfig>,
    visited: &mut BTreeSet<String>,
) {
    if !visited.insert(name.to_string()) {
        return;
    }
    let config = &configs[name];
    for super_type in &config.super_types {
        merge_declarations(configs, super_type, properties, references, visited);
    }
    properties.extend(config.properties.iter().map(|(k, v)| (k.clone(), *v)));
    references.extend(config.references.iter().map(|(k, v)| (k.clone(), v.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &str = r#"
"Neos:Root":
  root: true
"Neos:Node":
  abstract: true
  properties:
    title: string
"Neos:Document":
  super_types: ["Neos:Node"]
  properties:
    hidden_in_index: boolean
  references:
    related:
      constraints: ["Neos:Document"]
      properties:
        weight: integer
"Acme:Page":
  super_types: ["Neos:Document"]
  properties:
    title: object
"#;

    fn manager() -> NodeTypeManager {
        let configs: BTreeMap<String, NodeTypeConfig> = serde_yaml::from_str(SCHEMA).unwrap();
        NodeTypeManager::from_config(&configs).unwrap()
    }

    #[test]
    fn inheritance_merges_declarations() {
        let manager = manager();
        let page = manager.get(&NodeTypeName::new("Acme:Page")).unwrap();

        assert!(page.is_of_type(&NodeTypeName::new("Neos:Node")));
        assert!(page.is_of_type(&NodeTypeName::new("Neos:Document")));
        assert!(!page.is_of_type(&NodeTypeName::new("Neos:Root")));
        assert_eq!(page.property_type("hidden_in_index"), Some(PropertyType::Boolean));
        // overridden locally
        assert_eq!(page.property_type("title"), Some(PropertyType::Object));
        assert!(page.reference(&ReferenceName::new("related")).is_some());
    }

    #[test]
    fn flags_are_read() {
        let manager = manager();
        assert!(manager.get(&NodeTypeName::new("Neos:Root")).unwrap().is_root);
        assert!(manager.get(&NodeTypeName::new("Neos:Node")).unwrap().is_abstract);
        assert_eq!(manager.len(), 4);
    }

    #[test]
    fn unknown_super_type_and_cycles_are_rejected() {
        let mut configs = BTreeMap::new();
        configs.insert(
            "A".to_string(),
            NodeTypeConfig {
                super_types: vec!["Missing".into()],
                ..NodeTypeConfig::default()
            },
        );
        assert!(matches!(
            NodeTypeManager::from_config(&configs),
            Err(NodeTypeError::UnknownSuperType { .. })
        ));

        let mut configs = BTreeMap::new();
        configs.insert(
            "A".to_string(),
            NodeTypeConfig {
                super_types: vec!["B".into()],
                ..NodeTypeConfig::default()
            },
        );
        configs.insert(
            "B".to_string(),
            NodeTypeConfig {
                super_types: vec!["A".into()],
                ..NodeTypeConfig::default()
            },
        );
        assert!(matches!(
            NodeTypeManager::from_config(&configs),
            Err(NodeTypeError::InheritanceCycle(_))
        ));
    }

    #[test]
    fn property_types_check_values() {
        assert!(PropertyType::String.accepts(&json!("x")));
        assert!(!PropertyType::String.accepts(&json!(1)));
        assert!(PropertyType::Integer.accepts(&json!(3)));
        assert!(!PropertyType::Integer.accepts(&json!(3.5)));
        assert!(PropertyType::Float.accepts(&json!(3)));
        assert!(PropertyType::Boolean.accepts(&json!(null)));
        assert!(PropertyType::Any.accepts(&json!({"a": [1]})));
    }
}
