//! JSON documents for metadata and entity graphs.
//!
//! A [`SchemaDocument`] declares entity types and their properties and
//! builds a [`MetadataRegistry`]. A [`GraphDocument`] declares labeled
//! entities with values and references and loads them into an
//! [`EntityGraph`]. Both are used by the `entigraph` binary and by fixtures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use entigraph_config::CollectionSavePolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::graph::{EntityGraph, EntityId, GraphError};
use crate::metadata::{
    Cardinality, MetadataError, MetadataRegistry, PropertyBuilder, PropertyFlag, PropertyKind,
    RegistryBuilder, Target, TypeBuilder,
};
use crate::value::{Value, ValueType};

/// Errors raised while reading schema or graph documents.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{entity}.{property}: {reason}")]
    InvalidProperty {
        entity: String,
        property: String,
        reason: String,
    },

    #[error("invalid metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid graph: {0}")]
    Graph(#[from] GraphError),

    #[error("unknown entity label '{0}'")]
    UnknownLabel(String),

    #[error("entity label '{0}' is used more than once")]
    DuplicateLabel(String),
}

impl SchemaError {
    /// Create an InvalidProperty error.
    pub fn invalid_property(
        entity: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            entity: entity.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }
}

fn read(path: &Path) -> Result<String, SchemaError> {
    fs::read_to_string(path).map_err(|source| SchemaError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ============================================================================
// Schema
// ============================================================================

/// Declared property in a schema document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropertyKind,
    #[serde(default)]
    pub collection: bool,
    /// Primitive type name for non-domain properties
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Entity type name for references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<PropertyFlag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub derived: bool,
}

/// Declared entity type in a schema document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSpec {
    pub name: String,
    #[serde(default, rename = "abstract")]
    pub abstract_type: bool,
    #[serde(default)]
    pub save_proxy: bool,
    /// Identity attribute; declared as an autogenerated integer if absent
    /// from `properties`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Secondary keys, each a list of attribute names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<Vec<String>>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
}

/// Data-driven metadata provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub types: Vec<TypeSpec>,
}

impl SchemaDocument {
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        Self::from_json(&read(path)?)
    }

    /// Build a registry, running every metadata check.
    pub fn build(&self, policy: CollectionSavePolicy) -> Result<MetadataRegistry, SchemaError> {
        let mut builder = RegistryBuilder::new().collection_policy(policy);
        for ty in &self.types {
            builder = builder.entity(type_builder(ty)?);
        }
        let registry = builder.build()?;
        debug!(types = registry.len(), "Loaded schema document");
        Ok(registry)
    }
}

fn type_builder(spec: &TypeSpec) -> Result<TypeBuilder, SchemaError> {
    let mut ty = TypeBuilder::new(&spec.name);
    if spec.abstract_type {
        ty = ty.abstract_type();
    }
    if spec.save_proxy {
        ty = ty.save_proxy();
    }
    for property in &spec.properties {
        ty = ty.property(property_builder(&spec.name, property)?);
    }
    if let Some(identifier) = &spec.identifier {
        if spec.properties.iter().any(|p| &p.name == identifier) {
            ty = ty.identifier(identifier);
        } else {
            ty = ty
                .property(
                    PropertyBuilder::attribute(identifier, ValueType::Int)
                        .flag(PropertyFlag::Autogenerated),
                )
                .identifier(identifier);
        }
    }
    for key in &spec.keys {
        ty = ty.key(key);
    }
    Ok(ty)
}

fn property_builder(entity: &str, spec: &PropertySpec) -> Result<PropertyBuilder, SchemaError> {
    let cardinality = if spec.collection {
        Cardinality::Collection
    } else {
        Cardinality::Scalar
    };
    let target = match spec.kind {
        PropertyKind::NonDomain => {
            let name = spec.value_type.as_deref().ok_or_else(|| {
                SchemaError::invalid_property(entity, &spec.name, "missing 'type'")
            })?;
            let ty = ValueType::parse(name).ok_or_else(|| {
                SchemaError::invalid_property(entity, &spec.name, format!("unknown type '{}'", name))
            })?;
            Target::Value(ty)
        }
        _ => {
            let name = spec.target.as_deref().ok_or_else(|| {
                SchemaError::invalid_property(entity, &spec.name, "missing 'target'")
            })?;
            Target::Entity(name.to_string())
        }
    };

    let mut builder = PropertyBuilder::from_parts(&spec.name, spec.kind, cardinality, target)
        .flags(spec.flags.iter().copied());
    if let Some(inverse) = &spec.inverse {
        builder = builder.inverse(inverse);
    }
    if let Some(default) = &spec.default {
        builder = builder.default_value(default.clone());
    }
    if spec.mandatory {
        builder = builder.mandatory();
    }
    if spec.derived {
        builder = builder.derived();
    }
    Ok(builder)
}

// ============================================================================
// Graph documents
// ============================================================================

/// Referenced labels: one for scalar references, a list for collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceSpec {
    One(String),
    Many(Vec<String>),
}

/// One labeled entity in a graph document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    pub label: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceSpec>,
}

/// Labeled object graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub entities: Vec<EntitySpec>,
}

/// A graph loaded from a document, with its labels.
#[derive(Debug, Clone)]
pub struct LoadedGraph {
    pub graph: EntityGraph,
    pub labels: BTreeMap<String, EntityId>,
}

impl LoadedGraph {
    pub fn id(&self, label: &str) -> Result<EntityId, SchemaError> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| SchemaError::UnknownLabel(label.to_string()))
    }

    /// Label of an entity created from the document
    pub fn label_of(&self, id: EntityId) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }
}

impl GraphDocument {
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        Self::from_json(&read(path)?)
    }

    /// Create every entity, then set values and references.
    ///
    /// References go through the graph's inverse-maintaining setters, so a
    /// document may declare either side of a bidirectional association.
    pub fn load(&self, registry: Arc<MetadataRegistry>) -> Result<LoadedGraph, SchemaError> {
        let mut graph = EntityGraph::new(registry);
        let mut labels = BTreeMap::new();

        for spec in &self.entities {
            let id = graph.create(&spec.type_name)?;
            if labels.insert(spec.label.clone(), id).is_some() {
                return Err(SchemaError::DuplicateLabel(spec.label.clone()));
            }
        }

        let lookup = |label: &str| -> Result<EntityId, SchemaError> {
            labels
                .get(label)
                .copied()
                .ok_or_else(|| SchemaError::UnknownLabel(label.to_string()))
        };

        for spec in &self.entities {
            let id = lookup(&spec.label)?;
            for (attribute, value) in &spec.values {
                graph.set_value(id, attribute, value.clone())?;
            }
            for (attribute, reference) in &spec.references {
                let (_, property) = graph.property(id, attribute)?;
                let collection = property.is_collection();
                match reference {
                    ReferenceSpec::One(label) if !collection => {
                        graph.set_reference(id, attribute, Some(lookup(label)?))?;
                    }
                    ReferenceSpec::One(label) => {
                        graph.add_reference(id, attribute, lookup(label)?)?;
                    }
                    ReferenceSpec::Many(many) if collection => {
                        for label in many {
                            graph.add_reference(id, attribute, lookup(label)?)?;
                        }
                    }
                    ReferenceSpec::Many(_) => {
                        return Err(SchemaError::invalid_property(
                            &spec.type_name,
                            attribute,
                            "a scalar reference takes a single label",
                        ));
                    }
                }
            }
        }

        debug!(entities = graph.len(), "Loaded graph document");
        Ok(LoadedGraph { graph, labels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "types": [
            {
                "name": "Study",
                "identifier": "identifier",
                "keys": [["title"]],
                "properties": [
                    {"name": "title", "kind": "non_domain", "type": "string", "mandatory": true},
                    {"name": "activity_status", "kind": "non_domain", "type": "string", "default": "Active"},
                    {"name": "events", "kind": "dependent", "collection": true, "target": "Event", "inverse": "study"}
                ]
            },
            {
                "name": "Event",
                "identifier": "identifier",
                "properties": [
                    {"name": "label", "kind": "non_domain", "type": "string"},
                    {"name": "study", "kind": "owner", "target": "Study", "inverse": "events"}
                ]
            }
        ]
    }"#;

    const GRAPH: &str = r#"{
        "entities": [
            {"label": "s", "type": "Study", "values": {"title": "Trial"}, "references": {"events": ["e1", "e2"]}},
            {"label": "e1", "type": "Event", "values": {"label": "Baseline"}},
            {"label": "e2", "type": "Event", "references": {"study": "s"}}
        ]
    }"#;

    #[test]
    fn test_schema_builds_registry() {
        let registry = SchemaDocument::from_json(SCHEMA)
            .unwrap()
            .build(CollectionSavePolicy::default())
            .unwrap();
        let study = registry.type_named("Study").unwrap();
        assert!(study.identifier_property().unwrap().is_autogenerated());
        assert!(study.property("events").unwrap().is_cascaded());
        assert_eq!(
            study.property("activity_status").unwrap().default_value(),
            Some(&Value::from("Active"))
        );
    }

    #[test]
    fn test_schema_errors() {
        let missing_type = r#"{"types": [{"name": "A", "properties": [{"name": "x", "kind": "non_domain"}]}]}"#;
        let err = SchemaDocument::from_json(missing_type)
            .unwrap()
            .build(CollectionSavePolicy::default())
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidProperty { .. }));

        let bad_flag = r#"{"types": [{"name": "A", "properties": [
            {"name": "x", "kind": "non_domain", "type": "int", "flags": ["cascaded"]}]}]}"#;
        let err = SchemaDocument::from_json(bad_flag)
            .unwrap()
            .build(CollectionSavePolicy::default())
            .unwrap_err();
        assert!(matches!(err, SchemaError::Metadata(MetadataError::UnsupportedFlag { .. })));
    }

    #[test]
    fn test_graph_document_loads_both_sides() {
        let registry = SchemaDocument::from_json(SCHEMA)
            .unwrap()
            .build(CollectionSavePolicy::default())
            .unwrap();
        let loaded = GraphDocument::from_json(GRAPH)
            .unwrap()
            .load(Arc::new(registry))
            .unwrap();

        let study = loaded.id("s").unwrap();
        let events = loaded.graph.references(study, "events").unwrap();
        assert_eq!(events, &[loaded.id("e1").unwrap(), loaded.id("e2").unwrap()]);
        assert_eq!(loaded.label_of(study), Some("s"));
        assert!(matches!(loaded.id("nope"), Err(SchemaError::UnknownLabel(_))));
    }

    #[test]
    fn test_graph_document_unknown_label() {
        let registry = SchemaDocument::from_json(SCHEMA)
            .unwrap()
            .build(CollectionSavePolicy::default())
            .unwrap();
        let doc = r#"{"entities": [{"label": "s", "type": "Study", "references": {"events": ["ghost"]}}]}"#;
        let err = GraphDocument::from_json(doc)
            .unwrap()
            .load(Arc::new(registry))
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownLabel(label) if label == "ghost"));
    }
}
