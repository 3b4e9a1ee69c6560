//! Arena-backed entity graph.
//!
//! Entities live in an index-based arena and refer to each other by
//! [`EntityId`], so owner/dependent back-references form plain index cycles.
//! Every reference mutation goes through [`EntityGraph::set_reference`],
//! [`EntityGraph::add_reference`] or [`EntityGraph::remove_reference`], which
//! update the forward slot and the inverse slot in one step.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::metadata::{EntityType, MetadataRegistry, Property, TypeId};
use crate::value::Value;
use crate::visitor::{selectors, ReferenceVisitor};

static NULL: Value = Value::Null;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by graph accessors and mutators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// No entity type with this name
    #[error("unknown entity type '{name}'")]
    UnknownType { name: String },

    /// Entity id not issued by this graph
    #[error("entity #{index} does not exist")]
    UnknownEntity { index: usize },

    /// Attribute not declared on the entity's type
    #[error("{entity}: unknown attribute '{attribute}'")]
    UnknownAttribute { entity: String, attribute: String },

    /// Value access on a reference or reference access on a value
    #[error("{entity}.{attribute}: expected a {expected} attribute")]
    WrongKind {
        entity: String,
        attribute: String,
        expected: &'static str,
    },

    /// Value of the wrong primitive type
    #[error("{entity}.{attribute}: expected {expected}, got {found}")]
    TypeMismatch {
        entity: String,
        attribute: String,
        expected: &'static str,
        found: String,
    },

    /// Referenced entity of the wrong type
    #[error("{entity}.{attribute}: cannot reference {found}, expected a {expected}")]
    TargetMismatch {
        entity: String,
        attribute: String,
        expected: String,
        found: String,
    },

    /// Mandatory attribute without a value
    #[error("{entity}: missing mandatory attribute '{attribute}'")]
    MissingMandatory { entity: String, attribute: String },
}

impl GraphError {
    /// Create an UnknownAttribute error.
    pub fn unknown_attribute(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::UnknownAttribute {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }

    /// Create a WrongKind error.
    pub fn wrong_kind(
        entity: impl Into<String>,
        attribute: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::WrongKind {
            entity: entity.into(),
            attribute: attribute.into(),
            expected,
        }
    }

    /// Create a MissingMandatory error.
    pub fn missing_mandatory(entity: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::MissingMandatory {
            entity: entity.into(),
            attribute: attribute.into(),
        }
    }
}

// ============================================================================
// Entities and slots
// ============================================================================

/// Index of an entity in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub(crate) usize);

impl EntityId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Storage for one attribute of one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(Value),
    /// Referenced entities; at most one for scalar references
    Reference {
        targets: Vec<EntityId>,
        /// False while a lazy fetch is still pending
        resolved: bool,
    },
}

/// A mutable record in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    ty: TypeId,
    slots: Vec<Slot>,
}

impl Entity {
    pub fn type_id(&self) -> TypeId {
        self.ty
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

/// Identity key value: a type, a key level and the key attribute values.
///
/// Level 0 is the server-assigned identifier, levels 1.. are the type's
/// secondary keys in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub ty: TypeId,
    pub level: usize,
    pub values: Vec<Value>,
}

// ============================================================================
// Graph
// ============================================================================

/// Index-based store of entities sharing one metadata registry.
#[derive(Debug, Clone)]
pub struct EntityGraph {
    registry: Arc<MetadataRegistry>,
    entities: Vec<Entity>,
}

impl EntityGraph {
    pub fn new(registry: Arc<MetadataRegistry>) -> Self {
        Self {
            registry,
            entities: Vec::new(),
        }
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn shared_registry(&self) -> Arc<MetadataRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        id.0 < self.entities.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> {
        (0..self.entities.len()).map(EntityId)
    }

    pub fn entity(&self, id: EntityId) -> Result<&Entity, GraphError> {
        self.entities
            .get(id.0)
            .ok_or(GraphError::UnknownEntity { index: id.0 })
    }

    /// Create an empty entity of the named type.
    pub fn create(&mut self, type_name: &str) -> Result<EntityId, GraphError> {
        let ty = self
            .registry
            .type_id(type_name)
            .ok_or_else(|| GraphError::UnknownType {
                name: type_name.to_string(),
            })?;
        Ok(self.create_of(ty))
    }

    /// Create an empty entity of a type issued by this graph's registry.
    pub fn create_of(&mut self, ty: TypeId) -> EntityId {
        let slots = self
            .registry
            .get(ty)
            .properties()
            .iter()
            .map(|p| {
                if p.is_reference() {
                    Slot::Reference {
                        targets: Vec::new(),
                        resolved: true,
                    }
                } else {
                    Slot::Value(Value::Null)
                }
            })
            .collect();
        let id = EntityId(self.entities.len());
        self.entities.push(Entity { ty, slots });
        trace!(entity = %id, ty = self.registry.get(ty).name(), "Created entity");
        id
    }

    /// Type metadata of an entity.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph. Use [`Self::entity`]
    /// for ids of unknown origin.
    pub fn entity_type(&self, id: EntityId) -> &EntityType {
        self.registry.get(self.entities[id.0].ty)
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    pub fn type_id_of(&self, id: EntityId) -> TypeId {
        self.entities[id.0].ty
    }

    /// Resolve an attribute name to its slot and property.
    pub fn property(&self, id: EntityId, attribute: &str) -> Result<(usize, &Property), GraphError> {
        self.entity(id)?;
        let ty = self.entity_type(id);
        let slot = ty
            .slot_of(attribute)
            .ok_or_else(|| GraphError::unknown_attribute(self.describe(id), attribute))?;
        Ok((slot, ty.property_at(slot)))
    }

    // ------------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------------

    pub fn value(&self, id: EntityId, attribute: &str) -> Result<&Value, GraphError> {
        let (slot, property) = self.property(id, attribute)?;
        if property.is_reference() {
            return Err(GraphError::wrong_kind(self.describe(id), attribute, "value"));
        }
        Ok(self.value_at(id, slot))
    }

    /// Value in `slot`; `Null` for reference slots.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph or `slot` is out of
    /// range for its type. [`Self::value`] checks both.
    pub fn value_at(&self, id: EntityId, slot: usize) -> &Value {
        match &self.entities[id.0].slots[slot] {
            Slot::Value(value) => value,
            Slot::Reference { .. } => &NULL,
        }
    }

    /// Set a non-domain attribute, checking the declared type.
    ///
    /// Integers stored in float attributes are converted to floats.
    pub fn set_value(
        &mut self,
        id: EntityId,
        attribute: &str,
        value: impl Into<Value>,
    ) -> Result<(), GraphError> {
        let value = value.into();
        let (slot, property) = self.property(id, attribute)?;
        let Some(expected) = property.value_type() else {
            return Err(GraphError::wrong_kind(self.describe(id), attribute, "value"));
        };
        if !value.conforms_to(expected) {
            return Err(GraphError::TypeMismatch {
                entity: self.describe(id),
                attribute: attribute.to_string(),
                expected: expected.as_str(),
                found: value.to_string(),
            });
        }
        self.set_value_at(id, slot, value);
        Ok(())
    }

    /// Store `value` in its declared representation.
    pub(crate) fn set_value_at(&mut self, id: EntityId, slot: usize, value: Value) {
        let entity = &mut self.entities[id.0];
        let value = match self.registry.get(entity.ty).property_at(slot).value_type() {
            Some(ty) => value.coerce_to(ty),
            None => value,
        };
        if let Slot::Value(current) = &mut entity.slots[slot] {
            *current = value;
        }
    }

    // ------------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------------

    pub fn references(&self, id: EntityId, attribute: &str) -> Result<&[EntityId], GraphError> {
        let (slot, property) = self.property(id, attribute)?;
        if !property.is_reference() {
            return Err(GraphError::wrong_kind(self.describe(id), attribute, "reference"));
        }
        Ok(self.references_at(id, slot))
    }

    /// Targets in `slot`; empty for value slots.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph or `slot` is out of
    /// range for its type. [`Self::references`] checks both.
    pub fn references_at(&self, id: EntityId, slot: usize) -> &[EntityId] {
        match &self.entities[id.0].slots[slot] {
            Slot::Reference { targets, .. } => targets,
            Slot::Value(_) => &[],
        }
    }

    /// Target of a scalar reference.
    pub fn reference(&self, id: EntityId, attribute: &str) -> Result<Option<EntityId>, GraphError> {
        let (slot, property) = self.property(id, attribute)?;
        if !property.is_reference() || property.is_collection() {
            return Err(GraphError::wrong_kind(
                self.describe(id),
                attribute,
                "scalar reference",
            ));
        }
        Ok(self.references_at(id, slot).first().copied())
    }

    /// Set or clear a scalar reference, updating the inverse in the same step.
    ///
    /// Any previous target loses its inverse link, and if the inverse is
    /// scalar the new target's previous referrer is cleared.
    pub fn set_reference(
        &mut self,
        id: EntityId,
        attribute: &str,
        target: Option<EntityId>,
    ) -> Result<(), GraphError> {
        let (slot, property) = self.property(id, attribute)?;
        if !property.is_reference() || property.is_collection() {
            return Err(GraphError::wrong_kind(
                self.describe(id),
                attribute,
                "scalar reference",
            ));
        }
        match target {
            Some(target) => {
                self.check_target(id, slot, target)?;
                self.connect(id, slot, target);
            }
            None => {
                if let Some(old) = self.references_at(id, slot).first().copied() {
                    self.disconnect(id, slot, old);
                }
            }
        }
        Ok(())
    }

    /// Add to a collection reference, updating the inverse.
    pub fn add_reference(
        &mut self,
        id: EntityId,
        attribute: &str,
        target: EntityId,
    ) -> Result<(), GraphError> {
        let slot = self.collection_slot(id, attribute)?;
        self.check_target(id, slot, target)?;
        self.connect(id, slot, target);
        Ok(())
    }

    /// Remove from a collection reference, updating the inverse.
    ///
    /// Returns false if `target` was not referenced.
    pub fn remove_reference(
        &mut self,
        id: EntityId,
        attribute: &str,
        target: EntityId,
    ) -> Result<bool, GraphError> {
        let slot = self.collection_slot(id, attribute)?;
        Ok(self.disconnect(id, slot, target))
    }

    fn collection_slot(&self, id: EntityId, attribute: &str) -> Result<usize, GraphError> {
        let (slot, property) = self.property(id, attribute)?;
        if !property.is_reference() || !property.is_collection() {
            return Err(GraphError::wrong_kind(
                self.describe(id),
                attribute,
                "collection reference",
            ));
        }
        Ok(slot)
    }

    fn check_target(&self, id: EntityId, slot: usize, target: EntityId) -> Result<(), GraphError> {
        self.entity(target)?;
        let property = self.entity_type(id).property_at(slot);
        if property.target_type() != Some(self.type_id_of(target)) {
            let expected = property
                .target_type()
                .map(|t| self.registry.get(t).name().to_string())
                .unwrap_or_default();
            return Err(GraphError::TargetMismatch {
                entity: self.describe(id),
                attribute: property.name().to_string(),
                expected,
                found: self.describe(target),
            });
        }
        Ok(())
    }

    /// Link `id.slot -> target` and the inverse `target.inverse -> id`.
    pub(crate) fn connect(&mut self, id: EntityId, slot: usize, target: EntityId) {
        let (collection, inverse) = {
            let property = self.entity_type(id).property_at(slot);
            (property.is_collection(), property.inverse_slot())
        };

        if !collection {
            if let Some(old) = self.references_at(id, slot).first().copied() {
                if old != target {
                    self.disconnect(id, slot, old);
                }
            }
        }
        self.link(id, slot, target);

        if let Some(inverse) = inverse {
            let inverse_collection = self.entity_type(target).property_at(inverse).is_collection();
            if !inverse_collection {
                if let Some(previous) = self.references_at(target, inverse).first().copied() {
                    if previous != id {
                        self.disconnect(target, inverse, previous);
                    }
                }
            }
            self.link(target, inverse, id);
        }
    }

    /// Unlink `id.slot -> target` and its inverse. Returns false if absent.
    pub(crate) fn disconnect(&mut self, id: EntityId, slot: usize, target: EntityId) -> bool {
        let inverse = self.entity_type(id).property_at(slot).inverse_slot();
        let removed = self.unlink(id, slot, target);
        if let Some(inverse) = inverse {
            self.unlink(target, inverse, id);
        }
        removed
    }

    fn link(&mut self, id: EntityId, slot: usize, target: EntityId) {
        let collection = self.entity_type(id).property_at(slot).is_collection();
        if let Slot::Reference { targets, .. } = &mut self.entities[id.0].slots[slot] {
            if !collection {
                targets.clear();
            }
            if !targets.contains(&target) {
                targets.push(target);
            }
        }
    }

    fn unlink(&mut self, id: EntityId, slot: usize, target: EntityId) -> bool {
        if let Slot::Reference { targets, .. } = &mut self.entities[id.0].slots[slot] {
            if let Some(pos) = targets.iter().position(|t| *t == target) {
                targets.remove(pos);
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------------
    // Lazy resolution state
    // ------------------------------------------------------------------------

    pub fn is_resolved(&self, id: EntityId, attribute: &str) -> Result<bool, GraphError> {
        let (slot, _) = self.property(id, attribute)?;
        Ok(self.is_resolved_at(id, slot))
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph or `slot` is out of range.
    pub fn is_resolved_at(&self, id: EntityId, slot: usize) -> bool {
        match &self.entities[id.0].slots[slot] {
            Slot::Reference { resolved, .. } => *resolved,
            Slot::Value(_) => true,
        }
    }

    /// Mark a reference slot as awaiting a lazy fetch.
    pub fn mark_unresolved(&mut self, id: EntityId, attribute: &str) -> Result<(), GraphError> {
        let (slot, property) = self.property(id, attribute)?;
        if !property.is_reference() {
            return Err(GraphError::wrong_kind(self.describe(id), attribute, "reference"));
        }
        self.set_resolved(id, slot, false);
        Ok(())
    }

    pub(crate) fn set_resolved(&mut self, id: EntityId, slot: usize, value: bool) {
        if let Slot::Reference { resolved, .. } = &mut self.entities[id.0].slots[slot] {
            *resolved = value;
        }
    }

    // ------------------------------------------------------------------------
    // Defaults and validation
    // ------------------------------------------------------------------------

    /// Fill unset attributes with their declared defaults.
    ///
    /// Applies to `root` and every entity reachable through cascaded
    /// references. Returns the number of attributes set.
    pub fn apply_defaults(&mut self, root: EntityId) -> usize {
        let traversal = ReferenceVisitor::new(selectors::cascaded).visit(self, root);
        let registry = Arc::clone(&self.registry);
        let mut applied = 0;

        for id in traversal.order {
            let ty = registry.get(self.type_id_of(id));
            for (slot, property) in ty.properties().iter().enumerate() {
                let Some(default) = property.default_value() else {
                    continue;
                };
                if self.value_at(id, slot).is_null() {
                    self.set_value_at(id, slot, default.clone());
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Check mandatory attributes. Autogenerated attributes are exempt.
    pub fn validate(&self, id: EntityId) -> Result<(), GraphError> {
        self.entity(id)?;
        for (slot, property) in self.entity_type(id).properties().iter().enumerate() {
            if !property.is_mandatory() || property.is_autogenerated() {
                continue;
            }
            let missing = if property.is_reference() {
                self.references_at(id, slot).is_empty()
            } else {
                self.value_at(id, slot).is_null()
            };
            if missing {
                return Err(GraphError::missing_mandatory(self.describe(id), property.name()));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// Server-assigned identifier, if the type declares one and it is set.
    ///
    /// `None` as well for an id this graph did not issue.
    pub fn identifier(&self, id: EntityId) -> Option<&Value> {
        let entity = self.entities.get(id.0)?;
        let slot = self.registry.get(entity.ty).identifier_slot()?;
        match &entity.slots[slot] {
            Slot::Value(value) if !value.is_null() => Some(value),
            _ => None,
        }
    }

    pub fn is_persisted(&self, id: EntityId) -> bool {
        self.identifier(id).is_some()
    }

    /// Every identity key the entity currently exposes, identifier first.
    ///
    /// A key with any null component is not exposed, and an id this graph
    /// did not issue exposes none.
    pub fn identity_keys(&self, id: EntityId) -> Vec<IdentityKey> {
        if !self.contains(id) {
            return Vec::new();
        }
        let ty = self.entity_type(id);
        let mut keys = Vec::new();
        if let Some(slot) = ty.identifier_slot() {
            if let Some(key) = self.key_at(id, 0, &[slot]) {
                keys.push(key);
            }
        }
        for (index, slots) in ty.secondary_keys().iter().enumerate() {
            if let Some(key) = self.key_at(id, index + 1, slots) {
                keys.push(key);
            }
        }
        keys
    }

    fn key_at(&self, id: EntityId, level: usize, slots: &[usize]) -> Option<IdentityKey> {
        let values = slots
            .iter()
            .map(|&slot| {
                let value = self.value_at(id, slot);
                (!value.is_null()).then(|| value.clone())
            })
            .collect::<Option<Vec<_>>>()?;
        Some(IdentityKey {
            ty: self.type_id_of(id),
            level,
            values,
        })
    }

    /// Compare two entities by identity key.
    ///
    /// Key levels are tried in order and the first level both entities
    /// expose decides. `None` means no level is comparable.
    pub fn identity_match(&self, a: EntityId, b: EntityId) -> Option<bool> {
        if a == b {
            return Some(true);
        }
        if !self.contains(a) || !self.contains(b) {
            return None;
        }
        if self.type_id_of(a) != self.type_id_of(b) {
            return Some(false);
        }
        let left = self.identity_keys(a);
        let right = self.identity_keys(b);
        left.iter().find_map(|l| {
            right
                .iter()
                .find(|r| r.level == l.level)
                .map(|r| r.values == l.values)
        })
    }

    /// Human-readable description: `Type#index[key=value]`.
    pub fn describe(&self, id: EntityId) -> String {
        let Some(entity) = self.entities.get(id.0) else {
            return format!("?{}", id);
        };
        let ty = self.registry.get(entity.ty);
        let key_slots = ty
            .identifier_slot()
            .filter(|&slot| !self.value_at(id, slot).is_null())
            .map(|slot| vec![slot])
            .or_else(|| {
                ty.secondary_keys()
                    .iter()
                    .find(|slots| slots.iter().all(|&s| !self.value_at(id, s).is_null()))
                    .cloned()
            });

        match key_slots {
            Some(slots) => {
                let parts: Vec<String> = slots
                    .iter()
                    .map(|&slot| {
                        format!("{}={}", ty.property_at(slot).name(), self.value_at(id, slot))
                    })
                    .collect();
                format!("{}{}[{}]", ty.name(), id, parts.join(","))
            }
            None => format!("{}{}", ty.name(), id),
        }
    }

    /// Entities reachable from `root` through any reference.
    pub fn reachable(&self, root: EntityId) -> HashSet<EntityId> {
        ReferenceVisitor::new(selectors::references)
            .visit(self, root)
            .order
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{PropertyBuilder, RegistryBuilder, TypeBuilder};
    use crate::value::ValueType;

    fn registry() -> Arc<MetadataRegistry> {
        Arc::new(
            RegistryBuilder::new()
                .entity(
                    TypeBuilder::new("Study")
                        .with_identifier()
                        .property(PropertyBuilder::attribute("title", ValueType::Text).mandatory())
                        .property(
                            PropertyBuilder::attribute("activity_status", ValueType::Text)
                                .default_value("Active"),
                        )
                        .key(["title"])
                        .property(PropertyBuilder::dependents("events", "Event").inverse("study"))
                        .property(PropertyBuilder::dependent("protocol", "Protocol").inverse("study")),
                )
                .entity(
                    TypeBuilder::new("Event")
                        .with_identifier()
                        .property(PropertyBuilder::attribute("label", ValueType::Text))
                        .property(
                            PropertyBuilder::attribute("activity_status", ValueType::Text)
                                .default_value("Active"),
                        )
                        .key(["label"])
                        .property(PropertyBuilder::owner("study", "Study", "events")),
                )
                .entity(
                    TypeBuilder::new("Protocol")
                        .property(PropertyBuilder::attribute("version", ValueType::Int))
                        .property(PropertyBuilder::attribute("dose", ValueType::Float))
                        .key(["dose"])
                        .property(PropertyBuilder::owner("study", "Study", "protocol")),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_set_value_checks_type() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        graph.set_value(study, "title", "Trial").unwrap();
        assert_eq!(graph.value(study, "title").unwrap(), &Value::from("Trial"));

        let err = graph.set_value(study, "title", 3i64).unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));

        let err = graph.set_value(study, "events", "x").unwrap_err();
        assert!(matches!(err, GraphError::WrongKind { .. }));

        let err = graph.value(study, "missing").unwrap_err();
        assert!(matches!(err, GraphError::UnknownAttribute { .. }));
    }

    #[test]
    fn test_add_reference_sets_owner() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        let event = graph.create("Event").unwrap();

        graph.add_reference(study, "events", event).unwrap();
        assert_eq!(graph.references(study, "events").unwrap(), &[event]);
        assert_eq!(graph.reference(event, "study").unwrap(), Some(study));

        // adding twice keeps one entry
        graph.add_reference(study, "events", event).unwrap();
        assert_eq!(graph.references(study, "events").unwrap().len(), 1);
    }

    #[test]
    fn test_set_reference_moves_between_owners() {
        let mut graph = EntityGraph::new(registry());
        let first = graph.create("Study").unwrap();
        let second = graph.create("Study").unwrap();
        let event = graph.create("Event").unwrap();

        graph.set_reference(event, "study", Some(first)).unwrap();
        assert_eq!(graph.references(first, "events").unwrap(), &[event]);

        graph.set_reference(event, "study", Some(second)).unwrap();
        assert!(graph.references(first, "events").unwrap().is_empty());
        assert_eq!(graph.references(second, "events").unwrap(), &[event]);

        graph.set_reference(event, "study", None).unwrap();
        assert!(graph.references(second, "events").unwrap().is_empty());
        assert_eq!(graph.reference(event, "study").unwrap(), None);
    }

    #[test]
    fn test_scalar_inverse_clears_stale_referrer() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        let old = graph.create("Protocol").unwrap();
        let new = graph.create("Protocol").unwrap();

        graph.set_reference(study, "protocol", Some(old)).unwrap();
        assert_eq!(graph.reference(old, "study").unwrap(), Some(study));

        graph.set_reference(new, "study", Some(study)).unwrap();
        assert_eq!(graph.reference(study, "protocol").unwrap(), Some(new));
        assert_eq!(graph.reference(old, "study").unwrap(), None);
    }

    #[test]
    fn test_remove_reference_clears_inverse() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        let event = graph.create("Event").unwrap();
        graph.add_reference(study, "events", event).unwrap();

        assert!(graph.remove_reference(study, "events", event).unwrap());
        assert_eq!(graph.reference(event, "study").unwrap(), None);
        assert!(!graph.remove_reference(study, "events", event).unwrap());
    }

    #[test]
    fn test_reference_target_type_checked() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        let other = graph.create("Study").unwrap();
        let err = graph.add_reference(study, "events", other).unwrap_err();
        assert!(matches!(err, GraphError::TargetMismatch { .. }));
    }

    #[test]
    fn test_apply_defaults_reaches_dependents() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        let event = graph.create("Event").unwrap();
        graph.add_reference(study, "events", event).unwrap();
        graph.set_value(event, "activity_status", "Closed").unwrap();

        let applied = graph.apply_defaults(study);
        assert_eq!(applied, 1);
        assert_eq!(
            graph.value(study, "activity_status").unwrap(),
            &Value::from("Active")
        );
        assert_eq!(
            graph.value(event, "activity_status").unwrap(),
            &Value::from("Closed")
        );
    }

    #[test]
    fn test_validate_mandatory() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        let err = graph.validate(study).unwrap_err();
        assert_eq!(
            err,
            GraphError::missing_mandatory("Study#0", "title")
        );
        graph.set_value(study, "title", "Trial").unwrap();
        assert!(graph.validate(study).is_ok());
    }

    #[test]
    fn test_identity_match_levels() {
        let mut graph = EntityGraph::new(registry());
        let a = graph.create("Event").unwrap();
        let b = graph.create("Event").unwrap();
        assert_eq!(graph.identity_match(a, b), None);

        graph.set_value(a, "label", "Baseline").unwrap();
        graph.set_value(b, "label", "Baseline").unwrap();
        assert_eq!(graph.identity_match(a, b), Some(true));

        // identifiers decide before secondary keys
        graph.set_value(a, "identifier", 1i64).unwrap();
        graph.set_value(b, "identifier", 2i64).unwrap();
        assert_eq!(graph.identity_match(a, b), Some(false));
    }

    #[test]
    fn test_identity_keys_skip_null_components() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        assert!(graph.identity_keys(study).is_empty());

        graph.set_value(study, "title", "Trial").unwrap();
        graph.set_value(study, "identifier", 7i64).unwrap();
        let keys = graph.identity_keys(study);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].level, 0);
        assert_eq!(keys[0].values, vec![Value::Int(7)]);
    }

    #[test]
    fn test_describe() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        assert_eq!(graph.describe(study), "Study#0");
        graph.set_value(study, "title", "Trial").unwrap();
        assert_eq!(graph.describe(study), "Study#0[title=\"Trial\"]");
        graph.set_value(study, "identifier", 12i64).unwrap();
        assert_eq!(graph.describe(study), "Study#0[identifier=12]");
    }

    #[test]
    fn test_resolution_marker() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        assert!(graph.is_resolved(study, "events").unwrap());
        graph.mark_unresolved(study, "events").unwrap();
        assert!(!graph.is_resolved(study, "events").unwrap());
        assert!(graph.mark_unresolved(study, "title").is_err());
    }

    #[test]
    fn test_int_in_float_attribute_keys_like_float() {
        let mut graph = EntityGraph::new(registry());
        let a = graph.create("Protocol").unwrap();
        let b = graph.create("Protocol").unwrap();
        graph.set_value(a, "dose", 3i64).unwrap();
        graph.set_value(b, "dose", 3.0f64).unwrap();

        assert_eq!(graph.value(a, "dose").unwrap(), &Value::Float(3.0));
        assert_eq!(graph.identity_keys(a), graph.identity_keys(b));
        assert_eq!(graph.identity_match(a, b), Some(true));

        // version stays an integer
        graph.set_value(a, "version", 2i64).unwrap();
        assert_eq!(graph.value(a, "version").unwrap(), &Value::Int(2));
    }

    #[test]
    fn test_foreign_id_does_not_panic() {
        let mut graph = EntityGraph::new(registry());
        let study = graph.create("Study").unwrap();
        let mut other = EntityGraph::new(registry());
        for _ in 0..3 {
            other.create("Study").unwrap();
        }
        let foreign = other.create("Study").unwrap();
        other.set_value(foreign, "identifier", 4i64).unwrap();

        assert!(!graph.contains(foreign));
        assert!(matches!(
            graph.entity(foreign),
            Err(GraphError::UnknownEntity { index: 3 })
        ));
        assert_eq!(graph.identifier(foreign), None);
        assert!(!graph.is_persisted(foreign));
        assert!(graph.identity_keys(foreign).is_empty());
        assert_eq!(graph.identity_match(study, foreign), None);
        assert!(graph.value(foreign, "title").is_err());
        assert_eq!(graph.describe(foreign), "?#3");
    }
}
