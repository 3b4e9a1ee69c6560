//! Metadata registry: entity types, their ordered properties and identity keys.
//!
//! The registry is built once through [`RegistryBuilder`] and is immutable
//! afterwards. All configuration errors (unsupported flags, missing or
//! asymmetric inverses, bad identity keys) surface from
//! [`RegistryBuilder::build`], never at traversal time.

use std::collections::HashMap;

use entigraph_config::CollectionSavePolicy;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metadata::error::MetadataError;
use crate::metadata::property::{
    Cardinality, DeriveContext, Property, PropertyBuilder, PropertyFlag, PropertyKind,
    PropertyTraits, Target, CONFLICTING_FLAGS,
};
use crate::value::ValueType;

/// Index of an entity type in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Entity type
// ============================================================================

/// Metadata for one entity type.
#[derive(Debug, Clone)]
pub struct EntityType {
    id: TypeId,
    name: String,
    abstract_type: bool,
    save_proxy: bool,
    identifier: Option<usize>,
    secondary_keys: Vec<Vec<usize>>,
    properties: Vec<Property>,
    by_name: HashMap<String, usize>,
}

impl EntityType {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_type
    }

    pub fn is_save_proxy(&self) -> bool {
        self.save_proxy
    }

    /// Ordered properties; a property's position is its slot.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.by_name.get(name).map(|&slot| &self.properties[slot])
    }

    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Property at `slot`. Slots come from this type, so the index is valid.
    pub fn property_at(&self, slot: usize) -> &Property {
        &self.properties[slot]
    }

    /// Slot of the server-assigned identity attribute
    pub fn identifier_slot(&self) -> Option<usize> {
        self.identifier
    }

    pub fn identifier_property(&self) -> Option<&Property> {
        self.identifier.map(|slot| &self.properties[slot])
    }

    /// Alternate business keys, in preference order
    pub fn secondary_keys(&self) -> &[Vec<usize>] {
        &self.secondary_keys
    }

    /// Slots of every reference property.
    pub fn reference_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_reference())
            .map(|(slot, _)| slot)
    }

    /// Slots of every non-domain property.
    pub fn value_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_nondomain())
            .map(|(slot, _)| slot)
    }

    /// Slots of references selected by `pred`.
    pub fn slots_where(&self, pred: impl Fn(&Property) -> bool) -> Vec<usize> {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| pred(p))
            .map(|(slot, _)| slot)
            .collect()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable table from type to ordered property descriptors.
#[derive(Debug, Clone)]
pub struct MetadataRegistry {
    types: Vec<EntityType>,
    by_name: HashMap<String, TypeId>,
    policy: CollectionSavePolicy,
}

impl MetadataRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Entity type for an id issued by this registry.
    pub fn get(&self, id: TypeId) -> &EntityType {
        &self.types[id.index()]
    }

    pub fn type_named(&self, name: &str) -> Option<&EntityType> {
        self.by_name.get(name).map(|id| self.get(*id))
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn collection_policy(&self) -> CollectionSavePolicy {
        self.policy
    }

    /// The inverse of `slot` on `ty`, as (target type, inverse slot).
    pub fn inverse_of(&self, ty: TypeId, slot: usize) -> Option<(TypeId, usize)> {
        let property = self.get(ty).property_at(slot);
        Some((property.target_type?, property.inverse_slot?))
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Declarative builder for an [`EntityType`].
#[derive(Debug, Clone)]
pub struct TypeBuilder {
    name: String,
    abstract_type: bool,
    save_proxy: bool,
    identifier: Option<String>,
    secondary_keys: Vec<Vec<String>>,
    properties: Vec<PropertyBuilder>,
}

impl TypeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            abstract_type: false,
            save_proxy: false,
            identifier: None,
            secondary_keys: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn abstract_type(mut self) -> Self {
        self.abstract_type = true;
        self
    }

    /// Instances are saved through a proxy rather than directly
    pub fn save_proxy(mut self) -> Self {
        self.save_proxy = true;
        self
    }

    /// Declare an autogenerated integer `identifier` attribute and use it as identity.
    pub fn with_identifier(self) -> Self {
        self.property(
            PropertyBuilder::attribute("identifier", ValueType::Int)
                .flag(PropertyFlag::Autogenerated),
        )
        .identifier("identifier")
    }

    /// Use an already declared attribute as the server-assigned identity.
    pub fn identifier(mut self, attribute: &str) -> Self {
        self.identifier = Some(attribute.to_string());
        self
    }

    /// Add an alternate business key made of non-domain attributes.
    pub fn key<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.secondary_keys
            .push(attributes.into_iter().map(|a| a.as_ref().to_string()).collect());
        self
    }

    pub fn property(mut self, property: PropertyBuilder) -> Self {
        self.properties.push(property);
        self
    }
}

/// Builder for a [`MetadataRegistry`].
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    types: Vec<TypeBuilder>,
    policy: CollectionSavePolicy,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_policy(mut self, policy: CollectionSavePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn entity(mut self, ty: TypeBuilder) -> Self {
        self.types.push(ty);
        self
    }

    /// Validate all declarations and derive every property trait.
    pub fn build(self) -> Result<MetadataRegistry, MetadataError> {
        let mut by_name = HashMap::new();
        for (index, ty) in self.types.iter().enumerate() {
            if by_name
                .insert(ty.name.clone(), TypeId(index as u32))
                .is_some()
            {
                return Err(MetadataError::DuplicateType {
                    name: ty.name.clone(),
                });
            }
        }

        let mut types = Vec::with_capacity(self.types.len());
        for (index, builder) in self.types.into_iter().enumerate() {
            types.push(build_type(TypeId(index as u32), builder, &by_name)?);
        }

        resolve_inverses(&mut types)?;
        derive_traits(&mut types, self.policy)?;

        debug!(types = types.len(), policy = %self.policy, "Built metadata registry");

        Ok(MetadataRegistry {
            types,
            by_name,
            policy: self.policy,
        })
    }
}

/// First pass: per-type structural checks and target resolution.
fn build_type(
    id: TypeId,
    builder: TypeBuilder,
    type_ids: &HashMap<String, TypeId>,
) -> Result<EntityType, MetadataError> {
    let type_name = builder.name;
    let mut properties = Vec::with_capacity(builder.properties.len());
    let mut by_name = HashMap::new();

    for declared in builder.properties {
        if by_name
            .insert(declared.name.clone(), properties.len())
            .is_some()
        {
            return Err(MetadataError::DuplicateProperty {
                entity: type_name.clone(),
                property: declared.name,
            });
        }

        let mut property = declared.into_property();
        check_flags(&type_name, &property)?;

        match &property.target {
            Target::Entity(target) => {
                if property.kind == PropertyKind::NonDomain {
                    return Err(MetadataError::invalid_declaration(
                        &type_name,
                        &property.name,
                        "a non-domain attribute cannot target an entity type",
                    ));
                }
                let target_id =
                    type_ids
                        .get(target)
                        .ok_or_else(|| MetadataError::UnknownTargetType {
                            entity: type_name.clone(),
                            property: property.name.clone(),
                            target: target.clone(),
                        })?;
                property.target_type = Some(*target_id);
            }
            Target::Value(ty) => {
                if property.kind.is_domain() {
                    return Err(MetadataError::invalid_declaration(
                        &type_name,
                        &property.name,
                        "a reference must target an entity type",
                    ));
                }
                if let Some(default) = property.default.take() {
                    if !default.conforms_to(*ty) {
                        return Err(MetadataError::DefaultTypeMismatch {
                            entity: type_name.clone(),
                            property: property.name.clone(),
                            expected: ty.as_str(),
                        });
                    }
                    property.default = Some(default.coerce_to(*ty));
                }
            }
        }

        if property.kind == PropertyKind::Owner && property.inverse.is_none() {
            return Err(MetadataError::MissingOwnerInverse {
                entity: type_name.clone(),
                property: property.name.clone(),
            });
        }
        if property.kind == PropertyKind::Owner && property.cardinality == Cardinality::Collection
        {
            return Err(MetadataError::invalid_declaration(
                &type_name,
                &property.name,
                "an owner reference must be scalar",
            ));
        }

        properties.push(property);
    }

    let key_slot = |attribute: &str| -> Result<usize, MetadataError> {
        let slot = *by_name
            .get(attribute)
            .ok_or_else(|| MetadataError::invalid_key(&type_name, attribute, "not declared"))?;
        let p: &Property = &properties[slot];
        if !p.is_nondomain() || p.is_collection() {
            return Err(MetadataError::invalid_key(
                &type_name,
                attribute,
                "key attributes must be scalar non-domain attributes",
            ));
        }
        Ok(slot)
    };

    let identifier = builder
        .identifier
        .as_deref()
        .map(&key_slot)
        .transpose()?;

    let mut secondary_keys = Vec::with_capacity(builder.secondary_keys.len());
    for key in &builder.secondary_keys {
        if key.is_empty() {
            return Err(MetadataError::invalid_key(&type_name, "", "empty key"));
        }
        secondary_keys.push(
            key.iter()
                .map(|a| key_slot(a.as_str()))
                .collect::<Result<Vec<_>, _>>()?,
        );
    }

    Ok(EntityType {
        id,
        name: type_name,
        abstract_type: builder.abstract_type,
        save_proxy: builder.save_proxy,
        identifier,
        secondary_keys,
        properties,
        by_name,
    })
}

fn check_flags(entity: &str, property: &Property) -> Result<(), MetadataError> {
    for flag in &property.flags {
        if !flag.supported_by(property.kind) {
            return Err(MetadataError::unsupported_flag(
                entity,
                &property.name,
                flag.as_str(),
                property.kind.as_str(),
            ));
        }
    }
    for (a, b) in CONFLICTING_FLAGS {
        if property.flags.contains(a) && property.flags.contains(b) {
            return Err(MetadataError::ConflictingFlags {
                entity: entity.to_string(),
                property: property.name.clone(),
                first: a.as_str(),
                second: b.as_str(),
            });
        }
    }
    Ok(())
}

/// Second pass: check inverse symmetry and record inverse slots.
fn resolve_inverses(types: &mut [EntityType]) -> Result<(), MetadataError> {
    let mut resolved = Vec::new();

    for ty in types.iter() {
        for (slot, property) in ty.properties.iter().enumerate() {
            let Some(inverse_name) = property.inverse.as_deref() else {
                continue;
            };
            let Some(target_id) = property.target_type else {
                return Err(MetadataError::invalid_declaration(
                    &ty.name,
                    &property.name,
                    "only references may declare an inverse",
                ));
            };
            let target = &types[target_id.index()];

            let inverse_slot =
                target
                    .slot_of(inverse_name)
                    .ok_or_else(|| MetadataError::MissingInverse {
                        entity: ty.name.clone(),
                        property: property.name.clone(),
                        target: target.name.clone(),
                        inverse: inverse_name.to_string(),
                    })?;
            let inverse = &target.properties[inverse_slot];

            if inverse.inverse.as_deref() != Some(property.name.as_str())
                || inverse.target_type != Some(ty.id)
            {
                return Err(MetadataError::AsymmetricInverse {
                    entity: ty.name.clone(),
                    property: property.name.clone(),
                    target: target.name.clone(),
                    inverse: inverse_name.to_string(),
                    found: inverse.inverse.clone(),
                });
            }

            if property.kind == PropertyKind::Dependent && inverse.kind != PropertyKind::Owner {
                return Err(MetadataError::invalid_declaration(
                    &ty.name,
                    &property.name,
                    "the inverse of a dependent reference must be an owner reference",
                ));
            }

            resolved.push((ty.id, slot, inverse_slot));
        }
    }

    for (ty, slot, inverse_slot) in resolved {
        types[ty.index()].properties[slot].inverse_slot = Some(inverse_slot);
    }
    Ok(())
}

/// Third pass: derive persistence traits now that inverses are known.
fn derive_traits(
    types: &mut [EntityType],
    policy: CollectionSavePolicy,
) -> Result<(), MetadataError> {
    let mut derived = Vec::new();

    for ty in types.iter() {
        for (slot, property) in ty.properties.iter().enumerate() {
            let target = property.target_type.map(|t| &types[t.index()]);
            let inverse = match (target, property.inverse_slot) {
                (Some(target), Some(inverse_slot)) => Some(&target.properties[inverse_slot]),
                _ => None,
            };
            let ctx = DeriveContext {
                inverse,
                target_abstract: target.is_some_and(|t| t.abstract_type),
                target_save_proxy: target.is_some_and(|t| t.save_proxy),
                is_identifier: ty.identifier == Some(slot),
                policy,
            };
            let traits = PropertyTraits::derive(property, &ctx);

            if property.has_flag(PropertyFlag::NoCascadeUpdateToCreate) && !traits.cascaded {
                return Err(MetadataError::invalid_declaration(
                    &ty.name,
                    &property.name,
                    "no_cascade_update_to_create requires a cascaded reference",
                ));
            }

            derived.push((ty.id, slot, traits));
        }
    }

    for (ty, slot, traits) in derived {
        types[ty.index()].properties[slot].traits = traits;
    }
    Ok(())
}
