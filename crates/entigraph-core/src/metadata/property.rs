//! Property model: declared facts, flags and derived persistence traits.
//!
//! Every attribute of an entity type is described by a [`Property`]. The
//! declared facts (kind, cardinality, target, inverse, flags) are fixed at
//! registry build time, and the persistence predicates (`fetched?`, `saved?`,
//! `cascaded?`, ...) are derived from them once by [`PropertyTraits::derive`].
//! No predicate can be set directly.

use std::collections::BTreeSet;

use entigraph_config::CollectionSavePolicy;
use serde::{Deserialize, Serialize};

use crate::metadata::registry::TypeId;
use crate::value::{Value, ValueType};

// ============================================================================
// Structural facts
// ============================================================================

/// Relationship classification of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    /// Plain value attribute (string, number, flag)
    NonDomain,
    /// Reference to an entity with its own lifecycle
    Independent,
    /// Reference to entities whose lifecycle is subordinate to the declarer
    Dependent,
    /// Back-reference from a dependent to its owner (an independent reference)
    Owner,
}

impl PropertyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKind::NonDomain => "nondomain",
            PropertyKind::Independent => "independent",
            PropertyKind::Dependent => "dependent",
            PropertyKind::Owner => "owner",
        }
    }

    pub fn is_domain(&self) -> bool {
        !matches!(self, PropertyKind::NonDomain)
    }

    /// Independent references, owner back-references included.
    pub fn is_independent(&self) -> bool {
        matches!(self, PropertyKind::Independent | PropertyKind::Owner)
    }
}

/// Scalar or collection valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Scalar,
    Collection,
}

/// Declared target of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Primitive value
    Value(ValueType),
    /// Another entity type, by name
    Entity(String),
}

// ============================================================================
// Flags
// ============================================================================

/// Declarative persistence flag attached to a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyFlag {
    Autogenerated,
    Logical,
    Cascaded,
    Unfetched,
    Fetched,
    Saved,
    Unsaved,
    CreateOnly,
    UpdateOnly,
    NoCascadeUpdateToCreate,
    Nosync,
    Volatile,
    FetchSaved,
    IncludeInSaveTemplate,
}

impl PropertyFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyFlag::Autogenerated => "autogenerated",
            PropertyFlag::Logical => "logical",
            PropertyFlag::Cascaded => "cascaded",
            PropertyFlag::Unfetched => "unfetched",
            PropertyFlag::Fetched => "fetched",
            PropertyFlag::Saved => "saved",
            PropertyFlag::Unsaved => "unsaved",
            PropertyFlag::CreateOnly => "create_only",
            PropertyFlag::UpdateOnly => "update_only",
            PropertyFlag::NoCascadeUpdateToCreate => "no_cascade_update_to_create",
            PropertyFlag::Nosync => "nosync",
            PropertyFlag::Volatile => "volatile",
            PropertyFlag::FetchSaved => "fetch_saved",
            PropertyFlag::IncludeInSaveTemplate => "include_in_save_template",
        }
    }

    /// Whether the flag may be declared on a property of `kind`.
    pub fn supported_by(&self, kind: PropertyKind) -> bool {
        match self {
            PropertyFlag::Autogenerated => kind == PropertyKind::NonDomain,
            PropertyFlag::Logical | PropertyFlag::IncludeInSaveTemplate => kind.is_domain(),
            PropertyFlag::Cascaded | PropertyFlag::NoCascadeUpdateToCreate => {
                matches!(kind, PropertyKind::Independent | PropertyKind::Dependent)
            }
            _ => true,
        }
    }
}

/// Pairs of flags that contradict each other.
pub const CONFLICTING_FLAGS: &[(PropertyFlag, PropertyFlag)] = &[
    (PropertyFlag::Fetched, PropertyFlag::Unfetched),
    (PropertyFlag::Saved, PropertyFlag::Unsaved),
    (PropertyFlag::CreateOnly, PropertyFlag::UpdateOnly),
];

// ============================================================================
// Derived traits
// ============================================================================

/// Persistence predicates derived from a property's declared facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PropertyTraits {
    pub fetched: bool,
    pub logical: bool,
    pub cascaded: bool,
    pub cascade_update_to_create: bool,
    pub saved: bool,
    pub creatable: bool,
    pub updatable: bool,
    pub autogenerated: bool,
    pub fetch_saved: bool,
    pub savable_prerequisite: bool,
    pub include_in_save_template: bool,
    pub volatile: bool,
    pub nosync: bool,
}

/// Context needed to derive a property's traits beyond its own facts.
#[derive(Debug, Clone, Copy)]
pub struct DeriveContext<'a> {
    /// The inverse property on the target type, if declared
    pub inverse: Option<&'a Property>,
    /// The target entity type is abstract
    pub target_abstract: bool,
    /// The target entity type is saved through a proxy
    pub target_save_proxy: bool,
    /// The property is its declarer's identity attribute
    pub is_identifier: bool,
    /// Classification of bidirectional collections
    pub policy: CollectionSavePolicy,
}

impl PropertyTraits {
    /// Derive every predicate for `property` in the given context.
    pub fn derive(property: &Property, ctx: &DeriveContext<'_>) -> Self {
        let has = |flag| property.flags.contains(&flag);
        let kind = property.kind;
        let collection = property.cardinality == Cardinality::Collection;

        let logical = has(PropertyFlag::Logical)
            || (kind == PropertyKind::Owner
                && ctx
                    .inverse
                    .is_some_and(|inv| inv.flags.contains(&PropertyFlag::Logical)));

        let fetched = if has(PropertyFlag::Fetched) {
            true
        } else if has(PropertyFlag::Unfetched) {
            false
        } else if matches!(kind, PropertyKind::NonDomain | PropertyKind::Dependent) {
            !logical
        } else {
            ctx.target_abstract && !property.derived
        };

        let cascaded = (kind == PropertyKind::Dependent && !logical) || has(PropertyFlag::Cascaded);
        let cascade_update_to_create = cascaded && !has(PropertyFlag::NoCascadeUpdateToCreate);

        let self_saved_collection = match ctx.policy {
            CollectionSavePolicy::InverseOwned => false,
            CollectionSavePolicy::DependentSelfSaved => kind == PropertyKind::Dependent,
            CollectionSavePolicy::AlwaysSaved => true,
        };
        let saved = has(PropertyFlag::Saved)
            || (!has(PropertyFlag::Unsaved)
                && !ctx.target_save_proxy
                && (kind == PropertyKind::NonDomain
                    || cascaded
                    || !collection
                    || ctx.inverse.is_none()
                    || self_saved_collection));

        let autogenerated = has(PropertyFlag::Autogenerated);
        let fetch_saved = has(PropertyFlag::FetchSaved)
            || autogenerated
            || (cascaded && has(PropertyFlag::Unfetched));

        let savable_prerequisite = if cascaded && has(PropertyFlag::NoCascadeUpdateToCreate) {
            true
        } else if !(kind.is_independent() && saved) {
            false
        } else if collection {
            ctx.inverse
                .is_none_or(|inv| inv.cardinality != Cardinality::Collection)
        } else {
            true
        };

        Self {
            fetched,
            logical,
            cascaded,
            cascade_update_to_create,
            saved,
            creatable: saved && !has(PropertyFlag::UpdateOnly),
            updatable: saved && !has(PropertyFlag::CreateOnly),
            autogenerated,
            fetch_saved,
            savable_prerequisite,
            include_in_save_template: cascaded || has(PropertyFlag::IncludeInSaveTemplate),
            volatile: ctx.is_identifier || has(PropertyFlag::Volatile),
            nosync: has(PropertyFlag::Nosync),
        }
    }
}

// ============================================================================
// Property
// ============================================================================

/// Metadata for one attribute of one entity type.
#[derive(Debug, Clone)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) kind: PropertyKind,
    pub(crate) cardinality: Cardinality,
    pub(crate) target: Target,
    pub(crate) flags: BTreeSet<PropertyFlag>,
    pub(crate) inverse: Option<String>,
    pub(crate) default: Option<Value>,
    pub(crate) mandatory: bool,
    pub(crate) derived: bool,
    // Resolved by the registry builder
    pub(crate) target_type: Option<TypeId>,
    pub(crate) inverse_slot: Option<usize>,
    pub(crate) traits: PropertyTraits,
}

impl Property {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PropertyKind {
        self.kind
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn flags(&self) -> &BTreeSet<PropertyFlag> {
        &self.flags
    }

    pub fn has_flag(&self, flag: PropertyFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Name of the inverse property on the target type
    pub fn inverse(&self) -> Option<&str> {
        self.inverse.as_deref()
    }

    /// Slot of the inverse property on the target type
    pub fn inverse_slot(&self) -> Option<usize> {
        self.inverse_slot
    }

    /// Target entity type for reference properties
    pub fn target_type(&self) -> Option<TypeId> {
        self.target_type
    }

    /// Declared primitive type for non-domain properties
    pub fn value_type(&self) -> Option<ValueType> {
        match self.target {
            Target::Value(ty) => Some(ty),
            Target::Entity(_) => None,
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn traits(&self) -> &PropertyTraits {
        &self.traits
    }

    pub fn is_nondomain(&self) -> bool {
        self.kind == PropertyKind::NonDomain
    }

    pub fn is_reference(&self) -> bool {
        self.kind.is_domain()
    }

    pub fn is_dependent(&self) -> bool {
        self.kind == PropertyKind::Dependent
    }

    pub fn is_owner(&self) -> bool {
        self.kind == PropertyKind::Owner
    }

    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Collection
    }

    pub fn is_fetched(&self) -> bool {
        self.traits.fetched
    }

    pub fn is_logical(&self) -> bool {
        self.traits.logical
    }

    pub fn is_cascaded(&self) -> bool {
        self.traits.cascaded
    }

    pub fn cascade_update_to_create(&self) -> bool {
        self.traits.cascade_update_to_create
    }

    pub fn is_saved(&self) -> bool {
        self.traits.saved
    }

    pub fn is_creatable(&self) -> bool {
        self.traits.creatable
    }

    pub fn is_updatable(&self) -> bool {
        self.traits.updatable
    }

    pub fn is_autogenerated(&self) -> bool {
        self.traits.autogenerated
    }

    pub fn is_fetch_saved(&self) -> bool {
        self.traits.fetch_saved
    }

    pub fn is_savable_prerequisite(&self) -> bool {
        self.traits.savable_prerequisite
    }

    pub fn include_in_save_template(&self) -> bool {
        self.traits.include_in_save_template
    }

    pub fn is_volatile(&self) -> bool {
        self.traits.volatile
    }

    pub fn is_nosync(&self) -> bool {
        self.traits.nosync
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Declarative builder for a [`Property`].
#[derive(Debug, Clone)]
pub struct PropertyBuilder {
    pub(crate) name: String,
    pub(crate) kind: PropertyKind,
    pub(crate) cardinality: Cardinality,
    pub(crate) target: Target,
    pub(crate) flags: BTreeSet<PropertyFlag>,
    pub(crate) inverse: Option<String>,
    pub(crate) default: Option<Value>,
    pub(crate) mandatory: bool,
    pub(crate) derived: bool,
}

impl PropertyBuilder {
    fn new(name: &str, kind: PropertyKind, cardinality: Cardinality, target: Target) -> Self {
        Self {
            name: name.to_string(),
            kind,
            cardinality,
            target,
            flags: BTreeSet::new(),
            inverse: None,
            default: None,
            mandatory: false,
            derived: false,
        }
    }

    /// A non-domain value attribute
    pub fn attribute(name: &str, ty: ValueType) -> Self {
        Self::new(name, PropertyKind::NonDomain, Cardinality::Scalar, Target::Value(ty))
    }

    /// A scalar dependent reference
    pub fn dependent(name: &str, target: &str) -> Self {
        Self::new(
            name,
            PropertyKind::Dependent,
            Cardinality::Scalar,
            Target::Entity(target.to_string()),
        )
    }

    /// A dependent collection
    pub fn dependents(name: &str, target: &str) -> Self {
        Self::new(
            name,
            PropertyKind::Dependent,
            Cardinality::Collection,
            Target::Entity(target.to_string()),
        )
    }

    /// A scalar independent reference
    pub fn independent(name: &str, target: &str) -> Self {
        Self::new(
            name,
            PropertyKind::Independent,
            Cardinality::Scalar,
            Target::Entity(target.to_string()),
        )
    }

    /// An independent collection
    pub fn independents(name: &str, target: &str) -> Self {
        Self::new(
            name,
            PropertyKind::Independent,
            Cardinality::Collection,
            Target::Entity(target.to_string()),
        )
    }

    /// A back-reference to the owner; requires an inverse
    pub fn owner(name: &str, target: &str, inverse: &str) -> Self {
        Self::new(
            name,
            PropertyKind::Owner,
            Cardinality::Scalar,
            Target::Entity(target.to_string()),
        )
        .inverse(inverse)
    }

    pub(crate) fn from_parts(
        name: &str,
        kind: PropertyKind,
        cardinality: Cardinality,
        target: Target,
    ) -> Self {
        Self::new(name, kind, cardinality, target)
    }

    pub fn inverse(mut self, name: &str) -> Self {
        self.inverse = Some(name.to_string());
        self
    }

    pub fn flag(mut self, flag: PropertyFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn flags(mut self, flags: impl IntoIterator<Item = PropertyFlag>) -> Self {
        self.flags.extend(flags);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Mark as derived from other attributes (never fetched on its own)
    pub fn derived(mut self) -> Self {
        self.derived = true;
        self
    }

    pub(crate) fn into_property(self) -> Property {
        Property {
            name: self.name,
            kind: self.kind,
            cardinality: self.cardinality,
            target: self.target,
            flags: self.flags,
            inverse: self.inverse,
            default: self.default,
            mandatory: self.mandatory,
            derived: self.derived,
            target_type: None,
            inverse_slot: None,
            traits: PropertyTraits::default(),
        }
    }
}
