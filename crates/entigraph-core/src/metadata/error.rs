//! Metadata configuration errors.
//!
//! All of these are detected while building a registry and are fatal.

use thiserror::Error;

/// Errors raised by [`RegistryBuilder::build`](super::RegistryBuilder::build).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// Two entity types share a name
    #[error("entity type '{name}' is declared more than once")]
    DuplicateType { name: String },

    /// Two properties of one type share a name
    #[error("{entity}.{property}: property is declared more than once")]
    DuplicateProperty { entity: String, property: String },

    /// Reference to an undeclared entity type
    #[error("{entity}.{property}: unknown target type '{target}'")]
    UnknownTargetType {
        entity: String,
        property: String,
        target: String,
    },

    /// Flag not valid for the property's kind
    #[error("{entity}.{property}: flag '{flag}' is not supported on {kind} properties")]
    UnsupportedFlag {
        entity: String,
        property: String,
        flag: &'static str,
        kind: &'static str,
    },

    /// Two contradicting flags declared together
    #[error("{entity}.{property}: flags '{first}' and '{second}' conflict")]
    ConflictingFlags {
        entity: String,
        property: String,
        first: &'static str,
        second: &'static str,
    },

    /// Declared inverse does not exist on the target type
    #[error("{entity}.{property}: inverse '{inverse}' is not declared on {target}")]
    MissingInverse {
        entity: String,
        property: String,
        target: String,
        inverse: String,
    },

    /// Declared inverse does not point back
    #[error("{entity}.{property}: inverse {target}.{inverse} points back to {found:?}")]
    AsymmetricInverse {
        entity: String,
        property: String,
        target: String,
        inverse: String,
        found: Option<String>,
    },

    /// Owner back-reference without an inverse
    #[error("{entity}.{property}: owner reference requires an inverse")]
    MissingOwnerInverse { entity: String, property: String },

    /// Default value of the wrong primitive type
    #[error("{entity}.{property}: default value is not a {expected}")]
    DefaultTypeMismatch {
        entity: String,
        property: String,
        expected: &'static str,
    },

    /// Identifier or secondary key attribute is unusable
    #[error("{entity}: invalid key attribute '{attribute}': {reason}")]
    InvalidKey {
        entity: String,
        attribute: String,
        reason: String,
    },

    /// Structurally invalid property declaration
    #[error("{entity}.{property}: {reason}")]
    InvalidDeclaration {
        entity: String,
        property: String,
        reason: String,
    },
}

impl MetadataError {
    /// Create an UnsupportedFlag error.
    pub fn unsupported_flag(
        entity: impl Into<String>,
        property: impl Into<String>,
        flag: &'static str,
        kind: &'static str,
    ) -> Self {
        Self::UnsupportedFlag {
            entity: entity.into(),
            property: property.into(),
            flag,
            kind,
        }
    }

    /// Create an InvalidKey error.
    pub fn invalid_key(
        entity: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidKey {
            entity: entity.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidDeclaration error.
    pub fn invalid_declaration(
        entity: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidDeclaration {
            entity: entity.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }
}
