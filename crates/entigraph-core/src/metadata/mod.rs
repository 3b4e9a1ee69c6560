//! Entity metadata: the registry of types, properties and derived traits.
//!
//! The registry is the explicit metadata table consumed by the graph,
//! visitors, resolver and loader. Build it once with [`RegistryBuilder`]
//! (or from a [`SchemaDocument`](crate::schema::SchemaDocument)) and share it
//! behind an `Arc`.

mod error;
mod property;
mod registry;

pub use error::MetadataError;
pub use property::{
    Cardinality, DeriveContext, Property, PropertyBuilder, PropertyFlag, PropertyKind,
    PropertyTraits, Target, CONFLICTING_FLAGS,
};
pub use registry::{EntityType, MetadataRegistry, RegistryBuilder, TypeBuilder, TypeId};
