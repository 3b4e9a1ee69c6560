//! Entigraph Core - Object-graph dependency resolution for persistence clients
//!
//! This crate provides the engine a persistence client runs on top of:
//! - Property metadata classifying each attribute (owner/dependent, cascaded,
//!   fetched, saved) with all derived predicates computed once
//! - An arena-backed entity graph with atomic inverse maintenance
//! - Cycle-safe reference visitors for copy, match and merge
//! - An identity cache keeping one canonical entity per identity key
//! - A save-order resolver and executor over a pluggable transport
//! - Lazy loading of unfetched references

// Implemented modules
pub mod cache;
pub mod graph;
pub mod loader;
pub mod metadata;
pub mod resolver;
pub mod schema;
pub mod session;
pub mod transport;
pub mod value;
pub mod visitor;

// Re-exports for convenience
pub use graph::{Entity, EntityGraph, EntityId, GraphError, IdentityKey, Slot};
pub use metadata::{
    Cardinality, EntityType, MetadataError, MetadataRegistry, Property, PropertyBuilder,
    PropertyFlag, PropertyKind, PropertyTraits, RegistryBuilder, Target, TypeBuilder, TypeId,
};
pub use value::{Value, ValueType};

// Visitor re-exports
pub use visitor::{
    selectors, CopyOutcome, CopyVisitor, MatchOutcome, MatchVisitor, MergeOutcome, MergeVisitor,
    ReferenceVisitor, Traversal,
};

// Cache re-exports
pub use cache::{CacheMetrics, IdentityCache};

// Save re-exports
pub use resolver::{
    save_template, NodeState, Persister, SaveError, SaveOperation, SaveOrderResolver, SavePhase,
    SavePlan, SaveReport, SaveStep,
};
pub use transport::{
    Fetched, MemoryTransport, SaveTemplate, TemplateAttribute, Transport, TransportCall,
    TransportError,
};

// Loader re-exports
pub use loader::{LazyLoader, LoadError, LoadMetrics, SuspendGuard};

// Document and session re-exports
pub use schema::{GraphDocument, LoadedGraph, SchemaDocument, SchemaError};
pub use session::Session;
