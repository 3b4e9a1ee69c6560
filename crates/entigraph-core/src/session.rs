//! Session facade.
//!
//! A [`Session`] owns one object graph together with its identity cache,
//! lazy loader, transport and configuration, and wires them the way a
//! client uses them: save a root, read lazily loaded references, suspend
//! loading for a scope.

use std::sync::Arc;

use entigraph_config::EngineConfig;
use tracing::debug;

use crate::cache::IdentityCache;
use crate::graph::{EntityGraph, EntityId};
use crate::loader::{LazyLoader, LoadError};
use crate::metadata::MetadataRegistry;
use crate::resolver::{Persister, SaveError, SaveOrderResolver, SavePlan, SaveReport};
use crate::transport::Transport;

/// One client's view of an object graph and its backend.
pub struct Session<T: Transport> {
    graph: EntityGraph,
    cache: IdentityCache,
    loader: LazyLoader,
    transport: T,
    config: EngineConfig,
}

impl<T: Transport> Session<T> {
    /// Create a session with default configuration
    pub fn new(registry: Arc<MetadataRegistry>, transport: T) -> Self {
        Self::from_config(EntityGraph::new(registry), transport, EngineConfig::default())
    }

    /// Create a session over an existing graph.
    ///
    /// The cache capacity and sticky types, the loader toggle and the save
    /// options are taken from `config`.
    pub fn from_config(graph: EntityGraph, transport: T, config: EngineConfig) -> Self {
        let cache = IdentityCache::from_config(&config.cache, graph.registry());
        let mut loader = LazyLoader::new();
        loader.set_enabled(config.loader.enabled);
        debug!(
            entities = graph.len(),
            debug = config.debug,
            loader = config.loader.enabled,
            "Opened session"
        );
        Self {
            graph,
            cache,
            loader,
            transport,
            config,
        }
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut EntityGraph {
        &mut self.graph
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut IdentityCache {
        &mut self.cache
    }

    pub fn loader(&self) -> &LazyLoader {
        &self.loader
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register an entity received from the backend.
    ///
    /// Returns the canonical entity for its identity and marks the
    /// canonical entity's unfetched references as unresolved.
    pub fn register(&mut self, id: EntityId) -> EntityId {
        let canonical = self.cache.add(&self.graph, id);
        if canonical == id {
            self.loader.attach(&mut self.graph, id);
        }
        canonical
    }

    /// Cached canonical entity sharing an identity key with `id`
    pub fn lookup(&mut self, id: EntityId) -> Option<EntityId> {
        self.cache.lookup(&self.graph, id)
    }

    /// Compute the save plan for `root` without saving.
    pub fn plan(&self, root: EntityId) -> Result<SavePlan, SaveError> {
        SaveOrderResolver::new()
            .validate(self.config.save.validate)
            .debug(self.config.debug)
            .plan(&self.graph, root)
    }

    /// Save `root` and everything it cascades to.
    pub fn save(&mut self, root: EntityId) -> Result<SaveReport, SaveError> {
        if self.config.save.apply_defaults {
            let applied = self.graph.apply_defaults(root);
            if applied > 0 {
                debug!(entity = %self.graph.describe(root), applied, "Applied defaults");
            }
        }
        let plan = self.plan(root)?;
        self.save_from(&plan, 0)
    }

    /// Execute `plan` starting at step `offset`.
    ///
    /// After a [`SaveError::Transport`], pass `completed().len()` to resume.
    pub fn save_from(&mut self, plan: &SavePlan, offset: usize) -> Result<SaveReport, SaveError> {
        Persister::new().debug(self.config.debug).execute(
            &mut self.graph,
            &mut self.cache,
            &mut self.transport,
            plan,
            offset,
        )
    }

    /// Read a reference, loading it on first access.
    pub fn resolve(&mut self, id: EntityId, attribute: &str) -> Result<Vec<EntityId>, LoadError> {
        self.loader.resolve(
            &mut self.graph,
            &mut self.cache,
            &mut self.transport,
            id,
            attribute,
        )
    }

    /// Run `f` with lazy loading suspended.
    ///
    /// Reads of unresolved references inside `f` return what the slot holds.
    pub fn suspend_loading<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let _guard = self.loader.suspend();
        f(self)
    }
}
