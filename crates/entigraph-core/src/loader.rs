//! Lazy reference loading.
//!
//! [`LazyLoader::attach`] marks every reference slot that is not fetched
//! with its owner as unresolved. The first [`LazyLoader::resolve`] of such a
//! slot fetches it through the transport, canonicalizes the result through
//! the identity cache and merges it into whatever the slot already holds.
//! A failed fetch leaves the slot unresolved so a later read retries.
//!
//! Loading can be suspended for a scope (e.g. while serializing a graph).
//! Suspension nests: loading resumes when the outermost guard is dropped.

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::cache::IdentityCache;
use crate::graph::{EntityGraph, EntityId, GraphError};
use crate::transport::{Fetched, Transport, TransportError};
use crate::visitor::merge_into_slot;

/// Errors that can occur during lazy loading
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("failed to fetch {entity}.{attribute}: {source}")]
    Fetch {
        entity: String,
        attribute: String,
        #[source]
        source: TransportError,
    },

    #[error("{entity}.{attribute}: backend returned a value for a reference")]
    UnexpectedValue { entity: String, attribute: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Lazy loading statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadMetrics {
    /// Successful fetches
    pub fetches: u64,
    /// Reads of unresolved slots while loading was suspended or disabled
    pub skipped: u64,
    /// Failed fetches
    pub failures: u64,
}

/// Resolves unfetched references on first read.
#[derive(Debug)]
pub struct LazyLoader {
    enabled: bool,
    suspend_depth: Arc<AtomicU32>,
    metrics: Cell<LoadMetrics>,
}

impl Default for LazyLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps loading suspended until dropped, including during unwinding.
///
/// The guard does not borrow the loader, so the loader's owner stays
/// mutably usable while loading is suspended.
#[must_use = "loading resumes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SuspendGuard {
    depth: Arc<AtomicU32>,
}

impl Drop for SuspendGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LazyLoader {
    pub fn new() -> Self {
        Self {
            enabled: true,
            suspend_depth: Arc::new(AtomicU32::new(0)),
            metrics: Cell::new(LoadMetrics::default()),
        }
    }

    /// Create a loader that starts disabled
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether a read of an unresolved slot would fetch now
    pub fn is_active(&self) -> bool {
        self.enabled && self.suspend_depth.load(Ordering::SeqCst) == 0
    }

    pub fn metrics(&self) -> LoadMetrics {
        self.metrics.get()
    }

    /// Suspend loading until the returned guard is dropped.
    pub fn suspend(&self) -> SuspendGuard {
        self.suspend_depth.fetch_add(1, Ordering::SeqCst);
        SuspendGuard {
            depth: Arc::clone(&self.suspend_depth),
        }
    }

    /// Run `f` with loading suspended.
    pub fn with_suspended<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.suspend();
        f()
    }

    /// Mark the entity's unfetched reference slots as unresolved.
    ///
    /// Returns the number of slots marked.
    pub fn attach(&self, graph: &mut EntityGraph, id: EntityId) -> usize {
        let slots = graph
            .entity_type(id)
            .slots_where(|p| p.is_reference() && !p.is_fetched());
        for &slot in &slots {
            graph.set_resolved(id, slot, false);
        }
        if !slots.is_empty() {
            trace!(entity = %graph.describe(id), slots = slots.len(), "Attached lazy loader");
        }
        slots.len()
    }

    /// Attach to every entity in the graph.
    pub fn attach_all(&self, graph: &mut EntityGraph) -> usize {
        let ids: Vec<EntityId> = graph.ids().collect();
        ids.into_iter().map(|id| self.attach(graph, id)).sum()
    }

    /// Read a reference, fetching it first if it is unresolved and loading
    /// is active.
    ///
    /// Returns the slot's referents after any merge.
    pub fn resolve<T: Transport + ?Sized>(
        &self,
        graph: &mut EntityGraph,
        cache: &mut IdentityCache,
        transport: &mut T,
        id: EntityId,
        attribute: &str,
    ) -> Result<Vec<EntityId>, LoadError> {
        let (slot, property) = graph.property(id, attribute)?;
        if !property.is_reference() {
            return Err(GraphError::wrong_kind(graph.describe(id), attribute, "reference").into());
        }
        if graph.is_resolved_at(id, slot) {
            return Ok(graph.references_at(id, slot).to_vec());
        }
        if !self.is_active() {
            self.update_metrics(|m| m.skipped += 1);
            trace!(entity = %graph.describe(id), attribute, "Lazy loading suspended");
            return Ok(graph.references_at(id, slot).to_vec());
        }

        let fetched = match transport.fetch(graph, id, attribute) {
            Ok(fetched) => fetched,
            Err(source) => {
                self.update_metrics(|m| m.failures += 1);
                warn!(entity = %graph.describe(id), attribute, error = %source, "Lazy fetch failed");
                return Err(LoadError::Fetch {
                    entity: graph.describe(id),
                    attribute: attribute.to_string(),
                    source,
                });
            }
        };

        let entities = match fetched {
            Fetched::Entities(entities) => entities,
            Fetched::Value(_) => {
                return Err(LoadError::UnexpectedValue {
                    entity: graph.describe(id),
                    attribute: attribute.to_string(),
                })
            }
        };

        let entities = cache.canonicalize(graph, &entities);
        let merged = merge_into_slot(graph, id, slot, &entities);
        for &adopted in &merged.adopted {
            cache.add(graph, adopted);
            self.attach(graph, adopted);
        }
        graph.set_resolved(id, slot, true);
        self.update_metrics(|m| m.fetches += 1);

        debug!(
            entity = %graph.describe(id),
            attribute,
            fetched = entities.len(),
            adopted = merged.adopted.len(),
            "Resolved lazy reference"
        );
        Ok(graph.references_at(id, slot).to_vec())
    }

    fn update_metrics(&self, f: impl FnOnce(&mut LoadMetrics)) {
        let mut metrics = self.metrics.get();
        f(&mut metrics);
        self.metrics.set(metrics);
    }
}
