//! Identity cache: canonical entity per identity key.
//!
//! Entities are indexed under every identity key they expose (the
//! server-assigned identifier and each complete secondary key), so an entity
//! cached by business key stays findable once it has been assigned an
//! identifier. Non-sticky entries live in an LRU (unbounded unless a capacity
//! is configured); entries of sticky types live in a separate map and
//! survive [`IdentityCache::clear`].
//!
//! The cache is owned by one session and assumes a single writer.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;

use entigraph_config::CacheConfig;
use lru::LruCache;
use tracing::{debug, trace, warn};

use crate::graph::{EntityGraph, EntityId, IdentityKey};
use crate::metadata::{MetadataRegistry, TypeId};

/// Cache hit/miss statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Lookups that found a canonical entity
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Keys inserted
    pub insertions: u64,
    /// Keys evicted by the LRU capacity
    pub evictions: u64,
}

impl CacheMetrics {
    /// Get hit rate as a fraction (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }
}

/// Maps identity keys to canonical entities.
pub struct IdentityCache {
    entries: LruCache<IdentityKey, EntityId>,
    sticky: HashMap<IdentityKey, EntityId>,
    sticky_types: HashSet<TypeId>,
    metrics: CacheMetrics,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityCache {
    /// Create an unbounded cache
    pub fn new() -> Self {
        Self {
            entries: LruCache::unbounded(),
            sticky: HashMap::new(),
            sticky_types: HashSet::new(),
            metrics: CacheMetrics::default(),
        }
    }

    /// Create a cache holding at most `capacity` non-sticky keys
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            ..Self::new()
        }
    }

    /// Create a cache from configuration, resolving sticky type names.
    ///
    /// Unknown sticky type names are ignored with a warning.
    pub fn from_config(config: &CacheConfig, registry: &MetadataRegistry) -> Self {
        let mut cache = match config.capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => Self::with_capacity(capacity),
            None => Self::new(),
        };
        for name in &config.sticky_types {
            match registry.type_id(name) {
                Some(ty) => cache.mark_sticky(ty),
                None => warn!(ty = %name, "Ignoring unknown sticky type"),
            }
        }
        cache
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.entries.len() + self.sticky.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = CacheMetrics::default();
    }

    pub fn is_sticky(&self, ty: TypeId) -> bool {
        self.sticky_types.contains(&ty)
    }

    /// Canonical entity sharing any identity key with `id`.
    pub fn lookup(&mut self, graph: &EntityGraph, id: EntityId) -> Option<EntityId> {
        let found = graph
            .identity_keys(id)
            .iter()
            .find_map(|key| self.get(key));
        match found {
            Some(_) => self.metrics.record_hit(),
            None => self.metrics.record_miss(),
        }
        found
    }

    /// Return the canonical entity for `id`'s identity, caching `id` if none.
    ///
    /// Keys are tried identifier first. When a canonical entity exists it is
    /// returned, and every key of `id` is pointed at it, including keys
    /// that were indexed under a different entity. An entity exposing no
    /// identity key is returned unchanged and not cached.
    pub fn add(&mut self, graph: &EntityGraph, id: EntityId) -> EntityId {
        let keys = graph.identity_keys(id);
        if keys.is_empty() {
            trace!(entity = %graph.describe(id), "Not caching entity without identity key");
            return id;
        }

        let canonical = match keys.iter().find_map(|key| self.get(key)) {
            Some(existing) => {
                self.metrics.record_hit();
                existing
            }
            None => {
                self.metrics.record_miss();
                id
            }
        };

        for key in keys {
            match self.peek(&key) {
                Some(current) if current == canonical => {}
                Some(current) => {
                    debug!(
                        key_level = key.level,
                        stale = %graph.describe(current),
                        canonical = %graph.describe(canonical),
                        "Repointing identity key"
                    );
                    self.insert(key, canonical);
                }
                None => self.insert(key, canonical),
            }
        }
        canonical
    }

    /// Replace each entity by its cached canonical entity, if any.
    pub fn canonicalize(&mut self, graph: &EntityGraph, ids: &[EntityId]) -> Vec<EntityId> {
        ids.iter()
            .map(|&id| self.lookup(graph, id).unwrap_or(id))
            .collect()
    }

    /// Make `id` the canonical entity for every key it exposes.
    pub fn force_add(&mut self, graph: &EntityGraph, id: EntityId) -> EntityId {
        let keys = graph.identity_keys(id);
        debug!(entity = %graph.describe(id), keys = keys.len(), "Force-caching entity");
        for key in keys {
            self.insert(key, id);
        }
        id
    }

    /// Evict every non-sticky entry.
    pub fn clear(&mut self) {
        let evicted = self.entries.len();
        self.entries.clear();
        debug!(evicted, kept = self.sticky.len(), "Cleared identity cache");
    }

    /// Keep entries of `ty` across [`clear`](Self::clear). Idempotent.
    pub fn mark_sticky(&mut self, ty: TypeId) {
        if !self.sticky_types.insert(ty) {
            return;
        }
        let moving: Vec<IdentityKey> = self
            .entries
            .iter()
            .filter(|(key, _)| key.ty == ty)
            .map(|(key, _)| key.clone())
            .collect();
        for key in moving {
            if let Some(id) = self.entries.pop(&key) {
                self.sticky.insert(key, id);
            }
        }
    }

    fn get(&mut self, key: &IdentityKey) -> Option<EntityId> {
        if let Some(id) = self.sticky.get(key) {
            return Some(*id);
        }
        self.entries.get(key).copied()
    }

    fn peek(&self, key: &IdentityKey) -> Option<EntityId> {
        self.sticky
            .get(key)
            .or_else(|| self.entries.peek(key))
            .copied()
    }

    fn insert(&mut self, key: IdentityKey, id: EntityId) {
        self.metrics.insertions += 1;
        if self.sticky_types.contains(&key.ty) {
            self.sticky.insert(key, id);
            return;
        }
        if let Some((evicted, _)) = self.entries.push(key.clone(), id) {
            if evicted != key {
                self.metrics.evictions += 1;
            }
        }
    }
}
