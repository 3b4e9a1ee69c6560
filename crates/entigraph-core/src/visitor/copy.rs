//! Structural copy of an entity and its dependents.

use std::collections::HashMap;

use tracing::debug;

use super::{selectors, ReferenceVisitor};
use crate::graph::{EntityGraph, EntityId};

/// Result of a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Copy of the root entity
    pub root: EntityId,
    /// Source entity to its copy
    pub mapping: HashMap<EntityId, EntityId>,
}

/// Deep-copies an entity along its dependent references.
///
/// Value attributes are duplicated, dependents are copied recursively, and
/// independent and owner references are left empty in the copy except for
/// owner back-references of copied dependents, which point at the copied
/// owner.
#[derive(Debug, Clone, Default)]
pub struct CopyVisitor {
    debug: bool,
}

impl CopyVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn copy(&self, graph: &mut EntityGraph, root: EntityId) -> CopyOutcome {
        self.copy_with(graph, root, |_, _, _| ()).0
    }

    /// Copy, then invoke `callback` for each (source, copy) pair in visit order.
    pub fn copy_with<T, F>(
        &self,
        graph: &mut EntityGraph,
        root: EntityId,
        mut callback: F,
    ) -> (CopyOutcome, Vec<T>)
    where
        F: FnMut(&EntityGraph, EntityId, EntityId) -> T,
    {
        let order = ReferenceVisitor::new(selectors::dependents)
            .debug(self.debug)
            .visit(graph, root)
            .order;

        let mut mapping = HashMap::with_capacity(order.len());
        for &source in &order {
            let copy = graph.create_of(graph.type_id_of(source));
            mapping.insert(source, copy);
        }

        let registry = graph.shared_registry();
        for &source in &order {
            let copy = mapping[&source];
            let ty = registry.get(graph.type_id_of(source));
            for slot in ty.value_slots() {
                let value = graph.value_at(source, slot).clone();
                graph.set_value_at(copy, slot, value);
            }
            for slot in selectors::dependents(ty) {
                let targets = graph.references_at(source, slot).to_vec();
                for target in targets {
                    if let Some(&target_copy) = mapping.get(&target) {
                        graph.connect(copy, slot, target_copy);
                    }
                }
            }
        }

        if self.debug {
            debug!(
                root = %graph.describe(root),
                copied = mapping.len(),
                "Copied entity graph"
            );
        }

        let results = order
            .iter()
            .map(|source| callback(graph, *source, mapping[source]))
            .collect();

        (
            CopyOutcome {
                root: mapping[&root],
                mapping,
            },
            results,
        )
    }
}
