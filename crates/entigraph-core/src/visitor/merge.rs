//! Merging a target graph into a source graph.

use std::collections::HashSet;

use tracing::debug;

use super::{selectors, MatchOutcome, MatchVisitor};
use crate::graph::{EntityGraph, EntityId};
use crate::metadata::EntityType;

/// Result of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Pairing of source and target nodes
    pub matched: MatchOutcome,
    /// Number of value attributes changed in the source
    pub updated: usize,
    /// Target nodes added to source reference slots
    pub adopted: Vec<EntityId>,
    /// Scalar slots where the source kept its own, different referent
    pub conflicts: Vec<(EntityId, String)>,
}

impl MergeOutcome {
    /// Source nodes that had several plausible targets
    pub fn ambiguous(&self) -> &[(EntityId, Vec<EntityId>)] {
        &self.matched.ambiguous
    }

    /// Whether the merge changed nothing in the source
    pub fn is_noop(&self) -> bool {
        self.updated == 0 && self.adopted.is_empty()
    }

    fn absorb(&mut self, other: MergeOutcome) {
        self.updated += other.updated;
        self.adopted.extend(other.adopted);
        self.conflicts.extend(other.conflicts);
        self.matched.pairs.extend(other.matched.pairs);
        self.matched.mapping.extend(other.matched.mapping);
        self.matched.ambiguous.extend(other.matched.ambiguous);
    }
}

/// Copies state from a matched target graph into a source graph.
///
/// For each matched pair a target value overwrites the source value when
/// the source is unset, or when the attribute is volatile or refreshed after
/// save. `nosync` attributes are never copied. Target referents that no
/// source node matched are added to the source, so source entries are never
/// dropped; a scalar slot already holding a different referent keeps it.
pub struct MergeVisitor<S> {
    selector: S,
    debug: bool,
}

impl<S> MergeVisitor<S>
where
    S: Fn(&EntityType) -> Vec<usize>,
{
    pub fn new(selector: S) -> Self {
        Self {
            selector,
            debug: false,
        }
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    pub fn merge(&self, graph: &mut EntityGraph, source: EntityId, target: EntityId) -> MergeOutcome {
        self.merge_with(graph, source, target, |_, _, _| ()).0
    }

    /// Merge, invoking `callback` after each matched pair is merged.
    pub fn merge_with<T, F>(
        &self,
        graph: &mut EntityGraph,
        source: EntityId,
        target: EntityId,
        mut callback: F,
    ) -> (MergeOutcome, Vec<T>)
    where
        F: FnMut(&EntityGraph, EntityId, EntityId) -> T,
    {
        let matched = MatchVisitor::new(&self.selector)
            .debug(self.debug)
            .matches(graph, source, target);
        let claimed: HashSet<EntityId> = matched.pairs.iter().map(|(_, t)| *t).collect();

        let mut outcome = MergeOutcome::default();
        let mut results = Vec::with_capacity(matched.pairs.len());

        for &(s, t) in &matched.pairs {
            if s != t {
                outcome.updated += merge_values(graph, s, t);
                if graph.type_id_of(s) == graph.type_id_of(t) {
                    self.adopt_references(graph, s, t, &claimed, &mut outcome);
                }
            }
            results.push(callback(graph, s, t));
        }

        if self.debug {
            debug!(
                source = %graph.describe(source),
                updated = outcome.updated,
                adopted = outcome.adopted.len(),
                ambiguous = matched.ambiguous.len(),
                "Merged"
            );
        }

        outcome.matched = matched;
        (outcome, results)
    }

    fn adopt_references(
        &self,
        graph: &mut EntityGraph,
        source: EntityId,
        target: EntityId,
        claimed: &HashSet<EntityId>,
        outcome: &mut MergeOutcome,
    ) {
        let registry = graph.shared_registry();
        let ty = registry.get(graph.type_id_of(source));
        for slot in (self.selector)(ty) {
            let property = ty.property_at(slot);
            let incoming = graph.references_at(target, slot).to_vec();
            for referent in incoming {
                if claimed.contains(&referent) || graph.references_at(source, slot).contains(&referent) {
                    continue;
                }
                if property.is_collection() || graph.references_at(source, slot).is_empty() {
                    graph.connect(source, slot, referent);
                    outcome.adopted.push(referent);
                } else {
                    outcome.conflicts.push((source, property.name().to_string()));
                }
            }
        }
    }
}

/// Copy eligible value attributes from `target` into `source`.
fn merge_values(graph: &mut EntityGraph, source: EntityId, target: EntityId) -> usize {
    if graph.type_id_of(source) != graph.type_id_of(target) {
        return 0;
    }
    let registry = graph.shared_registry();
    let ty = registry.get(graph.type_id_of(source));
    let mut updated = 0;
    for slot in ty.value_slots() {
        let property = ty.property_at(slot);
        if property.is_nosync() {
            continue;
        }
        let incoming = graph.value_at(target, slot);
        let current = graph.value_at(source, slot);
        if incoming.is_null() || incoming == current {
            continue;
        }
        if current.is_null() || property.is_volatile() || property.is_fetch_saved() {
            let incoming = incoming.clone();
            graph.set_value_at(source, slot, incoming);
            updated += 1;
        }
    }
    updated
}

/// Merge freshly fetched entities into a reference slot of `owner`.
///
/// An entity already in the slot is skipped. One matching the identity of
/// exactly one present referent is merged into it; anything else is added.
/// A scalar slot holding a different referent keeps it.
pub fn merge_into_slot(
    graph: &mut EntityGraph,
    owner: EntityId,
    slot: usize,
    fetched: &[EntityId],
) -> MergeOutcome {
    let (collection, name) = {
        let property = graph.entity_type(owner).property_at(slot);
        (property.is_collection(), property.name().to_string())
    };
    let merger = MergeVisitor::new(selectors::dependents);
    let mut outcome = MergeOutcome::default();

    for &item in fetched {
        let current = graph.references_at(owner, slot).to_vec();
        if current.contains(&item) {
            continue;
        }
        let existing: Vec<EntityId> = current
            .iter()
            .copied()
            .filter(|&c| graph.identity_match(c, item) == Some(true))
            .collect();

        match existing.as_slice() {
            [present] => {
                let merged = merger.merge(graph, *present, item);
                outcome.absorb(merged);
            }
            _ if !collection && !current.is_empty() => {
                outcome.conflicts.push((owner, name.clone()));
            }
            _ => {
                graph.connect(owner, slot, item);
                outcome.adopted.push(item);
            }
        }
    }
    outcome
}
