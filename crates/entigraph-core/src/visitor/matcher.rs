//! Lock-step matching of two entity graphs by identity key.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::ReferenceVisitor;
use crate::graph::{EntityGraph, EntityId};
use crate::metadata::EntityType;

/// Result of matching a source graph against a target graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Source node to its matching target node
    pub mapping: HashMap<EntityId, EntityId>,
    /// Matched pairs in visit order
    pub pairs: Vec<(EntityId, EntityId)>,
    /// Reachable source nodes without a match
    pub unmatched_source: Vec<EntityId>,
    /// Reachable target nodes no source node matched
    pub unmatched_target: Vec<EntityId>,
    /// Source nodes with more than one plausible target in a collection
    pub ambiguous: Vec<(EntityId, Vec<EntityId>)>,
}

impl MatchOutcome {
    pub fn target_of(&self, source: EntityId) -> Option<EntityId> {
        self.mapping.get(&source).copied()
    }

    /// Whether `target` was claimed by some source node
    pub fn is_matched_target(&self, target: EntityId) -> bool {
        self.pairs.iter().any(|(_, t)| *t == target)
    }
}

/// Walks a source and a target graph together and pairs nodes.
///
/// The roots are always paired. Below them, a scalar slot pairs its
/// referents unless their identity keys disagree, and a collection entry
/// pairs with the single target entry whose identity key is equal. A
/// collection entry with several candidates stays unmatched and is reported
/// as ambiguous. The mapping is injective.
pub struct MatchVisitor<S> {
    selector: S,
    debug: bool,
}

impl<S> MatchVisitor<S>
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

    pub fn matches(&self, graph: &EntityGraph, source: EntityId, target: EntityId) -> MatchOutcome {
        self.match_with(graph, source, target, |_, _, _| ()).0
    }

    /// Match, invoking `callback` for every matched pair in visit order.
    pub fn match_with<T, F>(
        &self,
        graph: &EntityGraph,
        source: EntityId,
        target: EntityId,
        mut callback: F,
    ) -> (MatchOutcome, Vec<T>)
    where
        F: FnMut(&EntityGraph, EntityId, EntityId) -> T,
    {
        let mut outcome = MatchOutcome::default();
        let mut claimed: HashSet<EntityId> = HashSet::new();
        let mut results = Vec::new();
        let mut stack = vec![(source, target)];

        while let Some((s, t)) = stack.pop() {
            if outcome.mapping.contains_key(&s) || claimed.contains(&t) {
                continue;
            }
            outcome.mapping.insert(s, t);
            outcome.pairs.push((s, t));
            claimed.insert(t);
            if self.debug {
                debug!(source = %graph.describe(s), target = %graph.describe(t), "Matched");
            }
            results.push(callback(graph, s, t));

            if graph.type_id_of(s) != graph.type_id_of(t) {
                continue;
            }

            let mut children = Vec::new();
            for slot in (self.selector)(graph.entity_type(s)) {
                let property = graph.entity_type(s).property_at(slot);
                let sources = graph.references_at(s, slot);
                let targets = graph.references_at(t, slot);

                if !property.is_collection() {
                    if let (Some(&sc), Some(&tc)) = (sources.first(), targets.first()) {
                        if sc == tc || graph.identity_match(sc, tc) != Some(false) {
                            children.push((sc, tc));
                        }
                    }
                    continue;
                }

                let mut taken: HashSet<EntityId> = HashSet::new();
                for &sc in sources {
                    if outcome.mapping.contains_key(&sc) {
                        continue;
                    }
                    let candidates: Vec<EntityId> = targets
                        .iter()
                        .copied()
                        .filter(|tc| !claimed.contains(tc) && !taken.contains(tc))
                        .filter(|&tc| sc == tc || graph.identity_match(sc, tc) == Some(true))
                        .collect();
                    match candidates.as_slice() {
                        [] => {}
                        [only] => {
                            taken.insert(*only);
                            children.push((sc, *only));
                        }
                        _ => {
                            if self.debug {
                                debug!(
                                    source = %graph.describe(sc),
                                    candidates = candidates.len(),
                                    "Ambiguous match"
                                );
                            }
                            outcome.ambiguous.push((sc, candidates));
                        }
                    }
                }
            }

            // reversed so that pairs are processed in slot order
            stack.extend(children.into_iter().rev());
        }

        let reach = ReferenceVisitor::new(&self.selector);
        outcome.unmatched_source = reach
            .visit(graph, source)
            .order
            .into_iter()
            .filter(|id| !outcome.mapping.contains_key(id))
            .collect();
        outcome.unmatched_target = reach
            .visit(graph, target)
            .order
            .into_iter()
            .filter(|id| !claimed.contains(id))
            .collect();

        (outcome, results)
    }
}
