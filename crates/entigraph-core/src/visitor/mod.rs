//! Reference graph traversal.
//!
//! [`ReferenceVisitor`] walks an entity graph depth-first along the reference
//! slots chosen by a selector, applying an action to each node once. The
//! walk is iterative and keeps an explicit stack, so a revisit of a node on
//! the active stack is recorded as a cycle and a revisit of a finished node
//! is a plain reconvergence.
//!
//! The copy, match and merge visitors are built on the same selector model.

mod copy;
mod matcher;
mod merge;

use std::collections::HashMap;

use tracing::debug;

use crate::graph::{EntityGraph, EntityId};
use crate::metadata::EntityType;

pub use copy::{CopyOutcome, CopyVisitor};
pub use matcher::{MatchOutcome, MatchVisitor};
pub use merge::{merge_into_slot, MergeOutcome, MergeVisitor};

/// Built-in attribute selectors.
///
/// A selector maps an entity type to the reference slots to follow and must
/// return the same slots for the same type on every call.
pub mod selectors {
    use crate::metadata::EntityType;

    /// Dependent references (owned sub-graphs)
    pub fn dependents(ty: &EntityType) -> Vec<usize> {
        ty.slots_where(|p| p.is_dependent())
    }

    /// References whose persistence cascades from the referrer
    pub fn cascaded(ty: &EntityType) -> Vec<usize> {
        ty.slots_where(|p| p.is_reference() && p.is_cascaded())
    }

    /// Every reference
    pub fn references(ty: &EntityType) -> Vec<usize> {
        ty.slots_where(|p| p.is_reference())
    }

    /// References that must be saved before the referrer
    pub fn savable_prerequisites(ty: &EntityType) -> Vec<usize> {
        ty.slots_where(|p| p.is_reference() && p.is_savable_prerequisite())
    }

    /// Dependent references and owner back-references
    pub fn ownership(ty: &EntityType) -> Vec<usize> {
        ty.slots_where(|p| p.is_dependent() || p.is_owner())
    }
}

/// Result of a traversal.
#[derive(Debug, Clone)]
pub struct Traversal<T> {
    /// Action result per visited node
    pub results: HashMap<EntityId, T>,
    /// Nodes in visit (pre-)order
    pub order: Vec<EntityId>,
    /// Each cycle as the node sequence from the revisited node back to itself
    pub cycles: Vec<Vec<EntityId>>,
}

impl<T> Traversal<T> {
    pub fn visited(&self, id: EntityId) -> bool {
        self.results.contains_key(&id)
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

struct Frame {
    node: EntityId,
    children: Vec<EntityId>,
    next: usize,
}

/// Depth-first walker over the references chosen by a selector.
pub struct ReferenceVisitor<S> {
    selector: S,
    debug: bool,
}

impl<S> ReferenceVisitor<S>
where
    S: Fn(&EntityType) -> Vec<usize>,
{
    pub fn new(selector: S) -> Self {
        Self {
            selector,
            debug: false,
        }
    }

    /// Emit a debug event per visited node and per cycle
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Children of `id` along the selected slots, in slot order.
    pub fn children(&self, graph: &EntityGraph, id: EntityId) -> Vec<EntityId> {
        (self.selector)(graph.entity_type(id))
            .into_iter()
            .flat_map(|slot| graph.references_at(id, slot).iter().copied())
            .collect()
    }

    /// Visit every node reachable from `root`.
    pub fn visit(&self, graph: &EntityGraph, root: EntityId) -> Traversal<()> {
        self.visit_with(graph, root, |_, _| ())
    }

    /// Visit every node reachable from `root`, applying `action` once per node
    /// before its children.
    pub fn visit_with<T, F>(&self, graph: &EntityGraph, root: EntityId, mut action: F) -> Traversal<T>
    where
        F: FnMut(&EntityGraph, EntityId) -> T,
    {
        let mut traversal = Traversal {
            results: HashMap::new(),
            order: Vec::new(),
            cycles: Vec::new(),
        };
        let mut stack: Vec<Frame> = Vec::new();
        let mut on_stack: HashMap<EntityId, usize> = HashMap::new();

        let mut enter = |node: EntityId,
                         stack: &mut Vec<Frame>,
                         on_stack: &mut HashMap<EntityId, usize>,
                         traversal: &mut Traversal<T>| {
            if self.debug {
                debug!(entity = %graph.describe(node), depth = stack.len(), "Visiting");
            }
            let result = action(graph, node);
            traversal.results.insert(node, result);
            traversal.order.push(node);
            on_stack.insert(node, stack.len());
            stack.push(Frame {
                node,
                children: self.children(graph, node),
                next: 0,
            });
        };

        enter(root, &mut stack, &mut on_stack, &mut traversal);

        while let Some(frame) = stack.last_mut() {
            if frame.next == frame.children.len() {
                on_stack.remove(&frame.node);
                stack.pop();
                continue;
            }
            let child = frame.children[frame.next];
            frame.next += 1;

            if let Some(&pos) = on_stack.get(&child) {
                let mut cycle: Vec<EntityId> = stack[pos..].iter().map(|f| f.node).collect();
                cycle.push(child);
                if self.debug {
                    let path: Vec<String> = cycle.iter().map(|id| graph.describe(*id)).collect();
                    debug!(cycle = %path.join(" -> "), "Reference cycle");
                }
                traversal.cycles.push(cycle);
            } else if !traversal.results.contains_key(&child) {
                enter(child, &mut stack, &mut on_stack, &mut traversal);
            }
        }

        traversal
    }
}
