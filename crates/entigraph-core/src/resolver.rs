//! Save-order resolution and execution.
//!
//! [`SaveOrderResolver`] turns a root entity into a [`SavePlan`]: the
//! entities reachable through cascaded and savable-prerequisite references,
//! ordered so that every prerequisite is saved before its referrer and every
//! cascaded dependent after its owner. Dependents whose cascade does not
//! carry an owner's create are deferred to a second pass. A prerequisite
//! cycle is reported with its path and nothing is saved.
//!
//! [`Persister`] executes a plan against a [`Transport`], moving each node
//! through `Pending -> PrerequisitesResolved -> Saved -> Refreshed`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::IdentityCache;
use crate::graph::{EntityGraph, EntityId, GraphError};
use crate::transport::{Fetched, SaveTemplate, TemplateAttribute, Transport, TransportError};
use crate::visitor::{merge_into_slot, selectors};

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while planning or executing a save.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SaveError {
    /// Entities that each must be saved before the other
    #[error("prerequisite cycle: {}", .path.join(" -> "))]
    Cycle {
        path: Vec<String>,
        entities: Vec<EntityId>,
    },

    /// An entity failed validation before any save call
    #[error("validation failed: {0}")]
    Validation(#[from] GraphError),

    /// A backend call failed; `completed` lists the entities saved before it
    #[error("{operation} of {entity} failed ({} saved before the failure): {source}", .completed.len())]
    Transport {
        entity: String,
        operation: &'static str,
        completed: Vec<EntityId>,
        #[source]
        source: TransportError,
    },
}

impl SaveError {
    /// Create a Transport error.
    pub fn transport(
        entity: impl Into<String>,
        operation: &'static str,
        completed: Vec<EntityId>,
        source: TransportError,
    ) -> Self {
        Self::Transport {
            entity: entity.into(),
            operation,
            completed,
            source,
        }
    }

    /// Entities saved before a transport failure
    pub fn completed(&self) -> &[EntityId] {
        match self {
            SaveError::Transport { completed, .. } => completed,
            _ => &[],
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Backend call used to save an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOperation {
    Create,
    Update,
}

impl SaveOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveOperation::Create => "create",
            SaveOperation::Update => "update",
        }
    }

    /// Create for entities without a server identifier, update otherwise.
    pub fn for_entity(graph: &EntityGraph, id: EntityId) -> Self {
        if graph.is_persisted(id) {
            SaveOperation::Update
        } else {
            SaveOperation::Create
        }
    }
}

impl fmt::Display for SaveOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pass in which a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePhase {
    Primary,
    /// Dependents whose owner's create does not cascade to them
    Deferred,
}

/// One save call in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveStep {
    pub entity: EntityId,
    pub operation: SaveOperation,
    pub phase: SavePhase,
    pub template: SaveTemplate,
}

/// Ordered save calls for one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavePlan {
    pub root: EntityId,
    pub steps: Vec<SaveStep>,
}

impl SavePlan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Position of an entity's step
    pub fn position(&self, entity: EntityId) -> Option<usize> {
        self.steps.iter().position(|s| s.entity == entity)
    }

    pub fn entities(&self) -> Vec<EntityId> {
        self.steps.iter().map(|s| s.entity).collect()
    }

    pub fn step(&self, entity: EntityId) -> Option<&SaveStep> {
        self.steps.iter().find(|s| s.entity == entity)
    }
}

/// Attributes submitted for `operation` on `id`.
///
/// Template attributes are the non-domain attributes plus references
/// included in save templates, restricted to creatable attributes on create
/// and updatable attributes on update.
pub fn save_template(graph: &EntityGraph, id: EntityId, operation: SaveOperation) -> SaveTemplate {
    let attributes = graph
        .entity_type(id)
        .properties()
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_nondomain() || p.include_in_save_template())
        .filter(|(_, p)| match operation {
            SaveOperation::Create => p.is_creatable(),
            SaveOperation::Update => p.is_updatable(),
        })
        .map(|(slot, p)| TemplateAttribute {
            name: p.name().to_string(),
            slot,
        })
        .collect();
    SaveTemplate { attributes }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// Owner before cascaded dependent
    Cascade,
    /// Prerequisite before referrer
    Prerequisite,
}

/// Computes save plans.
#[derive(Debug, Clone)]
pub struct SaveOrderResolver {
    validate: bool,
    debug: bool,
}

impl Default for SaveOrderResolver {
    fn default() -> Self {
        Self {
            validate: true,
            debug: false,
        }
    }
}

impl SaveOrderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate entities to be created before returning a plan
    pub fn validate(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Plan the save of `root`.
    pub fn plan(&self, graph: &EntityGraph, root: EntityId) -> Result<SavePlan, SaveError> {
        graph.entity(root)?;

        let mut dag: DiGraph<EntityId, Edge> = DiGraph::new();
        let mut nodes: HashMap<EntityId, NodeIndex> = HashMap::new();
        let mut deferred: HashSet<NodeIndex> = HashSet::new();
        let mut queue = VecDeque::new();

        let root_ix = dag.add_node(root);
        nodes.insert(root, root_ix);
        queue.push_back(root);

        while let Some(id) = queue.pop_front() {
            let ix = nodes[&id];
            let ty = graph.entity_type(id);
            let operation = SaveOperation::for_entity(graph, id);

            let mut node_for = |entity: EntityId, dag: &mut DiGraph<EntityId, Edge>| {
                *nodes.entry(entity).or_insert_with(|| {
                    queue.push_back(entity);
                    dag.add_node(entity)
                })
            };

            for slot in selectors::cascaded(ty) {
                let property = ty.property_at(slot);
                for &dependent in graph.references_at(id, slot) {
                    let dep_ix = node_for(dependent, &mut dag);
                    if property.cascade_update_to_create() {
                        add_edge(&mut dag, ix, dep_ix, Edge::Cascade);
                    } else if operation == SaveOperation::Update {
                        add_edge(&mut dag, dep_ix, ix, Edge::Prerequisite);
                    } else {
                        add_edge(&mut dag, ix, dep_ix, Edge::Cascade);
                        deferred.insert(dep_ix);
                    }
                }
            }

            for slot in selectors::savable_prerequisites(ty) {
                if ty.property_at(slot).is_cascaded() {
                    continue;
                }
                for &target in graph.references_at(id, slot) {
                    if graph.is_persisted(target) {
                        continue;
                    }
                    let target_ix = node_for(target, &mut dag);
                    add_edge(&mut dag, target_ix, ix, Edge::Prerequisite);
                }
            }
        }

        let order = toposort(&dag, None).map_err(|cycle| {
            let entities: Vec<EntityId> = cycle_path(&dag, cycle.node_id())
                .into_iter()
                .map(|n| dag[n])
                .collect();
            let path = entities.iter().map(|id| graph.describe(*id)).collect();
            SaveError::Cycle { path, entities }
        })?;

        settle_deferred(&dag, &mut deferred);

        let mut steps = Vec::with_capacity(order.len());
        for phase in [SavePhase::Primary, SavePhase::Deferred] {
            for &ix in &order {
                let in_phase = deferred.contains(&ix) == (phase == SavePhase::Deferred);
                if !in_phase {
                    continue;
                }
                let entity = dag[ix];
                let operation = SaveOperation::for_entity(graph, entity);
                if self.validate && operation == SaveOperation::Create {
                    graph.validate(entity)?;
                }
                steps.push(SaveStep {
                    entity,
                    operation,
                    phase,
                    template: save_template(graph, entity, operation),
                });
            }
        }

        if self.debug {
            for (index, step) in steps.iter().enumerate() {
                debug!(
                    index,
                    entity = %graph.describe(step.entity),
                    operation = %step.operation,
                    phase = ?step.phase,
                    "Planned save step"
                );
            }
        }
        debug!(root = %graph.describe(root), steps = steps.len(), "Resolved save order");

        Ok(SavePlan { root, steps })
    }
}

/// Add an edge once; a cascade edge takes precedence over a prerequisite
/// edge between the same nodes.
fn add_edge(dag: &mut DiGraph<EntityId, Edge>, from: NodeIndex, to: NodeIndex, kind: Edge) {
    match dag.find_edge(from, to) {
        Some(edge) if kind == Edge::Cascade => dag[edge] = Edge::Cascade,
        Some(_) => {}
        None => {
            dag.add_edge(from, to, kind);
        }
    }
}

/// Extend deferral to cascaded descendants, then un-defer anything a
/// primary node must follow.
fn settle_deferred(dag: &DiGraph<EntityId, Edge>, deferred: &mut HashSet<NodeIndex>) {
    let mut stack: Vec<NodeIndex> = deferred.iter().copied().collect();
    while let Some(n) = stack.pop() {
        for edge in dag.edges_directed(n, Direction::Outgoing) {
            if *edge.weight() == Edge::Cascade && deferred.insert(edge.target()) {
                stack.push(edge.target());
            }
        }
    }

    loop {
        let blocking: Vec<NodeIndex> = deferred
            .iter()
            .copied()
            .filter(|&n| {
                dag.neighbors_directed(n, Direction::Outgoing)
                    .any(|m| !deferred.contains(&m))
            })
            .collect();
        if blocking.is_empty() {
            break;
        }
        for n in blocking {
            deferred.remove(&n);
        }
    }
}

/// A path `start -> .. -> start` inside the strongly connected component
/// containing `start`.
fn cycle_path(dag: &DiGraph<EntityId, Edge>, start: NodeIndex) -> Vec<NodeIndex> {
    let component: HashSet<NodeIndex> = tarjan_scc(dag)
        .into_iter()
        .find(|c| c.contains(&start))
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut seen = HashSet::from([start]);
    let mut stack = vec![start];
    while let Some(n) = stack.pop() {
        for m in dag.neighbors_directed(n, Direction::Outgoing) {
            if m == start {
                let mut path = vec![n];
                let mut current = n;
                while current != start {
                    match parent.get(&current) {
                        Some(&p) => {
                            path.push(p);
                            current = p;
                        }
                        None => break,
                    }
                }
                path.reverse();
                path.push(start);
                return path;
            }
            if component.contains(&m) && seen.insert(m) {
                parent.insert(m, n);
                stack.push(m);
            }
        }
    }
    vec![start, start]
}

// ============================================================================
// Execution
// ============================================================================

/// Per-node save progress. A node never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    PrerequisitesResolved,
    Saved,
    Refreshed,
}

impl NodeState {
    /// Move forward to `next`; backward moves are ignored.
    pub fn advance(&mut self, next: NodeState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// Outcome of executing a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Entities saved, in plan order, including skipped steps before the offset
    pub completed: Vec<EntityId>,
    /// Final state of each executed node
    pub states: HashMap<EntityId, NodeState>,
    pub created: usize,
    pub updated: usize,
    pub refreshed: usize,
}

/// Executes save plans against a transport.
#[derive(Debug, Clone, Default)]
pub struct Persister {
    debug: bool,
}

impl Persister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Run `plan` from step `offset`.
    ///
    /// Created entities receive their assigned identifier and every saved
    /// entity is registered in `cache`. Attributes refreshed after save are
    /// fetched and merged back. On a transport failure the error lists the
    /// entities saved so far; re-running with `offset = completed.len()`
    /// resumes after them.
    pub fn execute<T: Transport + ?Sized>(
        &self,
        graph: &mut EntityGraph,
        cache: &mut IdentityCache,
        transport: &mut T,
        plan: &SavePlan,
        offset: usize,
    ) -> Result<SaveReport, SaveError> {
        let offset = offset.min(plan.steps.len());
        let mut report = SaveReport {
            completed: plan.steps[..offset].iter().map(|s| s.entity).collect(),
            ..SaveReport::default()
        };

        for step in &plan.steps[offset..] {
            let id = step.entity;
            let mut state = NodeState::Pending;

            let waiting = self.unsaved_prerequisites(graph, id);
            if !waiting.is_empty() {
                warn!(
                    entity = %graph.describe(id),
                    prerequisites = ?waiting,
                    "Saving before prerequisites have identifiers"
                );
            }
            state.advance(NodeState::PrerequisitesResolved);

            match step.operation {
                SaveOperation::Create => {
                    let assigned = transport
                        .create(graph, id, &step.template)
                        .map_err(|e| {
                            SaveError::transport(graph.describe(id), "create", report.completed.clone(), e)
                        })?;
                    if let Some(slot) = graph.entity_type(id).identifier_slot() {
                        graph.set_value_at(id, slot, assigned);
                    }
                    report.created += 1;
                }
                SaveOperation::Update => {
                    transport.update(graph, id, &step.template).map_err(|e| {
                        SaveError::transport(graph.describe(id), "update", report.completed.clone(), e)
                    })?;
                    report.updated += 1;
                }
            }
            state.advance(NodeState::Saved);
            report.completed.push(id);

            let canonical = cache.add(graph, id);
            if canonical != id {
                warn!(
                    entity = %graph.describe(id),
                    canonical = %graph.describe(canonical),
                    "Saved entity shares its identity with a cached entity"
                );
            }
            if self.debug {
                debug!(entity = %graph.describe(id), operation = %step.operation, "Saved");
            }

            if self.refresh(graph, cache, transport, id, &report.completed)? {
                state.advance(NodeState::Refreshed);
                report.refreshed += 1;
            }
            report.states.insert(id, state);
        }

        info!(
            created = report.created,
            updated = report.updated,
            refreshed = report.refreshed,
            "Executed save plan"
        );
        Ok(report)
    }

    /// Targets of savable prerequisites that still have no identifier.
    fn unsaved_prerequisites(&self, graph: &EntityGraph, id: EntityId) -> Vec<EntityId> {
        let ty = graph.entity_type(id);
        selectors::savable_prerequisites(ty)
            .into_iter()
            .filter(|&slot| !ty.property_at(slot).is_cascaded())
            .flat_map(|slot| graph.references_at(id, slot).iter().copied())
            .filter(|&target| {
                graph.entity_type(target).identifier_slot().is_some() && !graph.is_persisted(target)
            })
            .collect()
    }

    /// Re-fetch attributes the backend may have changed. Returns false if
    /// the entity has none.
    fn refresh<T: Transport + ?Sized>(
        &self,
        graph: &mut EntityGraph,
        cache: &mut IdentityCache,
        transport: &mut T,
        id: EntityId,
        completed: &[EntityId],
    ) -> Result<bool, SaveError> {
        let registry = graph.shared_registry();
        let ty = registry.get(graph.type_id_of(id));
        let slots: Vec<usize> = ty
            .slots_where(|p| p.is_fetch_saved() && !p.is_nosync())
            .into_iter()
            .filter(|&slot| Some(slot) != ty.identifier_slot())
            .collect();
        if slots.is_empty() {
            return Ok(false);
        }

        for slot in slots {
            let name = ty.property_at(slot).name();
            let fetched = transport.fetch(graph, id, name).map_err(|e| {
                SaveError::transport(graph.describe(id), "fetch", completed.to_vec(), e)
            })?;
            match fetched {
                Fetched::Value(value) => graph.set_value_at(id, slot, value),
                Fetched::Entities(entities) => {
                    let entities = cache.canonicalize(graph, &entities);
                    let merged = merge_into_slot(graph, id, slot, &entities);
                    for adopted in merged.adopted {
                        cache.add(graph, adopted);
                    }
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        MetadataRegistry, PropertyBuilder, PropertyFlag, RegistryBuilder, TypeBuilder,
    };
    use crate::transport::MemoryTransport;
    use crate::value::{Value, ValueType};
    use std::sync::Arc;

    fn registry() -> Arc<MetadataRegistry> {
        Arc::new(
            RegistryBuilder::new()
                .entity(
                    TypeBuilder::new("Protocol")
                        .with_identifier()
                        .property(PropertyBuilder::attribute("title", ValueType::Text).mandatory())
                        .property(
                            PropertyBuilder::attribute("created_on", ValueType::Text)
                                .flags([PropertyFlag::CreateOnly]),
                        )
                        .property(
                            PropertyBuilder::attribute("revision", ValueType::Int)
                                .flag(PropertyFlag::FetchSaved),
                        )
                        .property(PropertyBuilder::dependents("arms", "Arm").inverse("protocol"))
                        .property(
                            PropertyBuilder::dependents("specimens", "Specimen")
                                .inverse("protocol")
                                .flag(PropertyFlag::NoCascadeUpdateToCreate),
                        )
                        .property(PropertyBuilder::independent("sponsor", "Sponsor")),
                )
                .entity(
                    TypeBuilder::new("Arm")
                        .with_identifier()
                        .property(PropertyBuilder::attribute("name", ValueType::Text))
                        .property(PropertyBuilder::owner("protocol", "Protocol", "arms")),
                )
                .entity(
                    TypeBuilder::new("Specimen")
                        .with_identifier()
                        .property(PropertyBuilder::owner("protocol", "Protocol", "specimens")),
                )
                .entity(
                    TypeBuilder::new("Sponsor")
                        .with_identifier()
                        .property(PropertyBuilder::independent("lead", "Protocol")),
                )
                .build()
                .unwrap(),
        )
    }

    fn protocol(graph: &mut EntityGraph) -> EntityId {
        let id = graph.create("Protocol").unwrap();
        graph.set_value(id, "title", "P").unwrap();
        id
    }

    #[test]
    fn test_templates_respect_create_and_update_only() {
        let mut graph = EntityGraph::new(registry());
        let p = protocol(&mut graph);

        let create = save_template(&graph, p, SaveOperation::Create);
        assert!(create.contains("created_on"));
        assert!(create.contains("arms"));
        assert!(!create.contains("sponsor"));

        let update = save_template(&graph, p, SaveOperation::Update);
        assert!(!update.contains("created_on"));
        assert!(update.contains("title"));
    }

    #[test]
    fn test_prerequisite_before_referrer() {
        let mut graph = EntityGraph::new(registry());
        let p = protocol(&mut graph);
        let sponsor = graph.create("Sponsor").unwrap();
        graph.set_reference(p, "sponsor", Some(sponsor)).unwrap();

        let plan = SaveOrderResolver::new().plan(&graph, p).unwrap();
        assert_eq!(plan.entities(), vec![sponsor, p]);
    }

    #[test]
    fn test_persisted_prerequisite_is_not_planned() {
        let mut graph = EntityGraph::new(registry());
        let p = protocol(&mut graph);
        let sponsor = graph.create("Sponsor").unwrap();
        graph.set_value(sponsor, "identifier", 3i64).unwrap();
        graph.set_reference(p, "sponsor", Some(sponsor)).unwrap();

        let plan = SaveOrderResolver::new().plan(&graph, p).unwrap();
        assert_eq!(plan.entities(), vec![p]);
    }

    #[test]
    fn test_no_cascade_update_to_create_defers_on_create() {
        let mut graph = EntityGraph::new(registry());
        let p = protocol(&mut graph);
        let arm = graph.create("Arm").unwrap();
        let specimen = graph.create("Specimen").unwrap();
        graph.add_reference(p, "arms", arm).unwrap();
        graph.add_reference(p, "specimens", specimen).unwrap();

        let plan = SaveOrderResolver::new().plan(&graph, p).unwrap();
        assert_eq!(plan.entities(), vec![p, arm, specimen]);
        assert_eq!(plan.step(specimen).unwrap().phase, SavePhase::Deferred);
        assert_eq!(plan.step(arm).unwrap().phase, SavePhase::Primary);
    }

    #[test]
    fn test_no_cascade_update_to_create_is_prerequisite_on_update() {
        let mut graph = EntityGraph::new(registry());
        let p = protocol(&mut graph);
        graph.set_value(p, "identifier", 1i64).unwrap();
        let specimen = graph.create("Specimen").unwrap();
        graph.add_reference(p, "specimens", specimen).unwrap();

        let plan = SaveOrderResolver::new().plan(&graph, p).unwrap();
        assert_eq!(plan.entities(), vec![specimen, p]);
        assert_eq!(plan.steps[1].operation, SaveOperation::Update);
        assert!(plan.steps.iter().all(|s| s.phase == SavePhase::Primary));
    }

    #[test]
    fn test_prerequisite_cycle_reported() {
        let mut graph = EntityGraph::new(registry());
        let p = protocol(&mut graph);
        let sponsor = graph.create("Sponsor").unwrap();
        graph.set_reference(p, "sponsor", Some(sponsor)).unwrap();
        graph.set_reference(sponsor, "lead", Some(p)).unwrap();

        let err = SaveOrderResolver::new().plan(&graph, p).unwrap_err();
        match err {
            SaveError::Cycle { entities, path } => {
                assert_eq!(entities.len(), 3);
                assert_eq!(entities.first(), entities.last());
                assert!(entities.contains(&p) && entities.contains(&sponsor));
                assert!(path.iter().any(|d| d.starts_with("Sponsor")));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_blocks_plan() {
        let mut graph = EntityGraph::new(registry());
        let p = graph.create("Protocol").unwrap();
        let err = SaveOrderResolver::new().plan(&graph, p).unwrap_err();
        assert!(matches!(err, SaveError::Validation(GraphError::MissingMandatory { .. })));
        assert!(SaveOrderResolver::new().validate(false).plan(&graph, p).is_ok());
    }

    #[test]
    fn test_execute_assigns_identifiers_and_refreshes() {
        let mut graph = EntityGraph::new(registry());
        let p = protocol(&mut graph);
        let arm = graph.create("Arm").unwrap();
        graph.add_reference(p, "arms", arm).unwrap();

        let mut transport = MemoryTransport::new();
        transport.respond("revision", |_, _| Ok(Fetched::Value(Value::Int(4))));
        let mut cache = IdentityCache::new();

        let plan = SaveOrderResolver::new().plan(&graph, p).unwrap();
        let report = Persister::new()
            .execute(&mut graph, &mut cache, &mut transport, &plan, 0)
            .unwrap();

        assert_eq!(report.completed, vec![p, arm]);
        assert_eq!(graph.identifier(p), Some(&Value::Int(1)));
        assert_eq!(graph.identifier(arm), Some(&Value::Int(2)));
        assert_eq!(graph.value(p, "revision").unwrap(), &Value::Int(4));
        assert_eq!(report.states[&p], NodeState::Refreshed);
        assert_eq!(report.states[&arm], NodeState::Saved);
        assert_eq!(cache.lookup(&graph, arm), Some(arm));
    }

    #[test]
    fn test_node_state_never_moves_backwards() {
        let mut state = NodeState::Saved;
        assert!(!state.advance(NodeState::PrerequisitesResolved));
        assert_eq!(state, NodeState::Saved);
        assert!(state.advance(NodeState::Refreshed));
    }
}
