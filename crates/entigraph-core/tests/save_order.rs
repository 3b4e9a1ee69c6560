//! Save-order integration tests for entigraph-core.
//!
//! Plans and executes saves of the study fixture through a session:
//! - Prerequisites before referrers, dependents after owners
//! - Defaults applied across cascaded dependents
//! - Resuming a save after a transport failure
//! - Refreshing identifiers into the identity cache
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package entigraph-core --test save_order
//! ```

mod common;

use entigraph_config::EngineConfig;
use entigraph_core::{SaveError, SaveOperation, SavePhase, Transport, TransportCall, Value};
use pretty_assertions::assert_eq;

use common::{MemoryTransport, Session};

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_coordinator_before_study_before_events() {
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &["Baseline", "Week 4"]);
    let session = Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());

    let plan = session.plan(fixture.study).unwrap();
    assert_eq!(plan.len(), 4);

    let study_at = plan.position(fixture.study).unwrap();
    let coordinator_at = plan.position(fixture.coordinator).unwrap();
    assert!(coordinator_at < study_at);
    for &event in &fixture.events {
        assert!(plan.position(event).unwrap() > study_at);
        assert_eq!(plan.step(event).unwrap().phase, SavePhase::Primary);
    }
    assert!(plan.steps.iter().all(|s| s.operation == SaveOperation::Create));
}

#[test]
fn test_study_template_contents() {
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &["Baseline"]);
    let session = Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());

    let plan = session.plan(fixture.study).unwrap();
    let template = &plan.step(fixture.study).unwrap().template;
    assert!(template.contains("title"));
    assert!(template.contains("activity_status"));
    assert!(template.contains("events"));
    assert!(!template.contains("coordinator"));
}

#[test]
fn test_persisted_study_is_updated_after_new_events() {
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &["Baseline"]);
    graph.set_value(fixture.study, "identifier", 40i64).unwrap();
    graph.set_value(fixture.coordinator, "identifier", 41i64).unwrap();
    let session = Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());

    let plan = session.plan(fixture.study).unwrap();
    assert_eq!(plan.entities(), vec![fixture.study, fixture.events[0]]);
    assert_eq!(plan.steps[0].operation, SaveOperation::Update);
    assert_eq!(plan.steps[1].operation, SaveOperation::Create);
}

#[test]
fn test_missing_mandatory_attribute_blocks_save() {
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &[]);
    let nameless = graph.create("Coordinator").unwrap();
    graph
        .set_reference(fixture.study, "coordinator", Some(nameless))
        .unwrap();
    let mut session =
        Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());

    let err = session.save(fixture.study).unwrap_err();
    assert!(matches!(err, SaveError::Validation(_)));
    assert!(err.to_string().contains("name"));
    assert!(session.transport().calls().is_empty());
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn test_save_assigns_identifiers_and_defaults() {
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &["Baseline", "Week 4"]);
    let mut session =
        Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());

    let report = session.save(fixture.study).unwrap();
    assert_eq!(report.created, 4);
    assert_eq!(report.completed.len(), 4);

    let graph = session.graph();
    assert_eq!(graph.identifier(fixture.coordinator), Some(&Value::Int(1)));
    assert_eq!(graph.identifier(fixture.study), Some(&Value::Int(2)));
    for &event in &fixture.events {
        assert!(graph.is_persisted(event));
        assert_eq!(
            common::text(graph, event, "activity_status").as_deref(),
            Some("Active")
        );
    }
    assert_eq!(
        common::text(graph, fixture.study, "activity_status").as_deref(),
        Some("Active")
    );
}

#[test]
fn test_defaults_not_applied_when_disabled() {
    let mut config = EngineConfig::default();
    config.save.apply_defaults = false;
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &["Baseline"]);
    let mut session = Session::from_config(graph, MemoryTransport::new(), config);

    session.save(fixture.study).unwrap();
    assert_eq!(
        session.graph().value(fixture.events[0], "activity_status").unwrap(),
        &Value::Null
    );
}

#[test]
fn test_resume_after_transport_failure() {
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &["Baseline", "Week 4"]);
    let transport = MemoryTransport::new().fail_on_call(2);
    let mut session = Session::from_config(graph, transport, EngineConfig::default());

    let plan = session.plan(fixture.study).unwrap();
    let err = session.save_from(&plan, 0).unwrap_err();
    assert!(matches!(err, SaveError::Transport { .. }));
    let completed = err.completed().to_vec();
    assert_eq!(completed, vec![fixture.coordinator, fixture.study]);
    assert!(session.graph().is_persisted(fixture.study));

    let report = session.save_from(&plan, completed.len()).unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.completed.len(), 4);
    assert!(fixture
        .events
        .iter()
        .all(|&e| session.graph().is_persisted(e)));

    // nothing saved twice
    let creates = session
        .transport()
        .calls()
        .iter()
        .filter(|c| matches!(c, TransportCall::Create { .. }))
        .count();
    assert_eq!(creates, 4);
}

#[test]
fn test_saved_entities_are_cached_by_identifier_and_key() {
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &["Baseline"]);
    let mut session =
        Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());
    session.save(fixture.study).unwrap();

    // a fetched copy known only by title resolves to the saved study
    let copy = session.graph_mut().create("Study").unwrap();
    session.graph_mut().set_value(copy, "title", "Trial").unwrap();
    assert_eq!(session.lookup(copy), Some(fixture.study));
}

#[test]
fn test_custom_transport_sees_templates() {
    struct Recording {
        seen: Vec<Vec<String>>,
    }

    impl Transport for Recording {
        fn create(
            &mut self,
            _graph: &entigraph_core::EntityGraph,
            _entity: entigraph_core::EntityId,
            template: &entigraph_core::SaveTemplate,
        ) -> Result<Value, entigraph_core::TransportError> {
            self.seen.push(template.names().map(String::from).collect());
            Ok(Value::Int(self.seen.len() as i64))
        }

        fn update(
            &mut self,
            _graph: &entigraph_core::EntityGraph,
            _entity: entigraph_core::EntityId,
            _template: &entigraph_core::SaveTemplate,
        ) -> Result<(), entigraph_core::TransportError> {
            Ok(())
        }

        fn fetch(
            &mut self,
            _graph: &mut entigraph_core::EntityGraph,
            entity: entigraph_core::EntityId,
            _attribute: &str,
        ) -> Result<entigraph_core::Fetched, entigraph_core::TransportError> {
            Err(entigraph_core::TransportError::not_found(entity.to_string()))
        }
    }

    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &[]);
    let mut session = Session::from_config(
        graph,
        Recording { seen: Vec::new() },
        EngineConfig::default(),
    );
    session.save(fixture.study).unwrap();

    let seen = &session.transport().seen;
    assert_eq!(seen.len(), 2);
    assert!(seen[0].contains(&"name".to_string()));
    assert!(seen[1].contains(&"title".to_string()));
}
