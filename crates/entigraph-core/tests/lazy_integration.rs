//! Lazy-loading and identity cache integration tests for entigraph-core.
//!
//! These tests exercise a session over the study fixture:
//! - Unfetched consents loaded once on first read
//! - Fetched entities merged into, not replacing, local entries
//! - Scoped suspension of loading
//! - Canonical entities shared across fetches

mod common;

use entigraph_config::EngineConfig;
use entigraph_core::{Fetched, LoadError, TransportError, Value};
use pretty_assertions::assert_eq;

use common::{MemoryTransport, Session};

// ============================================================================
// Test Helpers
// ============================================================================

/// Session with one persisted participant whose consents are unresolved
fn session_with_participant() -> (Session<MemoryTransport>, entigraph_core::EntityId) {
    let mut graph = common::graph();
    let participant = common::participant(&mut graph, "M1");
    graph.set_value(participant, "identifier", 5i64).unwrap();

    let mut session = Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());
    assert_eq!(session.register(participant), participant);
    session.transport_mut().respond("consents", |graph, _| {
        let s1 = common::consent(graph, "S1", Some(11));
        let s2 = common::consent(graph, "S2", Some(12));
        Ok(Fetched::Entities(vec![s1, s2]))
    });
    (session, participant)
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_consents_fetched_once() {
    let (mut session, participant) = session_with_participant();
    assert!(!session.graph().is_resolved(participant, "consents").unwrap());

    let consents = session.resolve(participant, "consents").unwrap();
    assert_eq!(consents.len(), 2);
    assert!(session.graph().is_resolved(participant, "consents").unwrap());

    let again = session.resolve(participant, "consents").unwrap();
    assert_eq!(again, consents);
    assert_eq!(session.transport().fetch_count(participant, "consents"), 1);
    assert_eq!(session.loader().metrics().fetches, 1);
}

#[test]
fn test_fetch_merges_with_local_consents() {
    let (mut session, participant) = session_with_participant();
    let local_s1 = common::consent(session.graph_mut(), "S1", None);
    let local_s3 = common::consent(session.graph_mut(), "S3", None);
    session
        .graph_mut()
        .add_reference(participant, "consents", local_s1)
        .unwrap();
    session
        .graph_mut()
        .add_reference(participant, "consents", local_s3)
        .unwrap();

    let consents = session.resolve(participant, "consents").unwrap();
    assert_eq!(consents.len(), 3);
    assert_eq!(&consents[..2], &[local_s1, local_s3]);
    assert_eq!(session.graph().identifier(local_s1), Some(&Value::Int(11)));
    assert_eq!(
        common::text(session.graph(), consents[2], "statement").as_deref(),
        Some("S2")
    );
}

#[test]
fn test_suspended_loading_returns_current_slot() {
    let (mut session, participant) = session_with_participant();

    let inside = session.suspend_loading(|s| {
        let nested = s.suspend_loading(|s| s.resolve(participant, "consents").unwrap());
        assert!(nested.is_empty());
        s.resolve(participant, "consents").unwrap()
    });
    assert!(inside.is_empty());
    assert_eq!(session.transport().fetch_count(participant, "consents"), 0);
    assert_eq!(session.loader().metrics().skipped, 2);

    // loading resumes once the outermost scope ends
    assert_eq!(session.resolve(participant, "consents").unwrap().len(), 2);
}

#[test]
fn test_disabled_loader_never_fetches() {
    let mut config = EngineConfig::default();
    config.loader.enabled = false;
    let mut graph = common::graph();
    let participant = common::participant(&mut graph, "M1");
    let mut session = Session::from_config(graph, MemoryTransport::new(), config);
    session.register(participant);

    assert!(session.resolve(participant, "consents").unwrap().is_empty());
    assert!(session.transport().calls().is_empty());
}

#[test]
fn test_failed_fetch_is_retried() {
    let (mut session, participant) = session_with_participant();
    session.transport_mut().respond("consents", |_, entity| {
        Err(TransportError::Connection(format!("{} unreachable", entity)))
    });

    let err = session.resolve(participant, "consents").unwrap_err();
    assert!(matches!(err, LoadError::Fetch { .. }));
    assert!(err.to_string().contains("consents"));
    assert!(!session.graph().is_resolved(participant, "consents").unwrap());
    assert_eq!(session.loader().metrics().failures, 1);

    session
        .transport_mut()
        .respond("consents", |_, _| Ok(Fetched::Entities(Vec::new())));
    assert!(session.resolve(participant, "consents").unwrap().is_empty());
    assert!(session.graph().is_resolved(participant, "consents").unwrap());
}

// ============================================================================
// Identity cache
// ============================================================================

#[test]
fn test_fetched_consents_become_canonical() {
    let (mut session, participant) = session_with_participant();
    let consents = session.resolve(participant, "consents").unwrap();

    let duplicate = common::consent(session.graph_mut(), "S2", None);
    assert_eq!(session.lookup(duplicate), Some(consents[1]));
    assert_eq!(session.register(duplicate), consents[1]);
}

#[test]
fn test_register_and_force_add() {
    let mut graph = common::graph();
    let first = common::participant(&mut graph, "M9");
    let second = common::participant(&mut graph, "M9");
    let mut session = Session::from_config(graph, MemoryTransport::new(), EngineConfig::default());

    assert_eq!(session.register(first), first);
    assert_eq!(session.register(second), first);
    assert_eq!(session.register(second), first);

    let graph = session.graph().clone();
    session.cache_mut().force_add(&graph, second);
    assert_eq!(session.register(first), second);
}

#[test]
fn test_sticky_types_survive_clear() {
    let mut config = EngineConfig::default();
    config.cache.sticky_types = vec!["Coordinator".to_string()];
    let mut graph = common::graph();
    let fixture = common::study(&mut graph, "Trial", &[]);
    let mut session = Session::from_config(graph, MemoryTransport::new(), config);

    session.register(fixture.study);
    session.register(fixture.coordinator);
    session.cache_mut().clear();
    session.cache_mut().clear();

    assert_eq!(session.lookup(fixture.study), None);
    assert_eq!(session.lookup(fixture.coordinator), Some(fixture.coordinator));
}
