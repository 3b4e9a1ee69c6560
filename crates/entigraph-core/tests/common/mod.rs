//! Common test utilities for integration tests.
//!
//! The study fixture: a `Study` owns `Event`s and `Participant`s, refers to
//! a `Coordinator`, and each `Participant` owns lazily loaded `Consent`s.
//! The same schema backs the JSON fixtures used by the CLI tests.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::Arc;

use entigraph_config::CollectionSavePolicy;
use entigraph_core::{EntityGraph, EntityId, MetadataRegistry, SchemaDocument, Value};

pub use entigraph_core::{MemoryTransport, Session};

/// Path of a file under `tests/fixtures`
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// The study schema with the default collection policy
pub fn registry() -> Arc<MetadataRegistry> {
    let schema = SchemaDocument::from_path(&fixture_path("study_schema.json"))
        .expect("Failed to read study schema");
    Arc::new(
        schema
            .build(CollectionSavePolicy::default())
            .expect("Invalid study schema"),
    )
}

pub fn graph() -> EntityGraph {
    EntityGraph::new(registry())
}

/// Entities of a study built by [`study`]
pub struct StudyFixture {
    pub study: EntityId,
    pub events: Vec<EntityId>,
    pub coordinator: EntityId,
}

/// A new study with one event per label and a coordinator.
pub fn study(graph: &mut EntityGraph, title: &str, event_labels: &[&str]) -> StudyFixture {
    let study = graph.create("Study").unwrap();
    graph.set_value(study, "title", title).unwrap();

    let events = event_labels
        .iter()
        .map(|label| {
            let event = graph.create("Event").unwrap();
            graph.set_value(event, "label", *label).unwrap();
            graph.add_reference(study, "events", event).unwrap();
            event
        })
        .collect();

    let coordinator = graph.create("Coordinator").unwrap();
    graph.set_value(coordinator, "name", "Dr. Ames").unwrap();
    graph
        .set_reference(study, "coordinator", Some(coordinator))
        .unwrap();

    StudyFixture {
        study,
        events,
        coordinator,
    }
}

pub fn participant(graph: &mut EntityGraph, mrn: &str) -> EntityId {
    let participant = graph.create("Participant").unwrap();
    graph.set_value(participant, "mrn", mrn).unwrap();
    participant
}

/// A consent, optionally already persisted with `identifier`.
pub fn consent(graph: &mut EntityGraph, statement: &str, identifier: Option<i64>) -> EntityId {
    let consent = graph.create("Consent").unwrap();
    graph.set_value(consent, "statement", statement).unwrap();
    if let Some(identifier) = identifier {
        graph.set_value(consent, "identifier", identifier).unwrap();
    }
    consent
}

pub fn text(graph: &EntityGraph, id: EntityId, attribute: &str) -> Option<String> {
    graph
        .value(id, attribute)
        .ok()
        .and_then(Value::as_text)
        .map(String::from)
}
