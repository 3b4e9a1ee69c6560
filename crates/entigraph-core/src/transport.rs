//! Persistence transport seam.
//!
//! The engine never talks to a backend directly. Saves and lazy fetches go
//! through a [`Transport`], a blocking, fallible collaborator supplied by
//! the embedding application. [`MemoryTransport`] is an in-process
//! implementation that assigns identifiers and records every call.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::trace;

use crate::graph::{EntityGraph, EntityId};
use crate::value::Value;

/// Errors raised by transport implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The backend refused the request
    #[error("{entity}: backend rejected {operation}: {message}")]
    Rejected {
        entity: String,
        operation: &'static str,
        message: String,
    },

    /// The backend has no such record or attribute
    #[error("{entity}: not found")]
    NotFound { entity: String },

    /// Connection or session failure
    #[error("connection failed: {0}")]
    Connection(String),
}

impl TransportError {
    /// Create a Rejected error.
    pub fn rejected(
        entity: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            entity: entity.into(),
            operation,
            message: message.into(),
        }
    }

    /// Create a NotFound error.
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }
}

/// One attribute submitted in a create or update call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateAttribute {
    pub name: String,
    pub slot: usize,
}

/// The attribute subset submitted to the backend for one save call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SaveTemplate {
    pub attributes: Vec<TemplateAttribute>,
}

impl SaveTemplate {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Result of a fetch call.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// New value of a non-domain attribute
    Value(Value),
    /// Referenced entities, created in the caller's graph
    Entities(Vec<EntityId>),
}

/// Blocking backend collaborator.
pub trait Transport {
    /// Create the entity and return its server-assigned identifier.
    fn create(
        &mut self,
        graph: &EntityGraph,
        entity: EntityId,
        template: &SaveTemplate,
    ) -> Result<Value, TransportError>;

    /// Update the entity.
    fn update(
        &mut self,
        graph: &EntityGraph,
        entity: EntityId,
        template: &SaveTemplate,
    ) -> Result<(), TransportError>;

    /// Fetch one attribute of the entity.
    ///
    /// Fetched entities are created in `graph`; the caller merges them.
    fn fetch(
        &mut self,
        graph: &mut EntityGraph,
        entity: EntityId,
        attribute: &str,
    ) -> Result<Fetched, TransportError>;
}

// ============================================================================
// In-memory transport
// ============================================================================

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Create { entity: EntityId, attributes: Vec<String> },
    Update { entity: EntityId, attributes: Vec<String> },
    Fetch { entity: EntityId, attribute: String },
}

impl TransportCall {
    pub fn entity(&self) -> EntityId {
        match self {
            TransportCall::Create { entity, .. }
            | TransportCall::Update { entity, .. }
            | TransportCall::Fetch { entity, .. } => *entity,
        }
    }
}

type Responder = Box<dyn FnMut(&mut EntityGraph, EntityId) -> Result<Fetched, TransportError>>;

/// In-process transport: sequential identifiers and a call log.
///
/// Fetches are answered by a registered responder for the attribute name,
/// or else by echoing the entity's current attribute state.
pub struct MemoryTransport {
    next_identifier: i64,
    calls: Vec<TransportCall>,
    fail_on: Option<usize>,
    responders: HashMap<String, Responder>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Assign identifiers from `first` upwards
    pub fn starting_at(first: i64) -> Self {
        Self {
            next_identifier: first,
            calls: Vec::new(),
            fail_on: None,
            responders: HashMap::new(),
        }
    }

    /// Fail the call with this zero-based index with a connection error.
    pub fn fail_on_call(mut self, index: usize) -> Self {
        self.fail_on = Some(index);
        self
    }

    pub fn clear_failure(&mut self) {
        self.fail_on = None;
    }

    /// Answer fetches of `attribute` with `responder`.
    pub fn respond<F>(&mut self, attribute: &str, responder: F)
    where
        F: FnMut(&mut EntityGraph, EntityId) -> Result<Fetched, TransportError> + 'static,
    {
        self.responders
            .insert(attribute.to_string(), Box::new(responder));
    }

    pub fn calls(&self) -> &[TransportCall] {
        &self.calls
    }

    pub fn fetch_count(&self, entity: EntityId, attribute: &str) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, TransportCall::Fetch { entity: e, attribute: a } if *e == entity && a == attribute))
            .count()
    }

    fn record(&mut self, call: TransportCall) -> Result<(), TransportError> {
        let index = self.calls.len();
        trace!(index, call = ?call, "Transport call");
        if self.fail_on == Some(index) {
            self.fail_on = None;
            return Err(TransportError::Connection(format!(
                "simulated failure on call {}",
                index
            )));
        }
        self.calls.push(call);
        Ok(())
    }
}

fn attribute_names(template: &SaveTemplate) -> Vec<String> {
    template.names().map(String::from).collect()
}

impl Transport for MemoryTransport {
    fn create(
        &mut self,
        _graph: &EntityGraph,
        entity: EntityId,
        template: &SaveTemplate,
    ) -> Result<Value, TransportError> {
        self.record(TransportCall::Create {
            entity,
            attributes: attribute_names(template),
        })?;
        let identifier = self.next_identifier;
        self.next_identifier += 1;
        Ok(Value::Int(identifier))
    }

    fn update(
        &mut self,
        _graph: &EntityGraph,
        entity: EntityId,
        template: &SaveTemplate,
    ) -> Result<(), TransportError> {
        self.record(TransportCall::Update {
            entity,
            attributes: attribute_names(template),
        })
    }

    fn fetch(
        &mut self,
        graph: &mut EntityGraph,
        entity: EntityId,
        attribute: &str,
    ) -> Result<Fetched, TransportError> {
        self.record(TransportCall::Fetch {
            entity,
            attribute: attribute.to_string(),
        })?;
        if let Some(responder) = self.responders.get_mut(attribute) {
            return responder(graph, entity);
        }

        let (slot, property) = graph
            .property(entity, attribute)
            .map_err(|_| TransportError::not_found(graph.describe(entity)))?;
        if property.is_reference() {
            Ok(Fetched::Entities(graph.references_at(entity, slot).to_vec()))
        } else {
            Ok(Fetched::Value(graph.value_at(entity, slot).clone()))
        }
    }
}
