//! Core vocabulary of the store: identifiers, collection names, traversal
//! direction tags and the not-found sentinel.
//!
//! Collection names are storage-facing (they name where documents live), while
//! [`Source`] is traversal-facing (it names the relation an expansion request
//! arrived through). The two are kept as separate types even though several
//! variants line up one-to-one.

pub mod entities;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage-assigned document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        DocumentId(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        DocumentId(value)
    }
}

/// Top-level collections of a dataset namespace.
///
/// `ActivityExecution` is listed here even though execution records are
/// physically embedded inside activity documents; its `as_str` form doubles as
/// the embedded array field name on the activity document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Dataset,
    Experiment,
    Scenario,
    Activity,
    ActivityExecution,
    Arrangement,
    Participant,
    ParticipantState,
    Participation,
    Personality,
    Measure,
    MeasureName,
    TimeSeries,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Dataset => "datasets",
            Collection::Experiment => "experiments",
            Collection::Scenario => "scenarios",
            Collection::Activity => "activities",
            Collection::ActivityExecution => "activity_executions",
            Collection::Arrangement => "arrangements",
            Collection::Participant => "participants",
            Collection::ParticipantState => "participant_states",
            Collection::Participation => "participations",
            Collection::Personality => "personalities",
            Collection::Measure => "measures",
            Collection::MeasureName => "measure_names",
            Collection::TimeSeries => "time_series",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The relation a recursive expansion call arrived through.
///
/// Expanders must never re-traverse the relation matching the incoming source;
/// this suppresses immediate bounce-back cycles. Longer cycles are bounded by
/// depth exhaustion only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Source {
    #[default]
    Unset,
    Experiment,
    Scenario,
    Activity,
    ActivityExecution,
    Arrangement,
    Participant,
    ParticipantState,
    Participation,
    Personality,
    Measure,
    MeasureName,
    TimeSeries,
}

/// Sentinel describing a lookup that resolved to nothing.
///
/// This is a value, not an error: a missing referenced document is a normal
/// outcome surfaced to callers, distinct from an empty or unset relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFound {
    pub id: Option<DocumentId>,
    pub message: String,
}

impl NotFound {
    pub fn new(id: impl Into<DocumentId>, message: impl Into<String>) -> Self {
        NotFound {
            id: Some(id.into()),
            message: message.into(),
        }
    }

}

/// Tagged outcome of a by-id fetch: either the entity or the [`NotFound`]
/// sentinel. Branching happens by pattern matching, never by inspecting the
/// payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    Missing(NotFound),
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Missing(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::Missing(not_found) => Lookup::Missing(not_found),
        }
    }
}
