//! Typed entity models.
//!
//! Relation fields hold raw identifiers. Expanded relation objects are kept as
//! `serde_json::Value` because their nesting depends on the traversal depth of
//! the request that produced them; they are only present on records read with
//! depth > 0.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DocumentId;

/// Free-form key/value property attached to most entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub key: String,
    pub value: Value,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Property {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Registry entry describing one dataset namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: DocumentId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: DocumentId,
    pub experiment_name: String,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
    /// Executions of the scenario rooted at this experiment, attached on reads
    /// with depth > 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_executions: Option<Vec<Value>>,
}

/// Activity document; the physical owner of embedded execution records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: DocumentId,
    pub activity: String,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
    /// Embedded execution records (raw, or expanded when depth allows).
    #[serde(default)]
    pub activity_executions: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityExecution {
    pub id: DocumentId,
    #[serde(default)]
    pub activity_id: Option<DocumentId>,
    #[serde(default)]
    pub arrangement_id: Option<DocumentId>,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrangement: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participations: Option<Vec<Value>>,
}

/// Create payload for an activity execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityExecutionInput {
    #[serde(default)]
    pub activity_id: Option<DocumentId>,
    #[serde(default)]
    pub arrangement_id: Option<DocumentId>,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
}

/// Property patch for an activity execution; relations stay untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityExecutionPropertyPatch {
    #[serde(default)]
    pub additional_properties: Vec<Property>,
}

/// Relation patch for an activity execution. `activity_id` is mandatory on
/// this path; `arrangement_id` may be cleared by passing `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityExecutionRelationPatch {
    pub activity_id: DocumentId,
    #[serde(default)]
    pub arrangement_id: Option<DocumentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub id: DocumentId,
    pub arrangement_type: String,
    #[serde(default)]
    pub arrangement_distance: Option<String>,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_executions: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub id: DocumentId,
    #[serde(default)]
    pub activity_execution_id: Option<DocumentId>,
    #[serde(default)]
    pub participant_state_id: Option<DocumentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_execution: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_state: Option<Value>,
}

/// Participant document; the physical owner of embedded participant states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: DocumentId,
    pub name: String,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub sex: Option<String>,
    #[serde(default)]
    pub disorder: Option<String>,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
    /// Embedded state records (raw, or expanded when depth allows).
    #[serde(default)]
    pub participant_states: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub id: DocumentId,
    #[serde(default)]
    pub participant_id: Option<DocumentId>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub personality_ids: Option<Vec<DocumentId>>,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personalities: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participations: Option<Vec<Value>>,
}

/// Create payload for a participant state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStateInput {
    #[serde(default)]
    pub participant_id: Option<DocumentId>,
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub personality_ids: Option<Vec<DocumentId>>,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
}

/// Property patch for a participant state; relations stay untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStatePropertyPatch {
    #[serde(default)]
    pub age: Option<i64>,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
}

/// Relation patch for a participant state. The participant reference is
/// mandatory on this path; `personality_ids` may be cleared by passing `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantStateRelationPatch {
    pub participant_id: DocumentId,
    #[serde(default)]
    pub personality_ids: Option<Vec<DocumentId>>,
}

/// Trait inventory of a personality record. The two questionnaire shapes share
/// one collection; the stored fields tell them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PersonalityTraits {
    Panas {
        negative_affect: f64,
        positive_affect: f64,
    },
    BigFive {
        agreeableness: f64,
        conscientiousness: f64,
        extroversion: f64,
        neuroticism: f64,
        openness: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub id: DocumentId,
    #[serde(flatten)]
    pub traits: PersonalityTraits,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_states: Option<Vec<Value>>,
}

/// Scenario: an experiment entry point plus the ordered execution sequence.
///
/// The persisted form stores `activity_executions` as a list of raw ids; read
/// paths may rehydrate the same field into full execution objects, which is why
/// the element type is `Value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: DocumentId,
    #[serde(default)]
    pub experiment_id: Option<DocumentId>,
    #[serde(default)]
    pub activity_executions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInput {
    #[serde(default)]
    pub experiment_id: Option<DocumentId>,
    #[serde(default)]
    pub activity_executions: Vec<ActivityExecutionInput>,
}

/// Reorder request for a scenario sequence: move `execution_id` to the slot
/// right after `previous_id` (an execution id, or an experiment id meaning
/// "front of the sequence").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderChange {
    pub execution_id: DocumentId,
    pub previous_id: DocumentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub id: DocumentId,
    #[serde(default)]
    pub measure_name_id: Option<DocumentId>,
    pub datatype: String,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure_name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_series: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureInput {
    #[serde(default)]
    pub measure_name_id: Option<DocumentId>,
    pub datatype: String,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Property patch for a measure; the measure-name relation stays untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurePropertyPatch {
    pub datatype: String,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Relation patch for a measure; replaces the whole relation atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureRelationPatch {
    #[serde(default)]
    pub measure_name_id: Option<DocumentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureName {
    pub id: DocumentId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measures: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub id: DocumentId,
    #[serde(default)]
    pub measure_id: Option<DocumentId>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub additional_properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<Value>,
}
