//! Participant service: owner of the embedded participant-state records.
//!
//! Like activity executions, participant states are not a top-level
//! collection; they live as an array inside their participant document, and
//! every physical manipulation of that array happens here.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::{Participant, ParticipantState, ParticipantStateInput};
use crate::model::{Collection, DocumentId, Lookup, NotFound, Source};
use crate::storage::{Filter, Projection, StorageGateway};

use super::entity_service::{Entity, EntityService, ExpandContext, RelationExpander};
use super::participant_state_service::ParticipantStateService;

/// Embedded array field on participant documents.
pub const STATES_FIELD: &str = "participant_states";

impl Entity for Participant {
    const COLLECTION: Collection = Collection::Participant;
}

/// Handles participant requests and the embedded state array.
pub struct ParticipantService {
    entity: EntityService<Participant>,
    gateway: Arc<dyn StorageGateway>,
}

impl ParticipantService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(ParticipantExpander {
            gateway: gateway.clone(),
        });
        ParticipantService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    pub async fn save<I>(&self, participant: &I, dataset: &str) -> StoreResult<Lookup<Participant>>
    where
        I: Serialize + Sync,
    {
        self.entity.create(participant, dataset).await
    }

    pub async fn get_many(
        &self,
        dataset: &str,
        filter: &Filter,
        depth: i64,
        source: Source,
    ) -> StoreResult<Vec<Value>> {
        self.entity.get_many(dataset, filter, depth, source).await
    }

    /// Filtered fetch with a storage-side projection, used by the state
    /// service to pull single embedded elements plus minimal owning context.
    pub async fn get_many_projected(
        &self,
        dataset: &str,
        filter: &Filter,
        depth: i64,
        source: Source,
        projection: &Projection,
    ) -> StoreResult<Vec<Value>> {
        let records = self
            .gateway
            .get_documents(Collection::Participant, dataset, filter, Some(projection))
            .await?;
        let mut expanded = Vec::with_capacity(records.len());
        for record in records {
            let ctx = ExpandContext::new(dataset, depth, source);
            match self.entity.expand(record.clone(), ctx).await {
                Ok(view) => expanded.push(view),
                Err(err) => {
                    warn!(error = %err, "participant expansion failed; returning raw record");
                    expanded.push(record);
                }
            }
        }
        Ok(expanded)
    }

    pub async fn get_one(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<Participant>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    /// Full replace of the participant's own fields. The embedded state array
    /// is carried over from the stored document; it only changes through the
    /// state operations below.
    pub async fn update<I>(
        &self,
        id: &DocumentId,
        participant: &I,
        dataset: &str,
    ) -> StoreResult<Lookup<Participant>>
    where
        I: Serialize + Sync,
    {
        let existing = match self
            .gateway
            .get_document(id, Collection::Participant, dataset, None)
            .await?
        {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => record,
        };
        let mut record = serde_json::to_value(participant).map_err(|err| {
            StoreError::validation(format!("participant payload cannot be encoded: {err}"))
        })?;
        if let (Some(fields), Some(states)) =
            (record.as_object_mut(), existing.get(STATES_FIELD))
        {
            fields.insert(STATES_FIELD.to_string(), states.clone());
        }
        self.entity.update(id, &record, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Participant>> {
        self.entity.delete(id, dataset).await
    }

    /// Appends a new state record to its owning participant's embedded array.
    pub async fn add_state(
        &self,
        input: &ParticipantStateInput,
        dataset: &str,
    ) -> StoreResult<Lookup<ParticipantState>> {
        let Some(participant_id) = input.participant_id.as_ref() else {
            return Err(StoreError::validation(
                "participant state requires an owning participant",
            ));
        };
        let mut participant = match self
            .gateway
            .get_document(participant_id, Collection::Participant, dataset, None)
            .await?
        {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => record,
        };

        let mut element = serde_json::to_value(input).map_err(|err| {
            StoreError::validation(format!("state payload cannot be encoded: {err}"))
        })?;
        let state_id = Uuid::new_v4().to_string();
        if let Some(fields) = element.as_object_mut() {
            fields.insert("id".to_string(), Value::String(state_id.clone()));
        }

        states_mut(&mut participant)?.push(element.clone());
        self.gateway
            .update_document_raw(Collection::Participant, participant_id, participant, dataset)
            .await?;
        Ok(Lookup::Found(parse_state(&state_id, element)?))
    }

    /// Replaces the embedded state with the given item id, wherever it is
    /// embedded.
    pub async fn update_state(
        &self,
        state_id: &DocumentId,
        mut fields: Value,
        dataset: &str,
    ) -> StoreResult<Lookup<ParticipantState>> {
        let Some((participant_id, mut participant)) =
            self.owning_participant(state_id, dataset).await?
        else {
            return Ok(Lookup::Missing(state_not_found(state_id)));
        };

        if let Some(map) = fields.as_object_mut() {
            map.insert("id".to_string(), Value::String(state_id.0.clone()));
        }
        let elements = states_mut(&mut participant)?;
        let Some(slot) = elements
            .iter_mut()
            .find(|element| element.get("id").and_then(Value::as_str) == Some(state_id.as_str()))
        else {
            return Ok(Lookup::Missing(state_not_found(state_id)));
        };
        *slot = fields.clone();

        self.gateway
            .update_document_raw(Collection::Participant, &participant_id, participant, dataset)
            .await?;
        Ok(Lookup::Found(parse_state(state_id.as_str(), fields)?))
    }

    /// Removes the embedded state and returns the detached record.
    pub async fn remove_state(
        &self,
        state_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Lookup<ParticipantState>> {
        let Some((participant_id, mut participant)) =
            self.owning_participant(state_id, dataset).await?
        else {
            return Ok(Lookup::Missing(state_not_found(state_id)));
        };

        let elements = states_mut(&mut participant)?;
        let Some(position) = elements
            .iter()
            .position(|element| element.get("id").and_then(Value::as_str) == Some(state_id.as_str()))
        else {
            return Ok(Lookup::Missing(state_not_found(state_id)));
        };
        let detached = elements.remove(position);

        self.gateway
            .update_document_raw(Collection::Participant, &participant_id, participant, dataset)
            .await?;
        Ok(Lookup::Found(parse_state(state_id.as_str(), detached)?))
    }

    async fn owning_participant(
        &self,
        state_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Option<(DocumentId, Value)>> {
        let filter = Filter::new().eq(format!("{STATES_FIELD}.id"), state_id.as_str());
        let mut participants = self
            .gateway
            .get_documents(Collection::Participant, dataset, &filter, None)
            .await?;
        if participants.is_empty() {
            return Ok(None);
        }
        let participant = participants.remove(0);
        let Some(participant_id) = participant.get("id").and_then(Value::as_str) else {
            return Ok(None);
        };
        Ok(Some((DocumentId::from(participant_id), participant)))
    }
}

fn state_not_found(id: &DocumentId) -> NotFound {
    NotFound::new(id.clone(), "participant state not found")
}

fn states_mut(participant: &mut Value) -> StoreResult<&mut Vec<Value>> {
    let fields = participant
        .as_object_mut()
        .ok_or_else(|| StoreError::validation("participant record is not an object"))?;
    let entry = fields
        .entry(STATES_FIELD.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    entry
        .as_array_mut()
        .ok_or_else(|| StoreError::validation("participant states field is not an array"))
}

fn parse_state(id: &str, element: Value) -> StoreResult<ParticipantState> {
    serde_json::from_value(element).map_err(|source| StoreError::Malformed {
        collection: Collection::ParticipantState,
        id: id.to_string(),
        source,
    })
}

/// Expands each embedded state's relations. Skipped entirely when the request
/// arrived by lifting one of those states, since the caller is about to do its
/// own expansion.
struct ParticipantExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for ParticipantExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        if ctx.source == Source::ParticipantState {
            return Ok(Vec::new());
        }
        let Some(Value::Array(elements)) = record.get(STATES_FIELD) else {
            return Ok(Vec::new());
        };

        let states = ParticipantStateService::new(self.gateway.clone());
        let mut expanded = Vec::with_capacity(elements.len());
        for element in elements {
            let view = states
                .expand_state(
                    element.clone(),
                    ExpandContext::new(ctx.dataset, ctx.depth - 1, Source::Participant),
                    None,
                )
                .await?;
            expanded.push(view);
        }
        Ok(vec![(STATES_FIELD.to_string(), Value::Array(expanded))])
    }
}
