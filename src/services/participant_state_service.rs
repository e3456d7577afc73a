//! Participant state service.
//!
//! States sit one layer below participant documents in storage, so every read
//! translates state filters into filters on the owning participant's embedded
//! array, and single-entity reads lift exactly one matched element out of its
//! parent. Relations: personalities (forward id list), participations
//! (reverse) and the owning participant itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::{
    ParticipantState, ParticipantStateInput, ParticipantStatePropertyPatch,
    ParticipantStateRelationPatch,
};
use crate::model::{Collection, DocumentId, Lookup, NotFound, Source};
use crate::storage::{Filter, Projection, StorageGateway};

use super::entity_service::{merged, record_id, ExpandContext, RelationExpander};
use super::participant_service::{ParticipantService, STATES_FIELD};
use super::participation_service::ParticipationService;
use super::personality_service::PersonalityService;

/// Participant fields carried alongside a lifted state element.
const PARTICIPANT_FIELDS: [&str; 5] = ["name", "date_of_birth", "sex", "disorder", "additional_properties"];

pub struct ParticipantStateService {
    gateway: Arc<dyn StorageGateway>,
    expander: Arc<dyn RelationExpander>,
}

impl ParticipantStateService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(ParticipantStateExpander {
            gateway: gateway.clone(),
        });
        ParticipantStateService { gateway, expander }
    }

    fn participants(&self) -> ParticipantService {
        ParticipantService::new(self.gateway.clone())
    }

    fn personalities(&self) -> PersonalityService {
        PersonalityService::new(self.gateway.clone())
    }

    /// Creates a state after checking that the referenced participant and all
    /// listed personalities exist; delegates the physical insert to the
    /// participant service's embedded-array path.
    pub async fn save(
        &self,
        input: &ParticipantStateInput,
        dataset: &str,
    ) -> StoreResult<Lookup<ParticipantState>> {
        if let Some(participant_id) = input.participant_id.as_ref() {
            let participant = self
                .participants()
                .get_one(participant_id, dataset, 0, Source::Unset)
                .await?;
            if participant.is_missing() {
                return Err(StoreError::validation("given participant does not exist"));
            }
        }
        self.check_personalities(input.personality_ids.as_deref(), dataset)
            .await?;
        self.participants().add_state(input, dataset).await
    }

    /// Filtered fetch. The filter is rewritten onto the owning participant's
    /// embedded array; matching elements are lifted out and expanded
    /// individually, each carrying its (already expanded) parent participant.
    pub async fn get_many(
        &self,
        dataset: &str,
        filter: &Filter,
        depth: i64,
        source: Source,
    ) -> StoreResult<Vec<Value>> {
        let participant_filter = filter.prefixed(STATES_FIELD);
        let projection = participant_projection(filter);
        let participants = self
            .participants()
            .get_many_projected(
                dataset,
                &participant_filter,
                depth - 1,
                Source::ParticipantState,
                &projection,
            )
            .await?;

        let mut states = Vec::new();
        for mut participant in participants {
            let Some(elements) = take_states(&mut participant) else {
                continue;
            };
            for element in elements {
                let ctx = ExpandContext::new(dataset, depth, source);
                match self.expand_state(element.clone(), ctx, Some(&participant)).await {
                    Ok(view) => states.push(view),
                    Err(err) => {
                        warn!(error = %err, "state expansion failed; returning raw element");
                        states.push(element);
                    }
                }
            }
        }
        Ok(states)
    }

    /// By-id fetch in raw-record form: elem-match projection against the
    /// embedding array, then lift the single matched element and merge in its
    /// relations.
    pub async fn get_one_dict(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<Value>> {
        let filter = Filter::new().eq(format!("{STATES_FIELD}.id"), id.as_str());
        let projection = Projection::include(PARTICIPANT_FIELDS)
            .with_elem_match(STATES_FIELD, Filter::new().eq("id", id.as_str()));
        let mut participants = self
            .participants()
            .get_many_projected(
                dataset,
                &filter,
                depth - 1,
                Source::ParticipantState,
                &projection,
            )
            .await?;

        if participants.is_empty() {
            return Ok(Lookup::Missing(NotFound::new(
                id.clone(),
                "participant state not found",
            )));
        }
        let mut participant = participants.remove(0);
        let element = take_states(&mut participant).and_then(|mut elements| {
            if elements.is_empty() {
                None
            } else {
                Some(elements.remove(0))
            }
        });
        let Some(element) = element else {
            return Ok(Lookup::Missing(NotFound::new(
                id.clone(),
                "participant state not found",
            )));
        };

        let ctx = ExpandContext::new(dataset, depth, source);
        let view = self.expand_state(element, ctx, Some(&participant)).await?;
        Ok(Lookup::Found(view))
    }

    pub async fn get_one(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<ParticipantState>> {
        match self.get_one_dict(id, dataset, depth, source).await? {
            Lookup::Missing(not_found) => Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => {
                let state =
                    serde_json::from_value(record).map_err(|source| StoreError::Malformed {
                        collection: Collection::ParticipantState,
                        id: id.to_string(),
                        source,
                    })?;
                Ok(Lookup::Found(state))
            }
        }
    }

    /// Property update: merges the patch over the fetched state and rewrites
    /// the embedded element.
    pub async fn update(
        &self,
        id: &DocumentId,
        patch: &ParticipantStatePropertyPatch,
        dataset: &str,
    ) -> StoreResult<Lookup<ParticipantState>> {
        let mut existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(state) => state,
        };
        existing.age = patch.age;
        existing.additional_properties = patch.additional_properties.clone();
        let fields = encode_state(&existing)?;
        self.participants().update_state(id, fields, dataset).await
    }

    /// Relation update: re-validates the new targets. The participant
    /// reference is mandatory on this path; personalities are checked only
    /// when a list was supplied.
    pub async fn update_relationships(
        &self,
        id: &DocumentId,
        patch: &ParticipantStateRelationPatch,
        dataset: &str,
    ) -> StoreResult<Lookup<ParticipantState>> {
        let mut existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(state) => state,
        };

        let participant = self
            .participants()
            .get_one(&patch.participant_id, dataset, 0, Source::Unset)
            .await?;
        if participant.is_missing() {
            return Err(StoreError::validation("given participant does not exist"));
        }
        self.check_personalities(patch.personality_ids.as_deref(), dataset)
            .await?;

        existing.participant_id = Some(patch.participant_id.clone());
        existing.personality_ids = patch.personality_ids.clone();
        let fields = encode_state(&existing)?;
        self.participants().update_state(id, fields, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<ParticipantState>> {
        match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => Ok(Lookup::Missing(not_found)),
            Lookup::Found(_) => self.participants().remove_state(id, dataset).await,
        }
    }

    /// Every listed personality must resolve; the check fetches them in one
    /// id-membership query and compares counts.
    async fn check_personalities(
        &self,
        personality_ids: Option<&[DocumentId]>,
        dataset: &str,
    ) -> StoreResult<()> {
        let Some(ids) = personality_ids else {
            return Ok(());
        };
        let existing = self
            .personalities()
            .get_many(dataset, &Filter::id_in(ids), 0, Source::Unset)
            .await?;
        if existing.len() != ids.len() {
            return Err(StoreError::validation(
                "one of given personalities does not exist",
            ));
        }
        Ok(())
    }

    /// Builds the expanded view of one lifted state element. The owning
    /// participant, when present, is passed through from the surrounding query
    /// rather than re-fetched; it is attached unless the request arrived from
    /// the participant side.
    pub(crate) async fn expand_state(
        &self,
        element: Value,
        ctx: ExpandContext<'_>,
        participant: Option<&Value>,
    ) -> StoreResult<Value> {
        if ctx.depth <= 0 {
            return Ok(element);
        }
        let related = self.expander.related(&element, ctx).await?;
        let mut view = merged(element, related);
        if ctx.source != Source::Participant {
            if let (Some(participant), Value::Object(fields)) = (participant, &mut view) {
                fields.insert("participant".to_string(), participant.clone());
            }
        }
        Ok(view)
    }
}

fn participant_projection(filter: &Filter) -> Projection {
    if filter.is_empty() {
        let mut fields = PARTICIPANT_FIELDS.to_vec();
        fields.push(STATES_FIELD);
        Projection::include(fields)
    } else {
        Projection::include(PARTICIPANT_FIELDS).with_elem_match(STATES_FIELD, filter.clone())
    }
}

fn take_states(participant: &mut Value) -> Option<Vec<Value>> {
    match participant.as_object_mut()?.remove(STATES_FIELD)? {
        Value::Array(elements) => Some(elements),
        _ => None,
    }
}

fn encode_state(state: &ParticipantState) -> StoreResult<Value> {
    serde_json::to_value(state)
        .map_err(|err| StoreError::validation(format!("state payload cannot be encoded: {err}")))
}

/// Relation graph of a state: its personalities and the participations
/// referencing it. The owning participant is handled by `expand_state` since
/// it is passed through, not fetched.
struct ParticipantStateExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for ParticipantStateExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        let mut related = Vec::new();
        let Some(id) = record_id(record) else {
            return Ok(related);
        };

        if ctx.source != Source::Personality {
            if let Some(ids) = personality_ids(record) {
                let personalities = PersonalityService::new(self.gateway.clone())
                    .get_many(
                        ctx.dataset,
                        &Filter::id_in(&ids),
                        ctx.depth - 1,
                        Source::ParticipantState,
                    )
                    .await?;
                related.push(("personalities".to_string(), Value::Array(personalities)));
            }
        }

        if ctx.source != Source::Participation {
            let participations = ParticipationService::new(self.gateway.clone())
                .get_many(
                    ctx.dataset,
                    &Filter::new().eq("participant_state_id", id.as_str()),
                    ctx.depth - 1,
                    Source::ParticipantState,
                )
                .await?;
            related.push(("participations".to_string(), Value::Array(participations)));
        }

        Ok(related)
    }
}

fn personality_ids(record: &Value) -> Option<Vec<DocumentId>> {
    match record.get("personality_ids")? {
        Value::Array(ids) => Some(
            ids.iter()
                .filter_map(Value::as_str)
                .map(DocumentId::from)
                .collect(),
        ),
        _ => None,
    }
}
