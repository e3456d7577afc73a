//! Personality service. Two questionnaire shapes (PANAS and Big Five) share
//! one collection; every trait value lives on the unit interval.

use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::{Personality, PersonalityTraits};
use crate::model::{Collection, DocumentId, Lookup, NotFound, Source};
use crate::storage::{Filter, StorageGateway};

use super::entity_service::{record_id, Entity, EntityService, ExpandContext, RelationExpander};
use super::participant_state_service::ParticipantStateService;

impl Entity for Personality {
    const COLLECTION: Collection = Collection::Personality;
}

/// Handles personality requests.
pub struct PersonalityService {
    entity: EntityService<Personality>,
    gateway: Arc<dyn StorageGateway>,
}

impl PersonalityService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(PersonalityExpander {
            gateway: gateway.clone(),
        });
        PersonalityService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    pub async fn save(
        &self,
        traits: &PersonalityTraits,
        dataset: &str,
    ) -> StoreResult<Lookup<Personality>> {
        check_unit_interval(traits)?;
        self.entity.create(traits, dataset).await
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

    pub async fn get_one_dict(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<Value>> {
        self.entity.get_one_dict(id, dataset, depth, source).await
    }

    pub async fn get_one(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<Personality>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    /// Full replace of the trait values. The new traits must come from the
    /// same questionnaire as the stored record; a mismatch resolves like a
    /// lookup against a record that does not exist.
    pub async fn update(
        &self,
        id: &DocumentId,
        traits: &PersonalityTraits,
        dataset: &str,
    ) -> StoreResult<Lookup<Personality>> {
        check_unit_interval(traits)?;
        let existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(personality) => personality,
        };
        if mem::discriminant(&existing.traits) != mem::discriminant(traits) {
            return Ok(Lookup::Missing(NotFound::new(
                id.clone(),
                "no personality of this questionnaire with given id",
            )));
        }
        self.entity.update(id, traits, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Personality>> {
        self.entity.delete(id, dataset).await
    }
}

fn check_unit_interval(traits: &PersonalityTraits) -> StoreResult<()> {
    let values = match traits {
        PersonalityTraits::Panas {
            negative_affect,
            positive_affect,
        } => vec![*negative_affect, *positive_affect],
        PersonalityTraits::BigFive {
            agreeableness,
            conscientiousness,
            extroversion,
            neuroticism,
            openness,
        } => vec![
            *agreeableness,
            *conscientiousness,
            *extroversion,
            *neuroticism,
            *openness,
        ],
    };
    if values.iter().any(|value| !(0.0..=1.0).contains(value)) {
        return Err(StoreError::validation(
            "personality trait values must be between 0 and 1",
        ));
    }
    Ok(())
}

/// Adds the participant states listing this personality (reverse id-list
/// membership), unless the request came from a state.
struct PersonalityExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for PersonalityExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        if ctx.source == Source::ParticipantState {
            return Ok(Vec::new());
        }
        let Some(id) = record_id(record) else {
            return Ok(Vec::new());
        };

        let states = ParticipantStateService::new(self.gateway.clone())
            .get_many(
                ctx.dataset,
                &Filter::new().eq("personality_ids", id.as_str()),
                ctx.depth - 1,
                Source::Personality,
            )
            .await?;
        Ok(vec![(
            Collection::ParticipantState.as_str().to_string(),
            Value::Array(states),
        )])
    }
}
