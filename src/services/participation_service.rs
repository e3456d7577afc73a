use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::Participation;
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

use super::activity_execution_service::ActivityExecutionService;
use super::entity_service::{Entity, EntityService, ExpandContext, RelationExpander};
use super::participant_state_service::ParticipantStateService;

impl Entity for Participation {
    const COLLECTION: Collection = Collection::Participation;
}

/// Handles participation requests. A participation links an activity execution
/// with a participant state; both sides are resolved on expansion.
pub struct ParticipationService {
    entity: EntityService<Participation>,
    gateway: Arc<dyn StorageGateway>,
}

impl ParticipationService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(ParticipationExpander {
            gateway: gateway.clone(),
        });
        ParticipationService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    fn executions(&self) -> ActivityExecutionService {
        ActivityExecutionService::new(self.gateway.clone())
    }

    pub async fn save<I>(&self, participation: &I, dataset: &str) -> StoreResult<Lookup<Participation>>
    where
        I: Serialize + Sync,
    {
        let record = serde_json::to_value(participation).map_err(|err| {
            StoreError::validation(format!("participation payload cannot be encoded: {err}"))
        })?;
        if let Some(execution_id) = record.get("activity_execution_id").and_then(Value::as_str) {
            let execution = self
                .executions()
                .get_one(&DocumentId::from(execution_id), dataset, 0, Source::Unset)
                .await?;
            if execution.is_missing() {
                return Err(StoreError::validation(
                    "given activity execution does not exist",
                ));
            }
        }
        if let Some(state_id) = record.get("participant_state_id").and_then(Value::as_str) {
            let state = ParticipantStateService::new(self.gateway.clone())
                .get_one(&DocumentId::from(state_id), dataset, 0, Source::Unset)
                .await?;
            if state.is_missing() {
                return Err(StoreError::validation(
                    "given participant state does not exist",
                ));
            }
        }
        self.entity.create(participation, dataset).await
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
    ) -> StoreResult<Lookup<Participation>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    pub async fn update<I>(
        &self,
        id: &DocumentId,
        participation: &I,
        dataset: &str,
    ) -> StoreResult<Lookup<Participation>>
    where
        I: Serialize + Sync,
    {
        self.entity.update(id, participation, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Participation>> {
        self.entity.delete(id, dataset).await
    }
}

/// Adds the referenced activity execution and participant state, each
/// suppressed when the request came from that side.
struct ParticipationExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for ParticipationExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        let mut related = Vec::new();

        if ctx.source != Source::ActivityExecution {
            if let Some(execution_id) = record.get("activity_execution_id").and_then(Value::as_str)
            {
                let execution = ActivityExecutionService::new(self.gateway.clone())
                    .get_one_dict(
                        &DocumentId::from(execution_id),
                        ctx.dataset,
                        ctx.depth - 1,
                        Source::Participation,
                    )
                    .await?;
                if let Lookup::Found(value) = execution {
                    related.push(("activity_execution".to_string(), value));
                }
            }
        }

        if ctx.source != Source::ParticipantState {
            if let Some(state_id) = record.get("participant_state_id").and_then(Value::as_str) {
                let state = ParticipantStateService::new(self.gateway.clone())
                    .get_one_dict(
                        &DocumentId::from(state_id),
                        ctx.dataset,
                        ctx.depth - 1,
                        Source::Participation,
                    )
                    .await?;
                if let Lookup::Found(value) = state {
                    related.push(("participant_state".to_string(), value));
                }
            }
        }

        Ok(related)
    }
}
