use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::errors::StoreResult;
use crate::model::entities::Experiment;
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

use super::entity_service::{record_id, Entity, EntityService, ExpandContext, RelationExpander};
use super::scenario_service::ScenarioService;

impl Entity for Experiment {
    const COLLECTION: Collection = Collection::Experiment;
}

/// Handles experiment requests.
pub struct ExperimentService {
    entity: EntityService<Experiment>,
    gateway: Arc<dyn StorageGateway>,
}

impl ExperimentService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(ExperimentExpander {
            gateway: gateway.clone(),
        });
        ExperimentService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    pub async fn save<I>(&self, experiment: &I, dataset: &str) -> StoreResult<Lookup<Experiment>>
    where
        I: Serialize + Sync,
    {
        self.entity.create(experiment, dataset).await
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
    ) -> StoreResult<Lookup<Experiment>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    pub async fn update<I>(
        &self,
        id: &DocumentId,
        experiment: &I,
        dataset: &str,
    ) -> StoreResult<Lookup<Experiment>>
    where
        I: Serialize + Sync,
    {
        self.entity.update(id, experiment, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Experiment>> {
        self.entity.delete(id, dataset).await
    }
}

/// Attaches the execution sequence of the scenario rooted at this experiment.
/// Suppressed when the request arrived from the scenario side or from an
/// execution, both of which already hold that sequence.
struct ExperimentExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for ExperimentExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        if ctx.source == Source::ActivityExecution || ctx.source == Source::Scenario {
            return Ok(Vec::new());
        }
        let Some(id) = record_id(record) else {
            return Ok(Vec::new());
        };

        let scenario = ScenarioService::new(self.gateway.clone())
            .get_by_experiment(&id, ctx.dataset, ctx.depth)
            .await?;
        Ok(match scenario {
            Lookup::Found(scenario) => vec![(
                Collection::ActivityExecution.as_str().to_string(),
                Value::Array(scenario.activity_executions),
            )],
            Lookup::Missing(_) => Vec::new(),
        })
    }
}
