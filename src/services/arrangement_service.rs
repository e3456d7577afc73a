use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::errors::StoreResult;
use crate::model::entities::Arrangement;
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

use super::activity_execution_service::ActivityExecutionService;
use super::entity_service::{record_id, Entity, EntityService, ExpandContext, RelationExpander};

impl Entity for Arrangement {
    const COLLECTION: Collection = Collection::Arrangement;
}

/// Handles arrangement requests.
pub struct ArrangementService {
    entity: EntityService<Arrangement>,
    gateway: Arc<dyn StorageGateway>,
}

impl ArrangementService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(ArrangementExpander {
            gateway: gateway.clone(),
        });
        ArrangementService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    pub async fn save<I>(&self, arrangement: &I, dataset: &str) -> StoreResult<Lookup<Arrangement>>
    where
        I: Serialize + Sync,
    {
        self.entity.create(arrangement, dataset).await
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
    ) -> StoreResult<Lookup<Arrangement>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    pub async fn update<I>(
        &self,
        id: &DocumentId,
        arrangement: &I,
        dataset: &str,
    ) -> StoreResult<Lookup<Arrangement>>
    where
        I: Serialize + Sync,
    {
        self.entity.update(id, arrangement, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Arrangement>> {
        self.entity.delete(id, dataset).await
    }
}

/// Adds the executions held in this arrangement, unless the request came from
/// one of them.
struct ArrangementExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for ArrangementExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        if ctx.source == Source::ActivityExecution {
            return Ok(Vec::new());
        }
        let Some(id) = record_id(record) else {
            return Ok(Vec::new());
        };

        let executions = ActivityExecutionService::new(self.gateway.clone())
            .get_many(
                ctx.dataset,
                &Filter::new().eq("arrangement_id", id.as_str()),
                ctx.depth - 1,
                Source::Arrangement,
            )
            .await?;
        Ok(vec![(
            Collection::ActivityExecution.as_str().to_string(),
            Value::Array(executions),
        )])
    }
}
