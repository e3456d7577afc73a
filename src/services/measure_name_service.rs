use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::errors::StoreResult;
use crate::model::entities::MeasureName;
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

use super::entity_service::{record_id, Entity, EntityService, ExpandContext, RelationExpander};
use super::measure_service::MeasureService;

impl Entity for MeasureName {
    const COLLECTION: Collection = Collection::MeasureName;
}

/// Handles measure name requests.
pub struct MeasureNameService {
    entity: EntityService<MeasureName>,
    gateway: Arc<dyn StorageGateway>,
}

impl MeasureNameService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(MeasureNameExpander {
            gateway: gateway.clone(),
        });
        MeasureNameService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    pub async fn save<I>(&self, measure_name: &I, dataset: &str) -> StoreResult<Lookup<MeasureName>>
    where
        I: Serialize + Sync,
    {
        self.entity.create(measure_name, dataset).await
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
    ) -> StoreResult<Lookup<MeasureName>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    pub async fn update<I>(
        &self,
        id: &DocumentId,
        measure_name: &I,
        dataset: &str,
    ) -> StoreResult<Lookup<MeasureName>>
    where
        I: Serialize + Sync,
    {
        self.entity.update(id, measure_name, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<MeasureName>> {
        self.entity.delete(id, dataset).await
    }
}

/// Adds the measures carrying this name (reverse foreign key), unless the
/// request came from a measure.
struct MeasureNameExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for MeasureNameExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        if ctx.source == Source::Measure {
            return Ok(Vec::new());
        }
        let Some(id) = record_id(record) else {
            return Ok(Vec::new());
        };

        let measures = MeasureService::new(self.gateway.clone())
            .get_many(
                ctx.dataset,
                &Filter::new().eq("measure_name_id", id.as_str()),
                ctx.depth - 1,
                Source::MeasureName,
            )
            .await?;
        Ok(vec![(
            Collection::Measure.as_str().to_string(),
            Value::Array(measures),
        )])
    }
}
