use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::TimeSeries;
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

use super::entity_service::{Entity, EntityService, ExpandContext, RelationExpander};
use super::measure_service::MeasureService;

impl Entity for TimeSeries {
    const COLLECTION: Collection = Collection::TimeSeries;
}

/// Handles time series requests.
pub struct TimeSeriesService {
    entity: EntityService<TimeSeries>,
    gateway: Arc<dyn StorageGateway>,
}

impl TimeSeriesService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(TimeSeriesExpander {
            gateway: gateway.clone(),
        });
        TimeSeriesService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    fn measures(&self) -> MeasureService {
        MeasureService::new(self.gateway.clone())
    }

    pub async fn save<I>(&self, time_series: &I, dataset: &str) -> StoreResult<Lookup<TimeSeries>>
    where
        I: Serialize + Sync,
    {
        let record = serde_json::to_value(time_series).map_err(|err| {
            StoreError::validation(format!("time series payload cannot be encoded: {err}"))
        })?;
        if let Some(measure_id) = record.get("measure_id").and_then(Value::as_str) {
            let measure = self
                .measures()
                .get_one(&DocumentId::from(measure_id), dataset, 0, Source::Unset)
                .await?;
            if measure.is_missing() {
                return Err(StoreError::validation("given measure does not exist"));
            }
        }
        self.entity.create(time_series, dataset).await
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
    ) -> StoreResult<Lookup<TimeSeries>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    pub async fn update<I>(
        &self,
        id: &DocumentId,
        time_series: &I,
        dataset: &str,
    ) -> StoreResult<Lookup<TimeSeries>>
    where
        I: Serialize + Sync,
    {
        self.entity.update(id, time_series, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<TimeSeries>> {
        self.entity.delete(id, dataset).await
    }
}

/// Adds the owning measure (forward foreign key), unless the request came from
/// the measure side.
struct TimeSeriesExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for TimeSeriesExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        if ctx.source == Source::Measure {
            return Ok(Vec::new());
        }
        let Some(measure_id) = record.get("measure_id").and_then(Value::as_str) else {
            return Ok(Vec::new());
        };

        let measure = MeasureService::new(self.gateway.clone())
            .get_one_dict(
                &DocumentId::from(measure_id),
                ctx.dataset,
                ctx.depth - 1,
                Source::TimeSeries,
            )
            .await?;
        Ok(match measure {
            Lookup::Found(value) => vec![("measure".to_string(), value)],
            Lookup::Missing(_) => Vec::new(),
        })
    }
}
