//! Measure service: the simplest full instance of the expansion pattern, with
//! one forward relation (measure name) and one reverse relation (time series).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::{Measure, MeasureInput, MeasurePropertyPatch, MeasureRelationPatch};
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

use super::entity_service::{record_id, Entity, EntityService, ExpandContext, RelationExpander};
use super::measure_name_service::MeasureNameService;
use super::time_series_service::TimeSeriesService;

impl Entity for Measure {
    const COLLECTION: Collection = Collection::Measure;
}

/// Handles measure requests.
pub struct MeasureService {
    entity: EntityService<Measure>,
    gateway: Arc<dyn StorageGateway>,
}

impl MeasureService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(MeasureExpander {
            gateway: gateway.clone(),
        });
        MeasureService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    fn measure_names(&self) -> MeasureNameService {
        MeasureNameService::new(self.gateway.clone())
    }

    /// Creates a measure after checking that the referenced measure name
    /// exists. Nothing is persisted when the check fails.
    pub async fn save(&self, measure: &MeasureInput, dataset: &str) -> StoreResult<Lookup<Measure>> {
        self.check_measure_name(measure.measure_name_id.as_ref(), dataset)
            .await?;
        self.entity.create(measure, dataset).await
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
    ) -> StoreResult<Lookup<Measure>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    /// Property update: merges the patch over the fetched measure and replaces
    /// the document.
    pub async fn update(
        &self,
        id: &DocumentId,
        patch: &MeasurePropertyPatch,
        dataset: &str,
    ) -> StoreResult<Lookup<Measure>> {
        let mut existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(measure) => measure,
        };
        existing.datatype = patch.datatype.clone();
        existing.range = patch.range.clone();
        existing.unit = patch.unit.clone();
        self.entity.update(id, &existing, dataset).await
    }

    /// Relation update: re-validates the new measure-name target and replaces
    /// the full record, which allows clearing the relation atomically.
    pub async fn update_relationships(
        &self,
        id: &DocumentId,
        patch: &MeasureRelationPatch,
        dataset: &str,
    ) -> StoreResult<Lookup<Measure>> {
        let mut existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(measure) => measure,
        };
        self.check_measure_name(patch.measure_name_id.as_ref(), dataset)
            .await?;
        existing.measure_name_id = patch.measure_name_id.clone();
        self.entity.update(id, &existing, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Measure>> {
        self.entity.delete(id, dataset).await
    }

    async fn check_measure_name(
        &self,
        measure_name_id: Option<&DocumentId>,
        dataset: &str,
    ) -> StoreResult<()> {
        let Some(measure_name_id) = measure_name_id else {
            return Ok(());
        };
        let measure_name = self
            .measure_names()
            .get_one(measure_name_id, dataset, 0, Source::Unset)
            .await?;
        if measure_name.is_missing() {
            return Err(StoreError::validation("given measure name does not exist"));
        }
        Ok(())
    }
}

/// Adds the time series pointing at this measure (reverse foreign key) and the
/// measure name object (forward foreign key, only when set), each gated on the
/// incoming direction.
struct MeasureExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for MeasureExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        let mut related = Vec::new();
        let Some(id) = record_id(record) else {
            return Ok(related);
        };

        if ctx.source != Source::TimeSeries {
            let time_series = TimeSeriesService::new(self.gateway.clone())
                .get_many(
                    ctx.dataset,
                    &Filter::new().eq("measure_id", id.as_str()),
                    ctx.depth - 1,
                    Source::Measure,
                )
                .await?;
            related.push((
                Collection::TimeSeries.as_str().to_string(),
                Value::Array(time_series),
            ));
        }

        let measure_name_id = record.get("measure_name_id").and_then(Value::as_str);
        if ctx.source != Source::MeasureName {
            if let Some(measure_name_id) = measure_name_id {
                let measure_name = MeasureNameService::new(self.gateway.clone())
                    .get_one_dict(
                        &DocumentId::from(measure_name_id),
                        ctx.dataset,
                        ctx.depth - 1,
                        Source::Measure,
                    )
                    .await?;
                if let Lookup::Found(value) = measure_name {
                    related.push(("measure_name".to_string(), value));
                }
            }
        }
        Ok(related)
    }
}
