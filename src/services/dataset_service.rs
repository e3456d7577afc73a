use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::errors::StoreResult;
use crate::model::entities::DatasetRecord;
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

use super::entity_service::{Entity, EntityService, NoExpansion};

impl Entity for DatasetRecord {
    const COLLECTION: Collection = Collection::Dataset;
}

/// Manages the dataset registry. Registry entries live in a reserved
/// namespace; the namespaces they describe are created lazily by the storage
/// backend on first write.
pub struct DatasetService {
    entity: EntityService<DatasetRecord>,
    gateway: Arc<dyn StorageGateway>,
    registry: String,
}

impl DatasetService {
    pub fn new(gateway: Arc<dyn StorageGateway>, registry: impl Into<String>) -> Self {
        DatasetService {
            entity: EntityService::new(gateway.clone(), Arc::new(NoExpansion)),
            gateway,
            registry: registry.into(),
        }
    }

    pub async fn save(&self, name: &str) -> StoreResult<Lookup<DatasetRecord>> {
        info!(dataset = name, "registering dataset");
        self.entity
            .create(&serde_json::json!({ "name": name }), &self.registry)
            .await
    }

    pub async fn get_many(&self) -> StoreResult<Vec<Value>> {
        self.entity
            .get_many(&self.registry, &Filter::new(), 0, Source::Unset)
            .await
    }

    pub async fn get_one(&self, id: &DocumentId) -> StoreResult<Lookup<DatasetRecord>> {
        self.entity.get_one(id, &self.registry, 0, Source::Unset).await
    }

    /// Unregisters the dataset and drops its namespace contents.
    pub async fn delete(&self, id: &DocumentId) -> StoreResult<Lookup<DatasetRecord>> {
        let deleted = self.entity.delete(id, &self.registry).await?;
        if let Lookup::Found(record) = &deleted {
            info!(dataset = %record.name, "dropping dataset namespace");
            self.gateway.drop_dataset(&record.name).await?;
        }
        Ok(deleted)
    }
}
