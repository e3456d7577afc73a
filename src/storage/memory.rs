//! In-memory document store backend.
//!
//! Namespaces and collections come into existence lazily on first write, the
//! way a document database creates databases on demand. Documents keep their
//! insertion order so queries are deterministic. Atomicity is per call: the
//! whole store sits behind one async `RwLock`, matching the per-document
//! atomicity the services are allowed to assume.

use std::collections::HashMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{Collection, DocumentId, Lookup, NotFound};

use super::{Filter, Projection, StorageError, StorageGateway};

type Documents = IndexMap<String, Value>;

#[derive(Default)]
struct Namespace {
    collections: HashMap<Collection, Documents>,
}

#[derive(Default)]
pub struct MemoryGateway {
    datasets: RwLock<HashMap<String, Namespace>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        MemoryGateway::default()
    }

    fn not_found(id: &DocumentId, collection: Collection) -> NotFound {
        NotFound::new(
            id.clone(),
            format!("no {} document with given id", collection),
        )
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    async fn create_document(
        &self,
        collection: Collection,
        dataset: &str,
        record: Value,
    ) -> Result<DocumentId, StorageError> {
        let Value::Object(mut fields) = record else {
            return Err(StorageError::NotAnObject { collection });
        };
        let id = Uuid::new_v4().to_string();
        fields.insert("id".to_string(), Value::String(id.clone()));

        let mut datasets = self.datasets.write().await;
        datasets
            .entry(dataset.to_string())
            .or_default()
            .collections
            .entry(collection)
            .or_default()
            .insert(id.clone(), Value::Object(fields));
        Ok(DocumentId(id))
    }

    async fn get_document(
        &self,
        id: &DocumentId,
        collection: Collection,
        dataset: &str,
        projection: Option<&Projection>,
    ) -> Result<Lookup<Value>, StorageError> {
        let datasets = self.datasets.read().await;
        let record = datasets
            .get(dataset)
            .and_then(|namespace| namespace.collections.get(&collection))
            .and_then(|documents| documents.get(id.as_str()));
        Ok(match record {
            Some(record) => Lookup::Found(match projection {
                Some(projection) => projection.apply(record),
                None => record.clone(),
            }),
            None => Lookup::Missing(Self::not_found(id, collection)),
        })
    }

    async fn get_documents(
        &self,
        collection: Collection,
        dataset: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Vec<Value>, StorageError> {
        let datasets = self.datasets.read().await;
        let Some(documents) = datasets
            .get(dataset)
            .and_then(|namespace| namespace.collections.get(&collection))
        else {
            return Ok(Vec::new());
        };
        Ok(documents
            .values()
            .filter(|record| filter.matches(record))
            .map(|record| match projection {
                Some(projection) => projection.apply(record),
                None => record.clone(),
            })
            .collect())
    }

    async fn update_document(
        &self,
        id: &DocumentId,
        collection: Collection,
        dataset: &str,
        record: Value,
    ) -> Result<(), StorageError> {
        self.update_document_raw(collection, id, record, dataset).await
    }

    async fn update_document_raw(
        &self,
        collection: Collection,
        id: &DocumentId,
        fields: Value,
        dataset: &str,
    ) -> Result<(), StorageError> {
        let Value::Object(mut fields) = fields else {
            return Err(StorageError::NotAnObject { collection });
        };
        // The stored id always wins over whatever the payload carries.
        fields.insert("id".to_string(), Value::String(id.0.clone()));

        let mut datasets = self.datasets.write().await;
        datasets
            .entry(dataset.to_string())
            .or_default()
            .collections
            .entry(collection)
            .or_default()
            .insert(id.0.clone(), Value::Object(fields));
        Ok(())
    }

    async fn delete_document(
        &self,
        id: &DocumentId,
        collection: Collection,
        dataset: &str,
    ) -> Result<(), StorageError> {
        let mut datasets = self.datasets.write().await;
        if let Some(documents) = datasets
            .get_mut(dataset)
            .and_then(|namespace| namespace.collections.get_mut(&collection))
        {
            documents.shift_remove(id.as_str());
        }
        Ok(())
    }

    async fn drop_dataset(&self, dataset: &str) -> Result<(), StorageError> {
        self.datasets.write().await.remove(dataset);
        Ok(())
    }
}
