//! Generic entity service: CRUD against one collection plus the depth-bounded
//! relation expansion engine.
//!
//! Entity-specific services wrap an [`EntityService`] and inject a
//! [`RelationExpander`] describing their relation graph. The engine owns the
//! traversal rules: expansion is a no-op at depth <= 0, every hop into a
//! related entity costs exactly one unit of depth, and the relation matching
//! the incoming [`Source`] is never re-traversed.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{StoreError, StoreResult};
use crate::model::{Collection, DocumentId, Lookup, Source};
use crate::storage::{Filter, StorageGateway};

/// Typed out-model bound to its backing collection.
pub trait Entity: DeserializeOwned + Serialize + Send + Sync {
    const COLLECTION: Collection;
}

/// Scope of one expansion step.
#[derive(Debug, Clone, Copy)]
pub struct ExpandContext<'a> {
    pub dataset: &'a str,
    pub depth: i64,
    pub source: Source,
}

impl<'a> ExpandContext<'a> {
    pub fn new(dataset: &'a str, depth: i64, source: Source) -> Self {
        ExpandContext {
            dataset,
            depth,
            source,
        }
    }
}

/// Relation-resolution strategy injected per entity kind.
///
/// Implementations return the resolved relation objects as `(field, value)`
/// pairs; the engine merges them over the raw record to build the expanded
/// view. They must honor the incoming `ctx.source` and fetch related entities
/// at `ctx.depth - 1`.
#[async_trait]
pub trait RelationExpander: Send + Sync {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>>;
}

/// Expander for entities with nothing to expand.
pub struct NoExpansion;

#[async_trait]
impl RelationExpander for NoExpansion {
    async fn related(
        &self,
        _record: &Value,
        _ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        Ok(Vec::new())
    }
}

/// Builds the expanded view: the raw record with resolved relation objects
/// merged in. Non-object records pass through untouched.
pub fn merged(record: Value, related: Vec<(String, Value)>) -> Value {
    match record {
        Value::Object(mut fields) => {
            for (field, value) in related {
                fields.insert(field, value);
            }
            Value::Object(fields)
        }
        other => other,
    }
}

/// Pulls the `id` field out of a raw record.
pub fn record_id(record: &Value) -> Option<DocumentId> {
    record
        .get("id")
        .and_then(Value::as_str)
        .map(DocumentId::from)
}

/// Date-only strings carry no time component; storage keeps full timestamps,
/// so they are widened to midnight before persisting.
pub fn normalize_dates(record: &mut Value) {
    if let Value::Object(fields) = record {
        for value in fields.values_mut() {
            if let Value::String(text) = value {
                if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                    let stamp = date.and_time(NaiveTime::MIN);
                    *value = Value::String(stamp.format("%Y-%m-%dT%H:%M:%S").to_string());
                }
            }
        }
    }
}

pub struct EntityService<M: Entity> {
    gateway: Arc<dyn StorageGateway>,
    expander: Arc<dyn RelationExpander>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Entity> EntityService<M> {
    pub fn new(gateway: Arc<dyn StorageGateway>, expander: Arc<dyn RelationExpander>) -> Self {
        EntityService {
            gateway,
            expander,
            _model: PhantomData,
        }
    }

    pub fn gateway(&self) -> Arc<dyn StorageGateway> {
        self.gateway.clone()
    }

    /// Persists a new entity and returns the canonical stored form.
    pub async fn create<I>(&self, input: &I, dataset: &str) -> StoreResult<Lookup<M>>
    where
        I: Serialize + Sync,
    {
        let mut record = encode(input)?;
        normalize_dates(&mut record);
        let id = self
            .gateway
            .create_document(M::COLLECTION, dataset, record)
            .await?;
        self.get_one(&id, dataset, 0, Source::Unset).await
    }

    /// Filtered fetch with per-record expansion. A record whose expansion
    /// fails is returned raw instead of aborting the batch.
    pub async fn get_many(
        &self,
        dataset: &str,
        filter: &Filter,
        depth: i64,
        source: Source,
    ) -> StoreResult<Vec<Value>> {
        let records = self
            .gateway
            .get_documents(M::COLLECTION, dataset, filter, None)
            .await?;

        let mut expanded = Vec::with_capacity(records.len());
        for record in records {
            let ctx = ExpandContext::new(dataset, depth, source);
            match self.expand(record.clone(), ctx).await {
                Ok(view) => expanded.push(view),
                Err(err) => {
                    warn!(
                        collection = %M::COLLECTION,
                        error = %err,
                        "expansion failed for one record; returning it unexpanded"
                    );
                    expanded.push(record);
                }
            }
        }
        Ok(expanded)
    }

    /// By-id fetch in raw-record form. The not-found sentinel passes through
    /// untouched and is never expanded.
    pub async fn get_one_dict(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<Value>> {
        match self
            .gateway
            .get_document(id, M::COLLECTION, dataset, None)
            .await?
        {
            Lookup::Missing(not_found) => Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => {
                let ctx = ExpandContext::new(dataset, depth, source);
                Ok(Lookup::Found(self.expand(record, ctx).await?))
            }
        }
    }

    /// By-id fetch parsed into the typed model.
    pub async fn get_one(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<M>> {
        match self.get_one_dict(id, dataset, depth, source).await? {
            Lookup::Missing(not_found) => Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => Ok(Lookup::Found(decode::<M>(id, record)?)),
        }
    }

    /// Full replace of an existing entity; returns the canonical stored form.
    pub async fn update<I>(&self, id: &DocumentId, new_state: &I, dataset: &str) -> StoreResult<Lookup<M>>
    where
        I: Serialize + Sync,
    {
        if let Lookup::Missing(not_found) =
            self.get_one_dict(id, dataset, 0, Source::Unset).await?
        {
            return Ok(Lookup::Missing(not_found));
        }

        let mut record = encode(new_state)?;
        normalize_dates(&mut record);
        self.gateway
            .update_document(id, M::COLLECTION, dataset, record)
            .await?;
        self.get_one(id, dataset, 0, Source::Unset).await
    }

    /// Deletes after confirming existence; returns the pre-deletion snapshot.
    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<M>> {
        let existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(entity) => entity,
        };
        self.gateway
            .delete_document(id, M::COLLECTION, dataset)
            .await?;
        Ok(Lookup::Found(existing))
    }

    /// Applies the injected expander when depth remains; a no-op otherwise.
    pub async fn expand(&self, record: Value, ctx: ExpandContext<'_>) -> StoreResult<Value> {
        if ctx.depth <= 0 {
            return Ok(record);
        }
        debug!(
            collection = %M::COLLECTION,
            depth = ctx.depth,
            source = ?ctx.source,
            "expanding related documents"
        );
        let related = self.expander.related(&record, ctx).await?;
        Ok(merged(record, related))
    }
}

fn encode<I: Serialize>(input: &I) -> StoreResult<Value> {
    serde_json::to_value(input).map_err(|err| StoreError::Validation {
        message: format!("payload cannot be encoded as a document: {err}"),
    })
}

fn decode<M: Entity>(id: &DocumentId, record: Value) -> StoreResult<M> {
    serde_json::from_value(record).map_err(|source| StoreError::Malformed {
        collection: M::COLLECTION,
        id: id.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGateway;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Plain {
        id: DocumentId,
        name: String,
        #[serde(default)]
        start_date: Option<String>,
    }

    impl Entity for Plain {
        const COLLECTION: Collection = Collection::Experiment;
    }

    fn service() -> EntityService<Plain> {
        EntityService::new(Arc::new(MemoryGateway::new()), Arc::new(NoExpansion))
    }

    #[tokio::test]
    async fn create_returns_canonical_stored_form() {
        let service = service();
        let created = service
            .create(&json!({"name": "pilot"}), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(created.name, "pilot");
        assert!(!created.id.as_str().is_empty());
    }

    #[tokio::test]
    async fn create_widens_date_only_values_to_timestamps() {
        let service = service();
        let created = service
            .create(&json!({"name": "pilot", "start_date": "2024-03-01"}), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(created.start_date.as_deref(), Some("2024-03-01T00:00:00"));
    }

    #[tokio::test]
    async fn get_one_is_idempotent_without_writes() {
        let service = service();
        let created = service
            .create(&json!({"name": "pilot"}), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();

        let first = service
            .get_one(&created.id, "ds", 0, Source::Unset)
            .await
            .unwrap()
            .found()
            .unwrap();
        let second = service
            .get_one(&created.id, "ds", 0, Source::Unset)
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn update_of_missing_entity_returns_sentinel() {
        let service = service();
        let lookup = service
            .update(&DocumentId::from("ghost"), &json!({"name": "x"}), "ds")
            .await
            .unwrap();
        assert!(lookup.is_missing());
    }

    #[tokio::test]
    async fn delete_returns_pre_deletion_snapshot() {
        let service = service();
        let created = service
            .create(&json!({"name": "short-lived"}), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();

        let deleted = service.delete(&created.id, "ds").await.unwrap().found().unwrap();
        assert_eq!(deleted, created);

        let gone = service
            .get_one(&created.id, "ds", 0, Source::Unset)
            .await
            .unwrap();
        assert!(gone.is_missing());
    }

    struct FailingExpander;

    #[async_trait]
    impl RelationExpander for FailingExpander {
        async fn related(
            &self,
            _record: &Value,
            _ctx: ExpandContext<'_>,
        ) -> StoreResult<Vec<(String, Value)>> {
            Err(StoreError::validation("boom"))
        }
    }

    #[tokio::test]
    async fn batch_expansion_failures_do_not_abort_the_batch() {
        let gateway = Arc::new(MemoryGateway::new());
        let writer: EntityService<Plain> =
            EntityService::new(gateway.clone(), Arc::new(NoExpansion));
        writer.create(&json!({"name": "a"}), "ds").await.unwrap();
        writer.create(&json!({"name": "b"}), "ds").await.unwrap();

        let reader: EntityService<Plain> =
            EntityService::new(gateway, Arc::new(FailingExpander));
        let records = reader
            .get_many("ds", &Filter::new(), 1, Source::Unset)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn depth_zero_never_invokes_the_expander() {
        let gateway = Arc::new(MemoryGateway::new());
        let writer: EntityService<Plain> =
            EntityService::new(gateway.clone(), Arc::new(NoExpansion));
        let created = writer
            .create(&json!({"name": "a"}), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();

        let reader: EntityService<Plain> =
            EntityService::new(gateway, Arc::new(FailingExpander));
        // The failing expander would error if depth 0 reached it.
        let lookup = reader
            .get_one(&created.id, "ds", 0, Source::Unset)
            .await
            .unwrap();
        assert!(lookup.is_found());
    }
}
