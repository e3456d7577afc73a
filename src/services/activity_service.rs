//! Activity service: owner of the embedded activity-execution records.
//!
//! Execution records are not a top-level collection; they live as an array
//! inside their activity document. This service owns every physical
//! manipulation of that array, so the rest of the crate can treat executions
//! as ordinary entities.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::{Activity, ActivityExecution, ActivityExecutionInput};
use crate::model::{Collection, DocumentId, Lookup, NotFound, Source};
use crate::storage::{Filter, Projection, StorageGateway};

use super::activity_execution_service::ActivityExecutionService;
use super::entity_service::{Entity, EntityService, ExpandContext, RelationExpander};

/// Embedded array field on activity documents.
pub const EXECUTIONS_FIELD: &str = "activity_executions";

impl Entity for Activity {
    const COLLECTION: Collection = Collection::Activity;
}

/// Handles activity requests and the embedded execution array.
pub struct ActivityService {
    entity: EntityService<Activity>,
    gateway: Arc<dyn StorageGateway>,
}

impl ActivityService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(ActivityExpander {
            gateway: gateway.clone(),
        });
        ActivityService {
            entity: EntityService::new(gateway.clone(), expander),
            gateway,
        }
    }

    pub async fn save<I>(&self, activity: &I, dataset: &str) -> StoreResult<Lookup<Activity>>
    where
        I: Serialize + Sync,
    {
        self.entity.create(activity, dataset).await
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

    /// Filtered fetch with a storage-side projection, used by the execution
    /// service to pull single embedded elements plus minimal owning context.
    pub async fn get_many_projected(
        &self,
        dataset: &str,
        filter: &Filter,
        depth: i64,
        source: Source,
        projection: &Projection,
    ) -> StoreResult<Vec<Value>> {
        let records = self
            .gateway
            .get_documents(Collection::Activity, dataset, filter, Some(projection))
            .await?;
        let mut expanded = Vec::with_capacity(records.len());
        for record in records {
            let ctx = ExpandContext::new(dataset, depth, source);
            match self.entity.expand(record.clone(), ctx).await {
                Ok(view) => expanded.push(view),
                Err(err) => {
                    warn!(error = %err, "activity expansion failed; returning raw record");
                    expanded.push(record);
                }
            }
        }
        Ok(expanded)
    }

    pub async fn get_one(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<Activity>> {
        self.entity.get_one(id, dataset, depth, source).await
    }

    /// Full replace of the activity's own fields. The embedded execution array
    /// is carried over from the stored document; it only changes through the
    /// execution operations below.
    pub async fn update<I>(
        &self,
        id: &DocumentId,
        activity: &I,
        dataset: &str,
    ) -> StoreResult<Lookup<Activity>>
    where
        I: Serialize + Sync,
    {
        let existing = match self
            .gateway
            .get_document(id, Collection::Activity, dataset, None)
            .await?
        {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => record,
        };
        let mut record = serde_json::to_value(activity).map_err(|err| {
            StoreError::validation(format!("activity payload cannot be encoded: {err}"))
        })?;
        if let (Some(fields), Some(executions)) =
            (record.as_object_mut(), existing.get(EXECUTIONS_FIELD))
        {
            fields.insert(EXECUTIONS_FIELD.to_string(), executions.clone());
        }
        self.entity.update(id, &record, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Activity>> {
        self.entity.delete(id, dataset).await
    }

    /// Appends a new execution record to its owning activity's embedded array.
    pub async fn add_execution(
        &self,
        input: &ActivityExecutionInput,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        let Some(activity_id) = input.activity_id.as_ref() else {
            return Err(StoreError::validation(
                "activity execution requires an owning activity",
            ));
        };
        let mut activity = match self
            .gateway
            .get_document(activity_id, Collection::Activity, dataset, None)
            .await?
        {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => record,
        };

        let mut element = serde_json::to_value(input).map_err(|err| {
            StoreError::validation(format!("execution payload cannot be encoded: {err}"))
        })?;
        let execution_id = Uuid::new_v4().to_string();
        if let Some(fields) = element.as_object_mut() {
            fields.insert("id".to_string(), Value::String(execution_id.clone()));
        }

        executions_mut(&mut activity)?.push(element.clone());
        self.gateway
            .update_document_raw(Collection::Activity, activity_id, activity, dataset)
            .await?;
        Ok(Lookup::Found(parse_execution(&execution_id, element)?))
    }

    /// Replaces the embedded execution with the given item id, wherever it is
    /// embedded.
    pub async fn update_execution(
        &self,
        execution_id: &DocumentId,
        mut fields: Value,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        let Some((activity_id, mut activity)) = self.owning_activity(execution_id, dataset).await?
        else {
            return Ok(Lookup::Missing(execution_not_found(execution_id)));
        };

        if let Some(map) = fields.as_object_mut() {
            map.insert("id".to_string(), Value::String(execution_id.0.clone()));
        }
        let elements = executions_mut(&mut activity)?;
        let Some(slot) = elements
            .iter_mut()
            .find(|element| element.get("id").and_then(Value::as_str) == Some(execution_id.as_str()))
        else {
            return Ok(Lookup::Missing(execution_not_found(execution_id)));
        };
        *slot = fields.clone();

        self.gateway
            .update_document_raw(Collection::Activity, &activity_id, activity, dataset)
            .await?;
        Ok(Lookup::Found(parse_execution(execution_id.as_str(), fields)?))
    }

    /// Removes the embedded execution and returns the detached record.
    pub async fn remove_execution(
        &self,
        execution_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        let Some((activity_id, mut activity)) = self.owning_activity(execution_id, dataset).await?
        else {
            return Ok(Lookup::Missing(execution_not_found(execution_id)));
        };

        let elements = executions_mut(&mut activity)?;
        let Some(position) = elements
            .iter()
            .position(|element| element.get("id").and_then(Value::as_str) == Some(execution_id.as_str()))
        else {
            return Ok(Lookup::Missing(execution_not_found(execution_id)));
        };
        let detached = elements.remove(position);

        self.gateway
            .update_document_raw(Collection::Activity, &activity_id, activity, dataset)
            .await?;
        Ok(Lookup::Found(parse_execution(execution_id.as_str(), detached)?))
    }

    async fn owning_activity(
        &self,
        execution_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Option<(DocumentId, Value)>> {
        let filter = Filter::new().eq(
            format!("{EXECUTIONS_FIELD}.id"),
            execution_id.as_str(),
        );
        let mut activities = self
            .gateway
            .get_documents(Collection::Activity, dataset, &filter, None)
            .await?;
        if activities.is_empty() {
            return Ok(None);
        }
        let activity = activities.remove(0);
        let Some(activity_id) = activity.get("id").and_then(Value::as_str) else {
            return Ok(None);
        };
        Ok(Some((DocumentId::from(activity_id), activity)))
    }
}

fn execution_not_found(id: &DocumentId) -> NotFound {
    NotFound::new(id.clone(), "activity execution not found")
}

fn executions_mut(activity: &mut Value) -> StoreResult<&mut Vec<Value>> {
    let fields = activity
        .as_object_mut()
        .ok_or_else(|| StoreError::validation("activity record is not an object"))?;
    let entry = fields
        .entry(EXECUTIONS_FIELD.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    entry
        .as_array_mut()
        .ok_or_else(|| StoreError::validation("activity executions field is not an array"))
}

fn parse_execution(id: &str, element: Value) -> StoreResult<ActivityExecution> {
    serde_json::from_value(element).map_err(|source| StoreError::Malformed {
        collection: Collection::ActivityExecution,
        id: id.to_string(),
        source,
    })
}

/// Expands each embedded execution's relations. Skipped entirely when the
/// request arrived by lifting one of those executions, since the caller is
/// about to do its own expansion.
struct ActivityExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for ActivityExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        if ctx.source == Source::ActivityExecution {
            return Ok(Vec::new());
        }
        let Some(Value::Array(elements)) = record.get(EXECUTIONS_FIELD) else {
            return Ok(Vec::new());
        };

        let executions = ActivityExecutionService::new(self.gateway.clone());
        let mut expanded = Vec::with_capacity(elements.len());
        for element in elements {
            let view = executions
                .expand_execution(
                    element.clone(),
                    ExpandContext::new(ctx.dataset, ctx.depth - 1, Source::Activity),
                    None,
                )
                .await?;
            expanded.push(view);
        }
        Ok(vec![(EXECUTIONS_FIELD.to_string(), Value::Array(expanded))])
    }
}
