//! Activity execution service.
//!
//! Executions sit one layer below activity documents in storage, so every read
//! translates execution filters into filters on the owning activity's embedded
//! array, and single-entity reads lift exactly one matched element out of its
//! parent. This service carries the richest relation graph in the store:
//! arrangement, experiments (via scenarios), participations and the owning
//! activity itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::{
    ActivityExecution, ActivityExecutionInput, ActivityExecutionPropertyPatch,
    ActivityExecutionRelationPatch,
};
use crate::model::{Collection, DocumentId, Lookup, NotFound, Source};
use crate::storage::{Filter, Projection, StorageGateway};

use super::activity_service::{ActivityService, EXECUTIONS_FIELD};
use super::arrangement_service::ArrangementService;
use super::entity_service::{merged, record_id, ExpandContext, RelationExpander};
use super::participation_service::ParticipationService;
use super::scenario_service::ScenarioService;

pub struct ActivityExecutionService {
    gateway: Arc<dyn StorageGateway>,
    expander: Arc<dyn RelationExpander>,
}

impl ActivityExecutionService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        let expander = Arc::new(ActivityExecutionExpander {
            gateway: gateway.clone(),
        });
        ActivityExecutionService { gateway, expander }
    }

    fn activities(&self) -> ActivityService {
        ActivityService::new(self.gateway.clone())
    }

    fn arrangements(&self) -> ArrangementService {
        ArrangementService::new(self.gateway.clone())
    }

    /// Creates an execution after checking that the referenced activity and
    /// arrangement exist; delegates the physical insert to the activity
    /// service's embedded-array path.
    pub async fn save(
        &self,
        input: &ActivityExecutionInput,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        if let Some(activity_id) = input.activity_id.as_ref() {
            let activity = self
                .activities()
                .get_one(activity_id, dataset, 0, Source::Unset)
                .await?;
            if activity.is_missing() {
                return Err(StoreError::validation("given activity does not exist"));
            }
        }
        if let Some(arrangement_id) = input.arrangement_id.as_ref() {
            let arrangement = self
                .arrangements()
                .get_one(arrangement_id, dataset, 0, Source::Unset)
                .await?;
            if arrangement.is_missing() {
                return Err(StoreError::validation("given arrangement does not exist"));
            }
        }
        self.activities().add_execution(input, dataset).await
    }

    /// Filtered fetch. The filter is rewritten onto the owning activity's
    /// embedded array; matching elements are lifted out and expanded
    /// individually, each carrying its (already expanded) parent activity.
    pub async fn get_many(
        &self,
        dataset: &str,
        filter: &Filter,
        depth: i64,
        source: Source,
    ) -> StoreResult<Vec<Value>> {
        let activity_filter = filter.prefixed(EXECUTIONS_FIELD);
        let projection = activity_projection(filter);
        let activities = self
            .activities()
            .get_many_projected(
                dataset,
                &activity_filter,
                depth - 1,
                Source::ActivityExecution,
                &projection,
            )
            .await?;

        let mut executions = Vec::new();
        for mut activity in activities {
            let Some(elements) = take_executions(&mut activity) else {
                continue;
            };
            for element in elements {
                let ctx = ExpandContext::new(dataset, depth, source);
                match self
                    .expand_execution(element.clone(), ctx, Some(&activity))
                    .await
                {
                    Ok(view) => executions.push(view),
                    Err(err) => {
                        warn!(error = %err, "execution expansion failed; returning raw element");
                        executions.push(element);
                    }
                }
            }
        }
        Ok(executions)
    }

    /// By-id fetch in raw-record form: elem-match projection against the
    /// embedding array, then lift the single matched element and merge in its
    /// relations.
    pub async fn get_one_dict(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<Value>> {
        let filter = Filter::new().eq(format!("{EXECUTIONS_FIELD}.id"), id.as_str());
        let projection = Projection::include(["activity", "additional_properties"])
            .with_elem_match(EXECUTIONS_FIELD, Filter::new().eq("id", id.as_str()));
        let mut activities = self
            .activities()
            .get_many_projected(
                dataset,
                &filter,
                depth - 1,
                Source::ActivityExecution,
                &projection,
            )
            .await?;

        if activities.is_empty() {
            return Ok(Lookup::Missing(NotFound::new(
                id.clone(),
                "activity execution not found",
            )));
        }
        let mut activity = activities.remove(0);
        let element = take_executions(&mut activity)
            .and_then(|mut elements| {
                if elements.is_empty() {
                    None
                } else {
                    Some(elements.remove(0))
                }
            });
        let Some(element) = element else {
            return Ok(Lookup::Missing(NotFound::new(
                id.clone(),
                "activity execution not found",
            )));
        };

        let ctx = ExpandContext::new(dataset, depth, source);
        let view = self.expand_execution(element, ctx, Some(&activity)).await?;
        Ok(Lookup::Found(view))
    }

    pub async fn get_one(
        &self,
        id: &DocumentId,
        dataset: &str,
        depth: i64,
        source: Source,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        match self.get_one_dict(id, dataset, depth, source).await? {
            Lookup::Missing(not_found) => Ok(Lookup::Missing(not_found)),
            Lookup::Found(record) => {
                let execution =
                    serde_json::from_value(record).map_err(|source| StoreError::Malformed {
                        collection: Collection::ActivityExecution,
                        id: id.to_string(),
                        source,
                    })?;
                Ok(Lookup::Found(execution))
            }
        }
    }

    /// Property update: merges the patch over the fetched execution and
    /// rewrites the embedded element.
    pub async fn update(
        &self,
        id: &DocumentId,
        patch: &ActivityExecutionPropertyPatch,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        let mut existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(execution) => execution,
        };
        existing.additional_properties = patch.additional_properties.clone();
        let fields = encode_execution(&existing)?;
        self.activities().update_execution(id, fields, dataset).await
    }

    /// Relation update: re-validates the new targets. The activity reference
    /// is mandatory on this path; the arrangement is checked only when one was
    /// supplied.
    pub async fn update_relationships(
        &self,
        id: &DocumentId,
        patch: &ActivityExecutionRelationPatch,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        let mut existing = match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(execution) => execution,
        };

        let activity = self
            .activities()
            .get_one(&patch.activity_id, dataset, 0, Source::Unset)
            .await?;
        if activity.is_missing() {
            return Err(StoreError::validation("given activity does not exist"));
        }
        if let Some(arrangement_id) = patch.arrangement_id.as_ref() {
            let arrangement = self
                .arrangements()
                .get_one(arrangement_id, dataset, 0, Source::Unset)
                .await?;
            if arrangement.is_missing() {
                return Err(StoreError::validation("given arrangement does not exist"));
            }
        }

        existing.activity_id = Some(patch.activity_id.clone());
        existing.arrangement_id = patch.arrangement_id.clone();
        let fields = encode_execution(&existing)?;
        self.activities().update_execution(id, fields, dataset).await
    }

    pub async fn delete(&self, id: &DocumentId, dataset: &str) -> StoreResult<Lookup<ActivityExecution>> {
        match self.get_one(id, dataset, 0, Source::Unset).await? {
            Lookup::Missing(not_found) => Ok(Lookup::Missing(not_found)),
            Lookup::Found(_) => self.activities().remove_execution(id, dataset).await,
        }
    }

    /// Builds the expanded view of one lifted execution element. The owning
    /// activity, when present, is passed through from the surrounding query
    /// rather than re-fetched; it is attached unless the request arrived from
    /// the activity side.
    pub(crate) async fn expand_execution(
        &self,
        element: Value,
        ctx: ExpandContext<'_>,
        activity: Option<&Value>,
    ) -> StoreResult<Value> {
        if ctx.depth <= 0 {
            return Ok(element);
        }
        let related = self.expander.related(&element, ctx).await?;
        let mut view = merged(element, related);
        if ctx.source != Source::Activity {
            if let (Some(activity), Value::Object(fields)) = (activity, &mut view) {
                fields.insert("activity".to_string(), activity.clone());
            }
        }
        Ok(view)
    }
}

fn activity_projection(filter: &Filter) -> Projection {
    let base = Projection::include(["activity", "additional_properties"]);
    if filter.is_empty() {
        Projection::include(["activity", "additional_properties", EXECUTIONS_FIELD])
    } else {
        base.with_elem_match(EXECUTIONS_FIELD, filter.clone())
    }
}

fn take_executions(activity: &mut Value) -> Option<Vec<Value>> {
    match activity.as_object_mut()?.remove(EXECUTIONS_FIELD)? {
        Value::Array(elements) => Some(elements),
        _ => None,
    }
}

fn encode_execution(execution: &ActivityExecution) -> StoreResult<Value> {
    serde_json::to_value(execution).map_err(|err| {
        StoreError::validation(format!("execution payload cannot be encoded: {err}"))
    })
}

/// Relation graph of an execution: owning arrangement, experiments of any
/// scenario containing it, and participations referencing it. The owning
/// activity is handled by `expand_execution` since it is passed through,
/// never fetched.
struct ActivityExecutionExpander {
    gateway: Arc<dyn StorageGateway>,
}

#[async_trait]
impl RelationExpander for ActivityExecutionExpander {
    async fn related(
        &self,
        record: &Value,
        ctx: ExpandContext<'_>,
    ) -> StoreResult<Vec<(String, Value)>> {
        let mut related = Vec::new();
        let Some(id) = record_id(record) else {
            return Ok(related);
        };

        if ctx.source != Source::Arrangement {
            if let Some(arrangement_id) = record.get("arrangement_id").and_then(Value::as_str) {
                let arrangement = ArrangementService::new(self.gateway.clone())
                    .get_one_dict(
                        &DocumentId::from(arrangement_id),
                        ctx.dataset,
                        ctx.depth - 1,
                        Source::ActivityExecution,
                    )
                    .await?;
                if let Lookup::Found(value) = arrangement {
                    related.push(("arrangement".to_string(), value));
                }
            }
        }

        if ctx.source != Source::Experiment {
            let scenarios = ScenarioService::new(self.gateway.clone())
                .get_all_by_activity_execution(&id, ctx.dataset, ctx.depth)
                .await?;
            if let Lookup::Found(scenarios) = scenarios {
                let experiments = scenarios
                    .into_iter()
                    .filter_map(|scenario| scenario.experiment)
                    .collect::<Vec<_>>();
                related.push(("experiments".to_string(), Value::Array(experiments)));
            }
        }

        if ctx.source != Source::Participation {
            let participations = ParticipationService::new(self.gateway.clone())
                .get_many(
                    ctx.dataset,
                    &Filter::new().eq("activity_execution_id", id.as_str()),
                    ctx.depth - 1,
                    Source::ActivityExecution,
                )
                .await?;
            related.push(("participations".to_string(), Value::Array(participations)));
        }

        Ok(related)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::entities::Property;
    use crate::storage::MemoryGateway;
    use serde_json::json;

    struct Fixture {
        executions: ActivityExecutionService,
        activities: ActivityService,
        activity_id: DocumentId,
        arrangement_id: DocumentId,
    }

    async fn fixture() -> Fixture {
        let gateway: Arc<dyn StorageGateway> = Arc::new(MemoryGateway::new());
        let executions = ActivityExecutionService::new(gateway.clone());
        let activities = ActivityService::new(gateway.clone());
        let activity = activities
            .save(&json!({"activity": "two-people", "additional_properties": []}), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();
        let arrangement = ArrangementService::new(gateway)
            .save(&json!({"arrangement_type": "paired"}), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();
        Fixture {
            executions,
            activities,
            activity_id: activity.id,
            arrangement_id: arrangement.id,
        }
    }

    fn input(activity_id: Option<DocumentId>, arrangement_id: Option<DocumentId>) -> ActivityExecutionInput {
        ActivityExecutionInput {
            activity_id,
            arrangement_id,
            additional_properties: vec![],
        }
    }

    #[tokio::test]
    async fn save_rejects_unknown_activity_and_persists_nothing() {
        let fx = fixture().await;
        let err = fx
            .executions
            .save(&input(Some(DocumentId::from("ghost")), None), "ds")
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let stored = fx
            .executions
            .get_many("ds", &Filter::new(), 0, Source::Unset)
            .await
            .unwrap();
        assert!(stored.is_empty(), "failed validation must not persist anything");
    }

    #[tokio::test]
    async fn save_rejects_unknown_arrangement_and_persists_nothing() {
        let fx = fixture().await;
        let err = fx
            .executions
            .save(
                &input(Some(fx.activity_id.clone()), Some(DocumentId::from("ghost"))),
                "ds",
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let activity = fx
            .activities
            .get_one(&fx.activity_id, "ds", 0, Source::Unset)
            .await
            .unwrap()
            .found()
            .unwrap();
        assert!(activity.activity_executions.is_empty());
    }

    #[tokio::test]
    async fn update_relationships_requires_existing_activity() {
        let fx = fixture().await;
        let execution = fx
            .executions
            .save(&input(Some(fx.activity_id.clone()), None), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();

        let err = fx
            .executions
            .update_relationships(
                &execution.id,
                &ActivityExecutionRelationPatch {
                    activity_id: DocumentId::from("ghost"),
                    arrangement_id: None,
                },
                "ds",
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let unchanged = fx
            .executions
            .get_one(&execution.id, "ds", 0, Source::Unset)
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(unchanged.activity_id, Some(fx.activity_id.clone()));
    }

    #[tokio::test]
    async fn update_relationships_checks_arrangement_only_when_supplied() {
        let fx = fixture().await;
        let execution = fx
            .executions
            .save(
                &input(Some(fx.activity_id.clone()), Some(fx.arrangement_id.clone())),
                "ds",
            )
            .await
            .unwrap()
            .found()
            .unwrap();

        // No arrangement supplied: nothing to check, relation is cleared.
        let cleared = fx
            .executions
            .update_relationships(
                &execution.id,
                &ActivityExecutionRelationPatch {
                    activity_id: fx.activity_id.clone(),
                    arrangement_id: None,
                },
                "ds",
            )
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(cleared.arrangement_id, None);

        // A supplied arrangement must exist.
        let err = fx
            .executions
            .update_relationships(
                &execution.id,
                &ActivityExecutionRelationPatch {
                    activity_id: fx.activity_id.clone(),
                    arrangement_id: Some(DocumentId::from("ghost")),
                },
                "ds",
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn update_replaces_properties_and_keeps_relations() {
        let fx = fixture().await;
        let execution = fx
            .executions
            .save(
                &input(Some(fx.activity_id.clone()), Some(fx.arrangement_id.clone())),
                "ds",
            )
            .await
            .unwrap()
            .found()
            .unwrap();

        let updated = fx
            .executions
            .update(
                &execution.id,
                &ActivityExecutionPropertyPatch {
                    additional_properties: vec![Property::new("phase", "cool-down")],
                },
                "ds",
            )
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(updated.additional_properties, vec![Property::new("phase", "cool-down")]);
        assert_eq!(updated.activity_id, Some(fx.activity_id.clone()));
        assert_eq!(updated.arrangement_id, Some(fx.arrangement_id.clone()));
    }

    #[tokio::test]
    async fn delete_detaches_the_embedded_execution() {
        let fx = fixture().await;
        let execution = fx
            .executions
            .save(&input(Some(fx.activity_id.clone()), None), "ds")
            .await
            .unwrap()
            .found()
            .unwrap();

        let deleted = fx.executions.delete(&execution.id, "ds").await.unwrap();
        assert!(deleted.is_found());

        let gone = fx
            .executions
            .get_one(&execution.id, "ds", 0, Source::Unset)
            .await
            .unwrap();
        assert!(gone.is_missing());
        let activity = fx
            .activities
            .get_one(&fx.activity_id, "ds", 0, Source::Unset)
            .await
            .unwrap()
            .found()
            .unwrap();
        assert!(activity.activity_executions.is_empty());
    }
}
