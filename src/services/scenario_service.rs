//! Scenario service: ordering subsystem over a scenario's execution sequence.
//!
//! A stored scenario holds its experiment entry point plus an ordered list of
//! activity-execution ids; order is positional and semantically meaningful.
//! The sequence is only ever mutated through the operations here, and the
//! persisted form always stays in raw-id shape; read paths rehydrate ids into
//! objects but never write that form back.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::errors::{StoreError, StoreResult};
use crate::model::entities::{ActivityExecution, ActivityExecutionInput, OrderChange, Scenario, ScenarioInput};
use crate::model::{Collection, DocumentId, Lookup, NotFound, Source};
use crate::storage::{Filter, StorageGateway};

use super::activity_execution_service::ActivityExecutionService;
use super::entity_service::{Entity, EntityService, NoExpansion};
use super::experiment_service::ExperimentService;

impl Entity for Scenario {
    const COLLECTION: Collection = Collection::Scenario;
}

/// What a polymorphic "previous id" resolved to.
enum Anchor {
    Experiment,
    Execution,
}

pub struct ScenarioService {
    entity: EntityService<Scenario>,
    gateway: Arc<dyn StorageGateway>,
}

impl ScenarioService {
    pub fn new(gateway: Arc<dyn StorageGateway>) -> Self {
        ScenarioService {
            entity: EntityService::new(gateway.clone(), Arc::new(NoExpansion)),
            gateway,
        }
    }

    fn executions(&self) -> ActivityExecutionService {
        ActivityExecutionService::new(self.gateway.clone())
    }

    fn experiments(&self) -> ExperimentService {
        ExperimentService::new(self.gateway.clone())
    }

    /// Creates a scenario. Embedded execution payloads are persisted first to
    /// obtain their ids; the stored scenario carries only the id sequence.
    pub async fn save(&self, input: &ScenarioInput, dataset: &str) -> StoreResult<Lookup<Scenario>> {
        if let Some(experiment_id) = input.experiment_id.as_ref() {
            let experiment = self
                .experiments()
                .get_one(experiment_id, dataset, 0, Source::Unset)
                .await?;
            if experiment.is_missing() {
                return Err(StoreError::validation("given experiment does not exist"));
            }
        }

        let mut saved = Vec::with_capacity(input.activity_executions.len());
        for execution in &input.activity_executions {
            match self.executions().save(execution, dataset).await? {
                Lookup::Found(execution) => saved.push(execution),
                Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            }
        }

        let ids = saved
            .iter()
            .map(|execution| Value::String(execution.id.0.clone()))
            .collect::<Vec<_>>();
        let record = serde_json::json!({
            "experiment_id": input.experiment_id,
            "activity_executions": ids,
        });
        let id = self
            .gateway
            .create_document(Collection::Scenario, dataset, record)
            .await?;

        let executions = saved
            .into_iter()
            .map(|execution| serde_json::to_value(execution))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::validation(format!("scenario cannot be encoded: {err}")))?;
        Ok(Lookup::Found(Scenario {
            id,
            experiment_id: input.experiment_id.clone(),
            activity_executions: executions,
            experiment: None,
        }))
    }

    /// Persists a new execution and splices it into a scenario sequence right
    /// after `previous_id`. A `previous_id` naming an experiment means "insert
    /// as the first element" of that experiment's scenario.
    pub async fn insert_after(
        &self,
        previous_id: &DocumentId,
        execution: &ActivityExecutionInput,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        let execution = match self.executions().save(execution, dataset).await? {
            Lookup::Found(execution) => execution,
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
        };
        match self.place_after(previous_id, &execution.id, dataset).await? {
            Lookup::Found(()) => Ok(Lookup::Found(execution)),
            // The freshly created execution stays behind, detached from any
            // scenario; there is no compensating delete.
            Lookup::Missing(not_found) => Ok(Lookup::Missing(not_found)),
        }
    }

    /// Detaches an execution from the scenario containing it and returns the
    /// now-detached execution entity.
    pub async fn remove(
        &self,
        execution_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Lookup<ActivityExecution>> {
        let scenario = match self
            .get_by_activity_execution(execution_id, dataset, 0)
            .await?
        {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(scenario) => scenario,
        };
        let mut raw = match self.raw_by_id(&scenario.id, dataset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(raw) => raw,
        };

        sequence_mut(&mut raw)?
            .retain(|entry| entry.as_str() != Some(execution_id.as_str()));
        self.gateway
            .update_document_raw(Collection::Scenario, &scenario.id, raw, dataset)
            .await?;

        self.executions()
            .get_one(execution_id, dataset, 0, Source::Unset)
            .await
    }

    /// Moves an execution within (or across) scenario sequences: remove, then
    /// insert after the reference element. The two steps are independent
    /// storage calls with no rollback; a failure in between leaves the
    /// execution detached from any scenario.
    pub async fn change_order(
        &self,
        change: &OrderChange,
        dataset: &str,
    ) -> StoreResult<Lookup<()>> {
        if change.execution_id == change.previous_id {
            return Err(StoreError::validation(
                "given ids for order change are identical",
            ));
        }

        if let Lookup::Missing(not_found) = self.remove(&change.execution_id, dataset).await? {
            return Ok(Lookup::Missing(not_found));
        }
        self.place_after(&change.previous_id, &change.execution_id, dataset)
            .await
    }

    /// Splices an existing execution id into the sequence owned by the
    /// scenario that `previous_id` resolves into.
    async fn place_after(
        &self,
        previous_id: &DocumentId,
        execution_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Lookup<()>> {
        let (scenario, anchor) = match self.find_by_element(previous_id, dataset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(resolved) => resolved,
        };
        let mut raw = match self.raw_by_id(&scenario.id, dataset).await? {
            Lookup::Missing(not_found) => return Ok(Lookup::Missing(not_found)),
            Lookup::Found(raw) => raw,
        };

        let sequence = sequence_mut(&mut raw)?;
        let index = match anchor {
            Anchor::Experiment => 0,
            Anchor::Execution => {
                let Some(position) = sequence
                    .iter()
                    .position(|entry| entry.as_str() == Some(previous_id.as_str()))
                else {
                    return Ok(Lookup::Missing(NotFound::new(
                        previous_id.clone(),
                        "previous activity execution is no longer in the scenario",
                    )));
                };
                position + 1
            }
        };
        sequence.insert(index, Value::String(execution_id.0.clone()));
        debug!(scenario = %scenario.id, index, "spliced execution into scenario sequence");

        self.gateway
            .update_document_raw(Collection::Scenario, &scenario.id, raw, dataset)
            .await?;
        Ok(Lookup::Found(()))
    }

    /// Resolves a polymorphic element id: first as an experiment, then as an
    /// activity execution; whichever resolves determines the scenario.
    async fn find_by_element(
        &self,
        element_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Lookup<(Scenario, Anchor)>> {
        let experiment = self
            .experiments()
            .get_one(element_id, dataset, 0, Source::Unset)
            .await?;
        if experiment.is_found() {
            return Ok(self
                .get_by_experiment(element_id, dataset, 0)
                .await?
                .map(|scenario| (scenario, Anchor::Experiment)));
        }

        let execution = self
            .executions()
            .get_one(element_id, dataset, 0, Source::Unset)
            .await?;
        if execution.is_found() {
            return Ok(self
                .get_by_activity_execution(element_id, dataset, 0)
                .await?
                .map(|scenario| (scenario, Anchor::Execution)));
        }

        Ok(Lookup::Missing(NotFound::new(
            element_id.clone(),
            "no activity execution or experiment with given id",
        )))
    }

    /// Scenario lookup through either of its entry points.
    pub async fn get_by_element(
        &self,
        element_id: &DocumentId,
        dataset: &str,
        depth: i64,
    ) -> StoreResult<Lookup<Scenario>> {
        let experiment = self
            .experiments()
            .get_one(element_id, dataset, 0, Source::Unset)
            .await?;
        if experiment.is_found() {
            return self.get_by_experiment(element_id, dataset, depth).await;
        }
        let execution = self
            .executions()
            .get_one(element_id, dataset, 0, Source::Unset)
            .await?;
        if execution.is_found() {
            return self
                .get_by_activity_execution(element_id, dataset, depth)
                .await;
        }
        Ok(Lookup::Missing(NotFound::new(
            element_id.clone(),
            "no activity execution or experiment with given id",
        )))
    }

    /// Hydrated scenario rooted at the given experiment.
    pub async fn get_by_experiment(
        &self,
        experiment_id: &DocumentId,
        dataset: &str,
        depth: i64,
    ) -> StoreResult<Lookup<Scenario>> {
        let mut scenarios = self
            .entity
            .get_many(
                dataset,
                &Filter::new().eq("experiment_id", experiment_id.as_str()),
                0,
                Source::Unset,
            )
            .await?;
        if scenarios.is_empty() {
            return Ok(Lookup::Missing(NotFound::new(
                experiment_id.clone(),
                "experiment is not assigned to any scenario",
            )));
        }
        let scenario = self.hydrate(scenarios.remove(0), dataset, depth).await?;
        Ok(Lookup::Found(scenario))
    }

    /// Hydrated scenario containing the given execution (the first one, when
    /// several match).
    pub async fn get_by_activity_execution(
        &self,
        execution_id: &DocumentId,
        dataset: &str,
        depth: i64,
    ) -> StoreResult<Lookup<Scenario>> {
        let mut scenarios = self.raw_by_execution(execution_id, dataset).await?;
        if scenarios.is_empty() {
            return Ok(Lookup::Missing(not_in_any_scenario(execution_id)));
        }
        let scenario = self.hydrate(scenarios.remove(0), dataset, depth).await?;
        Ok(Lookup::Found(scenario))
    }

    /// All hydrated scenarios containing the given execution.
    pub async fn get_all_by_activity_execution(
        &self,
        execution_id: &DocumentId,
        dataset: &str,
        depth: i64,
    ) -> StoreResult<Lookup<Vec<Scenario>>> {
        let scenarios = self.raw_by_execution(execution_id, dataset).await?;
        if scenarios.is_empty() {
            return Ok(Lookup::Missing(not_in_any_scenario(execution_id)));
        }
        let mut hydrated = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            hydrated.push(self.hydrate(scenario, dataset, depth).await?);
        }
        Ok(Lookup::Found(hydrated))
    }

    async fn raw_by_execution(
        &self,
        execution_id: &DocumentId,
        dataset: &str,
    ) -> StoreResult<Vec<Value>> {
        self.entity
            .get_many(
                dataset,
                &Filter::new().eq(Collection::ActivityExecution.as_str(), execution_id.as_str()),
                0,
                Source::Unset,
            )
            .await
    }

    /// Raw stored form (id sequence), fetched for sequence manipulation.
    async fn raw_by_id(&self, scenario_id: &DocumentId, dataset: &str) -> StoreResult<Lookup<Value>> {
        self.gateway
            .get_document(scenario_id, Collection::Scenario, dataset, None)
            .await
            .map_err(Into::into)
    }

    /// Replaces the persisted id sequence with fetched execution objects and
    /// attaches the resolved experiment. Read-path only; the result is never
    /// written back.
    async fn hydrate(&self, mut raw: Value, dataset: &str, depth: i64) -> StoreResult<Scenario> {
        let hop = (depth - 1).max(0);

        let ids = match raw.get(Collection::ActivityExecution.as_str()) {
            Some(Value::Array(ids)) => ids.clone(),
            _ => Vec::new(),
        };
        let mut objects = Vec::with_capacity(ids.len());
        for entry in ids {
            let Some(id) = entry.as_str().map(DocumentId::from) else {
                objects.push(entry);
                continue;
            };
            match self
                .executions()
                .get_one_dict(&id, dataset, hop, Source::ActivityExecution)
                .await?
            {
                Lookup::Found(execution) => objects.push(execution),
                // A dangling id keeps its slot as the sentinel so sequence
                // positions stay meaningful.
                Lookup::Missing(not_found) => objects.push(
                    serde_json::to_value(not_found).unwrap_or(Value::Null),
                ),
            }
        }

        let experiment_id = raw
            .get("experiment_id")
            .and_then(Value::as_str)
            .map(DocumentId::from);
        let mut experiment = None;
        if let Some(experiment_id) = experiment_id {
            if let Lookup::Found(value) = self
                .experiments()
                .get_one_dict(&experiment_id, dataset, hop, Source::Scenario)
                .await?
            {
                experiment = Some(value);
            }
        }

        if let Some(fields) = raw.as_object_mut() {
            fields.insert(
                Collection::ActivityExecution.as_str().to_string(),
                Value::Array(objects),
            );
            if let Some(experiment) = experiment {
                fields.insert("experiment".to_string(), experiment);
            }
        }

        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        serde_json::from_value(raw).map_err(|source| StoreError::Malformed {
            collection: Collection::Scenario,
            id,
            source,
        })
    }
}

fn not_in_any_scenario(execution_id: &DocumentId) -> NotFound {
    NotFound::new(
        execution_id.clone(),
        "given activity execution found, but it is not assigned to any scenario",
    )
}

fn sequence_mut(raw: &mut Value) -> StoreResult<&mut Vec<Value>> {
    raw.as_object_mut()
        .and_then(|fields| fields.get_mut(Collection::ActivityExecution.as_str()))
        .and_then(Value::as_array_mut)
        .ok_or_else(|| StoreError::validation("stored scenario has no execution id sequence"))
}
