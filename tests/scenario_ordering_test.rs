//! End-to-end coverage of the scenario ordering subsystem: sequence splicing,
//! detachment, reordering and the polymorphic "previous element" anchor.

use std::sync::Arc;

use serde_json::{json, Value};
use studygraph::model::entities::{ActivityExecutionInput, OrderChange, Property, Scenario, ScenarioInput};
use studygraph::model::{Collection, DocumentId, Lookup, Source};
use studygraph::services::ServiceFactory;
use studygraph::storage::{Filter, MemoryGateway, StorageGateway};

const DS: &str = "trial";

struct Fixture {
    factory: ServiceFactory,
    gateway: Arc<dyn StorageGateway>,
    experiment_id: DocumentId,
    activity_id: DocumentId,
    // Execution ids in initial sequence order.
    sequence: Vec<DocumentId>,
}

impl Fixture {
    fn execution_input(&self, label: &str) -> ActivityExecutionInput {
        ActivityExecutionInput {
            activity_id: Some(self.activity_id.clone()),
            arrangement_id: None,
            additional_properties: vec![Property::new("label", label)],
        }
    }

    async fn scenario(&self) -> Scenario {
        self.factory
            .scenarios()
            .get_by_experiment(&self.experiment_id, DS, 0)
            .await
            .unwrap()
            .found()
            .unwrap()
    }

    async fn stored_sequence(&self) -> Vec<String> {
        let scenarios = self
            .gateway
            .get_documents(Collection::Scenario, DS, &Filter::new(), None)
            .await
            .unwrap();
        assert_eq!(scenarios.len(), 1);
        scenarios[0]["activity_executions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry.as_str().unwrap().to_string())
            .collect()
    }
}

fn hydrated_ids(scenario: &Scenario) -> Vec<String> {
    scenario
        .activity_executions
        .iter()
        .map(|element| element["id"].as_str().unwrap().to_string())
        .collect()
}

fn ids(sequence: &[DocumentId]) -> Vec<String> {
    sequence.iter().map(|id| id.to_string()).collect()
}

/// One experiment, one activity, one scenario with three executions.
async fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let gateway: Arc<dyn StorageGateway> = Arc::new(MemoryGateway::new());
    let factory = ServiceFactory::new(gateway.clone());

    let experiment = factory
        .experiments()
        .save(&json!({"experiment_name": "reaction-time"}), DS)
        .await
        .unwrap()
        .found()
        .unwrap();
    let activity = factory
        .activities()
        .save(&json!({"activity": "individual", "additional_properties": []}), DS)
        .await
        .unwrap()
        .found()
        .unwrap();

    let input = ScenarioInput {
        experiment_id: Some(experiment.id.clone()),
        activity_executions: ["a", "b", "c"]
            .iter()
            .map(|label| ActivityExecutionInput {
                activity_id: Some(activity.id.clone()),
                arrangement_id: None,
                additional_properties: vec![Property::new("label", *label)],
            })
            .collect(),
    };
    let scenario = factory
        .scenarios()
        .save(&input, DS)
        .await
        .unwrap()
        .found()
        .unwrap();
    let sequence = scenario
        .activity_executions
        .iter()
        .map(|element| DocumentId::from(element["id"].as_str().unwrap()))
        .collect();

    Fixture {
        factory,
        gateway,
        experiment_id: experiment.id,
        activity_id: activity.id,
        sequence,
    }
}

#[tokio::test]
async fn save_persists_ids_but_returns_objects() {
    let fx = fixture().await;
    assert_eq!(fx.sequence.len(), 3);
    // The stored form is the raw id sequence; the returned scenario carried
    // full execution objects.
    assert_eq!(fx.stored_sequence().await, ids(&fx.sequence));

    // The executions landed inside the activity document, not in a collection
    // of their own.
    let executions = fx
        .factory
        .activity_executions()
        .get_many(DS, &Filter::new(), 0, Source::Unset)
        .await
        .unwrap();
    assert_eq!(executions.len(), 3);
}

#[tokio::test]
async fn save_rejects_unknown_experiment_and_persists_nothing() {
    let fx = fixture().await;
    let input = ScenarioInput {
        experiment_id: Some(DocumentId::from("ghost")),
        activity_executions: vec![fx.execution_input("x")],
    };
    let err = fx.factory.scenarios().save(&input, DS).await.unwrap_err();
    assert!(err.is_validation());

    // Validation runs before any write, so no second scenario and no fourth
    // execution exist.
    assert_eq!(fx.stored_sequence().await, ids(&fx.sequence));
    let executions = fx
        .factory
        .activity_executions()
        .get_many(DS, &Filter::new(), 0, Source::Unset)
        .await
        .unwrap();
    assert_eq!(executions.len(), 3);
}

#[tokio::test]
async fn insert_after_execution_splices_behind_it() {
    let fx = fixture().await;
    let [a, b, c] = &fx.sequence[..] else { panic!() };

    let inserted = fx
        .factory
        .scenarios()
        .insert_after(a, &fx.execution_input("x"), DS)
        .await
        .unwrap()
        .found()
        .unwrap();

    assert_eq!(
        fx.stored_sequence().await,
        vec![
            a.to_string(),
            inserted.id.to_string(),
            b.to_string(),
            c.to_string()
        ]
    );
}

#[tokio::test]
async fn insert_after_experiment_goes_to_the_front() {
    let fx = fixture().await;
    let inserted = fx
        .factory
        .scenarios()
        .insert_after(&fx.experiment_id, &fx.execution_input("x"), DS)
        .await
        .unwrap()
        .found()
        .unwrap();

    let stored = fx.stored_sequence().await;
    assert_eq!(stored.len(), 4);
    assert_eq!(stored[0], inserted.id.to_string());
    assert_eq!(stored[1..], ids(&fx.sequence)[..]);
}

#[tokio::test]
async fn insert_after_unknown_anchor_reports_missing() {
    let fx = fixture().await;
    let lookup = fx
        .factory
        .scenarios()
        .insert_after(&DocumentId::from("ghost"), &fx.execution_input("x"), DS)
        .await
        .unwrap();
    assert!(lookup.is_missing());

    // The execution was persisted before the anchor failed to resolve, so it
    // exists detached from any scenario.
    let executions = fx
        .factory
        .activity_executions()
        .get_many(DS, &Filter::new(), 0, Source::Unset)
        .await
        .unwrap();
    assert_eq!(executions.len(), 4);
    assert_eq!(fx.stored_sequence().await, ids(&fx.sequence));
}

#[tokio::test]
async fn remove_detaches_but_keeps_the_execution() {
    let fx = fixture().await;
    let [a, b, c] = &fx.sequence[..] else { panic!() };

    let detached = fx
        .factory
        .scenarios()
        .remove(b, DS)
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(&detached.id, b);

    assert_eq!(fx.stored_sequence().await, vec![a.to_string(), c.to_string()]);
    // Still fetchable as an execution; only its sequence membership is gone.
    let lookup = fx
        .factory
        .activity_executions()
        .get_one(b, DS, 0, Source::Unset)
        .await
        .unwrap();
    assert!(lookup.is_found());
}

#[tokio::test]
async fn reorder_moves_to_the_back() {
    let fx = fixture().await;
    let [a, b, c] = &fx.sequence[..] else { panic!() };

    let change = OrderChange {
        execution_id: a.clone(),
        previous_id: c.clone(),
    };
    let outcome = fx.factory.scenarios().change_order(&change, DS).await.unwrap();
    assert!(outcome.is_found());

    assert_eq!(
        fx.stored_sequence().await,
        vec![b.to_string(), c.to_string(), a.to_string()]
    );
}

#[tokio::test]
async fn reorder_after_experiment_moves_to_the_front() {
    let fx = fixture().await;
    let [a, b, c] = &fx.sequence[..] else { panic!() };

    let change = OrderChange {
        execution_id: c.clone(),
        previous_id: fx.experiment_id.clone(),
    };
    fx.factory
        .scenarios()
        .change_order(&change, DS)
        .await
        .unwrap();

    assert_eq!(
        fx.stored_sequence().await,
        vec![c.to_string(), a.to_string(), b.to_string()]
    );
}

#[tokio::test]
async fn reorder_rejects_identical_ids_without_touching_the_sequence() {
    let fx = fixture().await;
    let a = fx.sequence[0].clone();

    let change = OrderChange {
        execution_id: a.clone(),
        previous_id: a,
    };
    let err = fx
        .factory
        .scenarios()
        .change_order(&change, DS)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert_eq!(fx.stored_sequence().await, ids(&fx.sequence));
}

#[tokio::test]
async fn hydration_resolves_ids_and_attaches_the_experiment() {
    let fx = fixture().await;
    let scenario = fx
        .factory
        .scenarios()
        .get_by_element(&fx.sequence[1], DS, 1)
        .await
        .unwrap()
        .found()
        .unwrap();

    assert_eq!(hydrated_ids(&scenario), ids(&fx.sequence));
    assert!(scenario
        .activity_executions
        .iter()
        .all(Value::is_object));
    let experiment = scenario.experiment.expect("experiment attached");
    assert_eq!(experiment["id"], fx.experiment_id.as_str());
}

#[tokio::test]
async fn lookup_by_unassigned_entry_points_reports_missing() {
    let fx = fixture().await;
    let scenarios = fx.factory.scenarios();

    // A second experiment with no scenario of its own.
    let lonely = fx
        .factory
        .experiments()
        .save(&json!({"experiment_name": "unassigned"}), DS)
        .await
        .unwrap()
        .found()
        .unwrap();
    assert!(scenarios
        .get_by_experiment(&lonely.id, DS, 0)
        .await
        .unwrap()
        .is_missing());

    // An execution that exists but is not part of any sequence.
    let detached = fx
        .factory
        .activity_executions()
        .save(&fx.execution_input("loose"), DS)
        .await
        .unwrap()
        .found()
        .unwrap();
    match scenarios
        .get_by_activity_execution(&detached.id, DS, 0)
        .await
        .unwrap()
    {
        Lookup::Missing(not_found) => assert_eq!(not_found.id, Some(detached.id)),
        Lookup::Found(_) => panic!("expected the not-found sentinel"),
    }
}
