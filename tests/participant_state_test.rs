//! End-to-end coverage of the participant family: embedded state records,
//! personality id-list resolution and the participation bridge.

use std::sync::Arc;

use serde_json::json;
use studygraph::model::entities::{
    ParticipantStateInput, ParticipantStatePropertyPatch, ParticipantStateRelationPatch,
    PersonalityTraits, Property,
};
use studygraph::model::{DocumentId, Source};
use studygraph::services::ServiceFactory;
use studygraph::storage::{Filter, MemoryGateway};

const DS: &str = "trial";

fn factory() -> ServiceFactory {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ServiceFactory::new(Arc::new(MemoryGateway::new()))
}

struct Fixture {
    factory: ServiceFactory,
    participant_id: DocumentId,
    personality_id: DocumentId,
    state_id: DocumentId,
}

async fn fixture() -> Fixture {
    let factory = factory();
    let participant = factory
        .participants()
        .save(&json!({"name": "ppt-01", "sex": "female"}), DS)
        .await
        .unwrap()
        .found()
        .unwrap();
    let personality = factory
        .personalities()
        .save(
            &PersonalityTraits::Panas {
                negative_affect: 0.2,
                positive_affect: 0.7,
            },
            DS,
        )
        .await
        .unwrap()
        .found()
        .unwrap();
    let state = factory
        .participant_states()
        .save(
            &ParticipantStateInput {
                participant_id: Some(participant.id.clone()),
                age: Some(31),
                personality_ids: Some(vec![personality.id.clone()]),
                additional_properties: vec![Property::new("handedness", "left")],
            },
            DS,
        )
        .await
        .unwrap()
        .found()
        .unwrap();
    Fixture {
        factory,
        participant_id: participant.id,
        personality_id: personality.id,
        state_id: state.id,
    }
}

#[tokio::test]
async fn save_rejects_unknown_participant_and_persists_nothing() {
    let fx = fixture().await;
    let err = fx
        .factory
        .participant_states()
        .save(
            &ParticipantStateInput {
                participant_id: Some(DocumentId::from("ghost")),
                age: None,
                personality_ids: None,
                additional_properties: vec![],
            },
            DS,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let states = fx
        .factory
        .participant_states()
        .get_many(DS, &Filter::new(), 0, Source::Unset)
        .await
        .unwrap();
    assert_eq!(states.len(), 1, "only the fixture state may exist");
}

#[tokio::test]
async fn save_rejects_unknown_personality_in_the_id_list() {
    let fx = fixture().await;
    let err = fx
        .factory
        .participant_states()
        .save(
            &ParticipantStateInput {
                participant_id: Some(fx.participant_id.clone()),
                age: None,
                personality_ids: Some(vec![
                    fx.personality_id.clone(),
                    DocumentId::from("ghost"),
                ]),
                additional_properties: vec![],
            },
            DS,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn lifted_state_carries_its_participant_unless_arriving_from_it() {
    let fx = fixture().await;
    let state = fx
        .factory
        .participant_states()
        .get_one(&fx.state_id, DS, 1, Source::Unset)
        .await
        .unwrap()
        .found()
        .unwrap();
    let participant = state.participant.expect("owning participant attached");
    assert_eq!(participant["name"], "ppt-01");

    let from_participant = fx
        .factory
        .participant_states()
        .get_one(&fx.state_id, DS, 1, Source::Participant)
        .await
        .unwrap()
        .found()
        .unwrap();
    assert!(from_participant.participant.is_none());
}

#[tokio::test]
async fn participant_expands_its_embedded_states() {
    let fx = fixture().await;
    let participant = fx
        .factory
        .participants()
        .get_one(&fx.participant_id, DS, 2, Source::Unset)
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(participant.participant_states.len(), 1);
    let state = &participant.participant_states[0];
    assert_eq!(state["id"], fx.state_id.as_str());
    // The embedded state must not carry its owner back in.
    assert!(state.get("participant").is_none());
}

#[tokio::test]
async fn personalities_resolve_without_bouncing_back() {
    let fx = fixture().await;
    let state = fx
        .factory
        .participant_states()
        .get_one(&fx.state_id, DS, 2, Source::Unset)
        .await
        .unwrap()
        .found()
        .unwrap();
    let personalities = state.personalities.expect("personalities attached");
    assert_eq!(personalities.len(), 1);
    assert_eq!(personalities[0]["id"], fx.personality_id.as_str());
    assert!(
        personalities[0].get("participant_states").is_none(),
        "personality reached from a state must not re-list its states"
    );
}

#[tokio::test]
async fn personality_reverse_lookup_finds_listing_states() {
    let fx = fixture().await;
    let personality = fx
        .factory
        .personalities()
        .get_one(&fx.personality_id, DS, 2, Source::Unset)
        .await
        .unwrap()
        .found()
        .unwrap();
    let states = personality
        .participant_states
        .expect("listing states attached");
    assert_eq!(states.len(), 1);
    assert_eq!(states[0]["id"], fx.state_id.as_str());
}

#[tokio::test]
async fn participation_resolves_both_sides_without_cycling() {
    let fx = fixture().await;
    let participation = fx
        .factory
        .participations()
        .save(&json!({"participant_state_id": fx.state_id.as_str()}), DS)
        .await
        .unwrap()
        .found()
        .unwrap();

    let resolved = fx
        .factory
        .participations()
        .get_one(&participation.id, DS, 2, Source::Unset)
        .await
        .unwrap()
        .found()
        .unwrap();
    let state = resolved.participant_state.expect("state side attached");
    assert_eq!(state["id"], fx.state_id.as_str());
    assert!(
        state.get("participations").is_none(),
        "state reached from its participation must not bounce back"
    );

    // The other direction: the state lists its participations, which must not
    // re-resolve the state.
    let state = fx
        .factory
        .participant_states()
        .get_one(&fx.state_id, DS, 2, Source::Unset)
        .await
        .unwrap()
        .found()
        .unwrap();
    let participations = state.participations.expect("participations attached");
    assert_eq!(participations.len(), 1);
    assert!(participations[0].get("participant_state").is_none());
}

#[tokio::test]
async fn participation_save_rejects_unknown_state() {
    let fx = fixture().await;
    let err = fx
        .factory
        .participations()
        .save(&json!({"participant_state_id": "ghost"}), DS)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn update_merges_properties_and_keeps_relations() {
    let fx = fixture().await;
    let updated = fx
        .factory
        .participant_states()
        .update(
            &fx.state_id,
            &ParticipantStatePropertyPatch {
                age: Some(32),
                additional_properties: vec![Property::new("handedness", "right")],
            },
            DS,
        )
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(updated.age, Some(32));
    assert_eq!(updated.participant_id, Some(fx.participant_id.clone()));
    assert_eq!(
        updated.personality_ids,
        Some(vec![fx.personality_id.clone()])
    );
}

#[tokio::test]
async fn update_relationships_requires_existing_participant() {
    let fx = fixture().await;
    let err = fx
        .factory
        .participant_states()
        .update_relationships(
            &fx.state_id,
            &ParticipantStateRelationPatch {
                participant_id: DocumentId::from("ghost"),
                personality_ids: None,
            },
            DS,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    // Clearing the personality list through the relation path is fine.
    let cleared = fx
        .factory
        .participant_states()
        .update_relationships(
            &fx.state_id,
            &ParticipantStateRelationPatch {
                participant_id: fx.participant_id.clone(),
                personality_ids: None,
            },
            DS,
        )
        .await
        .unwrap()
        .found()
        .unwrap();
    assert_eq!(cleared.personality_ids, None);
}

#[tokio::test]
async fn delete_detaches_the_embedded_state() {
    let fx = fixture().await;
    let deleted = fx
        .factory
        .participant_states()
        .delete(&fx.state_id, DS)
        .await
        .unwrap();
    assert!(deleted.is_found());

    let gone = fx
        .factory
        .participant_states()
        .get_one(&fx.state_id, DS, 0, Source::Unset)
        .await
        .unwrap();
    assert!(gone.is_missing());

    let participant = fx
        .factory
        .participants()
        .get_one(&fx.participant_id, DS, 0, Source::Unset)
        .await
        .unwrap()
        .found()
        .unwrap();
    assert!(participant.participant_states.is_empty());
}

#[tokio::test]
async fn state_filters_are_rewritten_onto_the_owning_participant() {
    let fx = fixture().await;
    fx.factory
        .participant_states()
        .save(
            &ParticipantStateInput {
                participant_id: Some(fx.participant_id.clone()),
                age: Some(45),
                personality_ids: None,
                additional_properties: vec![],
            },
            DS,
        )
        .await
        .unwrap();

    let matching = fx
        .factory
        .participant_states()
        .get_many(DS, &Filter::new().eq("age", 45), 0, Source::Unset)
        .await
        .unwrap();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0]["age"], 45);

    let all = fx
        .factory
        .participant_states()
        .get_many(DS, &Filter::new(), 0, Source::Unset)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}
