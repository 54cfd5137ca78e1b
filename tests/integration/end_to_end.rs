use modelsync::error::{KeyError, RequestError, SyncError};
use modelsync::request::{FieldDescriptor, Follow, SimplifiedModelRequest};
use serde_json::json;
use std::sync::Arc;

use crate::integration::support::{delivery, test_engine, MockTransport};

#[tokio::test]
async fn motion_list_follow_submitters_resolves_in_id_order() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    transport.respond(json!({
        "motion/1/title": "Budget",
        "motion/1/number": "A1",
        "motion/1/submitter_ids": [6, 5],
        "user/5/title": "Alice",
        "user/6/title": "Bob",
    }));

    let request = SimplifiedModelRequest::new("motion", [1])
        .fieldset("list")
        .follow(Follow::new("submitter_ids").fieldset("title"));
    let report = engine.fetch(&request).await.unwrap();
    assert_eq!(report.changed, 3);
    assert_eq!(report.deleted, 0);

    let posts = transport.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, "http://localhost:9012/system/autoupdate?single=1");
    assert_eq!(
        posts[0].1,
        json!({
            "collection": "motion",
            "ids": [1],
            "fields": {
                "id": null,
                "number": null,
                "title": null,
                "submitter_ids": {
                    "type": "relation-list",
                    "collection": "user",
                    "fields": {"id": null, "title": null}
                }
            }
        })
    );

    let motion = engine.repository("motion").unwrap().get(1).unwrap();
    let titles: Vec<String> = motion
        .related_many("submitters")
        .unwrap()
        .iter()
        .map(|user| user.get_str("title").unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn partial_delivery_rebuilds_without_mutating_stale_view_model() {
    let engine = test_engine(MockTransport::new());
    engine
        .apply_delivery(&delivery(json!({"motion/1/title": "Old", "motion/1/number": "7"})))
        .await
        .unwrap();

    let repository = engine.repository("motion").unwrap();
    let stale = repository.get(1).unwrap();
    let mut observed = repository.subscribe(1);
    assert_eq!(
        observed.borrow_and_update().as_ref().unwrap().get_str("title"),
        Some("Old")
    );

    engine
        .apply_delivery(&delivery(json!({"motion/1/title": "New"})))
        .await
        .unwrap();

    assert!(observed.has_changed().unwrap());
    let fresh = observed.borrow_and_update().clone().unwrap();
    assert_eq!(fresh.get_str("title"), Some("New"));
    assert_eq!(fresh.get_str("number"), Some("7"));
    assert_eq!(stale.get_str("title"), Some("Old"));
    assert_ne!(stale, fresh);
}

#[tokio::test]
async fn deletion_reaches_repositories_only_at_commit() {
    let engine = Arc::new(test_engine(MockTransport::new()));
    engine
        .apply_delivery(&delivery(json!({"motion/1/title": "A", "motion/2/title": "B"})))
        .await
        .unwrap();
    let repository = engine.repository("motion").unwrap().clone();

    let slot = engine.coordinator().acquire_slot().await.unwrap();
    let pending = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .apply_delivery(&delivery(json!({"motion/1/id": null})))
                .await
        })
    };
    while engine.coordinator().queued() == 0 {
        tokio::task::yield_now().await;
    }
    assert!(engine.store().contains("motion", 1));

    engine.store().remove("motion", &[2]);
    assert!(!engine.store().contains("motion", 2));
    assert!(repository.get(2).is_some());

    engine.coordinator().commit(slot).unwrap();
    assert!(repository.get(2).is_none());

    let report = pending.await.unwrap().unwrap();
    assert_eq!(report.deleted, 1);
    assert!(repository.get(1).is_none());
    assert!(repository.is_empty());
    assert!(!engine.coordinator().is_slot_open());
}

#[tokio::test]
async fn one_commit_publishes_cross_collection_changes_together() {
    let engine = test_engine(MockTransport::new());
    let mut modified = engine.subscribe_modified();

    engine
        .apply_delivery(&delivery(json!({
            "motion/3/title": "C",
            "motion/3/block_id": 9,
            "motion_block/9/title": "Block",
            "motion_block/9/motion_ids": [3],
        })))
        .await
        .unwrap();

    let summary = modified.recv().await.unwrap();
    assert!(summary.changed["motion"].contains(&3));
    assert!(summary.changed["motion_block"].contains(&9));
    assert!(modified.try_recv().is_err());

    let block = engine.repository("motion_block").unwrap().get(9).unwrap();
    let motions = block.related_many("motions").unwrap();
    assert_eq!(motions.len(), 1);
    let back = motions[0].related_one("block").unwrap().unwrap();
    assert_eq!(back.id(), 9);
}

#[tokio::test]
async fn sorted_list_uses_collection_sort_field() {
    let engine = test_engine(MockTransport::new());
    engine
        .apply_delivery(&delivery(json!({
            "motion/1/number": "B",
            "motion/2/number": "A",
            "motion/3/number": "C",
        })))
        .await
        .unwrap();
    let sorted = engine.repository("motion").unwrap().sorted();
    let ids: Vec<u64> = sorted.iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec![2, 1, 3]);
}

#[tokio::test]
async fn unregistered_collection_is_dropped_and_rest_applied() {
    let engine = test_engine(MockTransport::new());
    let report = engine
        .apply_delivery(&delivery(json!({
            "poll/1/title": "Vote",
            "motion/1/title": "A",
        })))
        .await
        .unwrap();

    assert_eq!(report.dropped_collections, vec!["poll".to_string()]);
    assert_eq!(report.changed, 1);
    assert!(engine.store().get("poll", 1).is_none());
    assert!(engine.repository("motion").unwrap().get(1).is_some());
}

#[tokio::test]
async fn malformed_key_rejects_delivery_without_opening_a_slot() {
    let engine = test_engine(MockTransport::new());
    let result = engine
        .apply_delivery(&delivery(json!({
            "motion/1/title": "A",
            "motion/2": "broken",
        })))
        .await;

    assert!(matches!(
        result,
        Err(SyncError::Decode(KeyError::MalformedKey { expected_parts: 3, .. }))
    ));
    assert!(!engine.store().contains("motion", 1));
    assert!(!engine.coordinator().is_slot_open());

    engine
        .apply_delivery(&delivery(json!({"motion/1/title": "A"})))
        .await
        .unwrap();
    assert!(engine.store().contains("motion", 1));
}

#[test]
fn unknown_follow_fails_but_generic_candidates_are_probed() {
    let engine = test_engine(MockTransport::new());

    let unknown = engine.build_request(
        &SimplifiedModelRequest::new("motion", [1]).follow(Follow::new("nonexistent_ids")),
    );
    assert!(matches!(
        unknown,
        Err(SyncError::Request(RequestError::UnknownRelation { .. }))
    ));

    let built = engine
        .build_request(
            &SimplifiedModelRequest::new("agenda_item", [1])
                .follow(Follow::new("content_object_id").follow(Follow::new("submitter_ids"))),
        )
        .unwrap();
    match &built.request.fields["content_object_id"] {
        Some(FieldDescriptor::GenericRelation { fields }) => {
            assert!(fields.contains_key("submitter_ids"));
            assert!(fields.contains_key("title"));
        }
        other => panic!("expected a generic relation, got {:?}", other),
    }
}

#[tokio::test]
async fn generic_and_structured_relations_resolve_against_the_store() {
    let engine = test_engine(MockTransport::new());
    engine
        .apply_delivery(&delivery(json!({
            "agenda_item/4/content_object_id": "topic/2",
            "topic/2/title": "Welcome",
            "topic/2/agenda_item_id": 4,
            "user/1/title": "Alice",
            "user/1/group_$3_ids": [7],
            "user/1/group_$5_ids": [8],
            "group/7/name": "Delegates",
            "group/8/name": "Admins",
        })))
        .await
        .unwrap();

    let item = engine.repository("agenda_item").unwrap().get(4).unwrap();
    let content = item.related_one("content_object").unwrap().unwrap();
    assert_eq!(content.fqid(), "topic/2");
    assert_eq!(content.related_one("agenda_item").unwrap().unwrap().id(), 4);

    let user = engine.repository("user").unwrap().get(1).unwrap();
    let in_five = user.structured_relation("groups", "5").unwrap().into_many();
    assert_eq!(in_five[0].get_str("name"), Some("Admins"));

    assert!(matches!(
        user.related_many("groups"),
        Err(modelsync::error::RelationError::MissingStructuredParameter { .. })
    ));
    engine.context().set(3);
    let active = user.related_many("groups").unwrap();
    assert_eq!(active[0].get_str("name"), Some("Delegates"));
}

#[tokio::test]
async fn held_view_model_reads_relations_from_current_store_state() {
    let engine = test_engine(MockTransport::new());
    engine
        .apply_delivery(&delivery(json!({
            "motion/1/submitter_ids": [5],
            "user/5/title": "Alice",
            "user/6/title": "Bob",
        })))
        .await
        .unwrap();
    let held = engine.repository("motion").unwrap().get(1).unwrap();

    let slot = engine.coordinator().acquire_slot().await.unwrap();
    engine
        .store()
        .add_or_update(
            "motion",
            vec![json!({"id": 1, "submitter_ids": [6]}).as_object().cloned().unwrap()],
        )
        .unwrap();

    assert_eq!(held.get("submitter_ids"), Some(&json!([5])));
    let titles: Vec<String> = held
        .related_many("submitters")
        .unwrap()
        .iter()
        .map(|user| user.get_str("title").unwrap().to_string())
        .collect();
    assert_eq!(titles, vec!["Bob"]);

    engine.coordinator().commit(slot).unwrap();
    engine.store().remove("motion", &[1]);
    let fallback = held.related_many("submitters").unwrap();
    assert_eq!(fallback[0].get_str("title"), Some("Alice"));
}
