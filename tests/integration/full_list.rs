use modelsync::error::{RequestError, SyncError};
use modelsync::request::{Follow, SimplifiedModelRequest};
use modelsync::subscription::SubscriptionEvent;
use serde_json::json;
use std::collections::BTreeSet;

use crate::integration::support::{delivery, test_engine, MockTransport};

fn meeting_with_motions() -> SimplifiedModelRequest {
    SimplifiedModelRequest::new("meeting", [1]).follow(Follow::new("motion_ids").full_list())
}

#[tokio::test]
async fn full_list_delivery_implicitly_deletes_unlisted_ids() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    engine
        .apply_delivery(&delivery(json!({
            "meeting/1/motion_ids": [1, 2, 3, 4],
            "motion/1/title": "A",
            "motion/2/title": "B",
            "motion/3/title": "C",
            "motion/4/title": "D",
        })))
        .await
        .unwrap();

    let feed = transport.feed();
    let mut handle = engine.subscribe(&meeting_with_motions()).await.unwrap();
    feed.unbounded_send(Ok(delivery(json!({
        "meeting/1/motion_ids": [2, 3],
        "motion/2/title": "B2",
    }))))
    .unwrap();

    let report = match handle.next_event().await {
        Some(SubscriptionEvent::Applied(report)) => report,
        other => panic!("expected an applied delivery, got {:?}", other),
    };
    assert_eq!(report.implicitly_deleted["motion"], BTreeSet::from([1, 4]));
    assert_eq!(engine.store().ids("motion"), BTreeSet::from([2, 3]));

    let repository = engine.repository("motion").unwrap();
    assert!(repository.get(1).is_none());
    assert_eq!(repository.get(2).unwrap().get_str("title"), Some("B2"));
    assert_eq!(repository.get(3).unwrap().get_str("title"), Some("C"));
}

#[tokio::test]
async fn delivery_without_owner_list_deletes_nothing() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    engine
        .apply_delivery(&delivery(json!({
            "meeting/1/motion_ids": [1, 2],
            "motion/1/title": "A",
            "motion/2/title": "B",
        })))
        .await
        .unwrap();

    let feed = transport.feed();
    let mut handle = engine.subscribe(&meeting_with_motions()).await.unwrap();
    feed.unbounded_send(Ok(delivery(json!({"motion/2/title": "B2"}))))
        .unwrap();

    match handle.next_event().await {
        Some(SubscriptionEvent::Applied(report)) => assert!(report.implicitly_deleted.is_empty()),
        other => panic!("expected an applied delivery, got {:?}", other),
    }
    assert_eq!(engine.store().ids("motion"), BTreeSet::from([1, 2]));
}

#[test]
fn two_owners_claiming_one_full_list_conflict() {
    let engine = test_engine(MockTransport::new());
    let request = SimplifiedModelRequest::new("meeting", [1]).follow(
        Follow::new("motion_ids")
            .full_list()
            .follow(Follow::new("block_id").follow(Follow::new("motion_ids").full_list())),
    );

    match engine.build_request(&request) {
        Err(SyncError::Request(RequestError::ConflictingFullList {
            foreign,
            existing,
            requested,
        })) => {
            assert_eq!(foreign, "motion");
            assert_eq!(existing, "motion_block/motion_ids");
            assert_eq!(requested, "meeting/motion_ids");
        }
        other => panic!("expected a full-list conflict, got {:?}", other),
    }

    let single = engine.build_request(&meeting_with_motions()).unwrap();
    assert_eq!(
        single.full_lists.iter().collect::<Vec<_>>(),
        vec![("meeting", "motion_ids", "motion")]
    );
}

#[tokio::test]
async fn full_list_sources_are_subscribed() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    let _feed = transport.feed();

    let handles = engine.subscribe_full_lists().await.unwrap();
    assert_eq!(handles.len(), 1);

    let opened = transport.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, "http://localhost:9012/system/autoupdate");
    assert_eq!(opened[0].1["collection"], "meeting");
    assert_eq!(opened[0].1["fields"]["motion_ids"]["type"], "relation-list");
}

#[tokio::test]
async fn members_listed_by_unchanged_owner_survive() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    engine
        .apply_delivery(&delivery(json!({
            "meeting/1/motion_ids": [1],
            "meeting/2/motion_ids": [5],
            "motion/1/title": "a",
            "motion/5/title": "e",
            "motion/7/title": "orphan",
        })))
        .await
        .unwrap();

    let feed = transport.feed();
    let request =
        SimplifiedModelRequest::new("meeting", [1, 2]).follow(Follow::new("motion_ids").full_list());
    let mut handle = engine.subscribe(&request).await.unwrap();
    feed.unbounded_send(Ok(delivery(json!({
        "meeting/1/motion_ids": [1, 3],
        "motion/3/title": "c",
    }))))
    .unwrap();

    let report = match handle.next_event().await {
        Some(SubscriptionEvent::Applied(report)) => report,
        other => panic!("expected an applied delivery, got {:?}", other),
    };
    assert_eq!(report.implicitly_deleted["motion"], BTreeSet::from([7]));
    assert_eq!(engine.store().ids("motion"), BTreeSet::from([1, 3, 5]));

    let meeting = engine.repository("meeting").unwrap().get(2).unwrap();
    let listed: Vec<u64> = meeting
        .related_many("motions")
        .unwrap()
        .iter()
        .map(|motion| motion.id())
        .collect();
    assert_eq!(listed, vec![5]);
}
