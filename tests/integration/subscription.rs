use modelsync::error::{SyncError, TransportError};
use modelsync::request::SimplifiedModelRequest;
use modelsync::subscription::SubscriptionEvent;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use crate::integration::support::{delivery, test_engine, MockTransport};

fn motions() -> SimplifiedModelRequest {
    SimplifiedModelRequest::new("motion", [1, 2])
}

#[tokio::test]
async fn stream_deliveries_apply_in_order_until_closed() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    let feed = transport.feed();
    let mut handle = engine.subscribe(&motions()).await.unwrap();
    assert_eq!(engine.subscription_channel().active(), vec![handle.id()]);

    feed.unbounded_send(Ok(delivery(json!({"motion/1/title": "A"}))))
        .unwrap();
    feed.unbounded_send(Ok(delivery(json!({"motion/1/title": "B", "motion/2/title": "C"}))))
        .unwrap();

    for expected in [1, 2] {
        match handle.next_event().await {
            Some(SubscriptionEvent::Applied(report)) => assert_eq!(report.changed, expected),
            other => panic!("expected an applied delivery, got {:?}", other),
        }
    }
    let repository = engine.repository("motion").unwrap();
    assert_eq!(repository.get(1).unwrap().get_str("title"), Some("B"));

    handle.close();
    assert!(engine.subscription_channel().active().is_empty());

    let _ = feed.unbounded_send(Ok(delivery(json!({"motion/9/title": "late"}))));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert!(!engine.store().contains("motion", 9));
    assert_eq!(repository.len(), 2);
}

#[tokio::test]
async fn bad_delivery_is_reported_and_stream_continues() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    let feed = transport.feed();
    let mut handle = engine.subscribe(&motions()).await.unwrap();

    feed.unbounded_send(Ok(delivery(json!({"motion/x/title": "A"}))))
        .unwrap();
    feed.unbounded_send(Err(TransportError::UnexpectedPayload("[]".to_string())))
        .unwrap();
    feed.unbounded_send(Ok(delivery(json!({"motion/1/title": "A"}))))
        .unwrap();
    drop(feed);

    assert!(matches!(
        handle.next_event().await,
        Some(SubscriptionEvent::Error(SyncError::Decode(_)))
    ));
    assert!(matches!(
        handle.next_event().await,
        Some(SubscriptionEvent::Error(SyncError::Transport(_)))
    ));
    assert!(matches!(
        handle.next_event().await,
        Some(SubscriptionEvent::Applied(_))
    ));
    assert!(matches!(handle.next_event().await, Some(SubscriptionEvent::Ended)));
    assert!(engine.subscription_channel().active().is_empty());
    assert!(!engine.coordinator().is_slot_open());
}

#[tokio::test]
async fn stream_open_failure_is_returned() {
    let engine = test_engine(MockTransport::new());
    let result = engine.subscribe(&motions()).await;
    assert!(matches!(
        result,
        Err(SyncError::Transport(TransportError::StreamClosed))
    ));
    assert!(engine.subscription_channel().active().is_empty());
}

#[tokio::test]
async fn reset_closes_subscriptions_and_empties_cache() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    let _feed = transport.feed();
    let _handle = engine.subscribe(&motions()).await.unwrap();
    engine
        .apply_delivery(&delivery(json!({"motion/1/title": "A", "user/2/title": "Bob"})))
        .await
        .unwrap();
    let mut modified = engine.subscribe_modified();

    engine.reset();

    assert!(engine.subscription_channel().active().is_empty());
    assert!(engine.store().collection_names().is_empty());
    assert!(engine.repository("motion").unwrap().is_empty());
    assert!(engine.repository("user").unwrap().is_empty());
    let summary = modified.recv().await.unwrap();
    assert!(summary.deleted["motion"].contains(&1));
}

#[tokio::test]
async fn resync_replaces_every_collection_in_one_commit() {
    let engine = test_engine(MockTransport::new());
    engine
        .apply_delivery(&delivery(json!({"motion/1/title": "A", "motion/2/title": "B"})))
        .await
        .unwrap();
    let mut modified = engine.subscribe_modified();

    let mut models = HashMap::new();
    models.insert(
        "motion".to_string(),
        vec![json!({"id": 7, "title": "G"}).as_object().cloned().unwrap()],
    );
    engine.resync(models).await.unwrap();

    let repository = engine.repository("motion").unwrap();
    let ids: Vec<u64> = repository.get_all().iter().map(|m| m.id()).collect();
    assert_eq!(ids, vec![7]);

    let summary = modified.recv().await.unwrap();
    assert_eq!(summary.deleted["motion"].len(), 2);
    assert!(summary.changed["motion"].contains(&7));
    assert!(modified.try_recv().is_err());
}

#[tokio::test]
async fn closing_subscription_queued_on_slot_releases_the_queue() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    let feed = transport.feed();
    let handle = engine.subscribe(&motions()).await.unwrap();

    let slot = engine.coordinator().acquire_slot().await.unwrap();
    feed.unbounded_send(Ok(delivery(json!({"motion/1/title": "A"}))))
        .unwrap();
    while engine.coordinator().queued() == 0 {
        tokio::task::yield_now().await;
    }

    drop(handle);
    assert!(engine.subscription_channel().active().is_empty());
    engine.coordinator().commit(slot).unwrap();

    let next = tokio::time::timeout(Duration::from_secs(1), engine.coordinator().acquire_slot())
        .await
        .expect("slot queue stalled after closing a subscription")
        .unwrap();
    assert!(!engine.store().contains("motion", 1));
    engine.coordinator().commit(next).unwrap();
    assert!(!engine.coordinator().is_slot_open());
    assert_eq!(engine.coordinator().queued(), 0);
}
