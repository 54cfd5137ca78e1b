use modelsync::error::SyncError;
use serde_json::json;

use crate::integration::support::{test_engine, MockTransport};

#[tokio::test]
async fn queued_actions_are_sent_as_one_batch() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    transport.respond(json!({
        "success": true,
        "message": "Actions handled successfully",
        "results": [[{"id": 9}], null],
    }));

    engine.actions().create("motion", vec![json!({"title": "New", "meeting_id": 1})]);
    engine.actions().delete("motion", &[3]);
    let results = engine.actions().flush().await.unwrap();
    assert_eq!(results, vec![json!([{"id": 9}]), json!(null)]);

    let posts = transport.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].0, "http://localhost:9012/system/action/handle_request");
    assert_eq!(
        posts[0].1,
        json!([
            {"action": "motion.create", "data": [{"title": "New", "meeting_id": 1}]},
            {"action": "motion.delete", "data": [{"id": 3}]},
        ])
    );

    assert!(!engine.store().contains("motion", 9));
}

#[tokio::test]
async fn rejected_action_surfaces_server_message() {
    let transport = MockTransport::new();
    let engine = test_engine(transport.clone());
    transport.respond(json!({"success": false, "message": "Missing permission"}));

    let result = engine
        .actions()
        .send("motion.update", vec![json!({"id": 1, "title": "X"})])
        .await;
    match result {
        Err(SyncError::Action { action, message }) => {
            assert_eq!(action, "motion.update");
            assert_eq!(message, "Missing permission");
        }
        other => panic!("expected an action error, got {:?}", other),
    }
}
