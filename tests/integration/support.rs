use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use modelsync::config::SyncConfig;
use modelsync::engine::SyncEngine;
use modelsync::error::TransportError;
use modelsync::schema::parse_schema_str;
use modelsync::subscription::{Delivery, DeliveryStream, Transport};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

pub const SCHEMA: &str = r#"
[collections.meeting]
fieldsets = { default = ["name"] }
title_field = "name"
full_list = { collection = "meeting", ids = [1], follow = [{ idField = "motion_ids", isFullList = true }] }

[collections.motion]
sort_by = "number"
fieldsets = { default = ["title", "number"], list = ["title", "number"] }

[collections.user]
fieldsets = { default = ["title"], title = ["title"] }

[collections.group]
fieldsets = { default = ["name"] }

[collections.topic]
fieldsets = { default = ["title"] }

[collections.agenda_item]
fieldsets = { default = ["item_number"] }

[collections.motion_block]
fieldsets = { default = ["title"] }

[[relations]]
collection = "motion"
targets = ["user"]
own = { id_field = "submitter_ids", many = true }
inverse = { id_field = "submitted_motion_ids", many = true }

[[relations]]
collection = "meeting"
targets = ["motion"]
own = { id_field = "motion_ids", many = true }
inverse = { id_field = "meeting_id" }

[[relations]]
collection = "motion_block"
targets = ["motion"]
own = { id_field = "motion_ids", many = true }
inverse = { id_field = "block_id" }

[[relations]]
collection = "agenda_item"
targets = ["motion", "topic"]
own = { id_field = "content_object_id" }
inverse = { id_field = "agenda_item_id" }

[[relations]]
collection = "user"
targets = ["group"]
own = { id_field = "group_$_ids", field = "groups", many = true, default_parameter = "active_context" }
inverse = { id_field = "user_ids", many = true }
"#;

/// In-memory transport: queued one-shot responses and hand-fed streams.
#[derive(Default)]
pub struct MockTransport {
    posts: Mutex<Vec<(String, Value)>>,
    opened: Mutex<Vec<(String, Value)>>,
    responses: Mutex<VecDeque<Value>>,
    feeds: Mutex<VecDeque<UnboundedReceiver<Result<Delivery, TransportError>>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, value: Value) {
        self.responses.lock().push_back(value);
    }

    /// Sender side of the next stream opened.
    pub fn feed(&self) -> UnboundedSender<Result<Delivery, TransportError>> {
        let (sender, receiver) = mpsc::unbounded();
        self.feeds.lock().push_back(receiver);
        sender
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.lock().clone()
    }

    pub fn opened(&self) -> Vec<(String, Value)> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post(&self, url: &str, body: Value) -> Result<Value, TransportError> {
        self.posts.lock().push((url.to_string(), body));
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::UnexpectedPayload("no response queued".to_string()))
    }

    async fn open_stream(&self, url: &str, body: Value) -> Result<DeliveryStream, TransportError> {
        self.opened.lock().push((url.to_string(), body));
        let feed = self.feeds.lock().pop_front().ok_or(TransportError::StreamClosed)?;
        Ok(feed.boxed())
    }
}

pub fn test_engine(transport: Arc<MockTransport>) -> SyncEngine {
    let compiled = parse_schema_str(SCHEMA).unwrap().compile().unwrap();
    let mut config = SyncConfig::default();
    config.repository.sort_debounce_ms = 0;
    SyncEngine::new(compiled, &config, transport)
}

pub fn delivery(value: Value) -> Delivery {
    value.as_object().cloned().unwrap()
}
