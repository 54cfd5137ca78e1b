//! Action Gateway
//!
//! Write side of the cache. Writes never touch the store directly: they are
//! sent to the action endpoint, and their effects come back through the
//! subscription channel like any other change.

use crate::error::{SyncError, TransportError};
use crate::subscription::Transport;
use crate::types::Id;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// One named action with its payload entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub data: Vec<Value>,
}

impl ActionRequest {
    pub fn new(action: &str, data: Vec<Value>) -> Self {
        Self {
            action: action.to_string(),
            data,
        }
    }
}

#[async_trait]
pub trait ActionSender: Send + Sync {
    /// Send a batch; one result entry per request.
    async fn send_requests(&self, requests: &[ActionRequest]) -> Result<Vec<Value>, SyncError>;
}

/// Sends action batches to the action endpoint over the transport.
pub struct HttpActionSender {
    transport: Arc<dyn Transport>,
    url: String,
}

impl HttpActionSender {
    pub fn new(transport: Arc<dyn Transport>, url: &str) -> Self {
        Self {
            transport,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl ActionSender for HttpActionSender {
    async fn send_requests(&self, requests: &[ActionRequest]) -> Result<Vec<Value>, SyncError> {
        let body = serde_json::to_value(requests).map_err(TransportError::from)?;
        let response = self.transport.post(&self.url, body).await?;
        parse_action_response(requests, response)
    }
}

/// Accepts `{success, message, results}` or a bare result list.
fn parse_action_response(requests: &[ActionRequest], response: Value) -> Result<Vec<Value>, SyncError> {
    match response {
        Value::Array(results) => Ok(results),
        Value::Object(mut body) => {
            if body.get("success") == Some(&Value::Bool(false)) {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no message")
                    .to_string();
                let action = requests
                    .iter()
                    .map(|r| r.action.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(SyncError::Action { action, message });
            }
            match body.remove("results") {
                Some(Value::Array(results)) => Ok(results),
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(other) => Err(TransportError::UnexpectedPayload(format!(
                    "action results must be a list, found {}",
                    other
                ))
                .into()),
            }
        }
        other => Err(TransportError::UnexpectedPayload(format!(
            "unexpected action response {}",
            other
        ))
        .into()),
    }
}

/// Collects write requests into batches and sends them.
pub struct ActionGateway {
    sender: Arc<dyn ActionSender>,
    pending: Mutex<Vec<ActionRequest>>,
}

impl ActionGateway {
    pub fn new(sender: Arc<dyn ActionSender>) -> Self {
        Self {
            sender,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn create(&self, collection: &str, data: Vec<Value>) {
        self.enqueue(&format!("{}.create", collection), data);
    }

    pub fn update(&self, collection: &str, data: Vec<Value>) {
        self.enqueue(&format!("{}.update", collection), data);
    }

    pub fn delete(&self, collection: &str, ids: &[Id]) {
        let data = ids.iter().map(|id| json!({ "id": id })).collect();
        self.enqueue(&format!("{}.delete", collection), data);
    }

    /// Queue payload entries; entries for an already queued action are
    /// appended to it. Empty payloads are dropped.
    pub fn enqueue(&self, action: &str, data: Vec<Value>) {
        if data.is_empty() {
            debug!(action, "Skipping action with empty payload");
            return;
        }
        let mut pending = self.pending.lock();
        match pending.iter_mut().find(|request| request.action == action) {
            Some(request) => request.data.extend(data),
            None => pending.push(ActionRequest::new(action, data)),
        }
    }

    pub fn pending(&self) -> Vec<ActionRequest> {
        self.pending.lock().clone()
    }

    /// Send everything queued as one batch.
    pub async fn flush(&self) -> Result<Vec<Value>, SyncError> {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        debug!(actions = batch.len(), "Sending action batch");
        self.sender.send_requests(&batch).await
    }

    /// Send one action immediately, bypassing the queue.
    pub async fn send(&self, action: &str, data: Vec<Value>) -> Result<Vec<Value>, SyncError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        self.sender
            .send_requests(&[ActionRequest::new(action, data)])
            .await
    }
}
