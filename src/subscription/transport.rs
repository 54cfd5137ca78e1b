//! Transport contract and its HTTP implementation.
//!
//! The autoupdate endpoint answers a one-shot `POST` with a single JSON
//! delivery, and a streaming `POST` with newline-delimited JSON deliveries.

use super::decode::Delivery;
use crate::error::TransportError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// Lazy, non-restartable sequence of deliveries
pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Single request/response round trip.
    async fn post(&self, url: &str, body: Value) -> Result<Value, TransportError>;

    /// Open a persistent delivery stream. Dropping the stream closes it.
    async fn open_stream(&self, url: &str, body: Value) -> Result<DeliveryStream, TransportError>;
}

pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    async fn send(
        &self,
        url: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, url: &str, body: Value) -> Result<Value, TransportError> {
        let response = self.send(url, &body, Some(self.timeout)).await?;
        Ok(response.json().await?)
    }

    async fn open_stream(&self, url: &str, body: Value) -> Result<DeliveryStream, TransportError> {
        let response = self.send(url, &body, None).await?;
        Ok(split_deliveries(response.bytes_stream()))
    }
}

/// Split a byte stream into newline-delimited JSON deliveries. Chunk
/// boundaries may fall anywhere; blank lines are skipped. A transport error
/// is yielded once and ends the stream.
pub fn split_deliveries<S, B, E>(bytes: S) -> DeliveryStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<TransportError> + Send,
{
    let state = (Box::pin(bytes), LineBuffer::default(), false);
    stream::unfold(state, |(mut bytes, mut buffer, mut done)| async move {
        loop {
            if let Some(line) = buffer.next_line() {
                if is_blank(&line) {
                    continue;
                }
                return Some((parse_delivery(&line), (bytes, buffer, done)));
            }
            if done {
                let line = buffer.take_rest();
                if is_blank(&line) {
                    return None;
                }
                return Some((parse_delivery(&line), (bytes, buffer, done)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    trace!(bytes = chunk.as_ref().len(), "Received stream chunk");
                    buffer.push(chunk.as_ref());
                }
                Some(Err(err)) => {
                    buffer.take_rest();
                    return Some((Err(err.into()), (bytes, buffer, true)));
                }
                None => done = true,
            }
        }
    })
    .boxed()
}

/// Pending bytes of a partially received line. `scanned` bytes are known to
/// hold no newline, so each chunk is searched once.
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
    scanned: usize,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.bytes[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                self.scanned = 0;
                Some(self.bytes.drain(..=end).collect())
            }
            None => {
                self.scanned = self.bytes.len();
                None
            }
        }
    }

    fn take_rest(&mut self) -> Vec<u8> {
        self.scanned = 0;
        std::mem::take(&mut self.bytes)
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

fn parse_delivery(line: &[u8]) -> Result<Delivery, TransportError> {
    match serde_json::from_slice::<Value>(line)? {
        Value::Object(delivery) => Ok(delivery),
        other => Err(TransportError::UnexpectedPayload(format!(
            "expected a JSON object delivery, found {}",
            other
        ))),
    }
}
