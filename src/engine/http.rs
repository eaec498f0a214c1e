//! reqwest-backed dispatch engine
//!
//! A fixed pool of tokio workers pulls submitted requests from a shared
//! channel, performs the HTTP call with retry, and pushes results onto two
//! outboxes keyed by request id: whole bodies for non-streaming requests,
//! SSE `data` payloads for streaming ones. Failures never escape as errors:
//! a failed non-streaming call yields a JSON `{"error": ...}` body and a
//! failed stream ends with an error chunk, or directly with [`DONE`] when the
//! request never got a response.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::outbox::Outbox;
use super::{DONE, DispatchEngine, EngineOptions};
use crate::error::LlmError;
use crate::retry::RetryPolicy;
use crate::transformers::WireRequest;

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<WireRequest>>>;

struct Shared {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    debug: bool,
    buffer_size: AtomicUsize,
    in_flight: AtomicUsize,
    responses: Mutex<Outbox>,
    chunks: Mutex<Outbox>,
}

/// HTTP dispatch engine with a worker pool.
pub struct HttpEngine {
    shared: Arc<Shared>,
    sender: mpsc::UnboundedSender<WireRequest>,
    workers: Vec<JoinHandle<()>>,
    options: EngineOptions,
}

impl std::fmt::Debug for HttpEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEngine")
            .field("provider", &self.options.provider)
            .field("model", &self.options.model)
            .field("base_url", &self.options.base_url)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl HttpEngine {
    /// Start the worker pool. Must be called from within a tokio runtime.
    pub fn new(options: EngineOptions) -> Result<Self, LlmError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LlmError::EngineError("HttpEngine must be created inside a tokio runtime".to_string())
        })?;

        let worker_count = options.max_concurrent.max(1);
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(worker_count);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| LlmError::ConfigurationError(format!("failed to build HTTP client: {e}")))?;

        let shared = Arc::new(Shared {
            client,
            base_url: options.base_url.clone(),
            retry: options.retry.clone(),
            debug: options.debug,
            buffer_size: AtomicUsize::new(options.buffer_size.max(1)),
            in_flight: AtomicUsize::new(0),
            responses: Mutex::new(Outbox::default()),
            chunks: Mutex::new(Outbox::default()),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let workers = (0..worker_count)
            .map(|id| runtime.spawn(worker_loop(id, Arc::clone(&shared), Arc::clone(&receiver))))
            .collect();

        tracing::info!(
            provider = %options.provider,
            model = %options.model,
            workers = worker_count,
            buffer_size = options.buffer_size,
            "started HTTP engine"
        );

        Ok(Self {
            shared,
            sender,
            workers,
            options,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size.load(Ordering::Relaxed)
    }
}

impl Drop for HttpEngine {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl DispatchEngine for HttpEngine {
    fn submit(&self, payload: String) -> Result<(), LlmError> {
        let request = WireRequest::from_engine_payload(&payload)?;
        let id = request.request_id.clone();
        let stream = request.is_stream();
        self.shared.outbox(stream).open(&id);
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        self.sender.send(request).map_err(|_| {
            self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.shared.outbox(stream).complete(&id);
            LlmError::EngineError("engine workers have stopped".to_string())
        })
    }

    fn poll_response(&self) -> Option<String> {
        self.shared.outbox(false).pop_any()
    }

    fn poll_stream_chunk(&self) -> Option<String> {
        self.shared.outbox(true).pop_any()
    }

    fn poll_response_for(&self, request_id: &str) -> Option<String> {
        self.shared.outbox(false).pop_for(request_id)
    }

    fn poll_stream_chunk_for(&self, request_id: &str) -> Option<String> {
        self.shared.outbox(true).pop_for(request_id)
    }

    fn discard(&self, request_id: &str) {
        let dropped = self.shared.outbox(false).discard(request_id)
            + self.shared.outbox(true).discard(request_id);
        tracing::debug!(request_id, dropped, "discarded request output");
    }

    fn is_idle(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst) == 0
            && self.shared.outbox(false).is_empty()
            && self.shared.outbox(true).is_empty()
    }

    fn set_buffer_size(&self, size: usize) {
        self.shared.buffer_size.store(size.max(1), Ordering::Relaxed);
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>, receiver: SharedReceiver) {
    loop {
        let request = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };
        let Some(request) = request else {
            break;
        };
        let request_id = request.request_id.clone();
        let stream = request.is_stream();
        shared.process(id, request).await;
        shared.outbox(stream).complete(&request_id);
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
    tracing::debug!(worker = id, "engine worker stopped");
}

/// `{"error": {"message", "code"}}` body standing in for a failed call.
fn error_body(error: &LlmError) -> String {
    json!({
        "error": {
            "message": error.to_string(),
            "code": error.status_code(),
        }
    })
    .to_string()
}

pub(crate) fn join_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.is_empty() {
        return base_url.to_string();
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

pub(crate) fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, LlmError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LlmError::InvalidParameter(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| LlmError::InvalidParameter(format!("invalid header value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

impl Shared {
    fn outbox(&self, stream: bool) -> MutexGuard<'_, Outbox> {
        let queue = if stream { &self.chunks } else { &self.responses };
        queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, stream: bool, request_id: &str, item: String) {
        if !self.outbox(stream).push(request_id, item) && self.debug {
            tracing::debug!(request_id, "dropped output of discarded request");
        }
    }

    async fn process(&self, worker: usize, request: WireRequest) {
        let stream = request.is_stream();
        let request_id = request.request_id.as_str();

        let result = match header_map(&request.headers) {
            Ok(headers) => self.send(worker, &request, &headers).await,
            Err(error) => Err(error),
        };

        match (result, stream) {
            (Ok(response), false) => {
                let body = match self.read_body(response).await {
                    Ok(body) => body,
                    Err(error) => error_body(&error),
                };
                self.push(false, request_id, body);
            }
            (Ok(response), true) => self.forward_stream(worker, request_id, response).await,
            (Err(error), false) => {
                tracing::warn!(worker, request_id, %error, "request failed");
                self.push(false, request_id, error_body(&error));
            }
            (Err(error), true) => {
                tracing::warn!(worker, request_id, %error, "stream request failed");
                self.push(true, request_id, DONE.to_string());
            }
        }
    }

    async fn send(
        &self,
        worker: usize,
        request: &WireRequest,
        headers: &HeaderMap,
    ) -> Result<reqwest::Response, LlmError> {
        let url = join_url(&self.base_url, &request.endpoint);
        if self.debug {
            tracing::debug!(
                worker,
                request_id = %request.request_id,
                %url,
                stream = request.is_stream(),
                "dispatching request"
            );
        }

        let client = &self.client;
        let url = url.as_str();
        let body = &request.body;
        self.retry
            .execute(move || async move {
                let response = client
                    .post(url)
                    .headers(headers.clone())
                    .json(body)
                    .send()
                    .await?;
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }
                let message = response.text().await.unwrap_or_default();
                Err(LlmError::ApiError {
                    code: status.as_u16(),
                    message,
                })
            })
            .await
    }

    async fn read_body(&self, response: reqwest::Response) -> Result<String, LlmError> {
        let mut buffer = BytesMut::with_capacity(self.buffer_size.load(Ordering::Relaxed));
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        if self.debug {
            tracing::debug!(bytes = buffer.len(), "received response body");
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    async fn forward_stream(&self, worker: usize, request_id: &str, response: reqwest::Response) {
        let mut events = response.bytes_stream().eventsource();
        let mut forwarded = 0usize;
        while let Some(event) = events.next().await {
            if self.outbox(true).is_cancelled(request_id) {
                tracing::debug!(worker, request_id, "stream abandoned by caller");
                break;
            }
            match event {
                Ok(event) => {
                    let data = event.data.trim();
                    if data.is_empty() {
                        continue;
                    }
                    if data == DONE {
                        break;
                    }
                    forwarded += 1;
                    self.push(true, request_id, event.data);
                }
                Err(error) => {
                    let error = LlmError::StreamError(error.to_string());
                    tracing::warn!(worker, request_id, %error, "stream interrupted");
                    self.push(true, request_id, error_body(&error));
                    break;
                }
            }
        }
        if self.debug {
            tracing::debug!(worker, request_id, chunks = forwarded, "stream finished");
        }
        self.push(true, request_id, DONE.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_base_and_endpoint() {
        assert_eq!(
            join_url("https://api.openai.com/v1/", "/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            join_url("https://x", "https://y/full"),
            "https://y/full"
        );
        assert_eq!(join_url("https://x/v1", ""), "https://x/v1");
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(
            header_map(&headers),
            Err(LlmError::InvalidParameter(_))
        ));
    }

    #[test]
    fn error_body_is_json() {
        let body = error_body(&LlmError::ApiError {
            code: 401,
            message: "bad key".to_string(),
        });
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["error"]["code"], 401);
    }

    #[tokio::test]
    async fn malformed_submission_is_rejected_up_front() {
        let options = EngineOptions::new(crate::provider::ProviderKind::OpenAi, "gpt", "http://127.0.0.1:9");
        let engine = HttpEngine::new(options).unwrap();
        assert!(matches!(
            engine.submit("not json".to_string()),
            Err(LlmError::ParseError(_))
        ));
        assert!(engine.is_idle());
    }

    #[test]
    fn requires_runtime() {
        let options = EngineOptions::new(crate::provider::ProviderKind::OpenAi, "gpt", "http://x");
        assert!(matches!(
            HttpEngine::new(options),
            Err(LlmError::EngineError(_))
        ));
    }
}
