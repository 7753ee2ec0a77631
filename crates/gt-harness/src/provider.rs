//! Model endpoint abstraction.
//!
//! [`ModelClient`] is the single seam between the retry machinery and the
//! remote endpoint. A request carries a model id, a requested output size and
//! a list of typed content blocks; a response carries a list of text blocks.
//!
//! - [`HttpModelClient`] talks to a Bedrock-style `invoke` endpoint over
//!   `reqwest`.
//! - [`MockModelClient`] replays queued responses and records every request,
//!   for tests.
//!
//! Errors are mapped into [`ProviderError`]; the only distinction the retry
//! loop cares about is [`ProviderError::is_throttling`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use gt_core::config::{CredentialProvider, InvocationConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when calling a model endpoint.
///
/// Every variant is retryable from the invoker's point of view; throttling is
/// singled out because it is logged at a lower severity.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The endpoint rejected the call because of its own rate limits.
    #[error("throttled by endpoint: retry after {retry_after_secs:?}s")]
    Throttled { retry_after_secs: Option<u64> },

    /// Connection, DNS or TLS failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The endpoint answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be decoded or held no text.
    #[error("parse error: {0}")]
    Parse(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,
}

impl ProviderError {
    pub fn is_throttling(&self) -> bool {
        matches!(self, ProviderError::Throttled { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One typed piece of request content (`{"type": "text", "text": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// A request to the model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPayload {
    pub model_id: String,
    /// Requested output size in tokens. Clamped by the invoker before sending.
    pub max_output_size: u32,
    pub content: Vec<ContentBlock>,
}

impl InvocationPayload {
    pub fn new(model_id: impl Into<String>, max_output_size: u32) -> Self {
        Self {
            model_id: model_id.into(),
            max_output_size,
            content: Vec::new(),
        }
    }

    /// Append a text block (builder style).
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content.push(ContentBlock::text(text));
        self
    }

    /// All text content joined by single spaces; this is what input limits
    /// are measured against.
    pub fn input_text(&self) -> String {
        self.content
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One block of a model response. Non-text blocks carry no `text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseBlock {
    #[serde(default)]
    pub text: Option<String>,
}

/// Body of a successful model response (`{"content": [{"text": ...}, ...]}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(default)]
    pub content: Vec<ResponseBlock>,
}

impl InvocationResponse {
    /// A response holding a single text block.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ResponseBlock {
                text: Some(text.into()),
            }],
        }
    }

    /// Concatenated text of all text blocks, or `None` when there are none.
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}

// ---------------------------------------------------------------------------
// ModelClient trait
// ---------------------------------------------------------------------------

/// Async trait for model endpoints.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue one call. No retries happen at this layer.
    async fn invoke(
        &self,
        payload: &InvocationPayload,
    ) -> Result<InvocationResponse, ProviderError>;

    /// Human-readable client name for logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HttpModelClient
// ---------------------------------------------------------------------------

const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";
const THROTTLING_EXCEPTION: &str = "ThrottlingException";

/// Client for a Bedrock-runtime style `POST /model/{model_id}/invoke` endpoint.
pub struct HttpModelClient {
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<String>,
}

impl HttpModelClient {
    /// Create a client for `endpoint` with a per-request timeout.
    pub fn new(
        endpoint: impl Into<String>,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
        })
    }

    /// Build from the `[invocation]` config section, reading the token from
    /// the configured env var.
    pub fn from_config(cfg: &InvocationConfig) -> Result<Self, ProviderError> {
        Self::new(
            cfg.endpoint.clone(),
            CredentialProvider::invocation_token(cfg),
            cfg.request_timeout(),
        )
    }

    pub fn invoke_url(&self, model_id: &str) -> String {
        format!("{}/model/{}/invoke", self.endpoint, model_id)
    }

    /// Build the JSON request body for the Anthropic-on-Bedrock messages format.
    pub fn build_request_body(payload: &InvocationPayload) -> serde_json::Value {
        serde_json::json!({
            "anthropic_version": ANTHROPIC_BEDROCK_VERSION,
            "max_tokens": payload.max_output_size,
            "messages": [{
                "role": "user",
                "content": payload.content,
            }],
        })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn invoke(
        &self,
        payload: &InvocationPayload,
    ) -> Result<InvocationResponse, ProviderError> {
        let body = Self::build_request_body(payload);
        let mut request = self
            .client
            .post(self.invoke_url(&payload.model_id))
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .json(&body);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<InvocationResponse>()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()));
        }

        let header_throttled = resp
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(THROTTLING_EXCEPTION));
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let text = resp.text().await.unwrap_or_default();

        if status.as_u16() == 429 || header_throttled || text.contains(THROTTLING_EXCEPTION) {
            return Err(ProviderError::Throttled {
                retry_after_secs: retry_after,
            });
        }
        Err(ProviderError::Api {
            status: status.as_u16(),
            message: text,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ---------------------------------------------------------------------------
// MockModelClient
// ---------------------------------------------------------------------------

/// A scripted model client for testing.
///
/// Each call pops the next queued result. When the queue is empty it answers
/// with `"Mock response"`. Every payload it receives is captured.
#[derive(Clone, Default)]
pub struct MockModelClient {
    responses: Arc<Mutex<VecDeque<Result<InvocationResponse, ProviderError>>>>,
    captured: Arc<Mutex<Vec<InvocationPayload>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful single-block text response.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_response(InvocationResponse::from_text(text))
    }

    /// Queue a successful response.
    pub fn with_response(self, response: InvocationResponse) -> Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    /// Queue an error.
    pub fn with_error(self, error: ProviderError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Payloads received so far, in call order.
    pub fn captured(&self) -> Vec<InvocationPayload> {
        lock(&self.captured).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.captured).len()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn invoke(
        &self,
        payload: &InvocationPayload,
    ) -> Result<InvocationResponse, ProviderError> {
        lock(&self.captured).push(payload.clone());
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(InvocationResponse::from_text("Mock response")))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
