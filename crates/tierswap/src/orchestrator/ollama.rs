//! Ollama Runtime Adapter — `InferenceBackend` + `ModelProvisioner`
//!
//! Talks to an Ollama-compatible HTTP runtime on the local machine. One
//! `reqwest` client is created up front and reused for every call.
//!
//! ## Wire Mapping
//!
//! | Operation            | HTTP call                                                     |
//! |----------------------|---------------------------------------------------------------|
//! | `generate(request)`  | `POST /api/generate` `{model, prompt, stream:false, options}` |
//! | `start(model)`       | `POST /api/generate` `{model, keep_alive:-1}`                 |
//! | `stop(model)`        | `POST /api/generate` `{model, keep_alive:0}`                  |
//! | `is_available()`     | `GET /api/tags`                                               |
//!
//! `options` carries `temperature`, `num_predict` (token budget) and
//! `num_ctx` (context window).
//!
//! ## Retry Strategy
//!
//! Transient failures (connection refused, timeouts, HTTP 429 and 5xx) are
//! retried with exponential backoff and jitter:
//!
//! ```text
//! Attempt 1: immediate
//! Attempt 2: base_delay × 2^0 + jitter
//! Attempt 3: base_delay × 2^1 + jitter
//! ```
//!
//! Client errors (unknown model, malformed request) fail fast.
//!
//! Only `generate` retries. `start` and `stop` make a single attempt; the
//! [`ModelCache`](super::cache::ModelCache) owns the provisioning retry budget.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::backend::{InferenceBackend, ModelProvisioner};
use super::error::InferenceError;
use super::types::{InferenceRequest, InferenceResponse};

// ============================================================================
// Configuration
// ============================================================================

/// Connection and retry settings for the Ollama runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the runtime. Default: `http://localhost:11434`.
    pub base_url: String,
    /// Timeout for a generation call, in milliseconds.
    pub request_timeout_ms: u64,
    /// Timeout for a load or unload command, in milliseconds.
    pub load_timeout_ms: u64,
    /// Extra attempts for transient failures.
    pub max_retries: u32,
    /// Base delay between retries, in milliseconds.
    pub retry_base_delay_ms: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            request_timeout_ms: 30_000,
            load_timeout_ms: 120_000,
            max_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    pub fn with_load_timeout_ms(mut self, ms: u64) -> Self {
        self.load_timeout_ms = ms;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.retry_base_delay_ms = ms;
        self
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<WireOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<i64>,
}

#[derive(Debug, Serialize)]
struct WireOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

// ============================================================================
// OllamaBackend
// ============================================================================

/// HTTP adapter for an Ollama-compatible model runtime.
///
/// Cloning is cheap; the inner `reqwest::Client` is reference-counted.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    config: OllamaConfig,
}

impl OllamaBackend {
    pub fn new(config: OllamaConfig) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Ollama: falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self { client, config }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// POST `/api/generate` with retries for transient failures.
    async fn post_generate(
        &self,
        body: &GenerateBody<'_>,
        timeout: Duration,
    ) -> Result<GenerateReply, InferenceError> {
        let mut last_error: Option<InferenceError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let base_delay = self.config.retry_base_delay_ms * 2_u64.pow(attempt - 1);
                let jitter = rand::random::<u64>() % (base_delay / 2 + 1);
                let delay = Duration::from_millis(base_delay + jitter);

                tracing::warn!(
                    "Ollama: retry attempt {}/{} after {:?} for model '{}'",
                    attempt,
                    self.config.max_retries,
                    delay,
                    body.model
                );

                tokio::time::sleep(delay).await;
            }

            match self.post_once(body, timeout).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Ollama: transient error on attempt {}: {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            InferenceError::ProviderError("All retry attempts exhausted".to_string())
        }))
    }

    async fn post_once(
        &self,
        body: &GenerateBody<'_>,
        timeout: Duration,
    ) -> Result<GenerateReply, InferenceError> {
        let response = self
            .client
            .post(self.endpoint("/api/generate"))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorReply>(&text)
                .map(|r| r.error)
                .unwrap_or(text);
            return Err(classify_status(status.as_u16(), &message));
        }

        let reply: GenerateReply = serde_json::from_str(&text).map_err(|e| {
            InferenceError::InvalidResponse(format!("unexpected /api/generate body: {}", e))
        })?;

        if let Some(error) = reply.error {
            return Err(InferenceError::ProviderError(error));
        }

        Ok(reply)
    }

    async fn set_keep_alive(&self, model: &str, keep_alive: i64) -> Result<(), InferenceError> {
        if model.trim().is_empty() {
            return Err(InferenceError::ConfigError("model name is empty".to_string()));
        }

        let body = GenerateBody {
            model,
            prompt: None,
            stream: false,
            options: None,
            keep_alive: Some(keep_alive),
        };

        self.post_once(&body, Duration::from_millis(self.config.load_timeout_ms))
            .await
            .map(|_| ())
    }
}

/// Map a `reqwest` transport failure into the unified error type.
fn classify_transport_error(error: &reqwest::Error) -> InferenceError {
    if error.is_timeout() {
        InferenceError::Timeout(error.to_string())
    } else if error.is_connect() {
        InferenceError::BackendUnavailable(error.to_string())
    } else {
        InferenceError::ProviderError(error.to_string())
    }
}

/// Map a non-success HTTP status into the unified error type.
fn classify_status(status: u16, message: &str) -> InferenceError {
    match status {
        429 => InferenceError::RateLimited(message.to_string()),
        500..=599 => InferenceError::ProviderError(format!("Server error {}: {}", status, message)),
        _ => InferenceError::ProviderError(format!("HTTP {}: {}", status, message)),
    }
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(self.endpoint("/api/tags"))
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Ollama: health check failed: {}", e);
                false
            }
        }
    }

    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        if request.model.trim().is_empty() {
            return Err(InferenceError::ConfigError("model name is empty".to_string()));
        }

        tracing::debug!(
            "Ollama: generating with model='{}' (max_tokens={}, num_ctx={:?})",
            request.model,
            request.options.max_tokens,
            request.options.context_window,
        );

        let body = GenerateBody {
            model: &request.model,
            prompt: Some(&request.prompt),
            stream: false,
            options: Some(WireOptions {
                temperature: request.options.temperature,
                num_predict: request.options.max_tokens,
                num_ctx: request.options.context_window,
            }),
            keep_alive: None,
        };

        let reply = self
            .post_generate(&body, Duration::from_millis(self.config.request_timeout_ms))
            .await?;

        Ok(InferenceResponse {
            text: reply.response,
            model: if reply.model.is_empty() {
                request.model.clone()
            } else {
                reply.model
            },
            completion_tokens: reply.eval_count,
        })
    }
}

#[async_trait]
impl ModelProvisioner for OllamaBackend {
    async fn start(&self, model: &str) -> Result<(), InferenceError> {
        tracing::info!("Ollama: loading '{}' (keep_alive=-1)", model);
        self.set_keep_alive(model, -1).await
    }

    async fn stop(&self, model: &str) -> Result<(), InferenceError> {
        tracing::info!("Ollama: unloading '{}'", model);
        self.set_keep_alive(model, 0).await
    }
}

// ============================================================================
// Tests
// ============================================================================
