//! Inference Runtime Contracts
//!
//! The orchestration core talks to the model-serving runtime through two
//! narrow, object-safe traits:
//!
//! - **[`InferenceBackend`]**: run one non-streaming generation against a
//!   named model.
//! - **[`ModelProvisioner`]**: make a model resident (`start`) or release it
//!   (`stop`). Both calls may take seconds and may fail.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │          TaskClassifier / ComputeOrchestrator                │
//! │              (InferenceRequest / InferenceResponse)          │
//! └──────────────┬─────────────────────────────┬─────────────────┘
//!                │ Arc<dyn InferenceBackend>   │ Arc<dyn ModelProvisioner>
//!                ▼                             ▼
//! ┌──────────────────────────────┐  ┌──────────────────────────────┐
//! │ generate(request)            │  │ start(model) / stop(model)   │
//! └──────────────────────────────┘  └──────────────────────────────┘
//!                ▲                             ▲
//!                └──────────── OllamaBackend ──┘
//! ```
//!
//! Both traits require `Send + Sync` so implementations can be shared across
//! tokio tasks via `Arc`. The transport (HTTP, local process) is an
//! implementation detail of whoever implements them.

use async_trait::async_trait;

use super::error::InferenceError;
use super::types::{InferenceRequest, InferenceResponse};

/// Generation side of the inference runtime.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Human-readable name for logs (e.g. `"Ollama"`).
    fn name(&self) -> &str;

    /// Lightweight reachability check. Must not run a generation.
    async fn is_available(&self) -> bool;

    /// Execute a non-streaming generation request.
    ///
    /// A response body that carries an error from the runtime is reported as
    /// `Err`, never as an `Ok` with empty text.
    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError>;
}

/// Provisioning side of the inference runtime.
///
/// The [`ModelCache`](super::cache::ModelCache) treats both operations as
/// opaque: success means the runtime accepted the command and it completed.
#[async_trait]
pub trait ModelProvisioner: Send + Sync {
    /// Load `model` and keep it resident until `stop` is called.
    async fn start(&self, model: &str) -> Result<(), InferenceError>;

    /// Release `model` from accelerator memory.
    async fn stop(&self, model: &str) -> Result<(), InferenceError>;
}
