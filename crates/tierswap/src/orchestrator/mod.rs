//! Tier Orchestration Module
//!
//! Runs free-form tasks on a single-GPU host by keeping one tiny router
//! model permanently resident and swapping at most one specialist tier in and
//! out of accelerator memory per task.
//!
//! ## Components
//!
//! - **[`TelemetryMonitor`]**: fresh accelerator and host snapshots via
//!   `nvidia-smi` and `sysinfo`
//! - **[`ModelCache`]**: per-tier residency state machine with LRU eviction
//! - **[`TaskClassifier`]**: router-tier intent classification
//! - **[`TierSelector`]**: pure, hardware-aware tier choice
//! - **[`ComputeOrchestrator`]**: classify → select → swap → dispatch
//! - **[`OllamaBackend`]**: HTTP adapter for an Ollama-compatible runtime
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                    ComputeOrchestrator                        │
//! │  ┌───────────────┐   ┌─────────────┐   ┌──────────────────┐   │
//! │  │ TaskClassifier│──▶│ TierSelector│──▶│ ModelCache       │   │
//! │  │ (router tier) │   │ (pure)      │   │ ensure_resident  │   │
//! │  └───────┬───────┘   └──────▲──────┘   └────────┬─────────┘   │
//! │          │                  │                   │ start/stop  │
//! │          │          ┌───────┴────────┐          │             │
//! │          │          │ HardwareProbe  │◀─────────┤             │
//! │          │          └────────────────┘          │             │
//! └──────────┼──────────────────────────────────────┼─────────────┘
//!            │ generate                             │
//!            ▼                                      ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │        InferenceBackend + ModelProvisioner (OllamaBackend)    │
//! └───────────────────────────────────────────────────────────────┘
//! ```

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// Tiers, hardware snapshots, classifications and the inference contract.
pub mod types;

/// Error enums for every layer.
pub mod error;

/// `InferenceBackend` and `ModelProvisioner` traits.
pub mod backend;

/// Validated tier catalog.
pub mod catalog;

// ---------------------------------------------------------------------------
// Runtime adapters
// ---------------------------------------------------------------------------

/// Ollama-compatible HTTP runtime.
pub mod ollama;

/// Accelerator and host telemetry.
pub mod telemetry;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// VRAM-aware tier residency with LRU eviction.
pub mod cache;

/// Router-tier task classification.
pub mod classifier;

/// Hardware-aware tier selection.
pub mod selector;

/// End-to-end task execution.
pub mod compute;

// ── Re-exports ──

pub use backend::{InferenceBackend, ModelProvisioner};
pub use cache::{
    CacheConfig, CacheStatus, EvictionResult, ModelCache, Residency, ResidentModel,
    ResidentSummary, SafetyMargin,
};
pub use catalog::TierCatalog;
pub use classifier::{ClassifierConfig, TaskClassifier};
pub use compute::{
    ComputeOrchestrator, DispatchConfig, ModelSpecs, TaskError, TaskRequest, TaskResult,
    TaskStatus, TaskWarning,
};
pub use error::{CacheError, ClassifierError, ConfigError, ErrorKind, InferenceError};
pub use ollama::{OllamaBackend, OllamaConfig};
pub use selector::{SelectorConfig, TierSelector};
pub use telemetry::{HardwareProbe, TelemetryConfig, TelemetryMonitor};
pub use types::{
    GenerationOptions, HardwareState, InferenceRequest, InferenceResponse, ModelTier,
    TaskClassification, TaskType, TierId,
};
