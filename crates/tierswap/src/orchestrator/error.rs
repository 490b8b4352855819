//! Error types for the orchestration layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TierId;

/// Failures reported by the inference runtime, for both generation and
/// provisioning calls.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl InferenceError {
    /// Transient failures that are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable(_) | Self::Timeout(_) | Self::RateLimited(_)
        ) || matches!(self, Self::ProviderError(msg) if msg.starts_with("Server error"))
    }
}

/// Failures of the model cache.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CacheError {
    #[error("tier '{0}' is not in the catalog")]
    UnknownTier(TierId),

    #[error(
        "insufficient accelerator memory for '{tier}': need {required_gb:.1}GB, \
         {free_gb:.1}GB free (short {shortfall_gb:.1}GB)"
    )]
    Capacity {
        tier: TierId,
        required_gb: f64,
        free_gb: f64,
        shortfall_gb: f64,
    },

    #[error("failed to load '{tier}' ({model}): {source}")]
    LoadFailure {
        tier: TierId,
        model: String,
        #[source]
        source: InferenceError,
    },

    #[error("failed to unload '{tier}' ({model}): {source}")]
    UnloadFailure {
        tier: TierId,
        model: String,
        #[source]
        source: InferenceError,
    },

    #[error("the router tier cannot be evicted")]
    RouterPinned,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Capacity { .. } => ErrorKind::Capacity,
            Self::LoadFailure { .. } => ErrorKind::LoadFailure,
            Self::UnloadFailure { .. } => ErrorKind::UnloadFailure,
            Self::UnknownTier(_) | Self::RouterPinned => ErrorKind::InvalidTask,
        }
    }
}

/// Why the router's classification could not be used.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    #[error("router dispatch failed: {0}")]
    Dispatch(#[from] InferenceError),

    #[error("router did not answer within {0}ms")]
    Timeout(u64),

    #[error("no JSON object found in router output")]
    NoJson,

    #[error("router output is not a valid classification: {0}")]
    Malformed(String),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("tier catalog is missing required tier '{0}'")]
    MissingTier(TierId),

    #[error("tier '{0}' appears more than once in the catalog")]
    DuplicateTier(TierId),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Coarse error category carried in a [`TaskResult`](super::compute::TaskResult).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TelemetryUnavailable,
    ClassificationFailure,
    Capacity,
    LoadFailure,
    UnloadFailure,
    BackendDispatchFailure,
    InvalidTask,
}
