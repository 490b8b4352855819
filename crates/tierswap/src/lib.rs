//! # tierswap
//!
//! VRAM-aware model tier cache and task orchestrator for single-GPU LLM
//! hosts. A tiny router model stays resident and classifies every task; the
//! orchestrator then swaps the best-fitting specialist tier into accelerator
//! memory, dispatches the task and reports the outcome with a fresh hardware
//! snapshot.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tierswap::config::TierswapConfig;
//! use tierswap::orchestrator::*;
//!
//! let config = TierswapConfig::load(None)?;
//! let backend = Arc::new(OllamaBackend::new(config.backend.clone()));
//! let probe = Arc::new(TelemetryMonitor::with_config(config.telemetry.clone()));
//! let cache = ModelCache::new(
//!     Arc::new(config.catalog()?),
//!     probe.clone(),
//!     backend.clone(),
//!     config.cache.clone(),
//! )
//! .await?;
//!
//! let orchestrator = ComputeOrchestrator::new(Arc::new(cache), backend, probe);
//! let result = orchestrator.execute("write a binary search in Rust").await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! ```

pub mod config;
pub mod orchestrator;
pub mod worker;

pub use config::TierswapConfig;
pub use orchestrator::{
    ComputeOrchestrator, HardwareState, ModelCache, TaskClassification, TaskRequest, TaskResult,
    TierId,
};
