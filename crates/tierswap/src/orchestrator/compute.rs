//! ComputeOrchestrator — Classify, Select, Swap, Dispatch
//!
//! The single entry point for task execution. Holds no state of its own
//! besides the shared [`ModelCache`].
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐   ┌────────────┐
//! │ classify     │──▶│ select tier  │──▶│ ensure_resident    │──▶│ dispatch   │
//! │ (router)     │   │ (pure)       │   │ selected→fast→router│  │ (timeout)  │
//! └──────────────┘   └──────────────┘   └────────────────────┘   └─────┬──────┘
//!                                                                       ▼
//!                                            re-sample telemetry ──▶ TaskResult
//! ```
//!
//! ## Failure Handling
//!
//! | Stage          | Failure                       | Outcome                                 |
//! |----------------|-------------------------------|-----------------------------------------|
//! | classification | dispatch error, timeout, junk | default classification, warning         |
//! | residency      | capacity, load/unload failure | next tier in the chain, `degraded`      |
//! | residency      | whole chain failed            | `Failed` result with the cache error    |
//! | dispatch       | runtime error or timeout      | `Failed` result + fallback suggestions  |
//!
//! No stage failure escapes as a panic or `Err`; every outcome is a
//! serializable [`TaskResult`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::backend::InferenceBackend;
use super::cache::ModelCache;
use super::classifier::{ClassifierConfig, TaskClassifier};
use super::error::{ErrorKind, InferenceError};
use super::selector::TierSelector;
use super::telemetry::HardwareProbe;
use super::types::{
    HardwareState, InferenceRequest, ModelTier, TaskClassification, TaskType, TierId,
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound for the final generation call, in milliseconds. Covers
    /// every retry the backend makes inside the call.
    pub timeout_ms: u64,
    pub temperature: f32,
    /// Token budget for ordinary tasks.
    pub base_max_tokens: u32,
    /// Token budget for tasks whose complexity exceeds `complexity_threshold`.
    pub extended_max_tokens: u32,
    pub complexity_threshold: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            temperature: 0.7,
            base_max_tokens: 512,
            extended_max_tokens: 1024,
            complexity_threshold: 0.7,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_tokens_for(&self, classification: &TaskClassification) -> u32 {
        if classification.complexity > self.complexity_threshold {
            self.extended_max_tokens
        } else {
            self.base_max_tokens
        }
    }
}

// ============================================================================
// Request / result payloads
// ============================================================================

/// A submitted task with optional overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    /// Skip selection and run on this tier (still subject to fallback).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<TierId>,
    /// Programming language hint; marks the task as a code task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl TaskRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            tier: None,
            language: None,
        }
    }

    pub fn with_tier(mut self, tier: TierId) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    /// Completed on a lighter tier than the one selected.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpecs {
    pub name: String,
    pub vram_gb: f64,
    pub tokens_per_sec: u32,
    pub max_context: u32,
}

impl From<&ModelTier> for ModelSpecs {
    fn from(tier: &ModelTier) -> Self {
        Self {
            name: tier.model.clone(),
            vram_gb: tier.footprint_gb,
            tokens_per_sec: tier.tokens_per_sec,
            max_context: tier.max_context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_suggestions: Vec<String>,
}

/// A non-fatal problem met while running a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskWarning {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one task, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: String,
    pub status: TaskStatus,
    pub response: String,
    /// Tier that produced `response`.
    pub model_used: Option<TierId>,
    /// Tier chosen by selection (or the override) before any fallback.
    pub requested_tier: Option<TierId>,
    pub model_specs: Option<ModelSpecs>,
    /// Snapshot taken after dispatch.
    pub hardware: HardwareState,
    pub classification: TaskClassification,
    pub loaded_models: Vec<TierId>,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<TaskWarning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub elapsed_ms: u64,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        self.status != TaskStatus::Failed
    }
}

// ============================================================================
// ComputeOrchestrator
// ============================================================================

pub struct ComputeOrchestrator {
    cache: Arc<ModelCache>,
    classifier: TaskClassifier,
    selector: TierSelector,
    backend: Arc<dyn InferenceBackend>,
    probe: Arc<dyn HardwareProbe>,
    dispatch: DispatchConfig,
}

impl std::fmt::Debug for ComputeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeOrchestrator")
            .field("cache", &self.cache)
            .field("classifier", &self.classifier)
            .field("backend", &self.backend.name())
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

/// Per-request scratch state carried through the pipeline.
struct Pipeline {
    task: String,
    started: Instant,
    classification: TaskClassification,
    requested_tier: Option<TierId>,
    warnings: Vec<TaskWarning>,
}

impl Pipeline {
    fn warn(&mut self, kind: ErrorKind, message: String) {
        self.warnings.push(TaskWarning { kind, message });
    }

    /// Flag a snapshot whose accelerator fields could not be read.
    fn note_hardware(&mut self, hardware: &HardwareState) {
        if !hardware.accelerator_available {
            self.warn(
                ErrorKind::TelemetryUnavailable,
                "accelerator telemetry unavailable, hardware fields are zeroed".to_string(),
            );
        }
    }
}

impl ComputeOrchestrator {
    /// Build an orchestrator around an already bootstrapped cache.
    ///
    /// The classifier talks to the cache catalog's router model.
    pub fn new(
        cache: Arc<ModelCache>,
        backend: Arc<dyn InferenceBackend>,
        probe: Arc<dyn HardwareProbe>,
    ) -> Self {
        let classifier = TaskClassifier::new(
            backend.clone(),
            cache.catalog().router().model.clone(),
            ClassifierConfig::default(),
        );

        Self {
            cache,
            classifier,
            selector: TierSelector::default(),
            backend,
            probe,
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn with_classifier_config(mut self, config: ClassifierConfig) -> Self {
        self.classifier = TaskClassifier::new(
            self.backend.clone(),
            self.cache.catalog().router().model.clone(),
            config,
        );
        self
    }

    pub fn with_selector(mut self, selector: TierSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_dispatch_config(mut self, config: DispatchConfig) -> Self {
        self.dispatch = config;
        self
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Execute a plain task.
    pub async fn execute(&self, task: &str) -> TaskResult {
        self.execute_request(TaskRequest::new(task)).await
    }

    /// Execute a task with optional tier and language overrides.
    pub async fn execute_request(&self, request: TaskRequest) -> TaskResult {
        let mut pipeline = Pipeline {
            task: request.task.clone(),
            started: Instant::now(),
            classification: TaskClassification::default(),
            requested_tier: None,
            warnings: Vec::new(),
        };

        let text = request.task.trim();
        if text.is_empty() {
            return self
                .failed(
                    pipeline,
                    None,
                    ErrorKind::InvalidTask,
                    "task text is empty".to_string(),
                    Vec::new(),
                )
                .await;
        }

        if let Some(tier) = request.tier {
            if !self.cache.catalog().contains(tier) {
                return self
                    .failed(
                        pipeline,
                        None,
                        ErrorKind::InvalidTask,
                        format!("tier '{}' is not in the catalog", tier),
                        Vec::new(),
                    )
                    .await;
            }
        }

        // 1. Classify on the router.
        if let Err(e) = self.cache.ensure_resident(TierId::Router).await {
            pipeline.warn(
                e.kind(),
                format!("router unavailable for classification: {}", e),
            );
        }
        pipeline.classification = match self.classifier.try_classify(text).await {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!("ComputeOrchestrator: classification failed: {}", e);
                pipeline.warn(
                    ErrorKind::ClassificationFailure,
                    format!("classification failed, using defaults: {}", e),
                );
                TaskClassification::default()
            }
        };
        if request.language.is_some() {
            pipeline.classification.task_type = TaskType::Code;
        }

        // 2. Select.
        let selected = match request.tier {
            Some(tier) => tier,
            None => {
                let hardware = self.probe.sample().await;
                self.selector
                    .select(&pipeline.classification, &hardware, self.cache.catalog())
            }
        };
        pipeline.requested_tier = Some(selected);
        tracing::info!(
            "ComputeOrchestrator: selected '{}' for {} task (complexity {:.2})",
            selected,
            pipeline.classification.task_type,
            pipeline.classification.complexity
        );

        // 3. Make a tier resident, degrading along the chain.
        let mut last_error = None;
        let mut used = None;
        for tier in fallback_chain(selected) {
            match self.cache.ensure_resident(tier).await {
                Ok(resident) => {
                    used = Some(resident.tier);
                    break;
                }
                Err(e) => {
                    tracing::warn!("ComputeOrchestrator: tier '{}' unavailable: {}", tier, e);
                    pipeline.warn(e.kind(), format!("{}: {}", tier, e));
                    last_error = Some(e);
                }
            }
        }

        let Some(used) = used else {
            let (kind, message) = match last_error {
                Some(e) => (e.kind(), e.to_string()),
                None => (ErrorKind::Capacity, "no tier could be made resident".to_string()),
            };
            let suggestions = vec![
                "Free accelerator memory held by other processes".to_string(),
                "Check that the inference runtime is reachable".to_string(),
            ];
            return self.failed(pipeline, None, kind, message, suggestions).await;
        };

        let Some(spec) = self.cache.catalog().get(used).cloned() else {
            return self
                .failed(
                    pipeline,
                    None,
                    ErrorKind::InvalidTask,
                    format!("tier '{}' is not in the catalog", used),
                    Vec::new(),
                )
                .await;
        };

        // 4. Dispatch.
        let max_tokens = self.dispatch.max_tokens_for(&pipeline.classification);
        let prompt = match &request.language {
            Some(language) => format!("Respond using {}.\n\n{}", language, text),
            None => text.to_string(),
        };
        let inference = InferenceRequest::new(spec.model.clone(), prompt)
            .with_temperature(self.dispatch.temperature)
            .with_max_tokens(max_tokens)
            .with_context_window(spec.max_context);

        tracing::info!(
            "ComputeOrchestrator: dispatching to '{}' ({} tok/s, max_tokens={})",
            spec.model,
            spec.tokens_per_sec,
            max_tokens
        );

        let outcome = match tokio::time::timeout(
            self.dispatch.timeout(),
            self.backend.generate(&inference),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(InferenceError::Timeout(format!(
                "dispatch exceeded {}ms",
                self.dispatch.timeout_ms
            ))),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("ComputeOrchestrator: dispatch to '{}' failed: {}", used, e);
                let suggestions = self.fallback_suggestions(&spec, max_tokens, &e);
                return self
                    .failed(
                        pipeline,
                        Some(&spec),
                        ErrorKind::BackendDispatchFailure,
                        e.to_string(),
                        suggestions,
                    )
                    .await;
            }
        };

        // 5. Annotate with a fresh snapshot.
        let hardware = self.probe.sample().await;
        pipeline.note_hardware(&hardware);
        let degraded = used != selected;

        TaskResult {
            task: pipeline.task,
            status: if degraded {
                TaskStatus::Degraded
            } else {
                TaskStatus::Completed
            },
            response: response.text,
            model_used: Some(used),
            requested_tier: pipeline.requested_tier,
            model_specs: Some(ModelSpecs::from(&spec)),
            hardware,
            classification: pipeline.classification,
            loaded_models: self.cache.resident_tiers(),
            degraded,
            warnings: pipeline.warnings,
            error: None,
            elapsed_ms: pipeline.started.elapsed().as_millis() as u64,
        }
    }

    fn fallback_suggestions(
        &self,
        spec: &ModelTier,
        max_tokens: u32,
        error: &InferenceError,
    ) -> Vec<String> {
        let mut suggestions = vec![format!(
            "Try reducing max_tokens (was {})",
            max_tokens
        )];

        if !matches!(spec.id, TierId::Fast | TierId::Router) {
            suggestions.push(format!(
                "Retry on the lighter '{}' tier",
                self.cache.catalog().fast().id
            ));
        }

        match error {
            InferenceError::BackendUnavailable(_) => {
                suggestions.push("Check that the inference runtime is reachable".to_string());
            }
            InferenceError::Timeout(_) => suggestions.push(format!(
                "Increase dispatch.timeout_ms (was {})",
                self.dispatch.timeout_ms
            )),
            _ => {}
        }

        suggestions
    }

    async fn failed(
        &self,
        mut pipeline: Pipeline,
        spec: Option<&ModelTier>,
        kind: ErrorKind,
        message: String,
        fallback_suggestions: Vec<String>,
    ) -> TaskResult {
        let hardware = self.probe.sample().await;
        pipeline.note_hardware(&hardware);
        TaskResult {
            task: pipeline.task,
            status: TaskStatus::Failed,
            response: String::new(),
            model_used: spec.map(|s| s.id),
            requested_tier: pipeline.requested_tier,
            model_specs: spec.map(ModelSpecs::from),
            hardware,
            classification: pipeline.classification,
            loaded_models: self.cache.resident_tiers(),
            degraded: false,
            warnings: pipeline.warnings,
            error: Some(TaskError {
                kind,
                message,
                fallback_suggestions,
            }),
            elapsed_ms: pipeline.started.elapsed().as_millis() as u64,
        }
    }
}

/// Tiers to try, in order, for a selected tier.
pub fn fallback_chain(selected: TierId) -> Vec<TierId> {
    let mut chain = vec![selected];
    for tier in [TierId::Fast, TierId::Router] {
        if !chain.contains(&tier) {
            chain.push(tier);
        }
    }
    chain
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::backend::ModelProvisioner;
    use crate::orchestrator::cache::CacheConfig;
    use crate::orchestrator::catalog::TierCatalog;
    use crate::orchestrator::types::InferenceResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Router answers with `classification`; every other model echoes its
    /// name, or fails when it is listed in `failing`.
    struct MockRuntime {
        classification: &'static str,
        failing: Vec<&'static str>,
        requests: Mutex<Vec<InferenceRequest>>,
    }

    impl MockRuntime {
        fn new(classification: &'static str) -> Arc<Self> {
            Arc::new(Self {
                classification,
                failing: Vec::new(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl InferenceBackend for MockRuntime {
        fn name(&self) -> &str {
            "mock-runtime"
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn generate(
            &self,
            request: &InferenceRequest,
        ) -> Result<InferenceResponse, InferenceError> {
            self.requests.lock().push(request.clone());
            if self.failing.contains(&request.model.as_str()) {
                return Err(InferenceError::BackendUnavailable("connection refused".into()));
            }
            let text = if request.model == "smollm2:360m-q4" {
                self.classification.to_string()
            } else {
                format!("answer from {}", request.model)
            };
            Ok(InferenceResponse {
                text,
                model: request.model.clone(),
                completion_tokens: Some(3),
            })
        }
    }

    #[async_trait]
    impl ModelProvisioner for MockRuntime {
        async fn start(&self, _model: &str) -> Result<(), InferenceError> {
            Ok(())
        }

        async fn stop(&self, _model: &str) -> Result<(), InferenceError> {
            Ok(())
        }
    }

    struct FixedProbe(HardwareState);

    #[async_trait]
    impl HardwareProbe for FixedProbe {
        async fn sample(&self) -> HardwareState {
            self.0
        }
    }

    fn gpu(free_gb: f64) -> HardwareState {
        HardwareState {
            accelerator_available: true,
            vram_total_gb: 12.0,
            vram_used_gb: 12.0 - free_gb,
            vram_free_gb: free_gb,
            gpu_util_percent: 10.0,
            gpu_temp_c: 45.0,
            ram_available_gb: 16.0,
            cpu_percent: 8.0,
        }
    }

    async fn orchestrator(runtime: Arc<MockRuntime>, hw: HardwareState) -> ComputeOrchestrator {
        let probe: Arc<dyn HardwareProbe> = Arc::new(FixedProbe(hw));
        let cache = ModelCache::new(
            Arc::new(TierCatalog::default()),
            probe.clone(),
            runtime.clone(),
            CacheConfig::default(),
        )
        .await
        .unwrap();
        ComputeOrchestrator::new(Arc::new(cache), runtime, probe)
    }

    #[test]
    fn test_fallback_chain() {
        assert_eq!(
            fallback_chain(TierId::Balanced),
            vec![TierId::Balanced, TierId::Fast, TierId::Router]
        );
        assert_eq!(fallback_chain(TierId::Fast), vec![TierId::Fast, TierId::Router]);
        assert_eq!(fallback_chain(TierId::Router), vec![TierId::Router, TierId::Fast]);
    }

    #[test]
    fn test_token_budget_scales_with_complexity() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_tokens_for(&TaskClassification::new(TaskType::Chat, 0.7)), 512);
        assert_eq!(config.max_tokens_for(&TaskClassification::new(TaskType::Chat, 0.71)), 1024);
    }

    #[tokio::test]
    async fn test_code_task_runs_on_coder() {
        let runtime = MockRuntime::new(
            r#"{"type":"code","complexity":0.3,"context_need":2,"requires_reasoning":false}"#,
        );
        let orchestrator = orchestrator(runtime.clone(), gpu(11.0)).await;

        let result = orchestrator.execute("write a binary search in Rust").await;

        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.model_used, Some(TierId::Coder));
        assert_eq!(result.response, "answer from deepseek-coder:6.7b-q4");
        assert_eq!(result.loaded_models, vec![TierId::Router, TierId::Coder]);
        assert_eq!(result.model_specs.unwrap().vram_gb, 4.2);

        let requests = runtime.requests.lock();
        let dispatch = requests.last().unwrap();
        assert_eq!(dispatch.options.context_window, Some(16384));
        assert_eq!(dispatch.options.max_tokens, 512);
        assert_eq!(dispatch.options.temperature, 0.7);
    }

    #[tokio::test]
    async fn test_empty_task_is_rejected() {
        let orchestrator = orchestrator(MockRuntime::new("{}"), gpu(11.0)).await;
        let result = orchestrator.execute("   ").await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error.unwrap().kind, ErrorKind::InvalidTask);
    }

    #[tokio::test]
    async fn test_dispatch_failure_carries_suggestions() {
        let runtime = Arc::new(MockRuntime {
            classification: r#"{"type":"system","complexity":0.9}"#,
            failing: vec!["phi3.5:3.8b-mini-q4"],
            requests: Mutex::new(Vec::new()),
        });
        // Too little headroom for balanced, so the system task lands on planner.
        let orchestrator = orchestrator(runtime, gpu(5.0)).await;

        let result = orchestrator.execute("restart the indexer").await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.model_used, Some(TierId::Planner));
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::BackendDispatchFailure);
        assert!(error.fallback_suggestions.iter().any(|s| s.contains("1024")));
        assert!(error.fallback_suggestions.iter().any(|s| s.contains("'fast'")));
        assert!(error.fallback_suggestions.iter().any(|s| s.contains("reachable")));
    }

    #[tokio::test]
    async fn test_capacity_degrades_to_router() {
        // Enough to select nothing heavy, not enough to admit fast + margin.
        let orchestrator = orchestrator(MockRuntime::new(r#"{"type":"chat"}"#), gpu(2.5)).await;

        let result = orchestrator.execute("hi").await;

        assert_eq!(result.status, TaskStatus::Degraded);
        assert!(result.degraded);
        assert_eq!(result.requested_tier, Some(TierId::Fast));
        assert_eq!(result.model_used, Some(TierId::Router));
        assert!(result.warnings.iter().any(|w| w.kind == ErrorKind::Capacity));
    }

    #[tokio::test]
    async fn test_classification_failure_is_tagged() {
        let orchestrator =
            orchestrator(MockRuntime::new("not json at all"), gpu(11.0)).await;

        let result = orchestrator.execute("hello").await;

        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.classification, TaskClassification::default());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, ErrorKind::ClassificationFailure);
    }

    #[tokio::test]
    async fn test_missing_telemetry_is_tagged() {
        let orchestrator = orchestrator(
            MockRuntime::new(r#"{"type":"chat"}"#),
            HardwareState::without_accelerator(16.0, 4.0),
        )
        .await;

        let result = orchestrator.execute("hello").await;

        assert!(result.is_success());
        assert!(!result.hardware.accelerator_available);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.kind == ErrorKind::TelemetryUnavailable));
        let json = serde_json::to_value(&result).unwrap();
        assert!(json["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .any(|w| w["kind"] == "telemetry_unavailable"));
    }

    #[tokio::test]
    async fn test_tier_override_and_language_hint() {
        let runtime = MockRuntime::new(r#"{"type":"chat","complexity":0.1}"#);
        let orchestrator = orchestrator(runtime.clone(), gpu(11.0)).await;

        let result = orchestrator
            .execute_request(
                TaskRequest::new("reverse a string")
                    .with_tier(TierId::Planner)
                    .with_language("python"),
            )
            .await;

        assert_eq!(result.model_used, Some(TierId::Planner));
        assert_eq!(result.classification.task_type, TaskType::Code);
        let requests = runtime.requests.lock();
        assert!(requests.last().unwrap().prompt.starts_with("Respond using python."));
    }

    #[tokio::test]
    async fn test_result_serializes_to_json() {
        let orchestrator = orchestrator(MockRuntime::new(r#"{"type":"chat"}"#), gpu(11.0)).await;
        let result = orchestrator.execute("hello").await;

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["model_used"], "fast");
        assert_eq!(json["classification"]["type"], "chat");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_default_dispatch_timeout_outlasts_backend_backoff() {
        let dispatch = DispatchConfig::default();
        let backend = crate::orchestrator::OllamaConfig::default();
        let backoff_ms: u64 = (0..backend.max_retries)
            .map(|attempt| backend.retry_base_delay_ms << attempt)
            .sum();

        assert_eq!(dispatch.timeout(), Duration::from_secs(30));
        assert!(dispatch.timeout_ms > backoff_ms);
    }
}
