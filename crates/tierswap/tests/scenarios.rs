//! End-to-end routing and residency scenarios against a simulated GPU host.
//!
//! `SimulatedHost` plays all three external roles: its free VRAM is the
//! total minus the footprints of whatever it currently has loaded, its
//! provisioner loads and unloads models, and its runtime answers router
//! prompts with a classification picked from keywords in the task text.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tierswap::orchestrator::selector::select;
use tierswap::orchestrator::{
    CacheConfig, ClassifierConfig, ComputeOrchestrator, ErrorKind, HardwareProbe, HardwareState,
    InferenceBackend, InferenceError, InferenceRequest, InferenceResponse, ModelCache,
    ModelProvisioner, ModelTier, Residency, SafetyMargin, TaskClassification, TaskStatus,
    TaskType, TierCatalog, TierId,
};

const ROUTER_MODEL: &str = "smollm2:360m-q4";

// ============================================================================
// Simulated host
// ============================================================================

#[derive(Default)]
struct HostLog {
    loaded: Vec<String>,
    events: Vec<String>,
    max_specialists_seen: usize,
    router_stopped: bool,
}

struct SimulatedHost {
    total_gb: f64,
    accelerator_available: bool,
    footprints: HashMap<String, f64>,
    router_hangs: bool,
    log: Mutex<HostLog>,
}

impl SimulatedHost {
    fn new(total_gb: f64) -> Self {
        Self {
            total_gb,
            accelerator_available: true,
            footprints: ModelTier::default_catalog()
                .into_iter()
                .map(|t| (t.model, t.footprint_gb))
                .collect(),
            router_hangs: false,
            log: Mutex::new(HostLog::default()),
        }
    }

    fn without_accelerator(mut self) -> Self {
        self.accelerator_available = false;
        self
    }

    fn with_hanging_router(mut self) -> Self {
        self.router_hangs = true;
        self
    }

    fn starts(&self) -> usize {
        self.log
            .lock()
            .events
            .iter()
            .filter(|e| e.starts_with("start"))
            .count()
    }

    fn events(&self) -> Vec<String> {
        self.log.lock().events.clone()
    }

    fn router_reply(prompt: &str) -> &'static str {
        let task = prompt.split("Task: ").nth(1).unwrap_or(prompt);
        if task.contains("function") || task.contains("bug") {
            r#"{"type": "code", "complexity": 0.3, "context_need": 2, "requires_reasoning": false}"#
        } else if task.contains("schedule") {
            r#"{"type": "executive", "complexity": 0.4, "context_need": 3, "requires_reasoning": false}"#
        } else if task.contains("prove") {
            r#"{"type": "chat", "complexity": 0.9, "context_need": 4, "requires_reasoning": true}"#
        } else {
            r#"{"type": "chat", "complexity": 0.2, "context_need": 1, "requires_reasoning": false}"#
        }
    }
}

#[async_trait]
impl HardwareProbe for SimulatedHost {
    async fn sample(&self) -> HardwareState {
        if !self.accelerator_available {
            return HardwareState::without_accelerator(32.0, 12.0);
        }
        let used: f64 = self
            .log
            .lock()
            .loaded
            .iter()
            .filter_map(|m| self.footprints.get(m))
            .sum();
        // Real sensors report whole MiB; round away float noise the same way.
        let round = |gb: f64| (gb * 1e6).round() / 1e6;
        HardwareState {
            accelerator_available: true,
            vram_total_gb: self.total_gb,
            vram_used_gb: round(used),
            vram_free_gb: round(self.total_gb - used),
            gpu_util_percent: 15.0,
            gpu_temp_c: 50.0,
            ram_available_gb: 32.0,
            cpu_percent: 12.0,
        }
    }
}

#[async_trait]
impl ModelProvisioner for SimulatedHost {
    async fn start(&self, model: &str) -> Result<(), InferenceError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let mut log = self.log.lock();
        log.events.push(format!("start {}", model));
        log.loaded.push(model.to_string());
        let specialists = log.loaded.iter().filter(|m| *m != ROUTER_MODEL).count();
        log.max_specialists_seen = log.max_specialists_seen.max(specialists);
        Ok(())
    }

    async fn stop(&self, model: &str) -> Result<(), InferenceError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let mut log = self.log.lock();
        log.events.push(format!("stop {}", model));
        log.loaded.retain(|m| m != model);
        if model == ROUTER_MODEL {
            log.router_stopped = true;
        }
        Ok(())
    }
}

#[async_trait]
impl InferenceBackend for SimulatedHost {
    fn name(&self) -> &str {
        "simulated-host"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        let text = if request.model == ROUTER_MODEL {
            if self.router_hangs {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Self::router_reply(&request.prompt).to_string()
        } else {
            if !self.log.lock().loaded.iter().any(|m| *m == request.model) {
                return Err(InferenceError::ProviderError(format!(
                    "model '{}' is not loaded",
                    request.model
                )));
            }
            format!("[{}] done", request.model)
        };

        Ok(InferenceResponse {
            text,
            model: request.model.clone(),
            completion_tokens: Some(4),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn cache_on(host: &Arc<SimulatedHost>, config: CacheConfig) -> Arc<ModelCache> {
    Arc::new(
        ModelCache::new(
            Arc::new(TierCatalog::default()),
            host.clone(),
            host.clone(),
            config,
        )
        .await
        .unwrap(),
    )
}

async fn orchestrator_on(host: &Arc<SimulatedHost>, config: CacheConfig) -> ComputeOrchestrator {
    let cache = cache_on(host, config).await;
    ComputeOrchestrator::new(cache, host.clone(), host.clone()).with_classifier_config(
        ClassifierConfig {
            timeout_ms: 100,
            ..ClassifierConfig::default()
        },
    )
}

fn snapshot(free_gb: f64) -> HardwareState {
    HardwareState {
        accelerator_available: true,
        vram_total_gb: 12.0,
        vram_used_gb: 12.0 - free_gb,
        vram_free_gb: free_gb,
        gpu_util_percent: 0.0,
        gpu_temp_c: 40.0,
        ram_available_gb: 16.0,
        cpu_percent: 5.0,
    }
}

fn no_margin() -> CacheConfig {
    CacheConfig::default().with_safety_margin(SafetyMargin::Fixed { gb: 0.0 })
}

// ============================================================================
// Scenario A: code task with exactly the coder footprint free
// ============================================================================

#[test]
fn scenario_a_code_task_selects_coder_at_exact_headroom() {
    let classification = TaskClassification::new(TaskType::Code, 0.3);
    let tier = select(&classification, &snapshot(4.2), &TierCatalog::default());
    assert_eq!(tier, TierId::Coder);
}

#[tokio::test]
async fn scenario_a_code_task_runs_on_coder_end_to_end() {
    // 4.6 total - 0.4 router = 4.2 free, exactly the coder footprint.
    let host = Arc::new(SimulatedHost::new(4.6));
    let orchestrator = orchestrator_on(&host, no_margin()).await;

    let result = orchestrator.execute("write a function that parses dates").await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.model_used, Some(TierId::Coder));
    assert_eq!(result.response, "[deepseek-coder:6.7b-q4] done");
    assert_eq!(result.loaded_models, vec![TierId::Router, TierId::Coder]);
    assert!(result.hardware.vram_free_gb.abs() < 1e-9);
}

// ============================================================================
// Scenario B: reasoning task without room for balanced
// ============================================================================

#[test]
fn scenario_b_reasoning_without_balanced_headroom_selects_fast() {
    let classification = TaskClassification::new(TaskType::Chat, 0.9).with_reasoning(true);
    let catalog = TierCatalog::default();
    for free in [2.2, 4.0, 5.79] {
        assert_eq!(select(&classification, &snapshot(free), &catalog), TierId::Fast);
    }
}

#[tokio::test]
async fn scenario_b_reasoning_task_completes_on_fast() {
    // 6.0 total - 0.4 router = 5.6 free: room for fast, not for balanced.
    let host = Arc::new(SimulatedHost::new(6.0));
    let orchestrator = orchestrator_on(&host, CacheConfig::default()).await;

    let result = orchestrator.execute("prove that sqrt(2) is irrational").await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.requested_tier, Some(TierId::Fast));
    assert_eq!(result.model_used, Some(TierId::Fast));
    assert!(result.classification.requires_reasoning);
}

// ============================================================================
// Scenario C: swapping coder out for balanced
// ============================================================================

#[tokio::test]
async fn scenario_c_coder_evicted_for_balanced() {
    // Router + coder + balanced + margin = 11.4 > 10.
    let host = Arc::new(SimulatedHost::new(10.0));
    let cache = cache_on(&host, CacheConfig::default()).await;

    cache.ensure_resident(TierId::Coder).await.unwrap();
    assert_eq!(cache.resident_tiers(), vec![TierId::Router, TierId::Coder]);

    cache.ensure_resident(TierId::Balanced).await.unwrap();

    assert_eq!(cache.resident_tiers(), vec![TierId::Router, TierId::Balanced]);
    assert_eq!(cache.residency(TierId::Coder), Residency::Unloaded);

    let events = host.events();
    let stop_coder = events
        .iter()
        .position(|e| e == "stop deepseek-coder:6.7b-q4")
        .unwrap();
    let start_balanced = events
        .iter()
        .position(|e| e == "start gemma2:9b-instruct-q4")
        .unwrap();
    assert!(stop_coder < start_balanced, "evict must precede load: {:?}", events);

    let log = host.log.lock();
    assert!(!log.router_stopped);
    assert!(log.loaded.iter().any(|m| m == ROUTER_MODEL));
    assert_eq!(log.max_specialists_seen, 1);
}

// ============================================================================
// Scenario D: classifier timeout
// ============================================================================

#[tokio::test]
async fn scenario_d_classifier_timeout_defaults_to_fast() {
    let host = Arc::new(SimulatedHost::new(12.0).with_hanging_router());
    let orchestrator = orchestrator_on(&host, CacheConfig::default()).await;

    let result = orchestrator.execute("write a function for me").await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.classification, TaskClassification::default());
    assert_eq!(result.model_used, Some(TierId::Fast));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.kind == ErrorKind::ClassificationFailure));
}

// ============================================================================
// Scenario E: no accelerator
// ============================================================================

#[test]
fn scenario_e_no_accelerator_selects_only_light_tiers() {
    let catalog = TierCatalog::default();
    let hw = HardwareState::without_accelerator(64.0, 3.0);
    for task_type in [TaskType::Code, TaskType::Chat, TaskType::Executive] {
        for complexity in [0.1, 0.9] {
            let c = TaskClassification::new(task_type, complexity).with_reasoning(true);
            assert!(matches!(select(&c, &hw, &catalog), TierId::Fast | TierId::Planner));
        }
    }
}

#[tokio::test]
async fn scenario_e_no_accelerator_still_answers() {
    let host = Arc::new(SimulatedHost::new(12.0).without_accelerator());
    let orchestrator = orchestrator_on(&host, CacheConfig::default()).await;

    for task in ["fix this bug", "schedule the team offsite", "hello"] {
        let result = orchestrator.execute(task).await;
        assert!(matches!(
            result.requested_tier,
            Some(TierId::Fast) | Some(TierId::Planner)
        ));
        assert!(result.is_success());
        assert_eq!(result.model_used, Some(TierId::Router));
        assert!(result.degraded);
        assert!(!result.hardware.accelerator_available);
    }
    assert_eq!(host.log.lock().max_specialists_seen, 0);
}

// ============================================================================
// Cache properties
// ============================================================================

#[tokio::test]
async fn consecutive_ensure_resident_loads_once() {
    let host = Arc::new(SimulatedHost::new(12.0));
    let cache = cache_on(&host, CacheConfig::default()).await;

    cache.ensure_resident(TierId::Planner).await.unwrap();
    cache.ensure_resident(TierId::Planner).await.unwrap();

    assert_eq!(host.starts(), 2);
}

#[tokio::test]
async fn insufficient_headroom_never_reports_resident() {
    // Only 2.0 free after the router: nothing but the router fits with margin.
    let host = Arc::new(SimulatedHost::new(2.4));
    let cache = cache_on(&host, CacheConfig::default()).await;

    for tier in [TierId::Fast, TierId::Coder, TierId::Balanced, TierId::Planner] {
        assert!(cache.ensure_resident(tier).await.is_err());
        assert_eq!(cache.residency(tier), Residency::Unloaded);
    }
    assert_eq!(cache.resident_tiers(), vec![TierId::Router]);
    assert_eq!(host.starts(), 1);
}

#[tokio::test]
async fn concurrent_mixed_workload_keeps_one_specialist() {
    let host = Arc::new(SimulatedHost::new(12.0));
    let orchestrator = Arc::new(orchestrator_on(&host, CacheConfig::default()).await);

    let tasks = [
        "fix this bug",
        "prove the lemma",
        "schedule standup",
        "hello there",
        "write a function",
        "schedule review",
    ];

    let handles: Vec<_> = tasks
        .iter()
        .cycle()
        .take(24)
        .map(|task| {
            let orchestrator = orchestrator.clone();
            let task = task.to_string();
            tokio::spawn(async move { orchestrator.execute(&task).await })
        })
        .collect();

    for handle in futures::future::join_all(handles).await {
        let result = handle.unwrap();
        assert!(!result.task.is_empty());
        assert!(result.loaded_models.contains(&TierId::Router));
        assert!(
            result.loaded_models.iter().filter(|t| !t.is_router()).count() <= 1,
            "{:?}",
            result.loaded_models
        );
    }

    let log = host.log.lock();
    assert!(log.max_specialists_seen <= 1);
    assert!(!log.router_stopped);
}

#[tokio::test]
async fn shutdown_leaves_only_router() {
    let host = Arc::new(SimulatedHost::new(12.0));
    let orchestrator = orchestrator_on(&host, CacheConfig::default()).await;
    orchestrator.execute("write a function").await;

    let results = orchestrator.cache().shutdown().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, TierId::Coder);
    assert_eq!(host.log.lock().loaded, vec![ROUTER_MODEL.to_string()]);
}

#[tokio::test]
async fn housekeeping_releases_idle_specialist() {
    let host = Arc::new(SimulatedHost::new(12.0));
    let cache = cache_on(&host, CacheConfig::default()).await;
    cache.ensure_resident(TierId::Fast).await.unwrap();

    let handle = cache.spawn_housekeeping(Duration::from_millis(20), Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(cache.resident_tiers(), vec![TierId::Router]);
}
