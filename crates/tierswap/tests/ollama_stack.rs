//! Full stack against a mock Ollama runtime: bootstrap, classification,
//! swap-in and dispatch all travel over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tierswap::orchestrator::{
    CacheConfig, CacheError, ComputeOrchestrator, ErrorKind, HardwareProbe, HardwareState,
    ModelCache, OllamaBackend, OllamaConfig, TaskStatus, TierCatalog, TierId,
};

struct FixedProbe(HardwareState);

#[async_trait]
impl HardwareProbe for FixedProbe {
    async fn sample(&self) -> HardwareState {
        self.0
    }
}

fn roomy_gpu() -> HardwareState {
    HardwareState {
        accelerator_available: true,
        vram_total_gb: 24.0,
        vram_used_gb: 2.0,
        vram_free_gb: 22.0,
        gpu_util_percent: 5.0,
        gpu_temp_c: 41.0,
        ram_available_gb: 48.0,
        cpu_percent: 7.0,
    }
}

async fn mount_router(server: &MockServer, classification: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "smollm2:360m-q4" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "smollm2:360m-q4",
            "response": format!("Here is the JSON: {}", classification),
            "done": true
        })))
        .mount(server)
        .await;
}

async fn orchestrator_for(server: &MockServer) -> ComputeOrchestrator {
    let backend = Arc::new(OllamaBackend::new(
        OllamaConfig::new(server.uri())
            .with_max_retries(0)
            .with_request_timeout_ms(5_000)
            .with_load_timeout_ms(5_000),
    ));
    let probe: Arc<dyn HardwareProbe> = Arc::new(FixedProbe(roomy_gpu()));
    let cache = ModelCache::new(
        Arc::new(TierCatalog::default()),
        probe.clone(),
        backend.clone(),
        CacheConfig::default(),
    )
    .await
    .unwrap();
    ComputeOrchestrator::new(Arc::new(cache), backend, probe)
}

#[tokio::test]
async fn code_task_is_swapped_in_and_dispatched_over_http() {
    let server = MockServer::start().await;
    mount_router(
        &server,
        json!({"type": "code", "complexity": 0.8, "context_need": 3, "requires_reasoning": false}),
    )
    .await;

    // Swap-in of the coder tier.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "deepseek-coder:6.7b-q4",
            "keep_alive": -1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "done": true })))
        .expect(1)
        .mount(&server)
        .await;

    // Dispatch with the tier's context window and the extended budget.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "deepseek-coder:6.7b-q4",
            "stream": false,
            "options": { "num_ctx": 16384, "num_predict": 1024 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "deepseek-coder:6.7b-q4",
            "response": "fn search() {}",
            "done": true,
            "eval_count": 5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server).await;
    let result = orchestrator
        .execute("implement binary search over a sorted slice")
        .await;

    assert_eq!(result.status, TaskStatus::Completed);
    assert_eq!(result.model_used, Some(TierId::Coder));
    assert_eq!(result.response, "fn search() {}");
    assert_eq!(result.loaded_models, vec![TierId::Router, TierId::Coder]);
}

#[tokio::test]
async fn runtime_error_becomes_failed_result() {
    let server = MockServer::start().await;
    mount_router(&server, json!({"type": "chat", "complexity": 0.2})).await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "qwen2.5:3b-instruct-q4", "keep_alive": -1 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "done": true })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "model": "qwen2.5:3b-instruct-q4", "stream": false })))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "prompt too long" })),
        )
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server).await;
    let result = orchestrator.execute("hello").await;

    assert_eq!(result.status, TaskStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::BackendDispatchFailure);
    assert!(error.message.contains("prompt too long"));
    assert!(!error.fallback_suggestions.is_empty());
}

#[tokio::test]
async fn failed_start_is_attempted_load_retries_plus_one_times() {
    let server = MockServer::start().await;
    mount_router(&server, json!({"type": "code"})).await;

    let config = CacheConfig::default();
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "deepseek-coder:6.7b-q4",
            "keep_alive": -1
        })))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "error": "busy" })))
        .expect(u64::from(config.load_retries) + 1)
        .mount(&server)
        .await;

    // Default backend settings, including its generation retries.
    let backend = Arc::new(OllamaBackend::new(
        OllamaConfig::new(server.uri()).with_retry_base_delay_ms(1),
    ));
    let cache = ModelCache::new(
        Arc::new(TierCatalog::default()),
        Arc::new(FixedProbe(roomy_gpu())),
        backend,
        config,
    )
    .await
    .unwrap();

    let err = cache.ensure_resident(TierId::Coder).await.unwrap_err();

    assert!(matches!(err, CacheError::LoadFailure { tier: TierId::Coder, .. }));
    assert_eq!(cache.resident_tiers(), vec![TierId::Router]);
}
