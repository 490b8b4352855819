//! TaskClassifier — Router-Tier Intent Classification
//!
//! Asks the always-resident router model to describe a task as a small JSON
//! object and turns the reply into a [`TaskClassification`].
//!
//! ```text
//! task text ──▶ instruction prompt ──▶ router (temp 0.1, 256 tokens)
//!                                           │
//!              first well-formed {...} ◀────┘
//!                        │
//!                        ▼
//!          lenient field extraction ──▶ TaskClassification
//! ```
//!
//! Router models are small and chatty; they wrap the object in prose, use
//! `context_needed` instead of `context_need`, or quote numbers. The parser
//! accepts all of that. Anything it cannot salvage, and any dispatch failure
//! or timeout, yields [`TaskClassification::default`] from
//! [`TaskClassifier::classify`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::backend::InferenceBackend;
use super::error::ClassifierError;
use super::types::{InferenceRequest, TaskClassification, TaskType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Upper bound for the router call, in milliseconds.
    pub timeout_ms: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 15_000,
            temperature: 0.1,
            max_tokens: 256,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Instruction sent to the router for `task`.
pub fn build_prompt(task: &str) -> String {
    format!(
        "Analyze this task and return JSON with:\n\
         1. type: one of [chat, code, research, system, executive]\n\
         2. complexity: float 0-1\n\
         3. context_need: int (1-5 scale)\n\
         4. requires_reasoning: boolean\n\
         \n\
         Task: {}\n\
         \n\
         Return ONLY valid JSON:",
        task
    )
}

/// Find the first well-formed JSON object embedded in `text`.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{').find_map(|(idx, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

/// Build a classification from a router JSON object.
///
/// Missing or unusable fields take their default value. The object must
/// carry at least one recognized field.
pub fn classification_from_json(
    object: &Map<String, Value>,
) -> Result<TaskClassification, ClassifierError> {
    const KNOWN: [&str; 5] = [
        "type",
        "complexity",
        "context_need",
        "context_needed",
        "requires_reasoning",
    ];
    if !KNOWN.iter().any(|k| object.contains_key(*k)) {
        return Err(ClassifierError::Malformed(format!(
            "none of {:?} present",
            KNOWN
        )));
    }

    let defaults = TaskClassification::default();

    let task_type = object
        .get("type")
        .and_then(Value::as_str)
        .and_then(TaskType::parse_label)
        .unwrap_or(defaults.task_type);

    let complexity = object
        .get("complexity")
        .and_then(as_f64)
        .filter(|c| c.is_finite())
        .unwrap_or(defaults.complexity);

    let context_need = object
        .get("context_need")
        .or_else(|| object.get("context_needed"))
        .and_then(as_f64)
        .filter(|c| c.is_finite())
        .map(|c| c.round().clamp(1.0, 5.0) as u8)
        .unwrap_or(defaults.context_need);

    let requires_reasoning = match object.get("requires_reasoning") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => defaults.requires_reasoning,
    };

    Ok(TaskClassification::new(task_type, complexity)
        .with_context_need(context_need)
        .with_reasoning(requires_reasoning))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse raw router output into a classification.
pub fn parse_classification(text: &str) -> Result<TaskClassification, ClassifierError> {
    let object = extract_json_object(text).ok_or(ClassifierError::NoJson)?;
    classification_from_json(&object)
}

// ============================================================================
// TaskClassifier
// ============================================================================

pub struct TaskClassifier {
    backend: Arc<dyn InferenceBackend>,
    router_model: String,
    config: ClassifierConfig,
}

impl std::fmt::Debug for TaskClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskClassifier")
            .field("backend", &self.backend.name())
            .field("router_model", &self.router_model)
            .field("config", &self.config)
            .finish()
    }
}

impl TaskClassifier {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        router_model: impl Into<String>,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            backend,
            router_model: router_model.into(),
            config,
        }
    }

    pub fn router_model(&self) -> &str {
        &self.router_model
    }

    /// Classify `task`, reporting why the router's answer was unusable.
    pub async fn try_classify(&self, task: &str) -> Result<TaskClassification, ClassifierError> {
        let request = InferenceRequest::new(self.router_model.clone(), build_prompt(task))
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let response = tokio::time::timeout(self.config.timeout(), self.backend.generate(&request))
            .await
            .map_err(|_| ClassifierError::Timeout(self.config.timeout_ms))??;

        tracing::debug!("TaskClassifier: router replied {:?}", response.text);
        parse_classification(&response.text)
    }

    /// Classify `task`, falling back to the default classification on any
    /// failure. Never fails.
    pub async fn classify(&self, task: &str) -> TaskClassification {
        match self.try_classify(task).await {
            Ok(classification) => {
                tracing::info!(
                    "TaskClassifier: type={}, complexity={:.2}, context={}, reasoning={}",
                    classification.task_type,
                    classification.complexity,
                    classification.context_need,
                    classification.requires_reasoning
                );
                classification
            }
            Err(e) => {
                tracing::warn!("TaskClassifier: using default classification: {}", e);
                TaskClassification::default()
            }
        }
    }
}
