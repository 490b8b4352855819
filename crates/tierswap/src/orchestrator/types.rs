//! Core types for the tier orchestration layer.
//!
//! Everything that crosses a component boundary lives here: tier identifiers
//! and catalog entries, hardware snapshots, task classifications, and the
//! request/response contract spoken with the inference runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Tiers
// ============================================================================

/// Identifier of a model tier.
///
/// `Router` is the permanently resident classifier. Every other variant is a
/// specialist that the [`ModelCache`](super::cache::ModelCache) swaps in and
/// out on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierId {
    Router,
    Fast,
    Coder,
    Balanced,
    Planner,
}

impl TierId {
    /// All tier identifiers, router first.
    pub const ALL: [TierId; 5] = [
        TierId::Router,
        TierId::Fast,
        TierId::Coder,
        TierId::Balanced,
        TierId::Planner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::Fast => "fast",
            Self::Coder => "coder",
            Self::Balanced => "balanced",
            Self::Planner => "planner",
        }
    }

    /// Whether this tier is the permanently resident router.
    pub fn is_router(&self) -> bool {
        matches!(self, Self::Router)
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TierId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "router" => Ok(Self::Router),
            "fast" => Ok(Self::Fast),
            "coder" => Ok(Self::Coder),
            "balanced" => Ok(Self::Balanced),
            "planner" => Ok(Self::Planner),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Static catalog entry describing one model tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTier {
    pub id: TierId,
    /// Model name as known to the inference runtime (e.g. `qwen2.5:3b-instruct-q4`).
    pub model: String,
    /// Estimated accelerator memory footprint in GB.
    pub footprint_gb: f64,
    /// Estimated generation throughput in tokens per second.
    pub tokens_per_sec: u32,
    /// Maximum context window in tokens.
    pub max_context: u32,
    /// Semantic purpose tag (e.g. `code_generation`).
    pub purpose: String,
}

impl ModelTier {
    pub fn new(
        id: TierId,
        model: impl Into<String>,
        footprint_gb: f64,
        tokens_per_sec: u32,
        max_context: u32,
        purpose: impl Into<String>,
    ) -> Self {
        Self {
            id,
            model: model.into(),
            footprint_gb,
            tokens_per_sec,
            max_context,
            purpose: purpose.into(),
        }
    }

    /// The tier catalog this system shipped with on a 12GB consumer GPU.
    pub fn default_catalog() -> Vec<ModelTier> {
        vec![
            ModelTier::new(
                TierId::Router,
                "smollm2:360m-q4",
                0.4,
                400,
                8192,
                "intent_classification",
            ),
            ModelTier::new(
                TierId::Fast,
                "qwen2.5:3b-instruct-q4",
                2.2,
                120,
                16384,
                "general_chat",
            ),
            ModelTier::new(
                TierId::Coder,
                "deepseek-coder:6.7b-q4",
                4.2,
                60,
                16384,
                "code_generation",
            ),
            ModelTier::new(
                TierId::Balanced,
                "gemma2:9b-instruct-q4",
                5.8,
                45,
                8192,
                "complex_reasoning",
            ),
            ModelTier::new(
                TierId::Planner,
                "phi3.5:3.8b-mini-q4",
                2.4,
                100,
                16384,
                "task_planning",
            ),
        ]
    }
}

// ============================================================================
// HardwareState
// ============================================================================

/// A point-in-time snapshot of accelerator and host resources.
///
/// All memory figures are in GB. When the accelerator could not be read,
/// `accelerator_available` is `false` and every accelerator field is zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardwareState {
    pub accelerator_available: bool,
    pub vram_total_gb: f64,
    pub vram_used_gb: f64,
    pub vram_free_gb: f64,
    pub gpu_util_percent: f64,
    pub gpu_temp_c: f64,
    pub ram_available_gb: f64,
    pub cpu_percent: f64,
}

impl HardwareState {
    /// A state with zeroed accelerator fields.
    pub fn without_accelerator(ram_available_gb: f64, cpu_percent: f64) -> Self {
        Self {
            accelerator_available: false,
            vram_total_gb: 0.0,
            vram_used_gb: 0.0,
            vram_free_gb: 0.0,
            gpu_util_percent: 0.0,
            gpu_temp_c: 0.0,
            ram_available_gb,
            cpu_percent,
        }
    }

    /// Accelerator memory currently free, treating an unavailable
    /// accelerator as having none.
    pub fn usable_vram_gb(&self) -> f64 {
        if self.accelerator_available {
            self.vram_free_gb.max(0.0)
        } else {
            0.0
        }
    }

    /// Whether at least `required_gb` of accelerator memory is free.
    /// Equality counts as sufficient.
    pub fn has_free_vram(&self, required_gb: f64) -> bool {
        self.accelerator_available && self.usable_vram_gb() >= required_gb
    }
}

// ============================================================================
// Task classification
// ============================================================================

/// Broad category of a submitted task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[default]
    Chat,
    Code,
    Research,
    System,
    Executive,
}

impl TaskType {
    /// Lenient parse used on router output. Unknown labels map to `None`.
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "chat" => Some(Self::Chat),
            "code" => Some(Self::Code),
            "research" => Some(Self::Research),
            "system" => Some(Self::System),
            "executive" => Some(Self::Executive),
            _ => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Chat => "chat",
            Self::Code => "code",
            Self::Research => "research",
            Self::System => "system",
            Self::Executive => "executive",
        };
        f.write_str(s)
    }
}

/// Structured classification of a task produced by the router tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskClassification {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Estimated difficulty in `[0, 1]`.
    pub complexity: f64,
    /// How much context the task needs, `1..=5`.
    pub context_need: u8,
    pub requires_reasoning: bool,
}

impl Default for TaskClassification {
    fn default() -> Self {
        Self {
            task_type: TaskType::Chat,
            complexity: 0.5,
            context_need: 3,
            requires_reasoning: false,
        }
    }
}

impl TaskClassification {
    pub fn new(task_type: TaskType, complexity: f64) -> Self {
        Self {
            task_type,
            complexity: complexity.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    pub fn with_reasoning(mut self, requires_reasoning: bool) -> Self {
        self.requires_reasoning = requires_reasoning;
        self
    }

    pub fn with_context_need(mut self, context_need: u8) -> Self {
        self.context_need = context_need.clamp(1, 5);
        self
    }
}

// ============================================================================
// Inference contract
// ============================================================================

/// Sampling and budget options for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Context window to request; `None` leaves the runtime default.
    pub context_window: Option<u32>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            context_window: None,
        }
    }
}

/// A single non-streaming generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    pub options: GenerationOptions,
}

impl InferenceRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            options: GenerationOptions::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = max_tokens;
        self
    }

    pub fn with_context_window(mut self, context_window: u32) -> Self {
        self.options.context_window = Some(context_window);
        self
    }
}

/// Completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub text: String,
    /// Model that produced the response, as reported by the runtime.
    pub model: String,
    /// Generated token count when the runtime reports it.
    pub completion_tokens: Option<u32>,
}
