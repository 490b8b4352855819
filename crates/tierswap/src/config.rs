//! Layered configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. An optional file (TOML, YAML or JSON, detected from the extension)
//! 3. Environment variables `TIERSWAP__<SECTION>__<KEY>`, e.g.
//!    `TIERSWAP__BACKEND__BASE_URL=http://gpu-box:11434`
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:11434"
//!
//! [cache]
//! max_vram_fraction = 0.85
//! safety_margin = { mode = "proportional", fraction = 0.08 }
//!
//! [[tiers]]
//! id = "router"
//! model = "smollm2:360m-q4"
//! footprint_gb = 0.4
//! tokens_per_sec = 400
//! max_context = 8192
//! purpose = "intent_classification"
//! ```
//!
//! An empty or absent `tiers` list means the built-in catalog.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::orchestrator::cache::{CacheConfig, SafetyMargin};
use crate::orchestrator::catalog::TierCatalog;
use crate::orchestrator::classifier::ClassifierConfig;
use crate::orchestrator::compute::DispatchConfig;
use crate::orchestrator::error::ConfigError;
use crate::orchestrator::ollama::OllamaConfig;
use crate::orchestrator::selector::SelectorConfig;
use crate::orchestrator::telemetry::TelemetryConfig;
use crate::orchestrator::types::ModelTier;

pub const ENV_PREFIX: &str = "TIERSWAP";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierswapConfig {
    pub backend: OllamaConfig,
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
    pub classifier: ClassifierConfig,
    pub selector: SelectorConfig,
    pub dispatch: DispatchConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<ModelTier>,
}

impl TierswapConfig {
    /// Load defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load) but reads environment overrides from `env`
    /// instead of the process environment when it is `Some`.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            tracing::debug!("Config: reading {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse a configuration document in `format` on top of the defaults.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self, ConfigError> {
        let parsed: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from_str(content, format))
            .build()?
            .try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// The validated tier catalog.
    pub fn catalog(&self) -> Result<TierCatalog, ConfigError> {
        if self.tiers.is_empty() {
            Ok(TierCatalog::default())
        } else {
            TierCatalog::new(self.tiers.clone())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.catalog()?;

        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.base_url is empty".into()));
        }

        check_fraction("cache.max_vram_fraction", self.cache.max_vram_fraction)?;
        match self.cache.safety_margin {
            SafetyMargin::Fixed { gb } if !gb.is_finite() || gb < 0.0 => {
                return Err(ConfigError::Invalid(format!(
                    "cache.safety_margin.gb must be >= 0, got {}",
                    gb
                )));
            }
            SafetyMargin::Proportional { fraction } => {
                check_fraction("cache.safety_margin.fraction", fraction)?;
            }
            SafetyMargin::Fixed { .. } => {}
        }
        if self.cache.max_specialists == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_specialists must be at least 1".into(),
            ));
        }

        for (name, threshold) in [
            ("selector.complexity_threshold", self.selector.complexity_threshold),
            ("dispatch.complexity_threshold", self.dispatch.complexity_threshold),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be within [0, 1], got {}",
                    name, threshold
                )));
            }
        }

        for (name, ms) in [
            ("backend.request_timeout_ms", self.backend.request_timeout_ms),
            ("telemetry.probe_timeout_ms", self.telemetry.probe_timeout_ms),
            ("classifier.timeout_ms", self.classifier.timeout_ms),
            ("dispatch.timeout_ms", self.dispatch.timeout_ms),
            ("cache.provision_timeout_ms", self.cache.provision_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be within (0, 1], got {}",
            name, value
        )))
    }
}
