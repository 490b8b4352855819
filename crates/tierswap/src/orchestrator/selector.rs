//! Tier selection policy.
//!
//! A pure function of the classification, one hardware snapshot and the
//! catalog. First matching rule wins:
//!
//! ```text
//! 1. type == code                               && free >= coder    → coder
//! 2. (requires_reasoning || complexity > 0.7)   && free >= balanced → balanced
//! 3. type ∈ {system, executive}                                     → planner
//! 4. otherwise                                                      → fast
//! ```
//!
//! Memory gates compare against the raw footprint (no safety margin) and
//! treat an unavailable accelerator as zero free memory. A rule whose tier
//! is absent from the catalog is skipped.

use serde::{Deserialize, Serialize};

use super::catalog::TierCatalog;
use super::types::{HardwareState, TaskClassification, TaskType, TierId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Complexity strictly above this routes to the balanced tier.
    pub complexity_threshold: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            complexity_threshold: 0.7,
        }
    }
}

/// Stateless tier selection policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierSelector {
    config: SelectorConfig,
}

impl TierSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn select(
        &self,
        classification: &TaskClassification,
        hardware: &HardwareState,
        catalog: &TierCatalog,
    ) -> TierId {
        let free = hardware.usable_vram_gb();
        let fits = |tier: TierId| {
            hardware.accelerator_available
                && catalog
                    .get(tier)
                    .is_some_and(|spec| free >= spec.footprint_gb)
        };

        if classification.task_type == TaskType::Code && fits(TierId::Coder) {
            return TierId::Coder;
        }

        let demanding = classification.requires_reasoning
            || classification.complexity > self.config.complexity_threshold;
        if demanding && fits(TierId::Balanced) {
            return TierId::Balanced;
        }

        if matches!(
            classification.task_type,
            TaskType::System | TaskType::Executive
        ) && catalog.contains(TierId::Planner)
        {
            return TierId::Planner;
        }

        TierId::Fast
    }
}

/// [`TierSelector::select`] with the default threshold.
pub fn select(
    classification: &TaskClassification,
    hardware: &HardwareState,
    catalog: &TierCatalog,
) -> TierId {
    TierSelector::default().select(classification, hardware, catalog)
}
