//! Validated tier catalog.
//!
//! The catalog is loaded once at startup and never mutated. Construction
//! enforces that the `router` and `fast` tiers exist, that no tier appears
//! twice, and that every footprint is a positive finite number.

use serde::Serialize;

use super::error::ConfigError;
use super::types::{ModelTier, TierId};

/// Immutable, validated set of [`ModelTier`] entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TierCatalog {
    /// Sorted by `TierId`; index 0 is always `router` and index 1 `fast`.
    tiers: Vec<ModelTier>,
}

impl TierCatalog {
    pub fn new(mut tiers: Vec<ModelTier>) -> Result<Self, ConfigError> {
        tiers.sort_by_key(|t| t.id);

        for pair in tiers.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(ConfigError::DuplicateTier(pair[0].id));
            }
        }

        for required in [TierId::Router, TierId::Fast] {
            if !tiers.iter().any(|t| t.id == required) {
                return Err(ConfigError::MissingTier(required));
            }
        }

        for tier in &tiers {
            if tier.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tier '{}' has an empty model name",
                    tier.id
                )));
            }
            if !tier.footprint_gb.is_finite() || tier.footprint_gb <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "tier '{}' footprint must be positive, got {}",
                    tier.id, tier.footprint_gb
                )));
            }
            if tier.max_context == 0 {
                return Err(ConfigError::Invalid(format!(
                    "tier '{}' max_context must be positive",
                    tier.id
                )));
            }
        }

        Ok(Self { tiers })
    }

    pub fn get(&self, id: TierId) -> Option<&ModelTier> {
        self.tiers.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: TierId) -> bool {
        self.get(id).is_some()
    }

    /// The permanently resident classifier tier.
    pub fn router(&self) -> &ModelTier {
        &self.tiers[0]
    }

    /// The lightweight general-purpose tier used as the first fallback.
    pub fn fast(&self) -> &ModelTier {
        &self.tiers[1]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelTier> {
        self.tiers.iter()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierCatalog {
    fn default() -> Self {
        let mut tiers = ModelTier::default_catalog();
        tiers.sort_by_key(|t| t.id);
        Self { tiers }
    }
}
