//! ModelCache — VRAM-Aware Tier Residency with LRU Eviction
//!
//! Keeps the router tier permanently resident and swaps specialist tiers in
//! and out of accelerator memory on demand. Every admission decision is made
//! against a fresh [`HardwareState`] from the configured
//! [`HardwareProbe`](super::telemetry::HardwareProbe).
//!
//! ## Residency State Machine
//!
//! ```text
//!   Unloaded ──start()──▶ Loading ──ok──▶ Resident ──stop()──▶ Unloading ──ok──▶ Unloaded
//!       ▲                    │                ▲                     │
//!       └──── start failed ──┘                └──── stop failed ────┘
//! ```
//!
//! A failed load rolls back to `Unloaded`; a failed unload leaves the tier
//! `Resident`. Bookkeeping never claims a model is resident unless its
//! `start` call succeeded.
//!
//! ## Admission
//!
//! ```text
//! ensure_resident(tier)
//!   ├── hit ──────────────────────────▶ touch last_used, return
//!   └── miss ── lock admission
//!         ├── re-check hit
//!         ├── sample telemetry; required = footprint + safety margin
//!         ├── specialist cap reached or free < required?
//!         │     └── evict LRU specialist, re-sample, repeat
//!         ├── still short ────────────▶ CacheError::Capacity { shortfall }
//!         └── start(model) ───────────▶ Resident
//! ```
//!
//! ## Concurrency
//!
//! Slot bookkeeping sits behind a `parking_lot::RwLock` that is never held
//! across an `.await`. All residency mutations are additionally serialized by
//! an async admission mutex that *is* held across provisioning calls, so two
//! loads or evictions never interleave. Cache hits skip the admission mutex
//! entirely; concurrent hits on the same tier both succeed and the last
//! writer wins on `last_used`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::backend::ModelProvisioner;
use super::catalog::TierCatalog;
use super::error::{CacheError, InferenceError};
use super::telemetry::HardwareProbe;
use super::types::{HardwareState, ModelTier, TierId};

// ============================================================================
// Configuration
// ============================================================================

/// Headroom kept free on top of a tier's footprint when admitting it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SafetyMargin {
    /// A fixed number of GB.
    Fixed { gb: f64 },
    /// A fraction of total accelerator memory.
    Proportional { fraction: f64 },
}

impl Default for SafetyMargin {
    fn default() -> Self {
        Self::Fixed { gb: 1.0 }
    }
}

impl SafetyMargin {
    /// Margin in GB for an accelerator with `vram_total_gb` of memory.
    pub fn resolve(&self, vram_total_gb: f64) -> f64 {
        match *self {
            Self::Fixed { gb } => gb.max(0.0),
            Self::Proportional { fraction } => (vram_total_gb * fraction).max(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub safety_margin: SafetyMargin,
    /// Advisory ceiling for the sum of resident footprints, as a fraction of
    /// total accelerator memory. Overshoot is logged, never enforced.
    pub max_vram_fraction: f64,
    /// Maximum number of simultaneously resident non-router tiers.
    pub max_specialists: usize,
    /// Extra attempts for a failed `start`/`stop` within one request.
    pub load_retries: u32,
    /// Upper bound for one provisioning call, in milliseconds.
    pub provision_timeout_ms: u64,
    /// Specialists idle longer than this are released by housekeeping.
    pub idle_release_secs: u64,
    /// Interval between housekeeping passes.
    pub housekeeping_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            safety_margin: SafetyMargin::default(),
            max_vram_fraction: 0.85,
            max_specialists: 1,
            load_retries: 1,
            provision_timeout_ms: 180_000,
            idle_release_secs: 600,
            housekeeping_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn with_safety_margin(mut self, margin: SafetyMargin) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn with_max_vram_fraction(mut self, fraction: f64) -> Self {
        self.max_vram_fraction = fraction;
        self
    }

    pub fn with_max_specialists(mut self, max: usize) -> Self {
        self.max_specialists = max;
        self
    }

    pub fn with_load_retries(mut self, retries: u32) -> Self {
        self.load_retries = retries;
        self
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }

    pub fn idle_release(&self) -> Duration {
        Duration::from_secs(self.idle_release_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}

// ============================================================================
// ResidentModel
// ============================================================================

/// A tier currently loaded on the accelerator.
#[derive(Clone, PartialEq)]
pub struct ResidentModel {
    pub tier: TierId,
    pub model: String,
    pub footprint_gb: f64,
    pub loaded_at: DateTime<Utc>,
    /// Touched on every cache hit.
    pub last_used: Instant,
}

impl fmt::Debug for ResidentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResidentModel")
            .field("tier", &self.tier)
            .field("model", &self.model)
            .field("footprint_gb", &self.footprint_gb)
            .field("loaded_at", &self.loaded_at.to_rfc3339())
            .field("idle", &self.last_used.elapsed())
            .finish()
    }
}

/// Lifecycle state of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Residency {
    #[default]
    Unloaded,
    Loading,
    Resident,
    Unloading,
}

#[derive(Debug, Default)]
struct TierSlot {
    residency: Residency,
    resident: Option<ResidentModel>,
}

/// Outcome of one successful eviction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionResult {
    pub tier: TierId,
    pub model: String,
    pub freed_gb: f64,
    pub idle_secs: f64,
}

// ============================================================================
// Status report
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ResidentSummary {
    pub tier: TierId,
    pub model: String,
    pub footprint_gb: f64,
    pub loaded_at: DateTime<Utc>,
    pub idle_secs: f64,
}

/// Point-in-time view of the cache for operators.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub resident: Vec<ResidentSummary>,
    pub resident_footprint_gb: f64,
    pub safety_margin: SafetyMargin,
    pub max_vram_fraction: f64,
    pub max_specialists: usize,
}

#[derive(Debug, Clone, Copy)]
enum Provision {
    Start,
    Stop,
}

impl fmt::Display for Provision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("start"),
            Self::Stop => f.write_str("stop"),
        }
    }
}

// ============================================================================
// ModelCache
// ============================================================================

/// Tier residency manager.
///
/// Built with [`ModelCache::new`], which loads the router tier before
/// returning. Wrap in an `Arc` to share between the orchestrator and the
/// housekeeping task.
///
/// ```rust,ignore
/// let cache = ModelCache::new(catalog, probe, provisioner, CacheConfig::default()).await?;
/// let coder = cache.ensure_resident(TierId::Coder).await?;
/// ```
pub struct ModelCache {
    catalog: Arc<TierCatalog>,
    probe: Arc<dyn HardwareProbe>,
    provisioner: Arc<dyn ModelProvisioner>,
    config: CacheConfig,
    slots: RwLock<HashMap<TierId, TierSlot>>,
    admission: tokio::sync::Mutex<()>,
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("resident", &self.resident_tiers())
            .field("config", &self.config)
            .finish()
    }
}

impl ModelCache {
    /// Create the cache and bootstrap the router tier.
    ///
    /// Fails with [`CacheError::LoadFailure`] if the router cannot be loaded.
    pub async fn new(
        catalog: Arc<TierCatalog>,
        probe: Arc<dyn HardwareProbe>,
        provisioner: Arc<dyn ModelProvisioner>,
        config: CacheConfig,
    ) -> Result<Self, CacheError> {
        let slots = catalog
            .iter()
            .map(|t| (t.id, TierSlot::default()))
            .collect();

        let cache = Self {
            catalog,
            probe,
            provisioner,
            config,
            slots: RwLock::new(slots),
            admission: tokio::sync::Mutex::new(()),
        };

        let router = cache.catalog.router().clone();
        {
            let _guard = cache.admission.lock().await;
            cache.load(&router).await?;
        }

        tracing::info!(
            "ModelCache: router '{}' bootstrapped ({:.1}GB)",
            router.model,
            router.footprint_gb
        );

        Ok(cache)
    }

    pub fn catalog(&self) -> &TierCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn residency(&self, tier: TierId) -> Residency {
        self.slots
            .read()
            .get(&tier)
            .map(|s| s.residency)
            .unwrap_or_default()
    }

    pub fn resident(&self, tier: TierId) -> Option<ResidentModel> {
        self.slots
            .read()
            .get(&tier)
            .filter(|s| s.residency == Residency::Resident)
            .and_then(|s| s.resident.clone())
    }

    /// Resident tiers, router first.
    pub fn resident_tiers(&self) -> Vec<TierId> {
        let slots = self.slots.read();
        let mut tiers: Vec<TierId> = slots
            .iter()
            .filter(|(_, s)| s.residency == Residency::Resident)
            .map(|(id, _)| *id)
            .collect();
        tiers.sort();
        tiers
    }

    /// Sum of the footprints of every resident tier, in GB.
    pub fn resident_footprint_gb(&self) -> f64 {
        self.slots
            .read()
            .values()
            .filter_map(|s| s.resident.as_ref())
            .map(|r| r.footprint_gb)
            .sum()
    }

    pub fn status(&self) -> CacheStatus {
        let slots = self.slots.read();
        let mut resident: Vec<ResidentSummary> = slots
            .values()
            .filter(|s| s.residency == Residency::Resident)
            .filter_map(|s| s.resident.as_ref())
            .map(|r| ResidentSummary {
                tier: r.tier,
                model: r.model.clone(),
                footprint_gb: r.footprint_gb,
                loaded_at: r.loaded_at,
                idle_secs: r.last_used.elapsed().as_secs_f64(),
            })
            .collect();
        resident.sort_by_key(|r| r.tier);

        CacheStatus {
            resident_footprint_gb: resident.iter().map(|r| r.footprint_gb).sum(),
            resident,
            safety_margin: self.config.safety_margin,
            max_vram_fraction: self.config.max_vram_fraction,
            max_specialists: self.config.max_specialists,
        }
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Make `tier` resident, evicting least-recently-used specialists if the
    /// accelerator is short on memory.
    ///
    /// A hit refreshes `last_used` and returns without touching the
    /// provisioner or the admission lock.
    pub async fn ensure_resident(&self, tier: TierId) -> Result<ResidentModel, CacheError> {
        let spec = self
            .catalog
            .get(tier)
            .cloned()
            .ok_or(CacheError::UnknownTier(tier))?;

        if let Some(hit) = self.touch(tier) {
            tracing::debug!("ModelCache: hit for '{}'", tier);
            return Ok(hit);
        }

        let _guard = self.admission.lock().await;

        // Another task may have loaded it while we waited.
        if let Some(hit) = self.touch(tier) {
            tracing::debug!("ModelCache: hit for '{}' after waiting", tier);
            return Ok(hit);
        }

        if tier.is_router() {
            tracing::warn!("ModelCache: router not resident, reloading");
            return self.load(&spec).await;
        }

        self.admit_specialist(&spec).await
    }

    async fn admit_specialist(&self, spec: &ModelTier) -> Result<ResidentModel, CacheError> {
        let mut hw = self.probe.sample().await;
        if !hw.accelerator_available {
            let required = spec.footprint_gb + self.config.safety_margin.resolve(0.0);
            tracing::warn!(
                "ModelCache: accelerator unavailable, cannot admit '{}'",
                spec.id
            );
            return Err(CacheError::Capacity {
                tier: spec.id,
                required_gb: required,
                free_gb: 0.0,
                shortfall_gb: required,
            });
        }

        let mut freed_gb = 0.0;
        let mut projected_free = hw.usable_vram_gb();

        loop {
            let required = spec.footprint_gb + self.config.safety_margin.resolve(hw.vram_total_gb);
            let cap_reached = self.specialist_count() >= self.config.max_specialists.max(1);
            let fits = hw.has_free_vram(required)
                || (hw.accelerator_available && projected_free >= required);

            tracing::debug!(
                "ModelCache: admit '{}' needs {:.1}GB, free {:.1}GB (projected {:.1}GB), \
                 specialists at cap: {}",
                spec.id,
                required,
                hw.usable_vram_gb(),
                projected_free,
                cap_reached
            );

            if fits && !cap_reached {
                break;
            }

            let Some(victim) = self.lru_specialist() else {
                let available = hw.usable_vram_gb().max(projected_free);
                tracing::warn!(
                    "ModelCache: cannot admit '{}': need {:.1}GB, {:.1}GB available after \
                     freeing {:.1}GB",
                    spec.id,
                    required,
                    available,
                    freed_gb
                );
                return Err(CacheError::Capacity {
                    tier: spec.id,
                    required_gb: required,
                    free_gb: available,
                    shortfall_gb: (required - available).max(0.0),
                });
            };

            let evicted = self.evict_locked(victim).await?;
            freed_gb += evicted.freed_gb;

            // The runtime may release memory lazily, so also credit what
            // bookkeeping says was freed.
            let before_free = projected_free;
            hw = self.probe.sample().await;
            projected_free = hw.usable_vram_gb().max(before_free + evicted.freed_gb);
        }

        let resident = self.load(spec).await?;
        self.check_vram_ceiling(&hw);
        Ok(resident)
    }

    /// Advisory check of the resident total against `max_vram_fraction`.
    /// Returns `true` when the ceiling is exceeded; admission still succeeds.
    fn check_vram_ceiling(&self, hw: &HardwareState) -> bool {
        if !hw.accelerator_available {
            return false;
        }
        let ceiling = hw.vram_total_gb * self.config.max_vram_fraction;
        let total = self.resident_footprint_gb();
        if total > ceiling {
            tracing::warn!(
                "ModelCache: resident footprint {:.1}GB exceeds {:.0}% of {:.1}GB VRAM",
                total,
                self.config.max_vram_fraction * 100.0,
                hw.vram_total_gb
            );
            return true;
        }
        false
    }

    fn touch(&self, tier: TierId) -> Option<ResidentModel> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(&tier)?;
        if slot.residency != Residency::Resident {
            return None;
        }
        let resident = slot.resident.as_mut()?;
        resident.last_used = Instant::now();
        Some(resident.clone())
    }

    fn specialist_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|(id, s)| !id.is_router() && s.residency == Residency::Resident)
            .count()
    }

    fn lru_specialist(&self) -> Option<TierId> {
        self.slots
            .read()
            .iter()
            .filter(|(id, s)| !id.is_router() && s.residency == Residency::Resident)
            .filter_map(|(id, s)| s.resident.as_ref().map(|r| (*id, r.last_used)))
            .min_by_key(|(_, last_used)| *last_used)
            .map(|(id, _)| id)
    }

    fn set_residency(&self, tier: TierId, residency: Residency) {
        if let Some(slot) = self.slots.write().get_mut(&tier) {
            slot.residency = residency;
        }
    }

    /// `Unloaded → Loading → Resident`, rolling back on failure.
    /// Caller holds the admission lock.
    async fn load(&self, spec: &ModelTier) -> Result<ResidentModel, CacheError> {
        self.set_residency(spec.id, Residency::Loading);
        tracing::info!(
            "ModelCache: loading '{}' ({}, {:.1}GB)",
            spec.id,
            spec.model,
            spec.footprint_gb
        );

        if let Err(source) = self.provision(Provision::Start, &spec.model).await {
            self.set_residency(spec.id, Residency::Unloaded);
            tracing::error!("ModelCache: load of '{}' failed: {}", spec.id, source);
            return Err(CacheError::LoadFailure {
                tier: spec.id,
                model: spec.model.clone(),
                source,
            });
        }

        let resident = ResidentModel {
            tier: spec.id,
            model: spec.model.clone(),
            footprint_gb: spec.footprint_gb,
            loaded_at: Utc::now(),
            last_used: Instant::now(),
        };

        if let Some(slot) = self.slots.write().get_mut(&spec.id) {
            slot.residency = Residency::Resident;
            slot.resident = Some(resident.clone());
        }

        tracing::info!("ModelCache: '{}' resident", spec.id);
        Ok(resident)
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Evict one specialist tier. Returns `Ok(None)` if it was not resident.
    pub async fn evict(&self, tier: TierId) -> Result<Option<EvictionResult>, CacheError> {
        if tier.is_router() {
            return Err(CacheError::RouterPinned);
        }
        if !self.catalog.contains(tier) {
            return Err(CacheError::UnknownTier(tier));
        }

        let _guard = self.admission.lock().await;
        if self.residency(tier) != Residency::Resident {
            return Ok(None);
        }
        self.evict_locked(tier).await.map(Some)
    }

    /// `Resident → Unloading → Unloaded`; a failed stop restores `Resident`.
    /// Caller holds the admission lock and has checked the tier is resident.
    async fn evict_locked(&self, tier: TierId) -> Result<EvictionResult, CacheError> {
        if tier.is_router() {
            return Err(CacheError::RouterPinned);
        }

        let resident = self
            .resident(tier)
            .ok_or(CacheError::UnknownTier(tier))?;

        self.set_residency(tier, Residency::Unloading);
        let idle = resident.last_used.elapsed();

        tracing::info!(
            "ModelCache: evicting '{}' (idle for {:?}, freeing ~{:.1}GB)",
            tier,
            idle,
            resident.footprint_gb
        );

        if let Err(source) = self.provision(Provision::Stop, &resident.model).await {
            self.set_residency(tier, Residency::Resident);
            tracing::error!("ModelCache: unload of '{}' failed: {}", tier, source);
            return Err(CacheError::UnloadFailure {
                tier,
                model: resident.model,
                source,
            });
        }

        if let Some(slot) = self.slots.write().get_mut(&tier) {
            slot.residency = Residency::Unloaded;
            slot.resident = None;
        }

        Ok(EvictionResult {
            tier,
            model: resident.model,
            freed_gb: resident.footprint_gb,
            idle_secs: idle.as_secs_f64(),
        })
    }

    /// Evict every specialist idle for longer than `max_idle`.
    /// The router is never considered.
    pub async fn release_if_stale(
        &self,
        max_idle: Duration,
    ) -> Result<Vec<EvictionResult>, CacheError> {
        let _guard = self.admission.lock().await;

        let stale: Vec<TierId> = self
            .slots
            .read()
            .iter()
            .filter(|(id, s)| !id.is_router() && s.residency == Residency::Resident)
            .filter_map(|(id, s)| s.resident.as_ref().map(|r| (*id, r)))
            .filter(|(_, r)| r.last_used.elapsed() > max_idle)
            .map(|(id, _)| id)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for tier in stale {
            evicted.push(self.evict_locked(tier).await?);
        }

        if !evicted.is_empty() {
            tracing::info!("ModelCache: released {} stale tier(s)", evicted.len());
        }
        Ok(evicted)
    }

    /// Evict every specialist. The router stays resident for the rest of the
    /// process lifetime.
    pub async fn shutdown(&self) -> Vec<(TierId, Result<EvictionResult, CacheError>)> {
        let _guard = self.admission.lock().await;

        let resident: Vec<TierId> = self
            .resident_tiers()
            .into_iter()
            .filter(|t| !t.is_router())
            .collect();

        let mut results = Vec::with_capacity(resident.len());
        for tier in resident {
            results.push((tier, self.evict_locked(tier).await));
        }

        tracing::info!("ModelCache: shut down {} specialist(s)", results.len());
        results
    }

    /// Spawn a background loop calling [`release_if_stale`](Self::release_if_stale)
    /// every `interval`. Abort the returned handle to stop it.
    pub fn spawn_housekeeping(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = cache.release_if_stale(max_idle).await {
                    tracing::warn!("ModelCache: housekeeping pass failed: {}", e);
                }
            }
        })
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    async fn provision(&self, op: Provision, model: &str) -> Result<(), InferenceError> {
        let attempts = self.config.load_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let call = async {
                match op {
                    Provision::Start => self.provisioner.start(model).await,
                    Provision::Stop => self.provisioner.stop(model).await,
                }
            };

            let outcome = match tokio::time::timeout(self.config.provision_timeout(), call).await {
                Ok(result) => result,
                Err(_) => Err(InferenceError::Timeout(format!(
                    "{} '{}' exceeded {}ms",
                    op, model, self.config.provision_timeout_ms
                ))),
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "ModelCache: {} '{}' failed (attempt {}/{}): {}",
                        op,
                        model,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            InferenceError::ProviderError(format!("{} '{}' was never attempted", op, model))
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================
