//! Telemetry Monitor — Accelerator and Host Resource Sampling
//!
//! Produces fresh [`HardwareState`] snapshots for the cache's admission
//! decisions and for result annotation.
//!
//! ## Sources
//!
//! - **Accelerator**: `nvidia-smi --query-gpu=... --format=csv,noheader,nounits`
//!   run as a child process.
//! - **Host**: available RAM and global CPU utilization via `sysinfo`, on a
//!   blocking thread.
//!
//! ## Failure Semantics
//!
//! Sampling never fails. Each source runs under the configured probe timeout
//! (default 500ms); an accelerator that cannot be read within it yields a
//! state with zeroed accelerator fields and `accelerator_available = false`,
//! which downstream policy treats as "no room for specialist tiers".
//!
//! ```text
//! sample()
//!   ├── join ── nvidia-smi (timeout) ──▶ Some(reading) | None
//!   │       └── sysinfo   (timeout) ──▶ (ram_available, cpu%) | (0, 0)
//!   └──▶ HardwareState
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use super::types::HardwareState;

const BYTES_PER_GB: f64 = 1_073_741_824.0;
const MIB_PER_GB: f64 = 1024.0;

/// Source of hardware snapshots.
///
/// The cache and orchestrator only depend on this trait, so tests and
/// alternative sensors can stand in for [`TelemetryMonitor`].
#[async_trait]
pub trait HardwareProbe: Send + Sync {
    /// Take a fresh snapshot. Never fails; unavailable sensors read as zero.
    async fn sample(&self) -> HardwareState;
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Upper bound for each sensor read, in milliseconds.
    pub probe_timeout_ms: u64,
    /// Path or name of the `nvidia-smi` executable.
    pub nvidia_smi_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 500,
            nvidia_smi_path: "nvidia-smi".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

// ============================================================================
// AcceleratorReading
// ============================================================================

/// Raw accelerator figures as read from `nvidia-smi`, converted to GB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceleratorReading {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub util_percent: f64,
    pub temp_c: f64,
}

/// Parse the first device line of
/// `nvidia-smi --query-gpu=memory.total,memory.used,memory.free,utilization.gpu,temperature.gpu
/// --format=csv,noheader,nounits`.
///
/// Memory columns are MiB and must parse. Utilization and temperature may be
/// reported as `[N/A]` on some boards and read as zero.
pub fn parse_nvidia_smi(output: &str) -> Option<AcceleratorReading> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 5 {
        return None;
    }

    let mib = |s: &str| s.parse::<f64>().ok().map(|v| v / MIB_PER_GB);
    let lenient = |s: &str| s.parse::<f64>().unwrap_or(0.0);

    Some(AcceleratorReading {
        total_gb: mib(fields[0])?,
        used_gb: mib(fields[1])?,
        free_gb: mib(fields[2])?,
        util_percent: lenient(fields[3]),
        temp_c: lenient(fields[4]),
    })
}

// ============================================================================
// TelemetryMonitor
// ============================================================================

/// Hardware probe backed by `nvidia-smi` and `sysinfo`.
#[derive(Debug, Clone, Default)]
pub struct TelemetryMonitor {
    config: TelemetryConfig,
}

impl TelemetryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TelemetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Read accelerator memory, utilization and temperature.
    ///
    /// Returns `None` when the tool is missing, exits non-zero, prints
    /// something unparseable, or does not finish within the probe timeout.
    pub async fn query_accelerator(&self) -> Option<AcceleratorReading> {
        let output = tokio::process::Command::new(&self.config.nvidia_smi_path)
            .args([
                "--query-gpu=memory.total,memory.used,memory.free,utilization.gpu,temperature.gpu",
                "--format=csv,noheader,nounits",
            ])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.config.probe_timeout(), output).await {
            Ok(Ok(out)) if out.status.success() => {
                let reading = parse_nvidia_smi(&String::from_utf8_lossy(&out.stdout));
                if reading.is_none() {
                    tracing::warn!("TelemetryMonitor: unparseable nvidia-smi output");
                }
                reading
            }
            Ok(Ok(out)) => {
                tracing::debug!(
                    "TelemetryMonitor: nvidia-smi exited with {}",
                    out.status
                );
                None
            }
            Ok(Err(e)) => {
                tracing::debug!("TelemetryMonitor: nvidia-smi unavailable: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "TelemetryMonitor: nvidia-smi did not answer within {}ms",
                    self.config.probe_timeout_ms
                );
                None
            }
        }
    }

    /// Read available host RAM (GB) and global CPU utilization (%).
    ///
    /// `sysinfo` needs two CPU refreshes separated by its minimum update
    /// interval, so this runs on a blocking thread.
    pub async fn query_host(&self) -> (f64, f64) {
        let read = tokio::task::spawn_blocking(|| {
            let mut sys = System::new_with_specifics(
                RefreshKind::new()
                    .with_memory(MemoryRefreshKind::everything())
                    .with_cpu(CpuRefreshKind::new().with_cpu_usage()),
            );
            sys.refresh_memory();
            sys.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_cpu_usage();
            (
                sys.available_memory() as f64 / BYTES_PER_GB,
                sys.global_cpu_usage() as f64,
            )
        });

        match tokio::time::timeout(self.config.probe_timeout(), read).await {
            Ok(Ok(values)) => values,
            _ => {
                tracing::warn!("TelemetryMonitor: host metrics unavailable");
                (0.0, 0.0)
            }
        }
    }
}

#[async_trait]
impl HardwareProbe for TelemetryMonitor {
    async fn sample(&self) -> HardwareState {
        let (accelerator, (ram_available_gb, cpu_percent)) =
            tokio::join!(self.query_accelerator(), self.query_host());

        let state = match accelerator {
            Some(r) => HardwareState {
                accelerator_available: true,
                vram_total_gb: r.total_gb,
                vram_used_gb: r.used_gb,
                vram_free_gb: r.free_gb,
                gpu_util_percent: r.util_percent,
                gpu_temp_c: r.temp_c,
                ram_available_gb,
                cpu_percent,
            },
            None => HardwareState::without_accelerator(ram_available_gb, cpu_percent),
        };

        tracing::debug!(
            "TelemetryMonitor: vram free={:.1}GB/{:.1}GB, gpu={:.0}%, ram={:.1}GB, cpu={:.0}%",
            state.vram_free_gb,
            state.vram_total_gb,
            state.gpu_util_percent,
            state.ram_available_gb,
            state.cpu_percent,
        );

        state
    }
}

// ============================================================================
// Tests
// ============================================================================
