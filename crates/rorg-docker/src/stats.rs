//! Resource-usage snapshots and the shared per-service stats cache.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cumulative CPU counters for one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Total CPU time consumed, in nanoseconds.
    pub total_usage: u64,
    /// Per-core breakdown of `total_usage`; absent on cgroup v2 hosts.
    #[serde(default)]
    pub percpu_usage: Option<Vec<u64>>,
}

/// One CPU sample, as reported by the runtime's stats endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuStats {
    /// Container CPU counters.
    pub cpu_usage: CpuUsage,
    /// Host-wide CPU time at sample time, in nanoseconds.
    #[serde(default)]
    pub system_cpu_usage: Option<u64>,
}

/// One memory sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Current memory usage, in bytes.
    #[serde(default)]
    pub usage: Option<u64>,
}

/// A resource-usage snapshot for one container.
///
/// The shape mirrors the Docker stats endpoint: a current and a previous
/// CPU sample, so usage can be derived from their difference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStats {
    /// When the runtime took this sample.
    pub read: DateTime<Utc>,
    /// The current CPU sample.
    pub cpu_stats: CpuStats,
    /// The previous CPU sample.
    pub precpu_stats: CpuStats,
    /// The current memory sample.
    pub memory_stats: MemoryStats,
}

impl ContainerStats {
    /// CPU usage in logical-core units (may exceed 1.0 on multi-core
    /// containers): `(Δtotal / Δsystem) × number of cores`.
    ///
    /// Returns 0 when the per-core breakdown is absent or the host-wide
    /// delta is unusable.
    pub fn cpu_usage_cores(&self) -> f64 {
        let percpu = match &self.cpu_stats.cpu_usage.percpu_usage {
            Some(percpu) if !percpu.is_empty() => percpu,
            _ => return 0.0,
        };
        let (system, presystem) = match (
            self.cpu_stats.system_cpu_usage,
            self.precpu_stats.system_cpu_usage,
        ) {
            (Some(s), Some(p)) if s > p => (s, p),
            _ => return 0.0,
        };
        let total_delta =
            self.cpu_stats.cpu_usage.total_usage as f64 - self.precpu_stats.cpu_usage.total_usage as f64;
        total_delta / (system - presystem) as f64 * percpu.len() as f64
    }

    /// Memory usage in bytes; 0 when the runtime did not report it.
    pub fn memory_usage_bytes(&self) -> u64 {
        self.memory_stats.usage.unwrap_or(0)
    }

    /// Age of this sample relative to the wall clock.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.read
    }
}

/// Shared cache slot for a service's latest stats snapshot.
///
/// The background refresher publishes into the cell while RPC handlers
/// read from it, without either side holding the registry lock.  Updates
/// replace the whole snapshot behind a single pointer swap; snapshots
/// are never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct StatsCell(Arc<Mutex<Option<Arc<ContainerStats>>>>);

impl StatsCell {
    /// A new, empty cell.
    pub fn new() -> StatsCell {
        StatsCell::default()
    }

    /// Publish a fresh snapshot, replacing any previous one.  Returns
    /// the shared handle to the snapshot just published.
    pub fn publish(&self, stats: ContainerStats) -> Arc<ContainerStats> {
        let stats = Arc::new(stats);
        let mut slot = self.0.lock().expect("poisoned stats cell");
        *slot = Some(Arc::clone(&stats));
        stats
    }

    /// The most recently published snapshot, if any.
    pub fn latest(&self) -> Option<Arc<ContainerStats>> {
        self.0.lock().expect("poisoned stats cell").clone()
    }
}
