//! # Resource governor.
//!
//! [`ResourceGovernor`] limits intake when CPU or memory utilization crosses
//! its threshold. CPU comes from the observed metrics snapshot; memory comes
//! from a pluggable [`MemoryProbe`]. The default probe reads the process
//! resident set against total system memory on Linux and reports `0.0` on
//! other platforms.

use std::sync::{Arc, PoisonError, RwLock};

use crate::metrics::MetricsSnapshot;
use crate::regulators::Regulator;

/// Samples current memory utilization in `[0, 1]`.
pub type MemoryProbe = Arc<dyn Fn() -> f64 + Send + Sync>;

struct UsageState {
    cpu: f64,
    memory: f64,
}

/// CPU- and memory-threshold regulator.
pub struct ResourceGovernor {
    inner: RwLock<UsageState>,
    max_cpu: f64,
    max_memory: f64,
    probe: MemoryProbe,
}

impl ResourceGovernor {
    /// Creates a governor limiting at `max_cpu` / `max_memory` utilization
    /// (both in `[0, 1]`), using the platform default memory probe.
    pub fn new(max_cpu: f64, max_memory: f64) -> Self {
        Self::with_probe(max_cpu, max_memory, Arc::new(default_memory_probe))
    }

    /// Creates a governor with a custom memory probe.
    pub fn with_probe(max_cpu: f64, max_memory: f64, probe: MemoryProbe) -> Self {
        Self {
            inner: RwLock::new(UsageState {
                cpu: 0.0,
                memory: 0.0,
            }),
            max_cpu,
            max_memory,
            probe,
        }
    }

    /// Current `(cpu, memory)` utilization.
    pub fn usage(&self) -> (f64, f64) {
        let state = self.read();
        (state.cpu, state.memory)
    }

    /// Configured `(cpu, memory)` thresholds.
    pub fn thresholds(&self) -> (f64, f64) {
        (self.max_cpu, self.max_memory)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, UsageState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, UsageState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Regulator for ResourceGovernor {
    fn observe(&self, metrics: &MetricsSnapshot) {
        let memory = (self.probe)();
        let mut state = self.write();
        if metrics.resource_utilization > 0.0 {
            state.cpu = metrics.resource_utilization;
        }
        state.memory = memory;
    }

    fn limit(&self) -> bool {
        let state = self.read();
        state.cpu >= self.max_cpu || state.memory >= self.max_memory
    }

    /// Refreshes the memory reading.
    fn renormalize(&self) {
        let memory = (self.probe)();
        self.write().memory = memory;
    }
}

/// Resident-set share of total system memory.
#[cfg(target_os = "linux")]
fn default_memory_probe() -> f64 {
    fn resident_bytes() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(resident_pages * 4096)
    }
    fn total_bytes() -> Option<u64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
        let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
        Some(kib * 1024)
    }
    match (resident_bytes(), total_bytes()) {
        (Some(resident), Some(total)) if total > 0 => resident as f64 / total as f64,
        _ => 0.0,
    }
}

#[cfg(not(target_os = "linux"))]
fn default_memory_probe() -> f64 {
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_snapshot(utilization: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            resource_utilization: utilization,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn limits_when_cpu_crosses_threshold() {
        let gov = ResourceGovernor::with_probe(0.8, 0.9, Arc::new(|| 0.0));
        gov.observe(&cpu_snapshot(0.5));
        assert!(!gov.limit());

        gov.observe(&cpu_snapshot(0.85));
        assert!(gov.limit());
    }

    #[test]
    fn limits_when_memory_crosses_threshold() {
        let gov = ResourceGovernor::with_probe(0.8, 0.5, Arc::new(|| 0.75));
        gov.observe(&cpu_snapshot(0.1));
        assert!(gov.limit());
        assert_eq!(gov.usage(), (0.1, 0.75));
    }

    #[test]
    fn zero_cpu_sample_keeps_previous_reading() {
        let gov = ResourceGovernor::with_probe(0.8, 0.9, Arc::new(|| 0.0));
        gov.observe(&cpu_snapshot(0.85));
        gov.observe(&cpu_snapshot(0.0));
        assert!(gov.limit());
    }

    #[test]
    fn renormalize_refreshes_memory() {
        let reading = Arc::new(std::sync::atomic::AtomicU64::new(90));
        let r = reading.clone();
        let gov = ResourceGovernor::with_probe(
            0.8,
            0.5,
            Arc::new(move || r.load(std::sync::atomic::Ordering::Relaxed) as f64 / 100.0),
        );
        gov.observe(&cpu_snapshot(0.1));
        assert!(gov.limit());

        reading.store(10, std::sync::atomic::Ordering::Relaxed);
        gov.renormalize();
        assert!(!gov.limit());
    }
}
