mod types;

pub use types::{CycleMetrics, MetricsSnapshot, SystemMetrics, ViolationCounters};

use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_CYCLES: usize = 20;

/// Session-scoped counters for detector cycles and violation flow.
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_cycles: Vec<CycleMetrics>,
    cycle_count: u64,
    timeout_count: u64,
    violations: ViolationCounters,
    system: System,
    pid: Pid,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta, so take a baseline now
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_cycles: Vec::with_capacity(MAX_RECENT_CYCLES),
                cycle_count: 0,
                timeout_count: 0,
                violations: ViolationCounters::default(),
                system,
                pid,
            })),
        }
    }

    pub async fn record_cycle(&self, metrics: CycleMetrics) {
        let mut state = self.inner.lock().await;

        state.cycle_count += 1;
        if metrics.timed_out {
            state.timeout_count += 1;
        }

        state.recent_cycles.push(metrics);
        if state.recent_cycles.len() > MAX_RECENT_CYCLES {
            state.recent_cycles.remove(0);
        }
    }

    pub async fn record_candidate(&self, accepted: bool) {
        let mut state = self.inner.lock().await;
        state.violations.candidates += 1;
        if accepted {
            state.violations.accepted += 1;
        } else {
            state.violations.throttled += 1;
        }
    }

    pub async fn record_report(&self, ok: bool) {
        let mut state = self.inner.lock().await;
        if ok {
            state.violations.reported += 1;
        } else {
            state.violations.report_failures += 1;
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let pid = state.pid;

        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let system = match state.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics::default(),
        };

        MetricsSnapshot {
            system,
            recent_cycles: state.recent_cycles.clone(),
            cycle_count: state.cycle_count,
            timeout_count: state.timeout_count,
            violations: state.violations.clone(),
        }
    }

    pub async fn reset(&self) {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.recent_cycles.clear();
        state.cycle_count = 0;
        state.timeout_count = 0;
        state.violations = ViolationCounters::default();
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
