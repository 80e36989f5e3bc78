use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proctoring::Subsystem;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub timestamp: DateTime<Utc>,
    pub subsystem: Subsystem,
    pub duration_ms: u64,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViolationCounters {
    pub candidates: u64,
    pub accepted: u64,
    pub throttled: u64,
    pub reported: u64,
    pub report_failures: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_cycles: Vec<CycleMetrics>,
    pub cycle_count: u64,
    pub timeout_count: u64,
    pub violations: ViolationCounters,
}
