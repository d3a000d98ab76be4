use serde::{Deserialize, Serialize};

/// Background scheduler settings (C11, monitoring loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "d_true")]
    pub second_brain_enabled: bool,
    /// Monitoring loop period.
    #[serde(default = "d_check_interval")]
    pub check_interval_seconds: u64,
    /// Minimum gap between consolidation runs.
    #[serde(default = "d_min_interval")]
    pub min_consolidation_interval_seconds: u64,
    /// Required idle time since the last request.
    #[serde(default = "d_idle")]
    pub idle_time_seconds: u64,
    /// Consolidation is skipped while CPU load is at or above this.
    #[serde(default = "d_cpu")]
    pub cpu_threshold: f64,
    #[serde(default = "d_memory")]
    pub memory_threshold: f64,
    /// Captures considered per consolidation run.
    #[serde(default = "d_days")]
    pub consolidation_window_days: i64,
    #[serde(default = "d_limit")]
    pub consolidation_capture_limit: usize,
}

fn d_true() -> bool {
    true
}
fn d_check_interval() -> u64 {
    60
}
fn d_min_interval() -> u64 {
    3600
}
fn d_idle() -> u64 {
    300
}
fn d_cpu() -> f64 {
    50.0
}
fn d_memory() -> f64 {
    70.0
}
fn d_days() -> i64 {
    7
}
fn d_limit() -> usize {
    50
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            second_brain_enabled: d_true(),
            check_interval_seconds: d_check_interval(),
            min_consolidation_interval_seconds: d_min_interval(),
            idle_time_seconds: d_idle(),
            cpu_threshold: d_cpu(),
            memory_threshold: d_memory(),
            consolidation_window_days: d_days(),
            consolidation_capture_limit: d_limit(),
        }
    }
}
