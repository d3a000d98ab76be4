use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Data groups the lifecycle loop manages independently.
pub const DATA_TYPES: [&str; 3] = ["file_logs", "captains_log_captures", "captains_log_reflections"];

/// Hot/cold retention policy for one data group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// Files older than this many days are compressed into the archive.
    pub hot_days: i64,
    /// Files or archived entries older than this many days are deleted.
    pub cold_days: i64,
    #[serde(default = "d_true")]
    pub archive_enabled: bool,
}

fn d_true() -> bool {
    true
}

/// Data-lifecycle settings (C11, lifecycle loop).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSettings {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_disk_alert")]
    pub disk_usage_alert_percent: f64,
    /// Per data-type retention; unlisted types are left untouched.
    #[serde(default = "d_policies")]
    pub policies: HashMap<String, LifecyclePolicy>,
    /// Date-suffixed indices older than this are deleted during the
    /// weekly purge.
    #[serde(default = "d_index_retention")]
    pub index_retention_days: i64,
}

fn d_disk_alert() -> f64 {
    80.0
}
fn d_index_retention() -> i64 {
    90
}
fn d_policies() -> HashMap<String, LifecyclePolicy> {
    let mut policies = HashMap::new();
    policies.insert(
        "file_logs".to_string(),
        LifecyclePolicy { hot_days: 7, cold_days: 90, archive_enabled: true },
    );
    policies.insert(
        "captains_log_captures".to_string(),
        LifecyclePolicy { hot_days: 30, cold_days: 180, archive_enabled: true },
    );
    policies.insert(
        "captains_log_reflections".to_string(),
        LifecyclePolicy { hot_days: 30, cold_days: 365, archive_enabled: true },
    );
    policies
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            disk_usage_alert_percent: d_disk_alert(),
            policies: d_policies(),
            index_retention_days: d_index_retention(),
        }
    }
}
