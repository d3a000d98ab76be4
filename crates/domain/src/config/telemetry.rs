use serde::{Deserialize, Serialize};

/// Event logger + forwarder settings (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySettings {
    /// Search index base URL; `None` disables forwarding and backfill.
    #[serde(default = "d_index_url", skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
    #[serde(default = "d_log_prefix")]
    pub log_index_prefix: String,
    /// Rotate the JSONL sink when a segment reaches this size.
    #[serde(default = "d_max_bytes")]
    pub rotate_max_bytes: u64,
    /// Rotated segments kept (`current.jsonl.1` … `.N`).
    #[serde(default = "d_backups")]
    pub rotate_backups: usize,
    /// Consecutive forward failures before the circuit opens.
    #[serde(default = "d_breaker_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "d_breaker_cooldown")]
    pub breaker_cooldown_seconds: u64,
    /// In-flight forwarder writes allowed at once.
    #[serde(default = "d_forwarder_permits")]
    pub forwarder_concurrency: usize,
}

fn d_index_url() -> Option<String> {
    Some("http://localhost:9200".into())
}
fn d_log_prefix() -> String {
    "agent-logs".into()
}
fn d_max_bytes() -> u64 {
    100 * 1024 * 1024
}
fn d_backups() -> usize {
    5
}
fn d_breaker_threshold() -> u32 {
    3
}
fn d_breaker_cooldown() -> u64 {
    30
}
fn d_forwarder_permits() -> usize {
    10
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            index_url: d_index_url(),
            log_index_prefix: d_log_prefix(),
            rotate_max_bytes: d_max_bytes(),
            rotate_backups: d_backups(),
            breaker_failure_threshold: d_breaker_threshold(),
            breaker_cooldown_seconds: d_breaker_cooldown(),
            forwarder_concurrency: d_forwarder_permits(),
        }
    }
}
