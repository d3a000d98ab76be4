use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Reflection,
    ConfigProposal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    AwaitingApproval,
    Approved,
    Rejected,
}

/// A concrete, actionable change the reflection proposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    pub what: String,
    pub why: String,
    pub how: String,
}

/// Pointer from an entry back into telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// One captain's log entry, persisted as a JSON file and indexed daily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptainLogEntry {
    /// Sortable unique id: `CL-YYYYMMDD-HHMMSS-[trace8-]NNN`. Empty until
    /// the manager assigns one at write time.
    #[serde(default)]
    pub entry_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub title: String,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_change: Option<ProposedChange>,
    /// Human-readable metric strings, deterministically extracted.
    #[serde(default)]
    pub supporting_metrics: Vec<String>,
    /// Typed form of the same metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_structured: Option<Vec<Metric>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_assessment: Option<String>,
    pub status: EntryStatus,
    #[serde(default)]
    pub telemetry_refs: Vec<TelemetryRef>,
}

impl CaptainLogEntry {
    /// The trace id this entry reflects on, if any.
    pub fn trace_id(&self) -> Option<&str> {
        self.telemetry_refs
            .iter()
            .find_map(|r| r.trace_id.as_deref())
    }
}
