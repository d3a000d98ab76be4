//! Per-request task captures.
//!
//! A capture is the durable record of one request (inputs, reply, tools,
//! timing), written locally first and indexed with `doc_id = trace_id` so
//! index replay is idempotent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use helm_domain::Result;
use helm_telemetry::{events, EventLogger};

pub const CAPTURES_INDEX_PREFIX: &str = "agent-captains-captures";
pub const REFLECTIONS_INDEX_PREFIX: &str = "agent-captains-reflections";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCapture {
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_message: String,
    pub reply: String,
    pub final_state: String,
    #[serde(default)]
    pub steps_count: usize,
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub model_roles: Vec<String>,
    #[serde(default)]
    pub duration_ms: u64,
    /// Entities mentioned, used by consolidation.
    #[serde(default)]
    pub key_entities: Vec<String>,
}

impl TaskCapture {
    /// `captures/YYYY-MM-DD/<trace_id>.json` under the captains-log root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.timestamp.format("%Y-%m-%d").to_string())
            .join(format!("{}.json", self.trace_id))
    }
}

/// Write one capture under `captures_dir`, creating the date directory.
pub fn write_capture(
    captures_dir: &Path,
    capture: &TaskCapture,
    logger: &EventLogger,
) -> Result<PathBuf> {
    let path = captures_dir.join(capture.relative_path());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(capture)?)?;

    logger.info(
        events::TASK_CAPTURE_WRITTEN,
        "captains_log",
        None,
        json!({
            "trace_id": capture.trace_id,
            "file_path": path.display().to_string(),
        }),
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_domain::config::TelemetrySettings;

    #[test]
    fn capture_lands_in_date_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path().join("logs"), &TelemetrySettings::default()).unwrap();

        let capture = TaskCapture {
            trace_id: "trace-abc".into(),
            timestamp: "2026-07-31T10:00:00Z".parse().unwrap(),
            session_id: "s-1".into(),
            user_message: "hi".into(),
            reply: "hello".into(),
            final_state: "COMPLETED".into(),
            steps_count: 2,
            tool_names: vec![],
            model_roles: vec!["STANDARD".into()],
            duration_ms: 120,
            key_entities: vec![],
        };

        let path = write_capture(&dir.path().join("captures"), &capture, &logger).unwrap();
        assert!(path.ends_with("2026-07-31/trace-abc.json"));

        let loaded: TaskCapture =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.trace_id, "trace-abc");
        assert_eq!(loaded.final_state, "COMPLETED");
    }
}
