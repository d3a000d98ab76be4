//! Query and trace-reconstruction API over the local JSONL event log.
//!
//! All queries scan `current.jsonl` plus its rotated backups (oldest first)
//! so a trace that spans a rotation boundary still reconstructs fully.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::path::PathBuf;

use helm_domain::{Error, Result};

use crate::events;

/// Parse a compact time window like `45s`, `30m`, `1h`, `2d`.
pub fn parse_time_window(window: &str) -> Result<Duration> {
    let window = window.trim().to_lowercase();
    if window.len() < 2 {
        return Err(Error::Other(format!("invalid time window \"{window}\"")));
    }
    let (value, unit) = window.split_at(window.len() - 1);
    let value: i64 = value
        .parse()
        .map_err(|_| Error::Other(format!("invalid time window \"{window}\"")))?;
    match unit {
        "s" => Ok(Duration::seconds(value)),
        "m" => Ok(Duration::minutes(value)),
        "h" => Ok(Duration::hours(value)),
        "d" => Ok(Duration::days(value)),
        other => Err(Error::Other(format!(
            "unknown time unit \"{other}\" (supported: s, m, h, d)"
        ))),
    }
}

/// Filters for [`TelemetryReader::query_events`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event: Option<String>,
    pub component: Option<String>,
    /// Compact window string, e.g. `"1h"`.
    pub window: Option<String>,
    pub limit: Option<usize>,
}

/// One phase of a request's latency breakdown.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_ms: Option<f64>,
}

/// Read-side companion of the event logger.
pub struct TelemetryReader {
    log_dir: PathBuf,
}

impl TelemetryReader {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self { log_dir: log_dir.into() }
    }

    /// `current.jsonl.N`, .., `current.jsonl.1`, `current.jsonl`, oldest first.
    fn log_files(&self) -> Vec<PathBuf> {
        let current = self.log_dir.join("current.jsonl");
        let mut files = Vec::new();
        let mut index = 1;
        loop {
            let backup = self.log_dir.join(format!("current.jsonl.{index}"));
            if backup.exists() {
                files.push(backup);
                index += 1;
            } else {
                break;
            }
        }
        files.reverse();
        if current.exists() {
            files.push(current);
        }
        files
    }

    fn read_entries(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<Value> {
        let mut entries = Vec::new();
        for path in self.log_files() {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read log file");
                    continue;
                }
            };
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let entry: Value = match serde_json::from_str(line) {
                    Ok(entry) => entry,
                    Err(_) => {
                        tracing::warn!(path = %path.display(), "skipping invalid JSON line");
                        continue;
                    }
                };
                let Some(timestamp) = entry_timestamp(&entry) else {
                    continue;
                };
                if let Some(start) = start {
                    if timestamp < start {
                        continue;
                    }
                }
                if let Some(end) = end {
                    if timestamp > end {
                        continue;
                    }
                }
                entries.push(entry);
            }
        }
        entries
    }

    /// Query events with optional filters, newest first.
    pub fn query_events(&self, query: &EventQuery) -> Result<Vec<Value>> {
        let start = match &query.window {
            Some(window) => Some(Utc::now() - parse_time_window(window)?),
            None => None,
        };

        let mut entries: Vec<Value> = self
            .read_entries(start, None)
            .into_iter()
            .filter(|entry| {
                if let Some(event) = &query.event {
                    if entry.get("event").and_then(Value::as_str) != Some(event.as_str()) {
                        return false;
                    }
                }
                if let Some(component) = &query.component {
                    if entry.get("component").and_then(Value::as_str) != Some(component.as_str()) {
                        return false;
                    }
                }
                true
            })
            .collect();

        entries.sort_by(|a, b| entry_timestamp(b).cmp(&entry_timestamp(a)));
        if let Some(limit) = query.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// All entries for one trace, ordered by timestamp.
    pub fn trace_events(&self, trace_id: &str) -> Vec<Value> {
        let mut entries: Vec<Value> = self
            .read_entries(None, None)
            .into_iter()
            .filter(|entry| entry.get("trace_id").and_then(Value::as_str) == Some(trace_id))
            .collect();
        entries.sort_by_key(entry_timestamp);
        entries
    }

    /// Count of one event type within a trailing window.
    pub fn recent_event_count(&self, event: &str, window_seconds: i64) -> usize {
        let start = Utc::now() - Duration::seconds(window_seconds);
        self.read_entries(Some(start), None)
            .iter()
            .filter(|entry| entry.get("event").and_then(Value::as_str) == Some(event))
            .count()
    }

    /// Phased request-to-reply timeline from one trace's events: a phase per
    /// orchestrator state (from consecutive `state_transition` events) plus
    /// a total, so the slowest phase is visible at a glance.
    pub fn latency_breakdown(&self, trace_id: &str) -> Vec<PhaseTiming> {
        let entries = self.trace_events(trace_id);
        if entries.is_empty() {
            return Vec::new();
        }

        let mut request_ts = None;
        let mut task_end_ts = None;
        let mut reply_ts = None;
        let mut state_starts: Vec<(String, DateTime<Utc>)> = Vec::new();

        for entry in &entries {
            let Some(timestamp) = entry_timestamp(entry) else {
                continue;
            };
            match entry.get("event").and_then(Value::as_str) {
                Some(events::REQUEST_RECEIVED) if request_ts.is_none() => {
                    request_ts = Some(timestamp)
                }
                Some(events::STATE_TRANSITION) => {
                    if let Some(from) = entry.get("from").and_then(Value::as_str) {
                        state_starts.push((from.to_string(), timestamp));
                    }
                }
                Some(events::TASK_COMPLETED) | Some(events::TASK_FAILED)
                    if task_end_ts.is_none() =>
                {
                    task_end_ts = Some(timestamp)
                }
                Some(events::REPLY_READY) if reply_ts.is_none() => reply_ts = Some(timestamp),
                _ => {}
            }
        }

        let mut breakdown = Vec::new();
        for (i, (state, start)) in state_starts.iter().enumerate() {
            let end = state_starts
                .get(i + 1)
                .map(|(_, t)| *t)
                .or(task_end_ts);
            breakdown.push(PhaseTiming {
                phase: state.clone(),
                start_time: start.to_rfc3339(),
                end_time: end.map(|t| t.to_rfc3339()),
                duration_ms: end.map(|t| (t - *start).num_milliseconds() as f64),
            });
        }

        if let (Some(request), Some(reply)) = (request_ts, reply_ts) {
            breakdown.push(PhaseTiming {
                phase: "total_request_to_reply".into(),
                start_time: request.to_rfc3339(),
                end_time: Some(reply.to_rfc3339()),
                duration_ms: Some((reply - request).num_milliseconds() as f64),
            });
        }

        breakdown
    }
}

fn entry_timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    entry
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::EventLogger;
    use helm_domain::config::TelemetrySettings;
    use helm_domain::TraceContext;
    use serde_json::json;

    fn logger_in(dir: &std::path::Path) -> EventLogger {
        EventLogger::new(dir, &TelemetrySettings::default()).unwrap()
    }

    #[test]
    fn parse_time_window_units() {
        assert_eq!(parse_time_window("45s").unwrap(), Duration::seconds(45));
        assert_eq!(parse_time_window("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_time_window("1h").unwrap(), Duration::hours(1));
        assert_eq!(parse_time_window("2d").unwrap(), Duration::days(2));
        assert!(parse_time_window("10x").is_err());
        assert!(parse_time_window("h").is_err());
        assert!(parse_time_window("").is_err());
    }

    #[test]
    fn query_filters_by_event_and_component() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_in(dir.path());
        logger.info("task_started", "orchestrator", None, json!({}));
        logger.info("task_completed", "orchestrator", None, json!({}));
        logger.info("task_started", "scheduler", None, json!({}));

        let reader = TelemetryReader::new(dir.path());
        let hits = reader
            .query_events(&EventQuery {
                event: Some("task_started".into()),
                component: Some("orchestrator".into()),
                ..EventQuery::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["component"], "orchestrator");
    }

    #[test]
    fn query_respects_limit_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_in(dir.path());
        for i in 0..5 {
            logger.info("tick", "test", None, json!({"i": i}));
        }

        let reader = TelemetryReader::new(dir.path());
        let hits = reader
            .query_events(&EventQuery {
                event: Some("tick".into()),
                limit: Some(2),
                ..EventQuery::default()
            })
            .unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn trace_events_reconstructs_only_that_trace() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_in(dir.path());
        let trace_a = TraceContext::new_trace();
        let trace_b = TraceContext::new_trace();

        logger.info("task_started", "orchestrator", Some(&trace_a), json!({}));
        logger.info("task_started", "orchestrator", Some(&trace_b), json!({}));
        logger.info("task_completed", "orchestrator", Some(&trace_a), json!({}));

        let reader = TelemetryReader::new(dir.path());
        let events = reader.trace_events(&trace_a.trace_id.to_string());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "task_started");
        assert_eq!(events[1]["event"], "task_completed");
    }

    #[test]
    fn breakdown_builds_state_phases_and_total() {
        let dir = tempfile::tempdir().unwrap();
        let logger = logger_in(dir.path());
        let trace = TraceContext::new_trace();

        logger.info("request_received", "orchestrator", Some(&trace), json!({}));
        logger.info(
            "state_transition",
            "orchestrator",
            Some(&trace),
            json!({"from": "init", "to": "planning"}),
        );
        logger.info(
            "state_transition",
            "orchestrator",
            Some(&trace),
            json!({"from": "planning", "to": "llm_call"}),
        );
        logger.info("task_completed", "orchestrator", Some(&trace), json!({}));
        logger.info("reply_ready", "orchestrator", Some(&trace), json!({}));

        let reader = TelemetryReader::new(dir.path());
        let breakdown = reader.latency_breakdown(&trace.trace_id.to_string());
        let phases: Vec<&str> = breakdown.iter().map(|p| p.phase.as_str()).collect();
        assert_eq!(phases, vec!["init", "planning", "total_request_to_reply"]);
        assert!(breakdown.iter().all(|p| p.duration_ms.is_some()));
    }
}
