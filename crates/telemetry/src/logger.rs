//! The structured event logger: one JSON object per line into
//! `current.jsonl`, rotated by size, with optional async forwarding to the
//! search index.
//!
//! `log()` must be safe from any concurrent caller and must never propagate
//! an error into the caller's path: local write failures are reported once
//! as a warning and then swallowed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use helm_domain::config::TelemetrySettings;
use helm_domain::{Result, TraceContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}

/// One structured event. Arbitrary fields are flattened alongside the
/// envelope keys when serialized.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub event: String,
    pub component: String,
    pub trace_id: Option<Uuid>,
    pub span_id: Option<Uuid>,
    pub fields: Map<String, Value>,
}

impl EventRecord {
    pub fn new(
        level: Level,
        event: &str,
        component: &str,
        trace: Option<&TraceContext>,
        fields: Value,
    ) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        Self {
            timestamp: Utc::now(),
            level,
            event: event.to_string(),
            component: component.to_string(),
            trace_id: trace.map(|t| t.trace_id),
            span_id: trace.map(|t| t.span_id),
            fields,
        }
    }

    /// The flattened JSON object form used for both the local sink and the
    /// index forwarder.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        map.insert("level".into(), Value::String(self.level.as_str().into()));
        map.insert("event".into(), Value::String(self.event.clone()));
        map.insert("component".into(), Value::String(self.component.clone()));
        if let Some(id) = self.trace_id {
            map.insert("trace_id".into(), Value::String(id.to_string()));
        }
        if let Some(id) = self.span_id {
            map.insert("span_id".into(), Value::String(id.to_string()));
        }
        for (key, value) in &self.fields {
            // Envelope keys win over caller fields of the same name.
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(map)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rotating file sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FileSink {
    path: PathBuf,
    file: Option<File>,
    current_size: u64,
    max_bytes: u64,
    backups: usize,
}

impl FileSink {
    fn open(path: PathBuf, max_bytes: u64, backups: usize) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            file: Some(file),
            current_size,
            max_bytes,
            backups,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let needed = line.len() as u64 + 1;
        if self.current_size > 0 && self.current_size + needed > self.max_bytes {
            self.rotate()?;
        }
        if self.file.is_none() {
            // A previous rotation failed; try to reopen.
            let reopened = OpenOptions::new().create(true).append(true).open(&self.path)?;
            self.file = Some(reopened);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            self.current_size += needed;
        }
        Ok(())
    }

    /// Shift `current.jsonl.{i}` up by one, dropping the oldest, then move
    /// the live file to `.1` and start a fresh segment.
    fn rotate(&mut self) -> std::io::Result<()> {
        self.file = None;
        for i in (1..self.backups).rev() {
            let from = self.backup_path(i);
            if from.exists() {
                std::fs::rename(&from, self.backup_path(i + 1))?;
            }
        }
        if self.backups > 0 && self.path.exists() {
            std::fs::rename(&self.path, self.backup_path(1))?;
        }
        self.file = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        self.current_size = 0;
        Ok(())
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "current.jsonl".into());
        self.path.with_file_name(format!("{name}.{index}"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event logger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    sink: Mutex<FileSink>,
    write_error_warned: AtomicBool,
    forwarder_tx: Mutex<Option<mpsc::Sender<EventRecord>>>,
}

/// Process-wide structured event logger. Cheap to clone; all clones share
/// one sink.
#[derive(Clone)]
pub struct EventLogger {
    inner: Arc<Inner>,
}

impl EventLogger {
    /// Open (or create) `<log_dir>/current.jsonl`.
    pub fn new(log_dir: impl Into<PathBuf>, settings: &TelemetrySettings) -> Result<Self> {
        let path = log_dir.into().join("current.jsonl");
        let sink = FileSink::open(path, settings.rotate_max_bytes, settings.rotate_backups)?;
        Ok(Self {
            inner: Arc::new(Inner {
                sink: Mutex::new(sink),
                write_error_warned: AtomicBool::new(false),
                forwarder_tx: Mutex::new(None),
            }),
        })
    }

    /// Wire the async forwarder's intake. Events logged before this point
    /// only reach the local sink.
    pub fn attach_forwarder(&self, tx: mpsc::Sender<EventRecord>) {
        *self.inner.forwarder_tx.lock() = Some(tx);
    }

    /// Append one event. Never blocks on the forwarder and never returns an
    /// error: a local write failure is surfaced as a single warning.
    pub fn log(
        &self,
        level: Level,
        event: &str,
        component: &str,
        trace: Option<&TraceContext>,
        fields: Value,
    ) {
        let record = EventRecord::new(level, event, component, trace, fields);
        let line = record.to_value().to_string();

        {
            let mut sink = self.inner.sink.lock();
            if let Err(e) = sink.write_line(&line) {
                if !self.inner.write_error_warned.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %e, path = %sink.path.display(), "event log write failed");
                }
            }
        }

        if let Some(tx) = self.inner.forwarder_tx.lock().as_ref() {
            // Full queue means the index is far behind; the local sink
            // already has the event, so dropping here is safe.
            let _ = tx.try_send(record);
        }
    }

    pub fn debug(&self, event: &str, component: &str, trace: Option<&TraceContext>, fields: Value) {
        self.log(Level::Debug, event, component, trace, fields);
    }

    pub fn info(&self, event: &str, component: &str, trace: Option<&TraceContext>, fields: Value) {
        self.log(Level::Info, event, component, trace, fields);
    }

    pub fn warn(&self, event: &str, component: &str, trace: Option<&TraceContext>, fields: Value) {
        self.log(Level::Warning, event, component, trace, fields);
    }

    pub fn error(&self, event: &str, component: &str, trace: Option<&TraceContext>, fields: Value) {
        self.log(Level::Error, event, component, trace, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(max_bytes: u64, backups: usize) -> TelemetrySettings {
        TelemetrySettings {
            rotate_max_bytes: max_bytes,
            rotate_backups: backups,
            ..TelemetrySettings::default()
        }
    }

    #[test]
    fn writes_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path(), &settings(1024 * 1024, 2)).unwrap();
        let trace = TraceContext::new_trace();

        logger.info("task_started", "orchestrator", Some(&trace), json!({"channel": "CHAT"}));
        logger.warn("policy_violation", "tools", None, json!({"tool_name": "read_file"}));

        let content = std::fs::read_to_string(dir.path().join("current.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "task_started");
        assert_eq!(first["component"], "orchestrator");
        assert_eq!(first["level"], "INFO");
        assert_eq!(first["channel"], "CHAT");
        assert_eq!(first["trace_id"], trace.trace_id.to_string());

        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["level"], "WARNING");
        assert!(second.get("trace_id").is_none());
    }

    #[test]
    fn rotates_by_size_and_keeps_backups() {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path(), &settings(256, 2)).unwrap();

        for i in 0..40 {
            logger.info("filler", "test", None, json!({"i": i, "pad": "x".repeat(32)}));
        }

        assert!(dir.path().join("current.jsonl").exists());
        assert!(dir.path().join("current.jsonl.1").exists());
        assert!(dir.path().join("current.jsonl.2").exists());
        assert!(!dir.path().join("current.jsonl.3").exists());

        // The live segment stays under the limit.
        let size = std::fs::metadata(dir.path().join("current.jsonl")).unwrap().len();
        assert!(size <= 256 + 128, "live segment too large: {size}");
    }

    #[test]
    fn envelope_keys_win_over_caller_fields() {
        let record = EventRecord::new(
            Level::Info,
            "task_started",
            "orchestrator",
            None,
            json!({"event": "spoofed", "extra": 1}),
        );
        let value = record.to_value();
        assert_eq!(value["event"], "task_started");
        assert_eq!(value["extra"], 1);
    }

    #[test]
    fn non_object_fields_are_wrapped() {
        let record = EventRecord::new(Level::Info, "e", "c", None, json!("bare"));
        assert_eq!(record.to_value()["value"], "bare");
    }
}
