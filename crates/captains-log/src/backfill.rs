//! Index backfill: replay locally persisted captures and reflections into
//! the search index after an outage.
//!
//! Document ids are deterministic (trace id for captures, entry id for
//! reflections), so replay is idempotent; a checkpoint of
//! `(relative path, mtime)` per file group makes repeated passes cheap and
//! survives restarts via temp-file + atomic rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use helm_domain::Result;
use helm_telemetry::{daily_capture_index, events, EventLogger, IndexBackend};

use crate::capture::{CAPTURES_INDEX_PREFIX, REFLECTIONS_INDEX_PREFIX};
use crate::models::CaptainLogEntry;

pub const CHECKPOINT_FILENAME: &str = "es_backfill_checkpoint.json";
const CHECKPOINT_VERSION: u32 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupCheckpoint {
    #[serde(default)]
    pub last_path: Option<String>,
    #[serde(default)]
    pub last_mtime: Option<String>,
}

impl GroupCheckpoint {
    /// Whether a file at `(path, mtime)` is already covered.
    fn covers(&self, path: &str, mtime: &str) -> bool {
        match (&self.last_path, &self.last_mtime) {
            (Some(last_path), last_mtime) => {
                path < last_path.as_str()
                    || (path == last_path
                        && last_mtime.as_deref().is_some_and(|last| mtime <= last))
            }
            _ => false,
        }
    }

    fn advance(&mut self, path: &str, mtime: &str) {
        self.last_path = Some(path.to_string());
        self.last_mtime = Some(mtime.to_string());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillCheckpoint {
    #[serde(default = "d_version")]
    pub version: u32,
    #[serde(default)]
    pub last_scan_started_at: Option<String>,
    #[serde(default)]
    pub last_scan_completed_at: Option<String>,
    #[serde(default)]
    pub captures: GroupCheckpoint,
    #[serde(default)]
    pub reflections: GroupCheckpoint,
}

fn d_version() -> u32 {
    CHECKPOINT_VERSION
}

impl Default for BackfillCheckpoint {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            last_scan_started_at: None,
            last_scan_completed_at: None,
            captures: GroupCheckpoint::default(),
            reflections: GroupCheckpoint::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackfillResult {
    pub files_scanned: usize,
    pub indexed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub elapsed_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BackfillWorker {
    index: Arc<dyn IndexBackend>,
    /// The captains-log root (holds `CL-*.json`, `captures/`, checkpoint).
    captains_dir: PathBuf,
    logger: EventLogger,
}

impl BackfillWorker {
    pub fn new(index: Arc<dyn IndexBackend>, captains_dir: PathBuf, logger: EventLogger) -> Self {
        Self {
            index,
            captains_dir,
            logger,
        }
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.captains_dir.join(CHECKPOINT_FILENAME)
    }

    pub fn load_checkpoint(&self) -> BackfillCheckpoint {
        let path = self.checkpoint_path();
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "invalid backfill checkpoint, starting fresh");
                BackfillCheckpoint::default()
            }),
            Err(_) => BackfillCheckpoint::default(),
        }
    }

    fn save_checkpoint(&self, checkpoint: &BackfillCheckpoint) {
        let path = self.checkpoint_path();
        let write = || -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        };
        if let Err(e) = write() {
            tracing::warn!(path = %path.display(), error = %e, "failed to save backfill checkpoint");
        }
    }

    /// One backfill pass. Never raises; per-file failures are counted.
    pub async fn run(&self) -> BackfillResult {
        let started = Instant::now();
        let mut checkpoint = self.load_checkpoint();
        checkpoint.last_scan_started_at = Some(Utc::now().to_rfc3339());
        let mut result = BackfillResult::default();

        self.logger.info(
            events::BACKFILL_STARTED,
            "captains_log",
            None,
            json!({
                "checkpoint_captures": checkpoint.captures.last_path,
                "checkpoint_reflections": checkpoint.reflections.last_path,
            }),
        );

        // Captures: date directory order, then filename.
        for (path, mtime) in self.capture_files() {
            self.replay_file(&path, &mtime, FileKind::Capture, &mut checkpoint, &mut result)
                .await;
        }
        // Reflections: filename order (ids sort chronologically).
        for (path, mtime) in self.reflection_files() {
            self.replay_file(&path, &mtime, FileKind::Reflection, &mut checkpoint, &mut result)
                .await;
        }

        checkpoint.last_scan_completed_at = Some(Utc::now().to_rfc3339());
        self.save_checkpoint(&checkpoint);
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        self.logger.info(
            events::BACKFILL_COMPLETED,
            "captains_log",
            None,
            json!({
                "files_scanned": result.files_scanned,
                "indexed_count": result.indexed_count,
                "failed_count": result.failed_count,
                "skipped_count": result.skipped_count,
                "elapsed_ms": result.elapsed_ms,
            }),
        );
        result
    }

    async fn replay_file(
        &self,
        path: &Path,
        mtime: &str,
        kind: FileKind,
        checkpoint: &mut BackfillCheckpoint,
        result: &mut BackfillResult,
    ) {
        result.files_scanned += 1;
        let relative = self.relative_path(path);

        let group = match kind {
            FileKind::Capture => &checkpoint.captures,
            FileKind::Reflection => &checkpoint.reflections,
        };
        if group.covers(&relative, mtime) {
            result.skipped_count += 1;
            return;
        }

        match self.index_file(path, kind).await {
            Ok(()) => {
                result.indexed_count += 1;
                let group = match kind {
                    FileKind::Capture => &mut checkpoint.captures,
                    FileKind::Reflection => &mut checkpoint.reflections,
                };
                group.advance(&relative, mtime);
                self.save_checkpoint(checkpoint);
                self.logger.info(
                    events::BACKFILL_CHECKPOINT_UPDATED,
                    "captains_log",
                    None,
                    json!({"kind": kind.as_str(), "last_path": relative}),
                );
            }
            Err(e) => {
                result.failed_count += 1;
                self.logger.warn(
                    events::BACKFILL_FILE_FAILED,
                    "captains_log",
                    None,
                    json!({
                        "file_path": relative,
                        "kind": kind.as_str(),
                        "error": e.to_string(),
                    }),
                );
            }
        }
    }

    async fn index_file(&self, path: &Path, kind: FileKind) -> Result<()> {
        let raw = std::fs::read_to_string(path)?;
        match kind {
            FileKind::Capture => {
                let document: Value = serde_json::from_str(&raw)?;
                let trace_id = document
                    .get("trace_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        helm_domain::Error::InvalidResponse("capture missing trace_id".into())
                    })?
                    .to_string();
                let date = document
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc).date_naive())
                    .unwrap_or_else(|| Utc::now().date_naive());
                let index = daily_capture_index(CAPTURES_INDEX_PREFIX, date);
                self.index
                    .index_document(&index, &document, Some(&trace_id))
                    .await?;
            }
            FileKind::Reflection => {
                let entry: CaptainLogEntry = serde_json::from_str(&raw)?;
                let document = serde_json::to_value(&entry)?;
                let index = daily_capture_index(
                    REFLECTIONS_INDEX_PREFIX,
                    entry.timestamp.date_naive(),
                );
                self.index
                    .index_document(&index, &document, Some(&entry.entry_id))
                    .await?;
            }
        }
        Ok(())
    }

    // ── File enumeration ───────────────────────────────────────────

    /// Capture files in stable order: date directory, then filename.
    fn capture_files(&self) -> Vec<(PathBuf, String)> {
        let captures_dir = self.captains_dir.join("captures");
        let mut date_dirs: Vec<PathBuf> = read_dir_paths(&captures_dir)
            .into_iter()
            .filter(|path| path.is_dir())
            .collect();
        date_dirs.sort();

        let mut files = Vec::new();
        for date_dir in date_dirs {
            let mut in_dir: Vec<PathBuf> = read_dir_paths(&date_dir)
                .into_iter()
                .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                .collect();
            in_dir.sort();
            for path in in_dir {
                if let Some(mtime) = file_mtime(&path) {
                    files.push((path, mtime));
                }
            }
        }
        files
    }

    /// Reflection files (`CL-*.json`) in filename order.
    fn reflection_files(&self) -> Vec<(PathBuf, String)> {
        let mut files: Vec<PathBuf> = read_dir_paths(&self.captains_dir)
            .into_iter()
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy())
                    .is_some_and(|name| name.starts_with("CL-") && name.ends_with(".json"))
            })
            .collect();
        files.sort();
        files
            .into_iter()
            .filter_map(|path| file_mtime(&path).map(|mtime| (path, mtime)))
            .collect()
    }

    fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.captains_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FileKind {
    Capture,
    Reflection,
}

impl FileKind {
    fn as_str(&self) -> &'static str {
        match self {
            FileKind::Capture => "captures",
            FileKind::Reflection => "reflections",
        }
    }
}

fn read_dir_paths(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn file_mtime(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let datetime: DateTime<Utc> = modified.into();
    Some(datetime.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helm_domain::config::TelemetrySettings;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records every (index, doc_id) write; acts as a tiny fake index.
    #[derive(Default)]
    struct RecordingIndex {
        writes: Mutex<Vec<(String, String)>>,
        docs: Mutex<BTreeMap<(String, String), Value>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl IndexBackend for RecordingIndex {
        async fn index_document(
            &self,
            index: &str,
            document: &Value,
            doc_id: Option<&str>,
        ) -> Result<String> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(helm_domain::Error::Server("index down".into()));
            }
            let id = doc_id.unwrap_or("auto").to_string();
            self.writes.lock().unwrap().push((index.to_string(), id.clone()));
            self.docs
                .lock()
                .unwrap()
                .insert((index.to_string(), id.clone()), document.clone());
            Ok(id)
        }

        async fn list_indices(&self, _: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }

        async fn delete_index(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        worker: BackfillWorker,
        index: Arc<RecordingIndex>,
        captains_dir: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let captains_dir = dir.path().join("captains_log");
        std::fs::create_dir_all(&captains_dir).unwrap();
        let logger = EventLogger::new(dir.path().join("logs"), &TelemetrySettings::default()).unwrap();
        let index = Arc::new(RecordingIndex::default());
        let worker = BackfillWorker::new(index.clone(), captains_dir.clone(), logger);
        Fixture { worker, index, captains_dir, _dir: dir }
    }

    fn write_capture(captains_dir: &Path, date: &str, trace: &str) {
        let day_dir = captains_dir.join("captures").join(date);
        std::fs::create_dir_all(&day_dir).unwrap();
        let capture = json!({
            "trace_id": trace,
            "timestamp": format!("{date}T10:00:00Z"),
            "session_id": "s",
            "user_message": "m",
            "reply": "r",
            "final_state": "COMPLETED",
        });
        std::fs::write(day_dir.join(format!("{trace}.json")), capture.to_string()).unwrap();
    }

    fn write_reflection(captains_dir: &Path, entry_id: &str) {
        let entry = json!({
            "entry_id": entry_id,
            "timestamp": "2026-07-31T10:00:00Z",
            "type": "reflection",
            "title": "t",
            "rationale": "r",
            "status": "awaiting_approval",
        });
        std::fs::write(
            captains_dir.join(format!("{entry_id}.json")),
            entry.to_string(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn indexes_captures_and_reflections_with_deterministic_ids() {
        let fx = fixture();
        write_capture(&fx.captains_dir, "2026-07-30", "trace-abc");
        write_reflection(&fx.captains_dir, "CL-20260731-100000-001");

        let result = fx.worker.run().await;
        assert_eq!(result.files_scanned, 2);
        assert_eq!(result.indexed_count, 2);
        assert_eq!(result.failed_count, 0);

        let writes = fx.index.writes.lock().unwrap().clone();
        assert!(writes.contains(&(
            "agent-captains-captures-2026-07-30".to_string(),
            "trace-abc".to_string()
        )));
        assert!(writes.contains(&(
            "agent-captains-reflections-2026-07-31".to_string(),
            "CL-20260731-100000-001".to_string()
        )));
    }

    #[tokio::test]
    async fn second_run_skips_and_index_state_is_identical() {
        let fx = fixture();
        write_capture(&fx.captains_dir, "2026-07-30", "trace-abc");

        let first = fx.worker.run().await;
        assert_eq!(first.indexed_count, 1);
        let docs_after_first = fx.index.docs.lock().unwrap().clone();

        let second = fx.worker.run().await;
        assert_eq!(second.indexed_count, 0);
        assert_eq!(second.skipped_count, 1);
        assert_eq!(*fx.index.docs.lock().unwrap(), docs_after_first);
    }

    #[tokio::test]
    async fn replay_twice_without_checkpoint_is_idempotent_by_doc_id() {
        let fx = fixture();
        write_capture(&fx.captains_dir, "2026-07-30", "trace-abc");

        fx.worker.run().await;
        // Wipe the checkpoint to force a full replay.
        std::fs::remove_file(fx.captains_dir.join(CHECKPOINT_FILENAME)).unwrap();
        fx.worker.run().await;

        let writes = fx.index.writes.lock().unwrap();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], writes[1]);
        // Two writes, one document: deterministic id means an upsert.
        assert_eq!(fx.index.docs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_advances_and_new_files_still_flow() {
        let fx = fixture();
        write_capture(&fx.captains_dir, "2026-07-29", "trace-a");
        fx.worker.run().await;

        write_capture(&fx.captains_dir, "2026-07-30", "trace-b");
        let result = fx.worker.run().await;
        assert_eq!(result.indexed_count, 1);
        assert_eq!(result.skipped_count, 1);

        let checkpoint = fx.worker.load_checkpoint();
        assert!(checkpoint
            .captures
            .last_path
            .unwrap()
            .contains("2026-07-30/trace-b.json"));
        assert!(checkpoint.last_scan_completed_at.is_some());
    }

    #[tokio::test]
    async fn index_failure_counts_and_leaves_checkpoint_behind() {
        let fx = fixture();
        write_capture(&fx.captains_dir, "2026-07-30", "trace-abc");
        fx.index.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        let result = fx.worker.run().await;
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.indexed_count, 0);
        assert!(fx.worker.load_checkpoint().captures.last_path.is_none());

        // Recovery: the next pass picks the file up again.
        fx.index.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        let retry = fx.worker.run().await;
        assert_eq!(retry.indexed_count, 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_counted_failure() {
        let fx = fixture();
        let day_dir = fx.captains_dir.join("captures").join("2026-07-30");
        std::fs::create_dir_all(&day_dir).unwrap();
        std::fs::write(day_dir.join("bad.json"), "{broken").unwrap();

        let result = fx.worker.run().await;
        assert_eq!(result.failed_count, 1);
    }
}
