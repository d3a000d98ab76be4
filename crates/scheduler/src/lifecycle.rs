//! Data lifecycle: disk checks, hot→archive compression, cold purges, and
//! index retention cleanup.
//!
//! File groups (`file_logs`, `captains_log_captures`,
//! `captains_log_reflections`) age independently. Archiving compresses
//! files past their `hot_days` into `archive/<type>/YYYY-MM/<name>.gz` and
//! removes the originals; purging deletes live and archived entries past
//! `cold_days`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use helm_domain::config::{LifecycleSettings, DATA_TYPES};
use helm_domain::Result;
use helm_telemetry::index::index_date_suffix;
use helm_telemetry::{events, EventLogger, IndexBackend};

#[derive(Debug, Clone, Default)]
pub struct ArchiveResult {
    pub data_type: String,
    pub archived_count: usize,
    pub archived_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PurgeResult {
    pub data_type: String,
    pub deleted_count: usize,
}

pub struct DataLifecycleManager {
    telemetry_root: PathBuf,
    settings: LifecycleSettings,
    index: Option<Arc<dyn IndexBackend>>,
    /// Daily index families subject to retention cleanup.
    index_prefixes: Vec<String>,
    logger: EventLogger,
}

impl DataLifecycleManager {
    pub fn new(
        telemetry_root: PathBuf,
        settings: LifecycleSettings,
        index: Option<Arc<dyn IndexBackend>>,
        index_prefixes: Vec<String>,
        logger: EventLogger,
    ) -> Self {
        Self {
            telemetry_root,
            settings,
            index,
            index_prefixes,
            logger,
        }
    }

    pub fn data_types() -> [&'static str; 3] {
        DATA_TYPES
    }

    /// Compare current disk usage against the alert threshold and emit the
    /// check event (with `alert: true` past the threshold).
    pub fn check_disk_usage(&self, used_percent: Option<f64>) {
        let alert = used_percent.is_some_and(|used| used >= self.settings.disk_usage_alert_percent);
        self.logger.log(
            if alert {
                helm_telemetry::Level::Warning
            } else {
                helm_telemetry::Level::Info
            },
            events::LIFECYCLE_DISK_CHECK,
            "lifecycle",
            None,
            json!({
                "disk_used_percent": used_percent,
                "alert_percent": self.settings.disk_usage_alert_percent,
                "alert": alert,
            }),
        );
    }

    /// Archive one data type's files older than its `hot_days`.
    pub async fn archive_old_data(&self, data_type: &str) -> Result<ArchiveResult> {
        let mut result = ArchiveResult {
            data_type: data_type.to_string(),
            ..ArchiveResult::default()
        };

        let Some(policy) = self.settings.policies.get(data_type) else {
            return Ok(result);
        };
        if !policy.archive_enabled {
            self.logger.info(
                events::LIFECYCLE_ARCHIVE,
                "lifecycle",
                None,
                json!({"data_type": data_type, "skipped": true, "reason": "archive_disabled"}),
            );
            return Ok(result);
        }

        let cutoff = Utc::now() - Duration::days(policy.hot_days);
        let archive_dir = self.telemetry_root.join("archive").join(data_type);

        for (path, mtime) in self.files_for(data_type) {
            if mtime >= cutoff {
                continue;
            }
            let month_dir = archive_dir.join(mtime.format("%Y-%m").to_string());
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".into());
            let destination = month_dir.join(format!("{file_name}.gz"));

            let source = path.clone();
            let compressed = tokio::task::spawn_blocking(move || {
                compress_and_remove(&source, &destination)
            })
            .await
            .map_err(|e| helm_domain::Error::Other(format!("archive task failed: {e}")))?;

            match compressed {
                Ok(bytes) => {
                    result.archived_count += 1;
                    result.archived_bytes += bytes;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "archive failed for file");
                }
            }
        }

        self.logger.info(
            events::LIFECYCLE_ARCHIVE,
            "lifecycle",
            None,
            json!({
                "data_type": data_type,
                "archived_count": result.archived_count,
                "archived_bytes": result.archived_bytes,
            }),
        );
        Ok(result)
    }

    /// Delete one data type's live files and archived entries older than
    /// its `cold_days`.
    pub async fn purge_expired_data(&self, data_type: &str) -> Result<PurgeResult> {
        let mut result = PurgeResult {
            data_type: data_type.to_string(),
            ..PurgeResult::default()
        };

        let Some(policy) = self.settings.policies.get(data_type) else {
            return Ok(result);
        };
        if policy.cold_days <= 0 {
            return Ok(result);
        }
        let cutoff = Utc::now() - Duration::days(policy.cold_days);

        for (path, mtime) in self.files_for(data_type) {
            if mtime < cutoff && std::fs::remove_file(&path).is_ok() {
                result.deleted_count += 1;
            }
        }

        // Archived entries for this type.
        let archive_dir = self.telemetry_root.join("archive").join(data_type);
        for (path, mtime) in files_under(&archive_dir, &|_| true) {
            if mtime < cutoff && std::fs::remove_file(&path).is_ok() {
                result.deleted_count += 1;
            }
        }

        self.logger.info(
            events::LIFECYCLE_PURGE,
            "lifecycle",
            None,
            json!({"data_type": data_type, "deleted_count": result.deleted_count}),
        );
        Ok(result)
    }

    /// Delete date-suffixed indices older than the retention bound.
    pub async fn cleanup_indices(&self) -> Result<usize> {
        let Some(index) = &self.index else {
            return Ok(0);
        };
        let cutoff = Utc::now().date_naive() - Duration::days(self.settings.index_retention_days);
        let mut deleted = 0;

        for prefix in &self.index_prefixes {
            let names = match index.list_indices(prefix).await {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(prefix, error = %e, "index listing failed during cleanup");
                    continue;
                }
            };
            for name in names {
                let Some(date) = index_date_suffix(&name) else {
                    continue;
                };
                if date < cutoff {
                    match index.delete_index(&name).await {
                        Ok(()) => deleted += 1,
                        Err(e) => tracing::warn!(index = %name, error = %e, "index delete failed"),
                    }
                }
            }
        }
        Ok(deleted)
    }

    // ── File enumeration per data type ─────────────────────────────

    fn files_for(&self, data_type: &str) -> Vec<(PathBuf, DateTime<Utc>)> {
        match data_type {
            "file_logs" => files_under(&self.telemetry_root.join("logs"), &|name| {
                name.starts_with("current.jsonl")
            }),
            "captains_log_captures" => {
                let captures = self.telemetry_root.join("captains_log").join("captures");
                let mut files = Vec::new();
                for (path, mtime) in files_under(&captures, &|name| name.ends_with(".json")) {
                    files.push((path, mtime));
                }
                files
            }
            "captains_log_reflections" => {
                files_under(&self.telemetry_root.join("captains_log"), &|name| {
                    name.starts_with("CL-") && name.ends_with(".json")
                })
            }
            other => {
                tracing::warn!(data_type = other, "unknown lifecycle data type");
                Vec::new()
            }
        }
    }
}

/// Recursively list files under `dir` whose name passes the filter, with
/// their modification times.
fn files_under(
    dir: &Path,
    name_filter: &dyn Fn(&str) -> bool,
) -> Vec<(PathBuf, DateTime<Utc>)> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_under(&path, name_filter));
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name_filter(&name) {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                files.push((path, DateTime::<Utc>::from(modified)));
            }
        }
    }
    files.sort();
    files
}

/// Gzip `source` into `destination` (creating parents), then remove the
/// original. Returns the original's size in bytes.
fn compress_and_remove(source: &Path, destination: &Path) -> Result<u64> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = std::fs::read(source)?;
    let bytes = content.len() as u64;

    let file = std::fs::File::create(destination)?;
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(&content)?;
    encoder.finish()?;

    std::fs::remove_file(source)?;
    Ok(bytes)
}
