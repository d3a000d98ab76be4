//! Logbook persistence: entry ids, JSON files, optional git commits.
//!
//! Entry ids are `CL-YYYYMMDD-HHMMSS-[trace8-]NNN`, where `NNN` is a
//! three-digit sequence scanned per (timestamp-second, trace-prefix) group,
//! so entries produced in the same second for the same trace stay unique
//! and sortable.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::json;

use helm_domain::Result;
use helm_telemetry::{events, EventLogger};

use crate::models::CaptainLogEntry;

pub struct LogbookManager {
    log_dir: PathBuf,
    logger: EventLogger,
}

impl LogbookManager {
    pub fn new(log_dir: impl Into<PathBuf>, logger: EventLogger) -> Result<Self> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self { log_dir, logger })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Assign an id (if unset), write the entry as pretty JSON, and emit
    /// `captains_log_entry_created`. Returns the file path.
    pub fn write_entry(&self, entry: &mut CaptainLogEntry) -> Result<PathBuf> {
        if entry.entry_id.is_empty() {
            let trace_prefix = entry.trace_id().map(|t| {
                let cleaned: String = t.chars().filter(|c| *c != '-').collect();
                cleaned.chars().take(8).collect::<String>()
            });
            entry.entry_id =
                self.generate_entry_id(entry.timestamp, trace_prefix.as_deref());
        }

        let slug = sanitize_title(&entry.title);
        let filename = if slug.is_empty() {
            format!("{}.json", entry.entry_id)
        } else {
            format!("{}-{slug}.json", entry.entry_id)
        };
        let path = self.log_dir.join(filename);
        std::fs::write(&path, serde_json::to_string_pretty(entry)?)?;

        self.logger.info(
            events::CAPTAINS_LOG_ENTRY_CREATED,
            "captains_log",
            None,
            json!({
                "entry_id": entry.entry_id,
                "entry_type": entry.entry_type,
                "title": entry.title,
                "file_path": path.display().to_string(),
            }),
        );
        Ok(path)
    }

    /// Next id in the `(timestamp second, trace prefix)` group, scanning
    /// existing files for the highest sequence.
    pub fn generate_entry_id(&self, timestamp: DateTime<Utc>, trace_prefix: Option<&str>) -> String {
        let stamp = timestamp.format("%Y%m%d-%H%M%S").to_string();
        let prefix = trace_prefix
            .map(|t| format!("{t}-"))
            .unwrap_or_default();

        let pattern = Regex::new(&format!(
            r"^CL-{stamp}-{}(\d{{3}})",
            regex::escape(&prefix)
        ))
        .expect("entry id pattern");

        let mut max_seen = 0u32;
        if let Ok(entries) = std::fs::read_dir(&self.log_dir) {
            for file in entries.filter_map(|e| e.ok()) {
                let name = file.file_name().to_string_lossy().into_owned();
                if let Some(captures) = pattern.captures(&name) {
                    if let Ok(sequence) = captures[1].parse::<u32>() {
                        max_seen = max_seen.max(sequence);
                    }
                }
            }
        }

        format!("CL-{stamp}-{prefix}{:03}", max_seen + 1)
    }

    /// Commit one entry file to the local VCS. Failures (no repository, git
    /// missing) are reported as `false`, never as errors.
    pub async fn commit_to_git(&self, entry_id: &str, path: &Path) -> bool {
        let repo_dir = self.log_dir.clone();

        let inside_repo = tokio::process::Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(&repo_dir)
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false);
        if !inside_repo {
            tracing::debug!(entry_id, "skipping git commit, not a repository");
            return false;
        }

        let added = tokio::process::Command::new("git")
            .arg("add")
            .arg(path)
            .current_dir(&repo_dir)
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false);
        if !added {
            return false;
        }

        let committed = tokio::process::Command::new("git")
            .args(["commit", "-m", &format!("Captain's Log: {entry_id}")])
            .current_dir(&repo_dir)
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false);

        if committed {
            self.logger.info(
                events::CAPTAINS_LOG_ENTRY_COMMITTED,
                "captains_log",
                None,
                json!({"entry_id": entry_id}),
            );
        }
        committed
    }
}

/// Lowercase, alphanumerics and hyphens only, capped at 50 chars.
fn sanitize_title(title: &str) -> String {
    let mut slug = String::new();
    let mut last_hyphen = true;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
        if slug.len() >= 50 {
            break;
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryStatus, EntryType, TelemetryRef};
    use helm_domain::config::TelemetrySettings;

    fn manager(dir: &Path) -> LogbookManager {
        let logger = EventLogger::new(dir.join("logs"), &TelemetrySettings::default()).unwrap();
        LogbookManager::new(dir.join("captains_log"), logger).unwrap()
    }

    fn entry(title: &str, trace: Option<&str>) -> CaptainLogEntry {
        CaptainLogEntry {
            entry_id: String::new(),
            timestamp: "2026-07-31T17:06:13Z".parse().unwrap(),
            entry_type: EntryType::Reflection,
            title: title.into(),
            rationale: "went fine".into(),
            proposed_change: None,
            supporting_metrics: vec![],
            metrics_structured: None,
            impact_assessment: None,
            status: EntryStatus::AwaitingApproval,
            telemetry_refs: trace
                .map(|t| {
                    vec![TelemetryRef {
                        trace_id: Some(t.into()),
                        ..TelemetryRef::default()
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn same_second_same_trace_entries_get_sequential_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let mut first = entry("Task: simple", Some("a9e965fb-0000-0000-0000-000000000000"));
        let mut second = entry("Task: simple", Some("a9e965fb-0000-0000-0000-000000000000"));
        manager.write_entry(&mut first).unwrap();
        manager.write_entry(&mut second).unwrap();

        assert_eq!(first.entry_id, "CL-20260731-170613-a9e965fb-001");
        assert_eq!(second.entry_id, "CL-20260731-170613-a9e965fb-002");
    }

    #[test]
    fn different_trace_prefixes_sequence_independently() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let mut a = entry("t", Some("aaaaaaaa-0000-0000-0000-000000000000"));
        let mut b = entry("t", Some("bbbbbbbb-0000-0000-0000-000000000000"));
        manager.write_entry(&mut a).unwrap();
        manager.write_entry(&mut b).unwrap();

        assert!(a.entry_id.ends_with("aaaaaaaa-001"));
        assert!(b.entry_id.ends_with("bbbbbbbb-001"));
    }

    #[test]
    fn entry_without_trace_omits_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let mut e = entry("no trace", None);
        manager.write_entry(&mut e).unwrap();
        assert_eq!(e.entry_id, "CL-20260731-170613-001");
    }

    #[test]
    fn written_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let mut e = entry("Round Trip!", Some("cafecafe-0000-0000-0000-000000000000"));
        let path = manager.write_entry(&mut e).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().contains("round-trip"));

        let loaded: CaptainLogEntry =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.entry_id, e.entry_id);
        assert_eq!(loaded.entry_type, EntryType::Reflection);
    }

    #[test]
    fn sanitize_title_cases() {
        assert_eq!(sanitize_title("Task: What is 2+2?"), "task-what-is-2-2");
        assert_eq!(sanitize_title("---"), "");
        assert!(sanitize_title(&"x".repeat(200)).len() <= 50);
    }
}
