//! Capture consolidation: fold recent task captures into the memory graph.
//!
//! Reads capture files straight from disk rather than querying the search
//! index, so consolidation keeps working while the index is offline. Each
//! capture becomes a conversation upsert; repeated runs over the same files
//! are harmless.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use helm_domain::Result;
use helm_telemetry::{events, EventLogger};

use crate::extract_entities;
use crate::graph::MemoryGraph;
use crate::types::ConversationNode;

const MAX_ENTITIES_PER_CAPTURE: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    pub captures_scanned: usize,
    pub conversations_upserted: usize,
    pub failures: usize,
}

pub struct Consolidator {
    graph: Arc<dyn MemoryGraph>,
    captures_dir: PathBuf,
    logger: EventLogger,
}

impl Consolidator {
    pub fn new(graph: Arc<dyn MemoryGraph>, captures_dir: PathBuf, logger: EventLogger) -> Self {
        Self {
            graph,
            captures_dir,
            logger,
        }
    }

    /// Consolidate captures from the last `days` days, at most `limit`,
    /// newest directories first. Individual file failures are counted, not
    /// raised.
    pub async fn consolidate_recent(&self, days: i64, limit: usize) -> Result<ConsolidationReport> {
        let mut report = ConsolidationReport::default();
        let cutoff = Utc::now() - Duration::days(days);

        let mut date_dirs: Vec<PathBuf> = match std::fs::read_dir(&self.captures_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_dir())
                .collect(),
            Err(_) => Vec::new(),
        };
        date_dirs.sort();
        date_dirs.reverse();

        'outer: for date_dir in date_dirs {
            let mut files: Vec<PathBuf> = match std::fs::read_dir(&date_dir) {
                Ok(entries) => entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                    .collect(),
                Err(_) => continue,
            };
            files.sort();

            for file in files {
                if report.captures_scanned >= limit {
                    break 'outer;
                }
                report.captures_scanned += 1;
                match self.consolidate_file(&file, cutoff).await {
                    Ok(true) => report.conversations_upserted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failures += 1;
                        tracing::warn!(path = %file.display(), error = %e, "capture consolidation failed");
                    }
                }
            }
        }

        self.logger.info(
            events::CONSOLIDATION_COMPLETED,
            "consolidator",
            None,
            json!({
                "captures_scanned": report.captures_scanned,
                "conversations_upserted": report.conversations_upserted,
                "failures": report.failures,
            }),
        );
        Ok(report)
    }

    async fn consolidate_file(&self, path: &PathBuf, cutoff: DateTime<Utc>) -> Result<bool> {
        let raw = std::fs::read_to_string(path)?;
        let capture: Value = serde_json::from_str(&raw)?;

        let timestamp = capture
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        if timestamp < cutoff {
            return Ok(false);
        }

        let trace_id = capture
            .get("trace_id")
            .and_then(Value::as_str)
            .ok_or_else(|| helm_domain::Error::Memory("capture missing trace_id".into()))?
            .to_string();
        let user_message = capture
            .get("user_message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let reply = capture
            .get("reply")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut key_entities = capture
            .get("key_entities")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if key_entities.is_empty() {
            key_entities = extract_entities(&user_message, MAX_ENTITIES_PER_CAPTURE);
        }

        self.graph
            .create_conversation(ConversationNode {
                conversation_id: trace_id,
                timestamp,
                user_message,
                assistant_response: reply,
                summary: None,
                key_entities,
                properties: Default::default(),
            })
            .await?;
        Ok(true)
    }
}
