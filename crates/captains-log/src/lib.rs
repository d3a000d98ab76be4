//! The captain's log: post-request reflections with deterministic metric
//! extraction, per-request task captures, and the index backfill worker.

pub mod backfill;
pub mod capture;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod reflection;

pub use backfill::{BackfillResult, BackfillWorker};
pub use capture::{TaskCapture, CAPTURES_INDEX_PREFIX, REFLECTIONS_INDEX_PREFIX};
pub use manager::LogbookManager;
pub use metrics::{extract_metrics_from_summary, Metric};
pub use models::{CaptainLogEntry, EntryStatus, EntryType, ProposedChange, TelemetryRef};
pub use reflection::ReflectionPipeline;
