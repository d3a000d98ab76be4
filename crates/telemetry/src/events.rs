//! The structured event vocabulary shared by every subsystem.
//!
//! Event names are plain `snake_case` strings so they survive serialization
//! and log queries unchanged; components reference these constants instead
//! of spelling names inline.

// ── Request lifecycle ───────────────────────────────────────────────
pub const REQUEST_RECEIVED: &str = "request_received";
pub const TASK_STARTED: &str = "task_started";
pub const TASK_COMPLETED: &str = "task_completed";
pub const TASK_FAILED: &str = "task_failed";
pub const STATE_TRANSITION: &str = "state_transition";
pub const REPLY_READY: &str = "reply_ready";

// ── Routing ─────────────────────────────────────────────────────────
pub const ROUTING_DECISION: &str = "routing_decision";
pub const ROUTING_HANDLED: &str = "routing_handled";
pub const ROUTING_DELEGATION: &str = "routing_delegation";
pub const ROUTING_PARSE_ERROR: &str = "routing_parse_error";

// ── Model calls ─────────────────────────────────────────────────────
pub const MODEL_CALL_STARTED: &str = "model_call_started";
pub const MODEL_CALL_COMPLETED: &str = "model_call_completed";
pub const MODEL_CALL_ERROR: &str = "model_call_error";

// ── Tool calls ──────────────────────────────────────────────────────
pub const TOOL_CALL_STARTED: &str = "tool_call_started";
pub const TOOL_CALL_COMPLETED: &str = "tool_call_completed";
pub const TOOL_CALL_FAILED: &str = "tool_call_failed";
pub const POLICY_VIOLATION: &str = "policy_violation";

// ── Governance / sensors ────────────────────────────────────────────
pub const MODE_TRANSITION: &str = "mode_transition";
pub const SENSOR_POLL: &str = "sensor_poll";
pub const SYSTEM_METRICS_SNAPSHOT: &str = "system_metrics_snapshot";

// ── Scheduler / lifecycle ───────────────────────────────────────────
pub const CONSOLIDATION_TRIGGERED: &str = "consolidation_triggered";
pub const CONSOLIDATION_COMPLETED: &str = "consolidation_completed";
pub const LIFECYCLE_DISK_CHECK: &str = "lifecycle_disk_check";
pub const LIFECYCLE_ARCHIVE: &str = "lifecycle_archive";
pub const LIFECYCLE_PURGE: &str = "lifecycle_purge";

// ── Captain's log ───────────────────────────────────────────────────
pub const CAPTAINS_LOG_ENTRY_CREATED: &str = "captains_log_entry_created";
pub const CAPTAINS_LOG_ENTRY_COMMITTED: &str = "captains_log_entry_committed";
pub const TASK_CAPTURE_WRITTEN: &str = "task_capture_written";
pub const BACKFILL_STARTED: &str = "captains_log_backfill_started";
pub const BACKFILL_COMPLETED: &str = "captains_log_backfill_completed";
pub const BACKFILL_FILE_FAILED: &str = "captains_log_backfill_file_failed";
pub const BACKFILL_CHECKPOINT_UPDATED: &str = "captains_log_backfill_checkpoint_updated";
