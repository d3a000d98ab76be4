//! Structured telemetry: the JSONL event log, the async search-index
//! forwarder, and the query API the CLI reads traces back through.

pub mod analytics;
pub mod events;
pub mod forwarder;
pub mod index;
pub mod logger;
pub mod query;

pub use forwarder::Forwarder;
pub use index::{daily_capture_index, daily_log_index, HttpSearchIndex, IndexBackend};
pub use logger::{EventLogger, EventRecord, Level};
pub use query::{parse_time_window, EventQuery, TelemetryReader};
