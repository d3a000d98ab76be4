pub mod backfill;
pub mod chat;
pub mod telemetry;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "helmsman", about = "Local personal AI agent runtime", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Chat with the agent: one-shot with a message, interactive without.
    Chat {
        /// Message to send; omit for an interactive session.
        message: Option<String>,
        /// Session id to continue; a fresh one is minted when omitted.
        #[arg(long)]
        session: Option<String>,
    },
    /// Query the local telemetry log.
    Telemetry {
        #[command(subcommand)]
        command: TelemetryCommand,
    },
    /// Replay locally persisted captures/reflections into the search index.
    Backfill,
}

#[derive(Subcommand)]
pub enum TelemetryCommand {
    /// Filter events by name, component, and time window.
    Query {
        #[arg(long)]
        event: Option<String>,
        #[arg(long)]
        component: Option<String>,
        /// Trailing window, e.g. 45s, 30m, 1h, 2d.
        #[arg(long)]
        window: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Emit raw JSON lines instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Reconstruct one request's timeline.
    Trace {
        trace_id: String,
    },
    /// Aggregate report from the search index: model latency percentiles,
    /// tool failures, and daily event volume.
    Report {
        /// Trailing window, e.g. 24h, 7d.
        #[arg(long, default_value = "24h")]
        window: String,
        /// Emit the raw aggregation JSON instead of tables.
        #[arg(long)]
        json: bool,
    },
}
