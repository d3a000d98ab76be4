use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use helm_runtime::bootstrap;
use helm_runtime::cli::{backfill, chat, telemetry, Cli, Command, TelemetryCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Arc::new(bootstrap::load_settings()?);

    match cli.command {
        Command::Chat { message, session } => chat::run(settings, message, session).await,
        Command::Telemetry { command } => match command {
            TelemetryCommand::Query {
                event,
                component,
                window,
                limit,
                json,
            } => telemetry::query(&settings, event, component, window, limit, json),
            TelemetryCommand::Trace { trace_id } => telemetry::trace(&settings, &trace_id),
            TelemetryCommand::Report { window, json } => {
                telemetry::report(&settings, &window, json).await
            }
        },
        Command::Backfill => backfill::run(settings).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}
