//! `helmsman backfill`: one replay pass of local captures/reflections into
//! the search index.

use std::sync::Arc;

use helm_captains_log::BackfillWorker;
use helm_domain::config::Settings;
use helm_telemetry::{EventLogger, HttpSearchIndex, IndexBackend};

pub async fn run(settings: Arc<Settings>) -> anyhow::Result<()> {
    let Some(url) = &settings.telemetry.index_url else {
        anyhow::bail!("no search index configured (set AGENT_INDEX_URL)");
    };

    let logger = EventLogger::new(settings.log_dir(), &settings.telemetry)?;
    let index: Arc<dyn IndexBackend> = Arc::new(HttpSearchIndex::new(url.clone())?);
    let worker = BackfillWorker::new(index, settings.captains_log_dir(), logger);

    let result = worker.run().await;
    println!(
        "backfill: scanned {} files, indexed {}, skipped {}, failed {} ({} ms)",
        result.files_scanned,
        result.indexed_count,
        result.skipped_count,
        result.failed_count,
        result.elapsed_ms,
    );

    if result.failed_count > 0 {
        anyhow::bail!("{} files failed to index", result.failed_count);
    }
    Ok(())
}
