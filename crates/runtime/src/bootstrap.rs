//! AppState construction: initialize every subsystem in dependency order
//! (config → logger → governance → mode manager → registry → scheduler →
//! orchestrator) and return the fully wired runtime.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use helm_captains_log::{LogbookManager, ReflectionPipeline};
use helm_domain::config::{ConfigSeverity, Settings};
use helm_domain::GovernanceConfig;
use helm_governance::{load_governance, ModeManager};
use helm_llm::{CostTracker, LlmClient, Router, RoutingStrategy};
use helm_memory::{Consolidator, InMemoryGraph, MemoryGraph};
use helm_orchestrator::{Orchestrator, OrchestratorConfig};
use helm_scheduler::{DataLifecycleManager, Scheduler};
use helm_sensors::{SensorHub, SysinfoProbe};
use helm_telemetry::{
    EventLogger, Forwarder, HttpSearchIndex, IndexBackend, TelemetryReader,
};
use helm_tools::builtin::register_builtins;
use helm_tools::{ToolExecutionLayer, ToolRegistry};
use helm_captains_log::CAPTURES_INDEX_PREFIX;
use helm_captains_log::REFLECTIONS_INDEX_PREFIX;

pub struct AppState {
    pub settings: Arc<Settings>,
    pub logger: EventLogger,
    pub governance: Arc<GovernanceConfig>,
    pub modes: Arc<ModeManager>,
    pub registry: Arc<ToolRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<Scheduler>,
    pub index: Option<Arc<dyn IndexBackend>>,
    pub captains_dir: PathBuf,
}

impl AppState {
    pub fn telemetry_reader(&self) -> TelemetryReader {
        TelemetryReader::new(self.settings.log_dir())
    }
}

/// Load settings (defaults + `AGENT_*` overrides) and validate them.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    settings.apply_env_overrides();

    let issues = settings.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }
    Ok(settings)
}

/// Initialize every subsystem and return a fully wired [`AppState`].
pub async fn build_app_state(settings: Arc<Settings>) -> anyhow::Result<AppState> {
    // ── Event logger ─────────────────────────────────────────────────
    let logger = EventLogger::new(settings.log_dir(), &settings.telemetry)
        .context("initializing event logger")?;
    tracing::info!(dir = %settings.log_dir().display(), "event logger ready");

    // ── Search index + forwarder ─────────────────────────────────────
    let index: Option<Arc<dyn IndexBackend>> = match &settings.telemetry.index_url {
        Some(url) => {
            let backend: Arc<dyn IndexBackend> =
                Arc::new(HttpSearchIndex::new(url.clone()).context("building index client")?);
            let forwarder = Forwarder::new(backend.clone(), &settings.telemetry);
            logger.attach_forwarder(forwarder.spawn());
            tracing::info!(url, "index forwarder ready");
            Some(backend)
        }
        None => {
            tracing::info!("no search index configured; events stay local");
            None
        }
    };

    // ── Governance ───────────────────────────────────────────────────
    let loaded = load_governance(&settings.governance_dir)
        .context("loading governance configuration")?;
    let governance = Arc::new(loaded.config);
    let catalog = Arc::new(loaded.models);
    tracing::info!(
        dir = %settings.governance_dir.display(),
        tools = governance.tools.len(),
        "governance ready"
    );

    // ── Mode manager ─────────────────────────────────────────────────
    let modes = Arc::new(ModeManager::new(governance.clone(), logger.clone()));
    tracing::info!(mode = %modes.current_mode(), "mode manager ready");

    // ── Sensors ──────────────────────────────────────────────────────
    let hub = SensorHub::new(Box::new(SysinfoProbe::new()), None)
        .with_logger(logger.clone())
        .into_shared();
    tracing::info!("sensor hub ready");

    // ── Tool registry + execution layer ──────────────────────────────
    let registry = Arc::new(ToolRegistry::new());
    register_builtins(&registry, hub.clone());
    let tools = Arc::new(ToolExecutionLayer::new(
        registry.clone(),
        governance.clone(),
        modes.clone(),
        logger.clone(),
    ));
    tracing::info!(tools = registry.len(), "tool registry ready");

    // ── Cost tracker + LLM client ────────────────────────────────────
    let cost = Arc::new(
        CostTracker::open(&settings.cost_db_path()).context("opening cost store")?,
    );
    let llm = Arc::new(
        LlmClient::new(settings.llm.clone(), catalog.clone(), logger.clone())
            .with_cost_tracker(cost),
    );
    tracing::info!(base_url = %settings.llm.base_url, "LLM client ready");

    // ── Router ───────────────────────────────────────────────────────
    let router = Arc::new(Router::new(
        RoutingStrategy::default(),
        llm.clone(),
        logger.clone(),
    ));

    // ── Memory graph + consolidator ──────────────────────────────────
    let memory: Arc<dyn MemoryGraph> = Arc::new(InMemoryGraph::new());
    let consolidator = Arc::new(Consolidator::new(
        memory.clone(),
        settings.captures_dir(),
        logger.clone(),
    ));
    tracing::info!("memory graph ready (in-process)");

    // ── Captain's log ────────────────────────────────────────────────
    let captains_dir = settings.captains_log_dir();
    let logbook = Arc::new(
        LogbookManager::new(&captains_dir, logger.clone()).context("initializing logbook")?,
    );
    let reflection = Arc::new(ReflectionPipeline::new(
        llm.clone(),
        TelemetryReader::new(settings.log_dir()),
        logbook,
        logger.clone(),
    ));

    // ── Scheduler ────────────────────────────────────────────────────
    let lifecycle = Arc::new(DataLifecycleManager::new(
        settings.telemetry_root(),
        settings.lifecycle.clone(),
        index.clone(),
        vec![
            settings.telemetry.log_index_prefix.clone(),
            CAPTURES_INDEX_PREFIX.into(),
            REFLECTIONS_INDEX_PREFIX.into(),
        ],
        logger.clone(),
    ));
    let scheduler = Scheduler::new(
        settings.scheduler.clone(),
        settings.lifecycle.enabled,
        hub.clone(),
        modes.clone(),
        consolidator,
        lifecycle,
        logger.clone(),
    );

    // ── Orchestrator ─────────────────────────────────────────────────
    let orchestrator_config = OrchestratorConfig {
        no_think_suffix: settings.llm.no_think_suffix.clone(),
        monitor_interval: std::time::Duration::from_secs_f64(
            settings.monitoring.interval_seconds,
        ),
        include_gpu: settings.monitoring.include_gpu,
        ..OrchestratorConfig::default()
    };
    let mut orchestrator = Orchestrator::new(
        llm,
        router,
        tools,
        registry.clone(),
        governance.clone(),
        modes.clone(),
        hub,
        logger.clone(),
        orchestrator_config,
    )
    .with_memory(memory)
    .with_reflection(reflection)
    .with_captures_dir(settings.captures_dir());
    {
        let scheduler = scheduler.clone();
        orchestrator.add_completion_hook(Arc::new(move || scheduler.record_request()));
    }
    tracing::info!("orchestrator ready");

    Ok(AppState {
        settings,
        logger,
        governance,
        modes,
        registry,
        orchestrator: Arc::new(orchestrator),
        scheduler,
        index,
        captains_dir,
    })
}
