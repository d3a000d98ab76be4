//! The background scheduler: a monitoring loop that evaluates mode
//! transitions and triggers idle-time consolidation, and a lifecycle loop
//! for disk checks, archives, and purges.
//!
//! Every loop swallows and logs its own failures, so the scheduler can
//! never crash the process, and observes `stop()` within one tick.

pub mod lifecycle;

pub use lifecycle::DataLifecycleManager;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use parking_lot::Mutex;
use serde_json::json;

use helm_domain::config::SchedulerSettings;
use helm_governance::ModeManager;
use helm_memory::Consolidator;
use helm_sensors::{SensorHub, CPU_LOAD, DISK_USED, MEM_USED};
use helm_telemetry::{events, EventLogger};

const LIFECYCLE_TICK: Duration = Duration::from_secs(60);
const DISK_CHECK_INTERVAL_SECONDS: i64 = 3600;
const ARCHIVE_HOUR_UTC: u32 = 2;
const PURGE_WEEKDAY: chrono::Weekday = chrono::Weekday::Sun;
const PURGE_HOUR_UTC: u32 = 3;

struct SchedulerState {
    last_request: Option<DateTime<Utc>>,
    last_consolidation: Option<DateTime<Utc>>,
    last_disk_check: Option<DateTime<Utc>>,
    last_archive_date: Option<NaiveDate>,
    last_purge_week: Option<(i32, u32)>,
}

pub struct Scheduler {
    settings: SchedulerSettings,
    lifecycle_enabled: bool,
    hub: Arc<SensorHub>,
    modes: Arc<ModeManager>,
    consolidator: Arc<Consolidator>,
    lifecycle: Arc<DataLifecycleManager>,
    logger: EventLogger,
    running: AtomicBool,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        lifecycle_enabled: bool,
        hub: Arc<SensorHub>,
        modes: Arc<ModeManager>,
        consolidator: Arc<Consolidator>,
        lifecycle: Arc<DataLifecycleManager>,
        logger: EventLogger,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            lifecycle_enabled,
            hub,
            modes,
            consolidator,
            lifecycle,
            logger,
            running: AtomicBool::new(false),
            state: Mutex::new(SchedulerState {
                last_request: None,
                last_consolidation: None,
                last_disk_check: None,
                last_archive_date: None,
                last_purge_week: None,
            }),
        })
    }

    /// Spawn both loops. Idempotent: a second call is a logged no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("scheduler already running");
            return;
        }
        self.logger.info("scheduler_started", "scheduler", None, json!({}));

        let monitor = self.clone();
        tokio::spawn(async move {
            let interval = Duration::from_secs(monitor.settings.check_interval_seconds);
            while monitor.running.load(Ordering::SeqCst) {
                tokio::time::sleep(interval).await;
                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
                monitor.monitoring_tick().await;
            }
        });

        let lifecycle = self.clone();
        tokio::spawn(async move {
            while lifecycle.running.load(Ordering::SeqCst) {
                tokio::time::sleep(LIFECYCLE_TICK).await;
                if !lifecycle.running.load(Ordering::SeqCst) {
                    break;
                }
                lifecycle.lifecycle_tick(Utc::now()).await;
            }
        });
    }

    /// Cooperative stop; loops exit within one tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.logger.info("scheduler_stopped", "scheduler", None, json!({}));
    }

    /// Non-blocking note that a request just finished.
    pub fn record_request(&self) {
        self.state.lock().last_request = Some(Utc::now());
    }

    // ── Monitoring loop ────────────────────────────────────────────

    async fn monitoring_tick(&self) {
        let metrics = self.hub.poll_system_metrics();

        // Mode transitions are evaluated on every tick regardless of the
        // consolidation gate.
        self.modes.evaluate_transitions(&metrics);

        if !self.settings.second_brain_enabled {
            return;
        }
        if self.should_consolidate_at(Utc::now(), &metrics) {
            self.logger.info(
                events::CONSOLIDATION_TRIGGERED,
                "scheduler",
                None,
                json!({}),
            );
            match self
                .consolidator
                .consolidate_recent(
                    self.settings.consolidation_window_days,
                    self.settings.consolidation_capture_limit,
                )
                .await
            {
                Ok(report) => {
                    self.state.lock().last_consolidation = Some(Utc::now());
                    tracing::info!(
                        scanned = report.captures_scanned,
                        upserted = report.conversations_upserted,
                        "consolidation completed"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "consolidation failed");
                }
            }
        }
    }

    /// The consolidation predicate:
    /// 1. not within `min_consolidation_interval` of the last run,
    /// 2. idle for `idle_time` since the last request (no request ever
    ///    recorded counts as idle),
    /// 3. CPU and memory below their thresholds.
    fn should_consolidate_at(
        &self,
        now: DateTime<Utc>,
        metrics: &helm_domain::SensorSnapshot,
    ) -> bool {
        let state = self.state.lock();

        if let Some(last) = state.last_consolidation {
            let since = (now - last).num_seconds();
            if since < self.settings.min_consolidation_interval_seconds as i64 {
                return false;
            }
        }

        if let Some(last_request) = state.last_request {
            let idle = (now - last_request).num_seconds();
            if idle < self.settings.idle_time_seconds as i64 {
                return false;
            }
        }
        drop(state);

        let cpu = metrics.get(CPU_LOAD).copied().unwrap_or(0.0);
        if cpu >= self.settings.cpu_threshold {
            tracing::debug!(cpu, threshold = self.settings.cpu_threshold, "consolidation skipped, cpu high");
            return false;
        }
        let memory = metrics.get(MEM_USED).copied().unwrap_or(0.0);
        if memory >= self.settings.memory_threshold {
            tracing::debug!(memory, threshold = self.settings.memory_threshold, "consolidation skipped, memory high");
            return false;
        }

        true
    }

    // ── Lifecycle loop ─────────────────────────────────────────────

    /// One lifecycle evaluation at `now`. Each task is idempotent per
    /// window via its tracked last-run marker.
    async fn lifecycle_tick(&self, now: DateTime<Utc>) {
        if !self.lifecycle_enabled {
            return;
        }

        // Hourly disk check.
        let disk_due = {
            let state = self.state.lock();
            state
                .last_disk_check
                .map(|last| (now - last).num_seconds() >= DISK_CHECK_INTERVAL_SECONDS)
                .unwrap_or(true)
        };
        if disk_due {
            let used = self.hub.poll_base().get(DISK_USED).copied();
            self.lifecycle.check_disk_usage(used);
            self.state.lock().last_disk_check = Some(now);
        }

        // Daily archive at 02:00 UTC.
        let today = now.date_naive();
        let archive_due = now.hour() == ARCHIVE_HOUR_UTC && {
            let state = self.state.lock();
            state.last_archive_date != Some(today)
        };
        if archive_due {
            for data_type in DataLifecycleManager::data_types() {
                if let Err(e) = self.lifecycle.archive_old_data(data_type).await {
                    tracing::error!(data_type, error = %e, "archive task failed");
                }
            }
            self.state.lock().last_archive_date = Some(today);
        }

        // Weekly purge on Sunday 03:00 UTC, plus index retention cleanup.
        let week = now.iso_week();
        let week_key = (week.year(), week.week());
        let purge_due = now.weekday() == PURGE_WEEKDAY && now.hour() == PURGE_HOUR_UTC && {
            let state = self.state.lock();
            state.last_purge_week != Some(week_key)
        };
        if purge_due {
            for data_type in DataLifecycleManager::data_types() {
                if let Err(e) = self.lifecycle.purge_expired_data(data_type).await {
                    tracing::error!(data_type, error = %e, "purge task failed");
                }
            }
            if let Err(e) = self.lifecycle.cleanup_indices().await {
                tracing::error!(error = %e, "index cleanup failed");
            }
            self.state.lock().last_purge_week = Some(week_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_domain::config::{LifecycleSettings, TelemetrySettings};
    use helm_domain::{GovernanceConfig, SensorSnapshot};
    use helm_memory::InMemoryGraph;
    use helm_sensors::probe::BaseProbe;

    struct FixedProbe {
        cpu: f64,
        mem: f64,
    }

    impl BaseProbe for FixedProbe {
        fn poll(&self) -> SensorSnapshot {
            SensorSnapshot::from([
                (CPU_LOAD.to_string(), self.cpu),
                (MEM_USED.to_string(), self.mem),
                (DISK_USED.to_string(), 40.0),
            ])
        }

        fn poll_detailed(&self) -> SensorSnapshot {
            self.poll()
        }
    }

    struct Fixture {
        scheduler: Arc<Scheduler>,
        _dir: tempfile::TempDir,
    }

    fn fixture(cpu: f64, mem: f64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path().join("logs"), &TelemetrySettings::default()).unwrap();
        let hub = SensorHub::with_ttl(
            Box::new(FixedProbe { cpu, mem }),
            None,
            Duration::from_millis(1),
        )
        .into_shared();
        let modes = Arc::new(ModeManager::new(
            Arc::new(GovernanceConfig::default()),
            logger.clone(),
        ));
        let consolidator = Arc::new(Consolidator::new(
            Arc::new(InMemoryGraph::new()),
            dir.path().join("captures"),
            logger.clone(),
        ));
        let lifecycle = Arc::new(DataLifecycleManager::new(
            dir.path().to_path_buf(),
            LifecycleSettings::default(),
            None,
            vec![],
            logger.clone(),
        ));
        let scheduler = Scheduler::new(
            SchedulerSettings::default(),
            true,
            hub,
            modes,
            consolidator,
            lifecycle,
            logger,
        );
        Fixture { scheduler, _dir: dir }
    }

    fn metrics(cpu: f64, mem: f64) -> SensorSnapshot {
        SensorSnapshot::from([(CPU_LOAD.to_string(), cpu), (MEM_USED.to_string(), mem)])
    }

    #[tokio::test]
    async fn consolidates_when_no_request_ever_recorded() {
        let fx = fixture(10.0, 20.0);
        assert!(fx
            .scheduler
            .should_consolidate_at(Utc::now(), &metrics(10.0, 20.0)));
    }

    #[tokio::test]
    async fn recent_request_blocks_consolidation() {
        let fx = fixture(10.0, 20.0);
        fx.scheduler.record_request();
        assert!(!fx
            .scheduler
            .should_consolidate_at(Utc::now(), &metrics(10.0, 20.0)));

        // Past the idle window, it unblocks.
        let later = Utc::now() + chrono::Duration::seconds(301);
        assert!(fx.scheduler.should_consolidate_at(later, &metrics(10.0, 20.0)));
    }

    #[tokio::test]
    async fn min_interval_blocks_back_to_back_runs() {
        let fx = fixture(10.0, 20.0);
        fx.scheduler.state.lock().last_consolidation = Some(Utc::now());
        assert!(!fx
            .scheduler
            .should_consolidate_at(Utc::now(), &metrics(10.0, 20.0)));

        let later = Utc::now() + chrono::Duration::seconds(3601);
        assert!(fx.scheduler.should_consolidate_at(later, &metrics(10.0, 20.0)));
    }

    #[tokio::test]
    async fn busy_sensors_block_consolidation() {
        let fx = fixture(90.0, 20.0);
        assert!(!fx
            .scheduler
            .should_consolidate_at(Utc::now(), &metrics(90.0, 20.0)));
        assert!(!fx
            .scheduler
            .should_consolidate_at(Utc::now(), &metrics(10.0, 80.0)));
    }

    #[tokio::test]
    async fn archive_runs_once_per_day_window() {
        let fx = fixture(10.0, 20.0);
        let two_am: DateTime<Utc> = "2026-07-29T02:15:00Z".parse().unwrap();

        fx.scheduler.lifecycle_tick(two_am).await;
        assert_eq!(
            fx.scheduler.state.lock().last_archive_date,
            Some(two_am.date_naive())
        );

        // Same window again: the marker stays, no double-run crash.
        fx.scheduler.lifecycle_tick(two_am).await;
        // Next day's window runs again.
        let next_day: DateTime<Utc> = "2026-07-30T02:01:00Z".parse().unwrap();
        fx.scheduler.lifecycle_tick(next_day).await;
        assert_eq!(
            fx.scheduler.state.lock().last_archive_date,
            Some(next_day.date_naive())
        );
    }

    #[tokio::test]
    async fn archive_does_not_run_outside_its_hour() {
        let fx = fixture(10.0, 20.0);
        let noon: DateTime<Utc> = "2026-07-29T12:00:00Z".parse().unwrap();
        fx.scheduler.lifecycle_tick(noon).await;
        assert_eq!(fx.scheduler.state.lock().last_archive_date, None);
    }

    #[tokio::test]
    async fn purge_runs_only_sunday_three_am_once_per_week() {
        let fx = fixture(10.0, 20.0);
        // 2026-08-02 is a Sunday.
        let sunday: DateTime<Utc> = "2026-08-02T03:30:00Z".parse().unwrap();
        fx.scheduler.lifecycle_tick(sunday).await;
        let week = sunday.iso_week();
        assert_eq!(
            fx.scheduler.state.lock().last_purge_week,
            Some((week.year(), week.week()))
        );

        // A Wednesday at 03:00 does nothing.
        let fx2 = fixture(10.0, 20.0);
        let wednesday: DateTime<Utc> = "2026-07-29T03:00:00Z".parse().unwrap();
        fx2.scheduler.lifecycle_tick(wednesday).await;
        assert_eq!(fx2.scheduler.state.lock().last_purge_week, None);
    }

    #[tokio::test]
    async fn disk_check_is_hourly() {
        let fx = fixture(10.0, 20.0);
        let noon: DateTime<Utc> = "2026-07-29T12:00:00Z".parse().unwrap();
        fx.scheduler.lifecycle_tick(noon).await;
        assert_eq!(fx.scheduler.state.lock().last_disk_check, Some(noon));

        // 30 minutes later: not due, the marker stays at noon.
        let half_past: DateTime<Utc> = "2026-07-29T12:30:00Z".parse().unwrap();
        fx.scheduler.lifecycle_tick(half_past).await;
        assert_eq!(fx.scheduler.state.lock().last_disk_check, Some(noon));

        // An hour later: due again.
        let one_pm: DateTime<Utc> = "2026-07-29T13:00:00Z".parse().unwrap();
        fx.scheduler.lifecycle_tick(one_pm).await;
        assert_eq!(fx.scheduler.state.lock().last_disk_check, Some(one_pm));
    }

    #[tokio::test]
    async fn stop_is_observed() {
        let fx = fixture(10.0, 20.0);
        fx.scheduler.start();
        assert!(fx.scheduler.running.load(Ordering::SeqCst));
        fx.scheduler.stop();
        assert!(!fx.scheduler.running.load(Ordering::SeqCst));
    }
}
