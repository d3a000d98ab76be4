//! Per-request background metrics monitor.
//!
//! The orchestrator starts one monitor per request; it samples the sensor
//! hub on an interval, tags every sample with the request's trace id, checks
//! the fixed alert/critical thresholds, and aggregates a summary on stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use helm_domain::{Error, Result, SensorSnapshot, TraceContext};
use helm_telemetry::{events, EventLogger};

use crate::cache::SensorHub;
use crate::{CPU_LOAD, GPU_LOAD, MEM_USED};

// Fixed control-loop thresholds (percent).
const CPU_ALERT: f64 = 85.0;
const CPU_CRITICAL: f64 = 95.0;
const MEM_ALERT: f64 = 90.0;
const MEM_CRITICAL: f64 = 95.0;

/// Aggregated statistics over one monitored request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub duration_seconds: f64,
    pub samples_collected: usize,
    /// Distinct violation descriptions, in first-seen order.
    pub threshold_violations: Vec<String>,
    pub cpu_min: Option<f64>,
    pub cpu_max: Option<f64>,
    pub cpu_avg: Option<f64>,
    pub memory_min: Option<f64>,
    pub memory_max: Option<f64>,
    pub memory_avg: Option<f64>,
    pub gpu_min: Option<f64>,
    pub gpu_max: Option<f64>,
    pub gpu_avg: Option<f64>,
}

#[derive(Default)]
struct Collected {
    samples: Vec<SensorSnapshot>,
    violations: Vec<String>,
}

pub struct RequestMonitor {
    trace: TraceContext,
    interval: Duration,
    include_gpu: bool,
    hub: Arc<SensorHub>,
    logger: EventLogger,
    collected: Arc<Mutex<Collected>>,
    cancel: Option<CancellationToken>,
    handle: Option<tokio::task::JoinHandle<()>>,
    started_at: Option<Instant>,
}

impl RequestMonitor {
    pub fn new(
        trace: TraceContext,
        interval: Duration,
        include_gpu: bool,
        hub: Arc<SensorHub>,
        logger: EventLogger,
    ) -> Self {
        Self {
            trace,
            interval,
            include_gpu,
            hub,
            logger,
            collected: Arc::new(Mutex::new(Collected::default())),
            cancel: None,
            handle: None,
            started_at: None,
        }
    }

    /// Launch the background sampler. Starting twice is a hard error.
    pub fn start(&mut self) -> Result<()> {
        if self.cancel.is_some() {
            return Err(Error::Other(format!(
                "RequestMonitor already running for trace {}",
                self.trace.trace_id
            )));
        }

        let cancel = CancellationToken::new();
        self.started_at = Some(Instant::now());
        *self.collected.lock() = Collected::default();

        let token = cancel.clone();
        let hub = self.hub.clone();
        let logger = self.logger.clone();
        let trace = self.trace.clone();
        let collected = self.collected.clone();
        let interval = self.interval;
        let include_gpu = self.include_gpu;

        self.handle = Some(tokio::spawn(async move {
            loop {
                let mut metrics = hub.poll_system_metrics();
                if !include_gpu {
                    metrics.remove(GPU_LOAD);
                }

                logger.info(
                    events::SYSTEM_METRICS_SNAPSHOT,
                    "request_monitor",
                    Some(&trace),
                    json!({
                        "cpu_load": metrics.get(CPU_LOAD),
                        "memory_used": metrics.get(MEM_USED),
                        "gpu_load": metrics.get(GPU_LOAD),
                        "sampled_at": Utc::now().to_rfc3339(),
                    }),
                );

                let violations = check_thresholds(&metrics);
                {
                    let mut collected = collected.lock();
                    collected.samples.push(metrics);
                    if !violations.is_empty() {
                        logger.warn(
                            "metrics_threshold_violated",
                            "request_monitor",
                            Some(&trace),
                            json!({"violations": violations}),
                        );
                        collected.violations.extend(violations);
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }));

        self.cancel = Some(cancel);
        Ok(())
    }

    /// Cancel the sampler and compute the summary. Stopping before start is
    /// a hard error; stopping after the sampler died still returns whatever
    /// was collected.
    pub async fn stop(&mut self) -> Result<MonitorSummary> {
        let cancel = self.cancel.take().ok_or_else(|| {
            Error::Other(format!(
                "RequestMonitor not running for trace {}",
                self.trace.trace_id
            ))
        })?;
        cancel.cancel();

        if let Some(handle) = self.handle.take() {
            // A sampler that panicked already stopped recording; the
            // summary below still covers everything it managed to collect.
            let _ = handle.await;
        }

        let summary = self.compute_summary();
        self.logger.info(
            "request_monitor_stopped",
            "request_monitor",
            Some(&self.trace),
            json!({
                "duration_seconds": summary.duration_seconds,
                "samples_collected": summary.samples_collected,
                "violations": summary.threshold_violations.len(),
            }),
        );
        Ok(summary)
    }

    fn compute_summary(&self) -> MonitorSummary {
        let collected = self.collected.lock();
        let duration = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let mut summary = MonitorSummary {
            duration_seconds: round2(duration),
            samples_collected: collected.samples.len(),
            threshold_violations: dedup_preserving_order(&collected.violations),
            ..MonitorSummary::default()
        };

        let stats = |key: &str| -> Option<(f64, f64, f64)> {
            let values: Vec<f64> = collected
                .samples
                .iter()
                .filter_map(|s| s.get(key).copied())
                .collect();
            if values.is_empty() {
                return None;
            }
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let avg = values.iter().sum::<f64>() / values.len() as f64;
            Some((round1(min), round1(max), round1(avg)))
        };

        if let Some((min, max, avg)) = stats(CPU_LOAD) {
            summary.cpu_min = Some(min);
            summary.cpu_max = Some(max);
            summary.cpu_avg = Some(avg);
        }
        if let Some((min, max, avg)) = stats(MEM_USED) {
            summary.memory_min = Some(min);
            summary.memory_max = Some(max);
            summary.memory_avg = Some(avg);
        }
        if let Some((min, max, avg)) = stats(GPU_LOAD) {
            summary.gpu_min = Some(min);
            summary.gpu_max = Some(max);
            summary.gpu_avg = Some(avg);
        }

        summary
    }
}

fn check_thresholds(metrics: &SensorSnapshot) -> Vec<String> {
    let mut violations = Vec::new();

    if let Some(cpu) = metrics.get(CPU_LOAD) {
        if *cpu >= CPU_CRITICAL {
            violations.push(format!("CPU critically high: {cpu:.1}% (DEGRADED threshold)"));
        } else if *cpu >= CPU_ALERT {
            violations.push(format!("CPU high: {cpu:.1}% (ALERT threshold)"));
        }
    }

    if let Some(mem) = metrics.get(MEM_USED) {
        if *mem >= MEM_CRITICAL {
            violations.push(format!("Memory critically high: {mem:.1}% (DEGRADED threshold)"));
        } else if *mem >= MEM_ALERT {
            violations.push(format!("Memory high: {mem:.1}% (ALERT threshold)"));
        }
    }

    violations
}

fn dedup_preserving_order(violations: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    violations
        .iter()
        .filter(|v| seen.insert(v.as_str()))
        .cloned()
        .collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
