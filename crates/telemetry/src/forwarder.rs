//! Async forwarder copying qualifying events from the logger to the search
//! index.
//!
//! Failure handling is deliberately one-sided: the local JSONL sink is the
//! source of truth, so the forwarder may drop work whenever the index
//! misbehaves. A circuit breaker pauses forwarding after consecutive
//! failures, and a semaphore bounds in-flight writes so a slow index cannot
//! exhaust its own connection pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use helm_domain::config::TelemetrySettings;

use crate::index::{daily_log_index, IndexBackend};
use crate::logger::{EventRecord, Level};

/// Components whose events must never be forwarded: forwarding them would
/// recurse through the forwarder itself.
const SUPPRESSED_COMPONENTS: [&str; 2] = ["forwarder", "index"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

pub(crate) struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub(crate) fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                open_until: None,
            }),
            failure_threshold,
            cooldown,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        let mut state = self.state.lock();
        match state.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                // Cooldown elapsed; close and allow another attempt.
                state.open_until = None;
                false
            }
            None => false,
        }
    }

    pub(crate) fn record_failure(&self) {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            state.consecutive_failures = 0;
            tracing::warn!(
                cooldown_seconds = self.cooldown.as_secs(),
                "index forwarder circuit opened"
            );
        }
    }

    pub(crate) fn record_success(&self) {
        self.state.lock().consecutive_failures = 0;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Forwarder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Forwarder {
    backend: Arc<dyn IndexBackend>,
    breaker: Arc<CircuitBreaker>,
    permits: Arc<Semaphore>,
    index_prefix: String,
}

impl Forwarder {
    pub fn new(backend: Arc<dyn IndexBackend>, settings: &TelemetrySettings) -> Self {
        Self {
            backend,
            breaker: Arc::new(CircuitBreaker::new(
                settings.breaker_failure_threshold,
                Duration::from_secs(settings.breaker_cooldown_seconds),
            )),
            permits: Arc::new(Semaphore::new(settings.forwarder_concurrency)),
            index_prefix: settings.log_index_prefix.clone(),
        }
    }

    /// Spawn the drain task and return the sender to attach to the logger.
    /// The task ends when the logger (and every clone) is dropped.
    pub fn spawn(self) -> mpsc::Sender<EventRecord> {
        let (tx, mut rx) = mpsc::channel::<EventRecord>(1024);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                self.handle(record).await;
            }
        });
        tx
    }

    async fn handle(&self, record: EventRecord) {
        if !Self::qualifies(&record) {
            return;
        }
        if self.breaker.is_open() {
            return;
        }

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let backend = self.backend.clone();
        let breaker = self.breaker.clone();
        let index = daily_log_index(&self.index_prefix, record.timestamp.date_naive());
        let document = record.to_value();

        tokio::spawn(async move {
            let _permit = permit;
            match backend.index_document(&index, &document, None).await {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
        });
    }

    /// Only INFO-and-above application events are forwarded, and never the
    /// forwarder's own telemetry.
    fn qualifies(record: &EventRecord) -> bool {
        record.level >= Level::Info && !SUPPRESSED_COMPONENTS.contains(&record.component.as_str())
    }
}
