//! The sensor hub: merged base + platform polling behind a short-TTL cache.
//!
//! The cache is transparent to consumers: the request monitor, tools, and
//! the scheduler all read through the same hub without coupling to each
//! other, and it keeps the expensive platform probe from being hit more than
//! once per TTL window. Readers always get a defensive copy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;

use helm_domain::SensorSnapshot;
use helm_telemetry::{events, EventLogger};

use crate::probe::{BaseProbe, PlatformProbe};
use crate::{CPU_LOAD, GPU_LOAD, MEM_USED};

/// Default TTL: roughly twice the request monitor's polling period, so a
/// monitored request touches hardware at most every other sample.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

const SYSTEM_KEY: &str = "system";
const SNAPSHOT_KEY: &str = "snapshot";

struct CacheEntry {
    at: Instant,
    data: SensorSnapshot,
}

pub struct SensorHub {
    base: Box<dyn BaseProbe>,
    platform: Option<Box<dyn PlatformProbe>>,
    cache: Mutex<HashMap<&'static str, CacheEntry>>,
    ttl: Duration,
    logger: Option<EventLogger>,
}

impl SensorHub {
    pub fn new(base: Box<dyn BaseProbe>, platform: Option<Box<dyn PlatformProbe>>) -> Self {
        Self::with_ttl(base, platform, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(
        base: Box<dyn BaseProbe>,
        platform: Option<Box<dyn PlatformProbe>>,
        ttl: Duration,
    ) -> Self {
        Self {
            base,
            platform,
            cache: Mutex::new(HashMap::new()),
            ttl,
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: EventLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Base metrics only; never touches the platform probe.
    pub fn poll_base(&self) -> SensorSnapshot {
        self.base.poll()
    }

    /// Merged base + platform metrics, cached under the `"system"` key.
    pub fn poll_system_metrics(&self) -> SensorSnapshot {
        if let Some(hit) = self.cached(SYSTEM_KEY) {
            return hit;
        }
        let mut metrics = self.base.poll();
        self.merge_platform(&mut metrics);
        self.store(SYSTEM_KEY, &metrics);
        self.log_poll(&metrics);
        metrics
    }

    /// Detailed snapshot (extra base fields), cached under `"snapshot"`.
    /// Emits a `system_metrics_snapshot` event on both hits and misses;
    /// consumers of the detail path expect one per read.
    pub fn metrics_snapshot(&self) -> SensorSnapshot {
        if let Some(hit) = self.cached(SNAPSHOT_KEY) {
            self.log_snapshot(&hit, true);
            return hit;
        }
        let mut metrics = self.base.poll_detailed();
        self.merge_platform(&mut metrics);
        self.store(SNAPSHOT_KEY, &metrics);
        self.log_snapshot(&metrics, false);
        metrics
    }

    // ── Internals ──────────────────────────────────────────────────

    fn merge_platform(&self, metrics: &mut SensorSnapshot) {
        let Some(platform) = &self.platform else {
            return;
        };
        match platform.poll() {
            Ok(extra) => metrics.extend(extra),
            Err(e) => {
                // Platform failures drop their fields; base metrics stand.
                tracing::debug!(probe = platform.name(), error = %e, "platform probe failed");
            }
        }
    }

    fn cached(&self, key: &'static str) -> Option<SensorSnapshot> {
        let cache = self.cache.lock();
        let entry = cache.get(key)?;
        if entry.at.elapsed() < self.ttl {
            Some(entry.data.clone())
        } else {
            None
        }
    }

    fn store(&self, key: &'static str, data: &SensorSnapshot) {
        self.cache.lock().insert(
            key,
            CacheEntry {
                at: Instant::now(),
                data: data.clone(),
            },
        );
    }

    fn log_poll(&self, metrics: &SensorSnapshot) {
        if let Some(logger) = &self.logger {
            logger.debug(
                events::SENSOR_POLL,
                "sensors",
                None,
                json!({
                    "cpu_load": metrics.get(CPU_LOAD),
                    "memory_used": metrics.get(MEM_USED),
                    "gpu_load": metrics.get(GPU_LOAD),
                    "metrics_count": metrics.len(),
                }),
            );
        }
    }

    fn log_snapshot(&self, metrics: &SensorSnapshot, cache_hit: bool) {
        if let Some(logger) = &self.logger {
            logger.info(
                events::SYSTEM_METRICS_SNAPSHOT,
                "sensors",
                None,
                json!({
                    "cpu_load": metrics.get(CPU_LOAD),
                    "memory_used": metrics.get(MEM_USED),
                    "gpu_load": metrics.get(GPU_LOAD),
                    "metrics_count": metrics.len(),
                    "cache_hit": cache_hit,
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_domain::{Error, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBase {
        polls: Arc<AtomicUsize>,
    }

    impl BaseProbe for CountingBase {
        fn poll(&self) -> SensorSnapshot {
            self.polls.fetch_add(1, Ordering::SeqCst);
            SensorSnapshot::from([(CPU_LOAD.to_string(), 12.5), (MEM_USED.to_string(), 40.0)])
        }

        fn poll_detailed(&self) -> SensorSnapshot {
            let mut snapshot = self.poll();
            snapshot.insert(crate::CPU_COUNT.into(), 8.0);
            snapshot
        }
    }

    struct CountingPlatform {
        polls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl PlatformProbe for CountingPlatform {
        fn name(&self) -> &'static str {
            "fake-gpu"
        }

        fn poll(&self) -> Result<SensorSnapshot> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Other("gpu probe offline".into()))
            } else {
                Ok(SensorSnapshot::from([(GPU_LOAD.to_string(), 33.0)]))
            }
        }
    }

    fn hub(ttl: Duration, fail_platform: bool) -> (SensorHub, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let base_polls = Arc::new(AtomicUsize::new(0));
        let platform_polls = Arc::new(AtomicUsize::new(0));
        let hub = SensorHub::with_ttl(
            Box::new(CountingBase { polls: base_polls.clone() }),
            Some(Box::new(CountingPlatform {
                polls: platform_polls.clone(),
                fail: fail_platform,
            })),
            ttl,
        );
        (hub, base_polls, platform_polls)
    }

    #[test]
    fn second_read_within_ttl_hits_cache_without_reprobe() {
        let (hub, base_polls, platform_polls) = hub(Duration::from_secs(60), false);

        let first = hub.poll_system_metrics();
        let second = hub.poll_system_metrics();

        assert_eq!(first, second);
        assert_eq!(base_polls.load(Ordering::SeqCst), 1);
        assert_eq!(platform_polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_ttl_triggers_fresh_probe() {
        let (hub, base_polls, _) = hub(Duration::from_millis(5), false);

        hub.poll_system_metrics();
        std::thread::sleep(Duration::from_millis(10));
        hub.poll_system_metrics();

        assert_eq!(base_polls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_returns_defensive_copies() {
        let (hub, _, _) = hub(Duration::from_secs(60), false);

        let mut first = hub.poll_system_metrics();
        first.insert(CPU_LOAD.into(), 999.0);

        let second = hub.poll_system_metrics();
        assert_eq!(second[CPU_LOAD], 12.5);
    }

    #[test]
    fn platform_failure_drops_fields_keeps_base() {
        let (hub, _, _) = hub(Duration::from_secs(60), true);

        let metrics = hub.poll_system_metrics();
        assert!(metrics.contains_key(CPU_LOAD));
        assert!(!metrics.contains_key(GPU_LOAD));
    }

    #[test]
    fn system_and_snapshot_keys_cache_independently() {
        let (hub, base_polls, _) = hub(Duration::from_secs(60), false);

        hub.poll_system_metrics();
        let detailed = hub.metrics_snapshot();

        // The snapshot path re-probed despite the fresh "system" entry.
        assert_eq!(base_polls.load(Ordering::SeqCst), 2);
        assert!(detailed.contains_key(crate::CPU_COUNT));

        // But its own second read is served from cache.
        hub.metrics_snapshot();
        assert_eq!(base_polls.load(Ordering::SeqCst), 2);
    }
}
