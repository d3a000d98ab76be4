//! Hardware probes.
//!
//! The base probe answers in well under 10 ms and works everywhere; the
//! platform probe is the seam for metrics that are slow or hardware-specific
//! (a discrete-GPU utilization poll can take seconds). Both are traits so the
//! cache and monitor tests can run against fixed-value fakes.

use parking_lot::Mutex;
use sysinfo::{Disks, System};

use helm_domain::{Result, SensorSnapshot};

use crate::{CPU_COUNT, CPU_LOAD, DISK_FREE_GB, DISK_USED, MEM_AVAILABLE_MB, MEM_TOTAL_MB, MEM_USED};

/// Fast cross-platform CPU/memory/disk probe.
pub trait BaseProbe: Send + Sync {
    /// The flat metric set used by governance rules and the request monitor.
    fn poll(&self) -> SensorSnapshot;

    /// Superset of `poll()` with detail fields (counts, totals, free space).
    fn poll_detailed(&self) -> SensorSnapshot;
}

/// Slow or hardware-specific metrics (e.g. GPU load).
///
/// A failing platform probe never fails the merged poll; its fields are
/// simply absent from the snapshot.
pub trait PlatformProbe: Send + Sync {
    fn name(&self) -> &'static str;
    fn poll(&self) -> Result<SensorSnapshot>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sysinfo-backed base probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refresh_and_read(&self, detailed: bool) -> SensorSnapshot {
        let mut snapshot = SensorSnapshot::new();
        {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();

            snapshot.insert(CPU_LOAD.into(), system.global_cpu_info().cpu_usage() as f64);

            let total = system.total_memory();
            let used = system.used_memory();
            if total > 0 {
                snapshot.insert(MEM_USED.into(), used as f64 / total as f64 * 100.0);
            }

            if detailed {
                snapshot.insert(CPU_COUNT.into(), system.cpus().len() as f64);
                snapshot.insert(MEM_TOTAL_MB.into(), total as f64 / (1024.0 * 1024.0));
                snapshot.insert(
                    MEM_AVAILABLE_MB.into(),
                    system.available_memory() as f64 / (1024.0 * 1024.0),
                );
            }
        }

        let disks = Disks::new_with_refreshed_list();
        let (mut total, mut available) = (0u64, 0u64);
        for disk in disks.list() {
            total += disk.total_space();
            available += disk.available_space();
        }
        if total > 0 {
            let used_pct = (total - available) as f64 / total as f64 * 100.0;
            snapshot.insert(DISK_USED.into(), used_pct);
            if detailed {
                snapshot.insert(
                    DISK_FREE_GB.into(),
                    available as f64 / (1024.0 * 1024.0 * 1024.0),
                );
            }
        }

        snapshot
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseProbe for SysinfoProbe {
    fn poll(&self) -> SensorSnapshot {
        self.refresh_and_read(false)
    }

    fn poll_detailed(&self) -> SensorSnapshot {
        self.refresh_and_read(true)
    }
}
