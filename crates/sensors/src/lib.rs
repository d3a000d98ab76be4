//! System sensors: cheap cross-platform probes, an expensive platform probe
//! seam, a short-TTL cache in front of both, and the per-request monitor.

pub mod cache;
pub mod monitor;
pub mod probe;

pub use cache::SensorHub;
pub use monitor::{MonitorSummary, RequestMonitor};
pub use probe::{BaseProbe, PlatformProbe, SysinfoProbe};

// ── Metric ids ──────────────────────────────────────────────────────
// Flat keys shared with governance transition rules and telemetry events.
pub const CPU_LOAD: &str = "perf_system_cpu_load";
pub const MEM_USED: &str = "perf_system_mem_used";
pub const DISK_USED: &str = "perf_system_disk_used";
pub const GPU_LOAD: &str = "perf_system_gpu_load";
pub const CPU_COUNT: &str = "perf_system_cpu_count";
pub const MEM_TOTAL_MB: &str = "perf_system_mem_total_mb";
pub const MEM_AVAILABLE_MB: &str = "perf_system_mem_available_mb";
pub const DISK_FREE_GB: &str = "perf_system_disk_free_gb";
