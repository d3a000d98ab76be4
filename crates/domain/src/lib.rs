pub mod chat;
pub mod config;
pub mod error;
pub mod governance;
pub mod mode;
pub mod model;
pub mod tool;
pub mod trace;

pub use chat::*;
pub use error::{Error, Result};
pub use governance::*;
pub use mode::*;
pub use model::*;
pub use tool::*;
pub use trace::TraceContext;

use std::collections::HashMap;

/// A point-in-time reading of system sensors, keyed by metric id
/// (e.g. `perf_system_cpu_load`).
pub type SensorSnapshot = HashMap<String, f64>;
