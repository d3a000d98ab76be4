//! The tool layer: a named registry of tool definitions and executors, the
//! policy-checked execution path, and the builtin tool set.

pub mod builtin;
pub mod executor;
pub mod registry;

pub use executor::{ModeSource, ToolExecutionLayer};
pub use registry::{ToolExec, ToolRegistry};
