//! The per-request orchestrator: routing, LLM calls, the capped tool loop,
//! synthesis, and completion bookkeeping.

pub mod context;
pub mod executor;
pub mod normalize;

pub use context::{canonical_signature, ExecutionContext, TaskState};
pub use executor::{Orchestrator, OrchestratorConfig, OrchestratorResult};
pub use normalize::normalize_conversation;
