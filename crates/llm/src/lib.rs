//! The LLM layer: a role-keyed client over OpenAI-style chat completions,
//! response adapters (including text-format tool calls), a structured-output
//! helper, the routing stack, and the cost tracker.

pub mod adapters;
pub mod client;
pub mod cost;
pub mod heuristics;
pub mod router;
pub mod structured;
pub mod types;

pub use client::{CallOptions, ChatModel, LlmClient};
pub use cost::{CostRecord, CostTracker};
pub use router::{Router, RoutingStrategy};
pub use types::LlmResponse;
