use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-request trace identity, propagated through every LLM and tool call.
///
/// A context is immutable once created: deriving a child span returns a new
/// value and leaves the parent untouched, so contexts can be passed freely
/// across task boundaries without shared mutable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub span_id: Uuid,
}

impl TraceContext {
    /// Start a fresh trace at request entry.
    pub fn new_trace() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            parent_span_id: None,
            span_id: Uuid::new_v4(),
        }
    }

    /// Derive a child span for a nested operation (an LLM or tool call).
    ///
    /// Returns the child context plus the new span id for convenience when
    /// tagging the start/stop event pair of that operation.
    pub fn new_span(&self) -> (TraceContext, Uuid) {
        let span_id = Uuid::new_v4();
        let child = TraceContext {
            trace_id: self.trace_id,
            parent_span_id: Some(self.span_id),
            span_id,
        };
        (child, span_id)
    }

    /// First 8 hex chars of the trace id, used for entry-id grouping and
    /// compact display.
    pub fn trace_prefix(&self) -> String {
        self.trace_id.simple().to_string()[..8].to_string()
    }
}
