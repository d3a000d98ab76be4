use serde::{Deserialize, Serialize};
use serde_json::Value;

use helm_domain::{TokenUsage, ToolCall};

/// Normalized model response, independent of backend quirks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Thinking text from reasoning models, when the backend separates it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_trace: Option<String>,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Backend response id, for backends with stateful conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// The untouched response body, kept for diagnostics.
    #[serde(default)]
    pub raw: Value,
}

impl LlmResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Best text for downstream parsing: content, falling back to the
    /// reasoning trace when a thinking model left content empty.
    pub fn effective_text(&self) -> &str {
        if !self.content.trim().is_empty() {
            &self.content
        } else {
            self.reasoning_trace.as_deref().unwrap_or("")
        }
    }
}
