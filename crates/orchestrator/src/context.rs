use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use helm_domain::{
    ChatMessage, Channel, Mode, ModelRole, RoutingResult, ToolResult, TraceContext,
};
use helm_memory::ConversationNode;
use helm_sensors::MonitorSummary;

/// Task state machine. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Init,
    Planning,
    LlmCall,
    ToolExecution,
    Synthesis,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Init => "init",
            TaskState::Planning => "planning",
            TaskState::LlmCall => "llm_call",
            TaskState::ToolExecution => "tool_execution",
            TaskState::Synthesis => "synthesis",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state threaded through one request's execution.
pub struct ExecutionContext {
    pub session_id: String,
    pub trace: TraceContext,
    pub user_message: String,
    pub mode: Mode,
    pub channel: Channel,
    pub messages: Vec<ChatMessage>,
    pub tool_results: Vec<ToolResult>,
    pub final_reply: Option<String>,
    pub selected_role: Option<ModelRole>,
    pub routing_history: Vec<RoutingResult>,
    pub last_response_id: Option<String>,
    /// Executed tool calls this request (synthetic results do not count).
    pub tool_iteration_count: usize,
    /// Canonical signatures of executed calls, in order.
    pub tool_call_signatures: Vec<String>,
    pub metrics_summary: Option<MonitorSummary>,
    pub memory_context: Option<Vec<ConversationNode>>,
    pub state: TaskState,
    pub error: Option<String>,
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        mode: Mode,
        channel: Channel,
    ) -> Self {
        let user_message = user_message.into();
        Self {
            session_id: session_id.into(),
            trace: TraceContext::new_trace(),
            messages: vec![ChatMessage::user(user_message.clone())],
            user_message,
            mode,
            channel,
            tool_results: Vec::new(),
            final_reply: None,
            selected_role: None,
            routing_history: Vec::new(),
            last_response_id: None,
            tool_iteration_count: 0,
            tool_call_signatures: Vec::new(),
            metrics_summary: None,
            memory_context: None,
            state: TaskState::Init,
            error: None,
        }
    }

    /// Occurrences of a signature among executed calls.
    pub fn signature_count(&self, signature: &str) -> usize {
        self.tool_call_signatures
            .iter()
            .filter(|s| s.as_str() == signature)
            .count()
    }
}

/// Canonical signature of a tool call: SHA-256 over the name and the
/// arguments serialized with recursively sorted object keys, so two calls
/// with the same arguments in different order hash identically.
pub fn canonical_signature(name: &str, arguments: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\x00");
    hasher.update(canonical_json(arguments).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(key).unwrap_or_default(),
                        canonical_json(&map[key])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_ignores_key_order() {
        let a = canonical_signature("read_file", &json!({"path": "/tmp", "max_lines": 5}));
        let b = canonical_signature("read_file", &json!({"max_lines": 5, "path": "/tmp"}));
        assert_eq!(a, b);
    }

    #[test]
    fn signature_distinguishes_names_and_values() {
        let base = canonical_signature("read_file", &json!({"path": "/tmp"}));
        assert_ne!(base, canonical_signature("write_file", &json!({"path": "/tmp"})));
        assert_ne!(base, canonical_signature("read_file", &json!({"path": "/var"})));
    }

    #[test]
    fn signature_descends_into_nested_objects() {
        let a = canonical_signature("t", &json!({"filter": {"a": 1, "b": 2}}));
        let b = canonical_signature("t", &json!({"filter": {"b": 2, "a": 1}}));
        assert_eq!(a, b);
    }

    #[test]
    fn new_context_seeds_the_user_message() {
        let ctx = ExecutionContext::new("s-1", "hello", Mode::Normal, Channel::Chat);
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].content, "hello");
        assert_eq!(ctx.state, TaskState::Init);
    }

    #[test]
    fn signature_count_counts_repeats() {
        let mut ctx = ExecutionContext::new("s", "m", Mode::Normal, Channel::Chat);
        ctx.tool_call_signatures.push("abc".into());
        ctx.tool_call_signatures.push("abc".into());
        ctx.tool_call_signatures.push("def".into());
        assert_eq!(ctx.signature_count("abc"), 2);
        assert_eq!(ctx.signature_count("def"), 1);
        assert_eq!(ctx.signature_count("zzz"), 0);
    }
}
