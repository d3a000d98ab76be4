//! Wire-format adapters for OpenAI-style chat completions.
//!
//! Request building normalizes assistant tool-call history (some strict
//! backends require an `index` on every entry), and response adaptation
//! falls back to parsing text-format tool calls for models that cannot emit
//! structured ones.

use serde_json::{json, Map, Value};

use helm_domain::{ChatMessage, Error, Result, Role, TokenUsage, ToolCall, ToolDefinition};

use crate::types::LlmResponse;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request building
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_chat_completions_request(
    model: &str,
    messages: &[ChatMessage],
    tools: Option<&[ToolDefinition]>,
    tool_choice: Option<&Value>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    response_format: Option<&Value>,
) -> Value {
    let messages: Vec<Value> = messages.iter().map(message_to_wire).collect();

    let mut body = json!({
        "model": model,
        "messages": messages,
    });

    if let Some(tools) = tools {
        if !tools.is_empty() {
            let tools: Vec<Value> = tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = tool_choice.cloned().unwrap_or(json!("auto"));
        }
    }
    if let Some(max) = max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(temp) = temperature {
        body["temperature"] = json!(temp);
    }
    if let Some(format) = response_format {
        body["response_format"] = format.clone();
    }

    body
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn message_to_wire(message: &ChatMessage) -> Value {
    let mut wire = json!({
        "role": role_str(message.role),
        "content": message.content,
    });

    if let Some(calls) = &message.tool_calls {
        // Strict backends reject assistant tool_calls entries without an
        // index; backfill it positionally.
        let calls: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(index, call)| {
                json!({
                    "index": index,
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    },
                })
            })
            .collect();
        wire["tool_calls"] = Value::Array(calls);
    }
    if let Some(id) = &message.tool_call_id {
        wire["tool_call_id"] = json!(id);
    }

    wire
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema(),
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response adaptation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn adapt_chat_completions_response(response: Value) -> Result<LlmResponse> {
    let choice = response
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| Error::InvalidResponse("response has no choices".into()))?;

    let message = choice
        .get("message")
        .ok_or_else(|| Error::InvalidResponse("choice has no message".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let reasoning_trace = message
        .get("reasoning_content")
        .or_else(|| message.get("reasoning"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for raw in raw_calls {
            tool_calls.push(wire_tool_call(raw)?);
        }
    }
    // Models without structured tool output sometimes write the call into
    // the text body.
    if tool_calls.is_empty() && !content.is_empty() {
        tool_calls = parse_text_tool_calls(&content);
    }

    let usage = response
        .get("usage")
        .map(|usage| TokenUsage {
            prompt_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            total_tokens: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        })
        .unwrap_or_default();

    Ok(LlmResponse {
        role: message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("assistant")
            .to_string(),
        content,
        tool_calls,
        reasoning_trace,
        usage,
        response_id: response.get("id").and_then(Value::as_str).map(str::to_string),
        raw: response,
    })
}

fn wire_tool_call(raw: &Value) -> Result<ToolCall> {
    let function = raw
        .get("function")
        .ok_or_else(|| Error::InvalidResponse("tool call missing function".into()))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidResponse("tool call missing name".into()))?
        .to_string();

    // Arguments arrive as a JSON-encoded string; tolerate an object too.
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) if !s.trim().is_empty() => serde_json::from_str(s)
            .map_err(|e| Error::InvalidResponse(format!("tool call arguments not JSON: {e}")))?,
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    };

    Ok(ToolCall {
        id: raw
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name,
        arguments,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Text-format tool calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract tool calls a model wrote as text: `<tool_call>{…}</tool_call>`
/// tags, or a fenced/bare JSON object of shape `{"name": …, "arguments": …}`.
pub fn parse_text_tool_calls(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();

    for candidate in tool_call_candidates(content) {
        let Ok(value) = serde_json::from_str::<Value>(&candidate) else {
            continue;
        };
        let Some(name) = value.get("name").and_then(Value::as_str) else {
            continue;
        };
        let arguments = match value.get("arguments").or_else(|| value.get("parameters")) {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            Some(Value::String(s)) => {
                serde_json::from_str(s).unwrap_or(Value::Object(Map::new()))
            }
            _ => Value::Object(Map::new()),
        };
        calls.push(ToolCall {
            id: format!("text-call-{}", calls.len()),
            name: name.to_string(),
            arguments,
        });
    }

    calls
}

fn tool_call_candidates(content: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    // <tool_call>…</tool_call> tags.
    let mut rest = content;
    while let Some(start) = rest.find("<tool_call>") {
        let after = &rest[start + "<tool_call>".len()..];
        let Some(end) = after.find("</tool_call>") else {
            break;
        };
        candidates.push(after[..end].trim().to_string());
        rest = &after[end..];
    }
    if !candidates.is_empty() {
        return candidates;
    }

    // Fenced or bare JSON body.
    let stripped = strip_markdown_fences(content).trim();
    if stripped.starts_with('{') && stripped.ends_with('}') {
        candidates.push(stripped.to_string());
    }
    candidates
}

/// Remove a surrounding markdown code fence (```json … ``` or ``` … ```).
pub fn strip_markdown_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an optional language tag on the fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_domain::{Mode, ParamType, RiskLevel, ToolParameter};

    fn sample_tool() -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".into(),
            description: "List files".into(),
            category: "filesystem".into(),
            parameters: vec![ToolParameter {
                name: "path".into(),
                kind: ParamType::String,
                required: true,
                default: None,
                description: String::new(),
            }],
            risk_level: RiskLevel::Low,
            allowed_modes: vec![Mode::Normal],
            timeout_seconds: 10,
            rate_limit_per_hour: None,
        }
    }

    #[test]
    fn request_includes_tools_and_auto_choice() {
        let messages = vec![ChatMessage::user("list /tmp")];
        let tools = [sample_tool()];
        let body = build_chat_completions_request(
            "llama-3.1-8b",
            &messages,
            Some(&tools),
            None,
            Some(512),
            Some(0.2),
            None,
        );

        assert_eq!(body["model"], "llama-3.1-8b");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"][0]["function"]["name"], "list_directory");
        assert_eq!(body["max_tokens"], 512);
    }

    #[test]
    fn assistant_tool_calls_get_positional_index() {
        let calls = vec![
            ToolCall {
                id: "call-a".into(),
                name: "read_file".into(),
                arguments: json!({"path": "/tmp/a"}),
            },
            ToolCall {
                id: "call-b".into(),
                name: "read_file".into(),
                arguments: json!({"path": "/tmp/b"}),
            },
        ];
        let messages = vec![ChatMessage::assistant_with_tool_calls("", calls)];
        let body = build_chat_completions_request("m", &messages, None, None, None, None, None);

        let wire_calls = body["messages"][0]["tool_calls"].as_array().unwrap();
        assert_eq!(wire_calls[0]["index"], 0);
        assert_eq!(wire_calls[1]["index"], 1);
        // Arguments go over the wire as a JSON string.
        assert!(wire_calls[0]["function"]["arguments"].is_string());
    }

    #[test]
    fn adapts_plain_text_response() {
        let response = json!({
            "id": "resp-1",
            "choices": [{"message": {"role": "assistant", "content": "4"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 1, "total_tokens": 13},
        });
        let adapted = adapt_chat_completions_response(response).unwrap();
        assert_eq!(adapted.content, "4");
        assert!(adapted.tool_calls.is_empty());
        assert_eq!(adapted.usage.total_tokens, 13);
        assert_eq!(adapted.response_id.as_deref(), Some("resp-1"));
    }

    #[test]
    fn adapts_native_tool_calls_with_string_arguments() {
        let response = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call-1",
                    "type": "function",
                    "function": {"name": "list_directory", "arguments": "{\"path\": \"/tmp\"}"},
                }],
            }}],
        });
        let adapted = adapt_chat_completions_response(response).unwrap();
        assert_eq!(adapted.tool_calls.len(), 1);
        assert_eq!(adapted.tool_calls[0].name, "list_directory");
        assert_eq!(adapted.tool_calls[0].arguments["path"], "/tmp");
    }

    #[test]
    fn empty_choices_is_invalid() {
        let err = adapt_chat_completions_response(json!({"choices": []})).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }

    #[test]
    fn parses_tagged_text_tool_calls() {
        let content = r#"I'll check that.
<tool_call>{"name": "list_directory", "arguments": {"path": "/tmp"}}</tool_call>"#;
        let calls = parse_text_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_directory");
        assert_eq!(calls[0].arguments["path"], "/tmp");
    }

    #[test]
    fn parses_fenced_json_tool_call() {
        let content = "```json\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"/tmp/x\"}}\n```";
        let calls = parse_text_tool_calls(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
    }

    #[test]
    fn plain_prose_is_not_a_tool_call() {
        assert!(parse_text_tool_calls("The answer is 4.").is_empty());
        assert!(parse_text_tool_calls("{\"no_name\": true}").is_empty());
    }

    #[test]
    fn strip_fences_variants() {
        assert_eq!(strip_markdown_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_markdown_fences("{\"a\":1}"), "{\"a\":1}");
    }
}
