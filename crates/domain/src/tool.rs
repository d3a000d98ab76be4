use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mode::Mode;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Argument object as sent by the model. Validated and filtered against
    /// the tool's declared parameters before execution.
    pub arguments: Value,
}

/// JSON types a tool parameter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn json_schema_type(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// One declared parameter of a tool.
///
/// Tools enumerate their parameters explicitly; arguments outside this list
/// are dropped by the executor, and missing required arguments fail the call
/// before the tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Static definition of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    pub risk_level: RiskLevel,
    pub allowed_modes: Vec<Mode>,
    #[serde(default = "d_timeout")]
    pub timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_hour: Option<u32>,
}

fn d_timeout() -> u64 {
    30
}

impl ToolDefinition {
    /// Build the OpenAI-style function declaration for this tool.
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert(
                "type".into(),
                Value::String(param.kind.json_schema_type().into()),
            );
            if !param.description.is_empty() {
                prop.insert("description".into(), Value::String(param.description.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }
}

/// Outcome of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl ToolResult {
    pub fn success(tool_name: impl Into<String>, output: Value, latency_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            output,
            error: None,
            latency_ms,
        }
    }

    pub fn failure(tool_name: impl Into<String>, error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            latency_ms,
        }
    }
}
