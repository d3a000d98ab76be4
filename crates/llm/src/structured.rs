//! Structured-output helper: a typed signature mapped over the chat client.
//!
//! The signature asks the backend for JSON-schema-constrained output; on
//! backends that ignore `response_format`, the parse path tolerates fenced
//! JSON and content hidden in reasoning traces. A parse failure surfaces as
//! `Error::InvalidResponse` so callers can fall back to their manual path.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use helm_domain::{ChatMessage, Error, ModelRole, Result, TraceContext};

use crate::adapters::strip_markdown_fences;
use crate::client::{CallOptions, ChatModel};

/// A named output schema for one structured call.
pub struct StructuredSignature {
    pub name: String,
    pub schema: Value,
}

impl StructuredSignature {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self { name: name.into(), schema }
    }

    /// The OpenAI-style `response_format` body for this signature.
    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "strict": true,
                "schema": self.schema,
            },
        })
    }
}

/// Call the model and deserialize its reply against the signature.
pub async fn call_structured<T: DeserializeOwned>(
    client: &dyn ChatModel,
    role: ModelRole,
    messages: Vec<ChatMessage>,
    signature: &StructuredSignature,
    mut options: CallOptions,
    trace: &TraceContext,
) -> Result<T> {
    options.response_format = Some(signature.response_format());
    let response = client.respond(role, messages, options, trace).await?;
    parse_structured(response.effective_text())
}

/// Parse a JSON document out of model text, stripping markdown fences.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    let stripped = strip_markdown_fences(text);
    let body = extract_json_object(stripped).unwrap_or(stripped);
    serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("structured output parse failed: {e}")))
}

/// Find the outermost `{ … }` span, for models that wrap the JSON in prose.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}
