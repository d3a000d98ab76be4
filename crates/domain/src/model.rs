use serde::{Deserialize, Serialize};
use std::fmt;

/// Model selection category used by the router and the LLM client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelRole {
    Router,
    Standard,
    Reasoning,
    Coding,
}

impl ModelRole {
    pub const ALL: [ModelRole; 4] = [
        ModelRole::Router,
        ModelRole::Standard,
        ModelRole::Reasoning,
        ModelRole::Coding,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Router => "ROUTER",
            ModelRole::Standard => "STANDARD",
            ModelRole::Reasoning => "REASONING",
            ModelRole::Coding => "CODING",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic classification of an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Chat,
    CodeTask,
    SystemHealth,
}

/// The router either answers directly or delegates to a specialized role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingDecision {
    Handle,
    Delegate,
}

/// Parameters the router may recommend for the downstream model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendedParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_multiplier: Option<f32>,
}

/// Output of one routing pass, recorded into the execution context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingResult {
    pub decision: RoutingDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_role: Option<ModelRole>,
    /// Router confidence in [0, 1].
    pub confidence: f64,
    /// Estimated complexity on a 1-10 scale.
    pub reasoning_depth: u8,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_params: Option<RecommendedParams>,
    /// Direct answer text when `decision == Handle`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl RoutingResult {
    /// The role the orchestrator should call: the delegation target, or
    /// STANDARD when the router handled or named no target.
    pub fn effective_role(&self) -> ModelRole {
        self.target_role.unwrap_or(ModelRole::Standard)
    }
}

/// Token accounting from a model response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}
