use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::ModelRole;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM client settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Default endpoint for roles without their own `endpoint` override.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    #[serde(default = "d_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "d_retries")]
    pub max_retries: u32,
    /// Suffix appended after tool rounds to suppress long deliberation on
    /// synthesis turns (e.g. `/no_think`). Empty disables the nudge.
    #[serde(default = "d_no_think")]
    pub no_think_suffix: String,
}

fn d_base_url() -> String {
    "http://localhost:1234/v1".into()
}
fn d_timeout() -> u64 {
    45
}
fn d_retries() -> u32 {
    2
}
fn d_no_think() -> String {
    "/no_think".into()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            timeout_seconds: d_timeout(),
            max_retries: d_retries(),
            no_think_suffix: d_no_think(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model catalog (role → model definition)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One concrete model behind a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Backend model identifier sent in the request body.
    pub id: String,
    /// Role-specific endpoint; `None` falls back to `LlmSettings.base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Whether the backend emits structured `tool_calls`. When false, tools
    /// are stripped from requests and tool calls are parsed from text.
    #[serde(default = "d_true")]
    pub supports_function_calling: bool,
    /// USD per 1M tokens, used by the cost tracker. Local models are free.
    #[serde(default)]
    pub input_cost_per_mtok: f64,
    #[serde(default)]
    pub output_cost_per_mtok: f64,
}

fn d_true() -> bool {
    true
}

/// Role-keyed model catalog (the `models.yaml` governance file).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    #[serde(default)]
    pub models: HashMap<ModelRole, ModelDefinition>,
}

impl ModelCatalog {
    pub fn get(&self, role: ModelRole) -> Option<&ModelDefinition> {
        self.models.get(&role)
    }

    /// Role timeout: the model's own default, or the built-in fallbacks
    /// (ROUTER 30 s, STANDARD 45 s, REASONING 60 s, CODING 45 s).
    pub fn timeout_for(&self, role: ModelRole) -> u64 {
        if let Some(def) = self.models.get(&role) {
            if let Some(t) = def.default_timeout {
                return t;
            }
        }
        match role {
            ModelRole::Router => 30,
            ModelRole::Standard => 45,
            ModelRole::Reasoning => 60,
            ModelRole::Coding => 45,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_falls_back_per_role() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.timeout_for(ModelRole::Router), 30);
        assert_eq!(catalog.timeout_for(ModelRole::Reasoning), 60);
    }

    #[test]
    fn configured_timeout_wins() {
        let mut catalog = ModelCatalog::default();
        catalog.models.insert(
            ModelRole::Router,
            ModelDefinition {
                id: "qwen-0.5b".into(),
                endpoint: None,
                default_timeout: Some(12),
                temperature: None,
                supports_function_calling: true,
                input_cost_per_mtok: 0.0,
                output_cost_per_mtok: 0.0,
            },
        );
        assert_eq!(catalog.timeout_for(ModelRole::Router), 12);
    }
}
