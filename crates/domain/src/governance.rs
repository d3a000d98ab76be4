use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mode::Mode;
use crate::model::ModelRole;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mode definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sensor thresholds attached to a mode definition, used by dashboards and
/// the request monitor; transition rules carry their own conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_load_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_used_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_error_rate: Option<f64>,
}

/// Declarative definition of one operational mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeDefinition {
    #[serde(default)]
    pub description: String,
    pub max_concurrent_tasks: usize,
    pub background_monitoring_enabled: bool,
    #[serde(default)]
    pub allowed_tool_categories: Vec<String>,
    #[serde(default)]
    pub thresholds: ModeThresholds,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transition rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single comparison against a sensor metric.
///
/// `operator` stays a free string on purpose: an unknown operator must fail
/// closed with a warning at evaluation time rather than reject the whole
/// config at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionCondition {
    pub metric: String,
    pub operator: String,
    pub value: f64,
}

/// Rule for moving between modes, keyed externally as `"<FROM>_to_<TO>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRule {
    pub conditions: Vec<TransitionCondition>,
    /// `"any"` (OR) or `"all"` (AND); anything else fails closed.
    #[serde(default = "d_any")]
    pub logic: String,
}

fn d_any() -> String {
    "any".into()
}

/// Serde adapter for the ordered rule list: on the wire it is a mapping
/// (`NORMAL_to_ALERT: {…}`), in memory an order-preserving `Vec` because
/// evaluation takes the first matching rule in declaration order.
pub mod rule_list {
    use super::TransitionRule;
    use serde::de::{MapAccess, SeqAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(
        rules: &[(String, TransitionRule)],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(rules.len()))?;
        for (name, rule) in rules {
            map.serialize_entry(name, rule)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<(String, TransitionRule)>, D::Error> {
        struct RuleListVisitor;

        impl<'de> Visitor<'de> for RuleListVisitor {
            type Value = Vec<(String, TransitionRule)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of transition rules")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut rules = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry()? {
                    rules.push(entry);
                }
                Ok(rules)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut rules = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_element()? {
                    rules.push(entry);
                }
                Ok(rules)
            }
        }

        deserializer.deserialize_any(RuleListVisitor)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool policies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-tool policy consulted by the executor before every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub allowed_in_modes: Vec<Mode>,
    #[serde(default)]
    pub forbidden_in_modes: Vec<Mode>,
    /// Glob patterns; checked before `allowed_paths`.
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_hour: Option<u32>,
    #[serde(default)]
    pub requires_approval: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model constraints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-mode constraints on model use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModeModelConstraints {
    #[serde(default)]
    pub allowed_roles: Vec<ModelRole>,
    #[serde(default)]
    pub max_tokens: HashMap<ModelRole, u32>,
    #[serde(default)]
    pub temperature: HashMap<ModelRole, f32>,
    #[serde(default)]
    pub timeout_seconds: HashMap<ModelRole, u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Safety
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    pub tool_calls_per_minute: u32,
    pub llm_calls_per_minute: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub rate_limits: HashMap<Mode, RateLimits>,
    /// Regex patterns whose matches are stripped from user-facing error text.
    #[serde(default)]
    pub error_redaction_patterns: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The complete governance configuration, read once at startup.
///
/// Transition rules are kept as an ordered list of `(name, rule)` pairs
/// because evaluation takes the first matching rule in declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GovernanceConfig {
    #[serde(default)]
    pub modes: HashMap<Mode, ModeDefinition>,
    #[serde(default, with = "rule_list")]
    pub transition_rules: Vec<(String, TransitionRule)>,
    #[serde(default)]
    pub tools: HashMap<String, ToolPolicy>,
    #[serde(default)]
    pub mode_constraints: HashMap<Mode, ModeModelConstraints>,
    #[serde(default)]
    pub safety: SafetyConfig,
}

impl GovernanceConfig {
    /// Whether a tool may run in the given mode, considering the policy's
    /// forbidden list first, then its allowed list (empty allowed list means
    /// no tool-level restriction beyond the definition's own modes).
    pub fn is_tool_allowed(&self, tool: &str, mode: Mode) -> bool {
        match self.tools.get(tool) {
            None => true,
            Some(policy) => {
                if policy.forbidden_in_modes.contains(&mode) {
                    return false;
                }
                policy.allowed_in_modes.is_empty() || policy.allowed_in_modes.contains(&mode)
            }
        }
    }

    pub fn tool_policy(&self, tool: &str) -> Option<&ToolPolicy> {
        self.tools.get(tool)
    }

    pub fn mode_constraints(&self, mode: Mode) -> Option<&ModeModelConstraints> {
        self.mode_constraints.get(&mode)
    }

    pub fn mode_definition(&self, mode: Mode) -> Option<&ModeDefinition> {
        self.modes.get(&mode)
    }

    pub fn transition_rules(&self) -> &[(String, TransitionRule)] {
        &self.transition_rules
    }

    pub fn max_concurrent_tasks(&self, mode: Mode) -> usize {
        self.modes.get(&mode).map(|m| m.max_concurrent_tasks).unwrap_or(1)
    }
}
