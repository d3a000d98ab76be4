//! Governance directory loader.
//!
//! Reads the four declarative files (`modes.yaml`, `tools.yaml`,
//! `models.yaml`, `safety.yaml`) into the typed governance config and model
//! catalog. A missing or unparsable file is fatal: running without policy is
//! worse than not running.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use helm_domain::config::{ModelCatalog, ModelDefinition};
use helm_domain::{
    Error, GovernanceConfig, Mode, ModeDefinition, ModeModelConstraints, ModelRole, Result,
    SafetyConfig, ToolPolicy, TransitionRule,
};

// ── Per-file shapes ────────────────────────────────────────────────

#[derive(Deserialize)]
struct ModesFile {
    #[serde(default)]
    modes: HashMap<Mode, ModeDefinition>,
    #[serde(default, with = "helm_domain::governance::rule_list")]
    transition_rules: Vec<(String, TransitionRule)>,
}

#[derive(Deserialize)]
struct ToolsFile {
    #[serde(default)]
    tools: HashMap<String, ToolPolicy>,
}

#[derive(Deserialize)]
struct ModelsFile {
    #[serde(default)]
    models: HashMap<ModelRole, ModelDefinition>,
    #[serde(default)]
    mode_constraints: HashMap<Mode, ModeModelConstraints>,
}

#[derive(Deserialize)]
struct SafetyFile {
    #[serde(default)]
    safety: SafetyConfig,
}

/// Everything the governance directory defines.
#[derive(Debug)]
pub struct LoadedGovernance {
    pub config: GovernanceConfig,
    pub models: ModelCatalog,
}

/// Load the governance directory. Every file is required.
pub fn load_governance(dir: &Path) -> Result<LoadedGovernance> {
    let modes: ModesFile = read_required(dir, "modes.yaml")?;
    let tools: ToolsFile = read_required(dir, "tools.yaml")?;
    let models: ModelsFile = read_required(dir, "models.yaml")?;
    let safety: SafetyFile = read_required(dir, "safety.yaml")?;

    let transition_rules = validate_rule_names(modes.transition_rules);

    let config = GovernanceConfig {
        modes: modes.modes,
        transition_rules,
        tools: tools.tools,
        mode_constraints: models.mode_constraints,
        safety: safety.safety,
    };

    tracing::info!(
        modes = config.modes.len(),
        rules = config.transition_rules.len(),
        tools = config.tools.len(),
        model_roles = models.models.len(),
        "governance configuration loaded"
    );

    Ok(LoadedGovernance {
        config,
        models: ModelCatalog { models: models.models },
    })
}

fn read_required<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        Error::Config(format!(
            "required governance file missing or unreadable: {} ({e})",
            path.display()
        ))
    })?;
    serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("invalid governance file {}: {e}", path.display())))
}

/// Drop rules whose name does not parse as `<FROM>_to_<TO>` with two valid
/// modes; a bad name can never fire and hiding it would mask a typo forever.
fn validate_rule_names(
    rules: Vec<(String, TransitionRule)>,
) -> Vec<(String, TransitionRule)> {
    rules
        .into_iter()
        .filter(|(name, _)| {
            if parse_rule_name(name).is_some() {
                true
            } else {
                tracing::warn!(rule = %name, "dropping transition rule with invalid name");
                false
            }
        })
        .collect()
}

/// Split `"NORMAL_to_ALERT"` into `(Mode::Normal, Mode::Alert)`.
pub fn parse_rule_name(name: &str) -> Option<(Mode, Mode)> {
    let (from, to) = name.split_once("_to_")?;
    Some((from.parse().ok()?, to.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn write_minimal(dir: &Path) {
        write_file(
            dir,
            "modes.yaml",
            r#"
modes:
  NORMAL:
    description: steady state
    max_concurrent_tasks: 4
    background_monitoring_enabled: true
    allowed_tool_categories: [filesystem]
  ALERT:
    max_concurrent_tasks: 2
    background_monitoring_enabled: true
transition_rules:
  NORMAL_to_ALERT:
    conditions:
      - { metric: perf_system_cpu_load, operator: ">", value: 85 }
  ALERT_to_NORMAL:
    conditions:
      - { metric: perf_system_cpu_load, operator: "<", value: 50 }
  BOGUS_to_ALERT:
    conditions:
      - { metric: perf_system_cpu_load, operator: ">", value: 1 }
"#,
        );
        write_file(
            dir,
            "tools.yaml",
            r#"
tools:
  read_file:
    category: filesystem
    allowed_in_modes: [NORMAL, ALERT]
    forbidden_paths: ["/etc/shadow", "/etc/passwd"]
    max_file_size_mb: 10
"#,
        );
        write_file(
            dir,
            "models.yaml",
            r#"
models:
  ROUTER:
    id: qwen2.5-0.5b
    default_timeout: 30
  STANDARD:
    id: llama-3.1-8b
mode_constraints:
  NORMAL:
    allowed_roles: [ROUTER, STANDARD, REASONING, CODING]
    max_tokens:
      STANDARD: 2048
"#,
        );
        write_file(dir, "safety.yaml", "safety: {}\n");
    }

    #[test]
    fn loads_all_four_files() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal(dir.path());

        let loaded = load_governance(dir.path()).unwrap();
        assert_eq!(loaded.config.max_concurrent_tasks(Mode::Normal), 4);
        assert!(loaded.config.tool_policy("read_file").is_some());
        assert_eq!(loaded.models.get(ModelRole::Router).unwrap().id, "qwen2.5-0.5b");
        assert_eq!(
            loaded
                .config
                .mode_constraints(Mode::Normal)
                .unwrap()
                .max_tokens
                .get(&ModelRole::Standard),
            Some(&2048)
        );
    }

    #[test]
    fn missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal(dir.path());
        std::fs::remove_file(dir.path().join("safety.yaml")).unwrap();

        let err = load_governance(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("safety.yaml"));
    }

    #[test]
    fn malformed_yaml_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal(dir.path());
        write_file(dir.path(), "tools.yaml", "tools: [not, a, map]");

        assert!(load_governance(dir.path()).is_err());
    }

    #[test]
    fn invalid_rule_names_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_minimal(dir.path());

        let loaded = load_governance(dir.path()).unwrap();
        let names: Vec<&str> = loaded
            .config
            .transition_rules()
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["NORMAL_to_ALERT", "ALERT_to_NORMAL"]);
    }

    #[test]
    fn parse_rule_name_cases() {
        assert_eq!(
            parse_rule_name("NORMAL_to_ALERT"),
            Some((Mode::Normal, Mode::Alert))
        );
        assert_eq!(parse_rule_name("NORMAL_ALERT"), None);
        assert_eq!(parse_rule_name("NOPE_to_ALERT"), None);
    }
}
