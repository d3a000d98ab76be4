//! The governance files shipped in `config/governance/` must load and stay
//! internally consistent; a typo there would otherwise surface as a
//! startup failure or, worse, a rule that can never fire.

use std::path::PathBuf;

use helm_domain::{Mode, ModelRole};
use helm_governance::loader::{load_governance, parse_rule_name};

fn shipped_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../config/governance")
        .canonicalize()
        .expect("shipped governance directory exists")
}

#[test]
fn shipped_files_load() {
    let loaded = load_governance(&shipped_dir()).expect("shipped governance must parse");
    assert!(!loaded.config.modes.is_empty());
    assert!(!loaded.config.tools.is_empty());
    assert!(!loaded.models.models.is_empty());
}

#[test]
fn every_mode_is_defined() {
    let loaded = load_governance(&shipped_dir()).unwrap();
    for mode in Mode::ALL {
        assert!(
            loaded.config.modes.contains_key(&mode),
            "mode {mode} missing a definition"
        );
    }
}

#[test]
fn every_rule_names_an_allowed_edge() {
    let loaded = load_governance(&shipped_dir()).unwrap();
    for (name, rule) in loaded.config.transition_rules() {
        let (from, to) = parse_rule_name(name).expect("rule name parses");
        assert!(
            from.can_transition_to(to),
            "rule {name} targets a disallowed transition"
        );
        assert!(!rule.conditions.is_empty(), "rule {name} has no conditions");
        for condition in &rule.conditions {
            assert!(
                matches!(condition.operator.as_str(), ">" | "<" | "==" | ">=" | "<="),
                "rule {name} uses unknown operator {}",
                condition.operator
            );
        }
    }
}

#[test]
fn escalation_and_recovery_paths_exist() {
    let loaded = load_governance(&shipped_dir()).unwrap();
    let names: Vec<&str> = loaded
        .config
        .transition_rules()
        .iter()
        .map(|(n, _)| n.as_str())
        .collect();
    assert!(names.contains(&"NORMAL_to_ALERT"));
    assert!(names.contains(&"ALERT_to_NORMAL"));
}

#[test]
fn every_role_has_a_model_definition() {
    let loaded = load_governance(&shipped_dir()).unwrap();
    for role in ModelRole::ALL {
        assert!(
            loaded.models.get(role).is_some(),
            "role {role} missing from the catalog"
        );
    }
}

#[test]
fn constraints_reference_catalog_roles_only() {
    let loaded = load_governance(&shipped_dir()).unwrap();
    for (mode, constraints) in &loaded.config.mode_constraints {
        for role in &constraints.allowed_roles {
            assert!(
                loaded.models.get(*role).is_some(),
                "mode {mode} allows role {role} with no model behind it"
            );
        }
        for role in constraints.max_tokens.keys() {
            assert!(
                constraints.allowed_roles.contains(role),
                "mode {mode} caps tokens for role {role} it does not allow"
            );
        }
    }
}

#[test]
fn builtin_tools_are_covered_by_policy() {
    let loaded = load_governance(&shipped_dir()).unwrap();
    for tool in ["read_file", "write_file", "list_directory", "system_health"] {
        assert!(
            loaded.config.tool_policy(tool).is_some(),
            "builtin tool {tool} has no policy"
        );
    }
    // Writes must never be possible in LOCKDOWN.
    assert!(!loaded.config.is_tool_allowed("write_file", Mode::Lockdown));
    // Diagnostics stay available everywhere.
    for mode in Mode::ALL {
        assert!(loaded.config.is_tool_allowed("system_health", mode));
    }
}
