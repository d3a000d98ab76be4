//! The operational-mode state machine.
//!
//! One `ModeManager` exists per process and is the only writer of the
//! current mode. Transitions are validated against the fixed mode table; a
//! rejected transition changes nothing. Rule evaluation takes at most one
//! transition per call, honoring rule declaration order.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;

use helm_domain::{
    GovernanceConfig, Mode, SensorSnapshot, TransitionRecord, TransitionRule,
};
use helm_telemetry::{events, EventLogger};

use crate::loader::parse_rule_name;

struct ModeState {
    current: Mode,
    history: Vec<TransitionRecord>,
}

pub struct ModeManager {
    state: RwLock<ModeState>,
    config: Arc<GovernanceConfig>,
    logger: EventLogger,
}

impl ModeManager {
    /// Managers always start in NORMAL.
    pub fn new(config: Arc<GovernanceConfig>, logger: EventLogger) -> Self {
        logger.info(
            "mode_manager_initialized",
            "mode_manager",
            None,
            json!({"initial_mode": Mode::Normal.as_str()}),
        );
        Self {
            state: RwLock::new(ModeState {
                current: Mode::Normal,
                history: Vec::new(),
            }),
            config,
            logger,
        }
    }

    pub fn current_mode(&self) -> Mode {
        self.state.read().current
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.state.read().history.clone()
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Scan transition rules whose source equals the current mode and take
    /// the first one whose conditions hold. Returns the new mode if a
    /// transition happened.
    pub fn evaluate_transitions(&self, snapshot: &SensorSnapshot) -> Option<Mode> {
        let current = self.current_mode();

        for (name, rule) in self.config.transition_rules() {
            let Some((source, target)) = parse_rule_name(name) else {
                // The loader already warned; skip defensively.
                continue;
            };
            if source != current {
                continue;
            }
            if check_rule(rule, snapshot) {
                let reason = format!("Transition rule '{name}' conditions met");
                if self.transition_to(target, &reason, Some(snapshot)) {
                    return Some(target);
                }
                // A matching rule with a disallowed target falls through:
                // one rejected rule must not shadow later applicable ones.
            }
        }
        None
    }

    /// Attempt a transition. Same-mode is a no-op (returns false);
    /// a target outside the allowed table is logged and rejected with no
    /// state change. A successful transition appends a history record and
    /// emits `mode_transition`.
    pub fn transition_to(
        &self,
        target: Mode,
        reason: &str,
        snapshot: Option<&SensorSnapshot>,
    ) -> bool {
        let mut state = self.state.write();

        if state.current == target {
            return false;
        }
        if !state.current.can_transition_to(target) {
            self.logger.warn(
                "transition_not_allowed",
                "mode_manager",
                None,
                json!({
                    "from_mode": state.current.as_str(),
                    "to_mode": target.as_str(),
                    "reason": reason,
                }),
            );
            return false;
        }

        let from = state.current;
        state.current = target;
        state.history.push(TransitionRecord {
            timestamp: Utc::now(),
            from_mode: from,
            to_mode: target,
            reason: reason.to_string(),
            sensor_snapshot: snapshot.cloned().unwrap_or_default(),
        });

        self.logger.info(
            events::MODE_TRANSITION,
            "mode_manager",
            None,
            json!({
                "from_mode": from.as_str(),
                "to_mode": target.as_str(),
                "reason": reason,
            }),
        );
        true
    }
}

/// Evaluate a rule against a snapshot per its `any`/`all` logic. Unknown
/// logic fails closed with a warning.
fn check_rule(rule: &TransitionRule, snapshot: &SensorSnapshot) -> bool {
    let results: Vec<bool> = rule
        .conditions
        .iter()
        .map(|condition| {
            match snapshot.get(&condition.metric) {
                // A metric absent from the snapshot cannot satisfy anything.
                None => false,
                Some(value) => evaluate_condition(&condition.operator, *value, condition.value),
            }
        })
        .collect();

    match rule.logic.as_str() {
        "any" => results.iter().any(|r| *r),
        "all" => !results.is_empty() && results.iter().all(|r| *r),
        other => {
            tracing::warn!(logic = %other, "unknown transition logic, failing closed");
            false
        }
    }
}

/// Unknown operators fail closed with a warning.
fn evaluate_condition(operator: &str, metric_value: f64, threshold: f64) -> bool {
    match operator {
        ">" => metric_value > threshold,
        "<" => metric_value < threshold,
        "==" => metric_value == threshold,
        ">=" => metric_value >= threshold,
        "<=" => metric_value <= threshold,
        other => {
            tracing::warn!(operator = %other, "unknown condition operator, failing closed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helm_domain::config::TelemetrySettings;
    use helm_domain::TransitionCondition;

    fn logger(dir: &std::path::Path) -> EventLogger {
        EventLogger::new(dir, &TelemetrySettings::default()).unwrap()
    }

    fn rule(metric: &str, operator: &str, value: f64, logic: &str) -> TransitionRule {
        TransitionRule {
            conditions: vec![TransitionCondition {
                metric: metric.into(),
                operator: operator.into(),
                value,
            }],
            logic: logic.into(),
        }
    }

    fn manager_with_rules(
        rules: Vec<(String, TransitionRule)>,
        dir: &std::path::Path,
    ) -> ModeManager {
        let config = GovernanceConfig {
            transition_rules: rules,
            ..GovernanceConfig::default()
        };
        ModeManager::new(Arc::new(config), logger(dir))
    }

    fn snapshot(pairs: &[(&str, f64)]) -> SensorSnapshot {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn every_disallowed_pair_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        for from in Mode::ALL {
            for to in Mode::ALL {
                if from.can_transition_to(to) || from == to {
                    continue;
                }
                let manager = manager_with_rules(vec![], dir.path());
                // Walk the manager into `from` through allowed edges.
                force_mode(&manager, from);
                let history_before = manager.history().len();

                assert!(!manager.transition_to(to, "test", None));
                assert_eq!(manager.current_mode(), from);
                assert_eq!(manager.history().len(), history_before);
            }
        }
    }

    #[test]
    fn every_allowed_pair_changes_state_and_appends_record() {
        let dir = tempfile::tempdir().unwrap();
        for from in Mode::ALL {
            for to in from.allowed_targets() {
                let manager = manager_with_rules(vec![], dir.path());
                force_mode(&manager, from);
                let history_before = manager.history().len();

                assert!(manager.transition_to(*to, "test", None));
                assert_eq!(manager.current_mode(), *to);
                let history = manager.history();
                assert_eq!(history.len(), history_before + 1);
                let record = history.last().unwrap();
                assert_eq!(record.from_mode, from);
                assert_eq!(record.to_mode, *to);
            }
        }
    }

    /// Drive the manager along allowed edges to reach an arbitrary mode.
    fn force_mode(manager: &ModeManager, target: Mode) {
        let path: &[Mode] = match target {
            Mode::Normal => &[],
            Mode::Alert => &[Mode::Alert],
            Mode::Degraded => &[Mode::Degraded],
            Mode::Lockdown => &[Mode::Alert, Mode::Lockdown],
            Mode::Recovery => &[Mode::Alert, Mode::Lockdown, Mode::Recovery],
        };
        for step in path {
            assert!(manager.transition_to(*step, "setup", None));
        }
        assert_eq!(manager.current_mode(), target);
    }

    #[test]
    fn same_mode_transition_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_rules(vec![], dir.path());
        assert!(!manager.transition_to(Mode::Normal, "noop", None));
        assert!(manager.history().is_empty());
    }

    #[test]
    fn only_first_matching_rule_fires() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_rules(
            vec![
                ("NORMAL_to_ALERT".into(), rule("perf_system_cpu_load", ">", 85.0, "any")),
                ("NORMAL_to_DEGRADED".into(), rule("perf_system_cpu_load", ">", 80.0, "any")),
            ],
            dir.path(),
        );

        // Both rules match; only the first takes effect.
        let taken = manager.evaluate_transitions(&snapshot(&[("perf_system_cpu_load", 90.0)]));
        assert_eq!(taken, Some(Mode::Alert));
        assert_eq!(manager.current_mode(), Mode::Alert);
        assert_eq!(manager.history().len(), 1);
    }

    #[test]
    fn alert_recovers_to_normal_when_load_drops() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_rules(
            vec![
                ("NORMAL_to_ALERT".into(), rule("perf_system_cpu_load", ">", 85.0, "any")),
                ("ALERT_to_NORMAL".into(), rule("perf_system_cpu_load", "<", 50.0, "any")),
            ],
            dir.path(),
        );

        assert_eq!(
            manager.evaluate_transitions(&snapshot(&[("perf_system_cpu_load", 90.0)])),
            Some(Mode::Alert)
        );
        assert_eq!(
            manager.evaluate_transitions(&snapshot(&[("perf_system_cpu_load", 30.0)])),
            Some(Mode::Normal)
        );
        assert_eq!(manager.current_mode(), Mode::Normal);
    }

    #[test]
    fn missing_metric_fails_the_condition() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_rules(
            vec![("NORMAL_to_ALERT".into(), rule("perf_system_cpu_load", ">", 85.0, "any"))],
            dir.path(),
        );
        assert_eq!(manager.evaluate_transitions(&snapshot(&[("other", 99.0)])), None);
        assert_eq!(manager.current_mode(), Mode::Normal);
    }

    #[test]
    fn unknown_operator_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_rules(
            vec![("NORMAL_to_ALERT".into(), rule("perf_system_cpu_load", "~=", 85.0, "any"))],
            dir.path(),
        );
        assert_eq!(
            manager.evaluate_transitions(&snapshot(&[("perf_system_cpu_load", 90.0)])),
            None
        );
    }

    #[test]
    fn unknown_logic_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with_rules(
            vec![("NORMAL_to_ALERT".into(), rule("perf_system_cpu_load", ">", 85.0, "xor"))],
            dir.path(),
        );
        assert_eq!(
            manager.evaluate_transitions(&snapshot(&[("perf_system_cpu_load", 90.0)])),
            None
        );
    }

    #[test]
    fn all_logic_requires_every_condition() {
        let dir = tempfile::tempdir().unwrap();
        let all_rule = TransitionRule {
            conditions: vec![
                TransitionCondition {
                    metric: "perf_system_cpu_load".into(),
                    operator: ">".into(),
                    value: 85.0,
                },
                TransitionCondition {
                    metric: "perf_system_mem_used".into(),
                    operator: ">".into(),
                    value: 90.0,
                },
            ],
            logic: "all".into(),
        };
        let manager =
            manager_with_rules(vec![("NORMAL_to_ALERT".into(), all_rule)], dir.path());

        assert_eq!(
            manager.evaluate_transitions(&snapshot(&[
                ("perf_system_cpu_load", 90.0),
                ("perf_system_mem_used", 50.0),
            ])),
            None
        );
        assert_eq!(
            manager.evaluate_transitions(&snapshot(&[
                ("perf_system_cpu_load", 90.0),
                ("perf_system_mem_used", 95.0),
            ])),
            Some(Mode::Alert)
        );
    }
}
