//! Deterministic routing heuristics.
//!
//! Cheap pattern checks that classify the obvious cases (stack traces,
//! code, formal-proof language, explicit web intent) before any router
//! model runs. Each hit carries a confidence; the router only consults the
//! LLM when no heuristic clears its threshold.

use regex::Regex;
use std::sync::OnceLock;

use helm_domain::ModelRole;

#[derive(Debug, Clone)]
pub struct HeuristicHit {
    pub role: ModelRole,
    pub confidence: f64,
    pub reason: &'static str,
    pub detected_format: Option<&'static str>,
}

struct Rule {
    pattern: Regex,
    role: ModelRole,
    confidence: f64,
    reason: &'static str,
    detected_format: Option<&'static str>,
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            Rule {
                // Python/Rust/JVM stack-trace shapes.
                pattern: Regex::new(
                    r"(?m)(Traceback \(most recent call last\)|panicked at|^\s+at [\w$.]+\(.+:\d+\)|^\s*File \x22.+\x22, line \d+)",
                )
                .expect("static regex"),
                role: ModelRole::Coding,
                confidence: 0.95,
                reason: "stack trace detected",
                detected_format: Some("code"),
            },
            Rule {
                pattern: Regex::new(r"```|\b(fn |def |class |import |#include|pub struct)")
                    .expect("static regex"),
                role: ModelRole::Coding,
                confidence: 0.85,
                reason: "code markers detected",
                detected_format: Some("code"),
            },
            Rule {
                pattern: Regex::new(
                    r"(?i)\b(prove|proof|theorem|lemma|induction|contradiction|derive formally)\b",
                )
                .expect("static regex"),
                role: ModelRole::Reasoning,
                confidence: 0.85,
                reason: "formal reasoning cues",
                detected_format: None,
            },
            Rule {
                pattern: Regex::new(
                    r"(?i)\b(search the web|look (it )?up online|latest news|current price)\b",
                )
                .expect("static regex"),
                role: ModelRole::Standard,
                confidence: 0.8,
                reason: "explicit web intent",
                detected_format: None,
            },
        ]
    })
}

/// Return the strongest matching heuristic, if any.
pub fn apply_heuristics(message: &str) -> Option<HeuristicHit> {
    rules()
        .iter()
        .filter(|rule| rule.pattern.is_match(message))
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|rule| HeuristicHit {
            role: rule.role,
            confidence: rule.confidence,
            reason: rule.reason,
            detected_format: rule.detected_format,
        })
}
