//! The policy-checked tool execution path.
//!
//! `execute` never panics and never raises: every failure mode (unknown
//! tool, mode denial, path policy, bad arguments, timeout, tool error)
//! comes back as a failed `ToolResult`. Denials happen before any side
//! effect and are visible as `policy_violation` telemetry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use helm_domain::{GovernanceConfig, Mode, ToolDefinition, ToolPolicy, ToolResult, TraceContext};
use helm_governance::ModeManager;
use helm_telemetry::{events, EventLogger};

use crate::registry::{Executor, ToolRegistry};

/// Where the executor reads the current operational mode from.
pub trait ModeSource: Send + Sync {
    fn current_mode(&self) -> Mode;
}

impl ModeSource for ModeManager {
    fn current_mode(&self) -> Mode {
        ModeManager::current_mode(self)
    }
}

struct PermissionCheck {
    allowed: bool,
    reason: String,
}

impl PermissionCheck {
    fn allow() -> Self {
        Self { allowed: true, reason: String::new() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: reason.into() }
    }
}

pub struct ToolExecutionLayer {
    registry: Arc<ToolRegistry>,
    governance: Arc<GovernanceConfig>,
    mode: Arc<dyn ModeSource>,
    logger: EventLogger,
    /// Per-tool call timestamps within the trailing hour.
    call_history: Mutex<HashMap<String, Vec<Instant>>>,
}

impl ToolExecutionLayer {
    pub fn new(
        registry: Arc<ToolRegistry>,
        governance: Arc<GovernanceConfig>,
        mode: Arc<dyn ModeSource>,
        logger: EventLogger,
    ) -> Self {
        Self {
            registry,
            governance,
            mode,
            logger,
            call_history: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a named tool with governance, validation, and telemetry.
    pub async fn execute(&self, name: &str, arguments: Value, trace: &TraceContext) -> ToolResult {
        // 1. Lookup.
        let Some((definition, executor)) = self.registry.get(name) else {
            let error = format!(
                "Tool '{name}' not found. Available: {}",
                self.registry.list_names().join(", ")
            );
            self.logger.warn(
                events::TOOL_CALL_FAILED,
                "tools",
                Some(trace),
                json!({"tool_name": name, "error": error}),
            );
            return ToolResult::failure(name, error, 0);
        };

        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return self.deny(name, trace, format!("arguments must be an object, got {other}"))
            }
        };

        // 2. Permission check.
        let current_mode = self.mode.current_mode();
        let check = self.check_permissions(&definition, &arguments, current_mode);
        if !check.allowed {
            self.logger.warn(
                events::POLICY_VIOLATION,
                "tools",
                Some(trace),
                json!({
                    "tool_name": name,
                    "reason": check.reason,
                    "mode": current_mode.as_str(),
                }),
            );
            return ToolResult::failure(name, format!("Permission denied: {}", check.reason), 0);
        }

        // 3. Argument filter: drop unknown keys, fill declared defaults,
        //    fail on missing required keys.
        let filtered = match self.filter_arguments(&definition, arguments, trace) {
            Ok(filtered) => filtered,
            Err(error) => {
                self.logger.warn(
                    events::TOOL_CALL_FAILED,
                    "tools",
                    Some(trace),
                    json!({"tool_name": name, "error": error}),
                );
                return ToolResult::failure(name, error, 0);
            }
        };

        self.record_call(name);

        // 4. Run with telemetry and a deadline.
        let (_, span_id) = trace.new_span();
        self.logger.info(
            events::TOOL_CALL_STARTED,
            "tools",
            Some(trace),
            json!({
                "tool_name": name,
                "arguments": Value::Object(filtered.clone()),
                "span_id": span_id.to_string(),
            }),
        );

        let started = Instant::now();
        let deadline = Duration::from_secs(definition.timeout_seconds);
        let outcome = match executor {
            Executor::Async(tool) => {
                tokio::time::timeout(deadline, tool.run(filtered)).await
            }
            Executor::Sync(tool) => {
                let task = tokio::task::spawn_blocking(move || (*tool)(filtered));
                match tokio::time::timeout(deadline, task).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(join_error)) => Ok(Err(format!("tool panicked: {join_error}"))),
                    Err(elapsed) => Err(elapsed),
                }
            }
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(output)) => {
                self.logger.info(
                    events::TOOL_CALL_COMPLETED,
                    "tools",
                    Some(trace),
                    json!({
                        "tool_name": name,
                        "success": true,
                        "latency_ms": latency_ms,
                        "span_id": span_id.to_string(),
                    }),
                );
                ToolResult::success(name, output, latency_ms)
            }
            Ok(Err(error)) => {
                self.logger.error(
                    events::TOOL_CALL_FAILED,
                    "tools",
                    Some(trace),
                    json!({
                        "tool_name": name,
                        "error": error,
                        "latency_ms": latency_ms,
                        "span_id": span_id.to_string(),
                    }),
                );
                ToolResult::failure(name, error, latency_ms)
            }
            Err(_) => {
                let error = format!(
                    "tool timed out after {}s",
                    definition.timeout_seconds
                );
                self.logger.error(
                    events::TOOL_CALL_FAILED,
                    "tools",
                    Some(trace),
                    json!({
                        "tool_name": name,
                        "error": error,
                        "latency_ms": latency_ms,
                        "span_id": span_id.to_string(),
                    }),
                );
                ToolResult::failure(name, error, latency_ms)
            }
        }
    }

    fn deny(&self, name: &str, trace: &TraceContext, reason: String) -> ToolResult {
        self.logger.warn(
            events::TOOL_CALL_FAILED,
            "tools",
            Some(trace),
            json!({"tool_name": name, "error": reason}),
        );
        ToolResult::failure(name, reason, 0)
    }

    // ── Permission checks ──────────────────────────────────────────

    fn check_permissions(
        &self,
        definition: &ToolDefinition,
        arguments: &Map<String, Value>,
        mode: Mode,
    ) -> PermissionCheck {
        if !definition.allowed_modes.contains(&mode) {
            return PermissionCheck::deny(format!(
                "Tool not allowed in {} mode",
                mode.as_str()
            ));
        }
        if !self.governance.is_tool_allowed(&definition.name, mode) {
            return PermissionCheck::deny(format!(
                "Tool forbidden in {} mode",
                mode.as_str()
            ));
        }

        let policy = self.governance.tool_policy(&definition.name);

        if let Some(policy) = policy {
            if let Some(check) = check_path_policy(policy, arguments) {
                return check;
            }
        }

        // Rate limit: the tool definition's own limit, or the policy's.
        let limit = definition
            .rate_limit_per_hour
            .or(policy.and_then(|p| p.rate_limit_per_hour));
        if let Some(limit) = limit {
            if self.calls_in_last_hour(&definition.name) >= limit as usize {
                return PermissionCheck::deny(format!(
                    "Rate limit exceeded: {limit} calls per hour"
                ));
            }
        }

        PermissionCheck::allow()
    }

    fn calls_in_last_hour(&self, name: &str) -> usize {
        let mut history = self.call_history.lock();
        let calls = history.entry(name.to_string()).or_default();
        let hour_ago = Instant::now() - Duration::from_secs(3600);
        calls.retain(|at| *at > hour_ago);
        calls.len()
    }

    fn record_call(&self, name: &str) {
        self.call_history
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Instant::now());
    }

    // ── Argument filtering ─────────────────────────────────────────

    fn filter_arguments(
        &self,
        definition: &ToolDefinition,
        arguments: Map<String, Value>,
        trace: &TraceContext,
    ) -> std::result::Result<Map<String, Value>, String> {
        let valid: std::collections::HashSet<&str> = definition.parameter_names().collect();

        let mut filtered = Map::new();
        let mut dropped = Vec::new();
        for (key, value) in arguments {
            if valid.contains(key.as_str()) {
                filtered.insert(key, value);
            } else {
                dropped.push(key);
            }
        }
        if !dropped.is_empty() {
            self.logger.warn(
                "tool_call_invalid_parameters_filtered",
                "tools",
                Some(trace),
                json!({
                    "tool_name": definition.name,
                    "invalid_parameters": dropped,
                }),
            );
        }

        for param in &definition.parameters {
            if filtered.contains_key(&param.name) {
                continue;
            }
            if param.required {
                return Err(format!("missing required argument '{}'", param.name));
            }
            if let Some(default) = &param.default {
                filtered.insert(param.name.clone(), default.clone());
            }
        }

        Ok(filtered)
    }
}

/// Validate the `path` argument against the policy's glob lists:
/// `forbidden_paths` first, then `allowed_paths` (which, when non-empty,
/// must match). File-size caps apply to already-existing targets.
fn check_path_policy(
    policy: &ToolPolicy,
    arguments: &Map<String, Value>,
) -> Option<PermissionCheck> {
    let path = match arguments.get("path") {
        Some(Value::String(path)) => path.as_str(),
        Some(_) => return Some(PermissionCheck::deny("Path must be a string")),
        None => return None,
    };
    let expanded = expand_path(path);

    if matches_any(&policy.forbidden_paths, &expanded) {
        return Some(PermissionCheck::deny(format!(
            "Path {path} is in forbidden paths"
        )));
    }
    if !policy.allowed_paths.is_empty() && !matches_any(&policy.allowed_paths, &expanded) {
        return Some(PermissionCheck::deny(format!(
            "Path {path} is not in allowed paths"
        )));
    }

    if let Some(max_mb) = policy.max_file_size_mb {
        if let Ok(metadata) = std::fs::metadata(&expanded) {
            let size_mb = metadata.len() / (1024 * 1024);
            if size_mb > max_mb {
                return Some(PermissionCheck::deny(format!(
                    "File is {size_mb} MB, exceeds limit of {max_mb} MB"
                )));
            }
        }
    }

    None
}

fn matches_any(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|pattern| {
        let expanded = expand_path(pattern);
        match glob::Pattern::new(&expanded) {
            Ok(pattern) => pattern.matches(path),
            Err(e) => {
                tracing::warn!(pattern = %expanded, error = %e, "invalid path pattern");
                false
            }
        }
    })
}

/// Expand a leading `~` and `$VAR` references.
fn expand_path(path: &str) -> String {
    let mut expanded = path.to_string();
    if let Some(rest) = expanded.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            expanded = format!("{home}{rest}");
        }
    }
    while let Some(start) = expanded.find('$') {
        let tail = &expanded[start + 1..];
        let end = tail
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(tail.len());
        if end == 0 {
            break;
        }
        let var = &tail[..end];
        let replacement = std::env::var(var).unwrap_or_default();
        expanded = format!("{}{}{}", &expanded[..start], replacement, &tail[end..]);
    }
    expanded
}
