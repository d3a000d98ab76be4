//! The orchestrator state machine.
//!
//! One request flows INIT → PLANNING → LLM_CALL ⇄ TOOL_EXECUTION →
//! SYNTHESIS → COMPLETED, with FAILED absorbing every error. The tool loop
//! is bounded two ways: a per-request iteration cap and a per-signature
//! repeat cap; capped calls receive synthetic tool results instead of
//! executing. Errors never escape to the caller; a user-facing reply comes
//! back in every case.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use helm_captains_log::capture::write_capture;
use helm_captains_log::reflection::ReflectionInput;
use helm_captains_log::{ReflectionPipeline, TaskCapture};
use helm_domain::{
    ChatMessage, Channel, Error, GovernanceConfig, ModelRole, Result, RoutingDecision,
    RoutingResult,
};
use helm_llm::client::{CallOptions, ChatModel};
use helm_llm::{LlmResponse, Router};
use helm_memory::{extract_entities, MemoryGraph, MemoryQuery};
use helm_sensors::{RequestMonitor, SensorHub};
use helm_telemetry::{events, EventLogger};
use helm_tools::{ModeSource, ToolExecutionLayer, ToolRegistry};

use crate::context::{canonical_signature, ExecutionContext, TaskState};
use crate::normalize::normalize_conversation;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration and result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_tool_iterations: usize,
    pub max_repeated_tool_calls: usize,
    /// Appended after tool rounds to suppress deliberation on synthesis
    /// turns. Empty disables the nudge.
    pub no_think_suffix: String,
    pub monitor_interval: Duration,
    pub include_gpu: bool,
    /// Conversations injected from the memory graph; 0 disables enrichment.
    pub memory_enrichment_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 3,
            max_repeated_tool_calls: 1,
            no_think_suffix: "/no_think".into(),
            monitor_interval: Duration::from_secs(5),
            include_gpu: true,
            memory_enrichment_limit: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorStep {
    pub step_type: String,
    pub description: String,
}

#[derive(Debug)]
pub struct OrchestratorResult {
    pub reply: String,
    pub trace_id: String,
    pub state: TaskState,
    pub steps: Vec<OrchestratorStep>,
    pub tool_iterations: usize,
}

/// Decrements the in-flight counter when a request ends, even on panic.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    llm: Arc<dyn ChatModel>,
    router: Arc<Router>,
    tools: Arc<ToolExecutionLayer>,
    registry: Arc<ToolRegistry>,
    governance: Arc<GovernanceConfig>,
    mode: Arc<dyn ModeSource>,
    hub: Arc<SensorHub>,
    logger: EventLogger,
    config: OrchestratorConfig,
    memory: Option<Arc<dyn MemoryGraph>>,
    reflection: Option<Arc<ReflectionPipeline>>,
    captures_dir: Option<PathBuf>,
    completion_hooks: Vec<Arc<dyn Fn() + Send + Sync>>,
    in_flight: Arc<AtomicUsize>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<dyn ChatModel>,
        router: Arc<Router>,
        tools: Arc<ToolExecutionLayer>,
        registry: Arc<ToolRegistry>,
        governance: Arc<GovernanceConfig>,
        mode: Arc<dyn ModeSource>,
        hub: Arc<SensorHub>,
        logger: EventLogger,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            router,
            tools,
            registry,
            governance,
            mode,
            hub,
            logger,
            config,
            memory: None,
            reflection: None,
            captures_dir: None,
            completion_hooks: Vec::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryGraph>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_reflection(mut self, reflection: Arc<ReflectionPipeline>) -> Self {
        self.reflection = Some(reflection);
        self
    }

    pub fn with_captures_dir(mut self, dir: PathBuf) -> Self {
        self.captures_dir = Some(dir);
        self
    }

    /// Invoked after every finished request (success or failure); used for
    /// the scheduler's `record_request`.
    pub fn add_completion_hook(&mut self, hook: Arc<dyn Fn() + Send + Sync>) {
        self.completion_hooks.push(hook);
    }

    /// Handle one user request to completion. Always returns a reply.
    pub async fn handle_request(
        &self,
        session_id: &str,
        user_message: &str,
        channel: Channel,
    ) -> OrchestratorResult {
        let mode = self.mode.current_mode();
        let mut ctx = ExecutionContext::new(session_id, user_message, mode, channel);
        let mut steps: Vec<OrchestratorStep> = Vec::new();
        let started = Instant::now();

        self.logger.info(
            events::REQUEST_RECEIVED,
            "orchestrator",
            Some(&ctx.trace),
            json!({
                "session_id": session_id,
                "channel": channel,
                "mode": mode.as_str(),
            }),
        );

        // Concurrency cap: fail fast past the mode's task budget.
        let cap = self.governance.max_concurrent_tasks(mode).max(1);
        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= cap {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.logger.warn(
                events::POLICY_VIOLATION,
                "orchestrator",
                Some(&ctx.trace),
                json!({
                    "reason": "max_concurrent_tasks exceeded",
                    "mode": mode.as_str(),
                    "limit": cap,
                }),
            );
            ctx.state = TaskState::Failed;
            return OrchestratorResult {
                reply: format!(
                    "I'm at my concurrent task limit in {} mode; please retry in a moment.",
                    mode.as_str()
                ),
                trace_id: ctx.trace.trace_id.to_string(),
                state: TaskState::Failed,
                steps,
                tool_iterations: 0,
            };
        }
        let _guard = InFlightGuard(self.in_flight.clone());

        self.logger.info(
            events::TASK_STARTED,
            "orchestrator",
            Some(&ctx.trace),
            json!({"state": ctx.state.as_str()}),
        );

        // Background monitor, unless the mode disables it.
        let monitoring_enabled = self
            .governance
            .mode_definition(mode)
            .map(|d| d.background_monitoring_enabled)
            .unwrap_or(true);
        let mut monitor = if monitoring_enabled {
            let mut monitor = RequestMonitor::new(
                ctx.trace.clone(),
                self.config.monitor_interval,
                self.config.include_gpu,
                self.hub.clone(),
                self.logger.clone(),
            );
            match monitor.start() {
                Ok(()) => Some(monitor),
                Err(e) => {
                    tracing::warn!(error = %e, "request monitor failed to start");
                    None
                }
            }
        } else {
            None
        };

        self.enrich_from_memory(&mut ctx).await;

        let outcome = self.run_state_machine(&mut ctx, &mut steps).await;

        if let Some(monitor) = monitor.as_mut() {
            match monitor.stop().await {
                Ok(summary) => ctx.metrics_summary = Some(summary),
                Err(e) => tracing::warn!(error = %e, "request monitor failed to stop"),
            }
        }

        let result = match outcome {
            Ok(reply) => {
                ctx.final_reply = Some(reply.clone());
                self.transition(&mut ctx, TaskState::Completed);
                self.logger.info(
                    events::TASK_COMPLETED,
                    "orchestrator",
                    Some(&ctx.trace),
                    json!({
                        "steps": steps.len(),
                        "tool_iterations": ctx.tool_iteration_count,
                        "duration_ms": started.elapsed().as_millis() as u64,
                    }),
                );
                self.logger.info(
                    events::REPLY_READY,
                    "orchestrator",
                    Some(&ctx.trace),
                    json!({"reply_length": reply.len()}),
                );
                OrchestratorResult {
                    reply,
                    trace_id: ctx.trace.trace_id.to_string(),
                    state: TaskState::Completed,
                    steps,
                    tool_iterations: ctx.tool_iteration_count,
                }
            }
            Err(e) => {
                let sanitized = sanitize_error(&e);
                ctx.error = Some(sanitized.clone());
                ctx.state = TaskState::Failed;
                self.logger.error(
                    events::TASK_FAILED,
                    "orchestrator",
                    Some(&ctx.trace),
                    json!({
                        "error": sanitized,
                        "duration_ms": started.elapsed().as_millis() as u64,
                    }),
                );
                let reply = match &e {
                    Error::Policy(reason) => {
                        format!("I can't do that right now: {reason}")
                    }
                    _ => format!("I ran into a problem completing this request ({sanitized})."),
                };
                ctx.final_reply = Some(reply.clone());
                OrchestratorResult {
                    reply,
                    trace_id: ctx.trace.trace_id.to_string(),
                    state: TaskState::Failed,
                    steps,
                    tool_iterations: ctx.tool_iteration_count,
                }
            }
        };

        self.enqueue_background(&ctx, &result, started.elapsed());
        for hook in &self.completion_hooks {
            (**hook)();
        }
        result
    }

    // ── State machine ──────────────────────────────────────────────

    async fn run_state_machine(
        &self,
        ctx: &mut ExecutionContext,
        steps: &mut Vec<OrchestratorStep>,
    ) -> Result<String> {
        // PLANNING: pick the role.
        self.transition(ctx, TaskState::Planning);
        let routing = self.router.route(&ctx.user_message, &ctx.trace).await;
        let role = self.resolve_role(&routing, ctx)?;
        ctx.selected_role = Some(role);
        steps.push(OrchestratorStep {
            step_type: "plan".into(),
            description: format!(
                "routed to {role} (confidence {:.2}): {}",
                routing.confidence, routing.reason
            ),
        });
        let handled_response = match (&routing.decision, &routing.response) {
            (RoutingDecision::Handle, Some(response)) if !response.trim().is_empty() => {
                Some(response.clone())
            }
            _ => None,
        };
        ctx.routing_history.push(routing);

        // The router answered directly; nothing left to call.
        if let Some(response) = handled_response {
            self.transition(ctx, TaskState::Synthesis);
            steps.push(OrchestratorStep {
                step_type: "summary".into(),
                description: "router handled the request directly".into(),
            });
            return Ok(response);
        }

        let tool_definitions = self.registry.definitions();
        let constraints = self.governance.mode_constraints(ctx.mode);
        let max_tokens = constraints.and_then(|c| c.max_tokens.get(&role).copied());
        let temperature = constraints.and_then(|c| c.temperature.get(&role).copied());
        let timeout = constraints
            .and_then(|c| c.timeout_seconds.get(&role).copied())
            .map(Duration::from_secs);

        // LLM_CALL ⇄ TOOL_EXECUTION. The round cap is a backstop against a
        // model that keeps requesting tools after every call is capped.
        let max_rounds = self.config.max_tool_iterations + 2;
        self.transition(ctx, TaskState::LlmCall);
        for _round in 0..max_rounds {
            let messages = normalize_conversation(&ctx.messages);
            let options = CallOptions {
                tools: (!tool_definitions.is_empty()).then(|| tool_definitions.clone()),
                max_tokens,
                temperature,
                timeout,
                purpose: Some("chat".into()),
                ..CallOptions::default()
            };
            let response = self.llm.respond(role, messages, options, &ctx.trace).await?;
            ctx.last_response_id = response.response_id.clone();
            steps.push(OrchestratorStep {
                step_type: "llm_call".into(),
                description: format!(
                    "{role}: {} tool calls, {} chars",
                    response.tool_calls.len(),
                    response.content.len()
                ),
            });

            if !response.has_tool_calls() {
                self.transition(ctx, TaskState::Synthesis);
                return Ok(self.synthesize(ctx, &response, steps));
            }

            self.transition(ctx, TaskState::ToolExecution);
            self.execute_tool_round(ctx, &response, steps).await;
            append_no_think_nudge(&mut ctx.messages, &self.config.no_think_suffix);
            self.transition(ctx, TaskState::LlmCall);
        }

        // Round cap hit with tool calls still coming; synthesize from what
        // the tools produced.
        self.transition(ctx, TaskState::Synthesis);
        Ok(fallback_reply_from_tool_results(ctx))
    }

    /// Execute (or cap) every tool call in one assistant turn.
    async fn execute_tool_round(
        &self,
        ctx: &mut ExecutionContext,
        response: &LlmResponse,
        steps: &mut Vec<OrchestratorStep>,
    ) {
        ctx.messages.push(ChatMessage::assistant_with_tool_calls(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        for call in &response.tool_calls {
            let signature = canonical_signature(&call.name, &call.arguments);
            let call_id = if call.id.is_empty() {
                format!("call-{}", ctx.tool_call_signatures.len())
            } else {
                call.id.clone()
            };

            if ctx.tool_iteration_count >= self.config.max_tool_iterations {
                let note = json!({
                    "success": false,
                    "skipped": true,
                    "error": format!(
                        "Tool iteration limit of {} reached for this request; answer with the information gathered so far.",
                        self.config.max_tool_iterations
                    ),
                });
                ctx.messages.push(ChatMessage::tool_result(call_id, note.to_string()));
                steps.push(OrchestratorStep {
                    step_type: "warning".into(),
                    description: format!("capped tool call {} (iteration limit)", call.name),
                });
                continue;
            }
            if ctx.signature_count(&signature) >= self.config.max_repeated_tool_calls {
                let note = json!({
                    "success": false,
                    "skipped": true,
                    "error": format!(
                        "Repeated call to {} with identical arguments was suppressed; use the earlier result.",
                        call.name
                    ),
                });
                ctx.messages.push(ChatMessage::tool_result(call_id, note.to_string()));
                steps.push(OrchestratorStep {
                    step_type: "warning".into(),
                    description: format!("capped repeated tool call {}", call.name),
                });
                continue;
            }

            let result = self
                .tools
                .execute(&call.name, call.arguments.clone(), &ctx.trace)
                .await;
            ctx.tool_iteration_count += 1;
            ctx.tool_call_signatures.push(signature);

            let payload = serde_json::to_string(&result)
                .unwrap_or_else(|_| "{\"success\": false}".into());
            ctx.messages.push(ChatMessage::tool_result(call_id, payload));
            steps.push(OrchestratorStep {
                step_type: "tool_call".into(),
                description: format!(
                    "{} ({})",
                    call.name,
                    if result.success { "ok" } else { "failed" }
                ),
            });
            ctx.tool_results.push(result);
        }
    }

    /// SYNTHESIS: extract the reply text, falling back to a deterministic
    /// tool-result summary when the model came back empty after tools.
    fn synthesize(
        &self,
        ctx: &ExecutionContext,
        response: &LlmResponse,
        steps: &mut Vec<OrchestratorStep>,
    ) -> String {
        let text = unwrap_embedded_response_json(response.effective_text());
        if !text.trim().is_empty() {
            return text;
        }
        if !ctx.tool_results.is_empty() {
            steps.push(OrchestratorStep {
                step_type: "summary".into(),
                description: "model returned no text; built summary from tool results".into(),
            });
            return fallback_reply_from_tool_results(ctx);
        }
        "I wasn't able to produce a reply for this request. Try rephrasing it.".into()
    }

    /// Validate the routed role against the mode's model constraints.
    /// A disallowed role degrades to STANDARD when that is allowed,
    /// otherwise the request is a policy failure.
    fn resolve_role(&self, routing: &RoutingResult, ctx: &ExecutionContext) -> Result<ModelRole> {
        let role = routing.effective_role();
        let Some(constraints) = self.governance.mode_constraints(ctx.mode) else {
            return Ok(role);
        };
        if constraints.allowed_roles.is_empty() || constraints.allowed_roles.contains(&role) {
            return Ok(role);
        }
        if constraints.allowed_roles.contains(&ModelRole::Standard) {
            self.logger.warn(
                events::POLICY_VIOLATION,
                "orchestrator",
                Some(&ctx.trace),
                json!({
                    "reason": format!("role {role} not allowed in {} mode, degrading to STANDARD", ctx.mode),
                }),
            );
            return Ok(ModelRole::Standard);
        }
        Err(Error::Policy(format!(
            "no permitted model role in {} mode",
            ctx.mode.as_str()
        )))
    }

    fn transition(&self, ctx: &mut ExecutionContext, to: TaskState) {
        let from = ctx.state;
        ctx.state = to;
        self.logger.info(
            events::STATE_TRANSITION,
            "orchestrator",
            Some(&ctx.trace),
            json!({"from": from.as_str(), "to": to.as_str()}),
        );
    }

    // ── Memory enrichment ──────────────────────────────────────────

    /// Inject related past conversations as a leading system message. The
    /// router never sees this; it routes on the raw user message.
    async fn enrich_from_memory(&self, ctx: &mut ExecutionContext) {
        let Some(graph) = &self.memory else { return };
        if self.config.memory_enrichment_limit == 0 {
            return;
        }
        let entities = extract_entities(&ctx.user_message, 5);
        if entities.is_empty() {
            return;
        }

        let query = MemoryQuery::for_entities(entities, self.config.memory_enrichment_limit);
        match graph.query_memory(query).await {
            Ok(result) if !result.conversations.is_empty() => {
                let mut snippet = String::from("Relevant context from past conversations:\n");
                for conversation in &result.conversations {
                    snippet.push_str(&format!(
                        "- [{}] user: {}",
                        conversation.timestamp.format("%Y-%m-%d"),
                        truncate(&conversation.user_message, 120),
                    ));
                    if let Some(reply) = &conversation.assistant_response {
                        snippet.push_str(&format!(" / reply: {}", truncate(reply, 120)));
                    }
                    snippet.push('\n');
                }
                ctx.messages.insert(0, ChatMessage::system(snippet));
                ctx.memory_context = Some(result.conversations);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "memory enrichment skipped"),
        }
    }

    // ── Completion ─────────────────────────────────────────────────

    /// Persist the capture and enqueue the reflection in the background;
    /// neither can fail the request.
    fn enqueue_background(
        &self,
        ctx: &ExecutionContext,
        result: &OrchestratorResult,
        elapsed: Duration,
    ) {
        let capture = TaskCapture {
            trace_id: ctx.trace.trace_id.to_string(),
            timestamp: chrono::Utc::now(),
            session_id: ctx.session_id.clone(),
            user_message: ctx.user_message.clone(),
            reply: result.reply.clone(),
            final_state: result.state.as_str().to_uppercase(),
            steps_count: result.steps.len(),
            tool_names: {
                let mut names: Vec<String> =
                    ctx.tool_results.iter().map(|r| r.tool_name.clone()).collect();
                names.dedup();
                names
            },
            model_roles: ctx
                .selected_role
                .map(|role| vec![role.as_str().to_string()])
                .unwrap_or_default(),
            duration_ms: elapsed.as_millis() as u64,
            key_entities: extract_entities(&ctx.user_message, 10),
        };

        let reflection_input = ReflectionInput {
            user_message: ctx.user_message.clone(),
            trace_id: ctx.trace.trace_id.to_string(),
            steps_count: result.steps.len(),
            final_state: result.state.as_str().to_uppercase(),
            reply_length: result.reply.len(),
            metrics_summary: ctx.metrics_summary.clone(),
        };

        let captures_dir = self.captures_dir.clone();
        let reflection = self.reflection.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            if let Some(dir) = captures_dir {
                if let Err(e) = write_capture(&dir, &capture, &logger) {
                    tracing::warn!(error = %e, "task capture write failed");
                }
            }
            if let Some(pipeline) = reflection {
                if let Err(e) = pipeline.reflect(reflection_input).await {
                    tracing::warn!(error = %e, "reflection generation failed");
                }
            }
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append the no-think suffix as the final text of the prompt without
/// breaking user/assistant alternation: extend a trailing user message, or
/// append a short user nudge otherwise.
fn append_no_think_nudge(messages: &mut Vec<ChatMessage>, suffix: &str) {
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return;
    }
    if let Some(last) = messages.last_mut() {
        if last.role == helm_domain::Role::User {
            if !last.content.trim_end().ends_with(suffix) {
                last.content = format!("{}\n{suffix}", last.content.trim_end());
            }
            return;
        }
    }
    messages.push(ChatMessage::user(format!(
        "Return the final answer now. {suffix}"
    )));
}

/// Deterministic summary of the last ≤3 tool results, used when the model
/// fails to synthesize after running tools.
fn fallback_reply_from_tool_results(ctx: &ExecutionContext) -> String {
    if ctx.tool_results.is_empty() {
        return "I attempted to use tools, but couldn't produce a final answer. \
                Try rephrasing your request."
            .into();
    }

    let mut lines = vec![
        "I couldn't synthesize a final answer, but here are the latest tool results:".to_string(),
    ];
    let start = ctx.tool_results.len().saturating_sub(3);
    for result in &ctx.tool_results[start..] {
        if result.success {
            lines.push(format!("- {}: success", result.tool_name));
        } else {
            lines.push(format!(
                "- {}: failed ({})",
                result.tool_name,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    lines.join("\n")
}

/// Models sometimes emit router-style JSON with a `response` field instead
/// of plain text; unwrap it when present.
fn unwrap_embedded_response_json(content: &str) -> String {
    let candidate = helm_llm::adapters::strip_markdown_fences(content);
    if candidate.starts_with('{') && candidate.ends_with('}') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(candidate) {
            if let Some(response) = value.get("response").and_then(serde_json::Value::as_str) {
                if !response.trim().is_empty() {
                    return response.trim().to_string();
                }
            }
        }
    }
    content.trim().to_string()
}

fn sanitize_error(error: &Error) -> String {
    let text = error.to_string();
    let first_line = text.lines().next().unwrap_or("");
    truncate(first_line, 200)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(max_chars).collect();
        format!("{prefix}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helm_domain::config::TelemetrySettings;
    use helm_domain::{
        Mode, ModeDefinition, ParamType, RiskLevel, TokenUsage, ToolCall, ToolDefinition,
        ToolParameter, TraceContext,
    };
    use helm_llm::RoutingStrategy;
    use helm_sensors::probe::BaseProbe;
    use helm_sensors::SensorHub;
    use helm_tools::registry::ToolExec;
    use std::sync::Mutex;

    // ── Fixtures ───────────────────────────────────────────────────

    struct QuietProbe;

    impl BaseProbe for QuietProbe {
        fn poll(&self) -> helm_domain::SensorSnapshot {
            helm_domain::SensorSnapshot::from([
                ("perf_system_cpu_load".to_string(), 10.0),
                ("perf_system_mem_used".to_string(), 30.0),
            ])
        }

        fn poll_detailed(&self) -> helm_domain::SensorSnapshot {
            self.poll()
        }
    }

    /// Plays back a scripted sequence of responses for non-router roles.
    struct ScriptedModel {
        responses: Mutex<Vec<LlmResponse>>,
        calls_by_role: Mutex<Vec<ModelRole>>,
        delay: Option<Duration>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<LlmResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls_by_role: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn calls(&self) -> Vec<ModelRole> {
            self.calls_by_role.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn respond(
            &self,
            role: ModelRole,
            _messages: Vec<ChatMessage>,
            _options: CallOptions,
            _trace: &TraceContext,
        ) -> Result<LlmResponse> {
            self.calls_by_role.lock().unwrap().push(role);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(Error::Other("script exhausted".into()));
            }
            Ok(responses.remove(0))
        }
    }

    fn text_response(content: &str) -> LlmResponse {
        LlmResponse {
            role: "assistant".into(),
            content: content.into(),
            tool_calls: vec![],
            reasoning_trace: None,
            usage: TokenUsage::default(),
            response_id: None,
            raw: serde_json::Value::Null,
        }
    }

    fn tool_response(name: &str, arguments: serde_json::Value) -> LlmResponse {
        LlmResponse {
            tool_calls: vec![ToolCall {
                id: "call-1".into(),
                name: name.into(),
                arguments,
            }],
            ..text_response("")
        }
    }

    struct ListDirStub;

    #[async_trait]
    impl ToolExec for ListDirStub {
        async fn run(
            &self,
            args: serde_json::Map<String, serde_json::Value>,
        ) -> std::result::Result<serde_json::Value, String> {
            Ok(json!({
                "path": args.get("path"),
                "entries": ["a.txt", "b.txt", "c.txt"],
            }))
        }
    }

    fn list_dir_definition() -> ToolDefinition {
        ToolDefinition {
            name: "list_directory".into(),
            description: "List files".into(),
            category: "filesystem".into(),
            parameters: vec![
                ToolParameter {
                    name: "path".into(),
                    kind: ParamType::String,
                    required: true,
                    default: None,
                    description: String::new(),
                },
                ToolParameter {
                    name: "include_hidden".into(),
                    kind: ParamType::Boolean,
                    required: false,
                    default: Some(json!(false)),
                    description: String::new(),
                },
            ],
            risk_level: RiskLevel::Low,
            allowed_modes: vec![Mode::Normal],
            timeout_seconds: 5,
            rate_limit_per_hour: None,
        }
    }

    struct FixedMode(Mode);

    impl ModeSource for FixedMode {
        fn current_mode(&self) -> Mode {
            self.0
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        model: Arc<ScriptedModel>,
        _dir: tempfile::TempDir,
    }

    fn fixture(responses: Vec<LlmResponse>, governance: GovernanceConfig) -> Fixture {
        fixture_with(responses, governance, None)
    }

    fn fixture_with(
        responses: Vec<LlmResponse>,
        governance: GovernanceConfig,
        delay: Option<Duration>,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let logger = EventLogger::new(dir.path(), &TelemetrySettings::default()).unwrap();
        let mut model = ScriptedModel::new(responses);
        model.delay = delay;
        let model = Arc::new(model);
        let governance = Arc::new(governance);

        let registry = Arc::new(ToolRegistry::new());
        registry.register_async(list_dir_definition(), Arc::new(ListDirStub));

        let mode: Arc<dyn ModeSource> = Arc::new(FixedMode(Mode::Normal));
        let tools = Arc::new(ToolExecutionLayer::new(
            registry.clone(),
            governance.clone(),
            mode.clone(),
            logger.clone(),
        ));
        let hub = SensorHub::with_ttl(Box::new(QuietProbe), None, Duration::from_secs(60))
            .into_shared();
        let router = Arc::new(Router::new(
            RoutingStrategy::HeuristicOnly,
            model.clone(),
            logger.clone(),
        ));

        let config = OrchestratorConfig {
            monitor_interval: Duration::from_millis(10),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            model.clone(),
            router,
            tools,
            registry,
            governance,
            mode,
            hub,
            logger,
            config,
        );
        Fixture {
            orchestrator,
            model,
            _dir: dir,
        }
    }

    fn normal_governance() -> GovernanceConfig {
        let mut governance = GovernanceConfig::default();
        governance.modes.insert(
            Mode::Normal,
            ModeDefinition {
                description: String::new(),
                max_concurrent_tasks: 4,
                background_monitoring_enabled: true,
                allowed_tool_categories: vec!["filesystem".into()],
                thresholds: Default::default(),
            },
        );
        governance
    }

    // ── Scenario A: simple question ────────────────────────────────

    #[tokio::test]
    async fn simple_question_routes_once_and_answers() {
        let fx = fixture(vec![text_response("4")], normal_governance());

        let result = fx
            .orchestrator
            .handle_request("s-1", "What is 2+2?", Channel::Chat)
            .await;

        assert_eq!(result.state, TaskState::Completed);
        assert!(result.reply.contains('4'));
        assert_eq!(result.tool_iterations, 0);
        // Heuristic routing made no router-model call; one STANDARD call.
        assert_eq!(fx.model.calls(), vec![ModelRole::Standard]);
    }

    // ── Scenario B: one tool round ─────────────────────────────────

    #[tokio::test]
    async fn tool_round_then_synthesis() {
        let fx = fixture(
            vec![
                tool_response(
                    "list_directory",
                    json!({"path": "/tmp", "include_hidden": false}),
                ),
                text_response("Files in /tmp: a.txt, b.txt, c.txt"),
            ],
            normal_governance(),
        );

        let result = fx
            .orchestrator
            .handle_request("s-1", "List 3 non-hidden files in /tmp", Channel::Chat)
            .await;

        assert_eq!(result.state, TaskState::Completed);
        assert!(!result.reply.is_empty());
        assert!(result.reply.contains("a.txt"));
        assert_eq!(result.tool_iterations, 1);
        assert_eq!(fx.model.calls().len(), 2);
    }

    // ── Property 3: tool-loop bounds ───────────────────────────────

    #[tokio::test]
    async fn repeated_identical_calls_are_suppressed() {
        // The model asks for the same call four times, then gives up with
        // empty text; only the first executes.
        let same_call =
            || tool_response("list_directory", json!({"path": "/tmp", "include_hidden": false}));
        let fx = fixture(
            vec![same_call(), same_call(), same_call(), same_call(), text_response("")],
            normal_governance(),
        );

        let result = fx
            .orchestrator
            .handle_request("s-1", "list /tmp forever", Channel::Chat)
            .await;

        assert_eq!(result.tool_iterations, 1);
        assert_eq!(result.state, TaskState::Completed);
        // The synthetic results steered the reply through the fallback.
        assert!(!result.reply.is_empty());
    }

    #[tokio::test]
    async fn iteration_cap_bounds_distinct_calls() {
        let distinct = |i: usize| {
            tool_response("list_directory", json!({"path": format!("/tmp/{i}")}))
        };
        let fx = fixture(
            vec![
                distinct(0),
                distinct(1),
                distinct(2),
                distinct(3),
                distinct(4),
                text_response("done"),
            ],
            normal_governance(),
        );

        let result = fx
            .orchestrator
            .handle_request("s-1", "walk the tree", Channel::Chat)
            .await;

        assert!(result.tool_iterations <= 3);
        assert_eq!(result.state, TaskState::Completed);
    }

    // ── Synthesis fallback ─────────────────────────────────────────

    #[tokio::test]
    async fn empty_synthesis_with_tool_results_builds_summary() {
        let fx = fixture(
            vec![
                tool_response("list_directory", json!({"path": "/tmp"})),
                text_response(""),
            ],
            normal_governance(),
        );

        let result = fx
            .orchestrator
            .handle_request("s-1", "list my files", Channel::Chat)
            .await;

        assert_eq!(result.state, TaskState::Completed);
        assert!(result.reply.contains("list_directory: success"));
    }

    #[tokio::test]
    async fn embedded_response_json_is_unwrapped() {
        let fx = fixture(
            vec![text_response(
                r#"{"routing_decision": "HANDLE", "response": "The answer is 4."}"#,
            )],
            normal_governance(),
        );

        let result = fx
            .orchestrator
            .handle_request("s-1", "What is 2+2?", Channel::Chat)
            .await;
        assert_eq!(result.reply, "The answer is 4.");
    }

    // ── Failure path ───────────────────────────────────────────────

    #[tokio::test]
    async fn llm_failure_surfaces_as_failed_with_reply() {
        let fx = fixture(vec![], normal_governance());

        let result = fx
            .orchestrator
            .handle_request("s-1", "hello", Channel::Chat)
            .await;

        assert_eq!(result.state, TaskState::Failed);
        assert!(!result.reply.is_empty());
    }

    // ── Concurrency cap ────────────────────────────────────────────

    #[tokio::test]
    async fn requests_beyond_the_mode_cap_fail_fast() {
        let mut governance = normal_governance();
        governance.modes.get_mut(&Mode::Normal).unwrap().max_concurrent_tasks = 1;
        let fx = Arc::new(fixture_with(
            vec![text_response("slow answer"), text_response("slow answer")],
            governance,
            Some(Duration::from_millis(300)),
        ));

        let first = {
            let fx = fx.clone();
            tokio::spawn(async move {
                fx.orchestrator.handle_request("s-1", "one", Channel::Chat).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = fx.orchestrator.handle_request("s-2", "two", Channel::Chat).await;

        assert_eq!(second.state, TaskState::Failed);
        assert!(second.reply.contains("concurrent task limit"));

        let first = first.await.unwrap();
        assert_eq!(first.state, TaskState::Completed);
    }

    // ── Helpers ────────────────────────────────────────────────────

    #[test]
    fn nudge_extends_trailing_user_message() {
        let mut messages = vec![ChatMessage::user("question")];
        append_no_think_nudge(&mut messages, "/no_think");
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.ends_with("/no_think"));

        // Applying twice doesn't duplicate the suffix.
        append_no_think_nudge(&mut messages, "/no_think");
        assert_eq!(messages[0].content.matches("/no_think").count(), 1);
    }

    #[test]
    fn nudge_appends_user_message_after_tool_output() {
        let mut messages = vec![
            ChatMessage::user("question"),
            ChatMessage::tool_result("c1", "output"),
        ];
        append_no_think_nudge(&mut messages, "/no_think");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, helm_domain::Role::User);
        assert!(messages[2].content.ends_with("/no_think"));
    }

    #[test]
    fn empty_suffix_disables_the_nudge() {
        let mut messages = vec![ChatMessage::tool_result("c1", "output")];
        append_no_think_nudge(&mut messages, "");
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn fallback_summary_covers_last_three_results() {
        let mut ctx = ExecutionContext::new("s", "m", Mode::Normal, Channel::Chat);
        for i in 0..5 {
            ctx.tool_results.push(helm_domain::ToolResult::success(
                format!("tool_{i}"),
                json!({}),
                1,
            ));
        }
        ctx.tool_results.push(helm_domain::ToolResult::failure("tool_5", "boom", 1));

        let summary = fallback_reply_from_tool_results(&ctx);
        assert!(summary.contains("tool_3"));
        assert!(summary.contains("tool_5: failed (boom)"));
        assert!(!summary.contains("tool_0"));
    }
}
