//! Post-request reflection generation.
//!
//! The pipeline summarizes the trace's telemetry, asks the reasoning model
//! for rationale and an optional improvement proposal, and persists a
//! logbook entry. Metrics are extracted deterministically and always
//! override anything the model wrote. Generation degrades gracefully:
//! structured output → manual JSON parse → a minimal basic entry.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use helm_domain::{ChatMessage, ModelRole, Result, TraceContext};
use helm_llm::client::{CallOptions, ChatModel};
use helm_llm::structured::{call_structured, parse_structured, StructuredSignature};
use helm_sensors::MonitorSummary;
use helm_telemetry::{EventLogger, TelemetryReader};

use crate::manager::LogbookManager;
use crate::metrics::extract_metrics_from_summary;
use crate::models::{CaptainLogEntry, EntryStatus, EntryType, ProposedChange, TelemetryRef};

const REFLECTION_PROMPT: &str = "\
You are a personal AI agent analyzing your own task execution.

## Task Context
- User message: {user_message}
- Trace: {trace_id}
- Steps completed: {steps_count}
- Final state: {final_state}
- Reply length: {reply_length} characters

## Telemetry
{telemetry_summary}

Analyze the execution. Look for slow operations, repeated or failed tool
calls, retries, and optimization opportunities. Keep it lightweight when the
task was simple and clean.

Respond with ONLY valid JSON:
{\"rationale\": \"string\", \"proposed_change\": {\"what\": \"string\", \
\"why\": \"string\", \"how\": \"string\"} | null, \"impact_assessment\": \
\"string\" | null}";

/// Everything the pipeline needs about the finished request.
#[derive(Debug, Clone)]
pub struct ReflectionInput {
    pub user_message: String,
    pub trace_id: String,
    pub steps_count: usize,
    pub final_state: String,
    pub reply_length: usize,
    pub metrics_summary: Option<MonitorSummary>,
}

/// The model's JSON reply.
#[derive(Debug, Deserialize)]
struct WireReflection {
    rationale: String,
    #[serde(default)]
    proposed_change: Option<ProposedChange>,
    #[serde(default)]
    impact_assessment: Option<String>,
}

pub struct ReflectionPipeline {
    client: Arc<dyn ChatModel>,
    reader: TelemetryReader,
    manager: Arc<LogbookManager>,
    logger: EventLogger,
    auto_commit: bool,
}

impl ReflectionPipeline {
    pub fn new(
        client: Arc<dyn ChatModel>,
        reader: TelemetryReader,
        manager: Arc<LogbookManager>,
        logger: EventLogger,
    ) -> Self {
        Self {
            client,
            reader,
            manager,
            logger,
            auto_commit: false,
        }
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Generate and persist a reflection entry. Never fails the caller:
    /// every degradation path still yields a written entry.
    pub async fn reflect(&self, input: ReflectionInput) -> Result<CaptainLogEntry> {
        let trace_events = self.reader.trace_events(&input.trace_id);
        let telemetry_summary =
            summarize_telemetry(&trace_events, input.metrics_summary.as_ref());
        let prompt = build_prompt(&input, &telemetry_summary);

        let wire = match self.generate(&prompt).await {
            Ok(wire) => wire,
            Err(e) => {
                self.logger.warn(
                    "reflection_generation_failed_fallback_basic",
                    "reflection",
                    None,
                    json!({"trace_id": input.trace_id, "error": e.to_string()}),
                );
                WireReflection {
                    rationale: format!(
                        "Completed task with {} steps. Final state: {}.",
                        input.steps_count, input.final_state
                    ),
                    proposed_change: None,
                    impact_assessment: None,
                }
            }
        };

        // Metrics come from the summary alone, never from the model.
        let (supporting_metrics, metrics_structured) =
            extract_metrics_from_summary(input.metrics_summary.as_ref());

        let mut entry = CaptainLogEntry {
            entry_id: String::new(),
            timestamp: Utc::now(),
            entry_type: EntryType::Reflection,
            title: entry_title(&input.user_message),
            rationale: wire.rationale,
            proposed_change: wire.proposed_change,
            supporting_metrics,
            metrics_structured: (!metrics_structured.is_empty()).then_some(metrics_structured),
            impact_assessment: wire.impact_assessment,
            status: EntryStatus::AwaitingApproval,
            telemetry_refs: vec![TelemetryRef {
                trace_id: Some(input.trace_id.clone()),
                ..TelemetryRef::default()
            }],
        };

        let path = self.manager.write_entry(&mut entry)?;
        if self.auto_commit {
            self.manager.commit_to_git(&entry.entry_id, &path).await;
        }
        Ok(entry)
    }

    /// Structured output first; on parse failure, one plain call with
    /// manual JSON extraction.
    async fn generate(&self, prompt: &str) -> Result<WireReflection> {
        let signature = StructuredSignature::new("reflection_entry", reflection_schema());
        let trace = TraceContext::new_trace();
        let options = CallOptions {
            temperature: Some(0.3),
            max_tokens: Some(3000),
            purpose: Some("reflection".into()),
            ..CallOptions::default()
        };

        let structured: Result<WireReflection> = call_structured(
            self.client.as_ref(),
            ModelRole::Reasoning,
            vec![ChatMessage::user(prompt)],
            &signature,
            options.clone(),
            &trace,
        )
        .await;

        match structured {
            Ok(wire) => Ok(wire),
            Err(first_error) => {
                self.logger.warn(
                    "reflection_structured_failed_fallback_manual",
                    "reflection",
                    None,
                    json!({"error": first_error.to_string()}),
                );
                let response = self
                    .client
                    .respond(
                        ModelRole::Reasoning,
                        vec![ChatMessage::user(prompt)],
                        options,
                        &trace,
                    )
                    .await?;
                parse_structured(response.effective_text())
            }
        }
    }
}

fn entry_title(user_message: &str) -> String {
    let prefix: String = user_message.chars().take(50).collect();
    format!("Task: {prefix}")
}

fn build_prompt(input: &ReflectionInput, telemetry_summary: &str) -> String {
    let mut message: String = input.user_message.chars().take(200).collect();
    if message.is_empty() {
        message = "(empty)".into();
    }
    REFLECTION_PROMPT
        .replace("{user_message}", &message)
        .replace("{trace_id}", &input.trace_id)
        .replace("{steps_count}", &input.steps_count.to_string())
        .replace("{final_state}", &input.final_state)
        .replace("{reply_length}", &input.reply_length.to_string())
        .replace("{telemetry_summary}", telemetry_summary)
}

fn reflection_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "rationale": {"type": "string"},
            "proposed_change": {
                "type": ["object", "null"],
                "properties": {
                    "what": {"type": "string"},
                    "why": {"type": "string"},
                    "how": {"type": "string"},
                },
                "required": ["what", "why", "how"],
            },
            "impact_assessment": {"type": ["string", "null"]},
        },
        "required": ["rationale"],
        "additionalProperties": false,
    })
}

/// Summarize a trace's events: counts per event, model/tool latency
/// averages, failed tools, the first few error messages, and the monitor
/// summary when present.
fn summarize_telemetry(events: &[Value], metrics_summary: Option<&MonitorSummary>) -> String {
    let mut parts = Vec::new();

    if events.is_empty() {
        parts.push("No telemetry events found for this trace.".to_string());
    } else {
        let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
        for event in events {
            let name = event.get("event").and_then(Value::as_str).unwrap_or("unknown");
            *counts.entry(name).or_default() += 1;
        }
        let counts_line: Vec<String> =
            counts.iter().map(|(name, count)| format!("{name}={count}")).collect();
        parts.push(format!("Event counts: {}", counts_line.join(", ")));

        let latency_avg = |event_name: &str| -> Option<f64> {
            let values: Vec<f64> = events
                .iter()
                .filter(|e| e.get("event").and_then(Value::as_str) == Some(event_name))
                .filter_map(|e| e.get("latency_ms").and_then(Value::as_f64))
                .collect();
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };
        if let Some(avg) = latency_avg("model_call_completed") {
            parts.push(format!("LLM avg latency: {avg:.0}ms"));
        }
        if let Some(avg) = latency_avg("tool_call_completed") {
            parts.push(format!("Tool avg latency: {avg:.0}ms"));
        }

        let failed_tools: Vec<&str> = events
            .iter()
            .filter(|e| e.get("event").and_then(Value::as_str) == Some("tool_call_failed"))
            .filter_map(|e| e.get("tool_name").and_then(Value::as_str))
            .collect();
        if !failed_tools.is_empty() {
            parts.push(format!(
                "Tool failures: {} ({})",
                failed_tools.len(),
                failed_tools.join(", ")
            ));
        }

        let errors: Vec<&str> = events
            .iter()
            .filter(|e| e.get("level").and_then(Value::as_str) == Some("ERROR"))
            .filter_map(|e| e.get("error").and_then(Value::as_str))
            .take(3)
            .collect();
        if !errors.is_empty() {
            parts.push(format!("Errors: {}", errors.join("; ")));
        }
    }

    if let Some(summary) = metrics_summary {
        parts.push(format!(
            "System: duration {:.1}s, {} samples",
            summary.duration_seconds, summary.samples_collected
        ));
        if let Some(cpu) = summary.cpu_avg {
            parts.push(format!(
                "CPU: avg={cpu:.1}% max={:.1}%",
                summary.cpu_max.unwrap_or(cpu)
            ));
        }
        if let Some(memory) = summary.memory_avg {
            parts.push(format!(
                "Memory: avg={memory:.1}% max={:.1}%",
                summary.memory_max.unwrap_or(memory)
            ));
        }
        if !summary.threshold_violations.is_empty() {
            parts.push(format!(
                "Threshold violations: {}",
                summary.threshold_violations.join(", ")
            ));
        }
    }

    parts.join("\n")
}
