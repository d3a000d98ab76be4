//! The router: decides which model role serves a request.
//!
//! Strategies: `heuristic_then_llm` (deterministic rules first, the router
//! model only when they are unsure), `llm_only`, and `heuristic_only`. The
//! router model sees the current user message alone, never memory
//! enrichment, and any parse failure falls back to the heuristic plan, so
//! routing can never fail a request.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use helm_domain::{
    ChatMessage, ModelRole, RecommendedParams, Result, RoutingDecision, RoutingResult,
    TraceContext,
};
use helm_telemetry::{events, EventLogger};

use crate::client::{CallOptions, ChatModel};
use crate::heuristics::apply_heuristics;
use crate::structured::{parse_structured, StructuredSignature};

const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;

const ROUTER_SYSTEM_PROMPT: &str = "\
You are a routing classifier for a local AI agent. Decide which model should \
handle the user's message. Target roles:
- STANDARD: general questions, conversation, web-style lookups
- REASONING: multi-step analysis, proofs, planning, tradeoff evaluation
- CODING: writing, debugging, or explaining code; stack traces

Respond with ONLY a JSON object: {\"routing_decision\": \"HANDLE\"|\"DELEGATE\", \
\"target_model\": \"STANDARD\"|\"REASONING\"|\"CODING\", \"confidence\": 0.0-1.0, \
\"reasoning_depth\": 1-10, \"reason\": \"short explanation\", \
\"response\": \"answer text if HANDLE\"}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    HeuristicThenLlm,
    LlmOnly,
    HeuristicOnly,
}

impl Default for RoutingStrategy {
    fn default() -> Self {
        RoutingStrategy::HeuristicThenLlm
    }
}

/// Wire shape of the router model's JSON reply.
#[derive(Debug, Deserialize)]
struct WireDecision {
    #[serde(default)]
    routing_decision: Option<String>,
    #[serde(default)]
    target_model: Option<String>,
    confidence: f64,
    #[serde(default)]
    reasoning_depth: Option<u8>,
    reason: String,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    detected_format: Option<String>,
    #[serde(default)]
    recommended_params: Option<RecommendedParams>,
}

pub struct Router {
    strategy: RoutingStrategy,
    confidence_threshold: f64,
    client: Arc<dyn ChatModel>,
    logger: EventLogger,
}

impl Router {
    pub fn new(strategy: RoutingStrategy, client: Arc<dyn ChatModel>, logger: EventLogger) -> Self {
        Self {
            strategy,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            client,
            logger,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Route one user message. Never fails: the heuristic plan is the floor.
    pub async fn route(&self, user_message: &str, trace: &TraceContext) -> RoutingResult {
        let heuristic_plan = self.heuristic_plan(user_message);

        let result = match self.strategy {
            RoutingStrategy::HeuristicOnly => heuristic_plan,
            RoutingStrategy::HeuristicThenLlm
                if heuristic_plan.confidence >= self.confidence_threshold =>
            {
                heuristic_plan
            }
            RoutingStrategy::HeuristicThenLlm | RoutingStrategy::LlmOnly => {
                match self.llm_route(user_message, trace).await {
                    Ok(decision) => decision,
                    Err(e) => {
                        self.logger.warn(
                            events::ROUTING_PARSE_ERROR,
                            "router",
                            Some(trace),
                            json!({"error": e.to_string()}),
                        );
                        heuristic_plan
                    }
                }
            }
        };

        self.logger.info(
            events::ROUTING_DECISION,
            "router",
            Some(trace),
            json!({
                "decision": result.decision,
                "target_role": result.target_role.map(|r| r.as_str()),
                "confidence": result.confidence,
                "reason": result.reason,
            }),
        );
        result
    }

    /// The deterministic plan: a heuristic hit when one fires, otherwise a
    /// low-confidence STANDARD delegation.
    fn heuristic_plan(&self, user_message: &str) -> RoutingResult {
        match apply_heuristics(user_message) {
            Some(hit) => RoutingResult {
                decision: RoutingDecision::Delegate,
                target_role: Some(hit.role),
                confidence: hit.confidence,
                reasoning_depth: depth_for(hit.role),
                reason: hit.reason.to_string(),
                detected_format: hit.detected_format.map(str::to_string),
                recommended_params: None,
                response: None,
            },
            None => RoutingResult {
                decision: RoutingDecision::Delegate,
                target_role: Some(ModelRole::Standard),
                confidence: 0.5,
                reasoning_depth: 2,
                reason: "no heuristic matched; defaulting to STANDARD".into(),
                detected_format: None,
                recommended_params: None,
                response: None,
            },
        }
    }

    /// Ask the router model. Input is the bare user message plus the static
    /// system prompt. No history, no memory.
    async fn llm_route(&self, user_message: &str, trace: &TraceContext) -> Result<RoutingResult> {
        let signature = StructuredSignature::new("router_decision", router_schema());
        let options = CallOptions {
            response_format: Some(signature.response_format()),
            system_prompt: Some(ROUTER_SYSTEM_PROMPT.to_string()),
            max_tokens: Some(512),
            temperature: Some(0.1),
            purpose: Some("router".into()),
            ..CallOptions::default()
        };

        let response = self
            .client
            .respond(
                ModelRole::Router,
                vec![ChatMessage::user(user_message)],
                options,
                trace,
            )
            .await?;

        let wire: WireDecision = parse_structured(response.effective_text())?;
        Ok(validate_wire_decision(wire))
    }
}

fn depth_for(role: ModelRole) -> u8 {
    match role {
        ModelRole::Reasoning => 7,
        ModelRole::Coding => 5,
        _ => 2,
    }
}

fn router_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "routing_decision": {"type": "string", "enum": ["HANDLE", "DELEGATE"]},
            "target_model": {"type": "string", "enum": ["STANDARD", "REASONING", "CODING"]},
            "confidence": {"type": "number"},
            "reasoning_depth": {"type": "integer"},
            "reason": {"type": "string"},
            "response": {"type": "string"},
            "detected_format": {"type": "string"},
            "recommended_params": {"type": "object"},
        },
        "required": ["routing_decision", "confidence", "reasoning_depth", "reason"],
        "additionalProperties": true,
    })
}

/// Clamp and normalize the wire decision into a `RoutingResult`.
fn validate_wire_decision(wire: WireDecision) -> RoutingResult {
    let decision = match wire.routing_decision.as_deref() {
        Some("HANDLE") => RoutingDecision::Handle,
        _ => RoutingDecision::Delegate,
    };
    let target_role = match wire.target_model.as_deref() {
        Some("STANDARD") => Some(ModelRole::Standard),
        Some("REASONING") => Some(ModelRole::Reasoning),
        Some("CODING") => Some(ModelRole::Coding),
        // The router may never delegate to itself; anything unknown
        // degrades to STANDARD.
        _ => Some(ModelRole::Standard),
    };

    RoutingResult {
        decision,
        target_role,
        confidence: wire.confidence.clamp(0.0, 1.0),
        reasoning_depth: wire.reasoning_depth.unwrap_or(2).clamp(1, 10),
        reason: wire.reason,
        detected_format: wire.detected_format,
        recommended_params: wire.recommended_params,
        response: wire.response,
    }
}
