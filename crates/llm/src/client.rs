//! Role-keyed LLM client over OpenAI-compatible chat completions.
//!
//! Retry policy: timeouts, HTTP 429, and 5xx back off `2^attempt` seconds
//! and retry; connection failures and other 4xx fail immediately. An HTTP
//! 200 carrying an error envelope in the body is a failure, not a response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use helm_domain::config::{LlmSettings, ModelCatalog};
use helm_domain::{ChatMessage, Error, ModelRole, Result, ToolDefinition, TraceContext};
use helm_telemetry::{events, EventLogger};

use crate::adapters::{adapt_chat_completions_response, build_chat_completions_request};
use crate::cost::{CostRecord, CostTracker};
use crate::types::LlmResponse;

/// Per-call options. Everything is optional; role defaults fill the gaps.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub tools: Option<Vec<ToolDefinition>>,
    pub tool_choice: Option<Value>,
    pub response_format: Option<Value>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Recorded into the cost store, e.g. `"chat"`, `"router"`, `"reflection"`.
    pub purpose: Option<String>,
}

/// The seam the orchestrator, router, and reflection pipeline call through;
/// tests substitute scripted models.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn respond(
        &self,
        role: ModelRole,
        messages: Vec<ChatMessage>,
        options: CallOptions,
        trace: &TraceContext,
    ) -> Result<LlmResponse>;
}

pub struct LlmClient {
    settings: LlmSettings,
    catalog: Arc<ModelCatalog>,
    logger: EventLogger,
    cost: Option<Arc<CostTracker>>,
}

impl LlmClient {
    pub fn new(settings: LlmSettings, catalog: Arc<ModelCatalog>, logger: EventLogger) -> Self {
        Self {
            settings,
            catalog,
            logger,
            cost: None,
        }
    }

    pub fn with_cost_tracker(mut self, cost: Arc<CostTracker>) -> Self {
        self.cost = Some(cost);
        self
    }

    /// `<base>/chat/completions`, tolerating bases with or without `/v1`.
    fn endpoint_for(&self, model_endpoint: Option<&str>) -> String {
        let base = model_endpoint
            .unwrap_or(&self.settings.base_url)
            .trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn http_client(endpoint: &str, timeout: Duration) -> Result<reqwest::Client> {
        // Local backends serve plain HTTP or self-signed certs; skip
        // verification only for loopback endpoints.
        let local = endpoint.starts_with("http://localhost")
            || endpoint.starts_with("https://localhost")
            || endpoint.starts_with("http://127.0.0.1")
            || endpoint.starts_with("https://127.0.0.1");
        reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(local)
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))
    }

    async fn post_once(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        payload: &Value,
        timeout: Duration,
    ) -> Result<LlmResponse> {
        let response = client.post(endpoint).json(payload).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!(
                    "request to {endpoint} timed out after {}s",
                    timeout.as_secs()
                ))
            } else if e.is_connect() {
                Error::Http(format!("failed to connect to {endpoint}: {e}"))
            } else {
                Error::Http(format!("request to {endpoint} failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => Error::RateLimited(format!("HTTP 429 from {endpoint}: {body}")),
                code if code >= 500 => Error::Server(format!("HTTP {code} from {endpoint}: {body}")),
                code => Error::Http(format!("HTTP {code} from {endpoint}: {body}")),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("response body not JSON: {e}")))?;

        // Some local backends return 200 with an error envelope.
        if let Some(error) = body.get("error") {
            if !error.is_null() {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(Error::InvalidResponse(format!("API returned error: {message}")));
            }
        }

        adapt_chat_completions_response(body)
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn respond(
        &self,
        role: ModelRole,
        messages: Vec<ChatMessage>,
        options: CallOptions,
        trace: &TraceContext,
    ) -> Result<LlmResponse> {
        let model = self
            .catalog
            .get(role)
            .ok_or_else(|| Error::Config(format!("no model configured for role {role}")))?;

        let endpoint = self.endpoint_for(model.endpoint.as_deref());
        let timeout = options
            .timeout
            .unwrap_or_else(|| Duration::from_secs(self.catalog.timeout_for(role)));
        let max_retries = options.max_retries.unwrap_or(self.settings.max_retries);
        let temperature = options.temperature.or(model.temperature);

        // Models without native function calling get no tools; sending them
        // only teaches the model to hallucinate call syntax.
        let mut tools = options.tools;
        let mut tool_choice = options.tool_choice;
        if tools.as_ref().is_some_and(|t| !t.is_empty()) && !model.supports_function_calling {
            self.logger.warn(
                "tools_filtered_no_function_calling",
                "llm",
                Some(trace),
                json!({
                    "model_id": model.id,
                    "role": role.as_str(),
                    "tools_count": tools.as_ref().map(|t| t.len()).unwrap_or(0),
                }),
            );
            tools = None;
            tool_choice = None;
        }

        let mut messages = messages;
        if let Some(system) = &options.system_prompt {
            messages.insert(0, ChatMessage::system(system.clone()));
        }

        let payload = build_chat_completions_request(
            &model.id,
            &messages,
            tools.as_deref(),
            tool_choice.as_ref(),
            options.max_tokens,
            temperature,
            options.response_format.as_ref(),
        );

        let (_, span_id) = trace.new_span();
        let started = Instant::now();
        self.logger.info(
            events::MODEL_CALL_STARTED,
            "llm",
            Some(trace),
            json!({
                "role": role.as_str(),
                "model_id": model.id,
                "endpoint": endpoint,
                "span_id": span_id.to_string(),
            }),
        );

        let client = Self::http_client(&endpoint, timeout)?;

        let mut attempt: u32 = 0;
        let result = loop {
            match self.post_once(&client, &endpoint, &payload, timeout).await {
                Ok(response) => break Ok(response),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let wait = Duration::from_secs(1 << attempt);
                    self.logger.warn(
                        "model_call_retry",
                        "llm",
                        Some(trace),
                        json!({
                            "attempt": attempt + 1,
                            "wait_seconds": wait.as_secs(),
                            "error": e.to_string(),
                        }),
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => {
                self.logger.info(
                    events::MODEL_CALL_COMPLETED,
                    "llm",
                    Some(trace),
                    json!({
                        "role": role.as_str(),
                        "model_id": model.id,
                        "endpoint": endpoint,
                        "latency_ms": latency_ms,
                        "prompt_tokens": response.usage.prompt_tokens,
                        "completion_tokens": response.usage.completion_tokens,
                        "span_id": span_id.to_string(),
                    }),
                );
                if let Some(cost) = &self.cost {
                    let record = CostRecord {
                        provider: "local".into(),
                        model: model.id.clone(),
                        input_tokens: response.usage.prompt_tokens,
                        output_tokens: response.usage.completion_tokens,
                        cost_usd: cost_usd(
                            response.usage.prompt_tokens,
                            response.usage.completion_tokens,
                            model.input_cost_per_mtok,
                            model.output_cost_per_mtok,
                        ),
                        trace_id: trace.trace_id.to_string(),
                        purpose: options.purpose.clone().unwrap_or_else(|| "chat".into()),
                    };
                    if let Err(e) = cost.record(&record) {
                        tracing::warn!(error = %e, "cost record failed");
                    }
                }
            }
            Err(e) => {
                self.logger.error(
                    events::MODEL_CALL_ERROR,
                    "llm",
                    Some(trace),
                    json!({
                        "role": role.as_str(),
                        "model_id": model.id,
                        "endpoint": endpoint,
                        "error": e.to_string(),
                        "latency_ms": latency_ms,
                        "span_id": span_id.to_string(),
                    }),
                );
            }
        }

        result
    }
}

fn cost_usd(input_tokens: u32, output_tokens: u32, input_per_mtok: f64, output_per_mtok: f64) -> f64 {
    (input_tokens as f64 * input_per_mtok + output_tokens as f64 * output_per_mtok) / 1_000_000.0
}
