//! Aggregation queries over the search index.
//!
//! Builders for the three primitives the `telemetry report` command and
//! dashboards use (percentiles, terms, date histograms) plus canned query
//! bodies for the common questions (model latency profile, tool failure
//! breakdown, daily event volume). The index evaluates these server-side;
//! callers get the raw aggregation JSON back.

use serde_json::{json, Value};

use helm_domain::{Error, Result};

use crate::index::HttpSearchIndex;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation primitives
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn percentiles_agg(field: &str, percents: &[f64]) -> Value {
    json!({"percentiles": {"field": field, "percents": percents}})
}

pub fn terms_agg(field: &str, size: usize) -> Value {
    json!({"terms": {"field": field, "size": size}})
}

pub fn date_histogram_agg(field: &str, calendar_interval: &str) -> Value {
    json!({"date_histogram": {"field": field, "calendar_interval": calendar_interval}})
}

/// A bool-filter query over one event name within a trailing window.
pub fn event_window_query(event: &str, window: &str) -> Value {
    json!({
        "bool": {
            "filter": [
                {"term": {"event": event}},
                {"range": {"timestamp": {"gte": format!("now-{window}")}}},
            ]
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canned report bodies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Model-call latency percentiles per role over a window.
pub fn model_latency_body(window: &str) -> Value {
    json!({
        "size": 0,
        "query": event_window_query("model_call_completed", window),
        "aggs": {
            "by_role": {
                "terms": {"field": "role", "size": 10},
                "aggs": {
                    "latency": percentiles_agg("latency_ms", &[50.0, 90.0, 99.0]),
                }
            }
        }
    })
}

/// Tool failure counts by tool name over a window.
pub fn tool_failures_body(window: &str) -> Value {
    json!({
        "size": 0,
        "query": event_window_query("tool_call_failed", window),
        "aggs": {
            "by_tool": terms_agg("tool_name", 20),
        }
    })
}

/// Daily event volume by event name over a window.
pub fn event_volume_body(window: &str) -> Value {
    json!({
        "size": 0,
        "query": {
            "bool": {
                "filter": [
                    {"range": {"timestamp": {"gte": format!("now-{window}")}}},
                ]
            }
        },
        "aggs": {
            "per_day": {
                "date_histogram": {"field": "timestamp", "calendar_interval": "day"},
                "aggs": {
                    "by_event": terms_agg("event", 30),
                }
            }
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl HttpSearchIndex {
    /// Run a search body against an index pattern and return the raw
    /// response JSON.
    pub async fn search(&self, index_pattern: &str, body: &Value) -> Result<Value> {
        let response = self
            .client()
            .post(format!("{}/{index_pattern}/_search", self.base_url()))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("search failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("search HTTP {status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("search response not JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_shape() {
        let agg = percentiles_agg("latency_ms", &[50.0, 99.0]);
        assert_eq!(agg["percentiles"]["field"], "latency_ms");
        assert_eq!(agg["percentiles"]["percents"][1], 99.0);
    }

    #[test]
    fn model_latency_body_nests_percentiles_under_roles() {
        let body = model_latency_body("7d");
        assert_eq!(body["size"], 0);
        assert_eq!(
            body["query"]["bool"]["filter"][0]["term"]["event"],
            "model_call_completed"
        );
        assert_eq!(
            body["aggs"]["by_role"]["aggs"]["latency"]["percentiles"]["field"],
            "latency_ms"
        );
    }

    #[test]
    fn tool_failures_body_filters_failed_event() {
        let body = tool_failures_body("24h");
        assert_eq!(
            body["query"]["bool"]["filter"][0]["term"]["event"],
            "tool_call_failed"
        );
        assert_eq!(body["aggs"]["by_tool"]["terms"]["field"], "tool_name");
    }

    #[test]
    fn event_volume_uses_daily_histogram() {
        let body = event_volume_body("30d");
        assert_eq!(
            body["aggs"]["per_day"]["date_histogram"]["calendar_interval"],
            "day"
        );
    }
}
