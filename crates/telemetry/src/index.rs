//! Thin HTTP/JSON client for the search index.
//!
//! The index speaks an Elasticsearch-compatible document API: daily indices,
//! `PUT <index>/_doc/<id>` for idempotent upserts, `POST <index>/_doc` for
//! auto-assigned ids. Behind the [`IndexBackend`] trait so tests and the
//! backfill worker can run against a recording fake.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::time::Duration;

use helm_domain::{Error, Result};

/// Daily event-log index: `agent-logs-YYYY.MM.DD`.
pub fn daily_log_index(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}-{}", date.format("%Y.%m.%d"))
}

/// Daily derived-record index (captures, reflections): `<prefix>-YYYY-MM-DD`.
pub fn daily_capture_index(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}-{}", date.format("%Y-%m-%d"))
}

/// Abstract index operations used by the forwarder, backfill worker, and
/// lifecycle cleanup.
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Index one document. A provided `doc_id` makes the write an idempotent
    /// upsert; `None` lets the index assign an id. Returns the document id.
    async fn index_document(
        &self,
        index: &str,
        document: &Value,
        doc_id: Option<&str>,
    ) -> Result<String>;

    /// List index names matching `<prefix>-*`.
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete one index by exact name.
    async fn delete_index(&self, name: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTTP implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HttpSearchIndex {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSearchIndex {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        // Local single-node indices run without certificates.
        let insecure = base_url.starts_with("http://localhost")
            || base_url.starts_with("http://127.0.0.1");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| Error::Http(format!("failed to build index client: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> Error {
        if status.as_u16() == 429 {
            Error::RateLimited(format!("index HTTP 429: {body}"))
        } else if status.is_server_error() {
            Error::Server(format!("index HTTP {status}: {body}"))
        } else {
            Error::Http(format!("index HTTP {status}: {body}"))
        }
    }
}

#[async_trait]
impl IndexBackend for HttpSearchIndex {
    async fn index_document(
        &self,
        index: &str,
        document: &Value,
        doc_id: Option<&str>,
    ) -> Result<String> {
        let request = match doc_id {
            Some(id) => self
                .client
                .put(format!("{}/{index}/_doc/{id}", self.base_url)),
            None => self.client.post(format!("{}/{index}/_doc", self.base_url)),
        };

        let response = request
            .json(document)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("index write timed out: {e}"))
                } else {
                    Error::Http(format!("index write failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("index response not JSON: {e}")))?;
        let id = body
            .get("_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| doc_id.map(str::to_string))
            .ok_or_else(|| Error::InvalidResponse("index response missing _id".into()))?;
        Ok(id)
    }

    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/_cat/indices/{prefix}-*?format=json", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("index list failed: {e}")))?;

        if response.status().as_u16() == 404 {
            return Ok(Vec::new());
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("index list not JSON: {e}")))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("index").and_then(|v| v.as_str()))
            .map(str::to_string)
            .collect())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| Error::Http(format!("index delete failed: {e}")))?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }
        Ok(())
    }
}

/// Parse the trailing `YYYY-MM-DD` (or `YYYY.MM.DD`) suffix of a daily index
/// name. Used by retention cleanup to find indices past the bound.
pub fn index_date_suffix(name: &str) -> Option<NaiveDate> {
    let suffix = name.rsplit('-').take(3).collect::<Vec<_>>();
    if suffix.len() == 3 {
        // captures style: prefix-YYYY-MM-DD
        let joined = format!("{}-{}-{}", suffix[2], suffix[1], suffix[0]);
        if let Ok(date) = NaiveDate::parse_from_str(&joined, "%Y-%m-%d") {
            return Some(date);
        }
    }
    // logs style: prefix-YYYY.MM.DD
    let tail = name.rsplit('-').next()?;
    NaiveDate::parse_from_str(tail, "%Y.%m.%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_index_names() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(daily_log_index("agent-logs", date), "agent-logs-2026.03.09");
        assert_eq!(
            daily_capture_index("agent-captains-captures", date),
            "agent-captains-captures-2026-03-09"
        );
    }

    #[test]
    fn date_suffix_parses_both_styles() {
        assert_eq!(
            index_date_suffix("agent-logs-2026.03.09"),
            NaiveDate::from_ymd_opt(2026, 3, 9)
        );
        assert_eq!(
            index_date_suffix("agent-captains-reflections-2026-03-09"),
            NaiveDate::from_ymd_opt(2026, 3, 9)
        );
        assert_eq!(index_date_suffix("agent-logs"), None);
    }
}
