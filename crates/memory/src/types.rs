use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One conversation in the graph; `conversation_id` is the request's trace id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationNode {
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Entity names this conversation discusses.
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A named entity; unique by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub mention_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A typed, weighted edge; unique by `(source_id, target_id, type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub weight: f64,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Edge type linking a conversation to the entities it mentions.
pub const DISCUSSES: &str = "DISCUSSES";

/// Recall query. All filters are conjunctive; empty filters match all.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub entity_names: Vec<String>,
    pub entity_types: Vec<String>,
    pub conversation_ids: Vec<String>,
    pub trace_ids: Vec<String>,
    pub recency_days: Option<i64>,
    pub limit: usize,
}

impl MemoryQuery {
    pub fn for_entities(names: Vec<String>, limit: usize) -> Self {
        Self {
            entity_names: names,
            limit,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQueryResult {
    pub conversations: Vec<ConversationNode>,
    /// conversation_id → relevance in [0, 1].
    pub relevance_scores: HashMap<String, f64>,
}
