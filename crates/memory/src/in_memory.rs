//! In-process memory graph.
//!
//! Used by tests and as the local fallback when no external graph is
//! configured. Nodes reference each other by id only: edges are rows in a
//! keyed map, never object pointers, so the (potentially cyclic) graph
//! shape cannot create ownership cycles.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;

use helm_domain::Result;

use crate::graph::MemoryGraph;
use crate::scoring::relevance_scores;
use crate::types::{
    ConversationNode, Entity, MemoryQuery, MemoryQueryResult, Relationship, DISCUSSES,
};

#[derive(Default)]
struct GraphState {
    conversations: HashMap<String, ConversationNode>,
    entities: HashMap<String, Entity>,
    /// Keyed by (source_id, target_id, type).
    relationships: HashMap<(String, String, String), Relationship>,
}

#[derive(Default)]
pub struct InMemoryGraph {
    state: RwLock<GraphState>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_count(&self) -> usize {
        self.state.read().conversations.len()
    }

    pub fn entity(&self, name: &str) -> Option<Entity> {
        self.state.read().entities.get(name).cloned()
    }

    pub fn relationship(&self, source: &str, target: &str, rel_type: &str) -> Option<Relationship> {
        self.state
            .read()
            .relationships
            .get(&(source.to_string(), target.to_string(), rel_type.to_string()))
            .cloned()
    }
}

#[async_trait]
impl MemoryGraph for InMemoryGraph {
    async fn create_conversation(&self, node: ConversationNode) -> Result<()> {
        let mut state = self.state.write();
        let now = Utc::now();

        for name in &node.key_entities {
            // Bump or create the mentioned entity.
            state
                .entities
                .entry(name.clone())
                .and_modify(|entity| {
                    entity.mention_count += 1;
                    entity.last_seen = now;
                })
                .or_insert_with(|| Entity {
                    name: name.clone(),
                    entity_type: "unknown".into(),
                    mention_count: 1,
                    first_seen: now,
                    last_seen: now,
                    properties: Default::default(),
                });

            let key = (node.conversation_id.clone(), name.clone(), DISCUSSES.to_string());
            state
                .relationships
                .entry(key)
                .and_modify(|edge| edge.weight += 1.0)
                .or_insert_with(|| Relationship {
                    source_id: node.conversation_id.clone(),
                    target_id: name.clone(),
                    rel_type: DISCUSSES.into(),
                    weight: 1.0,
                    properties: Default::default(),
                });
        }

        state.conversations.insert(node.conversation_id.clone(), node);
        Ok(())
    }

    async fn create_entity(&self, entity: Entity) -> Result<()> {
        let mut state = self.state.write();
        let now = Utc::now();
        state
            .entities
            .entry(entity.name.clone())
            .and_modify(|existing| {
                existing.mention_count += 1;
                existing.last_seen = now;
                existing.entity_type = entity.entity_type.clone();
                for (key, value) in &entity.properties {
                    existing.properties.insert(key.clone(), value.clone());
                }
            })
            .or_insert(entity);
        Ok(())
    }

    async fn create_relationship(&self, relationship: Relationship) -> Result<()> {
        let key = (
            relationship.source_id.clone(),
            relationship.target_id.clone(),
            relationship.rel_type.clone(),
        );
        let mut state = self.state.write();
        state
            .relationships
            .entry(key)
            .and_modify(|existing| {
                existing.weight = relationship.weight;
                for (prop, value) in &relationship.properties {
                    existing.properties.insert(prop.clone(), value.clone());
                }
            })
            .or_insert(relationship);
        Ok(())
    }

    async fn query_memory(&self, query: MemoryQuery) -> Result<MemoryQueryResult> {
        let state = self.state.read();
        let cutoff = query.recency_days.map(|days| Utc::now() - Duration::days(days));

        let mut conversations: Vec<ConversationNode> = state
            .conversations
            .values()
            .filter(|conversation| {
                if let Some(cutoff) = cutoff {
                    if conversation.timestamp < cutoff {
                        return false;
                    }
                }
                if !query.conversation_ids.is_empty()
                    && !query.conversation_ids.contains(&conversation.conversation_id)
                {
                    return false;
                }
                if !query.trace_ids.is_empty()
                    && !query.trace_ids.contains(&conversation.conversation_id)
                {
                    return false;
                }
                if !query.entity_names.is_empty()
                    && !query
                        .entity_names
                        .iter()
                        .any(|name| conversation.key_entities.contains(name))
                {
                    return false;
                }
                if !query.entity_types.is_empty() {
                    let matches_type = conversation.key_entities.iter().any(|name| {
                        state
                            .entities
                            .get(name)
                            .is_some_and(|entity| query.entity_types.contains(&entity.entity_type))
                    });
                    if !matches_type {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        conversations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if query.limit > 0 {
            conversations.truncate(query.limit);
        }

        let mentions: HashMap<String, u64> = state
            .entities
            .iter()
            .map(|(name, entity)| (name.clone(), entity.mention_count))
            .collect();
        drop(state);

        let scores = relevance_scores(&conversations, &query, &mentions);
        Ok(MemoryQueryResult {
            conversations,
            relevance_scores: scores,
        })
    }

    async fn entity_mentions(&self, names: &[String]) -> Result<HashMap<String, u64>> {
        let state = self.state.read();
        Ok(names
            .iter()
            .filter_map(|name| {
                state
                    .entities
                    .get(name)
                    .map(|entity| (name.clone(), entity.mention_count))
            })
            .collect())
    }
}
