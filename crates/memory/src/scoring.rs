//! Relevance scoring for recall results.
//!
//! Score = recency (0–0.4, scaled across the result set's time range)
//!       + entity match (0–0.4 proportional overlap; 0.2 neutral when the
//!         query has no entity filter)
//!       + entity importance (0–0.2, average of `min(mentions/100, 1)` over
//!         matched entities),
//! capped at 1.0.

use std::collections::HashMap;

use crate::types::{ConversationNode, MemoryQuery};

pub fn relevance_scores(
    conversations: &[ConversationNode],
    query: &MemoryQuery,
    entity_mentions: &HashMap<String, u64>,
) -> HashMap<String, f64> {
    if conversations.is_empty() {
        return HashMap::new();
    }

    let newest = conversations.iter().map(|c| c.timestamp).max();
    let oldest = conversations.iter().map(|c| c.timestamp).min();
    let range_seconds = match (newest, oldest) {
        (Some(newest), Some(oldest)) => (newest - oldest).num_seconds().max(0) as f64,
        _ => 0.0,
    };

    let mut scores = HashMap::new();
    for conversation in conversations {
        let mut score = 0.0;

        // 1. Recency.
        if range_seconds > 0.0 {
            let age = newest
                .map(|n| (n - conversation.timestamp).num_seconds().max(0) as f64)
                .unwrap_or(0.0);
            score += (range_seconds - age) / range_seconds * 0.4;
        } else {
            // Single timestamp across the set: everything is equally fresh.
            score += 0.4;
        }

        // 2. Entity match.
        let matched: Vec<&String> = query
            .entity_names
            .iter()
            .filter(|name| conversation.key_entities.contains(name))
            .collect();
        if query.entity_names.is_empty() {
            score += 0.2;
        } else {
            score += matched.len() as f64 / query.entity_names.len() as f64 * 0.4;
        }

        // 3. Entity importance.
        if !matched.is_empty() {
            let importance: f64 = matched
                .iter()
                .map(|name| {
                    let mentions = entity_mentions.get(name.as_str()).copied().unwrap_or(0);
                    (mentions as f64 / 100.0).min(1.0)
                })
                .sum::<f64>()
                / matched.len() as f64;
            score += importance * 0.2;
        }

        scores.insert(conversation.conversation_id.clone(), score.min(1.0));
    }
    scores
}
