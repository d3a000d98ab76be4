use async_trait::async_trait;

use helm_domain::Result;

use crate::types::{
    ConversationNode, Entity, MemoryQuery, MemoryQueryResult, Relationship,
};

/// Storage contract for the memory graph.
///
/// Implementations are external (a graph database driver) or local
/// ([`crate::InMemoryGraph`]). All writes are upserts so replays and
/// consolidation re-runs are harmless.
#[async_trait]
pub trait MemoryGraph: Send + Sync {
    /// Upsert by `conversation_id`; links the conversation to each of its
    /// `key_entities` with a `DISCUSSES` edge and bumps those entities'
    /// mention counts.
    async fn create_conversation(&self, node: ConversationNode) -> Result<()>;

    /// Upsert by name: sets `first_seen` on insert, refreshes `last_seen`,
    /// increments `mention_count`.
    async fn create_entity(&self, entity: Entity) -> Result<()>;

    /// Upsert keyed by `(source_id, target_id, type)`; updates weight and
    /// properties.
    async fn create_relationship(&self, relationship: Relationship) -> Result<()>;

    /// Filtered recall with relevance scores.
    async fn query_memory(&self, query: MemoryQuery) -> Result<MemoryQueryResult>;

    /// Mention counts for the named entities (missing names are omitted).
    async fn entity_mentions(&self, names: &[String]) -> Result<std::collections::HashMap<String, u64>>;
}
