//! The memory graph ("second brain"): the storage contract for
//! conversation/entity/relationship upserts, weighted recall queries, the
//! in-memory implementation, and the capture consolidator.

pub mod consolidator;
pub mod graph;
pub mod in_memory;
pub mod scoring;
pub mod types;

pub use consolidator::{ConsolidationReport, Consolidator};
pub use graph::MemoryGraph;
pub use in_memory::InMemoryGraph;
pub use types::*;

/// Naive entity extraction: capitalized multi-letter tokens, deduplicated in
/// order of first mention. Good enough to key graph lookups and memory
/// enrichment without a model call.
pub fn extract_entities(text: &str, limit: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut entities = Vec::new();
    for token in text.split(|c: char| !c.is_alphanumeric() && c != '-') {
        if entities.len() >= limit {
            break;
        }
        if token.len() < 3 {
            continue;
        }
        let mut chars = token.chars();
        let first_upper = chars.next().is_some_and(|c| c.is_uppercase());
        let has_lower = token.chars().any(|c| c.is_lowercase());
        if first_upper && has_lower && seen.insert(token.to_string()) {
            entities.push(token.to_string());
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_capitalized_tokens_in_order() {
        let entities = extract_entities("Ask Alice about the Berlin trip with Alice", 10);
        assert_eq!(entities, vec!["Ask", "Alice", "Berlin"]);
    }

    #[test]
    fn skips_acronyms_and_short_tokens() {
        let entities = extract_entities("the CPU and the GPU ran Helmsman at 99", 10);
        assert_eq!(entities, vec!["Helmsman"]);
    }

    #[test]
    fn respects_limit() {
        let entities = extract_entities("Alpha Bravo Charlie Delta", 2);
        assert_eq!(entities.len(), 2);
    }
}
