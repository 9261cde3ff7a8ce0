// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retrieval orchestrator: embeds a query once and pulls the top-k events
//! and facts for one user into a labelled context block.

use std::fmt;
use std::sync::Arc;

use pebble_config::model::MemoryConfig;
use pebble_core::{EmbeddingAdapter, PebbleError};
use rand::Rng;
use tracing::{debug, warn};

use crate::metrics;
use crate::store::SemanticStore;
use crate::types::Collection;

/// Block returned for a blank query or when nothing could be retrieved.
pub const EMPTY_CONTEXT: &str = "[Past Related Events]: None\n[Relevant Facts]: None";

const EVENTS_LABEL: &str = "[Past Related Events]";
const FACTS_LABEL: &str = "[Relevant Facts]";

/// Retrieved texts, best match first in each section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBlock {
    pub events: Vec<String>,
    pub facts: Vec<String>,
}

impl ContextBlock {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.facts.is_empty()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn write_section(f: &mut fmt::Formatter<'_>, label: &str, items: &[String]) -> fmt::Result {
    if items.is_empty() {
        return write!(f, "{label}: None");
    }
    write!(f, "{label}:")?;
    for item in items {
        write!(f, "\n- {item}")?;
    }
    Ok(())
}

impl fmt::Display for ContextBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_section(f, EVENTS_LABEL, &self.events)?;
        writeln!(f)?;
        write_section(f, FACTS_LABEL, &self.facts)
    }
}

/// Similarity search over both collections plus random reminiscence.
pub struct RetrievalOrchestrator {
    store: Arc<SemanticStore>,
    embedder: Arc<dyn EmbeddingAdapter>,
    k: usize,
    recollection_pool: usize,
    recollection_max_chars: usize,
}

impl RetrievalOrchestrator {
    pub fn new(
        store: Arc<SemanticStore>,
        embedder: Arc<dyn EmbeddingAdapter>,
        config: &MemoryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            k: config.retrieval_k,
            recollection_pool: config.recollection_pool,
            recollection_max_chars: config.recollection_max_chars,
        }
    }

    /// Number of results per collection.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Top-k events and facts for `query`, scoped to `user_id`.
    ///
    /// A blank query short-circuits to an empty block without touching the
    /// embedder or the store.
    pub async fn retrieve_block(
        &self,
        query: &str,
        user_id: &str,
    ) -> Result<ContextBlock, PebbleError> {
        if query.trim().is_empty() {
            return Ok(ContextBlock::empty());
        }

        let vector = self.embedder.embed_one(query).await?;
        let events = self
            .store
            .query_similar(user_id, Collection::Events, &vector, self.k)
            .await?;
        let facts = self
            .store
            .query_similar(user_id, Collection::Facts, &vector, self.k)
            .await?;

        metrics::record_retrieval(events.len() + facts.len());
        debug!(
            user_id = %user_id,
            events = events.len(),
            facts = facts.len(),
            "retrieved context"
        );

        Ok(ContextBlock {
            events: events.into_iter().map(|s| s.record.text).collect(),
            facts: facts.into_iter().map(|s| s.record.text).collect(),
        })
    }

    /// Rendered context for prompting. Never fails: embedding or store errors
    /// degrade to [`EMPTY_CONTEXT`].
    pub async fn retrieve(&self, query: &str, user_id: &str) -> String {
        match self.retrieve_block(query, user_id).await {
            Ok(block) => block.render(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "memory retrieval failed (non-fatal)");
                EMPTY_CONTEXT.to_string()
            }
        }
    }

    /// One memory picked uniformly from the most recent records of both
    /// collections, cut to the configured length.
    pub async fn random_recollection<R: Rng + ?Sized>(
        &self,
        user_id: &str,
        rng: &mut R,
    ) -> Result<Option<String>, PebbleError> {
        let mut pool = self
            .store
            .recent(user_id, Collection::Events, self.recollection_pool)
            .await?;
        pool.extend(
            self.store
                .recent(user_id, Collection::Facts, self.recollection_pool)
                .await?,
        );
        if pool.is_empty() {
            return Ok(None);
        }

        let pick = &pool[rng.gen_range(0..pool.len())];
        let snippet = truncate_chars(&pick.text, self.recollection_max_chars)
            .trim()
            .to_string();
        Ok((!snippet.is_empty()).then_some(snippet))
    }
}

/// Prefix of `text` holding at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryRecord;
    use pebble_storage::Database;
    use pebble_test_utils::MockEmbedder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    async fn setup() -> (RetrievalOrchestrator, Arc<SemanticStore>, Arc<MockEmbedder>) {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(SemanticStore::new(db));
        let embedder = Arc::new(MockEmbedder::new());
        let orchestrator =
            RetrievalOrchestrator::new(store.clone(), embedder.clone(), &MemoryConfig::default());
        (orchestrator, store, embedder)
    }

    async fn add_event(store: &SemanticStore, embedder: &MockEmbedder, user: &str, text: &str) {
        let v = embedder.embed_one(text).await.unwrap();
        store
            .add(vec![MemoryRecord::daily_summary(user, "2026-01-01", text, v)])
            .await
            .unwrap();
    }

    async fn add_fact(store: &SemanticStore, embedder: &MockEmbedder, user: &str, i: usize, text: &str) {
        let v = embedder.embed_one(text).await.unwrap();
        store
            .add(vec![MemoryRecord::fact(user, "2026-01-01", "b1", i, text, v)])
            .await
            .unwrap();
    }

    #[test]
    fn empty_block_renders_placeholder() {
        assert_eq!(ContextBlock::empty().render(), EMPTY_CONTEXT);
    }

    #[test]
    fn block_renders_bullets_and_none() {
        let block = ContextBlock {
            events: vec!["went hiking".into(), "baked bread".into()],
            facts: vec![],
        };
        assert_eq!(
            block.render(),
            "[Past Related Events]:\n- went hiking\n- baked bread\n[Relevant Facts]: None"
        );
    }

    #[tokio::test]
    async fn blank_query_returns_placeholder_regardless_of_store() {
        let (orchestrator, store, embedder) = setup().await;
        add_event(&store, &embedder, "u1", "we talked about the beach").await;
        assert_eq!(orchestrator.retrieve("", "u1").await, EMPTY_CONTEXT);
        assert_eq!(orchestrator.retrieve("   \n", "u1").await, EMPTY_CONTEXT);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn exact_text_ranks_first() {
        let (orchestrator, store, embedder) = setup().await;
        add_event(&store, &embedder, "u1", "walked the dog in the rain").await;
        add_event(&store, &embedder, "u1", "cooked pasta for dinner with friends").await;
        add_fact(&store, &embedder, "u1", 0, "user has a dog named Biscuit").await;

        let block = orchestrator
            .retrieve_block("cooked pasta for dinner with friends", "u1")
            .await
            .unwrap();
        assert_eq!(block.events[0], "cooked pasta for dinner with friends");
        assert_eq!(block.facts.len(), 1);
    }

    #[tokio::test]
    async fn other_users_records_are_invisible() {
        let (orchestrator, store, embedder) = setup().await;
        add_event(&store, &embedder, "alice", "secret garden plans").await;
        add_fact(&store, &embedder, "alice", 0, "secret garden plans").await;

        let rendered = orchestrator.retrieve("secret garden plans", "bob").await;
        assert_eq!(rendered, EMPTY_CONTEXT);
    }

    #[tokio::test]
    async fn each_collection_is_capped_at_k() {
        let (orchestrator, store, embedder) = setup().await;
        for i in 0..6 {
            add_fact(&store, &embedder, "u1", i, &format!("likes tea number {i}")).await;
        }
        let block = orchestrator.retrieve_block("tea", "u1").await.unwrap();
        assert_eq!(block.facts.len(), orchestrator.k());
        assert!(block.events.is_empty());
    }

    #[tokio::test]
    async fn recollection_is_none_without_records() {
        let (orchestrator, _, _) = setup().await;
        let mut rng = StdRng::seed_from_u64(7);
        assert!(orchestrator
            .random_recollection("u1", &mut rng)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn recollection_is_truncated_and_scoped() {
        let (orchestrator, store, embedder) = setup().await;
        let long = "a".repeat(500);
        add_event(&store, &embedder, "u1", &long).await;
        add_event(&store, &embedder, "u2", "not yours").await;

        let mut rng = StdRng::seed_from_u64(1);
        let snippet = orchestrator
            .random_recollection("u1", &mut rng)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snippet.chars().count(), 240);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("", 3), "");
    }
}
