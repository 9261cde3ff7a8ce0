// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dream cycle: compresses a batch of turns into a narrative summary and
//! atomic facts, then writes them to the semantic store and the profile.
//!
//! The two stores are written independently. A crash between the writes
//! leaves the semantic store ahead of the profile; retrieval reads only the
//! semantic store and profile prompts read only the profile, so neither
//! path needs the other to be complete.

use std::sync::Arc;

use chrono::{Days, Local, NaiveDate};
use pebble_core::types::{render_transcript, ProviderRequest};
use pebble_core::{EmbeddingAdapter, PebbleError, ProviderAdapter, Turn};
use pebble_storage::queries::{profiles, turns};
use pebble_storage::Database;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::SemanticStore;
use crate::types::{short_uuid, MemoryRecord};

/// Prompt for one consolidation pass. `{bot_name}` and `{transcript}` are
/// substituted before sending.
pub const DREAM_PROMPT: &str = r#"You are {bot_name}, reflecting quietly on a conversation while the user sleeps.

Read the transcript below and answer with a single JSON object:
{"summary": "<a warm, first-person narrative of what happened and how the user felt, 2-5 sentences>",
 "facts": ["<one atomic, durable fact about the user per entry>"]}

Facts should be standalone statements (e.g. "The user's sister is called Mia").
Use an empty list when nothing is worth remembering. Output JSON only.

Transcript:
{transcript}"#;

/// Parsed model output of a dream pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DreamOutput {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub facts: Vec<String>,
}

/// Parses a dream response.
///
/// Accepts a bare JSON object, one wrapped in a code fence, or one embedded
/// in prose. Anything else is taken verbatim as the summary with no facts.
pub fn parse_dream_response(response: &str) -> DreamOutput {
    let trimmed = strip_code_fence(response.trim());

    if let Some(json) = json_object(trimmed)
        && let Ok(mut parsed) = serde_json::from_str::<DreamOutput>(json)
    {
        parsed.summary = parsed.summary.trim().to_string();
        parsed.facts = parsed
            .facts
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        return parsed;
    }

    DreamOutput {
        summary: trimmed.trim().to_string(),
        facts: Vec::new(),
    }
}

/// The outermost `{...}` span of a model response, ignoring any code fence
/// or prose around it.
pub fn json_object(text: &str) -> Option<&str> {
    let text = strip_code_fence(text.trim());
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => Some(&text[start..=end]),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest)
}

/// What one successful pass wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationOutcome {
    pub summary: String,
    pub facts: Vec<String>,
    /// Semantic records written; zero when embedding failed.
    pub records_written: usize,
}

/// Turns batches of conversation into long-term memory. Holds no state
/// between calls.
pub struct ConsolidationEngine {
    provider: Arc<dyn ProviderAdapter>,
    embedder: Arc<dyn EmbeddingAdapter>,
    store: Arc<SemanticStore>,
    db: Database,
    bot_name: String,
    max_tokens: u32,
}

impl ConsolidationEngine {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
        store: Arc<SemanticStore>,
        db: Database,
    ) -> Self {
        Self {
            provider,
            embedder,
            store,
            db,
            bot_name: "Pebble".to_string(),
            max_tokens: 1024,
        }
    }

    pub fn with_bot_name(mut self, name: impl Into<String>) -> Self {
        self.bot_name = name.into();
        self
    }

    pub fn build_prompt(&self, batch: &[Turn]) -> String {
        DREAM_PROMPT
            .replace("{bot_name}", &self.bot_name)
            .replace("{transcript}", &render_transcript(batch))
    }

    /// Consolidates `batch` under `date` (`YYYY-MM-DD`).
    ///
    /// An empty batch or an empty model summary abandons the pass with
    /// [`PebbleError::Consolidation`] before anything is written. Running
    /// twice on the same batch writes two summaries.
    pub async fn consolidate(
        &self,
        user_id: &str,
        batch: &[Turn],
        date: &str,
    ) -> Result<ConsolidationOutcome, PebbleError> {
        if batch.is_empty() {
            return Err(PebbleError::Consolidation(format!(
                "no turns to consolidate for {user_id}"
            )));
        }

        let mut request = ProviderRequest::prompt(None, self.build_prompt(batch));
        request.max_tokens = Some(self.max_tokens);
        request.temperature = Some(0.4);
        let response = self.provider.complete(request).await?;

        let DreamOutput { summary, facts } = parse_dream_response(&response.content);
        if summary.is_empty() {
            metrics::record_consolidation(false);
            return Err(PebbleError::Consolidation(format!(
                "model returned an empty summary for {user_id}"
            )));
        }

        let records_written = match self.archive(user_id, date, &summary, &facts).await {
            Ok(n) => n,
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    error = %e,
                    "archiving dream records failed, profile still updated (non-fatal)"
                );
                0
            }
        };

        profiles::apply_consolidation(&self.db, user_id, date, &summary).await?;
        metrics::record_consolidation(true);
        info!(
            user_id = %user_id,
            date = %date,
            turns = batch.len(),
            facts = facts.len(),
            records = records_written,
            "dream cycle complete"
        );

        Ok(ConsolidationOutcome {
            summary,
            facts,
            records_written,
        })
    }

    async fn archive(
        &self,
        user_id: &str,
        date: &str,
        summary: &str,
        facts: &[String],
    ) -> Result<usize, PebbleError> {
        let mut texts = Vec::with_capacity(facts.len() + 1);
        texts.push(summary.to_string());
        texts.extend(facts.iter().cloned());

        let output = self
            .embedder
            .embed(pebble_core::types::EmbeddingInput { texts })
            .await?;
        if output.embeddings.len() != facts.len() + 1 {
            return Err(PebbleError::embedding(format!(
                "expected {} vectors, got {}",
                facts.len() + 1,
                output.embeddings.len()
            )));
        }

        let mut vectors = output.embeddings.into_iter();
        let mut records = Vec::with_capacity(facts.len() + 1);
        if let Some(v) = vectors.next() {
            records.push(MemoryRecord::daily_summary(user_id, date, summary, v));
        }
        let batch = short_uuid();
        for (idx, (fact, v)) in facts.iter().zip(vectors).enumerate() {
            records.push(MemoryRecord::fact(user_id, date, &batch, idx, fact, v));
        }

        self.store.add(records).await
    }

    /// Consolidates everything logged for `user_id` on `date`.
    ///
    /// Returns `Ok(None)` when the day has no turns.
    pub async fn consolidate_day(
        &self,
        user_id: &str,
        date: &str,
    ) -> Result<Option<ConsolidationOutcome>, PebbleError> {
        let logged = turns::turns_for_day(&self.db, user_id, date).await?;
        if logged.is_empty() {
            debug!(user_id = %user_id, date = %date, "no logs to dream about");
            return Ok(None);
        }
        let batch: Vec<Turn> = logged.into_iter().map(|l| l.turn).collect();
        self.consolidate(user_id, &batch, date).await.map(Some)
    }

    /// Dream cycle over every user with logs. One user's failure does not
    /// stop the others; returns the users that were consolidated, in id order.
    pub async fn run_for_all_users(&self, date: &str) -> Result<Vec<String>, PebbleError> {
        let users = turns::users_with_logs(&self.db).await?;
        let mut done = Vec::new();
        for user_id in &users {
            match self.consolidate_day(user_id, date).await {
                Ok(Some(_)) => done.push(user_id.clone()),
                Ok(None) => {}
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "dream cycle failed (non-fatal)");
                }
            }
        }
        info!(users = users.len(), consolidated = done.len(), date = %date, "nightly dream cycle finished");
        Ok(done)
    }

    /// Deletes semantic records older than `retention_days` before today.
    pub async fn prune(&self, retention_days: u32) -> Result<usize, PebbleError> {
        let cutoff = retention_cutoff(Local::now().date_naive(), retention_days);
        let removed = self.store.prune_before(&cutoff).await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "pruned expired memories");
        }
        Ok(removed)
    }
}

/// First date (`YYYY-MM-DD`) that survives a retention window. A window
/// reaching past the calendar keeps everything.
pub fn retention_cutoff(today: NaiveDate, retention_days: u32) -> String {
    today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN)
        .format("%Y-%m-%d")
        .to_string()
}

/// A consolidation pass meant to run off the turn path. Errors are logged
/// and dropped so they never reach the turn that triggered the pass.
pub async fn consolidate_in_background(
    engine: Arc<ConsolidationEngine>,
    user_id: String,
    batch: Vec<Turn>,
    date: String,
) {
    if let Err(e) = engine.consolidate(&user_id, &batch, &date).await {
        warn!(user_id = %user_id, error = %e, "background consolidation failed (non-fatal)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Collection;
    use pebble_test_utils::{MockEmbedder, MockProvider};
    use tracing_test::traced_test;

    const DATE: &str = "2026-03-14";

    async fn engine_with(
        responses: Vec<&str>,
    ) -> (ConsolidationEngine, Arc<SemanticStore>, Database, Arc<MockProvider>) {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(SemanticStore::new(db.clone()));
        let provider = Arc::new(MockProvider::with_responses(responses));
        let engine = ConsolidationEngine::new(
            provider.clone(),
            Arc::new(MockEmbedder::new()),
            store.clone(),
            db.clone(),
        );
        (engine, store, db, provider)
    }

    fn batch() -> Vec<Turn> {
        vec![
            Turn::user("I adopted a cat called Miso today"),
            Turn::assistant("That's wonderful! How is Miso settling in?"),
        ]
    }

    #[test]
    fn parses_plain_json() {
        let out = parse_dream_response(r#"{"summary": "We talked.", "facts": ["a", " ", "b"]}"#);
        assert_eq!(out.summary, "We talked.");
        assert_eq!(out.facts, vec!["a", "b"]);
    }

    #[test]
    fn parses_fenced_json() {
        let out = parse_dream_response("```json\n{\"summary\": \"fenced\", \"facts\": []}\n```");
        assert_eq!(out.summary, "fenced");
        assert!(out.facts.is_empty());
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let out = parse_dream_response("Sure! {\"summary\": \"inner\"} hope that helps");
        assert_eq!(out.summary, "inner");
    }

    #[test]
    fn prose_becomes_summary() {
        let out = parse_dream_response("  Today the user felt tired but hopeful.  ");
        assert_eq!(out.summary, "Today the user felt tired but hopeful.");
        assert!(out.facts.is_empty());
    }

    #[test]
    fn prompt_contains_transcript_and_name() {
        let engine_prompt = DREAM_PROMPT
            .replace("{bot_name}", "Nova")
            .replace("{transcript}", &render_transcript(&batch()));
        assert!(engine_prompt.contains("You are Nova"));
        assert!(engine_prompt.contains("User: I adopted a cat called Miso today"));
    }

    #[test]
    fn cutoff_counts_back_from_today() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert_eq!(retention_cutoff(today, 30), "2026-02-12");
    }

    #[tokio::test]
    async fn consolidate_writes_both_stores() {
        let (engine, store, db, _) = engine_with(vec![
            r#"{"summary": "The user adopted a cat.", "facts": ["The user has a cat named Miso"]}"#,
        ])
        .await;

        let out = engine.consolidate("u1", &batch(), DATE).await.unwrap();
        assert_eq!(out.records_written, 2);
        assert_eq!(store.count("u1", Collection::Events).await.unwrap(), 1);
        assert_eq!(store.count("u1", Collection::Facts).await.unwrap(), 1);

        let profile = profiles::get_profile(&db, "u1").await.unwrap().unwrap();
        assert_eq!(profile.summary, "[2026-03-14] The user adopted a cat.");
        assert_eq!(profile.emotional_notes, "The user adopted a cat.");
        assert_eq!(profile.day_summary, "The user adopted a cat.");
    }

    #[tokio::test]
    async fn consolidated_summary_is_its_own_best_match() {
        let (engine, store, _, _) = engine_with(vec![
            r#"{"summary": "We planned a picnic by the lake", "facts": []}"#,
        ])
        .await;
        engine.consolidate("u1", &batch(), DATE).await.unwrap();
        store
            .add(vec![MemoryRecord::daily_summary(
                "u1",
                DATE,
                "argued about taxes",
                MockEmbedder::new().embed_one("argued about taxes").await.unwrap(),
            )])
            .await
            .unwrap();

        let q = MockEmbedder::new()
            .embed_one("We planned a picnic by the lake")
            .await
            .unwrap();
        let hits = store.query_similar("u1", Collection::Events, &q, 3).await.unwrap();
        assert_eq!(hits[0].record.text, "We planned a picnic by the lake");
        assert!(hits[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn repeated_batches_append_without_corruption() {
        let (engine, store, db, _) = engine_with(vec![
            r#"{"summary": "first", "facts": []}"#,
            r#"{"summary": "first", "facts": []}"#,
        ])
        .await;
        engine.consolidate("u1", &batch(), DATE).await.unwrap();
        engine.consolidate("u1", &batch(), DATE).await.unwrap();

        assert_eq!(store.count("u1", Collection::Events).await.unwrap(), 2);
        let profile = profiles::get_profile(&db, "u1").await.unwrap().unwrap();
        assert_eq!(profile.summary, "[2026-03-14] first\n[2026-03-14] first");
        assert_eq!(profile.day_summary, "first");
    }

    #[tokio::test]
    async fn empty_batch_is_rejected_without_calling_model() {
        let (engine, _, _, provider) = engine_with(vec![]).await;
        let err = engine.consolidate("u1", &[], DATE).await.unwrap_err();
        assert!(matches!(err, PebbleError::Consolidation(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_summary_abandons_pass() {
        let (engine, store, db, _) = engine_with(vec!["   "]).await;
        let err = engine.consolidate("u1", &batch(), DATE).await.unwrap_err();
        assert!(matches!(err, PebbleError::Consolidation(_)));
        assert_eq!(store.count("u1", Collection::Events).await.unwrap(), 0);
        assert!(profiles::get_profile(&db, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn provider_failure_leaves_stores_untouched() {
        let (engine, store, db, provider) = engine_with(vec![]).await;
        provider.fail_next(1);
        assert!(engine.consolidate("u1", &batch(), DATE).await.is_err());
        assert_eq!(store.count("u1", Collection::Events).await.unwrap(), 0);
        assert!(profiles::get_profile(&db, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dream_cycle_covers_every_logged_user() {
        let (engine, store, db, _) = engine_with(vec![
            r#"{"summary": "alice day", "facts": []}"#,
            r#"{"summary": "bob day", "facts": []}"#,
        ])
        .await;
        let today = turns::local_date_of(&chrono::Utc::now());
        for user in ["alice", "bob"] {
            turns::append_turn(&db, user, &Turn::user("hello")).await.unwrap();
        }

        assert_eq!(engine.run_for_all_users(&today).await.unwrap(), vec!["alice", "bob"]);
        assert_eq!(store.count("alice", Collection::Events).await.unwrap(), 1);
        assert_eq!(store.count("bob", Collection::Events).await.unwrap(), 1);
        assert!(engine.consolidate_day("carol", &today).await.unwrap().is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn background_failure_is_logged_and_swallowed() {
        let (engine, store, _, provider) = engine_with(vec![]).await;
        provider.fail_next(1);
        consolidate_in_background(Arc::new(engine), "u1".into(), batch(), DATE.into()).await;
        assert_eq!(store.count("u1", Collection::Events).await.unwrap(), 0);
        assert!(logs_contain("background consolidation failed (non-fatal)"));
    }

    #[tokio::test]
    #[traced_test]
    async fn embedding_failure_still_updates_profile() {
        let db = Database::open_in_memory().await.unwrap();
        let store = Arc::new(SemanticStore::new(db.clone()));
        let embedder = Arc::new(MockEmbedder::new());
        embedder.set_failing(true);
        let engine = ConsolidationEngine::new(
            Arc::new(MockProvider::with_responses(vec![
                r#"{"summary": "quiet day", "facts": ["likes tea"]}"#,
            ])),
            embedder,
            store.clone(),
            db.clone(),
        );
        let outcome = engine.consolidate("u1", &batch(), DATE).await.unwrap();

        assert_eq!(outcome.records_written, 0);
        assert_eq!(store.count("u1", Collection::Events).await.unwrap(), 0);
        let profile = profiles::get_profile(&db, "u1").await.unwrap().unwrap();
        assert_eq!(profile.day_summary, "quiet day");
        assert!(logs_contain("archiving dream records failed"));
    }

    #[test]
    fn huge_retention_window_keeps_everything() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert_eq!(
            retention_cutoff(today, u32::MAX),
            NaiveDate::MIN.format("%Y-%m-%d").to_string()
        );
    }
}
