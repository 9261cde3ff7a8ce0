// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user mood, attachment and open loops.
//!
//! [`EmotionalState`] holds the pure transitions. [`EmotionalCore`] loads,
//! mutates and saves the whole document under a per-user lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use pebble_core::PebbleError;
use pebble_storage::queries::emotional;
use pebble_storage::Database;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

pub const DEFAULT_MOOD: &str = "warm and attentive";
pub const DEFAULT_ATTACHMENT: f64 = 5.0;
pub const MAX_ATTACHMENT: f64 = 10.0;
pub const RECENT_MEMORY_LIMIT: usize = 20;
pub const OPEN_LOOP_LIMIT: usize = 50;
const DEFAULT_EXPECTED_TIME: &str = "soon";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    #[default]
    Pending,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLoop {
    pub topic: String,
    pub expected_time: String,
    #[serde(default)]
    pub status: LoopStatus,
    /// When the loop was last opened. Older documents lack it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

impl OpenLoop {
    fn matches(&self, topic: &str) -> bool {
        self.topic.trim().to_lowercase() == topic.to_lowercase()
    }

    pub fn is_pending(&self) -> bool {
        self.status == LoopStatus::Pending
    }
}

fn default_mood() -> String {
    DEFAULT_MOOD.to_string()
}

fn default_attachment() -> f64 {
    DEFAULT_ATTACHMENT
}

/// The per-user emotional document, stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    #[serde(default = "default_mood")]
    pub current_mood: String,
    #[serde(default = "default_attachment")]
    pub attachment_level: f64,
    #[serde(default)]
    pub recent_memories: Vec<String>,
    #[serde(default)]
    pub open_loops: Vec<OpenLoop>,
}

impl Default for EmotionalState {
    fn default() -> Self {
        Self {
            current_mood: default_mood(),
            attachment_level: DEFAULT_ATTACHMENT,
            recent_memories: Vec::new(),
            open_loops: Vec::new(),
        }
    }
}

fn keep_last<T>(items: &mut Vec<T>, limit: usize) {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
}

impl EmotionalState {
    /// Parses a stored document. Unreadable JSON yields the default state.
    pub fn from_json(user_id: &str, json: &str) -> Self {
        match serde_json::from_str::<Self>(json) {
            Ok(mut state) => {
                if !state.attachment_level.is_finite() {
                    state.attachment_level = DEFAULT_ATTACHMENT;
                }
                state.attachment_level = state.attachment_level.clamp(0.0, MAX_ATTACHMENT);
                state
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "corrupt emotional state, using default");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String, PebbleError> {
        serde_json::to_string(self)
            .map_err(|e| PebbleError::Internal(format!("serializing emotional state: {e}")))
    }

    /// Sets the mood and nudges attachment by `delta`, clamped to `[0, 10]`
    /// and rounded to two decimals.
    pub fn update_mood(&mut self, mood: &str, delta: f64) {
        let mood = mood.trim();
        if !mood.is_empty() {
            self.current_mood = mood.to_string();
            self.recent_memories.push(mood.to_string());
            keep_last(&mut self.recent_memories, RECENT_MEMORY_LIMIT);
        }
        if delta.is_finite() {
            let raw = self.attachment_level + delta;
            let rounded = (raw * 100.0).round() / 100.0;
            self.attachment_level = rounded.clamp(0.0, MAX_ATTACHMENT);
        }
    }

    /// Opens a loop, or refreshes and reopens an existing one with the same
    /// topic (case-insensitive). Blank topics are ignored.
    pub fn add_loop(&mut self, topic: &str, time_hint: &str, now: DateTime<Utc>) {
        let topic = topic.trim();
        if topic.is_empty() {
            return;
        }
        let hint = time_hint.trim();

        if let Some(existing) = self.open_loops.iter_mut().find(|l| l.matches(topic)) {
            if !hint.is_empty() {
                existing.expected_time = hint.to_string();
            } else if existing.expected_time.trim().is_empty() {
                existing.expected_time = DEFAULT_EXPECTED_TIME.to_string();
            }
            existing.status = LoopStatus::Pending;
            existing.opened_at = Some(now);
            return;
        }

        self.open_loops.push(OpenLoop {
            topic: topic.to_string(),
            expected_time: if hint.is_empty() {
                DEFAULT_EXPECTED_TIME.to_string()
            } else {
                hint.to_string()
            },
            status: LoopStatus::Pending,
            opened_at: Some(now),
        });
        keep_last(&mut self.open_loops, OPEN_LOOP_LIMIT);
    }

    /// Resolves every loop whose topic matches, ignoring case. Returns
    /// whether anything changed.
    pub fn close_loop(&mut self, topic: &str) -> bool {
        let topic = topic.trim();
        if topic.is_empty() {
            return false;
        }
        let mut changed = false;
        for l in self.open_loops.iter_mut().filter(|l| l.matches(topic)) {
            if l.status != LoopStatus::Resolved {
                l.status = LoopStatus::Resolved;
                changed = true;
            }
        }
        changed
    }

    pub fn pending_loops(&self) -> Vec<&OpenLoop> {
        self.open_loops.iter().filter(|l| l.is_pending()).collect()
    }

    /// Oldest pending loop opened at least `after` ago. Loops without an
    /// open time count as due.
    pub fn due_loop(&self, now: DateTime<Utc>, after: chrono::Duration) -> Option<&OpenLoop> {
        self.open_loops
            .iter()
            .filter(|l| l.is_pending())
            .find(|l| l.opened_at.is_none_or(|t| now - t >= after))
    }
}

/// Async manager for [`EmotionalState`] documents.
///
/// Each operation is one read-modify-write of the whole document, serialized
/// per user so concurrent updates for the same user never lose writes.
#[derive(Clone)]
pub struct EmotionalCore {
    db: Database,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl EmotionalCore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Current state, or the default if none is stored or it is corrupt.
    pub async fn load(&self, user_id: &str) -> Result<EmotionalState, PebbleError> {
        Ok(match emotional::load_state_json(&self.db, user_id).await? {
            Some(json) => EmotionalState::from_json(user_id, &json),
            None => EmotionalState::default(),
        })
    }

    async fn modify<F>(&self, user_id: &str, f: F) -> Result<EmotionalState, PebbleError>
    where
        F: FnOnce(&mut EmotionalState),
    {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;
        let mut state = self.load(user_id).await?;
        f(&mut state);
        emotional::save_state_json(&self.db, user_id, &state.to_json()?).await?;
        Ok(state)
    }

    pub async fn update(
        &self,
        user_id: &str,
        mood: &str,
        delta: f64,
    ) -> Result<EmotionalState, PebbleError> {
        self.modify(user_id, |s| s.update_mood(mood, delta)).await
    }

    pub async fn add_loop(
        &self,
        user_id: &str,
        topic: &str,
        time_hint: &str,
    ) -> Result<EmotionalState, PebbleError> {
        let now = Utc::now();
        self.modify(user_id, |s| s.add_loop(topic, time_hint, now))
            .await
    }

    pub async fn close_loop(
        &self,
        user_id: &str,
        topic: &str,
    ) -> Result<EmotionalState, PebbleError> {
        self.modify(user_id, |s| {
            s.close_loop(topic);
        })
        .await
    }

    pub async fn pending_loops(&self, user_id: &str) -> Result<Vec<OpenLoop>, PebbleError> {
        Ok(self
            .load(user_id)
            .await?
            .pending_loops()
            .into_iter()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        "2026-05-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn default_state() {
        let s = EmotionalState::default();
        assert_eq!(s.current_mood, "warm and attentive");
        assert_eq!(s.attachment_level, 5.0);
        assert!(s.recent_memories.is_empty());
        assert!(s.open_loops.is_empty());
    }

    #[test]
    fn update_rounds_and_tracks_memories() {
        let mut s = EmotionalState::default();
        s.update_mood("playful", 0.333);
        assert_eq!(s.current_mood, "playful");
        assert_eq!(s.attachment_level, 5.33);
        assert_eq!(s.recent_memories, vec!["playful"]);

        s.update_mood("   ", -0.33);
        assert_eq!(s.current_mood, "playful");
        assert_eq!(s.recent_memories.len(), 1);
        assert_eq!(s.attachment_level, 5.0);
    }

    #[test]
    fn recent_memories_keep_last_twenty() {
        let mut s = EmotionalState::default();
        for i in 0..25 {
            s.update_mood(&format!("mood{i}"), 0.0);
        }
        assert_eq!(s.recent_memories.len(), 20);
        assert_eq!(s.recent_memories[0], "mood5");
        assert_eq!(s.recent_memories[19], "mood24");
    }

    #[test]
    fn non_finite_delta_is_ignored() {
        let mut s = EmotionalState::default();
        s.update_mood("calm", f64::NAN);
        s.update_mood("calm", f64::INFINITY);
        assert_eq!(s.attachment_level, 5.0);
    }

    #[test]
    fn add_loop_merges_case_insensitively() {
        let mut s = EmotionalState::default();
        s.add_loop("pay rent", "tomorrow", t0());
        s.add_loop("Pay Rent", "next week", t0());
        assert_eq!(s.open_loops.len(), 1);
        assert_eq!(s.open_loops[0].topic, "pay rent");
        assert_eq!(s.open_loops[0].expected_time, "next week");
        assert!(s.open_loops[0].is_pending());
    }

    #[test]
    fn add_loop_ignores_blank_and_defaults_time() {
        let mut s = EmotionalState::default();
        s.add_loop("  ", "tomorrow", t0());
        assert!(s.open_loops.is_empty());
        s.add_loop("dentist", "", t0());
        assert_eq!(s.open_loops[0].expected_time, "soon");
    }

    #[test]
    fn open_loops_keep_last_fifty() {
        let mut s = EmotionalState::default();
        for i in 0..55 {
            s.add_loop(&format!("topic {i}"), "later", t0());
        }
        assert_eq!(s.open_loops.len(), 50);
        assert_eq!(s.open_loops[0].topic, "topic 5");
    }

    #[test]
    fn close_loop_touches_only_the_match() {
        let mut s = EmotionalState::default();
        s.add_loop("pay rent", "tomorrow", t0());
        s.add_loop("call mom", "tonight", t0());
        assert!(s.close_loop("PAY RENT"));
        assert_eq!(s.open_loops[0].status, LoopStatus::Resolved);
        assert_eq!(s.open_loops[1].status, LoopStatus::Pending);
        assert_eq!(s.pending_loops().len(), 1);

        let before = s.clone();
        assert!(!s.close_loop("walk the dog"));
        assert!(!s.close_loop("pay rent"));
        assert_eq!(s, before);
    }

    #[test]
    fn re_adding_resolved_loop_reopens_it() {
        let mut s = EmotionalState::default();
        s.add_loop("exam", "friday", t0());
        s.close_loop("exam");
        s.add_loop("Exam", "monday", t0());
        assert_eq!(s.open_loops.len(), 1);
        assert!(s.open_loops[0].is_pending());
        assert_eq!(s.open_loops[0].expected_time, "monday");
    }

    #[test]
    fn due_loop_respects_age() {
        let mut s = EmotionalState::default();
        s.add_loop("interview", "tomorrow", t0());
        let after = chrono::Duration::hours(12);
        assert!(s.due_loop(t0() + chrono::Duration::hours(1), after).is_none());
        assert_eq!(
            s.due_loop(t0() + chrono::Duration::hours(13), after).map(|l| l.topic.as_str()),
            Some("interview")
        );
    }

    #[test]
    fn corrupt_json_falls_back_to_default() {
        assert_eq!(EmotionalState::from_json("u1", "{not json"), EmotionalState::default());
    }

    #[test]
    fn legacy_document_without_open_time_parses() {
        let json = r#"{"current_mood":"sleepy","attachment_level":7.5,
            "recent_memories":["sleepy"],
            "open_loops":[{"topic":"gym","expected_time":"tomorrow","status":"pending"}]}"#;
        let s = EmotionalState::from_json("u1", json);
        assert_eq!(s.current_mood, "sleepy");
        assert_eq!(s.attachment_level, 7.5);
        assert!(s.open_loops[0].opened_at.is_none());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let s = EmotionalState::from_json("u1", r#"{"attachment_level": 42}"#);
        assert_eq!(s.current_mood, DEFAULT_MOOD);
        assert_eq!(s.attachment_level, 10.0);
    }

    #[tokio::test]
    async fn core_persists_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let core = EmotionalCore::new(db);
        core.update("u1", "excited", 1.5).await.unwrap();
        core.add_loop("u1", "job offer", "friday").await.unwrap();

        let s = core.load("u1").await.unwrap();
        assert_eq!(s.current_mood, "excited");
        assert_eq!(s.attachment_level, 6.5);
        assert_eq!(core.pending_loops("u1").await.unwrap().len(), 1);

        core.close_loop("u1", "Job Offer").await.unwrap();
        assert!(core.pending_loops("u1").await.unwrap().is_empty());
        assert_eq!(core.load("u2").await.unwrap(), EmotionalState::default());
    }

    #[tokio::test]
    async fn corrupt_stored_document_is_reset() {
        let db = Database::open_in_memory().await.unwrap();
        emotional::save_state_json(&db, "u1", "garbage").await.unwrap();
        let core = EmotionalCore::new(db);
        let s = core.update("u1", "", 1.0).await.unwrap();
        assert_eq!(s.attachment_level, 6.0);
        assert_eq!(s.current_mood, DEFAULT_MOOD);
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        let db = Database::open_in_memory().await.unwrap();
        let core = EmotionalCore::new(db);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let core = core.clone();
            handles.push(tokio::spawn(async move {
                core.update("u1", "fond", 0.1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let s = core.load("u1").await.unwrap();
        assert!((s.attachment_level - 6.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn attachment_stays_in_bounds(deltas in proptest::collection::vec(-1000.0f64..1000.0, 0..50)) {
            let mut s = EmotionalState::default();
            for d in deltas {
                s.update_mood("", d);
                prop_assert!((0.0..=10.0).contains(&s.attachment_level));
            }
        }
    }
}
