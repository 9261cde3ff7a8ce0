// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for the relational store.

use serde::{Deserialize, Serialize};

pub use pebble_core::types::{Role, Turn};

/// Relationship status every new profile starts with.
pub const DEFAULT_RELATIONSHIP_STATUS: &str = "We are getting to know each other.";

/// Durable per-user fields.
///
/// `summary` and `emotional_notes` only ever grow; `day_summary` is last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub bot_name: Option<String>,
    pub user_name: Option<String>,
    pub summary: String,
    pub emotional_notes: String,
    pub day_summary: String,
    pub location: String,
    pub relationship_status: String,
    pub updated_at: String,
}

impl UserProfile {
    /// The profile a user has before anything was written for them.
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            bot_name: None,
            user_name: None,
            summary: String::new(),
            emotional_notes: String::new(),
            day_summary: String::new(),
            location: String::new(),
            relationship_status: DEFAULT_RELATIONSHIP_STATUS.to_string(),
            updated_at: String::new(),
        }
    }

    /// Whether onboarding has collected both names.
    pub fn is_onboarded(&self) -> bool {
        self.bot_name.as_deref().is_some_and(|s| !s.trim().is_empty())
            && self.user_name.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    /// Folds one dream-cycle summary into the long-running fields.
    ///
    /// `summary` gains a dated line, `emotional_notes` gains the bare summary,
    /// and `day_summary` is replaced. Applying the same summary twice appends
    /// it twice.
    pub fn with_consolidation(&self, date: &str, summary: &str) -> Self {
        let summary = summary.trim();
        let mut merged = self.clone();
        merged.summary = format!("{}\n[{date}] {summary}", self.summary.trim())
            .trim()
            .to_string();
        merged.emotional_notes = format!("{}\n{summary}", self.emotional_notes.trim())
            .trim()
            .to_string();
        merged.day_summary = summary.to_string();
        merged
    }

    /// One block of prose for prompt construction.
    pub fn prompt_summary(&self) -> String {
        [
            self.summary.as_str(),
            self.emotional_notes.as_str(),
            self.day_summary.as_str(),
        ]
        .join("\n")
        .trim()
        .to_string()
    }
}

/// Partial profile write. `None` leaves the stored value unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub bot_name: Option<String>,
    pub user_name: Option<String>,
    pub location: Option<String>,
    pub relationship_status: Option<String>,
}

/// A row of the append-only turn log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedTurn {
    /// Monotonic sequence number.
    pub id: i64,
    pub user_id: String,
    pub turn: Turn,
    pub local_date: String,
}

/// A selectable persona.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub mode: String,
    pub system_prompt: String,
    pub is_custom: bool,
}

/// Which persona a user is talking to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveContext {
    pub user_id: String,
    pub current_mode: String,
    pub custom_persona_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consolidation_merge_appends_and_replaces() {
        let p = UserProfile::empty("u1");
        let once = p.with_consolidation("2026-03-01", "  walked the dog  ");
        assert_eq!(once.summary, "[2026-03-01] walked the dog");
        assert_eq!(once.emotional_notes, "walked the dog");
        assert_eq!(once.day_summary, "walked the dog");

        let twice = once.with_consolidation("2026-03-02", "rainy day");
        assert_eq!(
            twice.summary,
            "[2026-03-01] walked the dog\n[2026-03-02] rainy day"
        );
        assert_eq!(twice.emotional_notes, "walked the dog\nrainy day");
        assert_eq!(twice.day_summary, "rainy day");
    }

    #[test]
    fn repeated_merge_duplicates_without_corrupting() {
        let p = UserProfile::empty("u1")
            .with_consolidation("2026-03-01", "same")
            .with_consolidation("2026-03-01", "same");
        assert_eq!(p.summary, "[2026-03-01] same\n[2026-03-01] same");
        assert_eq!(p.day_summary, "same");
    }

    #[test]
    fn onboarding_requires_both_names() {
        let mut p = UserProfile::empty("u1");
        assert!(!p.is_onboarded());
        p.user_name = Some("Sam".into());
        assert!(!p.is_onboarded());
        p.bot_name = Some("  ".into());
        assert!(!p.is_onboarded());
        p.bot_name = Some("Pebble".into());
        assert!(p.is_onboarded());
    }
}
