// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! User profile reads and merge-writes.
//!
//! Both write paths run their read and write inside one connection call, so
//! the single connection thread makes each merge atomic per user.

use pebble_core::PebbleError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::models::{ProfileUpdate, UserProfile};
use crate::queries::now_timestamp;

const SELECT_PROFILE: &str = "SELECT user_id, bot_name, user_name, summary, emotional_notes,
        day_summary, location, relationship_status, updated_at
 FROM user_profiles WHERE user_id = ?1";

fn row_to_profile(row: &rusqlite::Row<'_>) -> Result<UserProfile, rusqlite::Error> {
    Ok(UserProfile {
        user_id: row.get(0)?,
        bot_name: row.get(1)?,
        user_name: row.get(2)?,
        summary: row.get(3)?,
        emotional_notes: row.get(4)?,
        day_summary: row.get(5)?,
        location: row.get(6)?,
        relationship_status: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn load(conn: &rusqlite::Connection, user_id: &str) -> Result<Option<UserProfile>, rusqlite::Error> {
    conn.query_row(SELECT_PROFILE, params![user_id], row_to_profile)
        .optional()
}

fn store(conn: &rusqlite::Connection, profile: &UserProfile) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO user_profiles (user_id, bot_name, user_name, summary, emotional_notes,
             day_summary, location, relationship_status, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(user_id) DO UPDATE SET
             bot_name = excluded.bot_name,
             user_name = excluded.user_name,
             summary = excluded.summary,
             emotional_notes = excluded.emotional_notes,
             day_summary = excluded.day_summary,
             location = excluded.location,
             relationship_status = excluded.relationship_status,
             updated_at = excluded.updated_at",
        params![
            profile.user_id,
            profile.bot_name,
            profile.user_name,
            profile.summary,
            profile.emotional_notes,
            profile.day_summary,
            profile.location,
            profile.relationship_status,
            profile.updated_at,
        ],
    )?;
    Ok(())
}

/// Stored profile, if the user has one.
pub async fn get_profile(db: &Database, user_id: &str) -> Result<Option<UserProfile>, PebbleError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<UserProfile>, rusqlite::Error> { load(conn, &user_id) })
        .await
        .map_err(map_tr_err)
}

/// Stored profile, or the documented defaults for a new user.
pub async fn get_or_default(db: &Database, user_id: &str) -> Result<UserProfile, PebbleError> {
    Ok(get_profile(db, user_id)
        .await?
        .unwrap_or_else(|| UserProfile::empty(user_id)))
}

/// Overlays the set fields of `update` onto the stored profile.
pub async fn upsert_profile(
    db: &Database,
    user_id: &str,
    update: ProfileUpdate,
) -> Result<UserProfile, PebbleError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<UserProfile, rusqlite::Error> {
            let mut profile = load(conn, &user_id)?.unwrap_or_else(|| UserProfile::empty(&user_id));
            if let Some(bot_name) = update.bot_name {
                profile.bot_name = Some(bot_name);
            }
            if let Some(user_name) = update.user_name {
                profile.user_name = Some(user_name);
            }
            if let Some(location) = update.location {
                profile.location = location;
            }
            if let Some(status) = update.relationship_status {
                profile.relationship_status = status;
            }
            profile.updated_at = now_timestamp();
            store(conn, &profile)?;
            Ok(profile)
        })
        .await
        .map_err(map_tr_err)
}

/// Appends one dream-cycle summary to the user's profile.
///
/// See [`UserProfile::with_consolidation`] for the merge rules.
pub async fn apply_consolidation(
    db: &Database,
    user_id: &str,
    date: &str,
    summary: &str,
) -> Result<UserProfile, PebbleError> {
    let user_id = user_id.to_string();
    let date = date.to_string();
    let summary = summary.to_string();
    db.connection()
        .call(move |conn| -> Result<UserProfile, rusqlite::Error> {
            let existing = load(conn, &user_id)?.unwrap_or_else(|| UserProfile::empty(&user_id));
            let mut merged = existing.with_consolidation(&date, &summary);
            merged.updated_at = now_timestamp();
            store(conn, &merged)?;
            Ok(merged)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_RELATIONSHIP_STATUS;

    #[tokio::test]
    async fn missing_profile_gets_defaults() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(get_profile(&db, "u1").await.unwrap().is_none());
        let p = get_or_default(&db, "u1").await.unwrap();
        assert_eq!(p.relationship_status, DEFAULT_RELATIONSHIP_STATUS);
        assert!(p.summary.is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_unset_fields() {
        let db = Database::open_in_memory().await.unwrap();
        upsert_profile(
            &db,
            "u1",
            ProfileUpdate {
                bot_name: Some("Pebble".into()),
                user_name: Some("Sam".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
        upsert_profile(
            &db,
            "u1",
            ProfileUpdate {
                location: Some("Lisbon".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

        let p = get_profile(&db, "u1").await.unwrap().unwrap();
        assert_eq!(p.bot_name.as_deref(), Some("Pebble"));
        assert_eq!(p.user_name.as_deref(), Some("Sam"));
        assert_eq!(p.location, "Lisbon");
        assert!(!p.updated_at.is_empty());
    }

    #[tokio::test]
    async fn consolidation_appends_per_user() {
        let db = Database::open_in_memory().await.unwrap();
        apply_consolidation(&db, "u1", "2026-01-01", "first").await.unwrap();
        apply_consolidation(&db, "u1", "2026-01-02", "second").await.unwrap();
        apply_consolidation(&db, "u2", "2026-01-02", "theirs").await.unwrap();

        let p = get_profile(&db, "u1").await.unwrap().unwrap();
        assert_eq!(p.summary, "[2026-01-01] first\n[2026-01-02] second");
        assert_eq!(p.emotional_notes, "first\nsecond");
        assert_eq!(p.day_summary, "second");

        let other = get_profile(&db, "u2").await.unwrap().unwrap();
        assert_eq!(other.summary, "[2026-01-02] theirs");
    }

    #[tokio::test]
    async fn consolidation_preserves_names_and_location() {
        let db = Database::open_in_memory().await.unwrap();
        upsert_profile(
            &db,
            "u1",
            ProfileUpdate {
                user_name: Some("Sam".into()),
                location: Some("Oslo".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
        let p = apply_consolidation(&db, "u1", "2026-01-01", "ski trip").await.unwrap();
        assert_eq!(p.user_name.as_deref(), Some("Sam"));
        assert_eq!(p.location, "Oslo");
    }
}
