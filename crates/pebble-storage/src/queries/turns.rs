// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only turn log.
//!
//! Every turn is written here on receipt, independent of the short-term
//! buffer and of consolidation. Rows are never updated or deleted.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use pebble_core::PebbleError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{LoggedTurn, Role, Turn};
use crate::queries::conversion_err;

fn row_to_logged(row: &rusqlite::Row<'_>) -> Result<LoggedTurn, rusqlite::Error> {
    let role: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    let role = role.parse::<Role>().map_err(|e| conversion_err(2, e))?;
    let timestamp = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| conversion_err(4, e))?
        .with_timezone(&Utc);
    Ok(LoggedTurn {
        id: row.get(0)?,
        user_id: row.get(1)?,
        turn: Turn {
            role,
            content: row.get(3)?,
            timestamp,
        },
        local_date: row.get(5)?,
    })
}

/// Local calendar date (`YYYY-MM-DD`) a timestamp falls on.
pub fn local_date_of(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).date_naive().to_string()
}

/// Appends one turn and returns its sequence number.
pub async fn append_turn(db: &Database, user_id: &str, turn: &Turn) -> Result<i64, PebbleError> {
    let user_id = user_id.to_string();
    let role = turn.role.to_string();
    let content = turn.content.clone();
    let created_at = turn.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    let local_date = local_date_of(&turn.timestamp);
    db.connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.execute(
                "INSERT INTO chat_logs (user_id, role, content, created_at, local_date)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![user_id, role, content, created_at, local_date],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

/// The newest `limit` turns for a user, oldest first.
pub async fn recent_turns(
    db: &Database,
    user_id: &str,
    limit: usize,
) -> Result<Vec<Turn>, PebbleError> {
    let user_id = user_id.to_string();
    let limit = limit as i64;
    db.connection()
        .call(move |conn| -> Result<Vec<Turn>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, role, content, created_at, local_date FROM (
                     SELECT * FROM chat_logs WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
                 ) ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id, limit], row_to_logged)?;
            rows.map(|r| r.map(|logged| logged.turn)).collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Every turn a user logged on one local date, oldest first.
pub async fn turns_for_day(
    db: &Database,
    user_id: &str,
    local_date: &str,
) -> Result<Vec<LoggedTurn>, PebbleError> {
    let user_id = user_id.to_string();
    let local_date = local_date.to_string();
    db.connection()
        .call(move |conn| -> Result<Vec<LoggedTurn>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, role, content, created_at, local_date
                 FROM chat_logs WHERE user_id = ?1 AND local_date = ?2
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id, local_date], row_to_logged)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Distinct users that have at least one logged turn.
pub async fn users_with_logs(db: &Database) -> Result<Vec<String>, PebbleError> {
    db.connection()
        .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
            let mut stmt =
                conn.prepare("SELECT DISTINCT user_id FROM chat_logs ORDER BY user_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Timestamp of the user's most recent logged turn, from either side.
pub async fn last_interaction(
    db: &Database,
    user_id: &str,
) -> Result<Option<DateTime<Utc>>, PebbleError> {
    Ok(recent_turns(db, user_id, 1)
        .await?
        .into_iter()
        .next()
        .map(|t| t.timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn turn_at(role: Role, content: &str, ts: DateTime<Utc>) -> Turn {
        Turn {
            role,
            content: content.to_string(),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn recent_turns_are_chronological_and_capped() {
        let db = Database::open_in_memory().await.unwrap();
        for i in 0..5 {
            append_turn(&db, "u1", &Turn::user(format!("msg {i}")))
                .await
                .unwrap();
        }
        let turns = recent_turns(&db, "u1", 3).await.unwrap();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn sequence_numbers_increase() {
        let db = Database::open_in_memory().await.unwrap();
        let a = append_turn(&db, "u1", &Turn::user("a")).await.unwrap();
        let b = append_turn(&db, "u2", &Turn::assistant("b")).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn turns_for_day_filters_user_and_date() {
        let db = Database::open_in_memory().await.unwrap();
        let noon = Local
            .with_ymd_and_hms(2026, 5, 4, 12, 0, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc);
        let next_noon = noon + chrono::Duration::days(1);

        append_turn(&db, "u1", &turn_at(Role::User, "today", noon)).await.unwrap();
        append_turn(&db, "u1", &turn_at(Role::Assistant, "reply", noon)).await.unwrap();
        append_turn(&db, "u1", &turn_at(Role::User, "tomorrow", next_noon)).await.unwrap();
        append_turn(&db, "u2", &turn_at(Role::User, "other user", noon)).await.unwrap();

        let day = turns_for_day(&db, "u1", "2026-05-04").await.unwrap();
        let contents: Vec<_> = day.iter().map(|t| t.turn.content.as_str()).collect();
        assert_eq!(contents, vec!["today", "reply"]);
        assert_eq!(day[1].turn.role, Role::Assistant);
        assert_eq!(day[0].turn.timestamp, noon);
    }

    #[tokio::test]
    async fn users_with_logs_is_distinct() {
        let db = Database::open_in_memory().await.unwrap();
        append_turn(&db, "b", &Turn::user("x")).await.unwrap();
        append_turn(&db, "a", &Turn::user("y")).await.unwrap();
        append_turn(&db, "b", &Turn::user("z")).await.unwrap();
        assert_eq!(users_with_logs(&db).await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn last_interaction_of_unknown_user_is_none() {
        let db = Database::open_in_memory().await.unwrap();
        assert!(last_interaction(&db, "ghost").await.unwrap().is_none());
        let t = Turn::assistant("hello");
        append_turn(&db, "u1", &t).await.unwrap();
        let last = last_interaction(&db, "u1").await.unwrap().unwrap();
        assert_eq!(
            last.timestamp_millis(),
            t.timestamp.timestamp_millis()
        );
    }
}
