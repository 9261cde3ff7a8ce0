// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Personas and the per-user active persona.

use pebble_core::PebbleError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::models::{ActiveContext, Persona};
use crate::queries::now_timestamp;

/// Persona used when a user never picked one.
pub const DEFAULT_MODE: &str = "Fun Pebble";

/// Mode name of the user-described persona.
pub const CUSTOM_MODE: &str = "Custom";

fn row_to_persona(row: &rusqlite::Row<'_>) -> Result<Persona, rusqlite::Error> {
    Ok(Persona {
        mode: row.get(0)?,
        system_prompt: row.get(1)?,
        is_custom: row.get::<_, i64>(2)? != 0,
    })
}

pub async fn list_personas(db: &Database) -> Result<Vec<Persona>, PebbleError> {
    db.connection()
        .call(|conn| -> Result<Vec<Persona>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT mode, system_prompt, is_custom FROM personas ORDER BY is_custom, mode",
            )?;
            let rows = stmt.query_map([], row_to_persona)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_persona(db: &Database, mode: &str) -> Result<Option<Persona>, PebbleError> {
    let mode = mode.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<Persona>, rusqlite::Error> {
            conn.query_row(
                "SELECT mode, system_prompt, is_custom FROM personas WHERE mode = ?1",
                params![mode],
                row_to_persona,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Creates or replaces a persona's prompt.
pub async fn upsert_persona(db: &Database, persona: &Persona) -> Result<(), PebbleError> {
    let persona = persona.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO personas (mode, system_prompt, is_custom) VALUES (?1, ?2, ?3)
                 ON CONFLICT(mode) DO UPDATE SET system_prompt = excluded.system_prompt,
                     is_custom = excluded.is_custom",
                params![persona.mode, persona.system_prompt, persona.is_custom as i64],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_active_context(
    db: &Database,
    user_id: &str,
) -> Result<Option<ActiveContext>, PebbleError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<ActiveContext>, rusqlite::Error> {
            conn.query_row(
                "SELECT user_id, current_mode, custom_persona_description
                 FROM active_context WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(ActiveContext {
                        user_id: row.get(0)?,
                        current_mode: row.get(1)?,
                        custom_persona_description: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// The user's current mode, or [`DEFAULT_MODE`].
pub async fn active_mode(db: &Database, user_id: &str) -> Result<String, PebbleError> {
    Ok(get_active_context(db, user_id)
        .await?
        .map(|c| c.current_mode)
        .unwrap_or_else(|| DEFAULT_MODE.to_string()))
}

/// Switches the user's persona. A `None` description keeps the stored one.
pub async fn set_active_mode(
    db: &Database,
    user_id: &str,
    mode: &str,
    custom_description: Option<&str>,
) -> Result<(), PebbleError> {
    let user_id = user_id.to_string();
    let mode = mode.to_string();
    let description = custom_description.map(str::to_string);
    let now = now_timestamp();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO active_context (user_id, current_mode, custom_persona_description, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET current_mode = excluded.current_mode,
                     custom_persona_description = COALESCE(excluded.custom_persona_description,
                         active_context.custom_persona_description),
                     updated_at = excluded.updated_at",
                params![user_id, mode, description, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_personas_are_present() {
        let db = Database::open_in_memory().await.unwrap();
        let modes: Vec<String> = list_personas(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.mode)
            .collect();
        assert_eq!(modes, vec!["Executive Pebble", "Fitness Pebble", "Fun Pebble"]);
        assert!(get_persona(&db, DEFAULT_MODE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn custom_persona_upsert_and_activate() {
        let db = Database::open_in_memory().await.unwrap();
        upsert_persona(
            &db,
            &Persona {
                mode: CUSTOM_MODE.into(),
                system_prompt: "You are a pirate.".into(),
                is_custom: true,
            },
        )
        .await
        .unwrap();
        set_active_mode(&db, "u1", CUSTOM_MODE, Some("a pirate"))
            .await
            .unwrap();
        set_active_mode(&db, "u1", CUSTOM_MODE, None).await.unwrap();

        let ctx = get_active_context(&db, "u1").await.unwrap().unwrap();
        assert_eq!(ctx.current_mode, CUSTOM_MODE);
        assert_eq!(ctx.custom_persona_description.as_deref(), Some("a pirate"));
        assert!(get_persona(&db, CUSTOM_MODE).await.unwrap().unwrap().is_custom);
    }

    #[tokio::test]
    async fn active_mode_defaults() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(active_mode(&db, "nobody").await.unwrap(), DEFAULT_MODE);
    }
}
