// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw per-user emotional state documents.
//!
//! The store keeps the JSON text opaque; parsing and the fallback to a
//! default state live with the state manager in `pebble-memory`.

use pebble_core::PebbleError;
use rusqlite::{params, OptionalExtension};

use crate::database::{map_tr_err, Database};
use crate::queries::now_timestamp;

pub async fn load_state_json(db: &Database, user_id: &str) -> Result<Option<String>, PebbleError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| -> Result<Option<String>, rusqlite::Error> {
            conn.query_row(
                "SELECT state_json FROM emotional_state WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn save_state_json(db: &Database, user_id: &str, json: &str) -> Result<(), PebbleError> {
    let user_id = user_id.to_string();
    let json = json.to_string();
    let now = now_timestamp();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO emotional_state (user_id, state_json, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET state_json = excluded.state_json,
                     updated_at = excluded.updated_at",
                params![user_id, json, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}
