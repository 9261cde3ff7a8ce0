// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed semantic store with BLOB vectors and per-user cosine scan.
//!
//! Every query is filtered by `user_id` before any similarity is computed,
//! so records written under one user are invisible to every other user.

use std::cmp::Ordering;

use pebble_core::PebbleError;
use pebble_storage::{map_tr_err, Database};
use rusqlite::params;

use crate::types::{
    blob_to_vec, cosine_similarity, l2_normalize, vec_to_blob, Collection, MemoryKind,
    MemoryRecord, ScoredRecord,
};

const RECORD_COLUMNS: &str = "id, text, embedding, user_id, date, kind, created_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<MemoryRecord, rusqlite::Error> {
    let blob: Vec<u8> = row.get(2)?;
    let kind: String = row.get(5)?;
    Ok(MemoryRecord {
        id: row.get(0)?,
        text: row.get(1)?,
        embedding: blob_to_vec(&blob),
        user_id: row.get(3)?,
        date: row.get(4)?,
        kind: MemoryKind::from_str_value(&kind),
        created_at: row.get(6)?,
    })
}

/// Orders by similarity descending, then id ascending.
fn rank(a: &ScoredRecord, b: &ScoredRecord) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.record.id.cmp(&b.record.id))
}

/// The *events* and *facts* collections.
#[derive(Clone)]
pub struct SemanticStore {
    db: Database,
}

impl SemanticStore {
    /// Wraps a database that already has the `memory_records` migration applied.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Adds records in one transaction, returning how many were written.
    ///
    /// Blank texts are skipped. Embeddings are re-normalized before storage.
    pub async fn add(&self, records: Vec<MemoryRecord>) -> Result<usize, PebbleError> {
        let records: Vec<MemoryRecord> = records
            .into_iter()
            .filter(|r| !r.text.trim().is_empty())
            .collect();
        if records.is_empty() {
            return Ok(0);
        }

        self.db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO memory_records (id, collection, user_id, text, embedding, date, kind, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    )?;
                    for r in &records {
                        stmt.execute(params![
                            r.id,
                            r.collection().as_str(),
                            r.user_id,
                            r.text,
                            vec_to_blob(&l2_normalize(&r.embedding)),
                            r.date,
                            r.kind.as_str(),
                            r.created_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(records.len())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Top-`k` records of one user's collection by cosine similarity to `query`.
    pub async fn query_similar(
        &self,
        user_id: &str,
        collection: Collection,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, PebbleError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query = l2_normalize(query);
        let candidates = self.all_for_user(user_id, collection).await?;

        let mut scored: Vec<ScoredRecord> = candidates
            .into_iter()
            .map(|record| ScoredRecord {
                similarity: cosine_similarity(&query, &record.embedding),
                record,
            })
            .collect();
        scored.sort_by(rank);
        scored.truncate(k);
        Ok(scored)
    }

    async fn all_for_user(
        &self,
        user_id: &str,
        collection: Collection,
    ) -> Result<Vec<MemoryRecord>, PebbleError> {
        let user_id = user_id.to_string();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM memory_records WHERE user_id = ?1 AND collection = ?2"
        );
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<MemoryRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![user_id, collection.as_str()], row_to_record)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }

    /// The `limit` most recently added records of one user's collection, newest first.
    pub async fn recent(
        &self,
        user_id: &str,
        collection: Collection,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, PebbleError> {
        let user_id = user_id.to_string();
        let limit = limit as i64;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM memory_records WHERE user_id = ?1 AND collection = ?2
             ORDER BY rowid DESC LIMIT ?3"
        );
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<MemoryRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(&sql)?;
                let rows =
                    stmt.query_map(params![user_id, collection.as_str(), limit], row_to_record)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }

    /// Number of records a user has in one collection.
    pub async fn count(&self, user_id: &str, collection: Collection) -> Result<usize, PebbleError> {
        let user_id = user_id.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM memory_records WHERE user_id = ?1 AND collection = ?2",
                    params![user_id, collection.as_str()],
                    |row| row.get(0),
                )
            })
            .await
            .map(|n| n as usize)
            .map_err(map_tr_err)
    }

    /// Deletes every record dated strictly before `cutoff_date` (`YYYY-MM-DD`).
    pub async fn prune_before(&self, cutoff_date: &str) -> Result<usize, PebbleError> {
        let cutoff = cutoff_date.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute("DELETE FROM memory_records WHERE date < ?1", params![cutoff])
            })
            .await
            .map_err(map_tr_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SemanticStore {
        SemanticStore::new(Database::open_in_memory().await.unwrap())
    }

    fn event(user: &str, id: &str, text: &str, v: Vec<f32>) -> MemoryRecord {
        let mut r = MemoryRecord::daily_summary(user, "2026-01-01", text, v);
        r.id = id.to_string();
        r
    }

    #[tokio::test]
    async fn query_ranks_by_similarity() {
        let s = store().await;
        s.add(vec![
            event("u1", "a", "far", vec![0.0, 1.0]),
            event("u1", "b", "near", vec![1.0, 0.1]),
            event("u1", "c", "exact", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

        let hits = s.query_similar("u1", Collection::Events, &[2.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn ties_break_by_id() {
        let s = store().await;
        s.add(vec![
            event("u1", "z", "same", vec![1.0, 0.0]),
            event("u1", "m", "same", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();
        let hits = s.query_similar("u1", Collection::Events, &[1.0, 0.0], 5).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.record.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "z"]);
    }

    #[tokio::test]
    async fn queries_never_cross_users_or_collections() {
        let s = store().await;
        s.add(vec![
            event("alice", "a1", "shared text", vec![1.0, 0.0]),
            event("bob", "b1", "shared text", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();

        let hits = s.query_similar("alice", Collection::Events, &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.user_id, "alice");

        let facts = s.query_similar("alice", Collection::Facts, &[1.0, 0.0], 10).await.unwrap();
        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn blank_records_are_skipped() {
        let s = store().await;
        let written = s
            .add(vec![
                event("u1", "a", "   ", vec![1.0]),
                event("u1", "b", "kept", vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(s.count("u1", Collection::Events).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn embeddings_are_normalized_on_write() {
        let s = store().await;
        s.add(vec![event("u1", "a", "x", vec![3.0, 4.0])]).await.unwrap();
        let rec = s.recent("u1", Collection::Events, 1).await.unwrap().remove(0);
        assert!((rec.embedding[0] - 0.6).abs() < 1e-6);
        assert!((rec.embedding[1] - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_capped() {
        let s = store().await;
        for i in 0..4 {
            s.add(vec![event("u1", &format!("id{i}"), &format!("t{i}"), vec![1.0])])
                .await
                .unwrap();
        }
        let recent = s.recent("u1", Collection::Events, 2).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["t3", "t2"]);
    }

    #[tokio::test]
    async fn prune_removes_only_older_dates() {
        let s = store().await;
        let mut old = event("u1", "old", "old", vec![1.0]);
        old.date = "2025-01-01".into();
        let mut new = event("u1", "new", "new", vec![1.0]);
        new.date = "2026-01-01".into();
        s.add(vec![old, new]).await.unwrap();

        assert_eq!(s.prune_before("2025-06-01").await.unwrap(), 1);
        let left = s.recent("u1", Collection::Events, 10).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "new");
    }
}
