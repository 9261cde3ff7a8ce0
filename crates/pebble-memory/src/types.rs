// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory domain types for the semantic store.

use serde::{Deserialize, Serialize};

/// A logical collection in the semantic store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Daily and session summaries.
    Events,
    /// Atomic extracted facts.
    Facts,
}

impl Collection {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Events => "events",
            Collection::Facts => "facts",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "facts" => Collection::Facts,
            _ => Collection::Events,
        }
    }
}

/// What a memory record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    DailySummary,
    Fact,
}

impl MemoryKind {
    /// Convert to string for SQLite storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::DailySummary => "daily_summary",
            MemoryKind::Fact => "fact",
        }
    }

    /// Parse from SQLite string.
    pub fn from_str_value(s: &str) -> Self {
        match s {
            "fact" => MemoryKind::Fact,
            _ => MemoryKind::DailySummary,
        }
    }

    /// The collection records of this kind live in.
    pub fn collection(&self) -> Collection {
        match self {
            MemoryKind::DailySummary => Collection::Events,
            MemoryKind::Fact => Collection::Facts,
        }
    }
}

/// A semantic store entry. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// `journal-…` for summaries, `fact-…` for facts.
    pub id: String,
    pub text: String,
    /// L2-normalized embedding.
    #[serde(skip)]
    pub embedding: Vec<f32>,
    pub user_id: String,
    /// Local date (`YYYY-MM-DD`) the record describes.
    pub date: String,
    pub kind: MemoryKind,
    /// ISO 8601 insertion timestamp.
    pub created_at: String,
}

impl MemoryRecord {
    /// A daily summary record with a fresh `journal-{user}-{date}-{uuid8}` id.
    pub fn daily_summary(user_id: &str, date: &str, text: &str, embedding: Vec<f32>) -> Self {
        Self::build(
            format!("journal-{user_id}-{date}-{}", short_uuid()),
            user_id,
            date,
            text,
            embedding,
            MemoryKind::DailySummary,
        )
    }

    /// A fact record; `batch` is shared by all facts from one dream cycle.
    pub fn fact(
        user_id: &str,
        date: &str,
        batch: &str,
        index: usize,
        text: &str,
        embedding: Vec<f32>,
    ) -> Self {
        Self::build(
            format!("fact-{user_id}-{date}-{batch}-{index}"),
            user_id,
            date,
            text,
            embedding,
            MemoryKind::Fact,
        )
    }

    fn build(
        id: String,
        user_id: &str,
        date: &str,
        text: &str,
        embedding: Vec<f32>,
        kind: MemoryKind,
    ) -> Self {
        Self {
            id,
            text: text.trim().to_string(),
            embedding,
            user_id: user_id.to_string(),
            date: date.to_string(),
            kind,
            created_at: chrono::Utc::now()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string(),
        }
    }

    pub fn collection(&self) -> Collection {
        self.kind.collection()
    }
}

/// A record with its similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// First eight hex digits of a v4 UUID.
pub fn short_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Convert f32 vector to bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert SQLite BLOB back to f32 vector. Trailing partial chunks are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity of two L2-normalized vectors (their dot product).
///
/// Vectors of different length score 0.0 so stale records from a previous
/// embedding model never outrank current ones.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2-normalize a vector. Zero vectors are returned unchanged.
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vec.iter().map(|v| v / norm).collect()
    } else {
        vec.to_vec()
    }
}
