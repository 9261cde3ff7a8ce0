// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic bag-of-words embedder.
//!
//! Each lowercase alphanumeric word is hashed (FNV-1a) into one of
//! [`MOCK_DIMENSIONS`] buckets and the counts are L2-normalized, so texts
//! sharing words score higher and identical texts score 1.0.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use pebble_core::types::{EmbeddingInput, EmbeddingOutput};
use pebble_core::{AdapterType, EmbeddingAdapter, HealthStatus, PebbleError, PluginAdapter};

pub const MOCK_DIMENSIONS: usize = 256;

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Embeds `text` without going through the adapter.
pub fn mock_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; MOCK_DIMENSIONS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = (fnv1a(&word.to_lowercase()) % MOCK_DIMENSIONS as u64) as usize;
        v[bucket] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[derive(Default)]
pub struct MockEmbedder {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `embed` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes every subsequent call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, PebbleError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), PebbleError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, PebbleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PebbleError::embedding("mock embedder failure"));
        }
        Ok(EmbeddingOutput {
            embeddings: input.texts.iter().map(|t| mock_vector(t)).collect(),
            dimensions: MOCK_DIMENSIONS,
        })
    }
}
