// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapter trait for vector embedding generation.

use async_trait::async_trait;

use crate::error::PebbleError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{EmbeddingInput, EmbeddingOutput};

/// Adapter for mapping text to fixed-length vectors.
///
/// Implementations should return L2-normalized vectors; the semantic
/// store re-normalizes on write and query regardless.
#[async_trait]
pub trait EmbeddingAdapter: PluginAdapter {
    /// Generates embeddings for the given input.
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, PebbleError>;

    /// Embeds a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, PebbleError> {
        let output = self
            .embed(EmbeddingInput {
                texts: vec![text.to_string()],
            })
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| PebbleError::embedding("embedding backend returned no vectors"))
    }
}
