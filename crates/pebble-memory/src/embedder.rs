// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local sentence embeddings with ONNX Runtime.
//!
//! Enabled with the `onnx` feature. The model directory must contain
//! `model.onnx` and `tokenizer.json` for a BERT-style sentence encoder
//! (e.g. all-MiniLM-L6-v2). Output is mean-pooled over the attention mask
//! and L2-normalized.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use pebble_core::types::{EmbeddingInput, EmbeddingOutput};
use pebble_core::{AdapterType, EmbeddingAdapter, HealthStatus, PebbleError, PluginAdapter};

use crate::types::l2_normalize;

fn onnx_err(context: &str) -> impl FnOnce(String) -> PebbleError + '_ {
    move |detail| PebbleError::embedding(format!("{context}: {detail}"))
}

/// Sentence encoder running on CPU with a single intra-op thread.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
    model_dir: PathBuf,
}

impl OnnxEmbedder {
    /// Loads `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn from_dir(model_dir: &Path) -> Result<Self, PebbleError> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| e.to_string())
            .map_err(onnx_err("loading tokenizer"))?;

        let model_path = model_dir.join("model.onnx");
        let session = Session::builder()
            .map_err(|e| e.to_string())
            .map_err(onnx_err("creating session builder"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| e.to_string())
            .map_err(onnx_err("setting optimization level"))?
            .with_intra_threads(1)
            .map_err(|e| e.to_string())
            .map_err(onnx_err("setting thread count"))?
            .commit_from_file(&model_path)
            .map_err(|e| e.to_string())
            .map_err(onnx_err("loading onnx model"))?;

        tracing::info!(model_dir = %model_dir.display(), "onnx embedder loaded");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_dir: model_dir.to_path_buf(),
        })
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, PebbleError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| e.to_string())
            .map_err(onnx_err("tokenizing"))?;

        let to_i64 = |xs: &[u32]| xs.iter().map(|&x| i64::from(x)).collect::<Vec<i64>>();
        let ids = to_i64(encoding.get_ids());
        let mask = to_i64(encoding.get_attention_mask());
        let type_ids = to_i64(encoding.get_type_ids());
        let seq_len = ids.len();

        let shape = |v: Vec<i64>| {
            Array2::from_shape_vec((1, seq_len), v)
                .map_err(|e| e.to_string())
                .map_err(onnx_err("shaping input"))
        };
        let ids = shape(ids)?;
        let mask_arr = shape(mask.clone())?;
        let type_ids = shape(type_ids)?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| PebbleError::Internal(format!("onnx session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => tensor_of(&ids)?,
                "attention_mask" => tensor_of(&mask_arr)?,
                "token_type_ids" => tensor_of(&type_ids)?
            ])
            .map_err(|e| e.to_string())
            .map_err(onnx_err("running inference"))?;

        // [1, seq_len, hidden]
        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| e.to_string())
            .map_err(onnx_err("reading output"))?;
        let hidden = out_shape
            .last()
            .copied()
            .ok_or_else(|| PebbleError::embedding("onnx output has no dimensions"))?
            as usize;

        Ok(l2_normalize(&masked_mean(data, &mask, hidden)))
    }
}

fn tensor_of(array: &Array2<i64>) -> Result<TensorRef<'_, i64>, PebbleError> {
    TensorRef::from_array_view(array)
        .map_err(|e| e.to_string())
        .map_err(onnx_err("building tensor"))
}

/// Mean of the token vectors whose attention mask is set.
fn masked_mean(tokens: &[f32], mask: &[i64], hidden: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden];
    let mut kept = 0usize;
    for (row, &m) in tokens.chunks_exact(hidden).zip(mask) {
        if m == 0 {
            continue;
        }
        for (acc, v) in sum.iter_mut().zip(row) {
            *acc += v;
        }
        kept += 1;
    }
    if kept > 0 {
        let n = kept as f32;
        sum.iter_mut().for_each(|v| *v /= n);
    }
    sum
}

#[async_trait]
impl PluginAdapter for OnnxEmbedder {
    fn name(&self) -> &str {
        "onnx"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, PebbleError> {
        Ok(match self.session.lock() {
            Ok(_) => HealthStatus::Healthy,
            Err(_) => HealthStatus::Unhealthy(format!(
                "onnx session for {} is poisoned",
                self.model_dir.display()
            )),
        })
    }

    async fn shutdown(&self) -> Result<(), PebbleError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for OnnxEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, PebbleError> {
        let embeddings = input
            .texts
            .iter()
            .map(|t| self.embed_text(t))
            .collect::<Result<Vec<_>, _>>()?;
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}
