// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory consolidation and retrieval engine for the Pebble companion.
//!
//! - **BufferManager**: bounded per-user short-term turn buffers with
//!   overflow splitting
//! - **SemanticStore**: events and facts with BLOB vectors, scanned by cosine
//!   similarity per user
//! - **RetrievalOrchestrator**: top-k context blocks and random reminiscence
//! - **ConsolidationEngine**: the dream cycle, summary plus atomic facts
//! - **EmotionalCore**: mood, attachment and open loops per user
//! - **OnnxEmbedder** (feature `onnx`): local sentence embeddings

pub mod buffer;
pub mod consolidation;
#[cfg(feature = "onnx")]
pub mod embedder;
pub mod emotional;
pub mod metrics;
pub mod retriever;
pub mod store;
pub mod types;

pub use buffer::{BufferLimits, BufferManager, ConversationBuffer, OverflowCheck};
pub use consolidation::{
    consolidate_in_background, json_object, parse_dream_response, ConsolidationEngine,
    ConsolidationOutcome, DreamOutput,
};
#[cfg(feature = "onnx")]
pub use embedder::OnnxEmbedder;
pub use emotional::{EmotionalCore, EmotionalState, LoopStatus, OpenLoop};
pub use retriever::{ContextBlock, RetrievalOrchestrator, EMPTY_CONTEXT};
pub use store::SemanticStore;
pub use types::*;
