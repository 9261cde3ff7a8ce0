// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Pebble companion.
//!
//! Provides the error type, shared conversation and provider types, and the
//! adapter traits through which the memory engine reaches its external
//! collaborators (language model, embedder, weather, speech).

pub mod error;
pub mod traits;
pub mod types;

pub use error::PebbleError;
pub use types::{AdapterType, HealthStatus, Role, Turn};

pub use traits::{
    EmbeddingAdapter, PluginAdapter, ProviderAdapter, SynthesisAdapter, TranscriptionAdapter,
    WeatherAdapter,
};
