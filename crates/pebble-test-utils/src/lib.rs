// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Pebble.
//!
//! Mock adapters and a harness for fast, deterministic tests without a
//! model server or network.
//!
//! # Components
//!
//! - [`MockProvider`] - scripted language model with failure and latency injection
//! - [`MockEmbedder`] - bag-of-words embedder with stable similarities
//! - [`MockWeather`], [`MockTranscriber`], [`MockSynthesizer`] - canned senses
//! - [`TestHarness`] - a full [`Companion`](pebble_agent::Companion) on a temp database
//! - [`RecordingOutbox`] - captures scheduler messages

pub mod harness;
pub mod mock_embedder;
pub mod mock_provider;
pub mod mock_senses;

pub use harness::{RecordingOutbox, TestHarness, TestHarnessBuilder};
pub use mock_embedder::{mock_vector, MockEmbedder, MOCK_DIMENSIONS};
pub use mock_provider::{MockProvider, DEFAULT_MOCK_RESPONSE};
pub use mock_senses::{MockSynthesizer, MockTranscriber, MockWeather};
