// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapters for the companion's senses: weather, hearing, and speech.

use async_trait::async_trait;

use crate::error::PebbleError;
use crate::traits::adapter::PluginAdapter;
use crate::types::VoiceParams;

/// Current-conditions lookup for a city.
#[async_trait]
pub trait WeatherAdapter: PluginAdapter {
    /// Returns a short description such as `"Light rain, 12°C"`.
    async fn current_weather(&self, city: &str) -> Result<String, PebbleError>;
}

/// Speech-to-text.
#[async_trait]
pub trait TranscriptionAdapter: PluginAdapter {
    /// Returns `None` when no speech was recognized.
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, PebbleError>;
}

/// Text-to-speech.
#[async_trait]
pub trait SynthesisAdapter: PluginAdapter {
    /// Returns `None` when the backend declined to synthesize.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<Option<Vec<u8>>, PebbleError>;
}
