// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock weather, transcription and synthesis adapters.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use pebble_core::types::VoiceParams;
use pebble_core::{
    AdapterType, HealthStatus, PebbleError, PluginAdapter, SynthesisAdapter,
    TranscriptionAdapter, WeatherAdapter,
};

macro_rules! mock_plugin {
    ($ty:ty, $name:literal, $kind:expr) => {
        #[async_trait]
        impl PluginAdapter for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn version(&self) -> semver::Version {
                semver::Version::new(0, 1, 0)
            }

            fn adapter_type(&self) -> AdapterType {
                $kind
            }

            async fn health_check(&self) -> Result<HealthStatus, PebbleError> {
                Ok(HealthStatus::Healthy)
            }

            async fn shutdown(&self) -> Result<(), PebbleError> {
                Ok(())
            }
        }
    };
}

/// Canned weather per city (case-insensitive). Unknown cities fail.
#[derive(Default)]
pub struct MockWeather {
    reports: HashMap<String, String>,
    lookups: Mutex<Vec<String>>,
}

impl MockWeather {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_report(mut self, city: &str, report: &str) -> Self {
        self.reports.insert(city.to_lowercase(), report.to_string());
        self
    }

    /// Cities asked for so far.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

mock_plugin!(MockWeather, "mock-weather", AdapterType::Weather);

#[async_trait]
impl WeatherAdapter for MockWeather {
    async fn current_weather(&self, city: &str) -> Result<String, PebbleError> {
        self.lookups.lock().unwrap().push(city.to_string());
        self.reports
            .get(&city.to_lowercase())
            .cloned()
            .ok_or_else(|| PebbleError::Internal(format!("no weather for {city}")))
    }
}

/// Treats audio bytes as UTF-8 text; empty audio transcribes to nothing.
#[derive(Default)]
pub struct MockTranscriber;

mock_plugin!(MockTranscriber, "mock-transcriber", AdapterType::Transcription);

#[async_trait]
impl TranscriptionAdapter for MockTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, PebbleError> {
        let text = String::from_utf8_lossy(audio).trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}

/// Returns `"{emotion}:{text}"` as bytes and records the voice used.
#[derive(Default)]
pub struct MockSynthesizer {
    voices: Mutex<Vec<VoiceParams>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voices(&self) -> Vec<VoiceParams> {
        self.voices.lock().unwrap().clone()
    }
}

mock_plugin!(MockSynthesizer, "mock-synthesizer", AdapterType::Synthesis);

#[async_trait]
impl SynthesisAdapter for MockSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<Option<Vec<u8>>, PebbleError> {
        self.voices.lock().unwrap().push(voice.clone());
        Ok(Some(format!("{}:{text}", voice.emotion).into_bytes()))
    }
}
