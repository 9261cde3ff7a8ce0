// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end tests.
//!
//! `TestHarness` assembles a [`Companion`] over a temp SQLite file with mock
//! adapters. [`TestHarness::send`] drives the whole turn pipeline.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use pebble_agent::{Companion, Outbox, TurnReply};
use pebble_config::model::{PebbleConfig, StorageConfig};
use pebble_core::PebbleError;
use pebble_storage::queries::profiles;
use pebble_storage::{Database, ProfileUpdate};

use crate::mock_embedder::MockEmbedder;
use crate::mock_provider::MockProvider;
use crate::mock_senses::MockWeather;

/// Builder for test environments.
pub struct TestHarnessBuilder {
    responses: Vec<String>,
    config: PebbleConfig,
    weather: Option<MockWeather>,
    onboarded: Vec<(String, String, String)>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            responses: Vec::new(),
            config: PebbleConfig::default(),
            weather: None,
            onboarded: Vec::new(),
        }
    }

    /// Set mock provider responses, answered in order.
    pub fn with_mock_responses(mut self, responses: Vec<String>) -> Self {
        self.responses = responses;
        self
    }

    /// Start from this configuration. The storage section is replaced.
    pub fn with_config(mut self, config: PebbleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_weather(mut self, weather: MockWeather) -> Self {
        self.weather = Some(weather);
        self
    }

    /// Stores names for `user_id` so the first message skips onboarding.
    pub fn with_onboarded_user(mut self, user_id: &str, user_name: &str, bot_name: &str) -> Self {
        self.onboarded
            .push((user_id.into(), user_name.into(), bot_name.into()));
        self
    }

    pub async fn build(self) -> Result<TestHarness, PebbleError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| PebbleError::Storage {
            source: Box::new(e),
        })?;
        let db_path = temp_dir.path().join("test.db");

        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: db_path.to_string_lossy().to_string(),
            wal_mode: true,
        };
        let db = Database::from_config(&config.storage).await?;

        for (user_id, user_name, bot_name) in &self.onboarded {
            profiles::upsert_profile(
                &db,
                user_id,
                ProfileUpdate {
                    user_name: Some(user_name.clone()),
                    bot_name: Some(bot_name.clone()),
                    ..ProfileUpdate::default()
                },
            )
            .await?;
        }

        let mock_provider = Arc::new(MockProvider::with_responses(self.responses));
        let mock_embedder = Arc::new(MockEmbedder::new());
        let mut companion = Companion::new(
            &config,
            db.clone(),
            mock_provider.clone(),
            mock_embedder.clone(),
        );
        if let Some(weather) = self.weather {
            companion = companion.with_weather(Arc::new(weather));
        }

        Ok(TestHarness {
            companion: Arc::new(companion),
            mock_provider,
            mock_embedder,
            db,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete companion over temp storage.
pub struct TestHarness {
    pub companion: Arc<Companion>,
    pub mock_provider: Arc<MockProvider>,
    pub mock_embedder: Arc<MockEmbedder>,
    /// Same database the companion writes to.
    pub db: Database,
    pub config: PebbleConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Sends one message and returns the reply.
    ///
    /// Panics if the user is not allowed, which only happens when a test
    /// configures an allow-list and then talks as someone else.
    pub async fn send(&self, user_id: &str, text: &str) -> TurnReply {
        self.companion
            .on_turn(user_id, text)
            .await
            .unwrap_or_else(|| panic!("user {user_id} is not allowed"))
    }

    /// Reply text only.
    pub async fn say(&self, user_id: &str, text: &str) -> String {
        self.send(user_id, text).await.text
    }
}

/// Outbox that records every message instead of delivering it.
#[derive(Default)]
pub struct RecordingOutbox {
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl RecordingOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(user_id, text)` pairs in delivery order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Makes every subsequent send fail.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), PebbleError> {
        if *self.failing.lock().unwrap() {
            return Err(PebbleError::Internal("outbox unavailable".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}
