// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks the buffer geometry (hot window, trigger, chunk, capacity), the
//! cron expression, and the few ranges serde cannot express. All failures
//! are collected rather than returning on the first one.

use crate::diagnostic::ConfigError;
use crate::model::{EmbedderKind, PebbleConfig};

/// Validate a deserialized configuration for semantic correctness.
pub fn validate_config(config: &PebbleConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.agent.name.trim().is_empty() {
        errors.push(ConfigError::validation("agent.name must not be empty"));
    }
    if config.agent.reply_timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "agent.reply_timeout_secs must be at least 1",
        ));
    }

    if config.provider.base_url.trim().is_empty() {
        errors.push(ConfigError::validation("provider.base_url must not be empty"));
    }
    if config.provider.model.trim().is_empty() {
        errors.push(ConfigError::validation("provider.model must not be empty"));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    validate_memory(config, &mut errors);
    validate_schedule(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_memory(config: &PebbleConfig, errors: &mut Vec<ConfigError>) {
    let m = &config.memory;

    if m.hot_window == 0 {
        errors.push(ConfigError::validation("memory.hot_window must be at least 1"));
    }
    if m.overflow_chunk == 0 {
        errors.push(ConfigError::validation(
            "memory.overflow_chunk must be at least 1",
        ));
    }
    if m.hot_window > m.buffer_capacity {
        errors.push(ConfigError::validation(format!(
            "memory.hot_window ({}) must not exceed memory.buffer_capacity ({})",
            m.hot_window, m.buffer_capacity
        )));
    }
    if m.overflow_trigger >= m.buffer_capacity {
        errors.push(ConfigError::validation(format!(
            "memory.overflow_trigger ({}) must be below memory.buffer_capacity ({})",
            m.overflow_trigger, m.buffer_capacity
        )));
    }
    if m.overflow_chunk > m.overflow_trigger {
        errors.push(ConfigError::validation(format!(
            "memory.overflow_chunk ({}) must not exceed memory.overflow_trigger ({})",
            m.overflow_chunk, m.overflow_trigger
        )));
    }
    if m.retrieval_k == 0 {
        errors.push(ConfigError::validation("memory.retrieval_k must be at least 1"));
    }
    if let Some(days) = m.retention_days
        && days == 0
    {
        errors.push(ConfigError::validation(
            "memory.retention_days must be at least 1 when set",
        ));
    }
    if m.embedder == EmbedderKind::Onnx && m.onnx_model_dir.is_none() {
        errors.push(ConfigError::validation(
            "memory.onnx_model_dir is required when memory.embedder = \"onnx\"",
        ));
    }
}

fn validate_schedule(config: &PebbleConfig, errors: &mut Vec<ConfigError>) {
    let s = &config.schedule;

    if let Err(e) = s.dream_cron.parse::<croner::Cron>() {
        errors.push(ConfigError::validation(format!(
            "schedule.dream_cron `{}` is not a valid cron expression: {e}",
            s.dream_cron
        )));
    }
    if !(0.0..=1.0).contains(&s.reminiscence_probability) {
        errors.push(ConfigError::validation(format!(
            "schedule.reminiscence_probability must be within [0, 1], got {}",
            s.reminiscence_probability
        )));
    }
    if s.heartbeat_interval_secs == 0 || s.spontaneity_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "schedule intervals must be at least 1 second",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &PebbleConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&PebbleConfig::default()).is_ok());
    }

    #[test]
    fn small_test_geometry_is_valid() {
        let mut config = PebbleConfig::default();
        config.memory.buffer_capacity = 5;
        config.memory.overflow_trigger = 3;
        config.memory.hot_window = 2;
        config.memory.overflow_chunk = 1;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn trigger_at_capacity_is_rejected() {
        let mut config = PebbleConfig::default();
        config.memory.overflow_trigger = config.memory.buffer_capacity;
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("overflow_trigger")));
    }

    #[test]
    fn collects_every_error() {
        let mut config = PebbleConfig::default();
        config.memory.hot_window = 0;
        config.memory.retrieval_k = 0;
        config.schedule.reminiscence_probability = 1.5;
        config.storage.database_path = "  ".to_string();
        assert_eq!(messages(&config).len(), 4);
    }

    #[test]
    fn bad_cron_is_rejected() {
        let mut config = PebbleConfig::default();
        config.schedule.dream_cron = "every night please".to_string();
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("dream_cron")));
    }

    #[test]
    fn onnx_needs_model_dir() {
        let mut config = PebbleConfig::default();
        config.memory.embedder = EmbedderKind::Onnx;
        assert!(messages(&config).iter().any(|m| m.contains("onnx_model_dir")));
    }
}
