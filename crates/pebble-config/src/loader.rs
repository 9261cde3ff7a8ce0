// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./pebble.toml` > `~/.config/pebble/pebble.toml` > `/etc/pebble/pebble.toml`
//! with environment variable overrides via `PEBBLE_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::PebbleConfig;

/// Top-level config sections, used to turn `PEBBLE_MEMORY_RETRIEVAL_K` into `memory.retrieval_k`.
const SECTIONS: &[&str] = &["agent", "provider", "storage", "memory", "schedule", "weather"];

pub(crate) const SYSTEM_CONFIG_PATH: &str = "/etc/pebble/pebble.toml";
pub(crate) const LOCAL_CONFIG_PATH: &str = "pebble.toml";

pub(crate) fn user_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("pebble/pebble.toml"))
        .unwrap_or_default()
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/pebble/pebble.toml` (system-wide)
/// 3. `~/.config/pebble/pebble.toml` (user XDG config)
/// 4. `./pebble.toml` (local directory)
/// 5. `PEBBLE_*` environment variables
pub fn load_config() -> Result<PebbleConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no file lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<PebbleConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PebbleConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<PebbleConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(PebbleConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for config loading, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(PebbleConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(user_config_path()))
        .merge(Toml::file(LOCAL_CONFIG_PATH))
        .merge(env_provider())
}

/// Maps a lowercased, prefix-stripped env key to its dotted config path.
///
/// Only the leading section name is split off, so underscores inside field
/// names survive: `memory_retrieval_k` becomes `memory.retrieval_k`.
pub(crate) fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("PEBBLE_").map(|key| map_env_key(key.as_str()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_only_the_section() {
        assert_eq!(map_env_key("memory_retrieval_k"), "memory.retrieval_k");
        assert_eq!(map_env_key("provider_api_key"), "provider.api_key");
        assert_eq!(
            map_env_key("schedule_reminiscence_probability"),
            "schedule.reminiscence_probability"
        );
        assert_eq!(map_env_key("storage_database_path"), "storage.database_path");
    }

    #[test]
    fn unknown_section_passes_through() {
        assert_eq!(map_env_key("telegram_bot_token"), "telegram_bot_token");
    }

    #[test]
    fn env_overrides_apply_through_jail() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("PEBBLE_MEMORY_RETRIEVAL_K", "7");
            jail.set_env("PEBBLE_AGENT_NAME", "Brook");
            let config: PebbleConfig = Figment::new()
                .merge(Serialized::defaults(PebbleConfig::default()))
                .merge(env_provider())
                .extract()?;
            assert_eq!(config.memory.retrieval_k, 7);
            assert_eq!(config.agent.name, "Brook");
            Ok(())
        });
    }
}
