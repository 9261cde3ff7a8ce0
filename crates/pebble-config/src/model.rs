// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Pebble companion.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Pebble configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PebbleConfig {
    /// Companion identity and reply behavior.
    #[serde(default)]
    pub agent: AgentConfig,

    /// OpenAI-compatible language model endpoint.
    #[serde(default)]
    pub provider: ProviderConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Short-term buffer, retrieval, and semantic store settings.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Dream cycle, heartbeat, and spontaneity timers.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Weather lookup settings.
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// Companion identity and behavior configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Default bot name used before onboarding picks one.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on a single reply generation.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,

    /// When set, turns from any other user id are ignored.
    #[serde(default)]
    pub allowed_user_id: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
            reply_timeout_secs: default_reply_timeout_secs(),
            allowed_user_id: None,
        }
    }
}

fn default_agent_name() -> String {
    "Pebble".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reply_timeout_secs() -> u64 {
    60
}

/// OpenAI-compatible provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Base URL including the version prefix, e.g. `http://localhost:8080/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Chat model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// API key. `None` falls back to the `OPENAI_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Maximum tokens per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature for replies.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Retries on 429/5xx before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// HTTP timeout for a single request.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_retries() -> u32 {
    1
}

fn default_provider_timeout_secs() -> u64 {
    120
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable SQLite WAL mode for concurrent reads.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("pebble").join("pebble.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("pebble.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Which embedding backend the semantic store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// `/embeddings` on the provider endpoint.
    Openai,
    /// Local ONNX model (requires the `onnx` feature).
    Onnx,
}

/// Memory engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Raw buffer capacity N. Oldest turns are evicted past this.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Hot window H kept verbatim after an overflow trim.
    #[serde(default = "default_hot_window")]
    pub hot_window: usize,

    /// Overflow trigger T. Consolidation starts when length exceeds it.
    #[serde(default = "default_overflow_trigger")]
    pub overflow_trigger: usize,

    /// Overflow chunk C handed to the dream cycle.
    #[serde(default = "default_overflow_chunk")]
    pub overflow_chunk: usize,

    /// Results per collection in retrieval.
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Most recent records per collection considered for random recollection.
    #[serde(default = "default_recollection_pool")]
    pub recollection_pool: usize,

    /// Character cap on a random recollection snippet.
    #[serde(default = "default_recollection_max_chars")]
    pub recollection_max_chars: usize,

    /// Prune semantic records older than this many days. `None` keeps everything.
    #[serde(default)]
    pub retention_days: Option<u32>,

    /// Embedding backend.
    #[serde(default = "default_embedder")]
    pub embedder: EmbedderKind,

    /// Model name sent to the `/embeddings` endpoint.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Directory holding `model.onnx` and `tokenizer.json` for the ONNX embedder.
    #[serde(default)]
    pub onnx_model_dir: Option<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            hot_window: default_hot_window(),
            overflow_trigger: default_overflow_trigger(),
            overflow_chunk: default_overflow_chunk(),
            retrieval_k: default_retrieval_k(),
            recollection_pool: default_recollection_pool(),
            recollection_max_chars: default_recollection_max_chars(),
            retention_days: None,
            embedder: default_embedder(),
            embedding_model: default_embedding_model(),
            onnx_model_dir: None,
        }
    }
}

fn default_buffer_capacity() -> usize {
    120
}

fn default_hot_window() -> usize {
    10
}

fn default_overflow_trigger() -> usize {
    40
}

fn default_overflow_chunk() -> usize {
    30
}

fn default_retrieval_k() -> usize {
    3
}

fn default_recollection_pool() -> usize {
    25
}

fn default_recollection_max_chars() -> usize {
    240
}

fn default_embedder() -> EmbedderKind {
    EmbedderKind::Openai
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Scheduled job configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Cron expression (local time) for the daily dream cycle.
    #[serde(default = "default_dream_cron")]
    pub dream_cron: String,

    /// Provider health check interval.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Spontaneous check-in evaluation interval.
    #[serde(default = "default_spontaneity_interval_secs")]
    pub spontaneity_interval_secs: u64,

    /// Chance of reminiscing instead of a plain check-in when no loops are pending.
    #[serde(default = "default_reminiscence_probability")]
    pub reminiscence_probability: f64,

    /// A pending open loop becomes due for follow-up after this many hours.
    #[serde(default = "default_loop_followup_after_hours")]
    pub loop_followup_after_hours: u64,

    /// Never start a spontaneous message within this many minutes of the last turn.
    #[serde(default = "default_quiet_minutes")]
    pub quiet_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            dream_cron: default_dream_cron(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            spontaneity_interval_secs: default_spontaneity_interval_secs(),
            reminiscence_probability: default_reminiscence_probability(),
            loop_followup_after_hours: default_loop_followup_after_hours(),
            quiet_minutes: default_quiet_minutes(),
        }
    }
}

fn default_dream_cron() -> String {
    "0 4 * * *".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}

fn default_spontaneity_interval_secs() -> u64 {
    3600
}

fn default_reminiscence_probability() -> f64 {
    0.05
}

fn default_loop_followup_after_hours() -> u64 {
    12
}

fn default_quiet_minutes() -> u64 {
    90
}

/// Weather lookup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WeatherConfig {
    /// Disable to skip all weather lookups.
    #[serde(default = "default_weather_enabled")]
    pub enabled: bool,

    /// wttr.in compatible base URL.
    #[serde(default = "default_weather_base_url")]
    pub base_url: String,

    #[serde(default = "default_weather_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: default_weather_enabled(),
            base_url: default_weather_base_url(),
            timeout_secs: default_weather_timeout_secs(),
        }
    }
}

fn default_weather_enabled() -> bool {
    true
}

fn default_weather_base_url() -> String {
    "https://wttr.in".to_string()
}

fn default_weather_timeout_secs() -> u64 {
    5
}
