// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by adapters, the memory engine, and the companion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a trait object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Provider,
    Embedding,
    Weather,
    Transcription,
    Synthesis,
}

// --- Conversation types ---

/// Who spoke a turn.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Speaker label used when rendering transcripts for the model.
    pub fn speaker(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One message exchanged in a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Creates a turn stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Renders turns as a `Speaker: text` transcript, one turn per line.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.speaker(), t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

// --- Provider types ---

/// A single message in a provider request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    /// "user" or "assistant".
    pub role: String,
    pub content: String,
}

impl From<&Turn> for ProviderMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.to_string(),
            content: turn.content.clone(),
        }
    }
}

/// A request to a language model.
#[derive(Debug, Clone, Default)]
pub struct ProviderRequest {
    /// Model override; `None` uses the adapter's configured model.
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub messages: Vec<ProviderMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ProviderRequest {
    /// Single-prompt request: one user message, optional system prompt.
    pub fn prompt(system: Option<String>, user: impl Into<String>) -> Self {
        Self {
            system_prompt: system,
            messages: vec![ProviderMessage {
                role: "user".to_string(),
                content: user.into(),
            }],
            ..Self::default()
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A complete response from a language model.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub id: String,
    pub content: String,
    pub model: String,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

// --- Embedding types ---

/// Input for an embedding adapter.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
}

/// Output from an embedding adapter. One vector per input text, in order.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}

// --- Senses types ---

/// Voice parameters for speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    pub voice_name: String,
    /// Emotion hint detected from the reply ("neutral" when unknown).
    pub emotion: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_name: "Pebble".to_string(),
            emotion: "neutral".to_string(),
        }
    }
}
