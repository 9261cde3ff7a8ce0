// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible adapters for Pebble.
//!
//! [`OpenAiProvider`] implements [`ProviderAdapter`] over `/chat/completions`
//! and [`OpenAiEmbedder`] implements [`EmbeddingAdapter`] over `/embeddings`.
//! Both work against hosted OpenAI and local servers (llama.cpp, vLLM,
//! LM Studio) that speak the same protocol.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use pebble_config::model::{MemoryConfig, ProviderConfig};
use pebble_core::types::{
    EmbeddingInput, EmbeddingOutput, ProviderRequest, ProviderResponse, TokenUsage,
};
use pebble_core::{
    AdapterType, EmbeddingAdapter, HealthStatus, PebbleError, PluginAdapter, ProviderAdapter,
};
use tracing::{debug, info};

use crate::client::OpenAiClient;
use crate::types::{ChatMessage, ChatRequest, EmbeddingRequest};

/// API key resolution: config, then `OPENAI_API_KEY`, then none.
fn resolve_api_key(config_key: &Option<String>) -> Option<String> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Some(key.clone());
    }
    std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
}

fn client_from_config(config: &ProviderConfig) -> Result<OpenAiClient, PebbleError> {
    let api_key = resolve_api_key(&config.api_key);
    if api_key.is_none() {
        debug!("no API key configured, sending unauthenticated requests");
    }
    OpenAiClient::new(
        &config.base_url,
        api_key.as_deref(),
        Duration::from_secs(config.timeout_secs),
        config.max_retries,
    )
}

async fn probe_health(client: &OpenAiClient) -> HealthStatus {
    match client.probe().await {
        Ok(status) if status.is_server_error() => {
            HealthStatus::Degraded(format!("{} answered {status}", client.base_url()))
        }
        Ok(_) => HealthStatus::Healthy,
        Err(e) => HealthStatus::Unhealthy(e.to_string()),
    }
}

/// Chat completions.
pub struct OpenAiProvider {
    client: OpenAiClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, PebbleError> {
        let client = client_from_config(config)?;
        info!(model = %config.model, base_url = %config.base_url, "chat provider initialized");
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: OpenAiClient, config: &ProviderConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    fn to_chat_request(&self, request: ProviderRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system_prompt.filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system,
            });
        }
        messages.extend(request.messages.into_iter().map(|m| ChatMessage {
            role: m.role,
            content: m.content,
        }));

        ChatRequest {
            model: request.model.unwrap_or_else(|| self.model.clone()),
            messages,
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.temperature)),
        }
    }
}

#[async_trait]
impl PluginAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, PebbleError> {
        Ok(probe_health(&self.client).await)
    }

    async fn shutdown(&self) -> Result<(), PebbleError> {
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, PebbleError> {
        let chat = self.to_chat_request(request);
        let response = self.client.chat(&chat).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PebbleError::provider("response contained no choices"))?;
        let usage = response.usage.unwrap_or_default();

        Ok(ProviderResponse {
            id: response.id,
            content: choice.message.content.unwrap_or_default(),
            model: if response.model.is_empty() {
                chat.model
            } else {
                response.model
            },
            stop_reason: choice.finish_reason,
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }
}

/// `/embeddings`, re-normalized to unit length.
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(provider: &ProviderConfig, memory: &MemoryConfig) -> Result<Self, PebbleError> {
        let client = client_from_config(provider)?;
        info!(model = %memory.embedding_model, "embedding adapter initialized");
        Ok(Self::with_client(client, &memory.embedding_model))
    }

    pub fn with_client(client: OpenAiClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl PluginAdapter for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai-embeddings"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, PebbleError> {
        Ok(probe_health(&self.client).await)
    }

    async fn shutdown(&self) -> Result<(), PebbleError> {
        Ok(())
    }
}

#[async_trait]
impl EmbeddingAdapter for OpenAiEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, PebbleError> {
        if input.texts.is_empty() {
            return Ok(EmbeddingOutput {
                embeddings: Vec::new(),
                dimensions: 0,
            });
        }
        let expected = input.texts.len();
        let response = self
            .client
            .embeddings(&EmbeddingRequest {
                model: self.model.clone(),
                input: input.texts,
            })
            .await
            .map_err(|e| PebbleError::Embedding {
                message: "embedding request failed".into(),
                source: Some(Box::new(e)),
            })?;

        let mut data = response.data;
        if data.len() != expected {
            return Err(PebbleError::embedding(format!(
                "expected {expected} embeddings, got {}",
                data.len()
            )));
        }
        data.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| normalize(d.embedding)).collect();
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}
