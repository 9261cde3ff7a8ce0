// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible servers.
//!
//! Handles bearer authentication, JSON bodies and bounded retries on
//! transient statuses (429, 500, 502, 503, 529).

use std::time::Duration;

use pebble_core::PebbleError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{
    ApiErrorResponse, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse,
};

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiClient {
    /// `api_key` may be `None` for local servers that do not authenticate.
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, PebbleError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| PebbleError::Config(format!("invalid API key header value: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| PebbleError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, PebbleError> {
        self.post("chat/completions", request).await
    }

    pub async fn embeddings(
        &self,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse, PebbleError> {
        self.post("embeddings", request).await
    }

    /// `GET {base}/models`, used as a cheap liveness probe.
    pub async fn probe(&self) -> Result<reqwest::StatusCode, PebbleError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .send()
            .await
            .map_err(|e| PebbleError::Provider {
                message: format!("HTTP request failed: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(response.status())
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, PebbleError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, path, "retrying request after transient error");
                tokio::time::sleep(self.retry_delay).await;
            }

            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .map_err(|e| PebbleError::Provider {
                    message: format!("HTTP request failed: {e}"),
                    source: Some(Box::new(e)),
                })?;

            let status = response.status();
            debug!(status = %status, attempt, path, "response received");

            if status.is_success() {
                let text = response.text().await.map_err(|e| PebbleError::Provider {
                    message: format!("failed to read response body: {e}"),
                    source: Some(Box::new(e)),
                })?;
                return serde_json::from_str(&text).map_err(|e| PebbleError::Provider {
                    message: format!("failed to parse response from {path}: {e}"),
                    source: Some(Box::new(e)),
                });
            }

            let text = response.text().await.unwrap_or_default();
            let message = describe_error(status, &text);
            if is_transient_error(status) && attempt < self.max_retries {
                warn!(status = %status, "transient error, will retry");
                last_error = Some(PebbleError::provider(message));
                continue;
            }
            return Err(PebbleError::provider(message));
        }

        Err(last_error
            .unwrap_or_else(|| PebbleError::provider(format!("request to {path} failed after retries"))))
    }
}

fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(err) => format!(
            "API error {status} ({}): {}",
            err.error.type_.as_deref().unwrap_or("unknown"),
            err.error.message
        ),
        Err(_) => format!("API returned {status}: {body}"),
    }
}

/// Statuses worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 529)
}
