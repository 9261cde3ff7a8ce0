// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock language model for deterministic tests.
//!
//! Responses are popped from a FIFO queue; an empty queue answers
//! "mock response". Failures and latency can be injected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use pebble_core::types::{ProviderRequest, ProviderResponse, TokenUsage};
use pebble_core::{AdapterType, HealthStatus, PebbleError, PluginAdapter, ProviderAdapter};

pub const DEFAULT_MOCK_RESPONSE: &str = "mock response";

pub struct MockProvider {
    responses: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ProviderRequest>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    health: Mutex<HealthStatus>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            delay: Mutex::new(None),
            health: Mutex::new(HealthStatus::Healthy),
        }
    }

    /// A provider pre-loaded with responses, answered in order.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let provider = Self::new();
        provider
            .responses
            .lock()
            .unwrap()
            .extend(responses.into_iter().map(Into::into));
        provider
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.responses.lock().unwrap().push_back(text.into());
    }

    /// The next `n` calls fail with a transient provider error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn set_health(&self, status: HealthStatus) {
        *self.health.lock().unwrap() = status;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, PebbleError> {
        Ok(self.health.lock().unwrap().clone())
    }

    async fn shutdown(&self) -> Result<(), PebbleError> {
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, PebbleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let model = request.model.clone().unwrap_or_else(|| "mock-model".into());
        self.requests.lock().unwrap().push(request);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_failure() {
            return Err(PebbleError::provider("mock provider failure"));
        }

        let content = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| DEFAULT_MOCK_RESPONSE.to_string());
        Ok(ProviderResponse {
            id: format!("mock-{}", uuid::Uuid::new_v4()),
            content,
            model,
            stop_reason: Some("stop".into()),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        })
    }
}
