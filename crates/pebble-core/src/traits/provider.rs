// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider adapter trait for the language model ("generate text given prompt").

use async_trait::async_trait;

use crate::error::PebbleError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{ProviderRequest, ProviderResponse};

/// Adapter for language model backends.
///
/// Calls may fail or hang; callers wrap them in a timeout and decide
/// whether the failure is on the critical path.
#[async_trait]
pub trait ProviderAdapter: PluginAdapter {
    /// Sends a completion request and returns the full response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, PebbleError>;
}
