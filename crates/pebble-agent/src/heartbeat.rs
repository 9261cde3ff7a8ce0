// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Model health monitoring.
//!
//! [`HeartbeatMonitor`] asks the provider for its health on every tick and
//! remembers the previous answer, so callers only alert on transitions.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pebble_core::{HealthStatus, ProviderAdapter};

/// Message sent to the owner when the model stops answering.
pub const OFFLINE_ALERT: &str = "⚠️ Brain offline. Please check server.";

/// Outcome of one heartbeat check.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatCheck {
    pub status: HealthStatus,
    /// The status differs from the previous check (or this is the first).
    pub changed: bool,
    /// The provider just became unhealthy.
    pub went_down: bool,
}

pub struct HeartbeatMonitor {
    provider: Arc<dyn ProviderAdapter>,
    last: Mutex<Option<HealthStatus>>,
}

impl HeartbeatMonitor {
    pub fn new(provider: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            provider,
            last: Mutex::new(None),
        }
    }

    /// Probes the provider once. A failed probe counts as unhealthy.
    pub async fn check(&self) -> HeartbeatCheck {
        let status = match self.provider.health_check().await {
            Ok(status) => status,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        };

        let mut last = self.last.lock().await;
        let changed = last.as_ref() != Some(&status);
        let was_down = matches!(last.as_ref(), Some(HealthStatus::Unhealthy(_)));
        let is_down = matches!(status, HealthStatus::Unhealthy(_));
        let went_down = is_down && !was_down;

        if went_down {
            warn!(status = ?status, "model provider is unhealthy");
        } else if changed && was_down {
            info!(status = ?status, "model provider recovered");
        } else {
            debug!(status = ?status, "heartbeat");
        }

        *last = Some(status.clone());
        HeartbeatCheck {
            status,
            changed,
            went_down,
        }
    }

    /// Status recorded by the most recent check.
    pub async fn last_status(&self) -> Option<HealthStatus> {
        self.last.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pebble_test_utils::MockProvider;

    #[tokio::test]
    async fn alerts_once_per_outage() {
        let provider = Arc::new(MockProvider::new());
        let monitor = HeartbeatMonitor::new(provider.clone());

        let first = monitor.check().await;
        assert!(first.changed);
        assert!(!first.went_down);

        provider.set_health(HealthStatus::Unhealthy("connection refused".into()));
        assert!(monitor.check().await.went_down);
        let again = monitor.check().await;
        assert!(!again.went_down);
        assert!(!again.changed);

        provider.set_health(HealthStatus::Healthy);
        let back = monitor.check().await;
        assert!(back.changed);
        assert!(!back.went_down);
        assert_eq!(monitor.last_status().await, Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn first_check_can_go_down() {
        let provider = Arc::new(MockProvider::new());
        provider.set_health(HealthStatus::Unhealthy("down".into()));
        let monitor = HeartbeatMonitor::new(provider);
        assert!(monitor.check().await.went_down);
    }
}
