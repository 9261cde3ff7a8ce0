// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `pebble dream`: run consolidation now instead of waiting for the cron.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pebble_agent::companion::today;
use pebble_agent::{Companion, Outbox, Scheduler};
use pebble_config::model::PebbleConfig;
use pebble_core::PebbleError;

use crate::serve::{build_companion, init_tracing};

pub async fn run_dream(config: PebbleConfig, user: Option<String>) -> Result<(), PebbleError> {
    init_tracing(&config.agent.log_level);
    let companion = Arc::new(build_companion(&config).await?);
    let report = dream_now(companion, config.agent.allowed_user_id.clone(), user.as_deref()).await?;
    println!("{report}");
    Ok(())
}

/// Manual runs never message anyone.
struct NoOutbox;

#[async_trait]
impl Outbox for NoOutbox {
    async fn send(&self, _user_id: &str, _text: &str) -> Result<(), PebbleError> {
        Ok(())
    }
}

/// Consolidates one user's day, or runs the full nightly cycle.
async fn dream_now(
    companion: Arc<Companion>,
    owner: Option<String>,
    user: Option<&str>,
) -> Result<String, PebbleError> {
    let date = today();
    match user {
        Some(user_id) => {
            info!(user_id = %user_id, date = %date, "manual dream for one user");
            let outcome = companion.consolidation().consolidate_day(user_id, &date).await?;
            Ok(match outcome {
                Some(outcome) => format!(
                    "{user_id}: {} ({} facts)",
                    outcome.summary,
                    outcome.facts.len()
                ),
                None => format!("{user_id}: nothing logged on {date}"),
            })
        }
        None => {
            let scheduler = Scheduler::new(companion, Arc::new(NoOutbox), owner)?;
            let done = scheduler.run_dream_cycle_for(&date).await?;
            Ok(format!("dream cycle finished for {done} user(s) on {date}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pebble_test_utils::TestHarness;

    #[tokio::test]
    async fn single_user_dream_reports_the_summary() {
        let harness = TestHarness::builder()
            .with_mock_responses(vec![
                "oh nice [emotion: happy]".into(),
                r#"{"summary": "Sam baked bread.", "facts": ["Sam bakes sourdough", "Sam has a starter"]}"#.into(),
            ])
            .with_onboarded_user("7", "Sam", "Rocky")
            .build()
            .await
            .unwrap();
        harness.say("7", "baked sourdough today").await;

        let report = dream_now(harness.companion.clone(), None, Some("7")).await.unwrap();
        assert_eq!(report, "7: Sam baked bread. (2 facts)");
    }

    #[tokio::test]
    async fn quiet_day_is_reported() {
        let harness = TestHarness::builder().build().await.unwrap();
        let report = dream_now(harness.companion.clone(), None, Some("9")).await.unwrap();
        assert!(report.starts_with("9: nothing logged on "));
        assert_eq!(harness.mock_provider.call_count(), 0);
    }

    #[tokio::test]
    async fn full_cycle_counts_users() {
        let harness = TestHarness::builder().build().await.unwrap();
        let report = dream_now(harness.companion.clone(), None, None).await.unwrap();
        assert!(report.starts_with("dream cycle finished for 0 user(s)"));
    }
}
