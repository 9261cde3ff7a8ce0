// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background loops: the nightly dream cycle, the model heartbeat and
//! spontaneous outreach.
//!
//! All three run until the shared [`CancellationToken`] fires. A failing
//! tick is logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Timelike, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pebble_core::{PebbleError, Turn};
use pebble_storage::queries::turns;

use crate::companion::Companion;
use crate::heartbeat::{HeartbeatMonitor, OFFLINE_ALERT};
use crate::spontaneity::{compose_outreach, OutreachKind};

/// Delivers messages the companion starts on its own.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), PebbleError>;
}

pub struct Scheduler {
    companion: Arc<Companion>,
    outbox: Arc<dyn Outbox>,
    heartbeat: HeartbeatMonitor,
    dream: croner::Cron,
    /// Who hears about outages: the allow-listed user, if any.
    owner: Option<String>,
}

impl Scheduler {
    pub fn new(
        companion: Arc<Companion>,
        outbox: Arc<dyn Outbox>,
        owner: Option<String>,
    ) -> Result<Self, PebbleError> {
        let pattern = companion.schedule().dream_cron.clone();
        let dream = pattern
            .parse::<croner::Cron>()
            .map_err(|e| PebbleError::Config(format!("invalid dream_cron '{pattern}': {e}")))?;
        Ok(Self {
            heartbeat: HeartbeatMonitor::new(companion.provider().clone()),
            companion,
            outbox,
            dream,
            owner,
        })
    }

    /// Runs every loop until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let dream = tokio::spawn(self.clone().dream_loop(cancel.clone()));
        let heartbeat = tokio::spawn(self.clone().heartbeat_loop(cancel.clone()));
        let spontaneity = tokio::spawn(self.clone().spontaneity_loop(cancel.clone()));
        let _ = tokio::join!(dream, heartbeat, spontaneity);
        info!("scheduler stopped");
    }

    async fn dream_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let now = Local::now();
            let next = match self.dream.find_next_occurrence(&now, false) {
                Ok(next) => next,
                Err(e) => {
                    warn!(error = %e, "no next dream time, dream loop stopping");
                    return;
                }
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next, "next dream cycle scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_dream_cycle().await {
                        warn!(error = %e, "dream cycle failed (non-fatal)");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("dream task shutting down");
                    return;
                }
            }
        }
    }

    /// Consolidates the day that just ended, see [`dream_date`].
    pub async fn run_dream_cycle(&self) -> Result<usize, PebbleError> {
        self.run_dream_cycle_for(&dream_date(Local::now())).await
    }

    /// Consolidates `date`'s logs for every user and drops their buffers,
    /// then prunes expired memories when a retention window is configured.
    pub async fn run_dream_cycle_for(&self, date: &str) -> Result<usize, PebbleError> {
        info!(date = %date, "dream cycle starting");
        let done = self
            .companion
            .consolidation()
            .run_for_all_users(date)
            .await?;
        for user_id in &done {
            let dropped = self.companion.clear_buffer(user_id).await;
            debug!(user_id = %user_id, dropped, "buffer cleared after dream");
        }
        if let Some(days) = self.companion.retention_days() {
            self.companion.consolidation().prune(days).await?;
        }
        Ok(done.len())
    }

    async fn heartbeat_loop(self: Arc<Self>, cancel: CancellationToken) {
        let secs = self.companion.schedule().heartbeat_interval_secs.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.heartbeat_tick().await;
                }
                _ = cancel.cancelled() => {
                    info!("heartbeat task shutting down");
                    return;
                }
            }
        }
    }

    /// One health probe. Alerts the owner when the model goes down.
    pub async fn heartbeat_tick(&self) -> bool {
        let check = self.heartbeat.check().await;
        if !check.went_down {
            return false;
        }
        let Some(owner) = &self.owner else {
            warn!("model offline and no owner to alert");
            return true;
        };
        if let Err(e) = self.outbox.send(owner, OFFLINE_ALERT).await {
            warn!(error = %e, "offline alert not delivered (non-fatal)");
        }
        true
    }

    async fn spontaneity_loop(self: Arc<Self>, cancel: CancellationToken) {
        let secs = self.companion.schedule().spontaneity_interval_secs.max(1);
        let mut interval = tokio::time::interval(Duration::from_secs(secs));
        interval.tick().await;
        let mut rng = StdRng::from_entropy();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let sent = self.spontaneity_tick(&mut rng).await;
                    if sent > 0 {
                        info!(sent, "spontaneous messages delivered");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("spontaneity task shutting down");
                    return;
                }
            }
        }
    }

    /// Considers every known user once. Returns how many messages went out.
    pub async fn spontaneity_tick(&self, rng: &mut StdRng) -> usize {
        let users = match self.candidates().await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "listing users for outreach failed (non-fatal)");
                return 0;
            }
        };

        let mut sent = 0;
        for user_id in users {
            match self.reach_out(&user_id, rng).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "outreach failed (non-fatal)");
                }
            }
        }
        sent
    }

    async fn candidates(&self) -> Result<Vec<String>, PebbleError> {
        let mut users = turns::users_with_logs(self.companion.db()).await?;
        if let Some(owner) = &self.owner {
            users.retain(|u| u == owner);
        }
        Ok(users)
    }

    async fn reach_out(&self, user_id: &str, rng: &mut StdRng) -> Result<bool, PebbleError> {
        let Some(outreach) = compose_outreach(&self.companion, user_id, Utc::now(), rng).await?
        else {
            return Ok(false);
        };

        self.outbox.send(user_id, &outreach.text).await?;

        let turn = Turn::assistant(outreach.text.clone());
        turns::append_turn(self.companion.db(), user_id, &turn).await?;
        if self.companion.buffers().contains(user_id) {
            self.companion.buffers().append(user_id, turn);
        }
        if let OutreachKind::LoopFollowUp { topic } = &outreach.kind {
            self.companion.emotional().close_loop(user_id, topic).await?;
        }
        info!(user_id = %user_id, kind = ?outreach.kind, "spontaneous message sent");
        Ok(true)
    }
}

/// The day a dream cycle starting at `now` consolidates. Runs before noon
/// belong to the previous day.
pub fn dream_date(now: DateTime<Local>) -> String {
    let day = if now.hour() < 12 {
        now.date_naive().pred_opt().unwrap_or(now.date_naive())
    } else {
        now.date_naive()
    };
    day.format("%Y-%m-%d").to_string()
}
