// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unprompted outreach.
//!
//! Each spontaneity tick first decides whether to say anything at all, then
//! picks what to say: a follow-up on a due open loop, a resurfaced memory,
//! or a plain check-in.

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use pebble_core::PebbleError;
use pebble_storage::queries::{profiles, turns};

use crate::companion::Companion;
use crate::extract;
use crate::prompts;

/// Base probability of reaching out once the quiet window has passed.
const BASE_PROBABILITY: f64 = 0.1;
/// Added per hour of silence.
const PER_HOUR: f64 = 0.05;
/// Cap before the attachment multiplier.
const GAP_CAP: f64 = 0.8;
const MAX_PROBABILITY: f64 = 0.95;

/// Probability of messaging after `gap` of silence at `attachment` (0-10).
///
/// Zero when the user has never spoken or spoke within `quiet`.
pub fn outreach_probability(
    gap: Option<chrono::Duration>,
    attachment: f64,
    quiet: chrono::Duration,
) -> f64 {
    let Some(gap) = gap else {
        return 0.0;
    };
    if gap < quiet {
        return 0.0;
    }
    let hours = gap.num_minutes() as f64 / 60.0;
    let from_gap = (BASE_PROBABILITY + PER_HOUR * hours).min(GAP_CAP);
    let attachment = attachment.clamp(0.0, 10.0);
    (from_gap * (0.5 + attachment / 10.0)).clamp(0.0, MAX_PROBABILITY)
}

/// Rolls against [`outreach_probability`].
pub fn decide_to_message<R: Rng + ?Sized>(
    gap: Option<chrono::Duration>,
    attachment: f64,
    quiet: chrono::Duration,
    rng: &mut R,
) -> bool {
    let p = outreach_probability(gap, attachment, quiet);
    p > 0.0 && rng.gen_bool(p)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutreachKind {
    /// Checking on something the user said would happen.
    LoopFollowUp { topic: String },
    /// Bringing up a stored memory.
    Reminiscence,
    /// A plain "thinking of you".
    CheckIn,
}

/// A message the companion wants to send unprompted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outreach {
    pub kind: OutreachKind,
    pub text: String,
}

/// Configured minutes as a span; values past chrono's range mean "never".
fn minutes(n: u64) -> chrono::Duration {
    i64::try_from(n)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .unwrap_or(chrono::Duration::MAX)
}

fn hours(n: u64) -> chrono::Duration {
    i64::try_from(n)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .unwrap_or(chrono::Duration::MAX)
}

/// Decides whether `user_id` should hear from the companion now and, if so,
/// writes the message. Nothing is sent or recorded here.
pub async fn compose_outreach<R: Rng + ?Sized>(
    companion: &Companion,
    user_id: &str,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Option<Outreach>, PebbleError> {
    let schedule = companion.schedule();
    let quiet = minutes(schedule.quiet_minutes);

    let profile = profiles::get_or_default(companion.db(), user_id).await?;
    if !profile.is_onboarded() {
        return Ok(None);
    }

    let last_seen = turns::last_interaction(companion.db(), user_id).await?;
    let gap = last_seen.map(|t| now - t);
    let state = companion.emotional().load(user_id).await?;
    let bot_name = companion.bot_name(&profile);
    let user_name = profile.user_name.clone().unwrap_or_default();

    // Due loops skip the dice; quiet hours still apply.
    let follow_up_after = hours(schedule.loop_followup_after_hours);
    if gap.is_some_and(|g| g >= quiet)
        && let Some(open) = state.due_loop(now, follow_up_after)
    {
        let prompt = prompts::fill(
            prompts::LOOP_FOLLOWUP_PROMPT,
            &[
                ("bot_name", &bot_name),
                ("user_name", &user_name),
                ("topic", &open.topic),
                ("expected_time", &open.expected_time),
            ],
        );
        let text = companion.generate(None, prompt, Some(120)).await?;
        return Ok(non_empty(text).map(|text| Outreach {
            kind: OutreachKind::LoopFollowUp {
                topic: open.topic.clone(),
            },
            text,
        }));
    }

    if !decide_to_message(gap, state.attachment_level, quiet, rng) {
        debug!(user_id = %user_id, "staying quiet this tick");
        return Ok(None);
    }

    // Reminiscence only when no loop is pending.
    if state.pending_loops().is_empty()
        && rng.gen_bool(schedule.reminiscence_probability.clamp(0.0, 1.0))
        && let Some(memory) = companion.retriever().random_recollection(user_id, rng).await?
    {
        let prompt = prompts::fill(
            prompts::REMINISCENCE_PROMPT,
            &[
                ("bot_name", &bot_name),
                ("user_name", &user_name),
                ("memory", &memory),
            ],
        );
        let text = companion.generate(None, prompt, Some(120)).await?;
        return Ok(non_empty(text).map(|text| Outreach {
            kind: OutreachKind::Reminiscence,
            text,
        }));
    }

    let weather = if profile.location.trim().is_empty() {
        crate::companion::UNKNOWN_WEATHER.to_string()
    } else {
        companion.weather_for(profile.location.trim()).await
    };
    let prompt = prompts::fill(
        prompts::SPONTANEOUS_PROMPT,
        &[
            ("bot_name", &bot_name),
            ("gap", &extract::format_gap(last_seen, now)),
            ("user_name", &user_name),
            ("mood", &state.current_mood),
            ("weather", &weather),
        ],
    );
    let text = companion.generate(None, prompt, Some(120)).await?;
    Ok(non_empty(text).map(|text| Outreach {
        kind: OutreachKind::CheckIn,
        text,
    }))
}

/// Model output with any stray tags removed, or `None` when nothing is left.
fn non_empty(raw: String) -> Option<String> {
    let (text, _) = extract::parse_reply_tags(&raw);
    (!text.is_empty()).then_some(text)
}
