// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn handling and background jobs for the Pebble companion.
//!
//! The [`Companion`] is what a chat transport talks to:
//! - Runs onboarding and persona switches through the conversation FSM
//! - Builds each reply prompt from persona, emotional state and memories
//! - Logs every turn and feeds overflow into background consolidation
//!
//! The [`Scheduler`] drives the nightly dream cycle, the model heartbeat
//! and spontaneous outreach through an [`Outbox`].

pub mod companion;
pub mod extract;
pub mod heartbeat;
pub mod prompts;
pub mod scheduler;
pub mod shutdown;
pub mod spontaneity;
pub mod state;

pub use companion::{Companion, TurnReply, VoiceReply};
pub use heartbeat::{HeartbeatCheck, HeartbeatMonitor, OFFLINE_ALERT};
pub use scheduler::{dream_date, Outbox, Scheduler};
pub use shutdown::install_signal_handler;
pub use spontaneity::{compose_outreach, decide_to_message, Outreach, OutreachKind};
pub use state::{ConversationState, ConversationStates, StateEvent};
