// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-user conversation state machine.
//!
//! A user is in exactly one of three states. Onboarding collects names,
//! `AwaitingCustomPersona` turns the next message into a persona, and
//! everything else is `Normal`. All moves go through [`transition`].

use dashmap::DashMap;
use pebble_storage::queries::personas::CUSTOM_MODE;
use pebble_storage::{ActiveContext, UserProfile};

/// States in the conversation FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Names not collected yet; every message is read as an introduction.
    Onboarding,
    /// The user picked the custom mode and owes us a description.
    AwaitingCustomPersona,
    /// Regular chat.
    Normal,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationState::Onboarding => write!(f, "onboarding"),
            ConversationState::AwaitingCustomPersona => write!(f, "awaiting_custom_persona"),
            ConversationState::Normal => write!(f, "normal"),
        }
    }
}

/// Things that move a conversation between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// Both the user's and the bot's names are stored.
    NamesCollected,
    /// `Mode: Custom` was selected.
    CustomModeRequested,
    /// A built-in mode was selected.
    ModeSelected,
    /// The custom persona was generated and activated.
    CustomPersonaCreated,
}

/// The single transition function.
///
/// Onboarding only ends when names are collected; mode switches are ignored
/// until then. Events that do not apply leave the state unchanged.
pub fn transition(state: ConversationState, event: StateEvent) -> ConversationState {
    use ConversationState::*;
    use StateEvent::*;

    match (state, event) {
        (Onboarding, NamesCollected) => Normal,
        (Onboarding, _) => Onboarding,
        (_, CustomModeRequested) => AwaitingCustomPersona,
        (AwaitingCustomPersona, CustomPersonaCreated | ModeSelected) => Normal,
        (s, _) => s,
    }
}

/// Reconstructs a user's state from what the relational store holds.
///
/// Used when a process starts without in-memory state: a user without both
/// names is onboarding, and a user left on the custom mode with no stored
/// description is still owed a persona.
pub fn initial_state(profile: &UserProfile, context: Option<&ActiveContext>) -> ConversationState {
    if !profile.is_onboarded() {
        return ConversationState::Onboarding;
    }
    match context {
        Some(ctx) if ctx.current_mode == CUSTOM_MODE && ctx.custom_persona_description.is_none() => {
            ConversationState::AwaitingCustomPersona
        }
        _ => ConversationState::Normal,
    }
}

/// In-memory state per user. Entries are created lazily by the caller.
#[derive(Debug, Default)]
pub struct ConversationStates {
    states: DashMap<String, ConversationState>,
}

impl ConversationStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> Option<ConversationState> {
        self.states.get(user_id).map(|s| *s)
    }

    pub fn set(&self, user_id: &str, state: ConversationState) {
        self.states.insert(user_id.to_string(), state);
    }

    /// Applies `event` to the user's current state and stores the result.
    /// A user with no entry is treated as `Normal`.
    pub fn apply(&self, user_id: &str, event: StateEvent) -> ConversationState {
        let mut entry = self
            .states
            .entry(user_id.to_string())
            .or_insert(ConversationState::Normal);
        let next = transition(*entry, event);
        if next != *entry {
            tracing::debug!(user_id = %user_id, from = %*entry, to = %next, ?event, "conversation state changed");
        }
        *entry = next;
        next
    }

    pub fn forget(&self, user_id: &str) {
        self.states.remove(user_id);
    }
}
