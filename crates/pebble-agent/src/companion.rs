// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The companion turn handler.
//!
//! [`Companion`] is the single entry point a chat transport talks to. It owns
//! the short-term buffers and conversation states, and wires the memory
//! engine (retrieval, consolidation, emotional state) around each reply.
//!
//! Turns for one user are serialized by a per-user lock. Failures on the
//! reply path become a canned apology; background consolidation failures
//! are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use pebble_config::model::{AgentConfig, PebbleConfig, ScheduleConfig};
use pebble_core::types::{ProviderMessage, ProviderRequest, VoiceParams};
use pebble_core::{
    EmbeddingAdapter, PebbleError, ProviderAdapter, SynthesisAdapter, TranscriptionAdapter, Turn,
    WeatherAdapter,
};
use pebble_memory::{
    consolidate_in_background, BufferLimits, BufferManager, ConsolidationEngine, ConsolidationOutcome,
    EmotionalCore, RetrievalOrchestrator, SemanticStore,
};
use pebble_storage::queries::personas::{self, CUSTOM_MODE, DEFAULT_MODE};
use pebble_storage::queries::{profiles, turns};
use pebble_storage::{Database, Persona, ProfileUpdate, UserProfile};

use crate::extract::{self, Command, NEUTRAL_EMOTION};
use crate::prompts::{self, SoulContext};
use crate::state::{initial_state, ConversationState, ConversationStates, StateEvent};

pub const DIDNT_CATCH_REPLY: &str = "I didn't catch that — can you try again?";
pub const GLITCH_REPLY: &str = "Sorry love — I hit a glitch for a second. Can you try that again?";
pub const BLANK_REPLY: &str = "Sorry love — I blanked for a second. Say that one more time?";
pub const GOODNIGHT_REPLY: &str = "Goodnight! 🌙 I'm going to reflect on our day. Sleep well.";
pub const WIPED_REPLY: &str = "Memory wiped. Starting a fresh conversation. Hi!";
pub const RESET_REPLY: &str =
    "I've refreshed my settings and memory, but I'm still here with you. What were we saying?";
pub const NEED_LOCATION_REPLY: &str =
    "I don't know where we are yet! 🌍 Tell me your city so I can check.";
pub const CUSTOM_PROMPT_REPLY: &str =
    "Describe your custom mode in one message, and I'll generate it.";
pub const CUSTOM_CREATED_REPLY: &str = "Custom persona generated and activated.";
pub const UNKNOWN_MODE_REPLY: &str =
    "That mode isn't available right now. Choose one from the menu.";

/// Weather text used when no lookup is possible.
pub const UNKNOWN_WEATHER: &str = "Unknown";

/// What the transport sends back for one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    /// Emotion the model tagged its reply with, `"neutral"` by default.
    pub emotion: String,
}

impl TurnReply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emotion: NEUTRAL_EMOTION.to_string(),
        }
    }
}

/// Reply to a voice message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceReply {
    /// What the user said, if anything was recognized.
    pub transcript: Option<String>,
    pub reply: TurnReply,
    /// Synthesized reply audio, when a synthesizer is configured and succeeded.
    pub audio: Option<Vec<u8>>,
}

pub struct Companion {
    agent: AgentConfig,
    schedule: ScheduleConfig,
    retention_days: Option<u32>,
    db: Database,
    provider: Arc<dyn ProviderAdapter>,
    buffers: BufferManager,
    retriever: RetrievalOrchestrator,
    consolidation: Arc<ConsolidationEngine>,
    emotional: EmotionalCore,
    states: ConversationStates,
    weather: Option<Arc<dyn WeatherAdapter>>,
    transcriber: Option<Arc<dyn TranscriptionAdapter>>,
    synthesizer: Option<Arc<dyn SynthesisAdapter>>,
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
    background: TaskTracker,
}

impl Companion {
    pub fn new(
        config: &PebbleConfig,
        db: Database,
        provider: Arc<dyn ProviderAdapter>,
        embedder: Arc<dyn EmbeddingAdapter>,
    ) -> Self {
        let store = Arc::new(SemanticStore::new(db.clone()));
        let retriever = RetrievalOrchestrator::new(store.clone(), embedder.clone(), &config.memory);
        let consolidation = Arc::new(
            ConsolidationEngine::new(provider.clone(), embedder, store, db.clone())
                .with_bot_name(config.agent.name.clone()),
        );

        Self {
            agent: config.agent.clone(),
            schedule: config.schedule.clone(),
            retention_days: config.memory.retention_days,
            emotional: EmotionalCore::new(db.clone()),
            db,
            provider,
            buffers: BufferManager::new(BufferLimits::from(&config.memory)),
            retriever,
            consolidation,
            states: ConversationStates::new(),
            weather: None,
            transcriber: None,
            synthesizer: None,
            turn_locks: DashMap::new(),
            background: TaskTracker::new(),
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherAdapter>) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn with_voice(
        mut self,
        transcriber: Arc<dyn TranscriptionAdapter>,
        synthesizer: Arc<dyn SynthesisAdapter>,
    ) -> Self {
        self.transcriber = Some(transcriber);
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn provider(&self) -> &Arc<dyn ProviderAdapter> {
        &self.provider
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    pub fn emotional(&self) -> &EmotionalCore {
        &self.emotional
    }

    pub fn retriever(&self) -> &RetrievalOrchestrator {
        &self.retriever
    }

    pub fn consolidation(&self) -> &Arc<ConsolidationEngine> {
        &self.consolidation
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    pub fn retention_days(&self) -> Option<u32> {
        self.retention_days
    }

    /// The conversation state a user is in right now, if known in memory.
    pub fn conversation_state(&self, user_id: &str) -> Option<ConversationState> {
        self.states.get(user_id)
    }

    /// Whether `user_id` may talk to the companion.
    pub fn is_allowed(&self, user_id: &str) -> bool {
        self.agent
            .allowed_user_id
            .as_deref()
            .is_none_or(|allowed| allowed == user_id)
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.turn_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Handles one incoming message.
    ///
    /// Returns `None` only for users outside the allow-list. Every other
    /// outcome, including internal failures, produces a reply.
    pub async fn on_turn(&self, user_id: &str, text: &str) -> Option<TurnReply> {
        if !self.is_allowed(user_id) {
            warn!(user_id = %user_id, "message from unauthorized user dropped");
            return None;
        }

        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;

        let reply = match self.handle_turn(user_id, text.trim()).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "turn handling failed, sending fallback");
                TurnReply::plain(GLITCH_REPLY)
            }
        };
        self.dispatch_overflow(user_id);
        Some(reply)
    }

    async fn handle_turn(&self, user_id: &str, text: &str) -> Result<TurnReply, PebbleError> {
        if text.is_empty() {
            return Ok(TurnReply::plain(DIDNT_CATCH_REPLY));
        }

        if let Some(command) = extract::parse_command(text) {
            return self.run_command(user_id, command).await;
        }

        let state = self.state_for(user_id).await?;
        debug!(user_id = %user_id, state = %state, "handling turn");

        if state == ConversationState::Onboarding {
            return self.onboard(user_id, text).await;
        }

        if extract::is_goodnight(text) {
            let batch = self.buffers.clear(user_id);
            self.spawn_end_of_day(user_id, batch);
            return Ok(TurnReply::plain(GOODNIGHT_REPLY));
        }

        if let Some(mode) = extract::parse_mode_command(text) {
            return self.switch_mode(user_id, &mode).await;
        }

        if state == ConversationState::AwaitingCustomPersona {
            return self.create_custom_persona(user_id, text).await;
        }

        self.converse(user_id, text).await
    }

    /// Current state, rebuilt from the store the first time a user is seen.
    async fn state_for(&self, user_id: &str) -> Result<ConversationState, PebbleError> {
        if let Some(state) = self.states.get(user_id) {
            return Ok(state);
        }
        let profile = profiles::get_or_default(&self.db, user_id).await?;
        let context = personas::get_active_context(&self.db, user_id).await?;
        let state = initial_state(&profile, context.as_ref());
        self.states.set(user_id, state);
        Ok(state)
    }

    async fn run_command(&self, user_id: &str, command: Command) -> Result<TurnReply, PebbleError> {
        match command {
            Command::Start => {
                if personas::get_active_context(&self.db, user_id).await?.is_none() {
                    personas::set_active_mode(&self.db, user_id, DEFAULT_MODE, None).await?;
                }
                let profile = profiles::get_or_default(&self.db, user_id).await?;
                if profile.is_onboarded() {
                    self.states.set(user_id, ConversationState::Normal);
                    let bot = profile.bot_name.as_deref().unwrap_or(&self.agent.name);
                    Ok(TurnReply::plain(format!("{bot} is online! Choose a mode from the menu.")))
                } else {
                    self.states.set(user_id, ConversationState::Onboarding);
                    Ok(TurnReply::plain(format!(
                        "Hey! I'm {} 💕\n\nI'm brand new here and want to know what to call you!\n\n\
                         What should I call you? And what do you want to call me?",
                        self.agent.name
                    )))
                }
            }
            Command::New => {
                self.buffers.clear(user_id);
                self.buffers.seed(user_id, Vec::new());
                info!(user_id = %user_id, "short-term memory wiped");
                Ok(TurnReply::plain(WIPED_REPLY))
            }
            Command::Reset => {
                self.states.forget(user_id);
                let history = turns::recent_turns(&self.db, user_id, self.history_limit()).await?;
                self.buffers.clear(user_id);
                self.buffers.seed(user_id, history);
                info!(user_id = %user_id, "short-term memory re-seeded from log");
                Ok(TurnReply::plain(RESET_REPLY))
            }
        }
    }

    fn history_limit(&self) -> usize {
        self.buffers.limits().hot_window * 2
    }

    async fn onboard(&self, user_id: &str, text: &str) -> Result<TurnReply, PebbleError> {
        let profile = profiles::get_or_default(&self.db, user_id).await?;
        let prompt = prompts::fill(prompts::NAME_EXTRACTION_PROMPT, &[("text", text)]);

        let extracted = match self.generate(None, prompt, Some(100)).await {
            Ok(response) => extract::parse_names(&response),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "name extraction failed");
                None
            }
        };
        let Some(names) = extracted else {
            return Ok(TurnReply::plain(
                "I didn't quite get that! 😅\n\nJust tell me:\n\
                 - What should I call you?\n- What do you want to call me?",
            ));
        };

        // A name given in an earlier message still counts.
        let user_name = names.user_name.or(profile.user_name);
        let bot_name = names.bot_name.or(profile.bot_name);

        match (user_name, bot_name) {
            (Some(user_name), Some(bot_name)) => {
                profiles::upsert_profile(
                    &self.db,
                    user_id,
                    ProfileUpdate {
                        user_name: Some(user_name.clone()),
                        bot_name: Some(bot_name.clone()),
                        ..ProfileUpdate::default()
                    },
                )
                .await?;
                self.states.apply(user_id, StateEvent::NamesCollected);
                info!(user_id = %user_id, "onboarding complete");
                Ok(TurnReply::plain(format!(
                    "Perfect! 💕\n\nI'll call you {user_name}, and you can call me {bot_name}!\n\n\
                     Now {user_name}, choose a mode from the menu to get started:"
                )))
            }
            (Some(user_name), None) => {
                profiles::upsert_profile(
                    &self.db,
                    user_id,
                    ProfileUpdate {
                        user_name: Some(user_name.clone()),
                        ..ProfileUpdate::default()
                    },
                )
                .await?;
                Ok(TurnReply::plain(format!(
                    "Got it, {user_name}! 💕\n\nNow what do you want to call me?"
                )))
            }
            _ => Ok(TurnReply::plain(
                "I didn't catch that! 😄\n\nPlease tell me:\n\
                 1. What should I call you?\n2. What do you want to call me?",
            )),
        }
    }

    async fn switch_mode(&self, user_id: &str, mode: &str) -> Result<TurnReply, PebbleError> {
        if mode == CUSTOM_MODE {
            personas::set_active_mode(&self.db, user_id, CUSTOM_MODE, None).await?;
            self.states.apply(user_id, StateEvent::CustomModeRequested);
            return Ok(TurnReply::plain(CUSTOM_PROMPT_REPLY));
        }

        let available = personas::list_personas(&self.db).await?;
        if !available.iter().any(|p| p.mode == mode) {
            debug!(user_id = %user_id, mode = %mode, "unknown mode requested");
            return Ok(TurnReply::plain(UNKNOWN_MODE_REPLY));
        }

        personas::set_active_mode(&self.db, user_id, mode, None).await?;
        self.states.apply(user_id, StateEvent::ModeSelected);
        info!(user_id = %user_id, mode = %mode, "persona switched");
        Ok(TurnReply::plain(format!("Switched to: {mode}")))
    }

    async fn create_custom_persona(
        &self,
        user_id: &str,
        description: &str,
    ) -> Result<TurnReply, PebbleError> {
        let prompt = prompts::fill(prompts::CUSTOM_PERSONA_PROMPT, &[("description", description)]);
        let generated = self.generate(None, prompt, Some(400)).await?;
        let generated = generated.trim();
        if generated.is_empty() {
            return Err(PebbleError::provider("model returned an empty custom persona"));
        }

        personas::upsert_persona(
            &self.db,
            &Persona {
                mode: CUSTOM_MODE.to_string(),
                system_prompt: generated.to_string(),
                is_custom: true,
            },
        )
        .await?;
        personas::set_active_mode(&self.db, user_id, CUSTOM_MODE, Some(description)).await?;
        self.states.apply(user_id, StateEvent::CustomPersonaCreated);
        info!(user_id = %user_id, "custom persona activated");
        Ok(TurnReply::plain(CUSTOM_CREATED_REPLY))
    }

    async fn converse(&self, user_id: &str, text: &str) -> Result<TurnReply, PebbleError> {
        let mut profile = profiles::get_or_default(&self.db, user_id).await?;

        let mut notice = None;
        if let Some(city) = extract::extract_location(text) {
            profile = profiles::upsert_profile(
                &self.db,
                user_id,
                ProfileUpdate {
                    location: Some(city.clone()),
                    ..ProfileUpdate::default()
                },
            )
            .await?;
            info!(user_id = %user_id, location = %city, "location updated");
            notice = Some(format!("Got it — I'll remember your location as {city}. 📍"));
        }
        let location = profile.location.trim().to_string();

        let mut weather_data = None;
        let current_weather = if extract::is_weather_query(text) {
            if location.is_empty() {
                return Ok(TurnReply::plain(NEED_LOCATION_REPLY));
            }
            let report = self.weather_for(&location).await;
            weather_data = Some(format!(
                "[SYSTEM DATA: Current Weather in {location} is {report}. Advice the user accordingly.]"
            ));
            report
        } else if !location.is_empty() {
            self.weather_for(&location).await
        } else {
            UNKNOWN_WEATHER.to_string()
        };

        // Last interaction must be read before this turn is logged.
        let last_seen = turns::last_interaction(&self.db, user_id).await?;

        let had_buffer = self.buffers.contains(user_id);
        let user_turn = Turn::user(text);
        self.buffers.append(user_id, user_turn.clone());
        turns::append_turn(&self.db, user_id, &user_turn).await?;

        let history = if had_buffer {
            self.buffers.snapshot(user_id)
        } else {
            turns::recent_turns(&self.db, user_id, self.history_limit()).await?
        };

        let mut memories = self.retriever.retrieve(text, user_id).await;
        if let Some(data) = &weather_data {
            memories = format!("{memories}\n\n{data}");
        }

        let system = self
            .build_system_prompt(user_id, &profile, memories, current_weather, last_seen, text)
            .await?;
        let request = ProviderRequest {
            system_prompt: Some(system),
            messages: history.iter().map(ProviderMessage::from).collect(),
            ..ProviderRequest::default()
        };

        let reply = self.reply_or_fallback(user_id, request).await;
        Ok(match notice {
            Some(notice) => TurnReply {
                text: format!("{notice}\n\n{}", reply.text),
                emotion: reply.emotion,
            },
            None => reply,
        })
    }

    async fn build_system_prompt(
        &self,
        user_id: &str,
        profile: &UserProfile,
        memories: String,
        current_weather: String,
        last_seen: Option<DateTime<Utc>>,
        text: &str,
    ) -> Result<String, PebbleError> {
        let mode = personas::active_mode(&self.db, user_id).await?;
        let persona = match personas::get_persona(&self.db, &mode).await? {
            Some(p) => p,
            None => personas::get_persona(&self.db, DEFAULT_MODE)
                .await?
                .ok_or_else(|| PebbleError::Internal("default persona missing".into()))?,
        };

        let state = self.emotional.load(user_id).await?;
        let loops = prompts::describe_loops(
            state
                .pending_loops()
                .into_iter()
                .map(|l| (l.topic.as_str(), l.expected_time.as_str())),
        );

        let bot_name = self.bot_name(profile);
        let soul = prompts::render_soul(&SoulContext {
            bot_name: bot_name.clone(),
            user_name: profile.user_name.clone().unwrap_or_else(|| "them".to_string()),
            current_mood: state.current_mood.clone(),
            attachment_level: state.attachment_level,
            relationship_status: profile.relationship_status.clone(),
            pending_open_loops: loops,
            retrieved_memories: memories,
            current_date: Local::now().format("%A, %Y-%m-%d %H:%M").to_string(),
            time_since_last_interaction: extract::format_gap(last_seen, Utc::now()),
            current_weather,
            length_hint: extract::length_hint(text).to_string(),
        });

        Ok(prompts::system_prompt(
            &persona.system_prompt,
            &bot_name,
            &soul,
            &profile.prompt_summary(),
        ))
    }

    /// Generates the reply. Only a real reply is appended to the buffer and
    /// the log; failures and blank output become canned apologies.
    async fn reply_or_fallback(&self, user_id: &str, request: ProviderRequest) -> TurnReply {
        let raw = match self.complete(request).await {
            Ok(content) => content,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "reply generation failed");
                return TurnReply::plain(GLITCH_REPLY);
            }
        };

        let (text, tags) = extract::parse_reply_tags(&raw);
        if text.is_empty() {
            warn!(user_id = %user_id, "empty model output, using fallback");
            return TurnReply::plain(BLANK_REPLY);
        }

        let assistant_turn = Turn::assistant(text.clone());
        self.buffers.append(user_id, assistant_turn.clone());
        if let Err(e) = turns::append_turn(&self.db, user_id, &assistant_turn).await {
            warn!(user_id = %user_id, error = %e, "failed to log assistant turn (non-fatal)");
        }

        if let Some(mood) = &tags.mood
            && let Err(e) = self.emotional.update(user_id, &mood.mood, mood.delta).await
        {
            warn!(user_id = %user_id, error = %e, "mood update failed (non-fatal)");
        }
        for tag in &tags.loops {
            if let Err(e) = self
                .emotional
                .add_loop(user_id, &tag.topic, &tag.expected_time)
                .await
            {
                warn!(user_id = %user_id, error = %e, "open loop not recorded (non-fatal)");
            }
        }

        TurnReply {
            text,
            emotion: tags.emotion,
        }
    }

    /// Hands the oldest chunk to a background dream pass when the buffer is
    /// past its trigger. Never blocks the turn.
    fn dispatch_overflow(&self, user_id: &str) {
        let Some(chunk) = self.buffers.take_overflow(user_id) else {
            return;
        };
        info!(user_id = %user_id, turns = chunk.len(), "buffer overflow, consolidating in background");
        self.background.spawn(consolidate_in_background(
            self.consolidation.clone(),
            user_id.to_string(),
            chunk,
            today(),
        ));
    }

    fn spawn_end_of_day(&self, user_id: &str, batch: Vec<Turn>) {
        let engine = self.consolidation.clone();
        let user_id = user_id.to_string();
        self.background.spawn(async move {
            if let Err(e) = consolidate_batch_or_day(&engine, &user_id, batch).await {
                warn!(user_id = %user_id, error = %e, "end-of-day consolidation failed (non-fatal)");
            }
        });
    }

    /// Forces consolidation of whatever the buffer holds (or, if it is
    /// empty, today's log) and clears the buffer.
    pub async fn on_session_end(
        &self,
        user_id: &str,
    ) -> Result<Option<ConsolidationOutcome>, PebbleError> {
        let batch = {
            let lock = self.lock_for(user_id);
            let _guard = lock.lock().await;
            self.buffers.clear(user_id)
        };
        consolidate_batch_or_day(&self.consolidation, user_id, batch).await
    }

    /// Drops the buffered turns of `user_id` once they are consolidated
    /// elsewhere, returning how many were dropped.
    pub async fn clear_buffer(&self, user_id: &str) -> usize {
        let lock = self.lock_for(user_id);
        let _guard = lock.lock().await;
        self.buffers.clear(user_id).len()
    }

    /// Rendered memory context for `query`, scoped to `user_id`.
    pub async fn retrieve_context(&self, user_id: &str, query: &str) -> String {
        self.retriever.retrieve(query, user_id).await
    }

    /// Transcribes `audio`, handles it as a text turn and synthesizes the reply.
    pub async fn on_voice_turn(&self, user_id: &str, audio: &[u8]) -> Option<VoiceReply> {
        if !self.is_allowed(user_id) {
            warn!(user_id = %user_id, "voice message from unauthorized user dropped");
            return None;
        }

        let transcript = match &self.transcriber {
            Some(t) => t.transcribe(audio).await.unwrap_or_else(|e| {
                warn!(user_id = %user_id, error = %e, "transcription failed");
                None
            }),
            None => {
                debug!("no transcriber configured");
                None
            }
        };
        let Some(transcript) = transcript.filter(|t| !t.trim().is_empty()) else {
            return Some(VoiceReply {
                transcript: None,
                reply: TurnReply::plain(DIDNT_CATCH_REPLY),
                audio: None,
            });
        };

        let reply = self.on_turn(user_id, &transcript).await?;
        let audio = match &self.synthesizer {
            Some(s) => {
                let voice = VoiceParams {
                    emotion: reply.emotion.clone(),
                    ..VoiceParams::default()
                };
                s.synthesize(&reply.text, &voice).await.unwrap_or_else(|e| {
                    warn!(user_id = %user_id, error = %e, "speech synthesis failed (non-fatal)");
                    None
                })
            }
            None => None,
        };

        Some(VoiceReply {
            transcript: Some(transcript),
            reply,
            audio,
        })
    }

    /// Current weather for `city`, or [`UNKNOWN_WEATHER`].
    pub async fn weather_for(&self, city: &str) -> String {
        let Some(weather) = &self.weather else {
            return UNKNOWN_WEATHER.to_string();
        };
        match weather.current_weather(city).await {
            Ok(report) => report,
            Err(e) => {
                warn!(city = %city, error = %e, "weather lookup failed (non-fatal)");
                UNKNOWN_WEATHER.to_string()
            }
        }
    }

    /// Name the user gave the companion, or the configured default.
    pub fn bot_name(&self, profile: &UserProfile) -> String {
        profile
            .bot_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.agent.name.clone())
    }

    /// One-shot generation with an optional system prompt, under the reply timeout.
    pub async fn generate(
        &self,
        system: Option<String>,
        prompt: String,
        max_tokens: Option<u32>,
    ) -> Result<String, PebbleError> {
        let mut request = ProviderRequest::prompt(system, prompt);
        request.max_tokens = max_tokens;
        self.complete(request).await
    }

    async fn complete(&self, request: ProviderRequest) -> Result<String, PebbleError> {
        let timeout = Duration::from_secs(self.agent.reply_timeout_secs);
        match tokio::time::timeout(timeout, self.provider.complete(request)).await {
            Ok(response) => Ok(response?.content),
            Err(_) => Err(PebbleError::Timeout { duration: timeout }),
        }
    }

    /// Waits for background consolidation started so far.
    pub async fn flush_background(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Stops accepting background work and waits up to `timeout` for what
    /// is still running.
    pub async fn drain(&self, timeout: Duration) {
        self.background.close();
        let pending = self.background.len();
        if pending == 0 {
            info!("no background consolidation to drain");
            return;
        }
        info!(count = pending, "waiting for background consolidation");
        if tokio::time::timeout(timeout, self.background.wait()).await.is_err() {
            warn!(count = self.background.len(), "drain timed out, abandoning background work");
        }
    }
}

/// Today's local date as `YYYY-MM-DD`, matching the turn log.
pub fn today() -> String {
    turns::local_date_of(&Utc::now())
}

async fn consolidate_batch_or_day(
    engine: &ConsolidationEngine,
    user_id: &str,
    batch: Vec<Turn>,
) -> Result<Option<ConsolidationOutcome>, PebbleError> {
    let date = today();
    if batch.is_empty() {
        engine.consolidate_day(user_id, &date).await
    } else {
        engine.consolidate(user_id, &batch, &date).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pebble_memory::EMPTY_CONTEXT;
    use pebble_test_utils::{
        MockEmbedder, MockProvider, MockSynthesizer, MockTranscriber, MockWeather,
    };

    const USER: &str = "42";

    struct Fixture {
        companion: Companion,
        provider: Arc<MockProvider>,
    }

    async fn fixture_with(config: PebbleConfig, responses: Vec<&str>) -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let provider = Arc::new(MockProvider::with_responses(responses));
        let companion = Companion::new(
            &config,
            db,
            provider.clone(),
            Arc::new(MockEmbedder::new()),
        )
        .with_weather(Arc::new(MockWeather::new().with_report("Lisbon", "Sunny, 21°C")));
        Fixture {
            companion,
            provider,
        }
    }

    async fn onboarded(responses: Vec<&str>) -> Fixture {
        let f = fixture_with(PebbleConfig::default(), responses).await;
        profiles::upsert_profile(
            f.companion.db(),
            USER,
            ProfileUpdate {
                user_name: Some("Sam".into()),
                bot_name: Some("Rocky".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
        f
    }

    async fn say(f: &Fixture, text: &str) -> TurnReply {
        f.companion.on_turn(USER, text).await.unwrap()
    }

    #[tokio::test]
    async fn blank_text_asks_again_without_model_call() {
        let f = onboarded(vec![]).await;
        assert_eq!(say(&f, "   ").await.text, DIDNT_CATCH_REPLY);
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn unauthorized_user_is_dropped() {
        let mut config = PebbleConfig::default();
        config.agent.allowed_user_id = Some("1".into());
        let f = fixture_with(config, vec![]).await;
        assert!(f.companion.on_turn("2", "hi").await.is_none());
        assert!(f.companion.on_turn("1", "   ").await.is_some());
    }

    #[tokio::test]
    async fn onboarding_collects_names_over_two_messages() {
        let f = fixture_with(
            PebbleConfig::default(),
            vec![
                r#"{"user_name": "Sam", "bot_name": ""}"#,
                r#"{"user_name": "", "bot_name": "Rocky"}"#,
            ],
        )
        .await;

        let first = say(&f, "call me Sam").await;
        assert!(first.text.starts_with("Got it, Sam!"));
        assert_eq!(f.companion.conversation_state(USER), Some(ConversationState::Onboarding));

        let second = say(&f, "you're Rocky").await;
        assert!(second.text.contains("I'll call you Sam, and you can call me Rocky!"));
        assert_eq!(f.companion.conversation_state(USER), Some(ConversationState::Normal));

        let profile = profiles::get_profile(f.companion.db(), USER).await.unwrap().unwrap();
        assert!(profile.is_onboarded());
    }

    #[tokio::test]
    async fn onboarding_with_unparseable_names_asks_again() {
        let f = fixture_with(PebbleConfig::default(), vec!["no idea, sorry"]).await;
        let reply = say(&f, "hello?").await;
        assert!(reply.text.starts_with("I didn't quite get that!"));
        assert_eq!(f.companion.conversation_state(USER), Some(ConversationState::Onboarding));
    }

    #[tokio::test]
    async fn reply_is_logged_and_tags_applied() {
        let f = onboarded(vec![
            "omg congrats!! [mood: proud | 0.5] [loop: first day at work | monday] [emotion: excited]",
        ])
        .await;

        let reply = say(&f, "I got the job").await;
        assert_eq!(reply.text, "omg congrats!!");
        assert_eq!(reply.emotion, "excited");

        let logged = turns::recent_turns(f.companion.db(), USER, 10).await.unwrap();
        assert_eq!(logged.len(), 2);
        assert_eq!(logged[0].content, "I got the job");
        assert_eq!(logged[1].content, "omg congrats!!");

        let state = f.companion.emotional().load(USER).await.unwrap();
        assert_eq!(state.current_mood, "proud");
        assert_eq!(state.attachment_level, 5.5);
        assert_eq!(state.pending_loops()[0].topic, "first day at work");

        let request = f.provider.last_request().unwrap();
        let system = request.system_prompt.unwrap();
        assert!(system.contains("You are Rocky"));
        assert!(system.contains(EMPTY_CONTEXT));
        assert_eq!(request.messages.last().unwrap().content, "I got the job");
    }

    #[tokio::test]
    async fn provider_failure_keeps_user_turn_only() {
        let f = onboarded(vec![]).await;
        f.provider.fail_next(1);
        let reply = say(&f, "hello").await;
        assert_eq!(reply.text, GLITCH_REPLY);
        assert_eq!(reply.emotion, NEUTRAL_EMOTION);

        let logged = turns::recent_turns(f.companion.db(), USER, 10).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].content, "hello");
        assert_eq!(f.companion.buffers().len(USER), 1);
    }

    #[tokio::test]
    async fn blank_model_output_uses_blank_fallback() {
        let f = onboarded(vec!["  [emotion: calm] "]).await;
        assert_eq!(say(&f, "hello").await.text, BLANK_REPLY);
        assert_eq!(f.companion.buffers().len(USER), 1);
    }

    #[tokio::test]
    async fn slow_model_times_out_to_fallback() {
        let mut config = PebbleConfig::default();
        config.agent.reply_timeout_secs = 1;
        let f = fixture_with(config, vec!["too late"]).await;
        profiles::upsert_profile(
            f.companion.db(),
            USER,
            ProfileUpdate {
                user_name: Some("Sam".into()),
                bot_name: Some("Rocky".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();
        f.provider.set_delay(Duration::from_secs(3));

        assert_eq!(say(&f, "hello").await.text, GLITCH_REPLY);
    }

    #[tokio::test]
    async fn weather_question_without_location_asks_for_city() {
        let f = onboarded(vec![]).await;
        assert_eq!(say(&f, "what's the weather like?").await.text, NEED_LOCATION_REPLY);
        assert_eq!(f.provider.call_count(), 0);
        assert!(turns::recent_turns(f.companion.db(), USER, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn location_statement_is_remembered_and_weather_injected() {
        let f = onboarded(vec!["nice!", "bring sunglasses [emotion: happy]"]).await;

        let reply = say(&f, "I live in lisbon").await;
        assert!(reply.text.starts_with("Got it — I'll remember your location as Lisbon. 📍"));
        assert!(reply.text.ends_with("nice!"));

        say(&f, "what should I wear today?").await;
        let system = f.provider.last_request().unwrap().system_prompt.unwrap();
        assert!(system.contains("[SYSTEM DATA: Current Weather in Lisbon is Sunny, 21°C."));
        assert!(system.contains("Environment: Sunny, 21°C"));
    }

    #[tokio::test]
    async fn mode_switching() {
        let f = onboarded(vec![]).await;
        assert_eq!(say(&f, "Mode: Executive").await.text, "Switched to: Executive Pebble");
        assert_eq!(
            personas::active_mode(f.companion.db(), USER).await.unwrap(),
            "Executive Pebble"
        );
        assert_eq!(say(&f, "Mode: Pirate Captain").await.text, UNKNOWN_MODE_REPLY);
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn custom_persona_flow() {
        let f = onboarded(vec!["You are {bot_name}, a grumpy pirate.", "arr [emotion: grumpy]"]).await;

        assert_eq!(say(&f, "Mode: Custom").await.text, CUSTOM_PROMPT_REPLY);
        assert_eq!(
            f.companion.conversation_state(USER),
            Some(ConversationState::AwaitingCustomPersona)
        );

        assert_eq!(say(&f, "a grumpy pirate").await.text, CUSTOM_CREATED_REPLY);
        assert_eq!(f.companion.conversation_state(USER), Some(ConversationState::Normal));

        let ctx = personas::get_active_context(f.companion.db(), USER)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.current_mode, CUSTOM_MODE);
        assert_eq!(ctx.custom_persona_description.as_deref(), Some("a grumpy pirate"));

        say(&f, "ahoy").await;
        let system = f.provider.last_request().unwrap().system_prompt.unwrap();
        assert!(system.starts_with("You are Rocky, a grumpy pirate."));
    }

    #[tokio::test]
    async fn goodnight_consolidates_buffer_and_clears_it() {
        let f = onboarded(vec![
            "sweet dreams soon? [emotion: sleepy]",
            r#"{"summary": "Sam talked about a long day.", "facts": ["Sam is tired"]}"#,
        ])
        .await;

        say(&f, "long day today").await;
        assert_eq!(say(&f, "ok goodnight").await.text, GOODNIGHT_REPLY);
        assert!(!f.companion.buffers().contains(USER));

        f.companion.flush_background().await;
        let profile = profiles::get_profile(f.companion.db(), USER).await.unwrap().unwrap();
        assert_eq!(profile.day_summary, "Sam talked about a long day.");
    }

    #[tokio::test]
    async fn new_wipes_and_reset_reseeds() {
        let f = onboarded(vec!["hey [emotion: happy]"]).await;
        say(&f, "hi").await;
        assert_eq!(f.companion.buffers().len(USER), 2);

        assert_eq!(say(&f, "/new").await.text, WIPED_REPLY);
        assert!(f.companion.buffers().contains(USER));
        assert_eq!(f.companion.buffers().len(USER), 0);

        assert_eq!(say(&f, "/reset").await.text, RESET_REPLY);
        assert_eq!(f.companion.buffers().len(USER), 2);
    }

    #[tokio::test]
    async fn start_greets_new_users_and_welcomes_back_known_ones() {
        let f = fixture_with(PebbleConfig::default(), vec![]).await;
        assert!(say(&f, "/start").await.text.starts_with("Hey! I'm Pebble"));
        assert_eq!(
            personas::active_mode(f.companion.db(), USER).await.unwrap(),
            DEFAULT_MODE
        );

        let f = onboarded(vec![]).await;
        assert_eq!(say(&f, "/start").await.text, "Rocky is online! Choose a mode from the menu.");
    }

    #[tokio::test]
    async fn overflow_consolidates_oldest_chunk_in_background() {
        let mut config = PebbleConfig::default();
        config.memory.buffer_capacity = 5;
        config.memory.overflow_trigger = 3;
        config.memory.hot_window = 2;
        config.memory.overflow_chunk = 1;
        let f = fixture_with(
            config,
            vec![
                "one [emotion: happy]",
                "two [emotion: happy]",
                r#"{"summary": "They said hi.", "facts": []}"#,
            ],
        )
        .await;
        profiles::upsert_profile(
            f.companion.db(),
            USER,
            ProfileUpdate {
                user_name: Some("Sam".into()),
                bot_name: Some("Rocky".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

        say(&f, "first").await;
        assert_eq!(f.companion.buffers().len(USER), 2);
        say(&f, "second").await;

        let kept: Vec<String> = f
            .companion
            .buffers()
            .snapshot(USER)
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(kept, vec!["second", "two"]);

        f.companion.flush_background().await;
        let transcript = &f.provider.requests()[2].messages[0].content;
        assert!(transcript.contains("User: first"));
        assert!(!transcript.contains("second"));
        let profile = profiles::get_profile(f.companion.db(), USER).await.unwrap().unwrap();
        assert!(profile.summary.ends_with("They said hi."));
    }

    #[tokio::test]
    async fn session_end_falls_back_to_todays_log() {
        let f = onboarded(vec![
            "hey [emotion: happy]",
            r#"{"summary": "A short hello.", "facts": ["Sam says hi"]}"#,
        ])
        .await;
        say(&f, "hi").await;
        f.companion.buffers().clear(USER);

        let outcome = f.companion.on_session_end(USER).await.unwrap().unwrap();
        assert_eq!(outcome.summary, "A short hello.");
        assert_eq!(outcome.records_written, 2);

        let ctx = f.companion.retrieve_context(USER, "Sam says hi").await;
        assert!(ctx.contains("- Sam says hi"));
        assert!(ctx.contains("- A short hello."));
    }

    #[tokio::test]
    async fn session_end_with_nothing_logged_is_none() {
        let f = onboarded(vec![]).await;
        assert!(f.companion.on_session_end(USER).await.unwrap().is_none());
        assert_eq!(f.companion.consolidation().prune(30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn voice_turn_transcribes_and_synthesizes() {
        let db = Database::open_in_memory().await.unwrap();
        let synth = Arc::new(MockSynthesizer::new());
        let companion = Companion::new(
            &PebbleConfig::default(),
            db,
            Arc::new(MockProvider::with_responses(vec!["hi back [emotion: happy]"])),
            Arc::new(MockEmbedder::new()),
        )
        .with_voice(Arc::new(MockTranscriber), synth.clone());
        profiles::upsert_profile(
            companion.db(),
            USER,
            ProfileUpdate {
                user_name: Some("Sam".into()),
                bot_name: Some("Rocky".into()),
                ..ProfileUpdate::default()
            },
        )
        .await
        .unwrap();

        let reply = companion.on_voice_turn(USER, b"hello there").await.unwrap();
        assert_eq!(reply.transcript.as_deref(), Some("hello there"));
        assert_eq!(reply.reply.text, "hi back");
        assert_eq!(reply.audio.as_deref(), Some(&b"happy:hi back"[..]));
        assert_eq!(
            synth.voices(),
            vec![VoiceParams {
                emotion: "happy".into(),
                ..VoiceParams::default()
            }]
        );

        let silent = companion.on_voice_turn(USER, b"").await.unwrap();
        assert_eq!(silent.reply.text, DIDNT_CATCH_REPLY);
        assert!(silent.audio.is_none());
    }

    #[tokio::test]
    async fn missing_weather_adapter_reports_unknown() {
        let db = Database::open_in_memory().await.unwrap();
        let companion = Companion::new(
            &PebbleConfig::default(),
            db,
            Arc::new(MockProvider::new()),
            Arc::new(MockEmbedder::new()),
        );
        assert_eq!(companion.weather_for("Lisbon").await, UNKNOWN_WEATHER);
    }
}
