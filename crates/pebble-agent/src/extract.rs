// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Text-level intent detection for incoming turns and model replies.
//!
//! Everything here is pure and synchronous: goodnight phrases, persona
//! switches, slash commands, location statements, weather questions, the
//! trailing tags a model reply may carry, and the names JSON returned by
//! the onboarding prompt.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use pebble_memory::json_object;
use regex::Regex;
use serde::Deserialize;

/// Prefix of a persona switch, e.g. `Mode: Executive Pebble`.
pub const PERSONA_PREFIX: &str = "Mode:";

/// Emotion reported when a reply carries no tag.
pub const NEUTRAL_EMOTION: &str = "neutral";

const GOODNIGHT_PHRASES: &[&str] = &["goodnight", "good night", "going to sleep"];

/// Old mode names still accepted from saved keyboards.
const LEGACY_MODE_ALIASES: &[(&str, &str)] = &[
    ("Girlfriend (Nani)", "Fun Pebble"),
    ("Executive", "Executive Pebble"),
    ("Health Coach", "Fitness Pebble"),
];

const WEATHER_TOKENS: &[&str] = &["weather", "what should i wear", "outfit", "what do i wear"];

/// First words that turn "I'm in X" into a state of being rather than a place.
const NOT_A_PLACE: &[&str] = &[
    "a", "an", "the", "my", "your", "his", "her", "our", "their", "this", "that", "it", "bed",
    "love", "trouble", "pain", "class", "school", "work", "shock", "tears", "charge", "no", "so",
    "too", "here", "there", "line", "mood", "awe", "denial", "bits",
];

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:i\s+live\s+in|i'?m\s+(?:now\s+)?in|i\s+am\s+(?:now\s+)?in|i\s+moved\s+to|i'?m\s+based\s+in|i\s+am\s+based\s+in)\s+([\p{L}][\p{L} '\-]{0,60})",
    )
    .unwrap()
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\s*(emotion|mood|loop)\s*:\s*([^\]]*)\]").unwrap());

/// Slash commands a transport forwards verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Greeting; starts onboarding for new users.
    Start,
    /// Hard wipe of the short-term buffer.
    New,
    /// Soft refresh: buffer re-seeded from the turn log.
    Reset,
}

pub fn parse_command(text: &str) -> Option<Command> {
    let word = text.trim().split_whitespace().next()?;
    // Telegram-style `/new@botname`.
    let word = word.split('@').next().unwrap_or(word);
    match word.to_ascii_lowercase().as_str() {
        "/start" => Some(Command::Start),
        "/new" => Some(Command::New),
        "/reset" => Some(Command::Reset),
        _ => None,
    }
}

/// Whether the user is signing off for the night.
///
/// Phrases match as case-insensitive substrings; the short `gn` only counts
/// as a whole word so "sign" or "design" do not end the day.
pub fn is_goodnight(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if GOODNIGHT_PHRASES.iter().any(|p| lowered.contains(p)) {
        return true;
    }
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == "gn")
}

/// The mode named by a `Mode: X` message, with legacy names resolved.
pub fn parse_mode_command(text: &str) -> Option<String> {
    let raw = text.trim().strip_prefix(PERSONA_PREFIX)?.trim();
    let resolved = LEGACY_MODE_ALIASES
        .iter()
        .find(|(old, _)| *old == raw)
        .map(|(_, new)| *new)
        .unwrap_or(raw);
    Some(resolved.to_string())
}

pub fn is_weather_query(text: &str) -> bool {
    let lowered = text.to_lowercase();
    WEATHER_TOKENS.iter().any(|t| lowered.contains(t))
}

/// A city from statements like "I live in Lisbon" or "I moved to new york".
///
/// The capture stops at punctuation or a conjunction and is title-cased.
pub fn extract_location(text: &str) -> Option<String> {
    let caps = LOCATION_RE.captures(text)?;
    let raw = caps.get(1)?.as_str();

    let mut words = Vec::new();
    for word in raw.split_whitespace() {
        let lower = word.to_lowercase();
        if matches!(lower.as_str(), "and" | "but" | "now" | "since" | "for" | "with" | "because") {
            break;
        }
        words.push(word);
    }
    let first = words.first()?.to_lowercase();
    if NOT_A_PLACE.contains(&first.as_str()) {
        return None;
    }

    let city = words
        .iter()
        .map(|w| title_case(w))
        .collect::<Vec<_>>()
        .join(" ");
    let city = city.trim_matches(|c: char| c == '\'' || c == '-').trim().to_string();
    (!city.is_empty()).then_some(city)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Bucket of the user's message length, used to match reply length.
pub fn length_hint(text: &str) -> &'static str {
    match text.trim().chars().count() {
        n if n < 80 => "short",
        n if n < 260 => "medium",
        _ => "long",
    }
}

/// Human wording for the time since `last`, e.g. "3 hours".
pub fn format_gap(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(last) = last else {
        return "a while".to_string();
    };
    let seconds = (now - last).num_seconds().max(0);
    let (n, unit) = if seconds >= 86_400 {
        (seconds / 86_400, "day")
    } else if seconds >= 3_600 {
        (seconds / 3_600, "hour")
    } else {
        (seconds / 60, "minute")
    };
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// A mood shift requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct MoodTag {
    pub mood: String,
    pub delta: f64,
}

/// A follow-up topic requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopTag {
    pub topic: String,
    pub expected_time: String,
}

/// Tags parsed out of a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyTags {
    pub emotion: String,
    pub mood: Option<MoodTag>,
    pub loops: Vec<LoopTag>,
}

impl Default for ReplyTags {
    fn default() -> Self {
        Self {
            emotion: NEUTRAL_EMOTION.to_string(),
            mood: None,
            loops: Vec::new(),
        }
    }
}

/// Strips `[emotion: X]`, `[mood: X | delta]` and `[loop: topic | when]`
/// tags from `reply`, returning the clean text and what they said.
///
/// The last emotion and mood tag win. A mood without a parseable delta
/// shifts attachment by zero.
pub fn parse_reply_tags(reply: &str) -> (String, ReplyTags) {
    let mut tags = ReplyTags::default();

    for caps in TAG_RE.captures_iter(reply) {
        let kind = caps[1].to_lowercase();
        let body = caps[2].trim();
        match kind.as_str() {
            "emotion" => {
                let emotion = body.to_lowercase();
                if !emotion.is_empty() {
                    tags.emotion = emotion;
                }
            }
            "mood" => {
                let (mood, delta) = split_pipe(body);
                if !mood.is_empty() {
                    tags.mood = Some(MoodTag {
                        mood: mood.to_string(),
                        delta: delta.and_then(|d| d.parse().ok()).unwrap_or(0.0),
                    });
                }
            }
            _ => {
                let (topic, when) = split_pipe(body);
                if !topic.is_empty() {
                    tags.loops.push(LoopTag {
                        topic: topic.to_string(),
                        expected_time: when.filter(|w| !w.is_empty()).unwrap_or("soon").to_string(),
                    });
                }
            }
        }
    }

    let clean = TAG_RE.replace_all(reply, "");
    (clean.trim().to_string(), tags)
}

fn split_pipe(body: &str) -> (&str, Option<&str>) {
    match body.split_once('|') {
        Some((a, b)) => (a.trim(), Some(b.trim())),
        None => (body.trim(), None),
    }
}

/// Names pulled out of an onboarding message. Blank fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedNames {
    pub user_name: Option<String>,
    pub bot_name: Option<String>,
}

#[derive(Deserialize)]
struct NamesJson {
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    bot_name: Option<String>,
}

/// Parses the `{"user_name": ..., "bot_name": ...}` object the onboarding
/// prompt asks for. Returns `None` when the response holds no such object.
pub fn parse_names(response: &str) -> Option<ExtractedNames> {
    let parsed: NamesJson = serde_json::from_str(json_object(response)?).ok()?;
    let clean = |v: Option<String>| {
        v.map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("null"))
    };
    Some(ExtractedNames {
        user_name: clean(parsed.user_name),
        bot_name: clean(parsed.bot_name),
    })
}
