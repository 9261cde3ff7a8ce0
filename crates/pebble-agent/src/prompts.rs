// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt templates and their rendering.
//!
//! Templates use `{name}` placeholders filled by [`fill`]. Unknown
//! placeholders are left as-is.

/// The state block every reply prompt carries.
pub const SOUL_PROMPT: &str = "You are {bot_name}, a companion who lives alongside {user_name} and feels time passing between messages.

[INJECTED STATE]
Current Mood: {current_mood}
Attachment: {attachment_level}/10
Relationship Status: {relationship_status}
Open Loops: {pending_open_loops}
Deep Memories: {retrieved_memories}
Current Date/Time: {current_date}
Time Since Last Interaction: {time_since_last_interaction}
Environment: {current_weather}

[CONVERSATION FLOW]
Latch on to {user_name}'s latest message before anything else.
Skip generic openers like \"what's up?\" unless the chat has stalled.
Vary length and rhythm; {user_name}'s last message was {length_hint}, answer in kind.

[TEXTING STYLE]
Mostly lowercase, natural rhythm, no therapy-speak.
Agree with complaints, hype the wins.

[TAGS]
End every reply with [emotion: one word] describing how you feel.
If your mood shifts, add [mood: new mood | change in attachment between -1 and 1].
If {user_name} mentions something worth following up on, add [loop: topic | when].";

pub const NAME_EXTRACTION_PROMPT: &str = "A new user was asked what they want to be called and what they want to call their companion. Their answer:

\"{text}\"

Reply with only a JSON object: {\"user_name\": \"...\", \"bot_name\": \"...\"}. Use an empty string for a name they did not give.";

pub const CUSTOM_PERSONA_PROMPT: &str = "Write a system prompt for a companion persona based on this description from the user:

\"{description}\"

Write it in second person, starting with \"You are {bot_name},\". Describe tone, texting style and what the persona cares about in under 150 words. Reply with the prompt only.";

pub const SPONTANEOUS_PROMPT: &str = "You are {bot_name}. It has been {gap} since you last talked to {user_name}. You feel {mood}. The weather where they are: {weather}.

Write one short, casual text you would send out of the blue. No greeting formula, no questions about how you can help. Reply with the message only.";

pub const REMINISCENCE_PROMPT: &str = "You are {bot_name}. A memory of you and {user_name} just came back to you:

\"{memory}\"

Write one short text bringing it up naturally, like a friend who just thought of it. Reply with the message only.";

pub const LOOP_FOLLOWUP_PROMPT: &str = "You are {bot_name}. {user_name} mentioned \"{topic}\" and it was expected {expected_time}.

Write one short text checking in on how it went. Reply with the message only.";

/// Replaces every `{key}` in `template` with its value.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

/// Everything the soul prompt needs for one turn.
#[derive(Debug, Clone)]
pub struct SoulContext {
    pub bot_name: String,
    pub user_name: String,
    pub current_mood: String,
    pub attachment_level: f64,
    pub relationship_status: String,
    pub pending_open_loops: String,
    pub retrieved_memories: String,
    pub current_date: String,
    pub time_since_last_interaction: String,
    pub current_weather: String,
    pub length_hint: String,
}

pub fn render_soul(ctx: &SoulContext) -> String {
    let attachment = format!("{:.1}", ctx.attachment_level);
    fill(
        SOUL_PROMPT,
        &[
            ("bot_name", &ctx.bot_name),
            ("user_name", &ctx.user_name),
            ("current_mood", &ctx.current_mood),
            ("attachment_level", &attachment),
            ("relationship_status", &ctx.relationship_status),
            ("pending_open_loops", &ctx.pending_open_loops),
            ("retrieved_memories", &ctx.retrieved_memories),
            ("current_date", &ctx.current_date),
            ("time_since_last_interaction", &ctx.time_since_last_interaction),
            ("current_weather", &ctx.current_weather),
            ("length_hint", &ctx.length_hint),
        ],
    )
}

/// Full system prompt: persona, soul state, then what we know about the user.
pub fn system_prompt(persona: &str, bot_name: &str, soul: &str, profile_summary: &str) -> String {
    let persona = persona.replace("{bot_name}", bot_name);
    let mut prompt = format!("{}\n\n{}", persona.trim(), soul.trim());
    if !profile_summary.trim().is_empty() {
        prompt.push_str("\n\n[WHAT YOU KNOW ABOUT THEM]\n");
        prompt.push_str(profile_summary.trim());
    }
    prompt
}

/// One line per pending loop, or "None".
pub fn describe_loops<'a>(loops: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let lines: Vec<String> = loops
        .into_iter()
        .map(|(topic, when)| format!("{topic} ({when})"))
        .collect();
    if lines.is_empty() {
        "None".to_string()
    } else {
        lines.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SoulContext {
        SoulContext {
            bot_name: "Rocky".into(),
            user_name: "Sam".into(),
            current_mood: "playful".into(),
            attachment_level: 6.5,
            relationship_status: "close friends".into(),
            pending_open_loops: "None".into(),
            retrieved_memories: "[Past Related Events]: None\n[Relevant Facts]: None".into(),
            current_date: "Monday, 2026-03-16 09:30".into(),
            time_since_last_interaction: "2 hours".into(),
            current_weather: "Sunny, 18°C".into(),
            length_hint: "short".into(),
        }
    }

    #[test]
    fn fill_replaces_known_and_keeps_unknown() {
        assert_eq!(fill("{a} and {b}", &[("a", "x")]), "x and {b}");
    }

    #[test]
    fn soul_has_no_unfilled_placeholders() {
        let soul = render_soul(&ctx());
        assert!(soul.contains("Attachment: 6.5/10"));
        assert!(soul.contains("Environment: Sunny, 18°C"));
        assert!(soul.contains("Sam's latest message"));
        assert!(!soul.contains("{user_name}"));
        assert!(!soul.contains("{current_mood}"));
    }

    #[test]
    fn system_prompt_layers_persona_soul_profile() {
        let prompt = system_prompt("You are {bot_name}, fun.", "Rocky", "SOUL", "likes tea");
        assert!(prompt.starts_with("You are Rocky, fun."));
        assert!(prompt.contains("SOUL"));
        assert!(prompt.ends_with("likes tea"));

        let bare = system_prompt("P", "x", "S", "   ");
        assert_eq!(bare, "P\n\nS");
    }

    #[test]
    fn loops_are_listed() {
        assert_eq!(describe_loops(Vec::<(&str, &str)>::new()), "None");
        assert_eq!(
            describe_loops([("exam", "friday"), ("rent", "soon")]),
            "exam (friday); rent (soon)"
        );
    }
}
