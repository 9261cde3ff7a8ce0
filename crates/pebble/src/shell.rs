// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `pebble shell` command implementation.
//!
//! An interactive REPL with readline history for a single local user. Every
//! line goes through the same turn pipeline as `serve`, commands included.

use std::time::Duration;

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use pebble_agent::{Companion, TurnReply};
use pebble_config::model::PebbleConfig;
use pebble_core::PebbleError;

use crate::serve::build_companion;

/// User id the shell talks as.
pub const LOCAL_USER: &str = "local";

/// Runs the `pebble shell` interactive REPL.
pub async fn run_shell(config: PebbleConfig) -> Result<(), PebbleError> {
    let companion = build_companion(&config).await?;
    if !companion.is_allowed(LOCAL_USER) {
        return Err(PebbleError::Config(format!(
            "agent.allowed_user_id is set, so the shell user `{LOCAL_USER}` would be ignored"
        )));
    }

    let mut rl = DefaultEditor::new()
        .map_err(|e| PebbleError::Internal(format!("failed to initialize readline: {e}")))?;

    println!("{}", "pebble shell".bold().green());
    println!("{}", "type /quit or Ctrl+D to leave, /start to begin".dimmed());

    let prompt = format!("{}> ", "you".green());
    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                if trimmed == "/quit" || trimmed == "/exit" {
                    break;
                }

                match companion.on_turn(LOCAL_USER, trimmed).await {
                    Some(reply) => println!("{}", render_reply(&companion, &reply).await),
                    None => eprintln!("{}: message was not accepted", "error".red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C
                break;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D
                break;
            }
            Err(e) => {
                eprintln!("{}: {e}", "error".red());
                break;
            }
        }
    }

    companion.drain(Duration::from_secs(30)).await;
    println!("{}", "goodbye".dimmed());
    Ok(())
}

async fn render_reply(companion: &Companion, reply: &TurnReply) -> String {
    let name = match pebble_storage::queries::profiles::get_profile(companion.db(), LOCAL_USER).await {
        Ok(Some(profile)) => companion.bot_name(&profile),
        _ => "pebble".to_string(),
    };
    format!(
        "{}{} {}",
        name.cyan().bold(),
        format!(" ({})", reply.emotion).dimmed(),
        reply.text
    )
}
