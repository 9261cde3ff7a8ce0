// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pebble - an always-on companion with long-term memory.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod dream;
mod serve;
mod shell;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use pebble_config::model::PebbleConfig;
use pebble_config::ConfigError;
use pebble_core::PebbleError;

/// Pebble - an always-on companion with long-term memory.
#[derive(Parser, Debug)]
#[command(name = "pebble", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the companion with its background jobs, reading `user_id: text` lines from stdin.
    Serve,
    /// Chat with the companion as a single local user.
    Shell,
    /// Run the dream cycle now.
    Dream {
        /// Only consolidate today's log for this user.
        #[arg(long)]
        user: Option<String>,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML. Secrets are redacted.
    Show,
    /// Load and validate configuration, reporting every problem found.
    Validate,
}

fn load(path: Option<&PathBuf>) -> Result<PebbleConfig, Vec<ConfigError>> {
    match path {
        Some(path) => pebble_config::load_and_validate_path(path),
        None => pebble_config::load_and_validate(),
    }
}

/// The configuration as TOML, with the API key masked.
fn render_config(config: &PebbleConfig) -> Result<String, PebbleError> {
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some("********".into());
    }
    toml::to_string_pretty(&shown)
        .map_err(|e| PebbleError::Internal(format!("failed to render config: {e}")))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(errors) => {
            pebble_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Shell) => shell::run_shell(config).await,
        Some(Commands::Dream { user }) => dream::run_dream(config, user).await,
        Some(Commands::Config {
            action: ConfigAction::Show,
        }) => render_config(&config).map(|rendered| print!("{rendered}")),
        Some(Commands::Config {
            action: ConfigAction::Validate,
        }) => {
            println!("{}", "config ok".green());
            Ok(())
        }
        None => {
            println!("pebble: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {e}", "error".red());
        std::process::exit(1);
    }
}
