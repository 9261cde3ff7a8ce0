// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `pebble serve` command implementation.
//!
//! Wires storage, the model adapters and the optional weather sense into a
//! [`Companion`], starts the scheduler and reads `user_id: text` lines from
//! stdin until shutdown is signaled.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pebble_agent::{install_signal_handler, Companion, Outbox, Scheduler};
use pebble_config::model::{EmbedderKind, PebbleConfig};
use pebble_core::{EmbeddingAdapter, PebbleError, ProviderAdapter};
use pebble_openai::{OpenAiEmbedder, OpenAiProvider};
use pebble_storage::Database;
use pebble_weather::WttrWeather;

/// How long background consolidation may run after shutdown is signaled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs the companion until Ctrl-C or SIGTERM.
pub async fn run_serve(config: PebbleConfig) -> Result<(), PebbleError> {
    init_tracing(&config.agent.log_level);

    info!("starting pebble serve");
    pebble_memory::metrics::register_metrics();

    let companion = Arc::new(build_companion(&config).await?);
    let cancel = install_signal_handler();

    let outbox: Arc<dyn Outbox> = Arc::new(StdoutOutbox);
    let scheduler = Arc::new(Scheduler::new(
        companion.clone(),
        outbox,
        config.agent.allowed_user_id.clone(),
    )?);
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    if let Err(e) = run_line_transport(&companion, stdin, stdout, cancel.clone()).await {
        warn!(error = %e, "stdin transport failed, shutting down");
        cancel.cancel();
    }

    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "scheduler task panicked");
    }
    companion.drain(DRAIN_TIMEOUT).await;

    info!("pebble serve stopped");
    Ok(())
}

/// Assembles a companion from configuration.
pub async fn build_companion(config: &PebbleConfig) -> Result<Companion, PebbleError> {
    let db = Database::from_config(&config.storage).await?;
    info!(path = %config.storage.database_path, "database opened");

    let provider: Arc<dyn ProviderAdapter> = Arc::new(OpenAiProvider::new(&config.provider)?);
    let embedder = build_embedder(config)?;

    let mut companion = Companion::new(config, db, provider, embedder);
    if config.weather.enabled {
        companion = companion.with_weather(Arc::new(WttrWeather::new(&config.weather)?));
    } else {
        info!("weather sense disabled by configuration");
    }
    Ok(companion)
}

fn build_embedder(config: &PebbleConfig) -> Result<Arc<dyn EmbeddingAdapter>, PebbleError> {
    match config.memory.embedder {
        EmbedderKind::Openai => Ok(Arc::new(OpenAiEmbedder::new(
            &config.provider,
            &config.memory,
        )?)),
        EmbedderKind::Onnx => {
            let dir = config.memory.onnx_model_dir.as_deref().ok_or_else(|| {
                PebbleError::Config("memory.onnx_model_dir is required for the onnx embedder".into())
            })?;
            onnx_embedder(Path::new(dir))
        }
    }
}

#[cfg(feature = "onnx")]
fn onnx_embedder(dir: &Path) -> Result<Arc<dyn EmbeddingAdapter>, PebbleError> {
    Ok(Arc::new(pebble_memory::OnnxEmbedder::from_dir(dir)?))
}

#[cfg(not(feature = "onnx"))]
fn onnx_embedder(_dir: &Path) -> Result<Arc<dyn EmbeddingAdapter>, PebbleError> {
    Err(PebbleError::Config(
        "memory.embedder = \"onnx\" needs a build with the `onnx` feature".into(),
    ))
}

/// Prints messages the companion starts on its own.
struct StdoutOutbox;

#[async_trait]
impl Outbox for StdoutOutbox {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), PebbleError> {
        let mut out = tokio::io::stdout();
        out.write_all(format!("{user_id} <- {text}\n").as_bytes())
            .await
            .map_err(io_err)?;
        out.flush().await.map_err(io_err)
    }
}

fn io_err(e: std::io::Error) -> PebbleError {
    PebbleError::Internal(format!("transport i/o failed: {e}"))
}

/// Splits `user_id: text`. Both halves must be non-empty.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    let (user_id, text) = line.split_once(':')?;
    let (user_id, text) = (user_id.trim(), text.trim());
    if user_id.is_empty() || text.is_empty() {
        return None;
    }
    Some((user_id, text))
}

/// One input line in, at most one output line back.
async fn handle_line(companion: &Companion, line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some((user_id, text)) = parse_line(line) else {
        return Some("expected `user_id: text`".to_string());
    };
    match companion.on_turn(user_id, text).await {
        Some(reply) => Some(format!("{user_id} <- [{}] {}", reply.emotion, reply.text)),
        None => {
            warn!(user_id = %user_id, "message from user outside the allow-list dropped");
            None
        }
    }
}

/// Reads lines until `cancel` fires. End of input leaves the process
/// running for the scheduler.
async fn run_line_transport<R, W>(
    companion: &Companion,
    reader: R,
    mut writer: W,
    cancel: CancellationToken,
) -> Result<(), PebbleError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    loop {
        tokio::select! {
            biased;
            next = lines.next_line() => {
                match next.map_err(io_err)? {
                    Some(line) => {
                        if let Some(out) = handle_line(companion, &line).await {
                            writer.write_all(format!("{out}\n").as_bytes()).await.map_err(io_err)?;
                            writer.flush().await.map_err(io_err)?;
                        }
                    }
                    None => {
                        info!("stdin closed, waiting for shutdown signal");
                        cancel.cancelled().await;
                        return Ok(());
                    }
                }
            }
            _ = cancel.cancelled() => {
                info!("stdin transport shutting down");
                return Ok(());
            }
        }
    }
}

/// Initializes the tracing subscriber with the given log level.
pub(crate) fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pebble={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
