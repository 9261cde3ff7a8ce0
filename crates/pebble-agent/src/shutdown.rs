// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signal handling for graceful shutdown.
//!
//! SIGTERM and SIGINT (Ctrl+C) cancel a [`CancellationToken`] that the
//! scheduler and transports watch. Background consolidation is drained
//! through [`Companion::drain`](crate::Companion::drain) afterwards.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolves with the name of the first termination signal received.
async fn next_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl+C"
    }
}

/// Returns a token cancelled when SIGTERM or SIGINT arrives.
///
/// Cancelling the token yourself also stops the listener.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let watched = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            signal = next_signal() => {
                info!(signal, "shutdown requested");
                watched.cancel();
            }
            _ = watched.cancelled() => {}
        }
    });

    token
}
