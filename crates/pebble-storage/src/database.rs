// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All statements are serialized through tokio-rusqlite's single background
//! thread, so a closure passed to [`Database::connection`]`.call` runs
//! without interleaving with any other writer.

use std::path::Path;

use pebble_config::model::StorageConfig;
use pebble_core::{HealthStatus, PebbleError};
use tracing::{debug, info};

use crate::migrations;

/// Handle to the single SQLite connection shared by every store.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Opens (creating if needed) the database file, applies PRAGMAs, and runs migrations.
    pub async fn open(path: &str, wal_mode: bool) -> Result<Self, PebbleError> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| PebbleError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| PebbleError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.configure(wal_mode).await?;
        db.migrate().await?;
        info!(path, wal_mode, "database opened");
        Ok(db)
    }

    /// Opens using a [`StorageConfig`].
    pub async fn from_config(config: &StorageConfig) -> Result<Self, PebbleError> {
        Self::open(&config.database_path, config.wal_mode).await
    }

    /// In-memory database with the full schema, for tests and dry runs.
    pub async fn open_in_memory() -> Result<Self, PebbleError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| PebbleError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.configure(false).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// The underlying connection. Query modules go through `call`.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    async fn configure(&self, wal_mode: bool) -> Result<(), PebbleError> {
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                if wal_mode {
                    // journal_mode returns a row, so it cannot go through execute_batch.
                    conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
                }
                conn.execute_batch(
                    "PRAGMA synchronous = NORMAL;
                     PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn migrate(&self) -> Result<(), PebbleError> {
        self.conn
            .call(|conn| -> Result<(), refinery::Error> {
                migrations::run_migrations(conn)?;
                Ok(())
            })
            .await
            .map_err(|e| PebbleError::Storage {
                source: Box::new(e),
            })?;
        debug!("migrations applied");
        Ok(())
    }

    /// Cheap round trip through the connection thread.
    pub async fn health_check(&self) -> HealthStatus {
        let result = self
            .conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await;
        match result {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }

    /// Flushes the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), PebbleError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE);", [], |_| Ok(()))?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

/// Maps a tokio-rusqlite error into the storage variant.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> PebbleError {
    PebbleError::Storage {
        source: Box::new(e),
    }
}
