// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Pebble companion.
//!
//! Holds the relational half of long-term state: the append-only turn log,
//! user profiles, per-user emotional state documents, and personas. The
//! semantic store shares the same [`Database`] and owns the
//! `memory_records` table.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::{map_tr_err, Database};
pub use models::*;
