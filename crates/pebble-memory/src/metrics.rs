// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory engine counters on the `metrics` facade. Nothing is exported
//! unless the host installs a recorder.

use metrics::{describe_counter, describe_histogram};

/// Registers metric descriptions. Call once after installing a recorder.
pub fn register_metrics() {
    describe_counter!(
        "pebble_consolidations_total",
        "Dream cycle passes, labelled by outcome"
    );
    describe_counter!("pebble_overflows_total", "Buffer overflow trims");
    describe_histogram!(
        "pebble_retrieved_memories",
        "Memories returned per retrieval"
    );
}

pub fn record_consolidation(ok: bool) {
    let outcome = if ok { "ok" } else { "empty" };
    metrics::counter!("pebble_consolidations_total", "outcome" => outcome).increment(1);
}

pub fn record_overflow() {
    metrics::counter!("pebble_overflows_total").increment(1);
}

pub fn record_retrieval(hits: usize) {
    metrics::histogram!("pebble_retrieved_memories").record(hits as f64);
}
