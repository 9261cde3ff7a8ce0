// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end flows through the complete companion pipeline.
//!
//! Each test creates an isolated TestHarness with temp SQLite and mock
//! adapters. Tests are independent and order-insensitive.

use std::sync::Arc;

use pebble_agent::companion::today;
use pebble_agent::Scheduler;
use pebble_config::model::PebbleConfig;
use pebble_storage::queries::{personas, profiles, turns};
use pebble_test_utils::{RecordingOutbox, TestHarness};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ---- A day with the companion ----

#[tokio::test]
async fn a_day_from_first_hello_to_dream() {
    let mut config = PebbleConfig::default();
    config.schedule.quiet_minutes = 0;
    config.schedule.loop_followup_after_hours = 0;
    let harness = TestHarness::builder()
        .with_config(config)
        .with_mock_responses(strings(&[
            r#"{"user_name": "Lena", "bot_name": "Moss"}"#,
            "a recital?! you'll be amazing [loop: piano recital | tonight] [emotion: excited]",
            "how did the recital go?? 🎹",
            r#"{"summary": "Lena had a piano recital.", "facts": ["Lena plays piano"]}"#,
        ]))
        .build()
        .await
        .unwrap();

    harness.say("5", "/start").await;
    let confirmed = harness.say("5", "Lena, and I'll call you Moss").await;
    assert!(confirmed.contains("Lena"));

    let reply = harness.send("5", "piano recital tonight, so nervous").await;
    assert_eq!(reply.text, "a recital?! you'll be amazing");
    assert_eq!(reply.emotion, "excited");

    let outbox = Arc::new(RecordingOutbox::new());
    let scheduler = Scheduler::new(harness.companion.clone(), outbox.clone(), None).unwrap();
    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(11);
    assert_eq!(scheduler.spontaneity_tick(&mut rng).await, 1);
    assert_eq!(outbox.sent()[0].1, "how did the recital go?? 🎹");

    assert_eq!(scheduler.run_dream_cycle_for(&today()).await.unwrap(), 1);
    let profile = profiles::get_profile(&harness.db, "5").await.unwrap().unwrap();
    assert_eq!(profile.day_summary, "Lena had a piano recital.");

    let context = harness.companion.retrieve_context("5", "piano").await;
    assert!(context.contains("Lena plays piano"));

    // User turn, reply and the follow-up were all logged.
    let logged = turns::recent_turns(&harness.db, "5", 10).await.unwrap();
    assert_eq!(logged.len(), 3);
}

// ---- Commands ----

#[tokio::test]
async fn mode_switch_then_reset_keeps_the_persona() {
    let harness = TestHarness::builder()
        .with_mock_responses(strings(&["yes coach [emotion: determined]"]))
        .with_onboarded_user("5", "Lena", "Moss")
        .build()
        .await
        .unwrap();

    assert_eq!(harness.say("5", "Mode: Fitness Pebble").await, "Switched to: Fitness Pebble");
    harness.say("5", "let's train").await;

    let reply = harness.say("5", "/reset").await;
    assert!(reply.starts_with("I've refreshed my settings"));
    let active = personas::active_mode(&harness.db, "5").await.unwrap();
    assert_eq!(active, "Fitness Pebble");
}

#[tokio::test]
async fn new_conversation_wipes_the_buffer_but_not_the_log() {
    let harness = TestHarness::builder()
        .with_mock_responses(strings(&["sure [emotion: calm]"]))
        .with_onboarded_user("5", "Lena", "Moss")
        .build()
        .await
        .unwrap();

    harness.say("5", "remember this").await;
    assert_eq!(harness.companion.buffers().len("5"), 2);

    assert_eq!(
        harness.say("5", "/new").await,
        "Memory wiped. Starting a fresh conversation. Hi!"
    );
    assert_eq!(harness.companion.buffers().len("5"), 0);
    assert_eq!(turns::recent_turns(&harness.db, "5", 10).await.unwrap().len(), 2);
}
