// SPDX-FileCopyrightText: 2026 Pebble Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Short-term conversation buffers.
//!
//! One bounded buffer per user, held only in memory. A fresh process starts
//! with no buffers; callers reconstruct recent history from the turn log
//! when [`BufferManager::snapshot`] comes back empty.

use std::collections::VecDeque;

use dashmap::DashMap;
use pebble_config::model::MemoryConfig;
use pebble_core::Turn;

/// Buffer geometry: capacity N, hot window H, trigger T, chunk C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub capacity: usize,
    pub hot_window: usize,
    pub overflow_trigger: usize,
    pub overflow_chunk: usize,
}

impl From<&MemoryConfig> for BufferLimits {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            capacity: config.buffer_capacity,
            hot_window: config.hot_window,
            overflow_trigger: config.overflow_trigger,
            overflow_chunk: config.overflow_chunk,
        }
    }
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self::from(&MemoryConfig::default())
    }
}

/// Ordered turns, oldest first, never longer than `capacity`.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl ConversationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Appends at the tail, silently evicting from the head past capacity.
    pub fn push(&mut self, turn: Turn) {
        if self.capacity == 0 {
            return;
        }
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// Splits the buffer when it is longer than `limits.overflow_trigger`.
    ///
    /// Pure: the buffer is not modified, so repeated calls agree.
    pub fn overflow_check(&self, limits: &BufferLimits) -> OverflowCheck {
        if self.turns.len() <= limits.overflow_trigger {
            return OverflowCheck {
                triggered: false,
                overflow_chunk: Vec::new(),
                retained_tail: self.to_vec(),
            };
        }
        let chunk_len = limits.overflow_chunk.min(self.turns.len());
        let tail_start = self.turns.len().saturating_sub(limits.hot_window);
        OverflowCheck {
            triggered: true,
            overflow_chunk: self.turns.iter().take(chunk_len).cloned().collect(),
            retained_tail: self.turns.iter().skip(tail_start).cloned().collect(),
        }
    }
}

/// Result of [`ConversationBuffer::overflow_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowCheck {
    pub triggered: bool,
    /// Oldest C turns, order preserved. Empty unless triggered.
    pub overflow_chunk: Vec<Turn>,
    /// Most recent H turns when triggered, otherwise the whole buffer.
    pub retained_tail: Vec<Turn>,
}

/// Keyed store of per-user buffers.
///
/// Each operation holds the user's map shard for its whole duration, so
/// mutations of one user's buffer never interleave. Different users only
/// contend when they hash to the same shard.
pub struct BufferManager {
    buffers: DashMap<String, ConversationBuffer>,
    limits: BufferLimits,
}

impl BufferManager {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            buffers: DashMap::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &BufferLimits {
        &self.limits
    }

    /// Appends a turn, creating the buffer on first use.
    pub fn append(&self, user_id: &str, turn: Turn) {
        self.buffers
            .entry(user_id.to_string())
            .or_insert_with(|| ConversationBuffer::new(self.limits.capacity))
            .push(turn);
    }

    /// Current contents, oldest first. Empty if the user has no buffer yet.
    pub fn snapshot(&self, user_id: &str) -> Vec<Turn> {
        self.buffers
            .get(user_id)
            .map(|b| b.to_vec())
            .unwrap_or_default()
    }

    pub fn len(&self, user_id: &str) -> usize {
        self.buffers.get(user_id).map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the user has a buffer at all, even an empty one.
    pub fn contains(&self, user_id: &str) -> bool {
        self.buffers.contains_key(user_id)
    }

    /// See [`ConversationBuffer::overflow_check`]. Does not modify the buffer.
    pub fn overflow_check(&self, user_id: &str) -> OverflowCheck {
        match self.buffers.get(user_id) {
            Some(buffer) => buffer.overflow_check(&self.limits),
            None => OverflowCheck {
                triggered: false,
                overflow_chunk: Vec::new(),
                retained_tail: Vec::new(),
            },
        }
    }

    /// Checks for overflow and, if triggered, replaces the buffer with its
    /// retained tail in the same critical section.
    ///
    /// Returns the chunk to consolidate. Two concurrent callers can never
    /// both receive the same chunk.
    pub fn take_overflow(&self, user_id: &str) -> Option<Vec<Turn>> {
        let mut buffer = self.buffers.get_mut(user_id)?;
        let check = buffer.overflow_check(&self.limits);
        if !check.triggered {
            return None;
        }
        let mut fresh = ConversationBuffer::new(self.limits.capacity);
        for turn in check.retained_tail {
            fresh.push(turn);
        }
        *buffer = fresh;
        crate::metrics::record_overflow();
        Some(check.overflow_chunk)
    }

    /// Empties the buffer and returns what it held.
    pub fn clear(&self, user_id: &str) -> Vec<Turn> {
        self.buffers
            .remove(user_id)
            .map(|(_, b)| b.to_vec())
            .unwrap_or_default()
    }

    /// Replaces the buffer with `turns` (the newest `capacity` of them survive).
    pub fn seed(&self, user_id: &str, turns: Vec<Turn>) {
        let mut buffer = ConversationBuffer::new(self.limits.capacity);
        for turn in turns {
            buffer.push(turn);
        }
        self.buffers.insert(user_id.to_string(), buffer);
    }

    /// Users that currently hold a buffer.
    pub fn active_users(&self) -> Vec<String> {
        self.buffers.iter().map(|e| e.key().clone()).collect()
    }
}
