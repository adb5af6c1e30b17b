//! Session context: one conversation's identity and short-term buffer.
//!
//! An explicit context object passed into every orchestrator call, so
//! several sessions can run concurrently without shared mutable globals.
//! The buffer is FIFO over the N most recent turns, kept verbatim for
//! prompt context; long-term recall lives in the memory store.

use std::collections::VecDeque;

use uuid::Uuid;

use vox_core::types::{Timestamp, Turn};

/// Per-session conversation state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub started_at: Timestamp,
    capacity: usize,
    buffer: VecDeque<Turn>,
}

impl SessionContext {
    /// Start a fresh session keeping at most `capacity` recent turns.
    pub fn new(capacity: usize) -> Self {
        Self::with_id(Uuid::new_v4(), capacity)
    }

    /// Resume or name a session explicitly.
    pub fn with_id(session_id: Uuid, capacity: usize) -> Self {
        Self {
            session_id,
            started_at: Timestamp::now(),
            capacity,
            buffer: VecDeque::with_capacity(capacity),
        }
    }

    /// Record a turn in the short-term buffer, evicting the oldest once
    /// the buffer holds `capacity` turns.
    pub fn push(&mut self, turn: Turn) {
        if self.capacity == 0 {
            return;
        }
        self.buffer.push_back(turn);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// The buffered turns in chronological order.
    pub fn recent_turns(&self) -> Vec<Turn> {
        self.buffer.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// =============================================================================
// Tests
// =============================================================================
