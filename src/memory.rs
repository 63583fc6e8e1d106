//! Bounded conversation memory.
//!
//! A [`MemoryWindow`] keeps the most recent `capacity` turns of one
//! conversation, oldest first. Appending to a full window evicts the
//! oldest turn. There is no summarisation or retrieval: the window is a
//! plain recency buffer.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Default number of turns a conversation remembers.
pub const DEFAULT_MEMORY_SIZE: usize = 10;

/// One exchange: what the user said and what was answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub input: String,
    pub output: String,
}

impl Turn {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// FIFO window of the last `capacity` turns.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    capacity: usize,
    turns: VecDeque<Turn>,
}

impl MemoryWindow {
    /// Create an empty window. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a turn, evicting the oldest if the window is full.
    pub fn append(&mut self, turn: Turn) {
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Owned copy of the turns, oldest first.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// Drop every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Turns rendered as alternating user/assistant messages.
    pub fn to_messages(&self) -> Vec<Message> {
        turns_to_messages(self.turns.iter())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Default for MemoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_SIZE)
    }
}

/// Flatten turns into `[user, assistant, user, assistant, ...]`.
pub fn turns_to_messages<'a>(turns: impl IntoIterator<Item = &'a Turn>) -> Vec<Message> {
    turns
        .into_iter()
        .flat_map(|turn| {
            [
                Message::user(turn.input.clone()),
                Message::assistant(turn.output.clone()),
            ]
        })
        .collect()
}
