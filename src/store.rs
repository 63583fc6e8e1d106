//! Message persistence hand-off.
//!
//! The orchestrator does not own conversation storage. After a completed
//! cycle it hands the reply text to a [`MessageStore`]; failures there are
//! logged and never fail the reply.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::Result;

/// Persistence collaborator for assistant replies.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Record the assistant's reply for a conversation.
    async fn record_reply(&self, conversation_id: i64, text: &str) -> Result<()>;
}

/// Discards every reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMessageStore;

#[async_trait]
impl MessageStore for NoopMessageStore {
    async fn record_reply(&self, _conversation_id: i64, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Keeps replies in memory, per conversation, in arrival order.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    replies: Mutex<HashMap<i64, Vec<String>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies recorded for a conversation, oldest first.
    pub fn replies(&self, conversation_id: i64) -> Vec<String> {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn record_reply(&self, conversation_id: i64, text: &str) -> Result<()> {
        let mut map = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(conversation_id)
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}
