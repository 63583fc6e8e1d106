//! Conversation chains.
//!
//! A [`Chain`] is the shared handle to one conversation's [`Orchestrator`].
//! The orchestrator sits behind a FIFO-fair `tokio::sync::Mutex` that is
//! held for a whole reply cycle, so requests on one conversation run one at
//! a time in arrival order while different conversations run in parallel.
//! Chains are created and disposed by the [`ChainRegistry`].

mod orchestrator;
pub mod registry;

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::Stream;
use tokio::time::Instant;

use crate::memory::DEFAULT_MEMORY_SIZE;
use crate::plugins::PluginRouter;
use crate::providers::{AdapterFactory, RetryConfig};
use crate::registry::ModelRegistry;
use crate::store::{MessageStore, NoopMessageStore};
use crate::types::{Message, ReplyEvent};
use crate::{ParleyError, Result};

use orchestrator::StateCell;

pub use orchestrator::{ChainState, Orchestrator};
pub use registry::ChainRegistry;

/// Stream of reply events. Ends after `Done` or an `Err` item.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<ReplyEvent>> + Send>>;

/// Default deadline for a single provider call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Collaborators and policy shared by every chain.
pub struct ChainContext {
    pub registry: Arc<ModelRegistry>,
    pub factory: Arc<dyn AdapterFactory>,
    pub plugins: Arc<PluginRouter>,
    pub store: Arc<dyn MessageStore>,
    pub retry: RetryConfig,
    pub provider_timeout: Duration,
    pub memory_size: usize,
}

impl ChainContext {
    /// Context with no plugins, no message store and default policy.
    pub fn new(registry: Arc<ModelRegistry>, factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            registry,
            factory,
            plugins: Arc::new(PluginRouter::empty()),
            store: Arc::new(NoopMessageStore),
            retry: RetryConfig::default(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            memory_size: DEFAULT_MEMORY_SIZE,
        }
    }

    pub fn plugins(mut self, plugins: Arc<PluginRouter>) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = store;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn memory_size(mut self, size: usize) -> Self {
        self.memory_size = size;
        self
    }
}

/// Shared handle to one conversation's orchestrator.
#[derive(Debug)]
pub struct Chain {
    conversation_id: i64,
    requested_model: String,
    substituted: bool,
    state: StateCell,
    inner: Arc<tokio::sync::Mutex<Orchestrator>>,
    disposed: AtomicBool,
    last_used: Mutex<Instant>,
}

impl Chain {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            conversation_id: orchestrator.conversation_id(),
            requested_model: orchestrator.requested_model().to_string(),
            substituted: orchestrator.substituted(),
            state: orchestrator.state_cell(),
            inner: Arc::new(tokio::sync::Mutex::new(orchestrator)),
            disposed: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }

    /// Model id the chain was created for.
    pub fn requested_model(&self) -> &str {
        &self.requested_model
    }

    /// Whether the requested model was unknown or empty and the registry's
    /// default model was used instead.
    pub fn substituted(&self) -> bool {
        self.substituted
    }

    /// Run one complete reply cycle.
    pub async fn generate(&self, message: &str) -> Result<String> {
        self.ensure_live()?;
        let mut orchestrator = self.inner.lock().await;
        self.ensure_live()?;
        self.touch();
        orchestrator.generate(message).await
    }

    /// Start a streamed reply cycle.
    ///
    /// Waits for any in-flight cycle on this conversation, then returns a
    /// stream that owns the chain until it ends or is dropped.
    pub async fn stream(&self, message: impl Into<String>) -> Result<ReplyStream> {
        self.ensure_live()?;
        let guard = self.inner.clone().lock_owned().await;
        self.ensure_live()?;
        self.touch();
        Ok(Orchestrator::into_reply_stream(guard, message.into()))
    }

    /// Clear memory and undo any fallback swap.
    pub async fn reset(&self) -> Result<()> {
        self.ensure_live()?;
        let mut orchestrator = self.inner.lock().await;
        self.ensure_live()?;
        self.touch();
        orchestrator.reset()
    }

    pub async fn history(&self) -> Vec<Message> {
        self.inner.lock().await.history()
    }

    /// Current cycle state. Does not wait for an in-flight cycle.
    pub fn state(&self) -> ChainState {
        self.state.get()
    }

    /// Registry id of the model currently answering.
    pub async fn current_model(&self) -> String {
        self.inner.lock().await.current_model().to_string()
    }

    /// Whether a reply cycle currently holds the chain.
    pub fn is_busy(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Mark the chain dead. Later calls fail with `ChainDisposed`; an
    /// in-flight cycle runs to completion.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        if let Ok(mut orchestrator) = self.inner.try_lock() {
            orchestrator.release();
        }
    }

    /// Dispose the chain if it has been idle longer than `max_idle` and no
    /// cycle holds or is waiting for it. The chain lock is held while the
    /// flag is set, so a queued cycle cannot slip in.
    pub(crate) fn dispose_if_idle(&self, max_idle: Duration) -> bool {
        if self.idle_for() <= max_idle {
            return false;
        }
        let Ok(mut orchestrator) = self.inner.try_lock() else {
            return false;
        };
        self.disposed.store(true, Ordering::Release);
        orchestrator.release();
        true
    }

    /// Time since the chain was last used.
    pub fn idle_for(&self) -> Duration {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(ParleyError::ChainDisposed(self.conversation_id))
        } else {
            Ok(())
        }
    }
}
