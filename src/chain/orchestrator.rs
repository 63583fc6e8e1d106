//! Per-conversation orchestrator.
//!
//! One [`Orchestrator`] drives one conversation's reply cycles:
//!
//! ```text
//! plugins ──accepted──▶ Completed
//!    │ none
//!    ▼
//! current model ──ok──▶ Completed
//!    │ transient: retry with backoff (Retrying)
//!    │ exhausted / permanent
//!    ▼
//! fallback model (one hop) ──ok──▶ Completed
//!    │
//!    ▼
//! Failed (AllProvidersExhausted)
//! ```
//!
//! A swapped-in fallback stays the active model until [`Orchestrator::reset`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, instrument, warn};

use crate::memory::{MemoryWindow, Turn};
use crate::providers::retry::with_retry;
use crate::providers::{AdapterStream, ProviderAdapter};
use crate::registry::ModelDescriptor;
use crate::telemetry;
use crate::types::{AdapterEvent, GenerationParams, Message, ReplyEvent};
use crate::{ParleyError, Result};

use super::{ChainContext, ReplyStream};

/// Where a chain is in its reply cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainState {
    /// Created or reset, or the last cycle was cancelled.
    #[default]
    Idle,
    /// A cycle is in progress.
    Generating,
    /// Waiting out a backoff delay before retrying the provider.
    Retrying,
    /// The last cycle produced a reply.
    Completed,
    /// The last cycle exhausted every provider.
    Failed,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Chain state shared with the [`Chain`](super::Chain) handle, readable
/// while a cycle holds the chain lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct StateCell(Arc<Mutex<ChainState>>);

impl StateCell {
    pub(crate) fn get(&self) -> ChainState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: ChainState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Enter `Generating` for one cycle. If the cycle is dropped before it
    /// completes or fails, the guard puts the chain back to `Idle`.
    fn begin_cycle(&self) -> CycleGuard {
        self.set(ChainState::Generating);
        CycleGuard(self.clone())
    }
}

struct CycleGuard(StateCell);

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let mut state = self.0.0.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, ChainState::Generating | ChainState::Retrying) {
            *state = ChainState::Idle;
        }
    }
}

/// Stateful driver for one conversation.
pub struct Orchestrator {
    conversation_id: i64,
    /// Model id the chain was created for, as requested.
    requested_model: String,
    current: Arc<ModelDescriptor>,
    substituted: bool,
    /// Built on first use; dropped on fallback swap and reset.
    adapter: Option<Arc<dyn ProviderAdapter>>,
    memory: MemoryWindow,
    /// Explicit prompt; `None` uses the current model's default prompt.
    system_prompt: Option<String>,
    user_id: Option<i64>,
    state: StateCell,
    ctx: Arc<ChainContext>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("conversation_id", &self.conversation_id)
            .field("requested_model", &self.requested_model)
            .field("current_model", &self.current.id)
            .field("state", &self.state.get())
            .field("memory_len", &self.memory.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator, resolving `model_id` through the registry.
    ///
    /// Unknown or empty ids are substituted with the default model; see
    /// [`Orchestrator::substituted`].
    pub fn new(
        ctx: Arc<ChainContext>,
        conversation_id: i64,
        model_id: &str,
        system_prompt: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<Self> {
        let resolved = ctx.registry.resolve(model_id)?;
        Ok(Self {
            conversation_id,
            requested_model: model_id.to_string(),
            current: resolved.descriptor,
            substituted: resolved.substituted,
            adapter: None,
            memory: MemoryWindow::new(ctx.memory_size),
            system_prompt: system_prompt
                .filter(|p| !p.trim().is_empty())
                .map(str::to_string),
            user_id,
            state: StateCell::default(),
            ctx,
        })
    }

    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }

    pub fn requested_model(&self) -> &str {
        &self.requested_model
    }

    /// Registry id of the model currently answering.
    pub fn current_model(&self) -> &str {
        &self.current.id
    }

    /// Whether the requested model was unknown and the default was used.
    pub fn substituted(&self) -> bool {
        self.substituted
    }

    pub fn state(&self) -> ChainState {
        self.state.get()
    }

    pub(crate) fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn memory(&self) -> &MemoryWindow {
        &self.memory
    }

    pub fn system_prompt(&self) -> String {
        match &self.system_prompt {
            Some(prompt) => prompt.clone(),
            None => self.current.default_system_prompt(),
        }
    }

    /// Remembered turns as `{role, content}` messages, oldest first.
    pub fn history(&self) -> Vec<Message> {
        self.memory.to_messages()
    }

    /// Clear memory and drop the adapter. The requested model is resolved
    /// again, so a fallback swap is undone.
    pub fn reset(&mut self) -> Result<()> {
        let resolved = self.ctx.registry.resolve(&self.requested_model)?;
        self.current = resolved.descriptor;
        self.substituted = resolved.substituted;
        self.adapter = None;
        self.memory.clear();
        self.state.set(ChainState::Idle);
        info!(
            conversation_id = self.conversation_id,
            model = %self.current.id,
            "chain reset"
        );
        Ok(())
    }

    /// Release held resources. Used when the chain is disposed.
    pub(crate) fn release(&mut self) {
        self.adapter = None;
        self.memory.clear();
    }

    /// Produce a complete reply to `message`.
    #[instrument(
        name = "chain.generate",
        skip_all,
        fields(conversation_id = self.conversation_id, model = %self.current.id)
    )]
    pub async fn generate(&mut self, message: &str) -> Result<String> {
        let started = Instant::now();
        let _cycle = self.state.begin_cycle();

        let history = self.memory.snapshot();
        if let Some(reply) = self
            .ctx
            .plugins
            .try_plugins(message, &history, &self.current.id, self.user_id)
            .await
        {
            self.finish(message, &reply.text).await;
            record_outcome(&self.current.id, "generate", "ok", started);
            return Ok(reply.text);
        }

        let mut messages = self.memory.to_messages();
        messages.push(Message::user(message));

        let mut tried = Vec::new();
        loop {
            tried.push(self.current.id.clone());
            let err = match self.complete_once(&messages).await {
                Ok(text) => {
                    self.finish(message, &text).await;
                    record_outcome(&self.current.id, "generate", "ok", started);
                    return Ok(text);
                }
                Err(e) => e,
            };

            match self.next_fallback(&tried) {
                Some(next) => self.swap_to(next, &err),
                None => {
                    self.state.set(ChainState::Failed);
                    record_outcome(&self.current.id, "generate", "error", started);
                    warn!(tried = ?tried, error = %err, "all providers exhausted");
                    return Err(ParleyError::AllProvidersExhausted {
                        tried,
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    /// Turn a locked orchestrator into a reply stream.
    ///
    /// The guard is held until the stream finishes or is dropped, so
    /// cycles on one conversation never interleave.
    pub fn into_reply_stream(mut guard: OwnedMutexGuard<Self>, message: String) -> ReplyStream {
        let events = async_stream::stream! {
            let orch = &mut *guard;
            let started = Instant::now();
            let _cycle = orch.state.begin_cycle();

            let history = orch.memory.snapshot();
            if let Some(reply) = orch
                .ctx
                .plugins
                .try_plugins(&message, &history, &orch.current.id, orch.user_id)
                .await
            {
                orch.finish(&message, &reply.text).await;
                record_outcome(&orch.current.id, "stream", "ok", started);
                yield Ok(ReplyEvent::Delta(reply.text));
                yield Ok(ReplyEvent::Done { model: reply.plugin });
                return;
            }

            let mut messages = orch.memory.to_messages();
            messages.push(Message::user(message.as_str()));
            let deadline = orch.ctx.provider_timeout;

            let mut tried = Vec::new();
            loop {
                let model_id = orch.current.id.clone();
                tried.push(model_id.clone());

                let err = match orch.open_stream_once(&messages).await {
                    Err(e) => e,
                    Ok(mut events) => {
                        let mut text = String::new();
                        let mut failure = None;
                        loop {
                            match tokio::time::timeout(deadline, events.next()).await {
                                Err(_) => {
                                    failure = Some(ParleyError::Timeout(deadline));
                                    break;
                                }
                                Ok(Some(Ok(AdapterEvent::Delta(delta)))) => {
                                    text.push_str(&delta);
                                    yield Ok(ReplyEvent::Delta(delta));
                                }
                                Ok(Some(Ok(AdapterEvent::Done))) | Ok(None) => break,
                                Ok(Some(Err(e))) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        match failure {
                            None => {
                                orch.finish(&message, &text).await;
                                record_outcome(&model_id, "stream", "ok", started);
                                yield Ok(ReplyEvent::Done { model: model_id });
                                return;
                            }
                            Some(e) => e,
                        }
                    }
                };

                match orch.next_fallback(&tried) {
                    Some(next) => {
                        let to_model = next.id.clone();
                        orch.swap_to(next, &err);
                        yield Ok(ReplyEvent::Restart { from_model: model_id, to_model });
                    }
                    None => {
                        orch.state.set(ChainState::Failed);
                        record_outcome(&model_id, "stream", "error", started);
                        warn!(
                            conversation_id = orch.conversation_id,
                            tried = ?tried,
                            error = %err,
                            "all providers exhausted"
                        );
                        yield Err(ParleyError::AllProvidersExhausted {
                            tried,
                            source: Box::new(err),
                        });
                        return;
                    }
                }
            }
        };
        Box::pin(events)
    }

    /// One model's `complete`, with retries and the provider deadline.
    async fn complete_once(&mut self, messages: &[Message]) -> Result<String> {
        let adapter = self.adapter()?;
        let system_prompt = self.system_prompt();
        let params: GenerationParams = self.current.params;
        let deadline = self.ctx.provider_timeout;
        let model_id = self.current.id.clone();

        let adapter = &adapter;
        let system_prompt = system_prompt.as_str();
        let params = &params;
        let state = self.state.clone();
        with_retry(
            &self.ctx.retry,
            &model_id,
            "generate",
            |_, _| state.set(ChainState::Retrying),
            move || async move {
                tokio::time::timeout(deadline, adapter.complete(system_prompt, messages, params))
                    .await
                    .map_err(|_| ParleyError::Timeout(deadline))?
            },
        )
        .await
    }

    /// Open one model's stream, with retries and the provider deadline.
    async fn open_stream_once(&mut self, messages: &[Message]) -> Result<AdapterStream> {
        let adapter = self.adapter()?;
        let system_prompt = self.system_prompt();
        let params: GenerationParams = self.current.params;
        let deadline = self.ctx.provider_timeout;
        let model_id = self.current.id.clone();

        let adapter = &adapter;
        let system_prompt = system_prompt.as_str();
        let params = &params;
        let state = self.state.clone();
        with_retry(
            &self.ctx.retry,
            &model_id,
            "stream",
            |_, _| state.set(ChainState::Retrying),
            move || async move {
                tokio::time::timeout(deadline, adapter.stream(system_prompt, messages, params))
                    .await
                    .map_err(|_| ParleyError::Timeout(deadline))?
            },
        )
        .await
    }

    /// The current adapter, building it on first use.
    fn adapter(&mut self) -> Result<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let adapter = self.ctx.factory.build(&self.current)?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    /// Fallback for the current model, if this cycle may still take one.
    fn next_fallback(&self, tried: &[String]) -> Option<Arc<ModelDescriptor>> {
        if tried.len() > 1 {
            return None;
        }
        let next = self.ctx.registry.fallback_of(&self.current.id)?;
        if tried.contains(&next.id) {
            warn!(model = %self.current.id, fallback = %next.id, "fallback cycle, not swapping");
            return None;
        }
        Some(next)
    }

    fn swap_to(&mut self, next: Arc<ModelDescriptor>, cause: &ParleyError) {
        metrics::counter!(telemetry::FALLBACKS_TOTAL,
            "from" => self.current.id.clone(),
            "to" => next.id.clone(),
        )
        .increment(1);
        warn!(
            conversation_id = self.conversation_id,
            from = %self.current.id,
            to = %next.id,
            error = %cause,
            "switching to fallback model"
        );
        self.current = next;
        self.adapter = None;
        self.state.set(ChainState::Generating);
    }

    /// Record a successful cycle in memory and hand it to the store.
    async fn finish(&mut self, input: &str, output: &str) {
        self.memory.append(Turn::new(input, output));
        self.state.set(ChainState::Completed);
        if let Err(e) = self
            .ctx
            .store
            .record_reply(self.conversation_id, output)
            .await
        {
            warn!(
                conversation_id = self.conversation_id,
                error = %e,
                "failed to persist reply"
            );
        }
    }
}

fn record_outcome(model: &str, operation: &'static str, status: &'static str, started: Instant) {
    metrics::counter!(telemetry::REQUESTS_TOTAL,
        "model" => model.to_owned(),
        "operation" => operation,
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
        "model" => model.to_owned(),
        "operation" => operation,
    )
    .record(started.elapsed().as_secs_f64());
}
