//! Shared mock adapters for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;

use parley::providers::{AdapterFactory, AdapterStream, ProviderAdapter};
use parley::{
    AdapterEvent, Backend, ChainContext, GenerationParams, Message, ModelDescriptor,
    ModelRegistry, ParleyError, Result, RetryConfig,
};

// ============================================================================
// Mock adapter
// ============================================================================

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answer with this text (streamed word by word).
    Reply(String),
    /// Fail transiently `failures` times, then answer.
    Flaky { failures: u32, reply: String },
    /// Always fail transiently.
    Transient,
    /// Always fail permanently.
    Permanent,
    /// Stream these deltas, then fail transiently. `complete` fails.
    BreaksMidStream(Vec<String>),
    /// Stream these deltas, then never finish.
    StallsAfter(Vec<String>),
    /// Never answer.
    Hang,
    /// Sleep, then answer with the last user message echoed back.
    SlowEcho(Duration),
}

pub struct MockAdapter {
    name: String,
    behavior: Behavior,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<Vec<Message>>>,
    system_prompts: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            system_prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn reply(name: &str, text: &str) -> Arc<Self> {
        Self::new(name, Behavior::Reply(text.to_string()))
    }

    /// Number of `complete`/`stream` calls received.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Messages received, one entry per call.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().unwrap().clone()
    }

    fn record(&self, system_prompt: &str, messages: &[Message]) -> u32 {
        self.seen.lock().unwrap().push(messages.to_vec());
        self.system_prompts
            .lock()
            .unwrap()
            .push(system_prompt.to_string());
        self.calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn answer(&self, call: u32, messages: &[Message]) -> Result<String> {
        match &self.behavior {
            Behavior::Reply(text) => Ok(text.clone()),
            Behavior::Flaky { failures, reply } => {
                if call <= *failures {
                    Err(ParleyError::transient("503 service unavailable"))
                } else {
                    Ok(reply.clone())
                }
            }
            Behavior::Transient | Behavior::BreaksMidStream(_) | Behavior::StallsAfter(_) => {
                Err(ParleyError::transient("429 rate limited"))
            }
            Behavior::Permanent => Err(ParleyError::permanent("401 unauthorized")),
            Behavior::Hang => std::future::pending().await,
            Behavior::SlowEcho(delay) => {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(*delay).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
                Ok(format!("echo: {last}"))
            }
        }
    }
}

fn words(text: &str) -> Vec<Result<AdapterEvent>> {
    text.split_inclusive(' ')
        .map(|w| Ok(AdapterEvent::Delta(w.to_string())))
        .collect()
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<String> {
        let call = self.record(system_prompt, messages);
        self.answer(call, messages).await
    }

    async fn stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        _params: &GenerationParams,
    ) -> Result<AdapterStream> {
        let call = self.record(system_prompt, messages);
        match &self.behavior {
            Behavior::BreaksMidStream(prefix) => {
                let mut items: Vec<Result<AdapterEvent>> = prefix
                    .iter()
                    .map(|d| Ok(AdapterEvent::Delta(d.clone())))
                    .collect();
                items.push(Err(ParleyError::transient("connection reset")));
                Ok(Box::pin(stream::iter(items)))
            }
            Behavior::StallsAfter(prefix) => {
                let items: Vec<Result<AdapterEvent>> = prefix
                    .iter()
                    .map(|d| Ok(AdapterEvent::Delta(d.clone())))
                    .collect();
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
            _ => {
                let text = self.answer(call, messages).await?;
                let mut items = words(&text);
                items.push(Ok(AdapterEvent::Done));
                Ok(Box::pin(stream::iter(items)))
            }
        }
    }
}

// ============================================================================
// Mock factory
// ============================================================================

/// Hands out pre-built adapters by registry model id.
#[derive(Default)]
pub struct MockFactory {
    adapters: HashMap<String, Arc<MockAdapter>>,
    builds: AtomicU32,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, model_id: &str, adapter: Arc<MockAdapter>) -> Self {
        self.adapters.insert(model_id.to_string(), adapter);
        self
    }

    /// Number of adapters built.
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for MockFactory {
    fn build(&self, model: &ModelDescriptor) -> Result<Arc<dyn ProviderAdapter>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match self.adapters.get(&model.id) {
            Some(adapter) => Ok(adapter.clone()),
            None => Err(ParleyError::permanent(format!(
                "no adapter for '{}'",
                model.id
            ))),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn model(id: &str, fallback: Option<&str>) -> ModelDescriptor {
    let descriptor = ModelDescriptor::new(
        id,
        id.to_uppercase(),
        "Test",
        Backend::OpenAi {
            model: id.to_string(),
        },
    );
    match fallback {
        Some(f) => descriptor.with_fallback(f),
        None => descriptor,
    }
}

/// Registry from `(id, fallback)` pairs.
pub fn registry(models: &[(&str, Option<&str>)]) -> Arc<ModelRegistry> {
    Arc::new(
        ModelRegistry::new(models.iter().map(|(id, fb)| model(id, *fb)).collect())
            .expect("valid test registry"),
    )
}

/// Millisecond backoff so retry tests run fast on real time.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(2))
}

pub fn context(registry: Arc<ModelRegistry>, factory: Arc<MockFactory>) -> ChainContext {
    ChainContext::new(registry, factory)
        .retry(fast_retry())
        .provider_timeout(Duration::from_secs(5))
}
