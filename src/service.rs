//! Chat service facade.
//!
//! [`ChatService`] is the inbound surface: it owns the model registry and
//! the chain registry and exposes conversation-level operations keyed by
//! conversation id.
//!
//! ```rust,no_run
//! use parley::{ChatService, Config, Secrets};
//!
//! # async fn run() -> parley::Result<()> {
//! let config = Config::load(None)?;
//! let service = ChatService::builder()
//!     .config(&config)?
//!     .secrets(Secrets::load()?)
//!     .build()?;
//!
//! service.create_or_get_chain(42, "gpt-4", None, Some(7))?;
//! let reply = service.generate(42, "Hello!").await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::chain::{Chain, ChainContext, ChainRegistry, DEFAULT_PROVIDER_TIMEOUT, ReplyStream};
use crate::config::{Config, Secrets};
use crate::memory::DEFAULT_MEMORY_SIZE;
use crate::plugins::{InstalledPlugins, PluginRouter, PluginSource};
use crate::providers::backpressure::{DEFAULT_STREAM_BUFFER, bounded_stream};
use crate::providers::{AdapterFactory, LlmAdapterFactory, RetryConfig};
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::store::{MessageStore, NoopMessageStore};
use crate::types::Message;
use crate::{ParleyError, Result};

/// Conversation-level chat operations.
pub struct ChatService {
    models: Arc<ModelRegistry>,
    chains: Arc<ChainRegistry>,
    stream_buffer: usize,
    sweeper: Option<JoinHandle<()>>,
}

impl ChatService {
    pub fn builder() -> ChatServiceBuilder {
        ChatServiceBuilder::new()
    }

    /// Return the conversation's chain, creating it (or replacing it when
    /// the model changed).
    pub fn create_or_get_chain(
        &self,
        conversation_id: i64,
        model_id: &str,
        system_prompt: Option<&str>,
        user_id: Option<i64>,
    ) -> Result<Arc<Chain>> {
        self.chains
            .get_or_create(conversation_id, model_id, system_prompt, user_id)
    }

    /// Complete reply for a conversation that already has a chain.
    pub async fn generate(&self, conversation_id: i64, message: &str) -> Result<String> {
        self.chain(conversation_id)?.generate(message).await
    }

    /// Streamed reply for a conversation that already has a chain.
    pub async fn stream(
        &self,
        conversation_id: i64,
        message: impl Into<String>,
    ) -> Result<ReplyStream> {
        let events = self.chain(conversation_id)?.stream(message).await?;
        Ok(bounded_stream(events, self.stream_buffer))
    }

    /// Clear a conversation's memory and undo any fallback swap.
    pub async fn reset_chain(&self, conversation_id: i64) -> Result<()> {
        self.chain(conversation_id)?.reset().await
    }

    /// Drop a conversation's chain. Returns whether one existed.
    pub fn invalidate_chain(&self, conversation_id: i64) -> bool {
        self.chains.invalidate(conversation_id)
    }

    /// Remembered turns for a conversation.
    pub async fn history(&self, conversation_id: i64) -> Result<Vec<Message>> {
        Ok(self.chain(conversation_id)?.history().await)
    }

    /// Registered models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.models()
    }

    pub fn model_registry(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn chains(&self) -> &Arc<ChainRegistry> {
        &self.chains
    }

    fn chain(&self, conversation_id: i64) -> Result<Arc<Chain>> {
        self.chains
            .get(conversation_id)
            .ok_or(ParleyError::ConversationNotFound(conversation_id))
    }
}

impl Drop for ChatService {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Builder for [`ChatService`].
pub struct ChatServiceBuilder {
    models: Option<ModelRegistry>,
    factory: Option<Arc<dyn AdapterFactory>>,
    secrets: Option<Secrets>,
    plugins: Option<PluginRouter>,
    store: Arc<dyn MessageStore>,
    retry: RetryConfig,
    provider_timeout: Duration,
    memory_size: usize,
    stream_buffer: usize,
    idle_timeout: Option<Duration>,
    sweep_interval: Duration,
}

impl Default for ChatServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatServiceBuilder {
    pub fn new() -> Self {
        Self {
            models: None,
            factory: None,
            secrets: None,
            plugins: None,
            store: Arc::new(NoopMessageStore),
            retry: RetryConfig::default(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            memory_size: DEFAULT_MEMORY_SIZE,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            idle_timeout: None,
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Apply every setting from a loaded [`Config`].
    pub fn config(mut self, config: &Config) -> Result<Self> {
        config.validate()?;
        self.models = Some(config.model_registry()?);
        self.retry = config.retry.clone().into();
        self.provider_timeout = config.provider_timeout();
        self.memory_size = config.chat.memory_size;
        self.stream_buffer = config.chat.stream_buffer;
        self.idle_timeout = config.chat.idle_timeout_secs.map(Duration::from_secs);
        self.sweep_interval = Duration::from_secs(config.chat.sweep_interval_secs);
        if let Some(dir) = &config.plugins.dir {
            let source = InstalledPlugins::new(dir, Duration::from_secs(config.plugins.cache_ttl_secs));
            self.plugins = Some(
                PluginRouter::new(Arc::new(source))
                    .timeout(Duration::from_secs(config.plugins.timeout_secs))
                    .annotate(config.plugins.annotate),
            );
        }
        Ok(self)
    }

    /// Model table. Defaults to [`ModelRegistry::builtin`].
    pub fn models(mut self, models: ModelRegistry) -> Self {
        self.models = Some(models);
        self
    }

    /// Adapter factory. Defaults to [`LlmAdapterFactory`] over the
    /// configured secrets.
    pub fn adapter_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// API keys for the default adapter factory.
    pub fn secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn plugins(mut self, plugins: PluginRouter) -> Self {
        self.plugins = Some(plugins);
        self
    }

    /// Shorthand for a router over `source` with default settings.
    pub fn plugin_source(mut self, source: Arc<dyn PluginSource>) -> Self {
        self.plugins = Some(PluginRouter::new(source));
        self
    }

    pub fn message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
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

    pub fn stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size;
        self
    }

    /// Evict chains idle longer than `timeout`; `None` keeps them forever.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Build the service.
    ///
    /// The idle sweeper starts only when an idle timeout is set and a tokio
    /// runtime is running.
    pub fn build(self) -> Result<ChatService> {
        let models = Arc::new(self.models.unwrap_or_else(ModelRegistry::builtin));
        if models.is_empty() {
            return Err(ParleyError::NoModelsConfigured);
        }
        if self.provider_timeout.is_zero() {
            return Err(ParleyError::Configuration(
                "provider timeout must be non-zero".to_string(),
            ));
        }

        let factory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(
                LlmAdapterFactory::new(self.secrets.unwrap_or_default())
                    .timeout_secs(self.provider_timeout.as_secs().max(1)),
            ),
        };

        let ctx = ChainContext::new(models.clone(), factory)
            .plugins(Arc::new(self.plugins.unwrap_or_else(PluginRouter::empty)))
            .store(self.store)
            .retry(self.retry)
            .provider_timeout(self.provider_timeout)
            .memory_size(self.memory_size);
        let chains = Arc::new(ChainRegistry::new(Arc::new(ctx)));

        let sweeper = match (self.idle_timeout, tokio::runtime::Handle::try_current()) {
            (Some(max_idle), Ok(_)) => Some(chains.spawn_idle_sweeper(self.sweep_interval, max_idle)),
            _ => None,
        };

        info!(models = models.len(), "chat service ready");
        Ok(ChatService {
            models,
            chains,
            stream_buffer: self.stream_buffer,
            sweeper,
        })
    }
}
