//! llm crate wrapper implementing [`ProviderAdapter`].
//!
//! [`LlmAdapter`] stores backend configuration and builds an llm provider
//! per call, because the llm crate fixes the system prompt and sampling
//! parameters at build time. [`LlmAdapterFactory`] maps registry
//! descriptors onto adapters, pulling API keys from [`Secrets`].

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
use tracing::instrument;

use crate::config::Secrets;
use crate::convert::{llm_backend, to_llm_messages};
use crate::registry::ModelDescriptor;
use crate::types::{AdapterEvent, GenerationParams, Message};
use crate::{ParleyError, Result};

use super::traits::{AdapterFactory, AdapterStream, ProviderAdapter};

/// Default per-request timeout handed to the llm crate, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Wraps llm crate provider configuration to implement [`ProviderAdapter`].
///
/// # Example
///
/// ```ignore
/// use parley::{ModelRegistry, providers::LlmAdapter};
///
/// let registry = ModelRegistry::builtin();
/// let adapter = LlmAdapter::new(&registry.get("gpt-4").unwrap(), Some("sk-..."));
/// ```
pub struct LlmAdapter {
    name: String,
    backend: LLMBackend,
    model: String,
    api_key: Option<String>,
    base_url: Option<String>,
    /// Default timeout in seconds
    timeout_secs: u64,
}

impl LlmAdapter {
    /// Create an adapter for a registry model.
    pub fn new(descriptor: &ModelDescriptor, api_key: Option<impl Into<String>>) -> Self {
        let (backend, base_url) = llm_backend(&descriptor.backend);
        Self {
            name: descriptor.id.clone(),
            backend,
            model: descriptor.backend.model().to_string(),
            api_key: api_key.map(Into::into),
            base_url: base_url.map(str::to_string),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the timeout in seconds.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Build an llm provider for the given system prompt and parameters.
    fn build_provider(
        &self,
        system_prompt: &str,
        params: &GenerationParams,
    ) -> Result<Box<dyn LLMProvider>> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(&self.model)
            .timeout_seconds(self.timeout_secs);
        if let Some(ref key) = self.api_key {
            builder = builder.api_key(key);
        }
        if let Some(ref url) = self.base_url {
            builder = builder.base_url(url.clone());
        }
        if !system_prompt.is_empty() {
            builder = builder.system(system_prompt);
        }

        if let Some(temp) = params.temperature {
            builder = builder.temperature(temp);
        }
        if let Some(max) = params.max_tokens {
            builder = builder.max_tokens(max);
        }
        if let Some(p) = params.top_p {
            builder = builder.top_p(p);
        }

        builder
            .build()
            .map_err(|e| ParleyError::permanent(e.to_string()))
    }
}

#[async_trait]
impl ProviderAdapter for LlmAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "llm.complete", skip_all, fields(model = %self.name))]
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String> {
        let provider = self.build_provider(system_prompt, params)?;
        let response = provider
            .chat(&to_llm_messages(messages))
            .await
            .map_err(ParleyError::from)?;
        Ok(response.text().unwrap_or_default())
    }

    #[instrument(name = "llm.stream", skip_all, fields(model = %self.name))]
    async fn stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<AdapterStream> {
        let provider = self.build_provider(system_prompt, params)?;
        let mut inner = provider
            .chat_stream_with_tools(&to_llm_messages(messages), provider.tools())
            .await
            .map_err(ParleyError::from)?;

        // Keep only non-empty text, and always finish with exactly one Done.
        let events = async_stream::stream! {
            while let Some(chunk) = inner.next().await {
                match chunk {
                    Ok(llm::chat::StreamChunk::Text(text)) => {
                        if !text.is_empty() {
                            yield Ok(AdapterEvent::Delta(text));
                        }
                    }
                    Ok(llm::chat::StreamChunk::Done { .. }) => break,
                    Ok(_) => {}
                    Err(e) => {
                        yield Err(ParleyError::from(e));
                        return;
                    }
                }
            }
            yield Ok(AdapterEvent::Done);
        };

        Ok(Box::pin(events))
    }
}

/// Builds [`LlmAdapter`]s, looking up API keys by backend provider.
#[derive(Debug, Clone, Default)]
pub struct LlmAdapterFactory {
    secrets: Secrets,
    timeout_secs: Option<u64>,
}

impl LlmAdapterFactory {
    pub fn new(secrets: Secrets) -> Self {
        Self {
            secrets,
            timeout_secs: None,
        }
    }

    /// Set the per-request timeout passed to every adapter.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

impl AdapterFactory for LlmAdapterFactory {
    fn build(&self, model: &ModelDescriptor) -> Result<Arc<dyn ProviderAdapter>> {
        let provider = model.backend.provider();
        let api_key = match self.secrets.api_key(provider) {
            Some(key) => Some(key),
            // Ollama doesn't need a key
            None if provider == "ollama" => None,
            None => {
                return Err(ParleyError::permanent(format!(
                    "no API key configured for provider '{provider}' (model '{}')",
                    model.id
                )));
            }
        };
        let adapter = LlmAdapter::new(model, api_key)
            .timeout_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        Ok(Arc::new(adapter))
    }
}
