//! Provider adapter traits.
//!
//! A [`ProviderAdapter`] wraps one backend model endpoint behind a uniform
//! surface: one-shot completion and incremental streaming. Adapters hold
//! no per-call state, so a single adapter may serve many calls.
//!
//! An [`AdapterFactory`] turns a [`ModelDescriptor`] into an adapter. The
//! orchestrator asks the factory whenever it needs an adapter for a model
//! (first use, after a reset, on a fallback swap), which keeps backend
//! construction and credentials out of the chain.
//!
//! # Error contract
//!
//! Adapters report failures as [`ParleyError::Provider`] with a
//! [`ProviderErrorKind`](crate::ProviderErrorKind):
//! - `Transient` - the orchestrator retries with backoff
//! - `Permanent` - the orchestrator skips straight to the fallback model
//!
//! [`ParleyError::Provider`]: crate::ParleyError::Provider

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;

use crate::Result;
use crate::registry::ModelDescriptor;
use crate::types::{AdapterEvent, GenerationParams, Message};

/// Boxed adapter stream. Dropping it releases the underlying connection.
pub type AdapterStream = Pin<Box<dyn Stream<Item = Result<AdapterEvent>> + Send>>;

/// One backend model behind a uniform completion surface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Adapter name for logging/debugging (usually the registry model id).
    fn name(&self) -> &str;

    /// Complete the conversation and return the full reply text.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<String>;

    /// Stream the reply as non-empty deltas terminated by
    /// [`AdapterEvent::Done`].
    async fn stream(
        &self,
        system_prompt: &str,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<AdapterStream>;
}

/// Builds adapters for registry models.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, model: &ModelDescriptor) -> Result<Arc<dyn ProviderAdapter>>;
}
