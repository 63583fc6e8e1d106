//! Provider adapters and the retry policy that drives them.
//!
//! Chat backends are reached through the llm crate ([`LlmAdapter`]); tests
//! and embedders can plug in their own [`ProviderAdapter`] via an
//! [`AdapterFactory`].

pub mod backpressure;
pub mod llm_chat;
pub mod retry;
pub mod traits;

pub use llm_chat::{LlmAdapter, LlmAdapterFactory};
pub use retry::RetryConfig;
pub use traits::{AdapterFactory, AdapterStream, ProviderAdapter};
