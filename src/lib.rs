//! Parley - per-conversation chat orchestration over LLM providers
//!
//! Each conversation gets a live chain bound to one model and a bounded
//! memory window. A reply cycle offers the message to registered HTTP
//! plugins first, then calls the model with retry on transient failures
//! and a single hop to the model's fallback when it is exhausted. Replies
//! are available complete or as an incremental stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use parley::{ChatService, ReplyEvent, Secrets};
//!
//! #[tokio::main]
//! async fn main() -> parley::Result<()> {
//!     let service = ChatService::builder()
//!         .secrets(Secrets::load()?)
//!         .build()?;
//!
//!     service.create_or_get_chain(1, "gpt-4", None, None)?;
//!     let mut reply = service.stream(1, "What is the capital of France?").await?;
//!     while let Some(event) = reply.next().await {
//!         match event? {
//!             ReplyEvent::Delta(text) => print!("{text}"),
//!             ReplyEvent::Restart { to_model, .. } => println!("\n[retrying on {to_model}]"),
//!             ReplyEvent::Done { .. } => println!(),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod config;
mod convert;
pub mod error;
pub mod memory;
pub mod plugins;
pub mod providers;
pub mod registry;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use chain::{Chain, ChainContext, ChainRegistry, ChainState, Orchestrator, ReplyStream};
pub use config::{Config, Secrets};
pub use error::{ParleyError, ProviderErrorKind, Result};
pub use memory::{MemoryWindow, Turn};
pub use plugins::{
    InstalledPlugins, PluginDescriptor, PluginReply, PluginRouter, PluginSource, StaticPlugins,
};
pub use providers::{AdapterFactory, AdapterStream, ProviderAdapter, RetryConfig};
pub use registry::{Backend, ModelDescriptor, ModelRegistry, Resolved};
pub use service::{ChatService, ChatServiceBuilder};
pub use store::{InMemoryMessageStore, MessageStore, NoopMessageStore};
pub use types::{AdapterEvent, GenerationParams, Message, ReplyEvent, Role};
pub use version::{PKG_VERSION, version_string};
