//! Conversions between parley types and llm crate types.
//!
//! This module is internal and handles the translation layer between
//! our stable public types and the llm crate's internal types.

use llm::builder::LLMBackend;
use llm::chat::ChatMessage as LlmMessage;

use crate::registry::Backend;
use crate::types::{Message, Role};

/// Convert our messages to llm crate messages.
///
/// System messages are dropped: the llm crate takes the system prompt via
/// its builder.
pub fn to_llm_messages(messages: &[Message]) -> Vec<LlmMessage> {
    messages
        .iter()
        .filter_map(|msg| match msg.role {
            Role::System => None,
            Role::User => Some(LlmMessage::user().content(msg.content.clone()).build()),
            Role::Assistant => Some(
                LlmMessage::assistant()
                    .content(msg.content.clone())
                    .build(),
            ),
        })
        .collect()
}

/// llm crate backend and base URL override for a registry backend.
pub fn llm_backend(backend: &Backend) -> (LLMBackend, Option<&str>) {
    match backend {
        Backend::OpenAi { .. } => (LLMBackend::OpenAI, None),
        Backend::Google { .. } => (LLMBackend::Google, None),
        // NVIDIA endpoints speak the OpenAI wire format.
        Backend::Nvidia { base_url, .. } => (LLMBackend::OpenAI, Some(base_url)),
        Backend::Ollama { base_url, .. } => (LLMBackend::Ollama, Some(base_url)),
        Backend::OpenRouter { .. } => (LLMBackend::OpenRouter, None),
        Backend::Anthropic { .. } => (LLMBackend::Anthropic, None),
    }
}
