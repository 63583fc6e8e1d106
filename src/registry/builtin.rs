//! Models available without any configuration.

use super::{Backend, ModelDescriptor, default_nvidia_url};
use crate::types::GenerationParams;

/// Built-in model table. The first entry is the default model.
pub(super) fn models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "gemini-pro",
            "Gemini Pro",
            "Google",
            Backend::Google {
                model: "gemini-pro".to_string(),
            },
        )
        .with_params(GenerationParams::default().max_tokens(2048)),
        ModelDescriptor::new(
            "gpt-4",
            "GPT-4o Mini",
            "OpenAI",
            Backend::OpenAi {
                model: "gpt-4o-mini".to_string(),
            },
        ),
        ModelDescriptor::new(
            "deepseek-ai/deepseek-r1",
            "Deepseek",
            "NVIDIA",
            Backend::Nvidia {
                model: "deepseek-ai/deepseek-r1".to_string(),
                base_url: default_nvidia_url(),
            },
        )
        .with_description(
            "Deepseek R1 is an advanced large language model developed by Deepseek \
             and available through NVIDIA AI Endpoints.",
        ),
    ]
}
