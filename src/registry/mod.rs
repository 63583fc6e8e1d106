//! Model registry - static model descriptors with one-hop fallback links.
//!
//! The registry maps a model id (what conversations store) to a
//! [`ModelDescriptor`]: display metadata, the concrete [`Backend`] that
//! serves it, and an optional fallback model id. It is built once at
//! startup and read-only afterwards.
//!
//! # Resolution
//!
//! [`ModelRegistry::resolve`] never fails for an unknown id while at least
//! one model is registered: it substitutes the first-registered model and
//! sets [`Resolved::substituted`] so the caller can surface the swap.
//!
//! # Fallback graph
//!
//! Fallback links are validated when the registry is built. Every link must
//! name a registered model and no chain of links may return to its start.
//! [`ModelRegistry::fallback_of`] follows exactly one link; walking further
//! is the orchestrator's job.

mod builtin;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::GenerationParams;
use crate::{ParleyError, Result};

/// Concrete backend serving a model, with its per-backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    #[serde(rename = "openai")]
    OpenAi { model: String },
    Google { model: String },
    /// NVIDIA AI endpoints (OpenAI-compatible API).
    Nvidia {
        model: String,
        #[serde(default = "default_nvidia_url")]
        base_url: String,
    },
    Ollama {
        model: String,
        #[serde(default = "default_ollama_url")]
        base_url: String,
    },
    OpenRouter { model: String },
    Anthropic { model: String },
}

pub(crate) fn default_nvidia_url() -> String {
    "https://integrate.api.nvidia.com/v1".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

impl Backend {
    /// Model name as the backend API knows it.
    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi { model }
            | Self::Google { model }
            | Self::Nvidia { model, .. }
            | Self::Ollama { model, .. }
            | Self::OpenRouter { model }
            | Self::Anthropic { model } => model,
        }
    }

    /// Provider key used for secrets lookup and logging.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Google { .. } => "google",
            Self::Nvidia { .. } => "nvidia",
            Self::Ollama { .. } => "ollama",
            Self::OpenRouter { .. } => "openrouter",
            Self::Anthropic { .. } => "anthropic",
        }
    }
}

/// A registered model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Registry id, e.g. `"gpt-4"`.
    pub id: String,
    pub display_name: String,
    pub vendor: String,
    pub backend: Backend,
    /// Id of the model to swap to when this one is exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Sampling defaults for this model.
    #[serde(default)]
    pub params: GenerationParams,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        vendor: impl Into<String>,
        backend: Backend,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            vendor: vendor.into(),
            backend,
            fallback: None,
            description: String::new(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// System prompt for chains created without an explicit one.
    pub fn default_system_prompt(&self) -> String {
        if self.display_name.is_empty() || self.vendor.is_empty() {
            "You are a helpful AI assistant. Provide clear and concise responses.".to_string()
        } else {
            format!(
                "You are {}, a helpful AI assistant by {}. Provide clear and concise responses.",
                self.display_name, self.vendor
            )
        }
    }
}

/// Outcome of [`ModelRegistry::resolve`].
#[derive(Debug, Clone)]
pub struct Resolved {
    pub descriptor: Arc<ModelDescriptor>,
    /// True when the requested id was empty or unknown and the default
    /// model was used instead.
    pub substituted: bool,
}

/// Read-only model table in registration order.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<Arc<ModelDescriptor>>,
    index: HashMap<String, usize>,
}

impl ModelRegistry {
    /// Build a registry, validating ids and the fallback graph.
    pub fn new(models: Vec<ModelDescriptor>) -> Result<Self> {
        let mut index = HashMap::with_capacity(models.len());
        for (i, model) in models.iter().enumerate() {
            if model.id.trim().is_empty() {
                return Err(ParleyError::Configuration(
                    "model id must not be empty".to_string(),
                ));
            }
            if index.insert(model.id.clone(), i).is_some() {
                return Err(ParleyError::Configuration(format!(
                    "duplicate model id '{}'",
                    model.id
                )));
            }
        }

        let registry = Self {
            models: models.into_iter().map(Arc::new).collect(),
            index,
        };
        registry.validate_fallbacks()?;
        Ok(registry)
    }

    /// The models shipped with the crate.
    pub fn builtin() -> Self {
        Self::new(builtin::models()).unwrap_or_default()
    }

    fn validate_fallbacks(&self) -> Result<()> {
        for model in &self.models {
            let mut seen = HashSet::new();
            seen.insert(model.id.as_str());
            let mut cursor = model.fallback.as_deref();
            while let Some(next) = cursor {
                let Some(&i) = self.index.get(next) else {
                    return Err(ParleyError::Configuration(format!(
                        "model '{}' falls back to unknown model '{next}'",
                        model.id
                    )));
                };
                if !seen.insert(next) {
                    return Err(ParleyError::Configuration(format!(
                        "fallback cycle through model '{}'",
                        model.id
                    )));
                }
                cursor = self.models[i].fallback.as_deref();
            }
        }
        Ok(())
    }

    /// Look up a model, substituting the default for empty or unknown ids.
    pub fn resolve(&self, model_id: &str) -> Result<Resolved> {
        if let Some(descriptor) = self.get(model_id.trim()) {
            return Ok(Resolved {
                descriptor,
                substituted: false,
            });
        }

        let default = self
            .default_model()
            .ok_or(ParleyError::NoModelsConfigured)?;
        warn!(
            requested = model_id,
            substitute = %default.id,
            error = %ParleyError::UnknownModel(model_id.to_string()),
            "substituting default model"
        );
        Ok(Resolved {
            descriptor: default,
            substituted: true,
        })
    }

    /// The model `model_id` falls back to, one hop only.
    pub fn fallback_of(&self, model_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.get(model_id)?
            .fallback
            .as_deref()
            .and_then(|id| self.get(id))
    }

    /// Exact lookup, no substitution.
    pub fn get(&self, model_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.index.get(model_id).map(|&i| self.models[i].clone())
    }

    /// First-registered model.
    pub fn default_model(&self) -> Option<Arc<ModelDescriptor>> {
        self.models.first().cloned()
    }

    /// All models in registration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().map(AsRef::as_ref)
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no models are registered.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai(id: &str) -> ModelDescriptor {
        ModelDescriptor::new(
            id,
            id.to_uppercase(),
            "OpenAI",
            Backend::OpenAi {
                model: id.to_string(),
            },
        )
    }

    #[test]
    fn resolve_known_model_is_not_substituted() {
        let registry = ModelRegistry::new(vec![openai("m1"), openai("m2")]).unwrap();
        let resolved = registry.resolve("m2").unwrap();
        assert_eq!(resolved.descriptor.id, "m2");
        assert!(!resolved.substituted);
    }

    #[test]
    fn resolve_unknown_model_substitutes_first() {
        let registry = ModelRegistry::new(vec![openai("m1")]).unwrap();
        let resolved = registry.resolve("nonexistent").unwrap();
        assert_eq!(resolved.descriptor.id, "m1");
        assert!(resolved.substituted);
    }

    #[test]
    fn resolve_empty_id_substitutes_first() {
        let registry = ModelRegistry::new(vec![openai("m1"), openai("m2")]).unwrap();
        let resolved = registry.resolve("  ").unwrap();
        assert_eq!(resolved.descriptor.id, "m1");
        assert!(resolved.substituted);
    }

    #[test]
    fn resolve_on_empty_registry_fails() {
        let registry = ModelRegistry::new(vec![]).unwrap();
        assert!(matches!(
            registry.resolve("m1"),
            Err(ParleyError::NoModelsConfigured)
        ));
    }

    #[test]
    fn fallback_is_one_hop() {
        let registry = ModelRegistry::new(vec![
            openai("a").with_fallback("b"),
            openai("b").with_fallback("c"),
            openai("c"),
        ])
        .unwrap();
        assert_eq!(registry.fallback_of("a").unwrap().id, "b");
        assert_eq!(registry.fallback_of("b").unwrap().id, "c");
        assert!(registry.fallback_of("c").is_none());
        assert!(registry.fallback_of("missing").is_none());
    }

    #[test]
    fn fallback_cycle_is_rejected() {
        let err = ModelRegistry::new(vec![
            openai("a").with_fallback("b"),
            openai("b").with_fallback("a"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn self_fallback_is_rejected() {
        let err = ModelRegistry::new(vec![openai("a").with_fallback("a")]).unwrap_err();
        assert!(matches!(err, ParleyError::Configuration(_)));
    }

    #[test]
    fn dangling_fallback_is_rejected() {
        let err = ModelRegistry::new(vec![openai("a").with_fallback("ghost")]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        assert!(ModelRegistry::new(vec![openai("a"), openai("a")]).is_err());
    }

    #[test]
    fn default_system_prompt_names_model_and_vendor() {
        let prompt = openai("gpt").default_system_prompt();
        assert!(prompt.starts_with("You are GPT, a helpful AI assistant by OpenAI."));
    }

    #[test]
    fn backend_deserializes_from_tagged_table() {
        let backend: Backend = toml::from_str(
            r#"
            kind = "nvidia"
            model = "deepseek-ai/deepseek-r1"
            "#,
        )
        .unwrap();
        assert_eq!(backend.provider(), "nvidia");
        assert_eq!(backend.model(), "deepseek-ai/deepseek-r1");
        assert_eq!(
            backend,
            Backend::Nvidia {
                model: "deepseek-ai/deepseek-r1".into(),
                base_url: default_nvidia_url(),
            }
        );
    }
}
