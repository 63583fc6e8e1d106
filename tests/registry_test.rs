use parley::{Backend, GenerationParams, ModelDescriptor, ModelRegistry, ParleyError};

fn descriptor(id: &str) -> ModelDescriptor {
    ModelDescriptor::new(
        id,
        id,
        "Vendor",
        Backend::Ollama {
            model: id.to_string(),
            base_url: "http://localhost:11434".into(),
        },
    )
}

#[test]
fn builtin_models_in_registration_order() {
    let registry = ModelRegistry::builtin();
    let ids: Vec<&str> = registry.models().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gemini-pro", "gpt-4", "deepseek-ai/deepseek-r1"]);

    let gemini = registry.get("gemini-pro").unwrap();
    assert_eq!(gemini.params.max_tokens, Some(2048));
    assert_eq!(gemini.params.temperature, Some(0.7));
    assert_eq!(gemini.params.top_p, Some(0.95));

    let deepseek = registry.get("deepseek-ai/deepseek-r1").unwrap();
    assert_eq!(deepseek.backend.provider(), "nvidia");
    assert!(
        matches!(&deepseek.backend, Backend::Nvidia { base_url, .. } if base_url == "https://integrate.api.nvidia.com/v1")
    );
}

#[test]
fn resolve_substitutes_default_for_unknown() {
    let registry = ModelRegistry::builtin();
    let resolved = registry.resolve("claude-9").unwrap();
    assert!(resolved.substituted);
    assert_eq!(resolved.descriptor.id, "gemini-pro");

    let resolved = registry.resolve("gpt-4").unwrap();
    assert!(!resolved.substituted);
    assert_eq!(resolved.descriptor.display_name, "GPT-4o Mini");
}

#[test]
fn empty_registry() {
    let registry = ModelRegistry::new(vec![]).unwrap();
    assert!(registry.is_empty());
    assert_eq!(registry.len(), 0);
    assert!(registry.default_model().is_none());
    assert!(matches!(
        registry.resolve(""),
        Err(ParleyError::NoModelsConfigured)
    ));
}

#[test]
fn fallback_graph_is_validated() {
    assert!(
        ModelRegistry::new(vec![
            descriptor("a").with_fallback("b"),
            descriptor("b").with_fallback("c"),
            descriptor("c"),
        ])
        .is_ok()
    );

    let long_cycle = ModelRegistry::new(vec![
        descriptor("a").with_fallback("b"),
        descriptor("b").with_fallback("c"),
        descriptor("c").with_fallback("a"),
    ]);
    assert!(matches!(long_cycle, Err(ParleyError::Configuration(_))));
}

#[test]
fn descriptor_deserializes_with_defaults() {
    let descriptor: ModelDescriptor = serde_json::from_value(serde_json::json!({
        "id": "local",
        "display_name": "Llama",
        "vendor": "Meta",
        "backend": {"kind": "ollama", "model": "llama3"}
    }))
    .unwrap();
    assert_eq!(descriptor.params, GenerationParams::default());
    assert!(descriptor.fallback.is_none());
    assert!(descriptor.description.is_empty());
    assert_eq!(
        descriptor.backend,
        Backend::Ollama {
            model: "llama3".into(),
            base_url: "http://localhost:11434".into()
        }
    );
}

#[test]
fn descriptor_serializes_backend_tag() {
    let json = serde_json::to_value(descriptor("x")).unwrap();
    assert_eq!(json["backend"]["kind"], "ollama");
    assert!(json.get("fallback").is_none());
}
