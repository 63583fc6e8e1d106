use std::time::Duration;

use parley::{ParleyError, ProviderErrorKind, Result};

#[test]
fn test_error_display() {
    let err = ParleyError::UnknownModel("gpt-5".to_string());
    assert!(err.to_string().contains("gpt-5"));
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(ParleyError::NoModelsConfigured)
    }
    assert!(returns_error().is_err());
}

// ============================================================================
// Transient error classification
// ============================================================================

#[test]
fn transient_errors() {
    assert!(ParleyError::transient("busy").is_transient());
    assert!(ParleyError::Timeout(Duration::from_secs(120)).is_transient());
    assert!(ParleyError::Http("connection reset".into()).is_transient());
}

#[test]
fn permanent_errors() {
    assert!(!ParleyError::permanent("bad request").is_transient());
    assert!(!ParleyError::NoModelsConfigured.is_transient());
    assert!(!ParleyError::Configuration("bad".into()).is_transient());
    assert!(
        !ParleyError::PluginUnavailable {
            plugin: "p".into(),
            reason: "down".into()
        }
        .is_transient()
    );
    assert!(!ParleyError::ChainDisposed(1).is_transient());
}

#[test]
fn provider_error_display_includes_kind() {
    let err = ParleyError::Provider {
        kind: ProviderErrorKind::Transient,
        message: "429 too many requests".into(),
    };
    assert_eq!(
        err.to_string(),
        "transient provider error: 429 too many requests"
    );
}

#[test]
fn exhausted_exposes_source() {
    use std::error::Error;

    let err = ParleyError::AllProvidersExhausted {
        tried: vec!["a".into()],
        source: Box::new(ParleyError::permanent("401 unauthorized")),
    };
    let source = err.source().expect("source is set");
    assert!(source.to_string().contains("401"));
}

#[test]
fn json_errors_convert() {
    let err: ParleyError = serde_json::from_str::<serde_json::Value>("{")
        .unwrap_err()
        .into();
    assert!(matches!(err, ParleyError::Json(_)));
}
