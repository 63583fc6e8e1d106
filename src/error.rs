//! Parley error types

use std::fmt;
use std::time::Duration;

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Rate limits, timeouts, 5xx, dropped connections.
    Transient,
    /// Malformed requests, auth failures, unknown backend models.
    Permanent,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Parley error types
#[derive(Debug, thiserror::Error)]
pub enum ParleyError {
    // Registry errors
    #[error("no models configured")]
    NoModelsConfigured,

    /// Requested model id is not registered. Normally absorbed by
    /// substitution in [`ModelRegistry::resolve`](crate::ModelRegistry::resolve).
    #[error("unknown model: {0}")]
    UnknownModel(String),

    // Provider errors
    #[error("{kind} provider error: {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    /// Every model in the fallback path failed. Wraps the last error seen.
    #[error("all providers exhausted (tried: {}): {source}", tried.join(", "))]
    AllProvidersExhausted {
        tried: Vec<String>,
        #[source]
        source: Box<ParleyError>,
    },

    // Plugin errors (swallowed by the router, surfaced only in logs)
    #[error("plugin '{plugin}' unavailable: {reason}")]
    PluginUnavailable { plugin: String, reason: String },

    // Chain errors
    #[error("no chain for conversation {0}")]
    ConversationNotFound(i64),

    #[error("chain for conversation {0} was disposed")]
    ChainDisposed(i64),

    // Transport and data errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ParleyError {
    /// Shorthand for a transient provider error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Shorthand for a permanent provider error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Provider {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Whether the retry policy should try this call again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider { kind, .. } => *kind == ProviderErrorKind::Transient,
            Self::Timeout(_) | Self::Http(_) => true,
            _ => false,
        }
    }
}

impl From<llm::error::LLMError> for ParleyError {
    fn from(err: llm::error::LLMError) -> Self {
        classify_provider_message(err.to_string())
    }
}

/// Map a backend error message onto the transient/permanent split.
///
/// The llm crate flattens HTTP status into its messages, so this is a
/// string heuristic.
pub(crate) fn classify_provider_message(message: String) -> ParleyError {
    let lower = message.to_lowercase();
    const TRANSIENT_MARKERS: &[&str] = &[
        "rate limit",
        "429",
        "timed out",
        "timeout",
        "connection",
        "500",
        "502",
        "503",
        "504",
        "overloaded",
        "unavailable",
    ];
    if TRANSIENT_MARKERS.iter().any(|needle| lower.contains(needle)) {
        ParleyError::transient(message)
    } else {
        ParleyError::permanent(message)
    }
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;
