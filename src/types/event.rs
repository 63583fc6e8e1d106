//! Streaming event types

/// Events emitted by a provider adapter stream.
///
/// A well-formed adapter stream is zero or more non-empty `Delta`s
/// followed by exactly one `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// Text content chunk (never empty)
    Delta(String),

    /// Stream complete
    Done,
}

/// Events emitted by a conversation reply stream.
///
/// Terminal failures arrive as an `Err` item on the stream, after any
/// deltas that were already forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    /// Text content chunk (never empty)
    Delta(String),

    /// The active model failed mid-stream and the reply restarts from the
    /// beginning on its fallback. Deltas received before this event belong
    /// to the abandoned attempt.
    Restart { from_model: String, to_model: String },

    /// Reply complete. `model` is the registry id that produced it, or the
    /// plugin name when a plugin answered.
    Done { model: String },
}
