//! Unified error type for the fan-out sink.
//!
//! `SinkError` is returned by every fallible library entry point (configuration
//! loading, input reading, service start-up). It serializes as
//! `{ "kind": "...", "message": "..." }` so status consumers can distinguish
//! error categories. The fan-out core itself never returns errors: transport
//! faults surface as `not_connected` status instead.

use serde::ser::SerializeStruct;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Crate-level error.
///
/// Each variant maps to a distinct failure domain.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Malformed or unreadable configuration.
    #[error("{0}")]
    Config(String),

    /// I/O and OS-level errors (files, stdin, thread spawning).
    #[error("{0}")]
    Io(String),

    /// Invalid or missing user input.
    #[error("{0}")]
    InvalidInput(String),
}

impl SinkError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Config(_) => "Config",
            SinkError::Io(_) => "Io",
            SinkError::InvalidInput(_) => "InvalidInput",
        }
    }
}

/// Produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for SinkError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("SinkError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

// ---- From implementations ----

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Config(err.to_string())
    }
}
