//! Error types for the core crate.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payload bytes could not be decoded against the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The envelope's content type selects no known codec.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// A decoded value failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// One or more `{key}` placeholders had no matching context value.
    #[error("unresolved placeholders: {0}")]
    PlaceholderUnresolved(String),

    /// Configuration value was rejected.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// HTTP-equivalent status for this error.
    ///
    /// Malformed payloads and unknown content types are protocol errors
    /// (400-class); everything else is reported as an internal failure.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Decode(_) | CoreError::UnsupportedContentType(_) => 400,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Decode(e.to_string())
    }
}
