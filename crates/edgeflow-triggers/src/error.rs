//! Error types for trigger setup and transport plumbing.

use thiserror::Error;

/// Result type for trigger operations.
pub type Result<T> = std::result::Result<T, TriggerError>;

/// Trigger error types.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// Bad trigger configuration.
    #[error("trigger configuration: {0}")]
    Configuration(String),

    /// Connecting to the transport failed; fails initialize.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Subscribing failed; fails initialize.
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    /// Publishing a message failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// This trigger type cannot consume a background publisher.
    #[error("trigger type {0} does not support background publishing")]
    BackgroundUnsupported(&'static str),

    /// Socket setup failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Core error.
    #[error(transparent)]
    Core(#[from] edgeflow_core::CoreError),
}
