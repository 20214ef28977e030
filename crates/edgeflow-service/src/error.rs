//! Error types for the service shell.

use thiserror::Error;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service error types.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad service configuration.
    #[error("service configuration: {0}")]
    Configuration(String),

    /// Pipeline configuration failed to load.
    #[error(transparent)]
    Pipeline(#[from] edgeflow_transforms::ConfigurationError),

    /// Trigger setup failed.
    #[error(transparent)]
    Trigger(#[from] edgeflow_triggers::TriggerError),

    /// Core error.
    #[error(transparent)]
    Core(#[from] edgeflow_core::CoreError),

    /// Runtime error.
    #[error(transparent)]
    Runtime(#[from] edgeflow_runtime::RuntimeError),

    /// The background publisher channel is full or closed.
    #[error("background publish failed: {0}")]
    BackgroundPublish(String),
}
