//! Error types for the runtime crate.

use thiserror::Error;

use edgeflow_core::CoreError;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Runtime error types.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Decoding or validation failure from the core layer.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The requested pipeline does not exist.
    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    /// A pipeline id was registered twice.
    #[error("duplicate pipeline id: {0}")]
    DuplicatePipeline(String),

    /// A transform returned an error; the pipeline terminated.
    #[error("pipeline {pipeline_id} failed at {transform_name} (position {position}): {message}")]
    PipelineFailure {
        pipeline_id: String,
        transform_name: String,
        position: usize,
        message: String,
    },

    /// One or more pipelines or response handlers failed during dispatch.
    #[error("message dispatch failed: {}", .0.join("; "))]
    Combined(Vec<String>),
}

impl RuntimeError {
    /// HTTP-equivalent status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            RuntimeError::Core(e) => e.status_code(),
            RuntimeError::PipelineNotFound(_) => 404,
            RuntimeError::DuplicatePipeline(_) => 500,
            RuntimeError::PipelineFailure { .. } => 422,
            RuntimeError::Combined(_) => 500,
        }
    }
}
