//! Error types for transform construction and pipeline loading.

use thiserror::Error;

/// Result type for registry and loader operations.
pub type Result<T> = std::result::Result<T, ConfigurationError>;

/// Pipeline configuration errors.
///
/// These surface at service initialize or on a failed live-reload; they
/// never occur during message processing.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// No registered transform matches the configured name.
    #[error("unknown pipeline function: {0}")]
    UnknownFunction(String),

    /// More than one registered transform matches a name prefix.
    #[error("ambiguous pipeline function {name}: matches {matches:?}")]
    AmbiguousFunction { name: String, matches: Vec<String> },

    /// A function's parameter map is missing a required key.
    #[error("function {function}: missing required parameter {parameter}")]
    MissingParameter { function: String, parameter: String },

    /// A function parameter has an unusable value.
    #[error("function {function}: invalid parameter {parameter}: {message}")]
    InvalidParameter {
        function: String,
        parameter: String,
        message: String,
    },

    /// Two pipelines were configured with the same id.
    #[error("duplicate pipeline id: {0}")]
    DuplicatePipeline(String),

    /// A per-topic pipeline listed a blank topic string.
    #[error("pipeline {0}: blank topic")]
    BlankTopic(String),

    /// A pipeline was configured with no functions.
    #[error("empty execution order")]
    EmptyExecutionOrder,

    /// Neither a default nor any per-topic pipeline was configured.
    #[error("no pipelines configured")]
    NoPipelines,

    /// A secret lookup failed while constructing a transform.
    #[error("secret lookup failed: {0}")]
    Secret(String),
}
