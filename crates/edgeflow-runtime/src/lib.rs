//! Pipeline runtime for the EdgeFlow SDK.
//!
//! The runtime turns a raw message envelope into a decoded value of the
//! configured target type, selects every pipeline whose topic patterns
//! match the envelope's received topic, and executes the transform chains
//! with failure routing into store-and-forward.

pub mod data;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod runtime;

pub use data::{
    CustomDecoder, PipelineData, TargetType, Transform, TransformError, TransformResult,
};
pub use dispatch::{message_received, ResponseHandler};
pub use error::{Result, RuntimeError};
pub use pipeline::{FunctionPipeline, DEFAULT_PIPELINE_ID};
pub use runtime::Runtime;
