//! Built-in pipeline transforms for the EdgeFlow SDK.
//!
//! The catalog covers attribute filters, format conversion, compression,
//! encryption, export sinks, batching, JSONLogic filtering and response
//! shaping, plus the registry and loader that turn the writable `Pipeline`
//! configuration block into executable pipelines.

pub mod batch;
pub mod compress;
pub mod convert;
pub mod encrypt;
pub mod error;
pub mod export_http;
pub mod export_mqtt;
pub mod filters;
pub mod jsonlogic;
pub mod loader;
pub mod params;
pub mod push;
pub mod registry;
pub mod response;
pub mod secrets;
pub mod tags;

pub use batch::{Batch, BatchMode};
pub use compress::{Compress, CompressionAlgorithm};
pub use convert::{Conversion, ConversionType};
pub use encrypt::Encrypt;
pub use error::{ConfigurationError, Result};
pub use export_http::HttpExport;
pub use export_mqtt::{MqttAuthMode, MqttExport, MqttExportConfig};
pub use filters::{Filter, FilterField};
pub use jsonlogic::JsonLogic;
pub use loader::load_pipelines;
pub use push::PushToCore;
pub use registry::TransformRegistry;
pub use response::SetResponseData;
pub use secrets::{InMemorySecretProvider, SecretProvider};
pub use tags::AddTags;
