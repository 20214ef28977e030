//! Pipeline data model: the values flowing between transforms, the
//! pipeline target type, and the transform contract.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use edgeflow_core::codec::{self, PayloadFormat};
use edgeflow_core::context::Context;
use edgeflow_core::event::Event;
use edgeflow_core::CoreError;

/// Error returned by a failing transform.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<CoreError> for TransformError {
    fn from(e: CoreError) -> Self {
        Self(e.to_string())
    }
}

/// Outcome of a transform: `Ok(Some)` feeds the next transform,
/// `Ok(None)` ends the pipeline normally (short-circuit), `Err`
/// terminates it as a failure.
pub type TransformResult = std::result::Result<Option<PipelineData>, TransformError>;

/// A value flowing between transforms.
#[derive(Clone)]
pub enum PipelineData {
    /// A decoded telemetry event.
    Event(Event),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text (XML conversions, rendered templates).
    Text(String),
    /// Structured JSON.
    Json(Value),
    /// Implementer-supplied value; transforms downcast as needed.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl fmt::Debug for PipelineData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineData::Event(e) => f.debug_tuple("Event").field(e).finish(),
            PipelineData::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            PipelineData::Text(t) => f.debug_tuple("Text").field(t).finish(),
            PipelineData::Json(v) => f.debug_tuple("Json").field(v).finish(),
            PipelineData::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl PipelineData {
    /// Borrow the event, if this is one.
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            PipelineData::Event(e) => Some(e),
            _ => None,
        }
    }

    /// Render the value as bytes for an export sink or response.
    ///
    /// Events and JSON values are serialized as JSON; custom values have
    /// no generic byte form and must be converted by an earlier transform.
    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, TransformError> {
        match self {
            PipelineData::Bytes(b) => Ok(b.clone()),
            PipelineData::Text(t) => Ok(t.clone().into_bytes()),
            PipelineData::Event(e) => Ok(codec::encode_json(e)?),
            PipelineData::Json(v) => Ok(codec::encode_json(v)?),
            PipelineData::Custom(_) => Err(TransformError::new(
                "custom pipeline data has no byte representation",
            )),
        }
    }
}

/// Decoder for implementer-supplied target types.
pub trait CustomDecoder: Send + Sync {
    /// Decode the payload into a fresh value; called once per message.
    fn decode(
        &self,
        payload: &[u8],
        format: PayloadFormat,
    ) -> std::result::Result<PipelineData, CoreError>;
}

/// The decoded shape of the payload entering the first transform.
///
/// Carried as a descriptor, never a reused instance; the runtime decodes
/// a fresh value per message so no data is retained across calls.
#[derive(Clone, Default)]
pub enum TargetType {
    /// Decode into an [`Event`], accepting either an `AddEventRequest`
    /// wrapper or a bare event.
    #[default]
    Event,
    /// Pass the envelope payload through untouched.
    Bytes,
    /// Decode with an implementer-supplied decoder.
    Custom(Arc<dyn CustomDecoder>),
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Event => write!(f, "Event"),
            TargetType::Bytes => write!(f, "Bytes"),
            TargetType::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A single pipeline transform.
///
/// Transforms receive the context and the previous transform's output and
/// either continue the chain, short-circuit it, or fail it.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Name used in logs and the pipeline fingerprint.
    fn name(&self) -> &str;

    /// Content fingerprint feeding the pipeline hash.
    ///
    /// Configurable transforms include a digest of their parameters so a
    /// parameter change invalidates stored retries.
    fn fingerprint(&self) -> String {
        self.name().to_string()
    }

    /// Execute against the current context and input.
    async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_to_bytes_is_json() {
        let mut event = Event::new("profA", "DevA", "sourceX");
        event.add_simple_reading("Temperature", "Int64", "72");

        let bytes = PipelineData::Event(event.clone()).to_bytes().unwrap();
        let back: Event = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_custom_to_bytes_fails() {
        let data = PipelineData::Custom(Arc::new(42u32));
        assert!(data.to_bytes().is_err());
    }

    #[test]
    fn test_custom_downcast() {
        let data = PipelineData::Custom(Arc::new("hello".to_string()));
        if let PipelineData::Custom(value) = data {
            assert_eq!(value.downcast_ref::<String>().unwrap(), "hello");
        } else {
            panic!("expected custom data");
        }
    }
}
