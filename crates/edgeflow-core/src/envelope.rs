//! Inbound message envelope.
//!
//! A trigger wraps every received message in a [`MessageEnvelope`] before
//! handing it to the pipeline runtime. The envelope is immutable once
//! produced; the per-message mutable state lives in
//! [`Context`](crate::context::Context).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON content type.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// CBOR content type.
pub const CONTENT_TYPE_CBOR: &str = "application/cbor";

/// An inbound message as delivered by a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Content type of the payload as delivered by the transport.
    pub content_type: String,
    /// Correlation identifier threaded through logs and responses.
    pub correlation_id: String,
    /// Topic the message arrived on. Empty for transports without topics.
    pub received_topic: String,
}

impl MessageEnvelope {
    /// Create an envelope with a fresh correlation id and no topic.
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            payload,
            content_type: content_type.into(),
            correlation_id: Uuid::new_v4().to_string(),
            received_topic: String::new(),
        }
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Set the topic this message was received on.
    pub fn with_received_topic(mut self, topic: impl Into<String>) -> Self {
        self.received_topic = topic.into();
        self
    }

    /// Infer a content type from the payload's first byte.
    ///
    /// `{` or `[` is taken as JSON; any other leading byte (including an
    /// empty payload) is taken as CBOR. Transports that carry no content
    /// type header (external MQTT, bus responses) rely on this rule.
    pub fn infer_content_type(payload: &[u8]) -> &'static str {
        match payload.first() {
            Some(b'{') | Some(b'[') => CONTENT_TYPE_JSON,
            _ => CONTENT_TYPE_CBOR,
        }
    }
}
