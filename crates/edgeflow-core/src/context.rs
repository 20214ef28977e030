//! Per-message context threaded through every pipeline transform.
//!
//! The context is a mutable bag created by a trigger for each inbound
//! message. Transforms read and write response data, retry data, and a
//! case-insensitive key/value scratchpad; the trigger's response handler
//! reads the response fields after the pipeline finishes.

use std::collections::HashMap;

use crate::envelope::MessageEnvelope;
use crate::error::{CoreError, Result};

/// Scratchpad key holding the topic the message arrived on.
pub const KEY_RECEIVED_TOPIC: &str = "receivedtopic";
/// Scratchpad key holding the id of the executing pipeline.
pub const KEY_PIPELINE_ID: &str = "pipelineid";
/// Scratchpad key holding the decoded event's device name.
pub const KEY_DEVICE_NAME: &str = "devicename";
/// Scratchpad key holding the decoded event's profile name.
pub const KEY_PROFILE_NAME: &str = "profilename";
/// Scratchpad key holding the decoded event's source name.
pub const KEY_SOURCE_NAME: &str = "sourcename";

/// Per-message state passed through a pipeline.
///
/// `Clone` produces an independent context whose scratchpad is a deep
/// copy; triggers clone before dispatching to parallel pipelines.
#[derive(Debug, Clone)]
pub struct Context {
    correlation_id: String,
    input_content_type: String,
    response_data: Option<Vec<u8>>,
    response_content_type: String,
    retry_data: Option<Vec<u8>>,
    /// Scratchpad values, keyed by lowercased name.
    values: HashMap<String, String>,
}

impl Context {
    /// Create a context for a single inbound message.
    pub fn new(correlation_id: impl Into<String>, input_content_type: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            input_content_type: input_content_type.into(),
            response_data: None,
            response_content_type: String::new(),
            retry_data: None,
            values: HashMap::new(),
        }
    }

    /// Create a context from an envelope, copying its correlation id,
    /// content type, and received topic.
    pub fn from_envelope(envelope: &MessageEnvelope) -> Self {
        let mut ctx = Self::new(&envelope.correlation_id, &envelope.content_type);
        ctx.add_value(KEY_RECEIVED_TOPIC, &envelope.received_topic);
        ctx
    }

    /// Correlation id assigned when the message entered the service.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Content type of the inbound payload.
    pub fn input_content_type(&self) -> &str {
        &self.input_content_type
    }

    /// Replace the input content type. Called by the runtime before the
    /// first transform runs.
    pub fn set_input_content_type(&mut self, content_type: impl Into<String>) {
        self.input_content_type = content_type.into();
    }

    /// Response payload written by a transform, if any.
    pub fn response_data(&self) -> Option<&[u8]> {
        self.response_data.as_deref()
    }

    /// Set the response payload.
    pub fn set_response_data(&mut self, data: Vec<u8>) {
        self.response_data = Some(data);
    }

    /// Content type of the response payload. Empty when unset.
    pub fn response_content_type(&self) -> &str {
        &self.response_content_type
    }

    /// Set the response content type.
    pub fn set_response_content_type(&mut self, content_type: impl Into<String>) {
        self.response_content_type = content_type.into();
    }

    /// Payload a transform wants retried through store-and-forward if the
    /// pipeline fails at or after this transform.
    pub fn retry_data(&self) -> Option<&[u8]> {
        self.retry_data.as_deref()
    }

    /// Opt the current message into store-and-forward on failure.
    pub fn set_retry_data(&mut self, data: Vec<u8>) {
        self.retry_data = Some(data);
    }

    /// Clear the retry opt-in. Called by the runtime before position zero.
    pub fn clear_retry_data(&mut self) {
        self.retry_data = None;
    }

    /// Add a scratchpad value. Keys are case-insensitive.
    pub fn add_value(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_lowercase(), value.into());
    }

    /// Look up a scratchpad value. Keys are case-insensitive.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    /// Remove a scratchpad value.
    pub fn remove_value(&mut self, key: &str) {
        self.values.remove(&key.to_lowercase());
    }

    /// Snapshot of the whole scratchpad, keys lowercased.
    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Restore the scratchpad from a stored snapshot.
    pub fn restore_values(&mut self, values: HashMap<String, String>) {
        self.values = values
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
    }

    /// Replace every `{key}` token in `template` with the matching
    /// scratchpad value.
    ///
    /// Fails if any placeholder is unresolved; partial replacements are
    /// not returned.
    pub fn apply_values(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut unresolved: Vec<String> = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match self.value(key) {
                        Some(v) => out.push_str(v),
                        None => unresolved.push(key.to_string()),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    // Unterminated brace is treated as a literal.
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);

        if unresolved.is_empty() {
            Ok(out)
        } else {
            Err(CoreError::PlaceholderUnresolved(unresolved.join(", ")))
        }
    }
}
