//! PushToCore transform.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use edgeflow_core::event::{VALUE_TYPE_BINARY, VALUE_TYPE_OBJECT};
use edgeflow_core::{AddEventRequest, Context, Event};
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::Result;
use crate::params;

/// Wraps the pipeline data in a fresh Event and emits the AddEvent request
/// for a downstream export sink to deliver.
pub struct PushToCore {
    profile_name: String,
    device_name: String,
    resource_name: String,
    value_type: String,
    media_type: String,
}

impl PushToCore {
    pub fn new(
        profile_name: impl Into<String>,
        device_name: impl Into<String>,
        resource_name: impl Into<String>,
        value_type: impl Into<String>,
    ) -> Self {
        Self {
            profile_name: profile_name.into(),
            device_name: device_name.into(),
            resource_name: resource_name.into(),
            value_type: value_type.into(),
            media_type: String::new(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = media_type.into();
        self
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let push = Self::new(
            params::required(params, "PushToCore", "profilename")?,
            params::required(params, "PushToCore", "devicename")?,
            params::required(params, "PushToCore", "resourcename")?,
            params::required(params, "PushToCore", "valuetype")?,
        );
        Ok(match params::optional(params, "mediatype") {
            Some(media_type) => push.with_media_type(media_type),
            None => push,
        })
    }
}

#[async_trait]
impl Transform for PushToCore {
    fn name(&self) -> &str {
        "PushToCore"
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(
            self.name(),
            &[
                &self.profile_name,
                &self.device_name,
                &self.resource_name,
                &self.value_type,
                &self.media_type,
            ],
        )
    }

    async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
        let bytes = input.to_bytes()?;
        let mut event = Event::new(&self.profile_name, &self.device_name, &self.resource_name);

        if self.value_type.eq_ignore_ascii_case(VALUE_TYPE_BINARY) {
            let media_type = if self.media_type.is_empty() {
                "application/octet-stream"
            } else {
                &self.media_type
            };
            event.add_binary_reading(&self.resource_name, bytes, media_type);
        } else if self.value_type.eq_ignore_ascii_case(VALUE_TYPE_OBJECT) {
            let object: Value = serde_json::from_slice(&bytes).map_err(|e| {
                TransformError::new(format!("PushToCore: input is not a JSON object: {e}"))
            })?;
            event.add_object_reading(&self.resource_name, object);
        } else {
            let value = String::from_utf8(bytes).map_err(|e| {
                TransformError::new(format!("PushToCore: input is not utf-8: {e}"))
            })?;
            event.add_simple_reading(&self.resource_name, &self.value_type, value);
        }

        event
            .validate()
            .map_err(|e| TransformError::new(e.to_string()))?;
        let request = AddEventRequest::new(event);
        let value =
            serde_json::to_value(&request).map_err(|e| TransformError::new(e.to_string()))?;
        Ok(Some(PipelineData::Json(value)))
    }
}
