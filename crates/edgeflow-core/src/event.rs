//! Event and reading DTOs.
//!
//! These mirror the wire shapes accepted by the runtime's default target
//! type: a bare `Event` or an `AddEventRequest` wrapping one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// API version carried by versioned request envelopes.
pub const API_VERSION: &str = "v3";

/// Value type name for binary readings.
pub const VALUE_TYPE_BINARY: &str = "Binary";
/// Value type name for object readings.
pub const VALUE_TYPE_OBJECT: &str = "Object";

/// A single reading within an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub origin: i64,
    #[serde(default)]
    pub device_name: String,
    pub resource_name: String,
    #[serde(default)]
    pub profile_name: String,
    pub value_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_value: Option<Value>,
}

/// A telemetry event produced by a device service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub device_name: String,
    pub profile_name: String,
    pub source_name: String,
    #[serde(default)]
    pub origin: i64,
    #[serde(default)]
    pub readings: Vec<Reading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Map<String, Value>>,
}

impl Event {
    /// Create an event with a fresh id and origin timestamp.
    pub fn new(
        profile_name: impl Into<String>,
        device_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_name: device_name.into(),
            profile_name: profile_name.into(),
            source_name: source_name.into(),
            origin: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            readings: Vec::new(),
            tags: None,
        }
    }

    /// Append a simple string-valued reading.
    pub fn add_simple_reading(
        &mut self,
        resource_name: impl Into<String>,
        value_type: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.readings.push(Reading {
            id: Uuid::new_v4().to_string(),
            origin: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            device_name: self.device_name.clone(),
            resource_name: resource_name.into(),
            profile_name: self.profile_name.clone(),
            value_type: value_type.into(),
            value: value.into(),
            ..Default::default()
        });
    }

    /// Append a binary reading with its media type.
    pub fn add_binary_reading(
        &mut self,
        resource_name: impl Into<String>,
        binary_value: Vec<u8>,
        media_type: impl Into<String>,
    ) {
        self.readings.push(Reading {
            id: Uuid::new_v4().to_string(),
            origin: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            device_name: self.device_name.clone(),
            resource_name: resource_name.into(),
            profile_name: self.profile_name.clone(),
            value_type: VALUE_TYPE_BINARY.to_string(),
            binary_value: Some(binary_value),
            media_type: media_type.into(),
            ..Default::default()
        });
    }

    /// Append a structured object reading.
    pub fn add_object_reading(&mut self, resource_name: impl Into<String>, object: Value) {
        self.readings.push(Reading {
            id: Uuid::new_v4().to_string(),
            origin: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            device_name: self.device_name.clone(),
            resource_name: resource_name.into(),
            profile_name: self.profile_name.clone(),
            value_type: VALUE_TYPE_OBJECT.to_string(),
            object_value: Some(object),
            ..Default::default()
        });
    }

    /// Check the event carries the required names and each reading carries
    /// a value consistent with its declared type.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(CoreError::Validation("event device name is empty".into()));
        }
        if self.profile_name.is_empty() {
            return Err(CoreError::Validation("event profile name is empty".into()));
        }
        if self.source_name.is_empty() {
            return Err(CoreError::Validation("event source name is empty".into()));
        }
        for reading in &self.readings {
            reading.validate()?;
        }
        Ok(())
    }
}

impl Reading {
    /// Validate required fields and value/type consistency.
    pub fn validate(&self) -> Result<()> {
        if self.resource_name.is_empty() {
            return Err(CoreError::Validation("reading resource name is empty".into()));
        }
        if self.value_type.is_empty() {
            return Err(CoreError::Validation("reading value type is empty".into()));
        }
        match self.value_type.as_str() {
            VALUE_TYPE_BINARY => {
                let has_bytes = self.binary_value.as_ref().is_some_and(|b| !b.is_empty());
                if !has_bytes {
                    return Err(CoreError::Validation(format!(
                        "binary reading {} has no binary value",
                        self.resource_name
                    )));
                }
                if self.media_type.is_empty() {
                    return Err(CoreError::Validation(format!(
                        "binary reading {} has no media type",
                        self.resource_name
                    )));
                }
            }
            VALUE_TYPE_OBJECT => {
                if self.object_value.is_none() {
                    return Err(CoreError::Validation(format!(
                        "object reading {} has no object value",
                        self.resource_name
                    )));
                }
            }
            _ => {
                if self.value.is_empty() {
                    return Err(CoreError::Validation(format!(
                        "reading {} has no value",
                        self.resource_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Versioned request envelope wrapping an [`Event`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddEventRequest {
    pub api_version: String,
    #[serde(default)]
    pub request_id: String,
    pub event: Event,
}

impl AddEventRequest {
    /// Wrap an event in a fresh versioned request.
    pub fn new(event: Event) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            request_id: Uuid::new_v4().to_string(),
            event,
        }
    }

    /// Validate the request header and the wrapped event.
    pub fn validate(&self) -> Result<()> {
        if self.api_version.is_empty() {
            return Err(CoreError::Validation("request api version is empty".into()));
        }
        self.event.validate()
    }
}
