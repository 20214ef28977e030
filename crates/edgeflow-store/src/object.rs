//! Persisted data model for retained payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// One retained payload awaiting retry.
///
/// Created when a transform fails after opting the message into
/// store-and-forward; removed on successful retry, retry exhaustion, or
/// pipeline reconfiguration (version mismatch).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoredObject {
    /// Unique handle (UUID). Assigned on first store if absent.
    pub id: String,
    /// Service identity; partitions the store.
    pub app_service_key: String,
    /// Bytes to re-inject at retry time.
    pub payload: Vec<u8>,
    /// Pipeline to retry in.
    pub pipeline_id: String,
    /// Zero-based index of the transform to resume at.
    pub pipeline_position: usize,
    /// Snapshot of the pipeline's hash at store time.
    pub version: String,
    /// Count of failed retries so far.
    pub retry_count: u64,
    /// Correlation id copied from the context at store time.
    pub correlation_id: String,
    /// Snapshot of the context scratchpad to restore before retry.
    pub context_data: HashMap<String, String>,
}

impl StoredObject {
    /// Build a stored object for a payload that failed mid-pipeline.
    pub fn new(
        app_service_key: impl Into<String>,
        payload: Vec<u8>,
        pipeline_id: impl Into<String>,
        pipeline_position: usize,
        version: impl Into<String>,
        correlation_id: impl Into<String>,
        context_data: HashMap<String, String>,
    ) -> Self {
        Self {
            id: String::new(),
            app_service_key: app_service_key.into(),
            payload,
            pipeline_id: pipeline_id.into(),
            pipeline_position,
            version: version.into(),
            retry_count: 0,
            correlation_id: correlation_id.into(),
            context_data,
        }
    }

    /// Validate the fields every backend must refuse to persist without.
    pub fn validate_contract(&self, for_add: bool) -> Result<()> {
        if !for_add && self.id.is_empty() {
            return Err(StoreError::Validation("id is required".into()));
        }
        if self.app_service_key.is_empty() {
            return Err(StoreError::Validation("app service key is required".into()));
        }
        if self.payload.is_empty() {
            return Err(StoreError::Validation("payload is required".into()));
        }
        if self.pipeline_id.is_empty() {
            return Err(StoreError::Validation("pipeline id is required".into()));
        }
        if self.version.is_empty() {
            return Err(StoreError::Validation("version is required".into()));
        }
        Ok(())
    }
}
