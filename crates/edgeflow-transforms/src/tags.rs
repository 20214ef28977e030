//! AddTags transform.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;

/// Merges a fixed set of tags into each Event.
pub struct AddTags {
    tags: BTreeMap<String, String>,
}

impl AddTags {
    pub fn new(tags: BTreeMap<String, String>) -> Self {
        Self { tags }
    }

    /// Parses the `Tags` parameter, a comma-separated list of `key:value`
    /// pairs.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let raw = params::required(params, "AddTags", "tags")?;
        let mut tags = BTreeMap::new();
        for pair in params::csv(&raw) {
            let (key, value) =
                pair.split_once(':')
                    .ok_or_else(|| ConfigurationError::InvalidParameter {
                        function: "AddTags".to_string(),
                        parameter: "tags".to_string(),
                        message: format!("{pair} is not a key:value pair"),
                    })?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return Err(ConfigurationError::InvalidParameter {
                    function: "AddTags".to_string(),
                    parameter: "tags".to_string(),
                    message: format!("{pair} has an empty key or value"),
                });
            }
            tags.insert(key.to_string(), value.to_string());
        }
        Ok(Self::new(tags))
    }
}

#[async_trait]
impl Transform for AddTags {
    fn name(&self) -> &str {
        "AddTags"
    }

    fn fingerprint(&self) -> String {
        let joined: Vec<String> = self.tags.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        params::fingerprint(self.name(), &[&joined.join(",")])
    }

    async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
        let event = input
            .as_event()
            .ok_or_else(|| TransformError::new("AddTags: expected an Event"))?;
        let mut tagged = event.clone();
        let tags = tagged.tags.get_or_insert_with(serde_json::Map::new);
        for (key, value) in &self.tags {
            tags.insert(key.clone(), Value::String(value.clone()));
        }
        Ok(Some(PipelineData::Event(tagged)))
    }
}
