//! JSONLogic filter transform.

use std::collections::HashMap;

use async_trait::async_trait;
use datalogic_rs::DataLogic;
use serde_json::Value;
use tracing::debug;

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;

/// Evaluates a JSONLogic rule against the pipeline data and continues only
/// when the rule holds.
pub struct JsonLogic {
    rule: String,
}

impl JsonLogic {
    pub fn new(rule: impl Into<String>) -> Result<Self> {
        let rule = rule.into();
        // Reject malformed rules at construction, not per message.
        serde_json::from_str::<Value>(&rule).map_err(|e| ConfigurationError::InvalidParameter {
            function: "JSONLogic".to_string(),
            parameter: "rule".to_string(),
            message: format!("not valid JSON: {e}"),
        })?;
        Ok(Self { rule })
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        Self::new(params::required(params, "JSONLogic", "rule")?)
    }
}

#[async_trait]
impl Transform for JsonLogic {
    fn name(&self) -> &str {
        "JSONLogic"
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(self.name(), &[&self.rule])
    }

    async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
        let bytes = input.to_bytes()?;
        let data = std::str::from_utf8(&bytes)
            .map_err(|e| TransformError::new(format!("JSONLogic: input is not utf-8: {e}")))?;
        serde_json::from_str::<Value>(data)
            .map_err(|e| TransformError::new(format!("JSONLogic: input is not JSON: {e}")))?;

        let logic = DataLogic::new();
        let verdict = logic
            .evaluate_str(&self.rule, data)
            .map_err(|e| TransformError::new(format!("JSONLogic evaluation failed: {e}")))?;

        // Anything other than an explicit false or null keeps the message.
        let holds = !matches!(verdict.to_string().as_str(), "false" | "null");
        if holds {
            Ok(Some(input))
        } else {
            debug!("message filtered by jsonlogic rule");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::envelope::CONTENT_TYPE_JSON;
    use edgeflow_core::Event;

    fn ctx() -> Context {
        Context::new("corr", CONTENT_TYPE_JSON)
    }

    #[tokio::test]
    async fn passing_rule_continues() {
        let rule = r#"{"==": [{"var": "deviceName"}, "DevA"]}"#;
        let transform = JsonLogic::new(rule).unwrap();
        let event = Event::new("ProfA", "DevA", "SourceX");
        let out = transform
            .run(&mut ctx(), PipelineData::Event(event))
            .await
            .unwrap();
        assert!(out.is_some());
    }

    #[tokio::test]
    async fn failing_rule_short_circuits() {
        let rule = r#"{"==": [{"var": "deviceName"}, "DevB"]}"#;
        let transform = JsonLogic::new(rule).unwrap();
        let event = Event::new("ProfA", "DevA", "SourceX");
        let out = transform
            .run(&mut ctx(), PipelineData::Event(event))
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn non_json_input_errors() {
        let transform = JsonLogic::new(r#"{"var": "x"}"#).unwrap();
        let result = transform
            .run(&mut ctx(), PipelineData::Bytes(vec![0xff, 0xfe]))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn malformed_rule_rejected_at_construction() {
        assert!(JsonLogic::new("{not json").is_err());
    }
}
