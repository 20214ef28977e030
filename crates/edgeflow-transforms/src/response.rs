//! SetResponseData transform.

use std::collections::HashMap;

use async_trait::async_trait;

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformResult};

use crate::error::Result;
use crate::params;

/// Copies the current pipeline data into the context's response slot so the
/// trigger can return or publish it.
pub struct SetResponseData {
    response_content_type: Option<String>,
}

impl SetResponseData {
    pub fn new(response_content_type: Option<String>) -> Self {
        Self {
            response_content_type,
        }
    }

    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        Ok(Self::new(params::optional(params, "responsecontenttype")))
    }
}

#[async_trait]
impl Transform for SetResponseData {
    fn name(&self) -> &str {
        "SetResponseData"
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(
            self.name(),
            &[self.response_content_type.as_deref().unwrap_or_default()],
        )
    }

    async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
        ctx.set_response_data(input.to_bytes()?);
        if let Some(content_type) = &self.response_content_type {
            ctx.set_response_content_type(content_type.clone());
        }
        Ok(Some(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::envelope::CONTENT_TYPE_JSON;
    use edgeflow_core::Event;

    #[tokio::test]
    async fn sets_response_bytes_and_passes_input_through() {
        let mut ctx = Context::new("corr", CONTENT_TYPE_JSON);
        let transform = SetResponseData::new(None);
        let mut event = Event::new("ProfA", "DevA", "SourceX");
        event.add_simple_reading("Temperature", "Int64", "72");
        let out = transform
            .run(&mut ctx, PipelineData::Event(event.clone()))
            .await
            .unwrap();
        assert!(out.is_some());
        let body: Event = serde_json::from_slice(ctx.response_data().unwrap()).unwrap();
        assert_eq!(body, event);
    }

    #[tokio::test]
    async fn sets_configured_content_type() {
        let mut ctx = Context::new("corr", CONTENT_TYPE_JSON);
        let transform = SetResponseData::new(Some("text/xml".to_string()));
        transform
            .run(&mut ctx, PipelineData::Text("<a/>".to_string()))
            .await
            .unwrap();
        assert_eq!(ctx.response_content_type(), "text/xml");
    }
}
