//! HTTPExport transform.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tracing::{debug, warn};

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;
use crate::secrets::SecretProvider;

/// Posts the pipeline data to an HTTP endpoint.
///
/// The URL may contain `{key}` placeholders resolved from the context at
/// send time. With persist-on-error enabled a failed delivery leaves the
/// payload in the context's retry slot for store-and-forward.
pub struct HttpExport {
    method: Method,
    url: String,
    mime_type: String,
    persist_on_error: bool,
    auth_header: Option<(String, String)>,
    client: reqwest::Client,
}

impl HttpExport {
    pub fn new(method: Method, url: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            mime_type: mime_type.into(),
            persist_on_error: false,
            auth_header: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_persist_on_error(mut self, persist: bool) -> Self {
        self.persist_on_error = persist;
        self
    }

    /// Attach a fixed header, typically an API key.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_header = Some((name.into(), value.into()));
        self
    }

    pub fn from_params(
        params: &HashMap<String, String>,
        secrets: &dyn SecretProvider,
    ) -> Result<Self> {
        let method = params::required(params, "HTTPExport", "method")?;
        let method = match method.to_lowercase().as_str() {
            "post" => Method::POST,
            "put" => Method::PUT,
            other => {
                return Err(ConfigurationError::InvalidParameter {
                    function: "HTTPExport".to_string(),
                    parameter: "method".to_string(),
                    message: format!("{other} is not post or put"),
                })
            }
        };
        let url = params::required(params, "HTTPExport", "url")?;
        let mime_type = params::required(params, "HTTPExport", "mimetype")?;
        let persist = params::bool_param(params, "HTTPExport", "persistonerror", false)?;
        let mut export = Self::new(method, url, mime_type).with_persist_on_error(persist);
        if let Some(header_name) = params::optional(params, "httpheadername") {
            let path = params::required(params, "HTTPExport", "secretpath")?;
            let name = params::required(params, "HTTPExport", "secretname")?;
            let value = secrets.secret(&path, &name)?;
            export = export.with_header(header_name, value);
        }
        Ok(export)
    }
}

#[async_trait]
impl Transform for HttpExport {
    fn name(&self) -> &str {
        "HTTPExport"
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(
            self.name(),
            &[
                self.method.as_str(),
                &self.url,
                &self.mime_type,
                &self.persist_on_error.to_string(),
            ],
        )
    }

    async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
        let payload = input.to_bytes()?;
        let url = ctx
            .apply_values(&self.url)
            .map_err(|e| TransformError::new(e.to_string()))?;

        let mut request = self
            .client
            .request(self.method.clone(), &url)
            .header(CONTENT_TYPE, &self.mime_type)
            .body(payload.clone());
        if let Some((name, value)) = &self.auth_header {
            request = request.header(name.as_str(), value.as_str());
        }

        let failure = match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, status = %response.status(), "export delivered");
                return Ok(Some(input));
            }
            Ok(response) => format!("endpoint returned {}", response.status()),
            Err(e) => format!("request failed: {e}"),
        };

        if self.persist_on_error {
            ctx.set_retry_data(payload);
        }
        warn!(url = %url, error = %failure, "http export failed");
        Err(TransformError::new(format!("HTTPExport to {url}: {failure}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::envelope::CONTENT_TYPE_JSON;

    #[tokio::test]
    async fn unresolved_url_placeholder_fails_without_persisting() {
        let mut ctx = Context::new("corr", CONTENT_TYPE_JSON);
        let export = HttpExport::new(Method::POST, "http://sink/{missing}", "application/json");
        let err = export
            .run(&mut ctx, PipelineData::Bytes(b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
        assert!(ctx.retry_data().is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_persists_when_configured() {
        let mut ctx = Context::new("corr", CONTENT_TYPE_JSON);
        // Reserved port on localhost, nothing listens there.
        let export = HttpExport::new(Method::POST, "http://127.0.0.1:1/events", "text/plain")
            .with_persist_on_error(true);
        let result = export
            .run(&mut ctx, PipelineData::Bytes(b"payload".to_vec()))
            .await;
        assert!(result.is_err());
        assert_eq!(ctx.retry_data(), Some(b"payload".as_slice()));
    }

    #[test]
    fn from_params_requires_method_url_mimetype() {
        use crate::secrets::InMemorySecretProvider;
        let secrets = InMemorySecretProvider::new();
        let mut params = HashMap::new();
        params.insert("method".to_string(), "post".to_string());
        params.insert("url".to_string(), "http://sink".to_string());
        assert!(HttpExport::from_params(&params, &secrets).is_err());
        params.insert("mimetype".to_string(), "application/json".to_string());
        assert!(HttpExport::from_params(&params, &secrets).is_ok());
    }
}
