//! HTTP trigger.
//!
//! One POST endpoint at the configured trigger path. Each request runs the
//! default pipeline only; per-topic fan-out is a message-bus concern.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tracing::{debug, error, info};
use uuid::Uuid;

use edgeflow_core::envelope::CONTENT_TYPE_JSON;
use edgeflow_core::{Context, MessageEnvelope};
use edgeflow_runtime::Runtime;

use crate::error::{Result, TriggerError};
use crate::{noop_cleanup, Trigger, TriggerCleanup, TriggerContext};

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Serves the trigger endpoint over HTTP.
pub struct HttpTrigger {
    bind_address: String,
    path: String,
}

impl HttpTrigger {
    pub fn new(bind_address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            path: path.into(),
        }
    }
}

#[derive(Clone)]
struct HttpState {
    runtime: Arc<Runtime>,
}

/// The trigger router; exposed for in-process testing.
pub fn router(runtime: Arc<Runtime>, path: &str) -> Router {
    Router::new()
        .route(path, post(handle_trigger))
        .with_state(HttpState { runtime })
}

async fn handle_trigger(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(CONTENT_TYPE_JSON)
        .to_string();
    let correlation_id = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let Some(pipeline) = state.runtime.default_pipeline() else {
        return respond(
            StatusCode::NOT_FOUND,
            &correlation_id,
            None,
            b"no default pipeline configured".to_vec(),
        );
    };

    let envelope = MessageEnvelope::new(body.to_vec(), content_type)
        .with_correlation_id(correlation_id.clone());
    let mut ctx = Context::from_envelope(&envelope);

    match state
        .runtime
        .process_message(&mut ctx, &envelope, &pipeline)
        .await
    {
        Ok(()) => {
            debug!(correlation_id = %correlation_id, "http trigger request processed");
            let response_type = match ctx.response_content_type() {
                "" => None,
                other => Some(other.to_string()),
            };
            let body = ctx.response_data().map(<[u8]>::to_vec).unwrap_or_default();
            respond(StatusCode::OK, &correlation_id, response_type.as_deref(), body)
        }
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "http trigger request failed");
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            respond(status, &correlation_id, None, e.to_string().into_bytes())
        }
    }
}

fn respond(
    status: StatusCode,
    correlation_id: &str,
    content_type: Option<&str>,
    body: Vec<u8>,
) -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        headers.insert(CORRELATION_HEADER, value);
    }
    if let Some(content_type) = content_type {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
    }
    (status, headers, body).into_response()
}

#[async_trait::async_trait]
impl Trigger for HttpTrigger {
    async fn initialize(&mut self, app: TriggerContext) -> Result<TriggerCleanup> {
        if app.background.is_some() {
            return Err(TriggerError::BackgroundUnsupported("HTTP"));
        }

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        let local = listener.local_addr()?;
        info!(address = %local, path = %self.path, "http trigger listening");

        let router = router(app.runtime, &self.path);
        let token = app.token.clone();
        tokio::spawn(async move {
            let shutdown = async move { token.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "http trigger server exited with error");
            }
        });

        Ok(noop_cleanup())
    }
}
