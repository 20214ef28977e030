//! Multi-pipeline dispatch.
//!
//! Triggers that fan one message out to every matching pipeline call
//! [`message_received`]. Transport-specific publish logic is passed in as
//! a [`ResponseHandler`] so the dispatch core knows nothing about
//! transports.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

use edgeflow_core::context::Context;
use edgeflow_core::envelope::MessageEnvelope;

use crate::error::{Result, RuntimeError};
use crate::pipeline::FunctionPipeline;
use crate::runtime::Runtime;

/// Invoked after a pipeline completes successfully, with the pipeline and
/// the context it ran against.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle(
        &self,
        pipeline: &FunctionPipeline,
        ctx: &Context,
    ) -> std::result::Result<(), String>;
}

/// Dispatch one message to every pipeline matching its received topic.
///
/// Each pipeline runs in its own task against a clone of the context.
/// Blocks until every pipeline finishes; pipeline and response-handler
/// errors are accumulated into a combined error. Returns the number of
/// pipelines that ran.
pub async fn message_received(
    runtime: Arc<Runtime>,
    ctx: &Context,
    envelope: MessageEnvelope,
    handler: Arc<dyn ResponseHandler>,
) -> Result<usize> {
    let pipelines = runtime.get_matching_pipelines(&envelope.received_topic);
    debug!(
        topic = envelope.received_topic,
        correlation_id = envelope.correlation_id,
        count = pipelines.len(),
        "dispatching message to matching pipelines"
    );
    if pipelines.is_empty() {
        return Ok(0);
    }
    let count = pipelines.len();

    let mut tasks = Vec::with_capacity(count);
    for pipeline in pipelines {
        let runtime = runtime.clone();
        let mut ctx = ctx.clone();
        let envelope = envelope.clone();
        let handler = handler.clone();
        tasks.push(tokio::spawn(async move {
            match runtime.process_message(&mut ctx, &envelope, &pipeline).await {
                Ok(()) => handler
                    .handle(&pipeline, &ctx)
                    .await
                    .map_err(|e| format!("pipeline {}: response handler: {}", pipeline.id(), e)),
                Err(e) => Err(format!("pipeline {}: {}", pipeline.id(), e)),
            }
        }));
    }

    let mut errors = Vec::new();
    for outcome in join_all(tasks).await {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(message)) => errors.push(message),
            Err(join_error) => errors.push(format!("pipeline task panicked: {}", join_error)),
        }
    }

    if errors.is_empty() {
        Ok(count)
    } else {
        Err(RuntimeError::Combined(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PipelineData, TargetType, Transform, TransformError, TransformResult};
    use edgeflow_core::envelope::CONTENT_TYPE_JSON;
    use edgeflow_core::event::Event;
    use parking_lot::Mutex;

    struct SetResponse;

    #[async_trait]
    impl Transform for SetResponse {
        fn name(&self) -> &str {
            "SetResponse"
        }

        async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
            ctx.set_response_data(input.to_bytes()?);
            Ok(Some(input))
        }
    }

    struct Failing;

    #[async_trait]
    impl Transform for Failing {
        fn name(&self) -> &str {
            "Failing"
        }

        async fn run(&self, _ctx: &mut Context, _input: PipelineData) -> TransformResult {
            Err(TransformError::new("boom"))
        }
    }

    #[derive(Default)]
    struct Collector {
        handled: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResponseHandler for Collector {
        async fn handle(
            &self,
            pipeline: &FunctionPipeline,
            ctx: &Context,
        ) -> std::result::Result<(), String> {
            self.handled
                .lock()
                .push((pipeline.id().to_string(), ctx.correlation_id().to_string()));
            Ok(())
        }
    }

    fn event_envelope(topic: &str) -> MessageEnvelope {
        let mut event = Event::new("profA", "D1", "sourceX");
        event.add_simple_reading("Temperature", "Int64", "72");
        MessageEnvelope::new(serde_json::to_vec(&event).unwrap(), CONTENT_TYPE_JSON)
            .with_received_topic(topic)
    }

    #[tokio::test]
    async fn test_dispatch_runs_every_matching_pipeline() {
        let runtime = Arc::new(Runtime::new(TargetType::Event));
        runtime.set_default_pipeline(crate::FunctionPipeline::new_default(vec![Arc::new(
            SetResponse,
        )]));
        runtime
            .add_pipeline(FunctionPipeline::new(
                "P1",
                vec!["edgeflow/events/#/D1/#".to_string()],
                vec![Arc::new(SetResponse)],
            ))
            .unwrap();

        let envelope = event_envelope("edgeflow/events/profA/D1/sourceX");
        let ctx = Context::from_envelope(&envelope);
        let handler = Arc::new(Collector::default());

        let count = message_received(runtime, &ctx, envelope.clone(), handler.clone())
            .await
            .unwrap();
        assert_eq!(count, 2);

        let handled = handler.handled.lock();
        assert_eq!(handled.len(), 2);
        // Both pipelines carry the same correlation id.
        assert!(handled.iter().all(|(_, c)| *c == envelope.correlation_id));
        let mut ids: Vec<&str> = handled.iter().map(|(id, _)| id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["P1", "default"]);
    }

    #[tokio::test]
    async fn test_dispatch_combines_errors() {
        let runtime = Arc::new(Runtime::new(TargetType::Event));
        runtime.set_default_pipeline(crate::FunctionPipeline::new_default(vec![Arc::new(
            SetResponse,
        )]));
        runtime
            .add_pipeline(FunctionPipeline::new(
                "bad",
                vec!["#".to_string()],
                vec![Arc::new(Failing)],
            ))
            .unwrap();

        let envelope = event_envelope("any/topic");
        let ctx = Context::from_envelope(&envelope);
        let handler = Arc::new(Collector::default());

        let err = message_received(runtime, &ctx, envelope, handler.clone())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad"));
        // The healthy pipeline still completed and was handled.
        assert_eq!(handler.handled.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_no_matches_is_ok() {
        let runtime = Arc::new(Runtime::new(TargetType::Event));
        runtime
            .add_pipeline(FunctionPipeline::new(
                "narrow",
                vec!["only/this".to_string()],
                vec![Arc::new(SetResponse)],
            ))
            .unwrap();

        let envelope = event_envelope("something/else");
        let ctx = Context::from_envelope(&envelope);
        let count = message_received(runtime, &ctx, envelope, Arc::new(Collector::default()))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_dispatch_clones_context_per_pipeline() {
        struct Mutator;

        #[async_trait]
        impl Transform for Mutator {
            fn name(&self) -> &str {
                "Mutator"
            }

            async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
                ctx.add_value("scratch", "mutated");
                Ok(Some(input))
            }
        }

        let runtime = Arc::new(Runtime::new(TargetType::Event));
        runtime.set_default_pipeline(crate::FunctionPipeline::new_default(vec![Arc::new(
            Mutator,
        )]));

        let envelope = event_envelope("t");
        let ctx = Context::from_envelope(&envelope);
        message_received(runtime, &ctx, envelope, Arc::new(Collector::default()))
            .await
            .unwrap();
        // The caller's context is untouched.
        assert_eq!(ctx.value("scratch"), None);
    }
}
