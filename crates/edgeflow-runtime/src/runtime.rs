//! Pipeline container and execution engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use edgeflow_core::codec::{self, PayloadFormat};
use edgeflow_core::context::{
    Context, KEY_DEVICE_NAME, KEY_PIPELINE_ID, KEY_PROFILE_NAME, KEY_RECEIVED_TOPIC,
    KEY_SOURCE_NAME,
};
use edgeflow_core::envelope::MessageEnvelope;
use edgeflow_core::event::{AddEventRequest, Event};
use edgeflow_core::CoreError;
use edgeflow_store::{RetryExecutor, StoreForward, StoredObject};

use crate::data::{PipelineData, TargetType};
use crate::error::{Result, RuntimeError};
use crate::pipeline::{FunctionPipeline, DEFAULT_PIPELINE_ID};

/// The pipeline runtime.
///
/// Holds the pipeline map (read-mostly, write-rare; every access copies
/// under the mutex so a concurrent reconfiguration can never mutate a
/// transform list mid-run) and routes transform failures into
/// store-and-forward.
pub struct Runtime {
    target_type: RwLock<TargetType>,
    pipelines: Mutex<HashMap<String, FunctionPipeline>>,
    store_forward: RwLock<Option<Arc<StoreForward>>>,
}

impl Runtime {
    pub fn new(target_type: TargetType) -> Self {
        Self {
            target_type: RwLock::new(target_type),
            pipelines: Mutex::new(HashMap::new()),
            store_forward: RwLock::new(None),
        }
    }

    /// Replace the target type. Takes effect for subsequent messages.
    pub fn set_target_type(&self, target_type: TargetType) {
        *self.target_type.write() = target_type;
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type.read().clone()
    }

    /// Attach the store-and-forward engine used for failure retention.
    pub fn set_store_forward(&self, store_forward: Arc<StoreForward>) {
        *self.store_forward.write() = Some(store_forward);
    }

    /// Register a pipeline. Ids must be unique within the service.
    pub fn add_pipeline(&self, pipeline: FunctionPipeline) -> Result<()> {
        let mut pipelines = self.pipelines.lock();
        if pipelines.contains_key(pipeline.id()) {
            return Err(RuntimeError::DuplicatePipeline(pipeline.id().to_string()));
        }
        pipelines.insert(pipeline.id().to_string(), pipeline);
        Ok(())
    }

    /// Register or replace the default pipeline.
    pub fn set_default_pipeline(&self, pipeline: FunctionPipeline) {
        let mut pipelines = self.pipelines.lock();
        pipelines.insert(DEFAULT_PIPELINE_ID.to_string(), pipeline);
    }

    /// Atomically replace the whole pipeline set. Used by config reload.
    pub fn replace_pipelines(&self, new_pipelines: Vec<FunctionPipeline>) -> Result<()> {
        let mut map = HashMap::with_capacity(new_pipelines.len());
        for pipeline in new_pipelines {
            if map.contains_key(pipeline.id()) {
                return Err(RuntimeError::DuplicatePipeline(pipeline.id().to_string()));
            }
            map.insert(pipeline.id().to_string(), pipeline);
        }
        *self.pipelines.lock() = map;
        Ok(())
    }

    /// Clear every pipeline's transforms.
    ///
    /// Called after a failed live-reload so subsequent executions surface
    /// the configuration fault immediately.
    pub fn clear_all_transforms(&self) {
        let mut pipelines = self.pipelines.lock();
        for pipeline in pipelines.values_mut() {
            pipeline.set_transforms(Vec::new());
        }
    }

    /// Copy of the named pipeline, taken under the lock.
    pub fn pipeline(&self, id: &str) -> Option<FunctionPipeline> {
        self.pipelines.lock().get(id).cloned()
    }

    /// Copy of the default pipeline, if one is registered.
    pub fn default_pipeline(&self) -> Option<FunctionPipeline> {
        self.pipeline(DEFAULT_PIPELINE_ID)
    }

    /// Ids of all registered pipelines.
    pub fn pipeline_ids(&self) -> Vec<String> {
        self.pipelines.lock().keys().cloned().collect()
    }

    /// Every pipeline with at least one pattern matching the topic.
    pub fn get_matching_pipelines(&self, topic: &str) -> Vec<FunctionPipeline> {
        self.pipelines
            .lock()
            .values()
            .filter(|p| p.matches_topic(topic))
            .cloned()
            .collect()
    }

    /// Decode an envelope's payload against the configured target type.
    ///
    /// A fresh value is produced per message; target types are carried as
    /// descriptors, never reused instances.
    pub fn decode_message(&self, envelope: &MessageEnvelope) -> Result<PipelineData> {
        match self.target_type() {
            TargetType::Bytes => Ok(PipelineData::Bytes(envelope.payload.clone())),
            TargetType::Custom(decoder) => {
                let format = codec::payload_format(&envelope.content_type)?;
                Ok(decoder.decode(&envelope.payload, format)?)
            }
            TargetType::Event => {
                let format = codec::payload_format(&envelope.content_type)?;
                decode_event(&envelope.payload, format)
                    .map(PipelineData::Event)
                    .map_err(RuntimeError::Core)
            }
        }
    }

    /// Decode and run a single pipeline from position zero.
    pub async fn process_message(
        &self,
        ctx: &mut Context,
        envelope: &MessageEnvelope,
        pipeline: &FunctionPipeline,
    ) -> Result<()> {
        debug!(
            pipeline_id = pipeline.id(),
            correlation_id = envelope.correlation_id,
            topic = envelope.received_topic,
            "processing message"
        );
        let target = self.decode_message(envelope)?;
        ctx.add_value(KEY_RECEIVED_TOPIC, &envelope.received_topic);
        self.execute_pipeline(target, &envelope.content_type, ctx, pipeline, 0, false)
            .await
    }

    /// Execute a pipeline's transforms from `start_pos`.
    ///
    /// On transform failure with retry data present (and outside a retry
    /// invocation) the payload is handed to store-and-forward together
    /// with the pipeline id, failing position, and the pipeline hash.
    pub async fn execute_pipeline(
        &self,
        target: PipelineData,
        content_type: &str,
        ctx: &mut Context,
        pipeline: &FunctionPipeline,
        start_pos: usize,
        is_retry: bool,
    ) -> Result<()> {
        // Fresh execution state before the first transform runs.
        ctx.set_input_content_type(content_type);
        ctx.clear_retry_data();
        ctx.add_value(KEY_PIPELINE_ID, pipeline.id());
        if let PipelineData::Event(event) = &target {
            ctx.add_value(KEY_DEVICE_NAME, &event.device_name);
            ctx.add_value(KEY_PROFILE_NAME, &event.profile_name);
            ctx.add_value(KEY_SOURCE_NAME, &event.source_name);
        }

        let mut data = target;
        for (position, transform) in pipeline.transforms().iter().enumerate().skip(start_pos) {
            match transform.run(ctx, data).await {
                Ok(Some(next)) => data = next,
                Ok(None) => {
                    debug!(
                        pipeline_id = pipeline.id(),
                        transform = transform.name(),
                        position,
                        "pipeline short-circuited"
                    );
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        pipeline_id = pipeline.id(),
                        transform = transform.name(),
                        position,
                        correlation_id = ctx.correlation_id(),
                        error = %e,
                        "transform failed"
                    );
                    if !is_retry {
                        self.route_to_store_forward(ctx, pipeline, position);
                    }
                    return Err(RuntimeError::PipelineFailure {
                        pipeline_id: pipeline.id().to_string(),
                        transform_name: transform.name().to_string(),
                        position,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn route_to_store_forward(&self, ctx: &Context, pipeline: &FunctionPipeline, position: usize) {
        let Some(retry_payload) = ctx.retry_data().map(<[u8]>::to_vec) else {
            return;
        };
        let store_forward = self.store_forward.read().clone();
        match store_forward {
            Some(sf) => {
                sf.store_for_later(pipeline.id(), pipeline.hash(), position, retry_payload, ctx)
            }
            None => warn!(
                pipeline_id = pipeline.id(),
                "transform left retry data but no store-and-forward engine is attached"
            ),
        }
    }
}

/// Decode an Event payload, accepting either an `AddEventRequest` wrapper
/// or a bare `Event`.
///
/// When both attempts fail the error from the `AddEventRequest` attempt is
/// reported, as the more specific schema.
fn decode_event(payload: &[u8], format: PayloadFormat) -> std::result::Result<Event, CoreError> {
    let decode_add = || -> std::result::Result<AddEventRequest, CoreError> {
        match format {
            PayloadFormat::Json => codec::decode_json(payload),
            PayloadFormat::Cbor => codec::decode_cbor(payload),
        }
    };
    let add_error = match decode_add() {
        Ok(request) => match request.validate() {
            Ok(()) => return Ok(request.event),
            Err(e) => e,
        },
        Err(e) => e,
    };

    let decode_bare = || -> std::result::Result<Event, CoreError> {
        match format {
            PayloadFormat::Json => codec::decode_json(payload),
            PayloadFormat::Cbor => codec::decode_cbor(payload),
        }
    };
    match decode_bare().and_then(|event| event.validate().map(|()| event)) {
        Ok(event) => Ok(event),
        Err(_) => Err(add_error),
    }
}

#[async_trait]
impl RetryExecutor for Runtime {
    fn pipeline_hash(&self, pipeline_id: &str) -> Option<String> {
        self.pipeline(pipeline_id).map(|p| p.hash().to_string())
    }

    async fn execute_retry(&self, object: &StoredObject) -> std::result::Result<(), String> {
        let pipeline = self
            .pipeline(&object.pipeline_id)
            .ok_or_else(|| format!("pipeline not found: {}", object.pipeline_id))?;

        let mut ctx = Context::new(&object.correlation_id, "");
        ctx.restore_values(object.context_data.clone());

        self.execute_pipeline(
            PipelineData::Bytes(object.payload.clone()),
            "",
            &mut ctx,
            &pipeline,
            object.pipeline_position,
            true,
        )
        .await
        .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Transform, TransformError, TransformResult};
    use edgeflow_core::config::StoreAndForwardConfig;
    use edgeflow_core::envelope::CONTENT_TYPE_JSON;
    use edgeflow_store::{MemoryStoreClient, StoreClient};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Passthrough;

    #[async_trait]
    impl Transform for Passthrough {
        fn name(&self) -> &str {
            "Passthrough"
        }

        async fn run(&self, _ctx: &mut Context, input: PipelineData) -> TransformResult {
            Ok(Some(input))
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Transform for ShortCircuit {
        fn name(&self) -> &str {
            "ShortCircuit"
        }

        async fn run(&self, _ctx: &mut Context, _input: PipelineData) -> TransformResult {
            Ok(None)
        }
    }

    /// Fails every call, opting the payload into retention first.
    struct FailingExport {
        calls: AtomicUsize,
    }

    impl FailingExport {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transform for FailingExport {
        fn name(&self) -> &str {
            "FailingExport"
        }

        async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.set_retry_data(input.to_bytes()?);
            Err(TransformError::new("endpoint unreachable"))
        }
    }

    /// Records the well-known context keys as seen by the first transform.
    struct KeyProbe {
        seen: parking_lot::Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl Transform for KeyProbe {
        fn name(&self) -> &str {
            "KeyProbe"
        }

        async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
            *self.seen.lock() = ctx.values().clone();
            Ok(Some(input))
        }
    }

    fn sample_event() -> Event {
        let mut event = Event::new("profA", "DevA", "sourceX");
        event.add_simple_reading("Temperature", "Int64", "72");
        event
    }

    fn event_envelope(event: &Event) -> MessageEnvelope {
        MessageEnvelope::new(serde_json::to_vec(event).unwrap(), CONTENT_TYPE_JSON)
            .with_received_topic("edgeflow/events/profA/DevA/sourceX")
    }

    fn runtime_with_default(transforms: Vec<Arc<dyn Transform>>) -> Runtime {
        let runtime = Runtime::new(TargetType::Event);
        runtime.set_default_pipeline(FunctionPipeline::new_default(transforms));
        runtime
    }

    #[tokio::test]
    async fn test_decode_bare_event() {
        let runtime = runtime_with_default(vec![Arc::new(Passthrough)]);
        let envelope = event_envelope(&sample_event());
        let data = runtime.decode_message(&envelope).unwrap();
        assert_eq!(data.as_event().unwrap().device_name, "DevA");
    }

    #[tokio::test]
    async fn test_decode_add_event_request() {
        let runtime = runtime_with_default(vec![Arc::new(Passthrough)]);
        let request = AddEventRequest::new(sample_event());
        let envelope =
            MessageEnvelope::new(serde_json::to_vec(&request).unwrap(), CONTENT_TYPE_JSON);
        let data = runtime.decode_message(&envelope).unwrap();
        assert_eq!(data.as_event().unwrap().device_name, "DevA");
    }

    #[tokio::test]
    async fn test_decode_malformed_is_400() {
        let runtime = runtime_with_default(vec![Arc::new(Passthrough)]);
        let envelope = MessageEnvelope::new(b"not json at all".to_vec(), CONTENT_TYPE_JSON);
        let err = runtime.decode_message(&envelope).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_decode_invalid_event_is_500() {
        let runtime = runtime_with_default(vec![Arc::new(Passthrough)]);
        // Well-formed JSON that satisfies neither schema's validation.
        let envelope =
            MessageEnvelope::new(b"{\"deviceName\":\"\",\"profileName\":\"\",\"sourceName\":\"\"}".to_vec(), CONTENT_TYPE_JSON);
        let err = runtime.decode_message(&envelope).unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_decode_unsupported_content_type() {
        let runtime = runtime_with_default(vec![Arc::new(Passthrough)]);
        let envelope = MessageEnvelope::new(b"whatever".to_vec(), "text/plain");
        let err = runtime.decode_message(&envelope).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_bytes_target_skips_content_type_check() {
        let runtime = Runtime::new(TargetType::Bytes);
        runtime.set_default_pipeline(FunctionPipeline::new_default(vec![Arc::new(Passthrough)]));
        let envelope = MessageEnvelope::new(vec![0xDE, 0xAD], "application/octet-stream");
        let data = runtime.decode_message(&envelope).unwrap();
        assert!(matches!(data, PipelineData::Bytes(b) if b == vec![0xDE, 0xAD]));
    }

    #[tokio::test]
    async fn test_well_known_keys_before_first_transform() {
        let probe = Arc::new(KeyProbe {
            seen: parking_lot::Mutex::new(HashMap::new()),
        });
        let runtime = runtime_with_default(vec![probe.clone()]);
        let envelope = event_envelope(&sample_event());
        let mut ctx = Context::from_envelope(&envelope);
        let pipeline = runtime.default_pipeline().unwrap();
        runtime
            .process_message(&mut ctx, &envelope, &pipeline)
            .await
            .unwrap();

        let seen = probe.seen.lock();
        assert_eq!(
            seen.get(KEY_RECEIVED_TOPIC).unwrap(),
            "edgeflow/events/profA/DevA/sourceX"
        );
        assert_eq!(seen.get(KEY_PIPELINE_ID).unwrap(), DEFAULT_PIPELINE_ID);
        assert_eq!(seen.get(KEY_DEVICE_NAME).unwrap(), "DevA");
        assert_eq!(seen.get(KEY_PROFILE_NAME).unwrap(), "profA");
        assert_eq!(seen.get(KEY_SOURCE_NAME).unwrap(), "sourceX");
    }

    #[tokio::test]
    async fn test_short_circuit_ends_successfully() {
        let failing: Arc<dyn Transform> = Arc::new(FailingExport::new());
        let runtime =
            runtime_with_default(vec![Arc::new(ShortCircuit), failing]);
        let envelope = event_envelope(&sample_event());
        let mut ctx = Context::from_envelope(&envelope);
        let pipeline = runtime.default_pipeline().unwrap();
        // The failing transform after the short-circuit never runs.
        runtime
            .process_message(&mut ctx, &envelope, &pipeline)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failure_is_422_and_stores_for_retry() {
        let client = Arc::new(MemoryStoreClient::new());
        let store_forward = Arc::new(StoreForward::new(
            client.clone(),
            "app-test",
            StoreAndForwardConfig {
                enabled: true,
                retry_interval: "1s".to_string(),
                max_retry_count: 3,
            },
        ));

        let runtime = runtime_with_default(vec![Arc::new(Passthrough), Arc::new(FailingExport::new())]);
        runtime.set_store_forward(store_forward);

        let envelope = event_envelope(&sample_event());
        let mut ctx = Context::from_envelope(&envelope);
        let pipeline = runtime.default_pipeline().unwrap();
        let err = runtime
            .process_message(&mut ctx, &envelope, &pipeline)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 422);

        let stored = client.retrieve_from_store("app-test").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pipeline_id, DEFAULT_PIPELINE_ID);
        assert_eq!(stored[0].pipeline_position, 1);
        assert_eq!(stored[0].version, pipeline.hash());
        assert_eq!(stored[0].correlation_id, envelope.correlation_id);
    }

    #[tokio::test]
    async fn test_retry_failure_does_not_restore() {
        let client = Arc::new(MemoryStoreClient::new());
        let store_forward = Arc::new(StoreForward::new(
            client.clone(),
            "app-test",
            StoreAndForwardConfig {
                enabled: true,
                retry_interval: "1s".to_string(),
                max_retry_count: 3,
            },
        ));

        let failing = Arc::new(FailingExport::new());
        let runtime = runtime_with_default(vec![failing.clone()]);
        runtime.set_store_forward(store_forward);
        let pipeline = runtime.default_pipeline().unwrap();

        let object = StoredObject::new(
            "app-test",
            b"payload".to_vec(),
            DEFAULT_PIPELINE_ID,
            0,
            pipeline.hash(),
            "corr-9",
            HashMap::new(),
        );
        let result = runtime.execute_retry(&object).await;
        assert!(result.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        // is_retry suppresses re-storing on failure.
        assert!(client.retrieve_from_store("app-test").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_pipeline_id_rejected() {
        let runtime = Runtime::new(TargetType::Event);
        runtime
            .add_pipeline(FunctionPipeline::new(
                "p1",
                vec!["a/#".to_string()],
                vec![Arc::new(Passthrough)],
            ))
            .unwrap();
        let err = runtime
            .add_pipeline(FunctionPipeline::new(
                "p1",
                vec!["b/#".to_string()],
                vec![Arc::new(Passthrough)],
            ))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicatePipeline(_)));
    }

    #[tokio::test]
    async fn test_get_matching_pipelines() {
        let runtime = Runtime::new(TargetType::Event);
        runtime.set_default_pipeline(FunctionPipeline::new_default(vec![Arc::new(Passthrough)]));
        runtime
            .add_pipeline(FunctionPipeline::new(
                "p1",
                vec!["edgeflow/events/#/D1/#".to_string()],
                vec![Arc::new(Passthrough)],
            ))
            .unwrap();

        let matched = runtime.get_matching_pipelines("edgeflow/events/profA/D1/sourceX");
        assert_eq!(matched.len(), 2);

        let matched = runtime.get_matching_pipelines("edgeflow/events/profA/D2/sourceX");
        assert_eq!(matched.len(), 1);
        assert!(matched[0].is_default());
    }

    #[tokio::test]
    async fn test_clear_all_transforms() {
        let runtime = runtime_with_default(vec![Arc::new(Passthrough)]);
        let before = runtime.default_pipeline().unwrap().hash().to_string();
        runtime.clear_all_transforms();
        let pipeline = runtime.default_pipeline().unwrap();
        assert!(pipeline.transforms().is_empty());
        assert_ne!(pipeline.hash(), before);
    }
}
