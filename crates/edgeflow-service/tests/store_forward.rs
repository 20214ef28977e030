//! End-to-end store-and-forward scenarios: a failing export is retained,
//! retried, and either delivered or aged out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use edgeflow_core::config::StoreAndForwardConfig;
use edgeflow_core::{Context, MessageEnvelope, CONTENT_TYPE_JSON};
use edgeflow_runtime::{
    FunctionPipeline, PipelineData, Runtime, TargetType, Transform, TransformError,
    TransformResult,
};
use edgeflow_store::{MemoryStoreClient, StoreClient, StoreForward};

/// Export stand-in that fails a fixed number of times before delivering.
struct FlakyExport {
    failures_remaining: AtomicUsize,
    deliveries: AtomicUsize,
}

impl FlakyExport {
    fn new(failures: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(failures),
            deliveries: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transform for FlakyExport {
    fn name(&self) -> &str {
        "FlakyExport"
    }

    async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
        let payload = input.to_bytes()?;
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            ctx.set_retry_data(payload);
            return Err(TransformError::new("endpoint unreachable"));
        }
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        Ok(Some(input))
    }
}

fn retry_config(max_retry_count: i64) -> StoreAndForwardConfig {
    StoreAndForwardConfig {
        enabled: true,
        retry_interval: "1s".to_string(),
        max_retry_count,
    }
}

fn setup(
    export: Arc<FlakyExport>,
    max_retry_count: i64,
) -> (Arc<Runtime>, Arc<MemoryStoreClient>, Arc<StoreForward>) {
    let runtime = Arc::new(Runtime::new(TargetType::Bytes));
    runtime.set_default_pipeline(FunctionPipeline::new_default(vec![
        export as Arc<dyn Transform>,
    ]));

    let client = Arc::new(MemoryStoreClient::new());
    let store_forward = Arc::new(StoreForward::new(
        client.clone(),
        "app-test",
        retry_config(max_retry_count),
    ));
    runtime.set_store_forward(store_forward.clone());
    (runtime, client, store_forward)
}

async fn run_once(runtime: &Runtime) -> Result<(), edgeflow_runtime::RuntimeError> {
    let envelope = MessageEnvelope::new(b"{\"temperature\":72}".to_vec(), CONTENT_TYPE_JSON)
        .with_correlation_id("corr-sf");
    let mut ctx = Context::from_envelope(&envelope);
    let pipeline = runtime.default_pipeline().unwrap();
    runtime.process_message(&mut ctx, &envelope, &pipeline).await
}

#[tokio::test]
async fn failed_export_is_stored_and_delivered_on_retry() {
    let export = Arc::new(FlakyExport::new(1));
    let (runtime, client, store_forward) = setup(export.clone(), 3);

    assert!(run_once(&runtime).await.is_err());

    let stored = client.retrieve_from_store("app-test").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].payload, b"{\"temperature\":72}");
    assert_eq!(stored[0].retry_count, 0);
    assert_eq!(stored[0].correlation_id, "corr-sf");

    // The endpoint recovered; the next tick delivers and removes.
    store_forward.retry_once(runtime.as_ref()).await;

    assert_eq!(export.deliveries.load(Ordering::SeqCst), 1);
    assert!(client.retrieve_from_store("app-test").unwrap().is_empty());
}

#[tokio::test]
async fn item_is_aged_out_after_max_retries() {
    let export = Arc::new(FlakyExport::new(usize::MAX));
    let (runtime, client, store_forward) = setup(export.clone(), 3);

    assert!(run_once(&runtime).await.is_err());

    // Three failed retries keep the item, counting each attempt.
    for expected_count in 1..=3 {
        store_forward.retry_once(runtime.as_ref()).await;
        let stored = client.retrieve_from_store("app-test").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].retry_count, expected_count);
    }

    // The fourth failure exceeds the limit and removes the item.
    store_forward.retry_once(runtime.as_ref()).await;
    assert!(client.retrieve_from_store("app-test").unwrap().is_empty());
    assert_eq!(export.deliveries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stored_item_is_dropped_after_pipeline_reconfiguration() {
    let export = Arc::new(FlakyExport::new(usize::MAX));
    let (runtime, client, store_forward) = setup(export.clone(), 3);

    assert!(run_once(&runtime).await.is_err());
    assert_eq!(client.retrieve_from_store("app-test").unwrap().len(), 1);

    // Swapping the transform list changes the pipeline hash, so the
    // retained item no longer matches and is discarded unexecuted.
    let replacement = Arc::new(FlakyExport::new(0));
    runtime.set_default_pipeline(FunctionPipeline::new_default(vec![
        replacement.clone() as Arc<dyn Transform>,
        Arc::new(FlakyExport::new(0)),
    ]));
    store_forward.retry_once(runtime.as_ref()).await;

    assert!(client.retrieve_from_store("app-test").unwrap().is_empty());
    assert_eq!(replacement.deliveries.load(Ordering::SeqCst), 0);
}
