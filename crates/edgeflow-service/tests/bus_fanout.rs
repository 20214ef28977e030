//! End-to-end message bus scenario: one inbound event matching two
//! pipelines produces two published responses with the same
//! correlation id.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use edgeflow_core::config::TriggerConfig;
use edgeflow_core::{AddEventRequest, Event, MessageEnvelope, CONTENT_TYPE_JSON};
use edgeflow_runtime::{FunctionPipeline, Runtime, TargetType, Transform};
use edgeflow_transforms::SetResponseData;
use edgeflow_triggers::{BusTrigger, InProcessBus, MessageBusClient, Trigger, TriggerContext};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn event_fans_out_to_matching_pipelines() {
    let runtime = Arc::new(Runtime::new(TargetType::Event));
    let respond: Vec<Arc<dyn Transform>> = vec![Arc::new(SetResponseData::new(None))];
    runtime
        .replace_pipelines(vec![
            FunctionPipeline::new_default(respond.clone()),
            FunctionPipeline::new(
                "device-d1",
                vec!["edgex/events/#/D1/#".to_string()],
                respond,
            ),
        ])
        .unwrap();

    let bus = InProcessBus::default();

    // Observe the trigger's publish side before any traffic flows.
    let (mut outputs, _errors) = bus
        .subscribe(&["processed".to_string()])
        .await
        .unwrap();
    let mut processed = outputs.remove(0);

    let config = TriggerConfig {
        subscribe_topics: "edgex/events/#".to_string(),
        publish_topic: "processed".to_string(),
        ..Default::default()
    };
    let mut trigger = BusTrigger::new(Arc::new(bus.clone()), &config);
    let token = CancellationToken::new();
    let _cleanup = trigger
        .initialize(TriggerContext {
            token: token.clone(),
            runtime,
            background: None,
        })
        .await
        .unwrap();

    let mut event = Event::new("profA", "D1", "sourceX");
    event.add_simple_reading("Temperature", "Int64", "72");
    let payload = serde_json::to_vec(&AddEventRequest::new(event)).unwrap();
    let envelope = MessageEnvelope::new(payload, CONTENT_TYPE_JSON)
        .with_correlation_id("corr-fanout");
    bus.publish(envelope, "edgex/events/profA/D1/sourceX")
        .await
        .unwrap();

    // Both the default pipeline and the per-topic one match the topic.
    let first = timeout(RECV_TIMEOUT, processed.receiver.recv())
        .await
        .expect("first response")
        .expect("channel open");
    let second = timeout(RECV_TIMEOUT, processed.receiver.recv())
        .await
        .expect("second response")
        .expect("channel open");

    for published in [&first, &second] {
        assert_eq!(published.correlation_id, "corr-fanout");
        assert_eq!(published.received_topic, "processed");
        // The response handler infers the content type of the raw
        // response bytes; serialized events are JSON.
        assert_eq!(published.content_type, CONTENT_TYPE_JSON);
        let event: Event = serde_json::from_slice(&published.payload).unwrap();
        assert_eq!(event.device_name, "D1");
    }

    token.cancel();
}

#[tokio::test]
async fn non_matching_topic_reaches_only_the_default_pipeline() {
    let runtime = Arc::new(Runtime::new(TargetType::Event));
    let respond: Vec<Arc<dyn Transform>> = vec![Arc::new(SetResponseData::new(None))];
    runtime
        .replace_pipelines(vec![
            FunctionPipeline::new_default(respond.clone()),
            FunctionPipeline::new(
                "device-d1",
                vec!["edgex/events/#/D1/#".to_string()],
                respond,
            ),
        ])
        .unwrap();

    let bus = InProcessBus::default();
    let (mut outputs, _errors) = bus
        .subscribe(&["processed".to_string()])
        .await
        .unwrap();
    let mut processed = outputs.remove(0);

    let config = TriggerConfig {
        subscribe_topics: "edgex/events/#".to_string(),
        publish_topic: "processed".to_string(),
        ..Default::default()
    };
    let mut trigger = BusTrigger::new(Arc::new(bus.clone()), &config);
    let token = CancellationToken::new();
    let _cleanup = trigger
        .initialize(TriggerContext {
            token: token.clone(),
            runtime,
            background: None,
        })
        .await
        .unwrap();

    let mut event = Event::new("profA", "D2", "sourceX");
    event.add_simple_reading("Temperature", "Int64", "70");
    let payload = serde_json::to_vec(&AddEventRequest::new(event)).unwrap();
    let envelope = MessageEnvelope::new(payload, CONTENT_TYPE_JSON)
        .with_correlation_id("corr-single");
    bus.publish(envelope, "edgex/events/profA/D2/sourceX")
        .await
        .unwrap();

    let only = timeout(RECV_TIMEOUT, processed.receiver.recv())
        .await
        .expect("one response")
        .expect("channel open");
    assert_eq!(only.correlation_id, "corr-single");

    // No second pipeline matched, so nothing else arrives.
    let extra = timeout(Duration::from_millis(200), processed.receiver.recv()).await;
    assert!(extra.is_err());

    token.cancel();
}
