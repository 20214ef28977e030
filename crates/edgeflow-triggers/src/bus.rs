//! Message-bus trigger.
//!
//! The bus trigger subscribes one channel per configured topic pattern,
//! runs one worker per channel, and fans each message out to every
//! matching pipeline in its own task. A separate worker multiplexes
//! subscription errors and the optional background publisher.
//!
//! Two client implementations: an in-process broker for single-binary
//! deployments and tests, and an MQTT-backed client that wraps envelopes
//! as JSON on the wire so correlation ids and content types survive the
//! broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, Packet, QoS};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use edgeflow_core::config::{BrokerConfig, TriggerConfig};
use edgeflow_core::{topic_matches, Context, MessageEnvelope};
use edgeflow_runtime::{message_received, ResponseHandler, Runtime};

use crate::error::{Result, TriggerError};
use crate::{BackgroundMessage, Trigger, TriggerCleanup, TriggerContext};

const CHANNEL_CAPACITY: usize = 64;

/// One subscribed topic pattern and its message stream.
pub struct TopicChannel {
    pub topic: String,
    pub receiver: mpsc::Receiver<MessageEnvelope>,
}

/// Transport seam for the bus trigger.
#[async_trait]
pub trait MessageBusClient: Send + Sync {
    /// Establish the connection. Failure fails trigger initialize.
    async fn connect(&self) -> Result<()>;

    /// Subscribe one channel per topic pattern.
    ///
    /// Also returns a channel carrying asynchronous subscription errors.
    async fn subscribe(
        &self,
        topics: &[String],
    ) -> Result<(Vec<TopicChannel>, mpsc::Receiver<String>)>;

    /// Publish an envelope to a topic.
    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<()>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<()>;
}

/// In-process broker backed by a broadcast channel.
///
/// Clones share the broker; any clone can publish and subscribe.
#[derive(Clone)]
pub struct InProcessBus {
    sender: broadcast::Sender<MessageEnvelope>,
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

#[async_trait]
impl MessageBusClient for InProcessBus {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
    ) -> Result<(Vec<TopicChannel>, mpsc::Receiver<String>)> {
        let (error_tx, error_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut channels = Vec::with_capacity(topics.len());

        for pattern in topics {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            let mut bus_rx = self.sender.subscribe();
            let pattern_owned = pattern.clone();
            let error_tx = error_tx.clone();
            tokio::spawn(async move {
                loop {
                    match bus_rx.recv().await {
                        Ok(envelope) => {
                            if !topic_matches(&pattern_owned, &envelope.received_topic) {
                                continue;
                            }
                            if tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            let _ = error_tx
                                .send(format!(
                                    "subscription {pattern_owned} lagged, dropped {skipped} messages"
                                ))
                                .await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            channels.push(TopicChannel {
                topic: pattern.clone(),
                receiver: rx,
            });
        }

        Ok((channels, error_rx))
    }

    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<()> {
        let envelope = envelope.with_received_topic(topic);
        // No subscribers is not a failure.
        let _ = self.sender.send(envelope);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Route table shared between the MQTT event loop and subscribe calls.
type Routes = Arc<parking_lot::Mutex<Vec<(String, mpsc::Sender<MessageEnvelope>)>>>;

/// MQTT-backed bus client.
pub struct MqttBusClient {
    config: BrokerConfig,
    client: tokio::sync::Mutex<Option<AsyncClient>>,
    routes: Routes,
    errors: Arc<parking_lot::Mutex<Option<mpsc::Sender<String>>>>,
    poll_token: parking_lot::Mutex<Option<CancellationToken>>,
}

impl MqttBusClient {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            client: tokio::sync::Mutex::new(None),
            routes: Arc::new(parking_lot::Mutex::new(Vec::new())),
            errors: Arc::new(parking_lot::Mutex::new(None)),
            poll_token: parking_lot::Mutex::new(None),
        }
    }
}

/// Widen patterns the broker's subscription syntax cannot express.
///
/// An inner `#` level is our one-level wildcard; MQTT only allows `#` as
/// the final level, so such patterns subscribe to everything and filter
/// locally.
fn mqtt_subscription(pattern: &str) -> String {
    let levels: Vec<&str> = pattern.split('/').collect();
    let inner_wildcard = levels
        .iter()
        .enumerate()
        .any(|(i, level)| *level == "#" && i != levels.len() - 1);
    if inner_wildcard {
        "#".to_string()
    } else {
        pattern.to_string()
    }
}

/// Decode a wire payload into an envelope.
///
/// JSON-wrapped envelopes round-trip as-is; anything else is treated as a
/// raw payload with its content type inferred from the first byte.
fn envelope_from_wire(payload: &[u8], topic: &str) -> MessageEnvelope {
    if let Ok(envelope) = serde_json::from_slice::<MessageEnvelope>(payload) {
        if !envelope.correlation_id.is_empty() {
            return envelope.with_received_topic(topic);
        }
    }
    MessageEnvelope::new(payload.to_vec(), MessageEnvelope::infer_content_type(payload))
        .with_received_topic(topic)
}

#[async_trait]
impl MessageBusClient for MqttBusClient {
    async fn connect(&self) -> Result<()> {
        let client_id = format!("edgeflow-bus-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, CHANNEL_CAPACITY);

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match eventloop.poll().await {
                    Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(TriggerError::Connect(e.to_string())),
                }
            }
        })
        .await
        .map_err(|_| TriggerError::Connect("timed out".to_string()))??;

        info!(
            host = %self.config.host,
            port = self.config.port,
            "message bus connected"
        );

        // A reconnect replaces the poll task; stop the previous one first.
        if let Some(previous) = self.poll_token.lock().take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        let poll_token = token.clone();
        let routes = self.routes.clone();
        let errors = self.errors.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = poll_token.cancelled() => break,
                    event = eventloop.poll() => event,
                };
                match event {
                    Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                        let envelope = envelope_from_wire(&publish.payload, &publish.topic);
                        let targets: Vec<mpsc::Sender<MessageEnvelope>> = routes
                            .lock()
                            .iter()
                            .filter(|(pattern, _)| {
                                topic_matches(pattern, &envelope.received_topic)
                            })
                            .map(|(_, tx)| tx.clone())
                            .collect();
                        for tx in targets {
                            if tx.send(envelope.clone()).await.is_err() {
                                debug!("bus topic channel closed");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "message bus connection error");
                        let tx = errors.lock().clone();
                        if let Some(tx) = tx {
                            let _ = tx.send(e.to_string()).await;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("message bus poll task stopped");
        });

        *self.poll_token.lock() = Some(token);
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn subscribe(
        &self,
        topics: &[String],
    ) -> Result<(Vec<TopicChannel>, mpsc::Receiver<String>)> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| TriggerError::Subscribe("not connected".to_string()))?;

        let (error_tx, error_rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.errors.lock() = Some(error_tx);

        let mut channels = Vec::with_capacity(topics.len());
        for pattern in topics {
            client
                .subscribe(mqtt_subscription(pattern), QoS::AtLeastOnce)
                .await
                .map_err(|e| TriggerError::Subscribe(e.to_string()))?;
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            self.routes.lock().push((pattern.clone(), tx));
            channels.push(TopicChannel {
                topic: pattern.clone(),
                receiver: rx,
            });
        }

        Ok((channels, error_rx))
    }

    async fn publish(&self, envelope: MessageEnvelope, topic: &str) -> Result<()> {
        let guard = self.client.lock().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| TriggerError::Publish("not connected".to_string()))?;
        let wire = serde_json::to_vec(&envelope)
            .map_err(|e| TriggerError::Publish(e.to_string()))?;
        client
            .publish(topic, QoS::AtLeastOnce, false, wire)
            .await
            .map_err(|e| TriggerError::Publish(e.to_string()))
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(token) = self.poll_token.lock().take() {
            token.cancel();
        }
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
        }
        Ok(())
    }
}

/// Publishes pipeline responses back onto the bus.
struct BusResponseHandler {
    client: Arc<dyn MessageBusClient>,
    publish_topic: String,
}

#[async_trait]
impl ResponseHandler for BusResponseHandler {
    async fn handle(
        &self,
        _pipeline: &edgeflow_runtime::FunctionPipeline,
        ctx: &Context,
    ) -> std::result::Result<(), String> {
        let Some(data) = ctx.response_data() else {
            return Ok(());
        };
        if self.publish_topic.is_empty() {
            return Ok(());
        }

        let topic = ctx
            .apply_values(&self.publish_topic)
            .map_err(|e| e.to_string())?;
        let content_type = match ctx.response_content_type() {
            "" => MessageEnvelope::infer_content_type(data).to_string(),
            other => other.to_string(),
        };
        let envelope = MessageEnvelope::new(data.to_vec(), content_type)
            .with_correlation_id(ctx.correlation_id());
        debug!(topic = %topic, correlation_id = ctx.correlation_id(), "publishing response");
        self.client
            .publish(envelope, &topic)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Drives pipelines from a message bus subscription.
pub struct BusTrigger {
    client: Arc<dyn MessageBusClient>,
    subscribe_topics: Vec<String>,
    publish_topic: String,
}

impl BusTrigger {
    pub fn new(client: Arc<dyn MessageBusClient>, config: &TriggerConfig) -> Self {
        Self {
            client,
            subscribe_topics: config.subscribe_topic_list(),
            publish_topic: config.publish_topic.clone(),
        }
    }
}

async fn recv_background(
    receiver: &mut Option<mpsc::Receiver<BackgroundMessage>>,
) -> Option<BackgroundMessage> {
    match receiver {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Trigger for BusTrigger {
    async fn initialize(&mut self, app: TriggerContext) -> Result<TriggerCleanup> {
        self.client.connect().await?;
        let (channels, mut errors) = self.client.subscribe(&self.subscribe_topics).await?;
        info!(topics = ?self.subscribe_topics, "bus trigger subscribed");

        let handler: Arc<dyn ResponseHandler> = Arc::new(BusResponseHandler {
            client: self.client.clone(),
            publish_topic: self.publish_topic.clone(),
        });

        for mut channel in channels {
            let runtime = app.runtime.clone();
            let handler = handler.clone();
            let token = app.token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        received = channel.receiver.recv() => {
                            let Some(envelope) = received else { break };
                            let runtime = runtime.clone();
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                let ctx = Context::from_envelope(&envelope);
                                if let Err(e) =
                                    message_received(runtime, &ctx, envelope, handler).await
                                {
                                    error!(error = %e, "bus message processing failed");
                                }
                            });
                        }
                    }
                }
                debug!(topic = %channel.topic, "bus topic worker stopped");
            });
        }

        // One worker multiplexes async subscription errors and the
        // background publisher.
        let client = self.client.clone();
        let token = app.token.clone();
        let mut background = app.background;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    err = errors.recv() => match err {
                        Some(message) => warn!(error = %message, "bus subscription error"),
                        None => break,
                    },
                    queued = recv_background(&mut background) => {
                        let Some(message) = queued else {
                            background = None;
                            continue;
                        };
                        if let Err(e) = client
                            .publish(message.envelope, &message.topic)
                            .await
                        {
                            warn!(error = %e, "background publish failed");
                        }
                    }
                }
            }
        });

        let client = self.client.clone();
        Ok(Box::pin(async move {
            let _ = client.disconnect().await;
        }))
    }
}
