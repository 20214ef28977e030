//! External MQTT trigger.
//!
//! Connects straight to an operator-supplied broker rather than the
//! internal bus. Inbound payloads arrive without metadata: the content
//! type is inferred from the first byte and every message gets a fresh
//! correlation id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tracing::{debug, error, info, warn};

use edgeflow_core::config::{ExternalMqttConfig, TriggerConfig};
use edgeflow_core::{Context, MessageEnvelope};
use edgeflow_runtime::{message_received, ResponseHandler};
use edgeflow_transforms::SecretProvider;

use crate::error::{Result, TriggerError};
use crate::{Trigger, TriggerCleanup, TriggerContext};

const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Drives pipelines from an external MQTT broker.
pub struct ExternalMqttTrigger {
    config: ExternalMqttConfig,
    subscribe_topics: Vec<String>,
    publish_topic: String,
    secrets: Arc<dyn SecretProvider>,
}

impl ExternalMqttTrigger {
    pub fn new(
        config: ExternalMqttConfig,
        trigger: &TriggerConfig,
        secrets: Arc<dyn SecretProvider>,
    ) -> Self {
        Self {
            config,
            subscribe_topics: trigger.subscribe_topic_list(),
            publish_topic: trigger.publish_topic.clone(),
            secrets,
        }
    }

    fn qos(&self) -> QoS {
        match self.config.qos {
            2 => QoS::ExactlyOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        }
    }

    fn options(&self) -> Result<MqttOptions> {
        let (host, port) = self.config.host_and_port()?;
        let mut options = MqttOptions::new(&self.config.client_id, host, port);
        options.set_keep_alive(self.config.keep_alive());

        let secret = |key: &str| {
            self.secrets
                .secret(&self.config.secret_path, key)
                .map_err(|e| TriggerError::Configuration(e.to_string()))
        };
        match self.config.auth_mode.to_lowercase().as_str() {
            "none" | "" => {}
            "usernamepassword" => {
                options.set_credentials(secret("username")?, secret("password")?);
            }
            "cacert" => {
                options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                    ca: secret("cacert")?.into_bytes(),
                    alpn: None,
                    client_auth: None,
                }));
            }
            "clientcert" => {
                return Err(TriggerError::Configuration(
                    "client certificate auth is not supported".to_string(),
                ))
            }
            other => {
                return Err(TriggerError::Configuration(format!(
                    "unknown auth mode: {other}"
                )))
            }
        }

        if self.config.skip_cert_verify {
            warn!("certificate verification cannot be disabled; SkipCertVerify ignored");
        }
        Ok(options)
    }
}

/// Publishes pipeline responses to the configured topic.
struct MqttResponseHandler {
    client: AsyncClient,
    publish_topic: String,
    qos: QoS,
    retain: bool,
}

#[async_trait]
impl ResponseHandler for MqttResponseHandler {
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
        debug!(topic = %topic, correlation_id = ctx.correlation_id(), "publishing response");
        self.client
            .publish(&topic, self.qos, self.retain, data.to_vec())
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Trigger for ExternalMqttTrigger {
    async fn initialize(&mut self, app: TriggerContext) -> Result<TriggerCleanup> {
        if app.background.is_some() {
            return Err(TriggerError::BackgroundUnsupported("EXTERNAL-MQTT"));
        }

        let (client, mut eventloop) = AsyncClient::new(self.options()?, 64);

        // A broker we cannot reach aborts startup.
        tokio::time::timeout(self.config.connect_timeout(), async {
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

        for topic in &self.subscribe_topics {
            client
                .subscribe(topic, self.qos())
                .await
                .map_err(|e| TriggerError::Subscribe(e.to_string()))?;
        }
        info!(url = %self.config.url, topics = ?self.subscribe_topics, "external mqtt trigger connected");

        let handler: Arc<dyn ResponseHandler> = Arc::new(MqttResponseHandler {
            client: client.clone(),
            publish_topic: self.publish_topic.clone(),
            qos: self.qos(),
            retain: self.config.retain,
        });

        let runtime = app.runtime.clone();
        let token = app.token.clone();
        let auto_reconnect = self.config.auto_reconnect;
        tokio::spawn(async move {
            let mut consecutive_errors = 0u32;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = eventloop.poll() => match event {
                        Ok(rumqttc::Event::Incoming(Packet::Publish(publish))) => {
                            consecutive_errors = 0;
                            let payload = publish.payload.to_vec();
                            let content_type = MessageEnvelope::infer_content_type(&payload);
                            let envelope = MessageEnvelope::new(payload, content_type)
                                .with_received_topic(&publish.topic);
                            let runtime = runtime.clone();
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                let ctx = Context::from_envelope(&envelope);
                                if let Err(e) =
                                    message_received(runtime, &ctx, envelope, handler).await
                                {
                                    error!(error = %e, "mqtt message processing failed");
                                }
                            });
                        }
                        Ok(_) => {
                            consecutive_errors = 0;
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            warn!(
                                error = %e,
                                consecutive_errors,
                                "external mqtt connection error"
                            );
                            if !auto_reconnect && consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                error!("external mqtt trigger giving up");
                                break;
                            }
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(async move {
            let _ = client.disconnect().await;
        }))
    }
}
