//! MQTTExport transform.
//!
//! Connects lazily on first use: the connection is established, the
//! CONNACK awaited, and the event loop parked in a background task that
//! keeps the session alive and reconnects while auto-reconnect is on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use edgeflow_core::Context;
use edgeflow_runtime::{PipelineData, Transform, TransformError, TransformResult};

use crate::error::{ConfigurationError, Result};
use crate::params;
use crate::secrets::SecretProvider;

/// How the export authenticates against the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MqttAuthMode {
    #[default]
    None,
    UsernamePassword,
    CaCert,
}

/// Connection settings for [`MqttExport`].
#[derive(Debug, Clone)]
pub struct MqttExportConfig {
    /// `tcp://host:port` or `ssl://host:port`.
    pub broker_address: String,
    /// Publish topic template; `{key}` placeholders resolve from the context.
    pub topic: String,
    pub client_id: String,
    pub qos: u8,
    pub retain: bool,
    pub auto_reconnect: bool,
    pub skip_verify: bool,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub auth_mode: MqttAuthMode,
    pub secret_path: String,
    pub persist_on_error: bool,
}

impl Default for MqttExportConfig {
    fn default() -> Self {
        Self {
            broker_address: String::new(),
            topic: String::new(),
            client_id: String::new(),
            qos: 0,
            retain: false,
            auto_reconnect: true,
            skip_verify: false,
            connect_timeout: Duration::from_secs(5),
            keep_alive: Duration::from_secs(30),
            auth_mode: MqttAuthMode::None,
            secret_path: String::new(),
            persist_on_error: false,
        }
    }
}

/// Publishes the pipeline data to an MQTT broker.
pub struct MqttExport {
    config: MqttExportConfig,
    secrets: Arc<dyn SecretProvider>,
    client: Mutex<Option<AsyncClient>>,
}

impl MqttExport {
    pub fn new(config: MqttExportConfig, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            config,
            secrets,
            client: Mutex::new(None),
        }
    }

    pub fn from_params(
        params: &HashMap<String, String>,
        secrets: Arc<dyn SecretProvider>,
    ) -> Result<Self> {
        let defaults = MqttExportConfig::default();
        let auth_mode = match params::optional(params, "authmode")
            .unwrap_or_else(|| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => MqttAuthMode::None,
            "usernamepassword" => MqttAuthMode::UsernamePassword,
            "cacert" => MqttAuthMode::CaCert,
            other => {
                return Err(ConfigurationError::InvalidParameter {
                    function: "MQTTExport".to_string(),
                    parameter: "authmode".to_string(),
                    message: format!("{other} is not supported"),
                })
            }
        };
        let qos = match params::optional(params, "qos").as_deref().unwrap_or("0") {
            "0" => 0,
            "1" => 1,
            "2" => 2,
            other => {
                return Err(ConfigurationError::InvalidParameter {
                    function: "MQTTExport".to_string(),
                    parameter: "qos".to_string(),
                    message: format!("{other} is not 0, 1 or 2"),
                })
            }
        };
        let config = MqttExportConfig {
            broker_address: params::required(params, "MQTTExport", "brokeraddress")?,
            topic: params::required(params, "MQTTExport", "topic")?,
            client_id: params::optional(params, "clientid")
                .unwrap_or_else(|| format!("edgeflow-export-{}", Uuid::new_v4())),
            qos,
            retain: params::bool_param(params, "MQTTExport", "retain", false)?,
            auto_reconnect: params::bool_param(params, "MQTTExport", "autoreconnect", true)?,
            skip_verify: params::bool_param(params, "MQTTExport", "skipcertverify", false)?,
            connect_timeout: params::duration_param(
                params,
                "MQTTExport",
                "connecttimeout",
                defaults.connect_timeout,
            )?,
            keep_alive: params::duration_param(
                params,
                "MQTTExport",
                "keepalive",
                defaults.keep_alive,
            )?,
            auth_mode,
            secret_path: params::optional(params, "secretpath").unwrap_or_default(),
            persist_on_error: params::bool_param(params, "MQTTExport", "persistonerror", false)?,
        };
        if config.skip_verify {
            warn!("MQTTExport: certificate verification cannot be disabled; skipcertverify ignored");
        }
        Ok(Self::new(config, secrets))
    }

    fn qos(&self) -> QoS {
        match self.config.qos {
            2 => QoS::ExactlyOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::AtMostOnce,
        }
    }

    async fn connect(&self) -> std::result::Result<AsyncClient, TransformError> {
        let mut options =
            mqtt_options_for(&self.config, self.secrets.as_ref()).map_err(|e| {
                TransformError::new(format!("MQTTExport configuration: {e}"))
            })?;
        options.set_keep_alive(self.config.keep_alive);

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        // Wait for the broker to accept the session before first publish.
        tokio::time::timeout(self.config.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(rumqttc::Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(TransformError::new(format!("connect failed: {e}"))),
                }
            }
        })
        .await
        .map_err(|_| TransformError::new("connect timed out"))??;

        let auto_reconnect = self.config.auto_reconnect;
        let broker = self.config.broker_address.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(_) => {}
                    Err(e) => {
                        warn!(broker = %broker, error = %e, "mqtt export connection error");
                        if !auto_reconnect {
                            break;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(client)
    }
}

#[async_trait]
impl Transform for MqttExport {
    fn name(&self) -> &str {
        "MQTTExport"
    }

    fn fingerprint(&self) -> String {
        params::fingerprint(
            self.name(),
            &[
                &self.config.broker_address,
                &self.config.topic,
                &self.config.qos.to_string(),
                &self.config.retain.to_string(),
            ],
        )
    }

    async fn run(&self, ctx: &mut Context, input: PipelineData) -> TransformResult {
        let payload = input.to_bytes()?;
        let topic = ctx
            .apply_values(&self.config.topic)
            .map_err(|e| TransformError::new(e.to_string()))?;

        let outcome = async {
            let client = {
                let mut guard = self.client.lock().await;
                if guard.is_none() {
                    *guard = Some(self.connect().await?);
                }
                guard
                    .clone()
                    .ok_or_else(|| TransformError::new("mqtt client unavailable"))?
            };
            client
                .publish(&topic, self.qos(), self.config.retain, payload.clone())
                .await
                .map_err(|e| TransformError::new(format!("publish failed: {e}")))
        }
        .await;

        match outcome {
            Ok(()) => {
                debug!(topic = %topic, "mqtt export published");
                Ok(Some(input))
            }
            Err(e) => {
                // Drop the client so the next message reconnects.
                *self.client.lock().await = None;
                if self.config.persist_on_error {
                    ctx.set_retry_data(payload);
                }
                warn!(topic = %topic, error = %e, "mqtt export failed");
                Err(TransformError::new(format!(
                    "MQTTExport to {}: {e}",
                    self.config.broker_address
                )))
            }
        }
    }
}

/// Parse `scheme://host:port` and build broker options.
///
/// Shared with the external MQTT trigger, which feeds its own config
/// through the same address and auth conventions.
pub fn mqtt_options_for(
    config: &MqttExportConfig,
    secrets: &dyn SecretProvider,
) -> Result<MqttOptions> {
    let (scheme, rest) =
        config
            .broker_address
            .split_once("://")
            .ok_or_else(|| ConfigurationError::InvalidParameter {
                function: "MQTTExport".to_string(),
                parameter: "brokeraddress".to_string(),
                message: format!("{} has no scheme", config.broker_address),
            })?;
    let (host, port) = rest
        .rsplit_once(':')
        .and_then(|(host, port)| port.parse::<u16>().ok().map(|p| (host.to_string(), p)))
        .ok_or_else(|| ConfigurationError::InvalidParameter {
            function: "MQTTExport".to_string(),
            parameter: "brokeraddress".to_string(),
            message: format!("{} has no port", config.broker_address),
        })?;

    let mut options = MqttOptions::new(&config.client_id, host, port);

    match config.auth_mode {
        MqttAuthMode::None => {}
        MqttAuthMode::UsernamePassword => {
            let username = secrets.secret(&config.secret_path, "username")?;
            let password = secrets.secret(&config.secret_path, "password")?;
            options.set_credentials(username, password);
        }
        MqttAuthMode::CaCert => {
            let ca = secrets.secret(&config.secret_path, "cacert")?;
            options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                ca: ca.into_bytes(),
                alpn: None,
                client_auth: None,
            }));
        }
    }

    if scheme == "ssl" || scheme == "tls" || scheme == "mqtts" {
        if config.auth_mode != MqttAuthMode::CaCert {
            return Err(ConfigurationError::InvalidParameter {
                function: "MQTTExport".to_string(),
                parameter: "brokeraddress".to_string(),
                message: "ssl scheme requires authmode cacert with a cacert secret".to_string(),
            });
        }
    }

    Ok(options)
}
