//! Configuration surface for an EdgeFlow service.
//!
//! The writable section ([`WritableConfig`]) is watched for live updates:
//! pipeline-block changes trigger a full pipeline reload, store-and-forward
//! changes toggle the retry engine without restarting the service.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};

/// Minimum allowed store-and-forward retry interval.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Built-in trigger type name for the HTTP trigger.
pub const TRIGGER_TYPE_HTTP: &str = "HTTP";
/// Built-in trigger type name for the internal message-bus trigger.
pub const TRIGGER_TYPE_MESSAGE_BUS: &str = "EDGEX-MESSAGEBUS";
/// Built-in trigger type name for the external MQTT trigger.
pub const TRIGGER_TYPE_EXTERNAL_MQTT: &str = "EXTERNAL-MQTT";

/// Parameters for one configurable pipeline function.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PipelineFunctionConfig {
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// A named per-topic pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TopicPipelineConfig {
    /// Comma-separated list of function names, executed in order.
    #[serde(default)]
    pub execution_order: String,
    /// Comma-separated list of topic patterns.
    #[serde(default)]
    pub topics: String,
}

/// The `Pipeline` block of the writable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PipelineConfig {
    /// Comma-separated function names for the default pipeline.
    #[serde(default)]
    pub execution_order: String,
    /// Decode the payload as raw bytes instead of an Event.
    #[serde(default)]
    pub use_target_type_of_byte_array: bool,
    /// Named per-topic pipelines.
    #[serde(default)]
    pub per_topic_pipelines: BTreeMap<String, TopicPipelineConfig>,
    /// Function name to parameter map.
    #[serde(default)]
    pub functions: BTreeMap<String, PipelineFunctionConfig>,
}

/// The `StoreAndForward` block of the writable configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StoreAndForwardConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Retry interval as a duration string (`"30s"`, `"1m"`).
    #[serde(default = "default_retry_interval")]
    pub retry_interval: String,
    /// Maximum failed retries before an item is aged out. Zero means never.
    #[serde(default)]
    pub max_retry_count: i64,
}

fn default_retry_interval() -> String {
    "5m".to_string()
}

impl Default for StoreAndForwardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retry_interval: default_retry_interval(),
            max_retry_count: 10,
        }
    }
}

impl StoreAndForwardConfig {
    /// Parsed retry interval, clamped to [`MIN_RETRY_INTERVAL`].
    ///
    /// Unparseable values fall back to the minimum with a warning.
    pub fn retry_interval(&self) -> Duration {
        match parse_duration(&self.retry_interval) {
            Some(d) if d >= MIN_RETRY_INTERVAL => d,
            Some(_) => {
                warn!(
                    interval = %self.retry_interval,
                    "retry interval below minimum, clamping to 1s"
                );
                MIN_RETRY_INTERVAL
            }
            None => {
                warn!(
                    interval = %self.retry_interval,
                    "unparseable retry interval, falling back to 1s"
                );
                MIN_RETRY_INTERVAL
            }
        }
    }

    /// Max retry count with negative values rewritten to 1.
    pub fn normalized_max_retry_count(&self) -> u64 {
        if self.max_retry_count < 0 {
            warn!(
                count = self.max_retry_count,
                "negative max retry count, rewriting to 1"
            );
            1
        } else {
            self.max_retry_count as u64
        }
    }
}

/// Message broker connection settings for the bus trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct BrokerConfig {
    /// Broker type: `in-process` or `mqtt`.
    #[serde(default = "default_broker_type")]
    pub broker_type: String,
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_broker_type() -> String {
    "in-process".to_string()
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_type: default_broker_type(),
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
        }
    }
}

/// Trigger selection and topic wiring.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TriggerConfig {
    /// Case-insensitive trigger type, one of the built-ins or a custom name.
    #[serde(default = "default_trigger_type")]
    pub trigger_type: String,
    /// Comma-separated subscribe topic patterns. Empty means all (`#`).
    #[serde(default)]
    pub subscribe_topics: String,
    /// Publish topic template; `{key}` placeholders resolve against the
    /// message context.
    #[serde(default)]
    pub publish_topic: String,
    /// HTTP trigger path.
    #[serde(default = "default_trigger_path")]
    pub path: String,
    #[serde(default)]
    pub broker: BrokerConfig,
}

fn default_trigger_type() -> String {
    TRIGGER_TYPE_MESSAGE_BUS.to_string()
}

fn default_trigger_path() -> String {
    "/api/v3/trigger".to_string()
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            trigger_type: default_trigger_type(),
            subscribe_topics: String::new(),
            publish_topic: String::new(),
            path: default_trigger_path(),
            broker: BrokerConfig::default(),
        }
    }
}

impl TriggerConfig {
    /// Subscribe topics parsed from the comma list.
    ///
    /// The empty string is valid and means "all" (a single `#`).
    pub fn subscribe_topic_list(&self) -> Vec<String> {
        if self.subscribe_topics.trim().is_empty() {
            return vec!["#".to_string()];
        }
        self.subscribe_topics
            .split(',')
            .map(|t| t.trim().to_string())
            .collect()
    }
}

/// External MQTT broker settings for the external-MQTT trigger and export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExternalMqttConfig {
    /// Broker URL, e.g. `tcp://broker.example.com:1883`.
    pub url: String,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,
    #[serde(default)]
    pub skip_cert_verify: bool,
    /// Auth mode: `none`, `usernamepassword`, `clientcert`, or `cacert`.
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,
    #[serde(default)]
    pub secret_path: String,
}

fn default_mqtt_client_id() -> String {
    "edgeflow".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keep_alive() -> String {
    "10s".to_string()
}

fn default_connect_timeout() -> String {
    "30s".to_string()
}

fn default_auth_mode() -> String {
    "none".to_string()
}

impl ExternalMqttConfig {
    /// Keep-alive as a duration, defaulting to 10s when unparseable.
    pub fn keep_alive(&self) -> Duration {
        parse_duration(&self.keep_alive).unwrap_or(Duration::from_secs(10))
    }

    /// Connect timeout as a duration, defaulting to 30s when unparseable.
    pub fn connect_timeout(&self) -> Duration {
        parse_duration(&self.connect_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Host and port split out of the URL.
    pub fn host_and_port(&self) -> Result<(String, u16)> {
        let stripped = self
            .url
            .split("://")
            .last()
            .unwrap_or(&self.url)
            .trim_end_matches('/');
        let mut parts = stripped.splitn(2, ':');
        let host = parts
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CoreError::Configuration(format!("invalid broker url: {}", self.url)))?;
        let port = match parts.next() {
            Some(p) => p.parse::<u16>().map_err(|_| {
                CoreError::Configuration(format!("invalid broker port in url: {}", self.url))
            })?,
            None => 1883,
        };
        Ok((host.to_string(), port))
    }
}

/// The writable section watched for live updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct WritableConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub store_and_forward: StoreAndForwardConfig,
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceConfig {
    /// Service identity; partitions the store-and-forward store.
    #[serde(default)]
    pub service_key: String,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub external_mqtt: Option<ExternalMqttConfig>,
    #[serde(default)]
    pub writable: WritableConfig,
}

impl ServiceConfig {
    /// Parse a TOML configuration document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CoreError::Configuration(e.to_string()))
    }
}

/// Parse a Go-style duration string: one or more `<number><unit>` segments
/// with units `ms`, `s`, `m`, `h` (e.g. `"1m30s"`, `"500ms"`).
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits_end == 0 {
            return None;
        }
        let value: u64 = rest[..digits_end].parse().ok()?;
        rest = &rest[digits_end..];
        let (unit_len, unit) = if rest.starts_with("ms") {
            (2, Duration::from_millis(value))
        } else if rest.starts_with('s') {
            (1, Duration::from_secs(value))
        } else if rest.starts_with('m') {
            (1, Duration::from_secs(value * 60))
        } else if rest.starts_with('h') {
            (1, Duration::from_secs(value * 3600))
        } else {
            return None;
        };
        total += unit;
        rest = &rest[unit_len..];
    }
    Some(total)
}
