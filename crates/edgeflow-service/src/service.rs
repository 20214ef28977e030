//! The service shell: wiring, lifecycle, and live configuration.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use edgeflow_core::config::{
    ServiceConfig, WritableConfig, TRIGGER_TYPE_EXTERNAL_MQTT, TRIGGER_TYPE_HTTP,
    TRIGGER_TYPE_MESSAGE_BUS,
};
use edgeflow_core::MessageEnvelope;
use edgeflow_runtime::{Runtime, TargetType};
use edgeflow_store::{StoreClient, StoreForward};
use edgeflow_transforms::{
    load_pipelines, InMemorySecretProvider, SecretProvider, TransformRegistry,
};
use edgeflow_triggers::{
    BackgroundMessage, BusTrigger, ExternalMqttTrigger, HttpTrigger, InProcessBus,
    MessageBusClient, MqttBusClient, Trigger, TriggerBinding, TriggerContext, TriggerRegistry,
};

use crate::error::{Result, ServiceError};

const DEFAULT_HTTP_BIND: &str = "0.0.0.0:59740";

/// Producer half of the background publisher channel.
///
/// Messages queued here are published onto the bus by the trigger's
/// multiplexer worker, bypassing the pipelines.
#[derive(Clone)]
pub struct BackgroundPublisher {
    sender: mpsc::Sender<BackgroundMessage>,
}

impl BackgroundPublisher {
    /// Queue an envelope for publication on a topic.
    pub async fn publish(&self, envelope: MessageEnvelope, topic: impl Into<String>) -> Result<()> {
        self.sender
            .send(BackgroundMessage {
                envelope,
                topic: topic.into(),
            })
            .await
            .map_err(|e| ServiceError::BackgroundPublish(e.to_string()))
    }
}

/// An EdgeFlow application service.
///
/// Owns the runtime, the store-and-forward engine, and the configured
/// trigger; `run` drives the whole lifecycle until `make_it_stop`.
pub struct Service {
    service_key: String,
    config: ServiceConfig,
    http_bind_address: String,
    runtime: Arc<Runtime>,
    bus: InProcessBus,
    secrets: Arc<dyn SecretProvider>,
    transform_registry: Mutex<Option<TransformRegistry>>,
    trigger_registry: TriggerRegistry,
    store_client: Option<Arc<dyn StoreClient>>,
    background: Mutex<Option<mpsc::Receiver<BackgroundMessage>>>,
    background_created: Mutex<bool>,
    writable_tx: mpsc::Sender<WritableConfig>,
    writable_rx: Mutex<Option<mpsc::Receiver<WritableConfig>>>,
    run_token: CancellationToken,
    app_token: CancellationToken,
}

impl Service {
    pub fn new(service_key: impl Into<String>, config: ServiceConfig) -> Self {
        let target_type = if config.writable.pipeline.use_target_type_of_byte_array {
            TargetType::Bytes
        } else {
            TargetType::Event
        };
        let run_token = CancellationToken::new();
        let app_token = run_token.child_token();
        let (writable_tx, writable_rx) = mpsc::channel(8);
        Self {
            service_key: service_key.into(),
            config,
            http_bind_address: DEFAULT_HTTP_BIND.to_string(),
            runtime: Arc::new(Runtime::new(target_type)),
            bus: InProcessBus::default(),
            secrets: Arc::new(InMemorySecretProvider::new()),
            transform_registry: Mutex::new(None),
            trigger_registry: TriggerRegistry::new(),
            store_client: None,
            background: Mutex::new(None),
            background_created: Mutex::new(false),
            writable_tx,
            writable_rx: Mutex::new(Some(writable_rx)),
            run_token,
            app_token,
        }
    }

    /// Attach the store backend for store-and-forward.
    pub fn with_store_client(mut self, client: Arc<dyn StoreClient>) -> Self {
        self.store_client = Some(client);
        self
    }

    /// Replace the default in-memory secret provider.
    pub fn with_secret_provider(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    /// Replace the built-in transform registry.
    pub fn with_transform_registry(self, registry: TransformRegistry) -> Self {
        *self.transform_registry.lock() = Some(registry);
        self
    }

    /// Bind address for the HTTP trigger.
    pub fn with_http_bind_address(mut self, address: impl Into<String>) -> Self {
        self.http_bind_address = address.into();
        self
    }

    /// Register a custom trigger factory.
    pub fn register_custom_trigger<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(TriggerBinding) -> edgeflow_triggers::Result<Box<dyn Trigger>>
            + Send
            + Sync
            + 'static,
    {
        self.trigger_registry.register(name, factory)?;
        Ok(())
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The in-process bus; embedders publish test or local traffic here.
    pub fn bus(&self) -> &InProcessBus {
        &self.bus
    }

    /// Handle for pushing writable-configuration updates into the
    /// running service.
    pub fn writable_sender(&self) -> mpsc::Sender<WritableConfig> {
        self.writable_tx.clone()
    }

    /// Create the bounded background publisher.
    ///
    /// Only the message-bus trigger (and custom triggers that opt in)
    /// consume it; HTTP and external-MQTT trigger types reject it.
    pub fn add_background_publisher(&self, capacity: usize) -> Result<BackgroundPublisher> {
        let trigger_type = self.config.trigger.trigger_type.trim().to_uppercase();
        if trigger_type == TRIGGER_TYPE_HTTP || trigger_type == TRIGGER_TYPE_EXTERNAL_MQTT {
            return Err(ServiceError::Configuration(format!(
                "trigger type {trigger_type} does not support background publishing"
            )));
        }
        let mut created = self.background_created.lock();
        if *created {
            return Err(ServiceError::Configuration(
                "background publisher already created".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.background.lock() = Some(rx);
        *created = true;
        Ok(BackgroundPublisher { sender: tx })
    }

    /// Cancel the top-level run scope; `run` returns after teardown.
    pub fn make_it_stop(&self) {
        info!("stop requested");
        self.run_token.cancel();
    }

    /// Run the service until stopped.
    pub async fn run(&self) -> Result<()> {
        match self.run_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "service terminated with error");
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<()> {
        info!(service_key = %self.service_key, "service starting");

        let registry = Arc::new(
            self.transform_registry
                .lock()
                .take()
                .unwrap_or_else(|| TransformRegistry::with_builtins(self.secrets.clone())),
        );

        // Initial pipeline load; a bad configuration fails startup.
        let pipelines = load_pipelines(&self.config.writable.pipeline, &registry)?;
        self.runtime.replace_pipelines(pipelines)?;

        // Store-and-forward engine, toggled by its own child scope.
        let sf_token: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
        let store_forward = self.store_client.as_ref().map(|client| {
            Arc::new(StoreForward::new(
                client.clone(),
                &self.service_key,
                self.config.writable.store_and_forward.clone(),
            ))
        });
        if let Some(sf) = &store_forward {
            self.runtime.set_store_forward(sf.clone());
            if sf.enabled() {
                *sf_token.lock() = Some(spawn_retry_loop(
                    sf.clone(),
                    self.runtime.clone(),
                    &self.app_token,
                ));
            }
        }

        // Writable-configuration watcher.
        if let Some(rx) = self.writable_rx.lock().take() {
            let watcher = WritableWatcher {
                runtime: self.runtime.clone(),
                registry: registry.clone(),
                store_forward: store_forward.clone(),
                sf_token: sf_token.clone(),
                app_token: self.app_token.clone(),
                current: Mutex::new(self.config.writable.clone()),
            };
            let token = self.app_token.clone();
            tokio::spawn(watcher.watch(rx, token));
        }

        let cleanup = self.start_trigger().await?;
        info!(trigger = %self.config.trigger.trigger_type, "service running");

        self.run_token.cancelled().await;

        info!("service stopping");
        self.app_token.cancel();
        cleanup.await;
        info!("service stopped");
        Ok(())
    }

    async fn start_trigger(&self) -> Result<edgeflow_triggers::TriggerCleanup> {
        let background = self.background.lock().take();
        let app = TriggerContext {
            token: self.app_token.clone(),
            runtime: self.runtime.clone(),
            background,
        };

        let trigger_type = self.config.trigger.trigger_type.trim().to_uppercase();
        let mut trigger: Box<dyn Trigger> = match trigger_type.as_str() {
            TRIGGER_TYPE_HTTP => Box::new(HttpTrigger::new(
                &self.http_bind_address,
                &self.config.trigger.path,
            )),
            TRIGGER_TYPE_MESSAGE_BUS => {
                let client: Arc<dyn MessageBusClient> =
                    if self.config.trigger.broker.broker_type.eq_ignore_ascii_case("mqtt") {
                        Arc::new(MqttBusClient::new(self.config.trigger.broker.clone()))
                    } else {
                        Arc::new(self.bus.clone())
                    };
                Box::new(BusTrigger::new(client, &self.config.trigger))
            }
            TRIGGER_TYPE_EXTERNAL_MQTT => {
                let mqtt = self.config.external_mqtt.clone().ok_or_else(|| {
                    ServiceError::Configuration(
                        "external-mqtt trigger requires an ExternalMqtt section".to_string(),
                    )
                })?;
                Box::new(ExternalMqttTrigger::new(
                    mqtt,
                    &self.config.trigger,
                    self.secrets.clone(),
                ))
            }
            custom => {
                let binding = TriggerBinding::new(self.runtime.clone());
                match self.trigger_registry.create(custom, binding) {
                    Some(built) => built?,
                    None => {
                        return Err(ServiceError::Configuration(format!(
                            "unknown trigger type: {custom}"
                        )))
                    }
                }
            }
        };

        Ok(trigger.initialize(app).await?)
    }
}

fn spawn_retry_loop(
    store_forward: Arc<StoreForward>,
    runtime: Arc<Runtime>,
    parent: &CancellationToken,
) -> CancellationToken {
    let token = parent.child_token();
    tokio::spawn(store_forward.run_retry_loop(runtime, token.clone()));
    token
}

/// Applies live writable-configuration updates.
struct WritableWatcher {
    runtime: Arc<Runtime>,
    registry: Arc<TransformRegistry>,
    store_forward: Option<Arc<StoreForward>>,
    sf_token: Arc<Mutex<Option<CancellationToken>>>,
    app_token: CancellationToken,
    current: Mutex<WritableConfig>,
}

impl WritableWatcher {
    async fn watch(self, mut rx: mpsc::Receiver<WritableConfig>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                update = rx.recv() => {
                    let Some(new) = update else { break };
                    self.apply(new);
                }
            }
        }
    }

    fn apply(&self, new: WritableConfig) {
        let previous = self.current.lock().clone();

        if new.pipeline != previous.pipeline {
            info!("pipeline configuration changed, reloading");
            let target_type = if new.pipeline.use_target_type_of_byte_array {
                TargetType::Bytes
            } else {
                TargetType::Event
            };
            self.runtime.set_target_type(target_type);
            let loaded = load_pipelines(&new.pipeline, &self.registry)
                .map_err(crate::error::ServiceError::from)
                .and_then(|pipelines| {
                    self.runtime
                        .replace_pipelines(pipelines)
                        .map_err(crate::error::ServiceError::from)
                });
            if let Err(e) = loaded {
                // Surface the configuration fault on the next execution
                // instead of processing with stale pipelines.
                error!(error = %e, "pipeline reload failed, clearing all transforms");
                self.runtime.clear_all_transforms();
            }
        }

        if new.store_and_forward != previous.store_and_forward {
            match &self.store_forward {
                Some(sf) => {
                    sf.set_config(new.store_and_forward.clone());
                    let mut guard = self.sf_token.lock();
                    match (new.store_and_forward.enabled, guard.as_ref()) {
                        (true, None) => {
                            info!("store and forward enabled");
                            *guard = Some(spawn_retry_loop(
                                sf.clone(),
                                self.runtime.clone(),
                                &self.app_token,
                            ));
                        }
                        (false, Some(token)) => {
                            info!("store and forward disabled");
                            token.cancel();
                            *guard = None;
                        }
                        _ => {}
                    }
                }
                None => warn!("store and forward configured but no store client attached"),
            }
        }

        *self.current.lock() = new;
    }
}
