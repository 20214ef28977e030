//! Custom trigger registration.

use std::collections::HashMap;
use std::sync::Arc;

use edgeflow_core::config::{
    TRIGGER_TYPE_EXTERNAL_MQTT, TRIGGER_TYPE_HTTP, TRIGGER_TYPE_MESSAGE_BUS,
};
use edgeflow_core::{Context, MessageEnvelope};
use edgeflow_runtime::{message_received, ResponseHandler, Runtime};

use crate::error::{Result, TriggerError};
use crate::Trigger;

/// What a custom trigger gets to work with: the context builder and the
/// multi-pipeline dispatch entry point.
#[derive(Clone)]
pub struct TriggerBinding {
    runtime: Arc<Runtime>,
}

impl TriggerBinding {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Build the per-message context for an envelope.
    pub fn build_context(&self, envelope: &MessageEnvelope) -> Context {
        Context::from_envelope(envelope)
    }

    /// Dispatch a message to every matching pipeline.
    pub async fn message_received(
        &self,
        ctx: &Context,
        envelope: MessageEnvelope,
        handler: Arc<dyn ResponseHandler>,
    ) -> edgeflow_runtime::Result<usize> {
        message_received(self.runtime.clone(), ctx, envelope, handler).await
    }
}

type TriggerFactory = Box<dyn Fn(TriggerBinding) -> Result<Box<dyn Trigger>> + Send + Sync>;

/// Factories for custom trigger types, keyed by uppercased name.
#[derive(Default)]
pub struct TriggerRegistry {
    factories: HashMap<String, TriggerFactory>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a custom trigger type.
    ///
    /// Names colliding with the built-in trigger types, or with an
    /// earlier registration, are rejected.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(TriggerBinding) -> Result<Box<dyn Trigger>> + Send + Sync + 'static,
    {
        let key = name.trim().to_uppercase();
        if key.is_empty() {
            return Err(TriggerError::Configuration(
                "custom trigger name is empty".to_string(),
            ));
        }
        let builtin = [
            TRIGGER_TYPE_HTTP,
            TRIGGER_TYPE_MESSAGE_BUS,
            TRIGGER_TYPE_EXTERNAL_MQTT,
        ];
        if builtin.contains(&key.as_str()) {
            return Err(TriggerError::Configuration(format!(
                "custom trigger name collides with built-in type {key}"
            )));
        }
        if self.factories.contains_key(&key) {
            return Err(TriggerError::Configuration(format!(
                "custom trigger {key} already registered"
            )));
        }
        self.factories.insert(key, Box::new(factory));
        Ok(())
    }

    /// Build the custom trigger registered under a name, if any.
    pub fn create(&self, name: &str, binding: TriggerBinding) -> Option<Result<Box<dyn Trigger>>> {
        self.factories
            .get(&name.trim().to_uppercase())
            .map(|factory| factory(binding))
    }
}
