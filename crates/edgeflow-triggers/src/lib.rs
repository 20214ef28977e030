//! Trigger implementations for the EdgeFlow SDK.
//!
//! A trigger owns one inbound transport: it receives raw messages, wraps
//! them in envelopes, hands them to the pipeline runtime, and publishes
//! whatever response the pipeline produced. The service selects a trigger
//! by configuration and drives its lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use edgeflow_core::MessageEnvelope;
use edgeflow_runtime::Runtime;

pub mod bus;
pub mod custom;
pub mod error;
pub mod http;
pub mod mqtt;

pub use bus::{BusTrigger, InProcessBus, MessageBusClient, MqttBusClient, TopicChannel};
pub use custom::{TriggerBinding, TriggerRegistry};
pub use error::{Result, TriggerError};
pub use http::HttpTrigger;
pub use mqtt::ExternalMqttTrigger;

/// A message queued through the background publisher.
#[derive(Debug, Clone)]
pub struct BackgroundMessage {
    pub envelope: MessageEnvelope,
    pub topic: String,
}

/// Everything a trigger needs from the running service.
pub struct TriggerContext {
    /// Cancelled when the service shuts down or the trigger must stop.
    pub token: CancellationToken,
    /// The pipeline runtime messages are dispatched into.
    pub runtime: Arc<Runtime>,
    /// Receiver end of the background publisher, when one was created.
    /// Only the message-bus trigger accepts it.
    pub background: Option<mpsc::Receiver<BackgroundMessage>>,
}

/// Async teardown returned by [`Trigger::initialize`], run at shutdown.
pub type TriggerCleanup = BoxFuture<'static, ()>;

/// One inbound transport.
#[async_trait]
pub trait Trigger: Send {
    /// Connect, subscribe, and start the trigger's workers.
    ///
    /// A connect or subscribe failure fails initialize; triggers without
    /// background-publishing support must reject a context carrying a
    /// background receiver.
    async fn initialize(&mut self, app: TriggerContext) -> Result<TriggerCleanup>;
}

/// A cleanup that does nothing.
pub(crate) fn noop_cleanup() -> TriggerCleanup {
    Box::pin(async {})
}
