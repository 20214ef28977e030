//! Store-and-forward engine.
//!
//! Retains payloads that failed mid-pipeline and retries them on a
//! background schedule. Each tick loads every stored object for this
//! service key, drops items whose pipeline disappeared or was
//! reconfigured (version no longer matches the pipeline hash), re-runs
//! the rest from their stored position, and updates retry accounting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use edgeflow_core::config::StoreAndForwardConfig;
use edgeflow_core::context::Context;

use crate::object::StoredObject;
use crate::StoreClient;

/// Pipeline re-execution seam used by the retry loop.
///
/// Implemented by the pipeline runtime; keeps this crate free of any
/// dependency on transform execution.
#[async_trait]
pub trait RetryExecutor: Send + Sync {
    /// Current hash of the named pipeline, or `None` when the pipeline no
    /// longer exists in the service.
    fn pipeline_hash(&self, pipeline_id: &str) -> Option<String>;

    /// Re-run the pipeline for a stored object from its stored position.
    ///
    /// Implementations must run with retry semantics: a failure here must
    /// not re-store the payload.
    async fn execute_retry(&self, object: &StoredObject) -> std::result::Result<(), String>;
}

enum Disposition {
    Remove(&'static str),
    Update(StoredObject),
}

/// The store-and-forward engine.
pub struct StoreForward {
    client: Arc<dyn StoreClient>,
    service_key: String,
    config: RwLock<StoreAndForwardConfig>,
}

impl StoreForward {
    pub fn new(
        client: Arc<dyn StoreClient>,
        service_key: impl Into<String>,
        config: StoreAndForwardConfig,
    ) -> Self {
        Self {
            client,
            service_key: service_key.into(),
            config: RwLock::new(config),
        }
    }

    /// Replace the writable configuration block.
    pub fn set_config(&self, config: StoreAndForwardConfig) {
        *self.config.write() = config;
    }

    /// Whether storing and retrying is currently enabled.
    pub fn enabled(&self) -> bool {
        self.config.read().enabled
    }

    /// Current retry interval (clamped).
    pub fn retry_interval(&self) -> Duration {
        self.config.read().retry_interval()
    }

    /// Service key partitioning the store.
    pub fn service_key(&self) -> &str {
        &self.service_key
    }

    /// Store client handle.
    pub fn client(&self) -> &Arc<dyn StoreClient> {
        &self.client
    }

    /// Retain a payload that failed mid-pipeline.
    ///
    /// When the feature is disabled this logs a warning and discards the
    /// payload.
    pub fn store_for_later(
        &self,
        pipeline_id: &str,
        pipeline_version: &str,
        pipeline_position: usize,
        payload: Vec<u8>,
        ctx: &Context,
    ) {
        if !self.enabled() {
            warn!(
                pipeline_id,
                correlation_id = ctx.correlation_id(),
                "store and forward is disabled, discarding failed payload"
            );
            return;
        }

        let object = StoredObject::new(
            &self.service_key,
            payload,
            pipeline_id,
            pipeline_position,
            pipeline_version,
            ctx.correlation_id(),
            ctx.values().clone(),
        );

        match self.client.store(&object) {
            Ok(id) => info!(
                id,
                pipeline_id,
                pipeline_position,
                correlation_id = ctx.correlation_id(),
                "stored failed payload for retry"
            ),
            Err(e) => error!(pipeline_id, error = %e, "failed to store payload for retry"),
        }
    }

    /// Run the retry loop until the token is cancelled.
    ///
    /// The token is a child of the service scope so the engine can be
    /// toggled without restarting the service.
    pub async fn run_retry_loop(
        self: Arc<Self>,
        executor: Arc<dyn RetryExecutor>,
        token: CancellationToken,
    ) {
        let interval = self.retry_interval();
        info!(interval = ?interval, "store and forward retry loop started");
        let mut ticker = tokio::time::interval(interval);
        // The first interval tick fires immediately; skip it so the first
        // retry happens one full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("store and forward retry loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.retry_once(executor.as_ref()).await;
                }
            }
        }
    }

    /// Process one retry tick: load, classify, and mutate the store.
    pub async fn retry_once(&self, executor: &dyn RetryExecutor) {
        let objects = match self.client.retrieve_from_store(&self.service_key) {
            Ok(objects) => objects,
            Err(e) => {
                error!(error = %e, "failed to load stored objects, skipping tick");
                return;
            }
        };
        if objects.is_empty() {
            return;
        }
        debug!(count = objects.len(), "retrying stored objects");

        for object in objects {
            match self.classify(executor, &object).await {
                Disposition::Remove(reason) => {
                    debug!(id = %object.id, reason, "removing stored object");
                    if let Err(e) = self.client.remove_from_store(&object) {
                        // Leave the item for the next tick.
                        error!(id = %object.id, error = %e, "failed to remove stored object");
                    }
                }
                Disposition::Update(updated) => {
                    debug!(
                        id = %updated.id,
                        retry_count = updated.retry_count,
                        "updating stored object after failed retry"
                    );
                    if let Err(e) = self.client.update(&updated) {
                        error!(id = %updated.id, error = %e, "failed to update stored object");
                    }
                }
            }
        }
    }

    async fn classify(&self, executor: &dyn RetryExecutor, object: &StoredObject) -> Disposition {
        let current_hash = match executor.pipeline_hash(&object.pipeline_id) {
            Some(hash) => hash,
            None => return Disposition::Remove("pipeline no longer exists"),
        };
        if current_hash != object.version {
            // Resuming mid-pipeline is meaningless after reconfiguration.
            return Disposition::Remove("pipeline was reconfigured");
        }

        match executor.execute_retry(object).await {
            Ok(()) => Disposition::Remove("retry succeeded"),
            Err(e) => {
                debug!(id = %object.id, error = %e, "retry attempt failed");
                let mut updated = object.clone();
                updated.retry_count += 1;
                let max = self.config.read().normalized_max_retry_count();
                if max == 0 || updated.retry_count <= max {
                    Disposition::Update(updated)
                } else {
                    Disposition::Remove("max retries exceeded")
                }
            }
        }
    }
}
