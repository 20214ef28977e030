//! EdgeFlow application service shell.
//!
//! Ties the pieces together: loads pipelines from configuration into
//! the runtime, wires the store-and-forward engine, starts the
//! configured trigger, and manages graceful shutdown. Embedders build
//! a [`Service`], optionally customize it with the builder methods,
//! then call [`Service::run`].

pub mod error;
pub mod service;

pub use error::{Result, ServiceError};
pub use service::{BackgroundPublisher, Service};

/// Initialize tracing output for a service binary.
///
/// Reads `RUST_LOG` when set; otherwise defaults to info-level output
/// for the edgeflow crates. JSON output suits container deployments,
/// the compact format suits a terminal.
pub fn init_logging(json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,edgeflow=debug"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}
