//! # Order Pipeline Service
//!
//! Process-level wiring for the order pipeline: configuration from the
//! environment, logging and metrics setup, the front door request type, and
//! signal handling. The `order-consumer` and `order-publish` binaries are
//! built on top of this crate.

pub mod config;
pub mod request;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use request::CreateOrderRequest;

use tokio::signal;
use tracing::{error, info};

/// Resolve on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
