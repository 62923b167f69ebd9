//! Startup error types.

use common::ConfigError;
use domain::GatewayError;
use store::StoreError;
use thiserror::Error;

/// Errors raised while configuring and assembling the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The HTTP gateway client could not be built.
    #[error("Gateway setup failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),
}
