//! Composition root for the commerce transaction core.
//!
//! Loads [`AppConfig`] from the environment, installs the tracing
//! subscriber and assembles the services against PostgreSQL and the HTTP
//! payment gateway:
//!
//! ```no_run
//! # async fn run(ports: app::Ports) -> Result<(), app::AppError> {
//! let config = app::AppConfig::from_env()?;
//! app::telemetry::init(config.log_format, &config.log_filter)?;
//! let core = app::bootstrap(&config, ports).await?;
//! // hand `core.services` to the transport layer
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod telemetry;

pub use bootstrap::{App, Ports, assemble, bootstrap, connect};
pub use config::{AppConfig, LogFormat};
pub use error::AppError;
