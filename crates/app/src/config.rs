//! Application configuration loaded from environment variables.

use std::fmt;
use std::str::FromStr;

use common::ConfigError;
use common::config::{get_env_or_default, get_parsed_env, get_required_env, parse_value};
use domain::CommerceConfig;
use gateway::GatewayConfig;
use secrecy::SecretString;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format {other:?}, expected json or pretty")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Pretty => f.write_str("pretty"),
        }
    }
}

/// Complete application configuration.
///
/// Reads from environment variables:
/// - `DATABASE_URL` — PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `10`)
/// - `LOG_FORMAT` — `json` or `pretty` (default: `pretty`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
///
/// plus everything read by [`CommerceConfig::from_env`] and
/// [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: SecretString,
    pub database_max_connections: u32,
    pub log_format: LogFormat,
    pub log_filter: String,
    pub commerce: CommerceConfig,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_max_connections = get_parsed_env("DATABASE_MAX_CONNECTIONS", 10u32)?;
        if database_max_connections == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "DATABASE_MAX_CONNECTIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url: SecretString::from(get_required_env("DATABASE_URL")?),
            database_max_connections,
            log_format: parse_value("LOG_FORMAT", &get_env_or_default("LOG_FORMAT", "pretty"))?,
            log_filter: get_env_or_default("RUST_LOG", "info"),
            commerce: CommerceConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
        })
    }
}
