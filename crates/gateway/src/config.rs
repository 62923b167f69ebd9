//! Gateway configuration loaded from environment variables.

use std::time::Duration;

use common::ConfigError;
use common::config::{get_optional_env, get_parsed_env, get_required_env};
use secrecy::SecretString;

/// Credentials and endpoint of the payment provider.
///
/// Reads from environment variables:
/// - `GATEWAY_BASE_URL` — provider API root (default: `https://api.razorpay.com`)
/// - `GATEWAY_KEY_ID` — public key id, also handed to clients (required)
/// - `GATEWAY_KEY_SECRET` — merchant secret used for basic auth and payment signatures (required)
/// - `GATEWAY_WEBHOOK_SECRET` — webhook signing secret (optional; webhooks are rejected without it)
/// - `GATEWAY_TIMEOUT_SECS` — per-request timeout (default: `30`)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: SecretString,
    pub webhook_secret: Option<SecretString>,
    pub timeout: Duration,
}

pub const DEFAULT_BASE_URL: &str = "https://api.razorpay.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

impl GatewayConfig {
    /// Builds a configuration with default endpoint and timeout.
    pub fn new(key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            key_id: key_id.into(),
            key_secret: SecretString::from(key_secret.into()),
            webhook_secret: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(
            get_required_env("GATEWAY_KEY_ID")?,
            get_required_env("GATEWAY_KEY_SECRET")?,
        );
        if let Some(base_url) = get_optional_env("GATEWAY_BASE_URL") {
            config.base_url = base_url;
        }
        config.webhook_secret = get_optional_env("GATEWAY_WEBHOOK_SECRET").map(SecretString::from);
        config.timeout = Duration::from_secs(get_parsed_env(
            "GATEWAY_TIMEOUT_SECS",
            DEFAULT_TIMEOUT.as_secs(),
        )?);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidEnvVar(
                "GATEWAY_BASE_URL".to_string(),
                "must be an http(s) URL".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "GATEWAY_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
