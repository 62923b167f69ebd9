//! Commerce configuration loaded from environment variables.

use std::time::Duration;

use common::ConfigError;
use common::config::{get_env_or_default, get_parsed_env};

/// Tunables of the transaction core.
///
/// Reads from environment variables:
/// - `COMMERCE_CURRENCY` — ISO currency of new orders (default: `"INR"`)
/// - `COMMERCE_SESSION_CART_TTL_SECS` — guest cart lifetime after last write (default: `86400`)
/// - `COMMERCE_PAYMENT_TIMEOUT_SECS` — age after which a processing payment is abandoned (default: `900`)
/// - `COMMERCE_NOTIFICATION_QUEUE_CAPACITY` — bound of the outbound notification queue (default: `1024`)
/// - `COMMERCE_MAX_LINE_QUANTITY` — largest quantity of a single cart line (default: `999`)
#[derive(Debug, Clone)]
pub struct CommerceConfig {
    pub currency: String,
    pub session_cart_ttl: Duration,
    pub payment_timeout: Duration,
    pub notification_queue_capacity: usize,
    pub max_line_quantity: u32,
}

impl CommerceConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            currency: get_env_or_default("COMMERCE_CURRENCY", &defaults.currency).to_uppercase(),
            session_cart_ttl: Duration::from_secs(get_parsed_env(
                "COMMERCE_SESSION_CART_TTL_SECS",
                defaults.session_cart_ttl.as_secs(),
            )?),
            payment_timeout: Duration::from_secs(get_parsed_env(
                "COMMERCE_PAYMENT_TIMEOUT_SECS",
                defaults.payment_timeout.as_secs(),
            )?),
            notification_queue_capacity: get_parsed_env(
                "COMMERCE_NOTIFICATION_QUEUE_CAPACITY",
                defaults.notification_queue_capacity,
            )?,
            max_line_quantity: get_parsed_env(
                "COMMERCE_MAX_LINE_QUANTITY",
                defaults.max_line_quantity,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.currency.len() != 3 {
            return Err(ConfigError::InvalidEnvVar(
                "COMMERCE_CURRENCY".to_string(),
                "must be a three-letter currency code".to_string(),
            ));
        }
        if self.notification_queue_capacity == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "COMMERCE_NOTIFICATION_QUEUE_CAPACITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if self.max_line_quantity == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "COMMERCE_MAX_LINE_QUANTITY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the payment retry window as a `chrono` duration.
    pub fn payment_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.payment_timeout).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self {
            currency: "INR".to_string(),
            session_cart_ttl: Duration::from_secs(24 * 60 * 60),
            payment_timeout: Duration::from_secs(15 * 60),
            notification_queue_capacity: 1024,
            max_line_quantity: 999,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = CommerceConfig::default();
        assert_eq!(config.currency, "INR");
        assert_eq!(config.session_cart_ttl, Duration::from_secs(86_400));
        assert_eq!(config.payment_timeout, Duration::from_secs(900));
        assert_eq!(config.notification_queue_capacity, 1024);
        assert_eq!(config.max_line_quantity, 999);
    }

    #[test]
    fn test_payment_timeout_chrono() {
        let config = CommerceConfig::default();
        assert_eq!(config.payment_timeout_chrono(), chrono::Duration::minutes(15));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = CommerceConfig {
            notification_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidEnvVar(key, _)) if key == "COMMERCE_NOTIFICATION_QUEUE_CAPACITY"
        ));
    }
}
