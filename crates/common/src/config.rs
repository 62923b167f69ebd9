//! Environment variable helpers shared by the configuration types.

use std::str::FromStr;

use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Get a required environment variable.
pub fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable, treating empty values as unset.
pub fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
pub fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
pub fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_optional_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// Parse a raw value, naming `key` in the error.
pub fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_reports_key() {
        let err = parse_value::<u64>("COMMERCE_PAYMENT_TIMEOUT_SECS", "soon").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "COMMERCE_PAYMENT_TIMEOUT_SECS"));
    }

    #[test]
    fn test_parse_value_trims() {
        assert_eq!(parse_value::<u32>("K", " 42 "), Ok(42));
    }

    #[test]
    fn test_missing_required_env() {
        let err = get_required_env("COMMON_TEST_SURELY_UNSET_VAR").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingEnvVar("COMMON_TEST_SURELY_UNSET_VAR".to_string())
        );
    }

    #[test]
    fn test_parsed_env_default_when_unset() {
        assert_eq!(get_parsed_env("COMMON_TEST_SURELY_UNSET_NUM", 7u32), Ok(7));
    }
}
