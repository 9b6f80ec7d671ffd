//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub stripe_secret_key: String,
    pub stripe_publishable_key: Option<String>,
    pub stripe_api_base: String,
    pub payment_currency: String,
    pub public_base_url: String,
    pub gateway_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Load Server and Database Settings ---
        let bind_address_str = var("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            var("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            var("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Load Payment Gateway Settings ---
        // A missing secret key is a deployment error, not a per-request failure.
        let stripe_secret_key = var("STRIPE_SECRET_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("STRIPE_SECRET_KEY".to_string()))?;
        let stripe_publishable_key = var("STRIPE_PUBLISHABLE_KEY").filter(|k| !k.is_empty());
        let stripe_api_base =
            var("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string());

        let payment_currency = var("PAYMENT_CURRENCY")
            .unwrap_or_else(|| "inr".to_string())
            .to_lowercase();
        if payment_currency.len() != 3 || !payment_currency.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_CURRENCY".to_string(),
                format!("'{}' is not an ISO currency code", payment_currency),
            ));
        }

        let public_base_url =
            var("PUBLIC_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string());

        let timeout_str = var("GATEWAY_TIMEOUT_SECS").unwrap_or_else(|| "10".to_string());
        let gateway_timeout = timeout_str
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "GATEWAY_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a positive number of seconds", timeout_str),
                )
            })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            stripe_secret_key,
            stripe_publishable_key,
            stripe_api_base,
            payment_currency,
            public_base_url,
            gateway_timeout,
        })
    }
}
