// config.rs
use ::config::{Config as Settings, Environment};
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Stripe's own SDKs reject signatures older than five minutes.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Required STRIPE_SECRET env variable is missing")]
    MissingSecret,
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ::config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stripe_secret: String,
    pub bind_address: String,
    pub signature_tolerance_secs: u64,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(Environment::default())
    }

    /// Loads configuration from an explicit set of variables instead of the
    /// process environment. Keys use the same names as the env variables.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::build(Environment::default().source(Some(vars)))
    }

    fn build(environment: Environment) -> Result<Self, ConfigError> {
        let settings = Settings::builder()
            .set_default("stripe_secret", "")?
            .set_default("bind_address", DEFAULT_BIND_ADDRESS)?
            .set_default("signature_tolerance_secs", DEFAULT_SIGNATURE_TOLERANCE_SECS)?
            .add_source(environment)
            .build()?;

        let config: Config = settings.try_deserialize()?;
        if config.stripe_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        Ok(config)
    }
}
