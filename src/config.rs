//! Environment configuration.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::domain::value_objects::Money;
use crate::pricing::{PricingRules, ScopedDiscountBasis, ShippingRule};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value `{value}`")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub storefront_api_url: String,
    pub address_api_url: String,
    pub api_token: Option<String>,
    pub free_shipping_threshold: Money,
    pub base_shipping_fee: Money,
    pub scoped_basis: ScopedDiscountBasis,
    pub coupon_refresh: Duration,
    pub http_timeout: Duration,
    /// Sessions untouched for this long are dropped from memory.
    pub session_idle_ttl: Duration,
    pub session_sweep: Duration,
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let storefront_api_url = var("STOREFRONT_API_URL").unwrap_or_else(|| "http://localhost:8000/api".to_string());
        Ok(Self {
            port: parse(&var, "PORT", 8083)?,
            address_api_url: var("ADDRESS_API_URL").unwrap_or_else(|| storefront_api_url.clone()),
            storefront_api_url,
            api_token: var("STOREFRONT_API_TOKEN"),
            free_shipping_threshold: Money::vnd(parse(&var, "FREE_SHIPPING_THRESHOLD", 5_000_000)?),
            base_shipping_fee: Money::vnd(parse(&var, "BASE_SHIPPING_FEE", 30_000)?),
            scoped_basis: parse(&var, "SCOPED_DISCOUNT_BASIS", ScopedDiscountBasis::default())?,
            coupon_refresh: parse_secs(&var, "COUPON_REFRESH_SECS", 60)?,
            http_timeout: parse_secs(&var, "HTTP_TIMEOUT_SECS", 10)?,
            session_idle_ttl: parse_secs(&var, "SESSION_IDLE_SECS", 1800)?,
            session_sweep: parse_secs(&var, "SESSION_SWEEP_SECS", 60)?,
            database_url: var("DATABASE_URL"),
            nats_url: var("NATS_URL"),
        })
    }

    pub fn pricing_rules(&self) -> PricingRules {
        PricingRules {
            shipping: ShippingRule { free_threshold: self.free_shipping_threshold, base_fee: self.base_shipping_fee },
            scoped_basis: self.scoped_basis,
        }
    }
}

fn parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

/// Whole seconds, at least one.
fn parse_secs(var: &impl Fn(&str) -> Option<String>, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match parse(var, key, default)? {
        0 => Err(ConfigError::Invalid { key, value: "0".to_string() }),
        secs => Ok(Duration::from_secs(secs)),
    }
}
