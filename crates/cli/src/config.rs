//! CLI configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `CART_API_URL` - Cart backend base URL (unset: guest-only mode)
//! - `CART_API_TOKEN` - Bearer token for the cart backend
//! - `CART_ACCOUNT` - Account label used by `login` (default: default)
//! - `CART_STORAGE_DIR` - Where the guest cart is kept (default: .duka)
//! - `CART_TAX_RATE` - Tax rate as a fraction (default: 0.16)
//! - `CART_FREE_SHIPPING_THRESHOLD` - Subtotal for free shipping (default: 5000)
//! - `CART_DEFAULT_SHIPPING` - Flat shipping charge (default: 300)
//! - `CART_EXPRESS_SHIPPING` - Double the shipping charge (default: false)
//! - `CART_CURRENCY` - ISO currency code (default: KES)
//! - `CART_HTTP_TIMEOUT_SECS` - Backend request timeout (default: 10)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `LOG_FORMAT` - `text` or `json` (default: text)

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use duka_cart::{CartConfig, CartLimits, PricingPolicy, ShippingPolicy};
use duka_core::CurrencyCode;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected text or json, got {other}")),
        }
    }
}

/// CLI configuration.
#[derive(Clone)]
pub struct CliConfig {
    /// Cart backend base URL. `None` runs in guest-only mode.
    pub api_url: Option<Url>,
    /// Bearer token for the cart backend
    pub api_token: Option<SecretString>,
    /// Account label `login` uses when none is given
    pub account: String,
    /// Guest cart and session directory
    pub storage_dir: PathBuf,
    pub http_timeout: Duration,
    pub cart: CartConfig,
    /// Sentry error tracking DSN
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for CliConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliConfig")
            .field("api_url", &self.api_url.as_ref().map(Url::as_str))
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("account", &self.account)
            .field("storage_dir", &self.storage_dir)
            .field("http_timeout", &self.http_timeout)
            .field("cart", &self.cart)
            .field("sentry_dsn", &self.sentry_dsn.as_ref().map(|_| "[REDACTED]"))
            .field("sentry_environment", &self.sentry_environment)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but can't be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration through `var`, which returns the value of a
    /// variable if it is set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but can't be parsed.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Vars(var);

        let api_url = env
            .optional("CART_API_URL")
            .map(|raw| {
                Url::parse(&raw)
                    .map_err(|e| ConfigError::InvalidEnvVar("CART_API_URL".to_string(), e.to_string()))
            })
            .transpose()?;

        let defaults = PricingPolicy::default();
        let pricing = PricingPolicy {
            tax_rate: env.parse_or("CART_TAX_RATE", defaults.tax_rate)?,
            shipping: ShippingPolicy {
                free_shipping_threshold: env.parse_or(
                    "CART_FREE_SHIPPING_THRESHOLD",
                    defaults.shipping.free_shipping_threshold,
                )?,
                default_shipping: env
                    .parse_or("CART_DEFAULT_SHIPPING", defaults.shipping.default_shipping)?,
                express: env.parse_or("CART_EXPRESS_SHIPPING", false)?,
            },
            currency: env.parse_or("CART_CURRENCY", CurrencyCode::default())?,
        };
        if pricing.tax_rate < Decimal::ZERO || pricing.tax_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidEnvVar(
                "CART_TAX_RATE".to_string(),
                "must be a fraction between 0 and 1".to_string(),
            ));
        }

        Ok(Self {
            api_url,
            api_token: env.optional("CART_API_TOKEN").map(SecretString::from),
            account: env.or_default("CART_ACCOUNT", "default"),
            storage_dir: PathBuf::from(env.or_default("CART_STORAGE_DIR", ".duka")),
            http_timeout: Duration::from_secs(env.parse_or("CART_HTTP_TIMEOUT_SECS", 10)?),
            cart: CartConfig {
                limits: CartLimits::default(),
                pricing,
                ..CartConfig::default()
            },
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
            log_format: env.parse_or("LOG_FORMAT", LogFormat::default())?,
        })
    }

    /// Whether a cart backend is configured.
    #[must_use]
    pub const fn is_online(&self) -> bool {
        self.api_url.is_some()
    }

    /// The backend URL, required for account operations.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` in guest-only mode.
    pub fn require_api_url(&self) -> Result<&Url, ConfigError> {
        self.api_url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("CART_API_URL".to_string()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    /// Get an optional variable. Blank values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable, or return `default` when unset.
    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.optional(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<CliConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        CliConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert!(!config.is_online());
        assert!(config.require_api_url().is_err());
        assert_eq!(config.account, "default");
        assert_eq!(config.storage_dir, PathBuf::from(".duka"));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.cart.pricing, PricingPolicy::default());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CART_API_URL", "https://api.duka.shop/v1"),
            ("CART_TAX_RATE", "0.08"),
            ("CART_CURRENCY", "usd"),
            ("CART_EXPRESS_SHIPPING", "true"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(
            config.require_api_url().unwrap().as_str(),
            "https://api.duka.shop/v1"
        );
        assert_eq!(config.cart.pricing.tax_rate, Decimal::new(8, 2));
        assert_eq!(config.cart.pricing.currency, CurrencyCode::USD);
        assert!(config.cart.pricing.shipping.express);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_blank_values_are_unset() {
        let config = load(&[("CART_API_URL", "  "), ("CART_ACCOUNT", "")]).unwrap();
        assert!(!config.is_online());
        assert_eq!(config.account, "default");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            load(&[("CART_API_URL", "not a url")]),
            Err(ConfigError::InvalidEnvVar(key, _)) if key == "CART_API_URL"
        ));
        assert!(matches!(
            load(&[("CART_TAX_RATE", "1.5")]),
            Err(ConfigError::InvalidEnvVar(key, _)) if key == "CART_TAX_RATE"
        ));
        assert!(matches!(
            load(&[("CART_HTTP_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::InvalidEnvVar(key, _)) if key == "CART_HTTP_TIMEOUT_SECS"
        ));
        assert!(load(&[("CART_CURRENCY", "XYZ")]).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = load(&[("CART_API_TOKEN", "super-secret-token")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
