//! Process configuration, read from the environment (and `.env` if present).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::services::WebhookSecrets;
use storefront_payments::{
    GatewayRegistry, PaymentProviderError, PaystackConfig, PaystackGateway, StripeConfig,
    StripeGateway,
};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
pub const DEFAULT_PAYSTACK_API_BASE: &str = "https://api.paystack.co";
pub const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";
const FALLBACK_EMAIL: &str = "customer@example.com";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaystackSettings {
    /// Also the key Paystack signs webhooks with.
    pub secret_key: String,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` means the caller falls back to a development secret.
    pub jwt_secret: Option<String>,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub currency: String,
    pub stripe: Option<StripeSettings>,
    pub paystack: Option<PaystackSettings>,
    pub payment_timeout: Duration,
    pub cart_ttl: chrono::Duration,
    pub frontend_url: String,
}

impl AppConfig {
    /// Load from the process environment, seeding it from `.env` when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let payment_timeout_secs = parse_number(&get, "PAYMENT_TIMEOUT_SECS", 15)?;
        if payment_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "PAYMENT_TIMEOUT_SECS",
                reason: "must be at least 1".into(),
            });
        }
        let cart_ttl_hours = parse_number(&get, "CART_TTL_HOURS", 168)?;

        let stripe = get("STRIPE_SECRET_KEY").map(|secret_key| StripeSettings {
            secret_key,
            webhook_secret: get("STRIPE_WEBHOOK_SECRET"),
            api_base: get("STRIPE_API_BASE").unwrap_or_else(|| DEFAULT_STRIPE_API_BASE.into()),
        });
        let paystack = get("PAYSTACK_SECRET_KEY").map(|secret_key| PaystackSettings {
            secret_key,
            api_base: get("PAYSTACK_API_BASE").unwrap_or_else(|| DEFAULT_PAYSTACK_API_BASE.into()),
        });

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            jwt_secret: get("JWT_SECRET"),
            database_url: get("DATABASE_URL"),
            currency: get("CURRENCY").unwrap_or_else(|| "usd".into()).to_lowercase(),
            stripe,
            paystack,
            payment_timeout: Duration::from_secs(payment_timeout_secs),
            cart_ttl: chrono::Duration::hours(cart_ttl_hours as i64),
            frontend_url: get("FRONTEND_URL").unwrap_or_else(|| DEFAULT_FRONTEND_URL.into()),
        })
    }

    pub fn stripe_config(&self) -> Option<StripeConfig> {
        self.stripe.as_ref().map(|s| StripeConfig {
            secret_key: s.secret_key.clone(),
            api_base: s.api_base.clone(),
            currency: self.currency.clone(),
            timeout: self.payment_timeout,
        })
    }

    pub fn paystack_config(&self) -> Option<PaystackConfig> {
        self.paystack.as_ref().map(|s| PaystackConfig {
            secret_key: s.secret_key.clone(),
            api_base: s.api_base.clone(),
            currency: self.currency.clone(),
            timeout: self.payment_timeout,
            fallback_email: FALLBACK_EMAIL.into(),
            frontend_url: self.frontend_url.clone(),
        })
    }

    pub fn webhook_secrets(&self) -> WebhookSecrets {
        WebhookSecrets {
            stripe: self.stripe.as_ref().and_then(|s| s.webhook_secret.clone()),
            paystack: self.paystack.as_ref().map(|s| s.secret_key.clone()),
        }
    }

    /// Gateways for every provider with credentials; COD is always available.
    pub fn gateways(&self) -> Result<GatewayRegistry, PaymentProviderError> {
        let mut registry = GatewayRegistry::new();
        if let Some(config) = self.stripe_config() {
            registry = registry.with(Arc::new(StripeGateway::new(config)?));
        }
        if let Some(config) = self.paystack_config() {
            registry = registry.with(Arc::new(PaystackGateway::new(config)?));
        }
        info!(providers = ?registry.providers(), "payment gateways configured");
        Ok(registry)
    }
}

fn parse_number<G>(get: &G, var: &'static str, default: u64) -> Result<u64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
            var,
            reason: format!("{raw:?}: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(cfg.currency, "usd");
        assert_eq!(cfg.payment_timeout, Duration::from_secs(15));
        assert_eq!(cfg.cart_ttl, chrono::Duration::hours(168));
        assert!(cfg.jwt_secret.is_none());
        assert!(cfg.database_url.is_none());
        assert!(cfg.stripe.is_none() && cfg.paystack.is_none());
    }

    #[test]
    fn providers_need_a_secret_key() {
        let cfg = config(&[
            ("STRIPE_WEBHOOK_SECRET", "whsec_x"),
            ("PAYSTACK_SECRET_KEY", "sk_test_1"),
            ("CURRENCY", "NGN"),
        ])
        .unwrap();
        assert!(cfg.stripe.is_none());
        assert_eq!(cfg.webhook_secrets().paystack.as_deref(), Some("sk_test_1"));
        assert!(cfg.webhook_secrets().stripe.is_none());

        let paystack = cfg.paystack_config().unwrap();
        assert_eq!(paystack.api_base, DEFAULT_PAYSTACK_API_BASE);
        assert_eq!(paystack.currency, "ngn");
        assert_eq!(paystack.frontend_url, DEFAULT_FRONTEND_URL);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config(&[("JWT_SECRET", "  "), ("DATABASE_URL", "")]).unwrap();
        assert!(cfg.jwt_secret.is_none());
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = config(&[("PAYMENT_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PAYMENT_TIMEOUT_SECS", .. }));
        assert!(config(&[("PAYMENT_TIMEOUT_SECS", "0")]).is_err());
    }

    #[test]
    fn registry_only_holds_configured_providers() {
        use storefront_payments::PaymentProvider;

        let cfg = config(&[("STRIPE_SECRET_KEY", "sk_test_stripe")]).unwrap();
        let registry = cfg.gateways().unwrap();
        assert_eq!(
            registry.providers(),
            vec![PaymentProvider::Cod, PaymentProvider::Stripe]
        );
    }
}
