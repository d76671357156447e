use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use tracing::info;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HOST: &str = "0.0.0.0";
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "eur";
const DEFAULT_TAX_RATE: f64 = 0.19;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_PAYPAL_BASE_URL: &str = "https://api-m.paypal.com";

/// Hosted-checkout-session processor credentials.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StripeConfig {
    /// API secret key
    #[serde(default)]
    pub secret_key: String,
    /// Shared secret for webhook signature verification
    #[serde(default)]
    pub webhook_secret: String,
}

/// Create-order/capture processor credentials.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaypalConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_paypal_base_url")]
    pub base_url: String,
}

impl Default for PaypalConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            base_url: default_paypal_base_url(),
        }
    }
}

/// Identity directory connection (session lookup, anonymous session
/// exchange, elevation calls).
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    #[serde(default)]
    pub base_url: String,
    /// Service-role key used for server-to-directory calls
    #[serde(default)]
    pub service_key: String,
}

/// Bot-challenge widget configuration. The token itself is verified by the
/// identity directory during the anonymous-session exchange; the site key is
/// only served to the client.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ChallengeConfig {
    #[serde(default)]
    pub site_key: String,
}

/// Notification sender credentials.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Default "from" address for outgoing mail
    #[serde(default)]
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: None,
            password: None,
            from: String::new(),
        }
    }
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Maximum database connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Minimum database connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// ISO currency code used for checkout intents
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Fixed tax rate applied to cart subtotals
    #[serde(default = "default_tax_rate")]
    #[validate(custom = "validate_tax_rate")]
    pub default_tax_rate: f64,

    /// Whether shoppers without a session may check out anonymously
    #[serde(default = "default_true")]
    pub allow_anonymous_checkout: bool,

    /// Redirect target after a completed hosted checkout
    #[serde(default)]
    pub checkout_success_url: String,

    /// Redirect target after an abandoned hosted checkout
    #[serde(default)]
    pub checkout_cancel_url: String,

    /// Recipient for internal order alerts
    #[serde(default)]
    pub admin_email: String,

    #[serde(default)]
    #[validate]
    pub stripe: StripeConfig,

    #[serde(default)]
    #[validate]
    pub paypal: PaypalConfig,

    #[serde(default)]
    #[validate]
    pub identity: IdentityConfig,

    #[serde(default)]
    #[validate]
    pub challenge: ChallengeConfig,

    #[serde(default)]
    #[validate]
    pub smtp: SmtpConfig,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}
fn default_true() -> bool {
    true
}
fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}
fn default_paypal_base_url() -> String {
    DEFAULT_PAYPAL_BASE_URL.to_string()
}

fn validate_tax_rate(rate: f64) -> Result<(), ValidationError> {
    if (0.0..1.0).contains(&rate) {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("tax rate must be within [0.0, 1.0)".into());
        Err(err)
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Missing required configuration: {0}")]
    MissingRequired(&'static str),
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling. Production code goes
    /// through [`load_config`].
    pub fn new(database_url: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            host: default_host(),
            port: default_port(),
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            currency: default_currency(),
            default_tax_rate: default_tax_rate(),
            allow_anonymous_checkout: true,
            checkout_success_url: "http://localhost:3000/checkout/success".to_string(),
            checkout_cancel_url: "http://localhost:3000/checkout/cancelled".to_string(),
            admin_email: "orders@example.test".to_string(),
            stripe: StripeConfig::default(),
            paypal: PaypalConfig::default(),
            identity: IdentityConfig::default(),
            challenge: ChallengeConfig::default(),
            smtp: SmtpConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Every secret the payment path depends on must be present before the
    /// server accepts traffic; a missing key mid-request is not acceptable.
    pub fn validate_required_secrets(&self) -> Result<(), AppConfigError> {
        let required: [(&'static str, &str); 11] = [
            ("database_url", &self.database_url),
            ("stripe.secret_key", &self.stripe.secret_key),
            ("stripe.webhook_secret", &self.stripe.webhook_secret),
            ("paypal.client_id", &self.paypal.client_id),
            ("paypal.client_secret", &self.paypal.client_secret),
            ("identity.base_url", &self.identity.base_url),
            ("identity.service_key", &self.identity.service_key),
            ("challenge.site_key", &self.challenge.site_key),
            ("smtp.host", &self.smtp.host),
            ("smtp.from", &self.smtp.from),
            ("admin_email", &self.admin_email),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(AppConfigError::MissingRequired(key));
            }
        }
        Ok(())
    }
}

/// Loads layered configuration:
/// 1. Base config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let builder = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let app_config: AppConfig = builder.build()?.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| AppConfigError::ValidationError(e.to_string()))?;
    app_config.validate_required_secrets()?;

    info!(
        environment = %app_config.environment,
        port = app_config.port,
        "configuration loaded"
    );
    Ok(app_config)
}

/// Initializes the global tracing subscriber. Call once at startup.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_config() -> AppConfig {
        let mut cfg = AppConfig::new("sqlite::memory:", "test");
        cfg.stripe.secret_key = "sk_test_123".into();
        cfg.stripe.webhook_secret = "whsec_123".into();
        cfg.paypal.client_id = "client".into();
        cfg.paypal.client_secret = "secret".into();
        cfg.identity.base_url = "http://localhost:9999".into();
        cfg.identity.service_key = "service_role_key".into();
        cfg.challenge.site_key = "site_key".into();
        cfg.smtp.host = "smtp.example.test".into();
        cfg.smtp.from = "shop@example.test".into();
        cfg
    }

    #[test]
    fn populated_config_passes_secret_validation() {
        assert!(populated_config().validate_required_secrets().is_ok());
    }

    #[test]
    fn missing_webhook_secret_fails_fast_with_key_name() {
        let mut cfg = populated_config();
        cfg.stripe.webhook_secret = String::new();
        let err = cfg.validate_required_secrets().unwrap_err();
        assert!(err.to_string().contains("stripe.webhook_secret"));
    }

    #[test]
    fn missing_challenge_site_key_fails_fast() {
        let mut cfg = populated_config();
        cfg.challenge.site_key = "  ".into();
        assert!(cfg.validate_required_secrets().is_err());
    }

    #[test]
    fn tax_rate_outside_unit_interval_is_rejected() {
        let mut cfg = populated_config();
        cfg.default_tax_rate = 1.2;
        assert!(cfg.validate().is_err());

        cfg.default_tax_rate = 0.19;
        assert!(cfg.validate().is_ok());
    }
}
