use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::services::polling::PollPolicy;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api";
const DEFAULT_PROVIDER_SANDBOX_URL: &str = "https://api-sandbox.co.uat.wompi.dev/v1";
const DEFAULT_CURRENCY: &str = "COP";
const DEFAULT_TAX_RATE: f64 = 0.19;
const DEFAULT_DELIVERY_FEE: i64 = 5000;
const DEFAULT_BASE_FEE: i64 = 2000;
const DEFAULT_PAGE_SIZE: u32 = 6;
const DEFAULT_MAX_PAGE_SIZE: u32 = 18;
const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const PUBLIC_KEY_PREFIX: &str = "pub_";

/// Which provider environment the keys belong to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    #[default]
    Sandbox,
    Production,
}

/// Payment provider connection settings
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider REST base URL (sandbox by default)
    #[serde(default = "default_provider_base_url")]
    #[validate(url)]
    pub base_url: String,

    /// Public key, used for merchant lookup and card tokenization
    #[validate(custom = "validate_public_key")]
    pub public_key: String,

    /// Private key, used for charges and status queries
    #[serde(default)]
    pub private_key: String,

    /// Secret mixed into the integrity signature
    #[serde(default)]
    pub integrity_key: String,

    #[serde(default)]
    pub mode: PaymentMode,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("public_key", &self.public_key)
            .field("private_key", &redact(&self.private_key))
            .field("integrity_key", &redact(&self.integrity_key))
            .field("mode", &self.mode)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            public_key: String::new(),
            private_key: String::new(),
            integrity_key: String::new(),
            mode: PaymentMode::Sandbox,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    /// Every 2 seconds, 30 attempts
    #[default]
    Standard,
    /// Every 3 seconds, 15 attempts
    Relaxed,
}

/// Status polling configuration. Explicit values override the mode.
#[derive(Clone, Debug, Deserialize, Validate, Default)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    #[serde(default)]
    pub mode: PollingMode,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub interval_ms: Option<u64>,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_attempts: Option<u32>,
}

impl PollingConfig {
    pub fn policy(&self) -> PollPolicy {
        let base = match self.mode {
            PollingMode::Standard => PollPolicy::standard(),
            PollingMode::Relaxed => PollPolicy::relaxed(),
        };
        PollPolicy {
            interval: self
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.interval),
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            ..base
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1))]
    pub default_page_size: u32,

    #[serde(default = "default_max_page_size")]
    #[validate(range(min = 1))]
    pub max_page_size: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Backend REST base URL
    #[validate(url)]
    pub api_base_url: String,

    #[validate]
    pub provider: ProviderConfig,

    /// ISO currency code for charges
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Tax rate applied to the product amount (0.19 = 19%)
    #[serde(default = "default_tax_rate")]
    pub tax_rate: f64,

    /// Flat delivery fee in whole currency units
    #[serde(default = "default_delivery_fee")]
    #[validate(range(min = 0))]
    pub delivery_fee: i64,

    /// Base fee used when a product does not carry its own
    #[serde(default = "default_base_fee")]
    #[validate(range(min = 0))]
    pub default_base_fee: i64,

    #[serde(default)]
    #[validate]
    pub polling: PollingConfig,

    #[serde(default)]
    #[validate]
    pub pagination: PaginationConfig,

    /// Validity window of saved checkout progress
    #[serde(default = "default_session_ttl_hours")]
    #[validate(range(min = 1))]
    pub session_ttl_hours: i64,

    /// Persist the checkout session to this JSON file instead of memory
    #[serde(default)]
    pub session_file: Option<PathBuf>,

    /// Decrement product stock from the client after an approved payment, for
    /// backends that do not do it while reconciling
    #[serde(default)]
    pub client_stock_update: bool,

    /// Timeout for every outbound HTTP request
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,
}

impl AppConfig {
    /// Configuration with defaults everywhere except the two required values.
    pub fn new(api_base_url: impl Into<String>, provider: ProviderConfig) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            provider,
            currency: default_currency(),
            tax_rate: default_tax_rate(),
            delivery_fee: default_delivery_fee(),
            default_base_fee: default_base_fee(),
            polling: PollingConfig::default(),
            pagination: PaginationConfig::default(),
            session_ttl_hours: default_session_ttl_hours(),
            session_file: None,
            client_stock_update: false,
            request_timeout_secs: default_request_timeout_secs(),
            log_level: default_log_level(),
            log_json: false,
        }
    }

    pub fn is_production(&self) -> bool {
        self.provider.mode == PaymentMode::Production
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.polling.policy()
    }

    /// Full validation: derived field rules plus the cross-field constraints.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.validate_additional_constraints()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() {
            if self.provider.private_key.trim().is_empty() {
                let mut err = ValidationError::new("private_key_required");
                err.message = Some(
                    "Set APP__PROVIDER__PRIVATE_KEY when the provider runs in production mode"
                        .into(),
                );
                errors.add("provider_private_key", err);
            }
            if self.provider.integrity_key.trim().is_empty() {
                let mut err = ValidationError::new("integrity_key_required");
                err.message = Some(
                    "Set APP__PROVIDER__INTEGRITY_KEY when the provider runs in production mode"
                        .into(),
                );
                errors.add("provider_integrity_key", err);
            }
            let secure = url::Url::parse(&self.provider.base_url)
                .map(|u| u.scheme() == "https")
                .unwrap_or(false);
            if !secure {
                let mut err = ValidationError::new("provider_base_url_https");
                err.message = Some("The production provider URL must use https".into());
                errors.add("provider_base_url", err);
            }
        }

        if !self.tax_rate.is_finite() || !(0.0..=1.0).contains(&self.tax_rate) {
            let mut err = ValidationError::new("tax_rate");
            err.message = Some("tax_rate must be a finite value between 0.0 and 1.0".into());
            errors.add("tax_rate", err);
        }

        if self.pagination.default_page_size > self.pagination.max_page_size {
            let mut err = ValidationError::new("page_size");
            err.message = Some("default_page_size must not exceed max_page_size".into());
            errors.add("pagination", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_provider_base_url() -> String {
    DEFAULT_PROVIDER_SANDBOX_URL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}

fn default_delivery_fee() -> i64 {
    DEFAULT_DELIVERY_FEE
}

fn default_base_fee() -> i64 {
    DEFAULT_BASE_FEE
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> u32 {
    DEFAULT_MAX_PAGE_SIZE
}

fn default_session_ttl_hours() -> i64 {
    DEFAULT_SESSION_TTL_HOURS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn validate_public_key(key: &str) -> Result<(), ValidationError> {
    if key.starts_with(PUBLIC_KEY_PREFIX) {
        Ok(())
    } else {
        let mut err = ValidationError::new("public_key");
        err.message = Some("Provider public key must start with 'pub_'".into());
        Err(err)
    }
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_checkout={},checkout_cli={}", level, level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// [`load_config`] reading its files from `config_dir`.
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let default_file = config_dir.join("default");
    let env_file = config_dir.join(&run_env);

    let config = Config::builder()
        .set_default("api_base_url", DEFAULT_API_BASE_URL)?
        .set_default("provider.base_url", DEFAULT_PROVIDER_SANDBOX_URL)?
        .set_default("provider.mode", "sandbox")?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&default_file.to_string_lossy()).required(false))
        .add_source(File::with_name(&env_file.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("provider.public_key").is_err() {
        error!("Provider public key is not configured. Set APP__PROVIDER__PUBLIC_KEY.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "provider.public_key is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(mode = ?app_config.provider.mode, "Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn sandbox_provider() -> ProviderConfig {
        ProviderConfig {
            public_key: "pub_test_abc".into(),
            private_key: "prv_test_abc".into(),
            integrity_key: "test_integrity_abc".into(),
            ..ProviderConfig::default()
        }
    }

    fn base_config() -> AppConfig {
        AppConfig::new("http://localhost:3001/api", sandbox_provider())
    }

    #[test]
    fn defaults_match_storefront_pricing() {
        let cfg = base_config();
        assert_eq!(cfg.currency, "COP");
        assert_eq!(cfg.delivery_fee, 5000);
        assert_eq!(cfg.default_base_fee, 2000);
        assert_eq!(cfg.pagination.default_page_size, 6);
        assert_eq!(cfg.pagination.max_page_size, 18);
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn public_key_needs_prefix() {
        let mut cfg = base_config();
        cfg.provider.public_key = "prv_oops".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.errors().contains_key("provider"));
    }

    #[test]
    fn production_requires_secret_keys() {
        let mut cfg = base_config();
        cfg.provider.mode = PaymentMode::Production;
        cfg.provider.private_key.clear();
        cfg.provider.integrity_key.clear();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("provider_private_key"));
        assert!(errors.field_errors().contains_key("provider_integrity_key"));

        cfg.provider.mode = PaymentMode::Sandbox;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn production_provider_url_must_be_https() {
        let mut cfg = base_config();
        cfg.provider.mode = PaymentMode::Production;
        cfg.provider.base_url = "http://production.example.com/v1".into();
        assert!(cfg
            .validate_additional_constraints()
            .unwrap_err()
            .field_errors()
            .contains_key("provider_base_url"));

        cfg.provider.base_url = "https://production.example.com/v1".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn tax_rate_must_be_a_fraction() {
        let mut cfg = base_config();
        cfg.tax_rate = 19.0;
        assert!(cfg
            .validate_additional_constraints()
            .unwrap_err()
            .field_errors()
            .contains_key("tax_rate"));
    }

    #[test]
    fn polling_modes_and_overrides() {
        let mut polling = PollingConfig::default();
        let standard = polling.policy();
        assert_eq!(standard.interval, Duration::from_secs(2));
        assert_eq!(standard.max_attempts, 30);

        polling.mode = PollingMode::Relaxed;
        let relaxed = polling.policy();
        assert_eq!(relaxed.interval, Duration::from_secs(3));
        assert_eq!(relaxed.max_attempts, 15);

        polling.interval_ms = Some(500);
        polling.max_attempts = Some(4);
        let custom = polling.policy();
        assert_eq!(custom.interval, Duration::from_millis(500));
        assert_eq!(custom.max_attempts, 4);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", sandbox_provider());
        assert!(!rendered.contains("prv_test_abc"));
        assert!(!rendered.contains("test_integrity_abc"));
        assert!(rendered.contains("pub_test_abc"));
    }

    #[test]
    fn loads_layered_file() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        writeln!(
            file,
            r#"
            api_base_url = "https://shop.example.com/api"
            tax_rate = 0.19

            [provider]
            public_key = "pub_stagtest_123"
            private_key = "prv_stagtest_123"
            integrity_key = "stagtest_integrity_123"

            [polling]
            mode = "relaxed"
            "#
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.api_base_url, "https://shop.example.com/api");
        assert_eq!(cfg.provider.mode, PaymentMode::Sandbox);
        assert_eq!(cfg.poll_policy().max_attempts, 15);
    }
}
