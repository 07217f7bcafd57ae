use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "STOREFRONT";
const DEFAULT_PAYMENT_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_EMAIL_API_URL: &str = "https://api.resend.com/emails";

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Runtime environment name (development, test, production)
    #[serde(default = "default_env")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON logs instead of the human-readable format
    #[serde(default)]
    pub log_json: bool,

    /// Run migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub db_min_connections: u32,

    /// Base URL of the hosted payment gateway REST API
    #[serde(default = "default_payment_api_base")]
    pub payment_api_base: String,

    /// Secret API key used to authenticate against the payment gateway
    #[validate(length(min = 1, message = "payment_secret_key must not be empty"))]
    pub payment_secret_key: String,

    /// Shared secret the gateway signs completion callbacks with
    #[validate(length(min = 1, message = "payment_webhook_secret must not be empty"))]
    pub payment_webhook_secret: String,

    /// Maximum accepted age of a signed callback timestamp, in seconds
    #[serde(default = "default_webhook_tolerance")]
    pub payment_webhook_tolerance_secs: u64,

    /// Where the gateway redirects the customer after a successful payment
    pub checkout_success_url: String,

    /// Where the gateway redirects the customer after an abandoned payment
    pub checkout_cancel_url: String,

    /// Currency checkout sessions are priced in
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Transactional email API endpoint
    #[serde(default = "default_email_api_url")]
    pub email_api_url: String,

    /// Transactional email API key; confirmation email is disabled when unset
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Sender address for confirmation email
    #[serde(default = "default_email_from")]
    pub email_from: String,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_payment_api_base() -> String {
    DEFAULT_PAYMENT_API_BASE.to_string()
}
fn default_webhook_tolerance() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_currency() -> String {
    "usd".to_string()
}
fn default_email_api_url() -> String {
    DEFAULT_EMAIL_API_URL.to_string()
}
fn default_email_from() -> String {
    "orders@example.com".to_string()
}

impl AppConfig {
    /// Programmatic constructor used by tests and tooling; production code
    /// goes through [`load_config`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database_url: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        environment: impl Into<String>,
        payment_secret_key: impl Into<String>,
        payment_webhook_secret: impl Into<String>,
        checkout_success_url: impl Into<String>,
        checkout_cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            host: host.into(),
            port,
            environment: environment.into(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_max_connections(),
            db_min_connections: default_min_connections(),
            payment_api_base: default_payment_api_base(),
            payment_secret_key: payment_secret_key.into(),
            payment_webhook_secret: payment_webhook_secret.into(),
            payment_webhook_tolerance_secs: default_webhook_tolerance(),
            checkout_success_url: checkout_success_url.into(),
            checkout_cancel_url: checkout_cancel_url.into(),
            currency: default_currency(),
            email_api_url: default_email_api_url(),
            email_api_key: None,
            email_from: default_email_from(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Loads configuration from `config/default`, an environment-specific file,
/// and `STOREFRONT__`-prefixed environment variables (later sources win).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;

    app_config
        .validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(app_config)
}

/// Install the global tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
