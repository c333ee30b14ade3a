use std::{env, fmt, net::SocketAddr, time::Duration};

use super::server_bind_address;

const DEV_TOKEN_SECRET: &str = "storefront-dev-secret";
const DEFAULT_DATABASE_URL: &str = "sqlite://storefront.db?mode=rwc";
const DEFAULT_DNS_SUCCESS_RATE: f64 = 0.85;
const DEFAULT_RECHECK_SECS: u64 = 300;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Hostname routing settings consumed by the store resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct StorefrontConfig {
    pub preview_root: String,
    pub preview_prefix: String,
    pub preview_suffix: String,
    pub project_suffix: String,
    pub preview_theme: String,
    pub platform_suffix: String,
    pub default_theme: String,
    pub fallback_theme: String,
    pub static_domains: Vec<(String, String)>,
    pub subdomain_root: String,
}

impl StorefrontConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let static_raw = env_or("STOREFRONT_STATIC_DOMAINS", "localhost=modern");
        Ok(Self {
            preview_root: env_or("STOREFRONT_PREVIEW_ROOT", "storefront-builder.vercel.app"),
            preview_prefix: env_or("STOREFRONT_PREVIEW_PREFIX", "storefront-builder-git-"),
            preview_suffix: env_or("STOREFRONT_PREVIEW_SUFFIX", ".vercel.app"),
            project_suffix: env_or("STOREFRONT_PROJECT_SUFFIX", "-storefront-builder.vercel.app"),
            preview_theme: env_or("STOREFRONT_PREVIEW_THEME", "modern"),
            platform_suffix: env_or("STOREFRONT_PLATFORM_SUFFIX", ".vercel.app"),
            default_theme: env_or("STOREFRONT_DEFAULT_THEME", "minimal"),
            fallback_theme: env_or("STOREFRONT_FALLBACK_THEME", "minimal"),
            static_domains: parse_static_domains(&static_raw)?,
            subdomain_root: env_or("STOREFRONT_SUBDOMAIN_ROOT", "mystorefront.shop"),
        })
    }
}

/// Parses `host=theme,host=theme` into pairs. Empty items are skipped.
pub fn parse_static_domains(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    let mut entries = Vec::new();
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let Some((host, theme)) = item.split_once('=') else {
            return Err(ConfigError::InvalidStaticDomains(item.to_string()));
        };
        let (host, theme) = (host.trim(), theme.trim());
        if host.is_empty() || theme.is_empty() {
            return Err(ConfigError::InvalidStaticDomains(item.to_string()));
        }
        entries.push((host.to_ascii_lowercase(), theme.to_string()));
    }
    Ok(entries)
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub merchant_token_secret: Vec<u8>,
    pub storefront: StorefrontConfig,
    pub dns_success_rate: f64,
    pub domain_recheck_interval: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let database_url = env_or("DATABASE_URL", DEFAULT_DATABASE_URL);

        let merchant_token_secret = match env::var("MERCHANT_TOKEN_SECRET") {
            Ok(value) if !value.is_empty() => value.into_bytes(),
            _ if environment == Environment::Production => {
                return Err(ConfigError::MissingVar("MERCHANT_TOKEN_SECRET"))
            }
            _ => DEV_TOKEN_SECRET.as_bytes().to_vec(),
        };

        let dns_success_rate = parse_var("DNS_SUCCESS_RATE", DEFAULT_DNS_SUCCESS_RATE)?;
        if !(0.0..=1.0).contains(&dns_success_rate) {
            return Err(ConfigError::InvalidNumber {
                var: "DNS_SUCCESS_RATE",
                value: dns_success_rate.to_string(),
            });
        }
        let recheck_secs: u64 = parse_var("DOMAIN_RECHECK_SECS", DEFAULT_RECHECK_SECS)?;

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            merchant_token_secret,
            storefront: StorefrontConfig::from_env()?,
            dns_success_rate,
            domain_recheck_interval: Duration::from_secs(recheck_secs.max(1)),
        })
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidNumber { var: &'static str, value: String },
    InvalidStaticDomains(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(var) => write!(f, "{var} must be set in production"),
            Self::InvalidNumber { var, value } => write!(f, "invalid {var} value: {value}"),
            Self::InvalidStaticDomains(item) => write!(
                f,
                "STOREFRONT_STATIC_DOMAINS entries must look like host=theme (got '{item}')"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
