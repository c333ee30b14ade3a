pub mod config;

use std::{env, net::SocketAddr, path::PathBuf};

pub use config::{parse_static_domains, AppConfig, ConfigError, Environment, StorefrontConfig};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Reads `.env` into the process environment, returning the file that was applied.
///
/// A missing file is not an error.
pub fn load_env_file() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// `APP_BIND_ADDR`, or [`DEFAULT_BIND_ADDR`] when unset or blank.
pub fn server_bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    match env::var("APP_BIND_ADDR") {
        Ok(value) if !value.trim().is_empty() => value.trim().parse(),
        _ => DEFAULT_BIND_ADDR.parse(),
    }
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_GUARD: std::sync::Mutex<()> = std::sync::Mutex::new(());
