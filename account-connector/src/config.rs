//! Connector configuration

use std::env::VarError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,

    /// SQLite database file; accounts are kept in memory when unset
    pub database_path: Option<String>,

    pub provider: ProviderConfig,

    /// How long a provider checkpoint stays answerable
    pub checkpoint_ttl_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
    /// Default wait for out-of-band validation
    pub long_poll_timeout_secs: u64,
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }
}

// Keep the API key out of logs.
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("long_poll_timeout_secs", &self.long_poll_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.unipile.com".to_string(),
            api_key: String::new(),
            request_timeout_secs: 30,
            long_poll_timeout_secs: 300,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "warn".to_string(),
            database_path: None,
            provider: ProviderConfig::default(),
            checkpoint_ttl_secs: 270,
        }
    }
}

impl Config {
    /// Load configuration from the environment, after reading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let defaults = Config::default();

        let api_key = reader("PROVIDER_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingVar("PROVIDER_API_KEY".into()));
        }

        Ok(Self {
            host: reader("SERVER_HOST").unwrap_or(defaults.host),
            port: parse_or(&reader, "SERVER_PORT", defaults.port),
            log_level: reader("LOG_LEVEL").unwrap_or(defaults.log_level),
            database_path: reader("DATABASE_PATH").ok().filter(|p| !p.is_empty()),
            provider: ProviderConfig {
                base_url: reader("PROVIDER_BASE_URL").unwrap_or(defaults.provider.base_url),
                api_key,
                request_timeout_secs: parse_or(
                    &reader,
                    "PROVIDER_TIMEOUT_SECS",
                    defaults.provider.request_timeout_secs,
                ),
                long_poll_timeout_secs: parse_or(
                    &reader,
                    "LONG_POLL_TIMEOUT_SECS",
                    defaults.provider.long_poll_timeout_secs,
                ),
            },
            checkpoint_ttl_secs: parse_or(
                &reader,
                "CHECKPOINT_TTL_SECS",
                defaults.checkpoint_ttl_secs,
            ),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn checkpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.checkpoint_ttl_secs)
    }
}

fn parse_or<F, T>(reader: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr + fmt::Display,
{
    match reader(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(
                key,
                value = %raw,
                default = %default,
                "Invalid number, using default"
            );
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_reader(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, VarError> {
        let owned: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| owned.get(key).cloned().ok_or(VarError::NotPresent)
    }

    #[test]
    fn test_defaults() {
        let reader = make_reader(&[("PROVIDER_API_KEY", "secret")]);
        let config = Config::from_reader(reader).unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.log_level, "warn");
        assert!(config.database_path.is_none());
        assert_eq!(config.provider.base_url, "https://api.unipile.com");
        assert_eq!(config.provider.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.provider.long_poll_timeout(), Duration::from_secs(300));
        assert_eq!(config.checkpoint_ttl(), Duration::from_secs(270));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_reader(make_reader(&[
            ("PROVIDER_API_KEY", "secret"),
            ("SERVER_HOST", "127.0.0.1"),
            ("SERVER_PORT", "9000"),
            ("DATABASE_PATH", "/tmp/accounts.db"),
            ("PROVIDER_BASE_URL", "http://localhost:1234"),
            ("LONG_POLL_TIMEOUT_SECS", "60"),
            ("CHECKPOINT_TTL_SECS", "120"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.database_path.as_deref(), Some("/tmp/accounts.db"));
        assert_eq!(config.provider.base_url, "http://localhost:1234");
        assert_eq!(config.provider.long_poll_timeout_secs, 60);
        assert_eq!(config.checkpoint_ttl_secs, 120);
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = Config::from_reader(make_reader(&[
            ("PROVIDER_API_KEY", "secret"),
            ("SERVER_PORT", "not-a-port"),
            ("PROVIDER_TIMEOUT_SECS", "-5"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.provider.request_timeout_secs, 30);
    }

    #[test]
    fn test_api_key_required() {
        assert!(matches!(
            Config::from_reader(make_reader(&[])),
            Err(ConfigError::MissingVar(_))
        ));
        assert!(Config::from_reader(make_reader(&[("PROVIDER_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn test_debug_hides_api_key() {
        let reader = make_reader(&[("PROVIDER_API_KEY", "secret")]);
        let config = Config::from_reader(reader).unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }
}
