//! Layered configuration for the `inflight` binary.

use crate::client::ClientConfig;
use crate::dedup::{ConfigError, DedupConfig};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;
use std::path::Path;

/// Prefix for environment overrides, e.g. `INFLIGHT_CACHE_TTL=10s`.
pub const ENV_PREFIX: &str = "INFLIGHT_";

/// Application configuration: logging, cache and client settings in one flat
/// namespace.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Level for the crate's own events when `RUST_LOG` is unset.
    pub log_level: String,
    #[serde(flatten)]
    pub dedup: DedupConfig,
    #[serde(flatten)]
    pub client: ClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dedup: DedupConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// The provider stack: an optional TOML file, then environment variables.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(path).extract()?;
        config.dedup.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::time::Duration;

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_| {
            let config = Config::load(None).unwrap();
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn file_then_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "inflight.toml",
                r#"
                    log_level = "debug"
                    cache_ttl = "2s"
                    max_cache_size = 50
                    base_url = "https://api.example.com/"
                "#,
            )?;
            jail.set_env("INFLIGHT_MAX_CACHE_SIZE", "10");
            jail.set_env("INFLIGHT_GRACE_WINDOW", "250");

            let config = Config::load(Some(Path::new("inflight.toml"))).unwrap();
            assert_eq!(config.log_level, "debug");
            assert_eq!(config.dedup.cache_ttl, Duration::from_secs(2));
            assert_eq!(config.dedup.max_cache_size, 10);
            assert_eq!(config.dedup.grace_window, Duration::from_millis(250));
            assert_eq!(
                config.client.base_url.as_deref(),
                Some("https://api.example.com/")
            );
            assert_eq!(config.client.metrics_window, 100);
            Ok(())
        });
    }

    #[test]
    fn invalid_values_fail_to_load() {
        Jail::expect_with(|jail| {
            jail.set_env("INFLIGHT_MAX_CACHE_SIZE", "0");
            let err = Config::load(None).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Invalid {
                    field: "max_cache_size",
                    ..
                }
            ));
            Ok(())
        });
    }
}
