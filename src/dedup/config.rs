//! Deduplicator configuration, validated when applied rather than per request.

use crate::dedup::errors::ConfigError;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Tunables for the deduplication cache.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long an entry may be shared after it was created.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cache_ttl: Duration,
    /// Upper bound on resident entries, enforced on every insertion.
    pub max_cache_size: usize,
    /// Fold a fingerprint of the request body into the key.
    pub combine_bodies: bool,
    /// Emit a debug event for every hit and miss.
    pub debug_logging: bool,
    /// Delay between settlement and removal of an entry.
    #[serde(deserialize_with = "deserialize_duration")]
    pub grace_window: Duration,
    /// Period of the background sweep for invalid entries.
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_millis(5000),
            max_cache_size: 1000,
            combine_bodies: true,
            debug_logging: false,
            grace_window: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::Invalid {
                field: "cache_ttl",
                reason: "must be greater than zero",
            });
        }
        if self.max_cache_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cache_size",
                reason: "must allow at least one entry",
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "sweep_interval",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    /// Apply `patch` on top of this config, returning the merged result
    /// without validating it.
    pub fn merged(&self, patch: &DedupConfigPatch) -> Self {
        Self {
            cache_ttl: patch.cache_ttl.unwrap_or(self.cache_ttl),
            max_cache_size: patch.max_cache_size.unwrap_or(self.max_cache_size),
            combine_bodies: patch.combine_bodies.unwrap_or(self.combine_bodies),
            debug_logging: patch.debug_logging.unwrap_or(self.debug_logging),
            grace_window: patch.grace_window.unwrap_or(self.grace_window),
            sweep_interval: patch.sweep_interval.unwrap_or(self.sweep_interval),
        }
    }
}

/// A partial update for [`DedupConfig`]; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupConfigPatch {
    pub cache_ttl: Option<Duration>,
    pub max_cache_size: Option<usize>,
    pub combine_bodies: Option<bool>,
    pub debug_logging: Option<bool>,
    pub grace_window: Option<Duration>,
    pub sweep_interval: Option<Duration>,
}

/// Durations are accepted as integer milliseconds or as strings like `"250ms"` or `"30s"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum DurationRepr {
    Millis(u64),
    Text(String),
}

pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match DurationRepr::deserialize(deserializer)? {
        DurationRepr::Millis(ms) => Ok(Duration::from_millis(ms)),
        DurationRepr::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

pub(crate) fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    // Bare numbers keep the millisecond meaning of the integer form.
    if let Ok(ms) = text.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    let parsed = fundu::DurationParser::with_all_time_units()
        .parse(text)
        .map_err(|e| format!("invalid duration {text:?}: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration {text:?}: {e}"))
}
