use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::readiness::ReadinessConfig;

pub const DEFAULT_ARCHIVE_LOOKUP_URL: &str = "https://archive.org/wayback/available";

/// Runtime settings for the relay, read from the environment at boot.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub desktop_timeout: Duration,
    pub mobile_timeout: Duration,
    pub archive_timeout: Duration,
    pub min_body_length: usize,
    pub archive_lookup_url: String,
    pub proxy_timeout: Duration,
    pub log_capacity: usize,
    pub readiness: ReadinessConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            desktop_timeout: Duration::from_millis(10_000),
            mobile_timeout: Duration::from_millis(10_000),
            archive_timeout: Duration::from_millis(15_000),
            min_body_length: 100,
            archive_lookup_url: DEFAULT_ARCHIVE_LOOKUP_URL.to_string(),
            proxy_timeout: Duration::from_millis(30_000),
            log_capacity: 1000,
            readiness: ReadinessConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset keys fall back
    /// to defaults; set-but-unparseable keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let ms = |key: &str, fallback: Duration| -> Result<Duration> {
            Ok(Duration::from_millis(parse_or(&lookup, key, fallback.as_millis() as u64)?))
        };

        let readiness = ReadinessConfig {
            poll_interval_ms: parse_or(&lookup, "RELAY_READY_POLL_MS", defaults.readiness.poll_interval_ms)?,
            hard_ceiling_ms: parse_or(&lookup, "RELAY_READY_CEILING_MS", defaults.readiness.hard_ceiling_ms)?,
            min_elapsed_ms: parse_or(&lookup, "RELAY_READY_MIN_ELAPSED_MS", defaults.readiness.min_elapsed_ms)?,
            min_document_height: parse_or(&lookup, "RELAY_READY_MIN_HEIGHT", defaults.readiness.min_document_height)?,
        };

        Ok(Self {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            desktop_timeout: ms("RELAY_DESKTOP_TIMEOUT_MS", defaults.desktop_timeout)?,
            mobile_timeout: ms("RELAY_MOBILE_TIMEOUT_MS", defaults.mobile_timeout)?,
            archive_timeout: ms("RELAY_ARCHIVE_TIMEOUT_MS", defaults.archive_timeout)?,
            min_body_length: parse_or(&lookup, "RELAY_MIN_BODY_LENGTH", defaults.min_body_length)?,
            archive_lookup_url: lookup("RELAY_ARCHIVE_LOOKUP_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.archive_lookup_url),
            proxy_timeout: ms("RELAY_PROXY_TIMEOUT_MS", defaults.proxy_timeout)?,
            log_capacity: parse_or(&lookup, "RELAY_LOG_CAPACITY", defaults.log_capacity)?,
            readiness,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, fallback: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", key, raw)),
        _ => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = RelayConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.min_body_length, 100);
        assert_eq!(config.archive_lookup_url, DEFAULT_ARCHIVE_LOOKUP_URL);
        assert_eq!(config.readiness.hard_ceiling_ms, 15_000);
    }

    #[test]
    fn overrides_are_applied() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("PORT", "8080"),
            ("RELAY_MOBILE_TIMEOUT_MS", "2500"),
            ("RELAY_READY_CEILING_MS", "20000"),
            ("RELAY_ARCHIVE_LOOKUP_URL", "http://127.0.0.1:9/lookup"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.mobile_timeout, Duration::from_millis(2500));
        assert_eq!(config.readiness.hard_ceiling_ms, 20_000);
        assert_eq!(config.archive_lookup_url, "http://127.0.0.1:9/lookup");
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_LOG_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("RELAY_LOG_CAPACITY"));
    }
}
