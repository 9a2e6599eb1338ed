//! Environment-backed runtime configuration for `portal-smoke`.

use std::{env, path::PathBuf, time::Duration};

use portal_core::{ResilienceConfig, RetryPolicy};
use thiserror::Error;

const DEFAULT_CACHE_PATH: &str = "./.portal-smoke-cache.json";

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Base URL of the hosted backend project.
    pub backend_url: String,
    /// Public client key sent with every request.
    pub anon_key: String,
    /// JSON file backing the durable auth cache.
    pub cache_path: PathBuf,
    /// Optional credentials; without them only connectivity is checked.
    pub email: Option<String>,
    pub password: Option<String>,
    pub resilience: ResilienceConfig,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let backend_url = required_env("PORTAL_BACKEND_URL", &mut lookup)?;
        let anon_key = required_env("PORTAL_ANON_KEY", &mut lookup)?;
        let cache_path = optional_trimmed_env("PORTAL_CACHE_PATH", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH));
        let email = optional_trimmed_env("PORTAL_EMAIL", &mut lookup);
        let password = lookup("PORTAL_PASSWORD").filter(|value| !value.is_empty());

        let defaults = ResilienceConfig::default();
        let monitor_interval =
            parse_optional_millis("PORTAL_MONITOR_INTERVAL_MS", defaults.monitor_interval, &mut lookup)?;
        let debounce_window =
            parse_optional_millis("PORTAL_DEBOUNCE_MS", defaults.debounce_window, &mut lookup)?;
        let attempt_timeout =
            parse_optional_millis("PORTAL_REQUEST_TIMEOUT_MS", defaults.attempt_timeout, &mut lookup)?;
        let probe_timeout =
            parse_optional_millis("PORTAL_PROBE_TIMEOUT_MS", defaults.probe_timeout, &mut lookup)?;

        for (key, value) in [
            ("PORTAL_MONITOR_INTERVAL_MS", monitor_interval),
            ("PORTAL_REQUEST_TIMEOUT_MS", attempt_timeout),
            ("PORTAL_PROBE_TIMEOUT_MS", probe_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be greater than 0".to_owned(),
                });
            }
        }

        let retry_policy = parse_retry_policy(defaults.retry_policy, &mut lookup)?;
        let fallback_probe_urls = match optional_trimmed_env("PORTAL_FALLBACK_PROBE_URLS", &mut lookup) {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_owned)
                .collect(),
            None => defaults.fallback_probe_urls,
        };

        Ok(Self {
            backend_url,
            anon_key,
            cache_path,
            email,
            password,
            resilience: ResilienceConfig {
                retry_policy,
                attempt_timeout,
                debounce_window,
                monitor_interval,
                probe_timeout,
                fallback_probe_urls,
            },
        })
    }

    /// Credentials for the live sign-in step, when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.email.as_deref()?, self.password.as_deref()?))
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required {key}")]
    Missing { key: &'static str },
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_retry_policy<F>(defaults: RetryPolicy, lookup: &mut F) -> Result<RetryPolicy, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let max_attempts = parse_optional::<u32, _>("PORTAL_RETRY_MAX_ATTEMPTS", lookup)?
        .unwrap_or(defaults.max_attempts());
    let initial_delay =
        parse_optional_millis("PORTAL_RETRY_INITIAL_DELAY_MS", defaults.initial_delay(), lookup)?;
    let max_delay = parse_optional_millis("PORTAL_RETRY_MAX_DELAY_MS", defaults.max_delay(), lookup)?;
    let backoff_factor = parse_optional::<f64, _>("PORTAL_RETRY_BACKOFF_FACTOR", lookup)?
        .unwrap_or(defaults.backoff_factor());

    RetryPolicy::new(max_attempts, initial_delay, max_delay, backoff_factor).map_err(|err| {
        ConfigError::InvalidValue {
            key: "PORTAL_RETRY_*",
            value: format!(
                "max_attempts={max_attempts} initial_delay_ms={} max_delay_ms={} backoff_factor={backoff_factor}",
                initial_delay.as_millis(),
                max_delay.as_millis()
            ),
            reason: err.to_string(),
        }
    })
}

fn required_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional<T, F>(key: &'static str, lookup: &mut F) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<T>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_millis<F>(
    key: &'static str,
    default: Duration,
    lookup: &mut F,
) -> Result<Duration, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    Ok(parse_optional::<u64, _>(key, lookup)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}
