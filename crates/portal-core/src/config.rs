use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(3);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FALLBACK_PROBE_URLS: &[&str] = &[
    "https://www.google.com/favicon.ico",
    "https://www.cloudflare.com/favicon.ico",
];

/// Tuning for connectivity monitoring and request resilience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Policy used when a caller does not pass its own.
    pub retry_policy: RetryPolicy,
    /// Deadline for a single request attempt.
    pub attempt_timeout: Duration,
    /// Minimum interval between unforced reachability probes.
    pub debounce_window: Duration,
    /// Period of the background monitor.
    pub monitor_interval: Duration,
    /// Deadline for each individual reachability probe.
    pub probe_timeout: Duration,
    /// General-purpose endpoints tried after the backend probe fails.
    pub fallback_probe_urls: Vec<String>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            fallback_probe_urls: DEFAULT_FALLBACK_PROBE_URLS
                .iter()
                .map(|url| (*url).to_owned())
                .collect(),
        }
    }
}
