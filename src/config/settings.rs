//! Client-wide settings.

use serde::{Deserialize, Serialize};

use crate::api::endpoints::ApiVersion;
use crate::api::retry::RetryConfig;

/// Settings shared by every profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The name of the default profile to use.
    pub default_profile: Option<String>,
    /// REST API version used when building endpoint URLs.
    pub api_version: ApiVersion,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Whether TLS certificates are verified.
    pub verify_ssl: bool,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Refresh OAuth tokens this many seconds before they expire.
    pub refresh_skew_secs: u64,
    /// Backoff policy for rate-limited and failed requests.
    pub retry: RetryConfig,
    /// Overrides the default tracing filter when `RUST_LOG` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_profile: None,
            api_version: ApiVersion::default(),
            timeout_secs: 30,
            verify_ssl: true,
            pool_max_idle_per_host: 10,
            refresh_skew_secs: 60,
            retry: RetryConfig::default(),
            log_filter: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.api_version, ApiVersion::V3);
        assert_eq!(settings.timeout_secs, 30);
        assert!(settings.verify_ssl);
        assert_eq!(settings.refresh_skew_secs, 60);
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            default_profile = "work"
            api_version = "2"

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(settings.default_profile.as_deref(), Some("work"));
        assert_eq!(settings.api_version, ApiVersion::V2);
        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.base_delay_ms, 1000);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }
}
