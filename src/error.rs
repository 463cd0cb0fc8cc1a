//! Top-level error type for jiraone.
//!
//! Wraps the configuration and API errors so applications can use a single
//! `Result`, and adds user-facing messages and hints on top of them.

use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;

/// Any error jiraone can return.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// API-related errors.
    #[error("{0}")]
    Api(#[from] ApiError),

    /// IO errors (file system, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with a message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Get a user-friendly message for display.
    ///
    /// Free of technical detail; use `Display` or `Debug` for logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Config(e) => config_message(e),
            Error::Api(e) => match e {
                ApiError::Unauthorized => {
                    "Authentication failed. Check the email and API token or OAuth token.".to_string()
                }
                ApiError::Forbidden(_) => "Jira denied access to this resource.".to_string(),
                ApiError::NotFound(resource) => format!("Not found: {}", resource),
                ApiError::Conflict => {
                    "The resource was modified by someone else. Please reload and try again."
                        .to_string()
                }
                ApiError::RateLimited { retry_after } => match retry_after {
                    Some(delay) => format!(
                        "Too many requests. Jira asked to wait {} seconds.",
                        delay.as_secs()
                    ),
                    None => "Too many requests. Please wait a moment and try again.".to_string(),
                },
                ApiError::ServerError { .. } => {
                    "Jira server error. Please try again later.".to_string()
                }
                ApiError::Status { status, message } => {
                    format!("Jira rejected the request ({}): {}", status, message)
                }
                ApiError::Network(_) => "Could not reach Jira over the network.".to_string(),
                ApiError::Timeout { timeout_secs, .. } => {
                    format!("Jira did not answer within {} seconds.", timeout_secs)
                }
                ApiError::InvalidUrl(_) => "Invalid Jira URL in configuration.".to_string(),
                ApiError::Validation { field, message } => format!("Invalid {}: {}", field, message),
                ApiError::Keyring(_) => {
                    "Could not access secure storage. Please reconfigure your profile.".to_string()
                }
                ApiError::InvalidResponse(_) => {
                    "Unexpected response from Jira. Please try again.".to_string()
                }
                ApiError::ConnectionFailed(_) => {
                    "Could not connect to Jira. Please check your URL and network.".to_string()
                }
                ApiError::OAuth(msg) => format!("OAuth error: {}", msg),
                ApiError::TokenRefreshFailed { .. } => {
                    "Could not refresh the access token. Please try again.".to_string()
                }
                ApiError::ReauthorizationRequired(_) => {
                    "Your Jira authorization has expired.".to_string()
                }
                ApiError::TokenStore(_) => "Could not save or load the access token.".to_string(),
                ApiError::File { path, operation, .. } => {
                    format!("Could not {} '{}'.", operation, path.display())
                }
            },
            Error::Io(_) => "A file operation failed. Please check file permissions.".to_string(),
            Error::Other(msg) => msg.clone(),
        }
    }

    /// Check if this error is critical and needs the user to act.
    ///
    /// Configuration and authentication problems are critical.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::Api(ApiError::Unauthorized)
                | Error::Api(ApiError::Forbidden(_))
                | Error::Api(ApiError::ReauthorizationRequired(_))
                | Error::Api(ApiError::Keyring(_))
        )
    }

    /// Check if retrying the operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Api(e) => matches!(
                e,
                ApiError::RateLimited { .. }
                    | ApiError::ServerError { .. }
                    | ApiError::Network(_)
                    | ApiError::Timeout { .. }
                    | ApiError::NotFound(_)
                    | ApiError::Conflict
                    | ApiError::ConnectionFailed(_)
            ) || matches!(e, ApiError::TokenRefreshFailed { .. } if !e.requires_reauthorization()),
            _ => false,
        }
    }

    /// Get a suggested action for the user.
    pub fn suggested_action(&self) -> Option<&'static str> {
        match self {
            Error::Config(ConfigError::NoConfigDir) | Error::Config(ConfigError::ReadError(_)) => {
                Some("Create a config.toml or set JIRAONE_CONFIG_DIR.")
            }
            Error::Api(ApiError::Unauthorized) => {
                Some("Check your API token at https://id.atlassian.com/manage-profile/security/api-tokens")
            }
            Error::Api(ApiError::ReauthorizationRequired(_)) => {
                Some("Authorize the app again to obtain a new token.")
            }
            Error::Api(ApiError::RateLimited { .. }) => Some("Wait a few seconds and try again."),
            Error::Api(ApiError::Network(_)) | Error::Api(ApiError::ConnectionFailed(_)) => {
                Some("Check your internet connection and Jira URL.")
            }
            _ => None,
        }
    }
}

fn config_message(error: &ConfigError) -> String {
    match error {
        ConfigError::NoConfigDir => "No configuration directory is available on this system.".to_string(),
        ConfigError::CreateDirError(_) | ConfigError::WriteError(_) => {
            "The configuration could not be saved. Check file permissions.".to_string()
        }
        ConfigError::ReadError(_) => "The configuration file could not be read.".to_string(),
        ConfigError::ParseError(e) => format!("The configuration file is not valid TOML: {}", e),
        ConfigError::SerializeError(_) => "The configuration could not be encoded.".to_string(),
        ConfigError::ValidationError(msg) => format!("Configuration error: {}", msg),
        ConfigError::ProfileNotFound(name) => format!("No profile named '{}'.", name),
    }
}

/// Result type for jiraone operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_from_config_error() {
        let err: Error = ConfigError::NoConfigDir.into();
        assert!(matches!(err, Error::Config(ConfigError::NoConfigDir)));
    }

    #[test]
    fn test_error_from_api_error() {
        let err: Error = ApiError::Unauthorized.into();
        assert!(matches!(err, Error::Api(ApiError::Unauthorized)));
    }

    #[test]
    fn test_user_message_unauthorized() {
        let msg = Error::Api(ApiError::Unauthorized).user_message();
        assert!(msg.contains("Authentication failed"));
        assert!(msg.contains("API token"));
    }

    #[test]
    fn test_user_message_not_found() {
        let msg = Error::Api(ApiError::NotFound("PROJ-123".to_string())).user_message();
        assert!(msg.contains("PROJ-123"));
        assert!(msg.contains("Not found"));
    }

    #[test]
    fn test_user_message_rate_limited_with_delay() {
        let err = Error::Api(ApiError::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        });
        assert!(err.user_message().contains("7 seconds"));
    }

    #[test]
    fn test_user_message_profile_not_found() {
        let err = Error::Config(ConfigError::ProfileNotFound("staging".to_string()));
        assert_eq!(err.user_message(), "No profile named 'staging'.");
    }

    #[test]
    fn test_user_message_config_validation() {
        let err = Error::Config(ConfigError::ValidationError("duplicate profile".to_string()));
        assert!(err.user_message().contains("duplicate profile"));
    }

    #[test]
    fn test_is_critical() {
        assert!(Error::Api(ApiError::Unauthorized).is_critical());
        assert!(Error::Api(ApiError::Forbidden("no".to_string())).is_critical());
        assert!(Error::Config(ConfigError::NoConfigDir).is_critical());
        assert!(Error::Api(ApiError::ReauthorizationRequired("expired".to_string())).is_critical());
        assert!(!Error::Api(ApiError::RateLimited { retry_after: None }).is_critical());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Api(ApiError::RateLimited { retry_after: None }).is_recoverable());
        assert!(Error::Api(ApiError::NotFound("TEST".to_string())).is_recoverable());
        assert!(!Error::Api(ApiError::Unauthorized).is_recoverable());
    }

    #[test]
    fn test_refresh_failure_recoverability_depends_on_status() {
        let transient = Error::Api(ApiError::TokenRefreshFailed {
            status: 503,
            message: "down".to_string(),
        });
        let revoked = Error::Api(ApiError::TokenRefreshFailed {
            status: 400,
            message: "invalid_grant".to_string(),
        });
        assert!(transient.is_recoverable());
        assert!(!revoked.is_recoverable());
    }

    #[test]
    fn test_suggested_action_reauthorization() {
        let err = Error::Api(ApiError::ReauthorizationRequired("revoked".to_string()));
        assert!(err.suggested_action().unwrap().contains("Authorize"));
    }

    #[test]
    fn test_suggested_action_unauthorized() {
        let action = Error::Api(ApiError::Unauthorized).suggested_action();
        assert!(action.unwrap().contains("api-tokens"));
    }

    #[test]
    fn test_other_error() {
        let err = Error::other("something went wrong");
        assert!(matches!(err, Error::Other(_)));
        assert_eq!(err.user_message(), "something went wrong");
    }
}
