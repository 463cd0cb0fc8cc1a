//! API error types for the Jira client.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when interacting with the Jira API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed - invalid credentials or expired access token.
    #[error("Authentication failed: check your credentials")]
    Unauthorized,

    /// Permission denied - user lacks access to the resource.
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict error - resource was modified concurrently.
    #[error("Conflict: the resource was modified by another request")]
    Conflict,

    /// Rate limited by the Jira API.
    #[error("Rate limited: please wait before retrying")]
    RateLimited {
        /// Value of the `Retry-After` header, if the server sent one.
        retry_after: Option<Duration>,
    },

    /// Jira server error (5xx).
    #[error("Jira server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Any other unexpected HTTP status.
    #[error("Unexpected HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Network or HTTP error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The request did not complete in time.
    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Rejected input.
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Keyring error when storing/retrieving secrets.
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// Invalid response from the API.
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Connection validation failed.
    #[error("Connection validation failed: {0}")]
    ConnectionFailed(String),

    /// The OAuth handshake could not be completed.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// The token endpoint rejected a refresh request.
    #[error("Token refresh failed (HTTP {status}): {message}")]
    TokenRefreshFailed { status: u16, message: String },

    /// No usable token remains; the user must authorize the app again.
    #[error("Re-authorization required: {0}")]
    ReauthorizationRequired(String),

    /// Persisting or loading a token failed.
    #[error("Token store error: {0}")]
    TokenStore(String),

    /// A local file operation failed.
    #[error("Failed to {operation} '{}': {source}", path.display())]
    File {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Create an error from an HTTP status code.
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(context.to_string()),
            404 => ApiError::NotFound(context.to_string()),
            409 => ApiError::Conflict,
            429 => ApiError::RateLimited { retry_after: None },
            code @ 500..=599 => ApiError::ServerError {
                status: code,
                message: context.to_string(),
            },
            code => ApiError::Status {
                status: code,
                message: context.to_string(),
            },
        }
    }

    /// Build an error from a failed response.
    ///
    /// Jira bodies carry `errorMessages`, an `errors` map, or a bare
    /// `message`. The first non-empty one becomes the context; otherwise the
    /// request URL is used.
    pub fn from_response(
        status: StatusCode,
        retry_after: Option<Duration>,
        url: &str,
        body: &str,
    ) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ApiError::RateLimited { retry_after };
        }

        let context = extract_error_message(body).unwrap_or_else(|| url.to_string());
        ApiError::from_status(status, &context)
    }

    /// The HTTP status this error was built from, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::Conflict => Some(409),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::ServerError { status, .. }
            | ApiError::Status { status, .. }
            | ApiError::TokenRefreshFailed { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Server-requested delay before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the only way forward is a fresh authorization.
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            ApiError::ReauthorizationRequired(_) => true,
            ApiError::TokenRefreshFailed { status, .. } => matches!(status, 400 | 401 | 403),
            _ => false,
        }
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            field,
            message: message.into(),
        }
    }
}

/// Pull a human-readable message out of a Jira error body.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }

    let json: serde_json::Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(_) => return Some(truncate(body.trim(), 200)),
    };

    if let Some(arr) = json.get("errorMessages").and_then(|v| v.as_array()) {
        let messages: Vec<&str> = arr.iter().filter_map(|v| v.as_str()).collect();
        if !messages.is_empty() {
            return Some(messages.join("; "));
        }
    }

    if let Some(obj) = json.get("errors").and_then(|v| v.as_object()) {
        let messages: Vec<String> = obj
            .iter()
            .map(|(k, v)| match v.as_str() {
                Some(s) => format!("{}: {}", k, s),
                None => format!("{}: {}", k, v),
            })
            .collect();
        if !messages.is_empty() {
            return Some(messages.join("; "));
        }
    }

    ["message", "error_description", "error"]
        .iter()
        .find_map(|key| json.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_status_401() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, "test");
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn test_error_from_status_403() {
        let err = ApiError::from_status(StatusCode::FORBIDDEN, "browse projects");
        assert!(matches!(err, ApiError::Forbidden(ref ctx) if ctx == "browse projects"));
    }

    #[test]
    fn test_error_from_status_404() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, "issue PROJ-123");
        match err {
            ApiError::NotFound(msg) => assert_eq!(msg, "issue PROJ-123"),
            _ => panic!("Expected NotFound error"),
        }
    }

    #[test]
    fn test_error_from_status_429() {
        let err = ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, "test");
        assert!(matches!(err, ApiError::RateLimited { retry_after: None }));
    }

    #[test]
    fn test_error_from_status_500() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "test");
        assert!(matches!(err, ApiError::ServerError { status: 502, .. }));
    }

    #[test]
    fn test_error_from_status_unexpected() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, "bad jql");
        assert!(matches!(err, ApiError::Status { status: 400, .. }));
        assert_eq!(err.status_code(), Some(400));
    }

    #[test]
    fn test_from_response_rate_limited_keeps_retry_after() {
        let err = ApiError::from_response(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(7)),
            "https://x/rest/api/3/search",
            "",
        );
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_from_response_joins_error_messages() {
        let body = r#"{"errorMessages":["Field 'x' does not exist","Bad JQL"],"errors":{}}"#;
        let err = ApiError::from_response(StatusCode::BAD_REQUEST, None, "url", body);
        assert!(err.to_string().contains("Field 'x' does not exist; Bad JQL"));
    }

    #[test]
    fn test_from_response_uses_errors_map() {
        let body = r#"{"errorMessages":[],"errors":{"summary":"Summary is required"}}"#;
        let err = ApiError::from_response(StatusCode::BAD_REQUEST, None, "url", body);
        assert!(err.to_string().contains("summary: Summary is required"));
    }

    #[test]
    fn test_from_response_falls_back_to_url() {
        let err = ApiError::from_response(
            StatusCode::NOT_FOUND,
            None,
            "https://x/rest/api/3/issue/NOPE-1",
            "",
        );
        assert!(matches!(err, ApiError::NotFound(ref ctx) if ctx.ends_with("NOPE-1")));
    }

    #[test]
    fn test_extract_error_message_plain_text_is_truncated() {
        let body = "x".repeat(500);
        let msg = extract_error_message(&body).unwrap();
        assert!(msg.len() < 210);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn test_requires_reauthorization() {
        assert!(ApiError::ReauthorizationRequired("gone".into()).requires_reauthorization());
        assert!(ApiError::TokenRefreshFailed {
            status: 403,
            message: "invalid_grant".into()
        }
        .requires_reauthorization());
        assert!(!ApiError::TokenRefreshFailed {
            status: 503,
            message: "down".into()
        }
        .requires_reauthorization());
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::Unauthorized;
        assert_eq!(err.to_string(), "Authentication failed: check your credentials");

        let err = ApiError::NotFound("PROJ-123".to_string());
        assert_eq!(err.to_string(), "Resource not found: PROJ-123");

        let err = ApiError::validation("issue key", "must look like PROJ-123");
        assert_eq!(err.to_string(), "Invalid issue key: must look like PROJ-123");
    }
}
