//! Checks for user-supplied values before they reach a URL or request.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;
use url::Url;

use super::error::{ApiError, Result};

/// Longest path component accepted by [`sanitize_path_component`].
pub const MAX_PATH_COMPONENT_LEN: usize = 256;

/// Longest JQL query accepted by [`validate_jql`].
pub const MAX_JQL_LEN: usize = 10_000;

const UNSAFE_PATH_CHARS: &[char] = &['<', '>', '"', '\'', '{', '}', '[', ']', '|', '\\', '^', '`'];

/// Rules applied by [`validate_url`].
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// Reject `http://` instead of warning about it.
    pub require_https: bool,
    /// When non-empty, only these hosts are accepted.
    pub allowed_hosts: Vec<String>,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            require_https: true,
            allowed_hosts: Vec::new(),
        }
    }
}

impl UrlPolicy {
    /// Accept plain HTTP with a warning, e.g. for a local test server.
    pub fn allow_http() -> Self {
        Self {
            require_https: false,
            ..Self::default()
        }
    }
}

/// Normalize and check a Jira site URL.
///
/// Adds `https://` when no scheme is given and strips trailing slashes.
pub fn validate_url(raw: &str, policy: &UrlPolicy) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ApiError::InvalidUrl(format!("'{}': {}", trimmed, e)))?;

    match url.scheme() {
        "https" => {}
        "http" if policy.require_https => {
            return Err(ApiError::InvalidUrl(format!(
                "'{}': HTTPS is required",
                trimmed
            )));
        }
        "http" => warn!("URL does not use HTTPS: {}. Credentials will be sent in clear text.", trimmed),
        other => {
            return Err(ApiError::InvalidUrl(format!(
                "'{}': unsupported scheme '{}'",
                trimmed, other
            )));
        }
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ApiError::InvalidUrl(format!("'{}': missing host", trimmed)))?;

    if !policy.allowed_hosts.is_empty()
        && !policy.allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    {
        return Err(ApiError::InvalidUrl(format!(
            "'{}': host '{}' is not allowed",
            trimmed, host
        )));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Make a value safe to splice into a URL path.
///
/// Strips characters that have no business in a path, then percent-encodes
/// the rest. Slashes survive only when `allow_slashes` is set.
pub fn sanitize_path_component(value: &str, allow_slashes: bool) -> Result<String> {
    if value.is_empty() {
        return Err(ApiError::validation("path component", "cannot be empty"));
    }
    if value.chars().count() > MAX_PATH_COMPONENT_LEN {
        return Err(ApiError::validation(
            "path component",
            format!("longer than {} characters", MAX_PATH_COMPONENT_LEN),
        ));
    }

    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !UNSAFE_PATH_CHARS.contains(c))
        .collect();

    if cleaned.is_empty() {
        return Err(ApiError::validation(
            "path component",
            format!("'{}' has no usable characters", value),
        ));
    }

    if allow_slashes {
        Ok(cleaned
            .split('/')
            .map(|part| urlencoding::encode(part).into_owned())
            .collect::<Vec<_>>()
            .join("/"))
    } else {
        Ok(urlencoding::encode(&cleaned).into_owned())
    }
}

fn issue_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]*-\d+$").expect("valid issue key regex"))
}

fn project_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9_]*$").expect("valid project key regex"))
}

fn account_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9:_\-]+$").expect("valid account id regex"))
}

/// Check an issue key like `PROJ-123`, returning it uppercased.
pub fn validate_issue_key(key: &str) -> Result<String> {
    let key = key.trim().to_uppercase();
    if issue_key_pattern().is_match(&key) {
        Ok(key)
    } else {
        Err(ApiError::validation(
            "issue key",
            format!("'{}' must look like PROJ-123", key),
        ))
    }
}

/// Check a project key like `PROJ`, returning it uppercased.
pub fn validate_project_key(key: &str) -> Result<String> {
    let key = key.trim().to_uppercase();
    if project_key_pattern().is_match(&key) {
        Ok(key)
    } else {
        Err(ApiError::validation(
            "project key",
            format!("'{}' must start with a letter and contain only letters, digits or _", key),
        ))
    }
}

/// Check an Atlassian account id.
pub fn validate_account_id(account_id: &str) -> Result<String> {
    let account_id = account_id.trim();
    if account_id_pattern().is_match(account_id) {
        Ok(account_id.to_string())
    } else {
        Err(ApiError::validation(
            "account id",
            format!("'{}' contains invalid characters", account_id),
        ))
    }
}

/// Check a JQL query, returning it trimmed.
pub fn validate_jql(jql: &str) -> Result<String> {
    let jql = jql.trim();
    if jql.is_empty() {
        return Err(ApiError::validation("JQL", "query cannot be empty"));
    }
    if jql.len() > MAX_JQL_LEN {
        return Err(ApiError::validation(
            "JQL",
            format!("query longer than {} characters", MAX_JQL_LEN),
        ));
    }
    Ok(jql.to_string())
}

/// A value for a `{placeholder}` in [`safe_format_url`].
#[derive(Debug, Clone, Copy)]
pub enum PathParam<'a> {
    /// Sanitized and percent-encoded.
    Text(&'a str),
    /// Inserted as-is.
    Number(u64),
}

impl<'a> From<&'a str> for PathParam<'a> {
    fn from(value: &'a str) -> Self {
        PathParam::Text(value)
    }
}

impl From<u64> for PathParam<'_> {
    fn from(value: u64) -> Self {
        PathParam::Number(value)
    }
}

/// Fill `{name}` placeholders in a path template and join it to `base`.
///
/// Every placeholder must have a parameter.
pub fn safe_format_url(base: &str, template: &str, params: &[(&str, PathParam<'_>)]) -> Result<String> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        path.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| {
            ApiError::validation("URL template", format!("unclosed '{{' in '{}'", template))
        })?;
        let name = &after[..close];

        let value = params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                ApiError::validation("URL template", format!("missing parameter '{}'", name))
            })?;

        match value {
            PathParam::Text(text) => path.push_str(&sanitize_path_component(text, false)?),
            PathParam::Number(n) => path.push_str(&n.to_string()),
        }
        rest = &after[close + 1..];
    }
    path.push_str(rest);

    Ok(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}
