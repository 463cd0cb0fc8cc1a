//! Static credentials for the Jira API.
//!
//! Basic Auth (email + API token) and pre-issued tokens sent with an explicit
//! scheme, plus secret storage in the OS keyring.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use super::error::{ApiError, Result};

/// The keyring service name for jiraone secrets.
const KEYRING_SERVICE: &str = "jiraone";

/// Credentials that never change during a session.
#[derive(Clone)]
pub enum Auth {
    /// Basic Auth with an email and API token.
    Basic {
        /// The user's email address.
        email: String,
        /// The complete "Basic ..." header value.
        header: String,
    },
    /// A token sent as `<scheme> <token>` (e.g. `Bearer`, `JWT`).
    Token {
        scheme: String,
        header: String,
    },
}

impl Auth {
    /// Create Basic Auth credentials from email and token.
    ///
    /// The token is immediately encoded and the raw token is not stored.
    pub fn new(email: &str, token: &str) -> Self {
        Auth::Basic {
            email: email.to_string(),
            header: build_basic_header(email, token),
        }
    }

    /// Create credentials for a bearer token.
    pub fn bearer(token: &str) -> Self {
        Self::with_scheme("Bearer", token)
    }

    /// Create credentials for a token sent under a custom scheme.
    pub fn with_scheme(scheme: &str, token: &str) -> Self {
        Auth::Token {
            scheme: scheme.to_string(),
            header: format!("{} {}", scheme, token),
        }
    }

    /// Create Basic Auth from the API token stored for a profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be retrieved from the keyring.
    pub fn from_keyring(profile_name: &str, email: &str) -> Result<Self> {
        let token = get_secret(profile_name, SecretKind::ApiToken)?;
        Ok(Self::new(email, &token))
    }

    /// Get the authorization header value for HTTP requests.
    pub fn header_value(&self) -> &str {
        match self {
            Auth::Basic { header, .. } | Auth::Token { header, .. } => header,
        }
    }

    /// Get the email address, for Basic Auth.
    pub fn email(&self) -> Option<&str> {
        match self {
            Auth::Basic { email, .. } => Some(email),
            Auth::Token { .. } => None,
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { email, .. } => f
                .debug_struct("Basic")
                .field("email", email)
                .field("header", &"<redacted>")
                .finish(),
            Auth::Token { scheme, .. } => f
                .debug_struct("Token")
                .field("scheme", scheme)
                .field("header", &"<redacted>")
                .finish(),
        }
    }
}

/// Build the Basic Auth header value.
///
/// Encodes "email:token" in Base64 and prepends "Basic ".
fn build_basic_header(email: &str, token: &str) -> String {
    let credentials = format!("{}:{}", email, token);
    let encoded = BASE64.encode(credentials.as_bytes());
    format!("Basic {}", encoded)
}

/// The kinds of secret kept in the keyring for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    /// Jira API token for Basic Auth.
    ApiToken,
    /// OAuth app client secret.
    ClientSecret,
    /// Serialized OAuth token record.
    OAuthToken,
}

impl SecretKind {
    /// The keyring username for this secret.
    ///
    /// API tokens use the bare profile name.
    pub fn account(self, profile_name: &str) -> String {
        match self {
            SecretKind::ApiToken => profile_name.to_string(),
            SecretKind::ClientSecret => format!("{}:client_secret", profile_name),
            SecretKind::OAuthToken => format!("{}:oauth_token", profile_name),
        }
    }
}

fn entry(profile_name: &str, kind: SecretKind) -> Result<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, &kind.account(profile_name))
        .map_err(|e| ApiError::Keyring(format!("failed to access keyring: {}", e)))
}

/// Store a secret in the OS keyring.
///
/// # Errors
///
/// Returns an error if the secret cannot be stored in the keyring.
pub fn store_secret(profile_name: &str, kind: SecretKind, value: &str) -> Result<()> {
    entry(profile_name, kind)?
        .set_password(value)
        .map_err(|e| ApiError::Keyring(format!("failed to store {:?}: {}", kind, e)))
}

/// Retrieve a secret from the OS keyring.
///
/// # Errors
///
/// Returns an error if the secret is missing or the keyring cannot be read.
pub fn get_secret(profile_name: &str, kind: SecretKind) -> Result<String> {
    find_secret(profile_name, kind)?.ok_or_else(|| {
        ApiError::Keyring(format!(
            "no {:?} stored for profile '{}'",
            kind, profile_name
        ))
    })
}

/// Retrieve a secret, or `None` when the keyring has no entry for it.
///
/// # Errors
///
/// Returns an error if the keyring is locked or unavailable.
pub fn find_secret(profile_name: &str, kind: SecretKind) -> Result<Option<String>> {
    missing_as_none(entry(profile_name, kind)?.get_password(), kind)
}

fn missing_as_none(result: keyring::Result<String>, kind: SecretKind) -> Result<Option<String>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(ApiError::Keyring(format!(
            "failed to retrieve {:?}: {}",
            kind, e
        ))),
    }
}

/// Delete a secret from the OS keyring. Deleting a missing secret succeeds.
pub fn delete_secret(profile_name: &str, kind: SecretKind) -> Result<()> {
    match entry(profile_name, kind)?.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(ApiError::Keyring(format!(
            "failed to delete {:?}: {}",
            kind, e
        ))),
    }
}

/// Check if a secret exists in the OS keyring for a profile.
pub fn has_secret(profile_name: &str, kind: SecretKind) -> bool {
    matches!(find_secret(profile_name, kind), Ok(Some(_)))
}
