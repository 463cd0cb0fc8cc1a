//! Connection profiles.

use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};
use crate::api::oauth::redirect_uri_from;
use crate::api::ApiError;

/// OAuth 2.0 (3LO) application details for a profile.
///
/// The client secret and the issued token live in the OS keyring, never in
/// the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthProfile {
    pub client_id: String,
    /// Authorization URL copied from the developer console, e.g.
    /// `https://auth.atlassian.com/authorize?...&redirect_uri=https%3A%2F%2Flocalhost%2Fcallback`.
    /// Its `redirect_uri` parameter is the registered callback.
    pub callback_url: String,
    /// Jira site to select when the app can reach several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
}

/// Connection details for one Jira site.
///
/// Basic Auth profiles keep their API token in the OS keyring under the
/// profile name. OAuth profiles learn the site URL from the authorized
/// token, so `url` and `email` may stay empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Unique, whitespace-free name; also the keyring account.
    pub name: String,
    /// Site URL such as `https://company.atlassian.net`.
    #[serde(default)]
    pub url: String,
    /// Login email for Basic Auth.
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthProfile>,
}

fn invalid(message: String) -> ConfigError {
    ConfigError::ValidationError(message)
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

impl Profile {
    /// A Basic Auth profile.
    pub fn new(name: String, url: String, email: String) -> Self {
        Self {
            name,
            url,
            email,
            oauth: None,
        }
    }

    /// An OAuth profile; the site is chosen during authorization.
    pub fn oauth(name: String, client_id: String, callback_url: String) -> Self {
        Self {
            name,
            url: String::new(),
            email: String::new(),
            oauth: Some(OAuthProfile {
                client_id,
                callback_url,
                instance_name: None,
            }),
        }
    }

    pub fn is_oauth(&self) -> bool {
        self.oauth.is_some()
    }

    /// Check the profile before it is saved or used.
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("profile name cannot be empty".to_string()));
        }
        if self.name.contains(char::is_whitespace) {
            return Err(invalid(format!(
                "profile name '{}' cannot contain whitespace",
                self.name
            )));
        }

        match &self.oauth {
            Some(oauth) => self.validate_oauth(oauth),
            None => self.validate_basic(),
        }
    }

    fn validate_basic(&self) -> Result<()> {
        let name = &self.name;
        if self.url.is_empty() {
            return Err(invalid(format!("profile '{}': URL cannot be empty", name)));
        }
        if !has_http_scheme(&self.url) {
            return Err(invalid(format!(
                "profile '{}': URL must start with http:// or https://",
                name
            )));
        }
        if self.email.is_empty() {
            return Err(invalid(format!("profile '{}': email cannot be empty", name)));
        }
        if !self.email.contains('@') {
            return Err(invalid(format!(
                "profile '{}': '{}' is not a valid email address",
                name, self.email
            )));
        }
        Ok(())
    }

    fn validate_oauth(&self, oauth: &OAuthProfile) -> Result<()> {
        let name = &self.name;
        if oauth.client_id.trim().is_empty() {
            return Err(invalid(format!(
                "profile '{}': OAuth client_id cannot be empty",
                name
            )));
        }
        if !oauth.callback_url.starts_with("https://") {
            return Err(invalid(format!(
                "profile '{}': OAuth callback_url must start with https://",
                name
            )));
        }
        if let Err(e) = redirect_uri_from(&oauth.callback_url) {
            let reason = match e {
                ApiError::Validation { message, .. } => message,
                other => other.to_string(),
            };
            return Err(invalid(format!(
                "profile '{}': OAuth callback_url: {}",
                name, reason
            )));
        }
        if !self.url.is_empty() && !has_http_scheme(&self.url) {
            return Err(invalid(format!(
                "profile '{}': URL must start with http:// or https://",
                name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(name: &str, url: &str, email: &str) -> Profile {
        Profile::new(name.to_string(), url.to_string(), email.to_string())
    }

    const AUTHORIZE_URL: &str = "https://auth.atlassian.com/authorize?audience=api.atlassian.com\
        &client_id=abc&scope=read%3Ajira-work\
        &redirect_uri=https%3A%2F%2Flocalhost%3A8080%2Fcallback&response_type=code";

    fn oauth(client_id: &str, callback_url: &str) -> Profile {
        Profile::oauth(
            "cloud".to_string(),
            client_id.to_string(),
            callback_url.to_string(),
        )
    }

    #[test]
    fn test_valid_basic_profiles() {
        assert!(basic("work", "https://company.atlassian.net", "user@company.com")
            .validate()
            .is_ok());
        assert!(basic("local", "http://localhost:8080", "user@company.com")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_invalid_basic_profiles() {
        let cases = [
            (basic("", "https://x.net", "a@b.c"), "name cannot be empty"),
            (basic("my work", "https://x.net", "a@b.c"), "cannot contain whitespace"),
            (basic("work", "", "a@b.c"), "URL cannot be empty"),
            (basic("work", "x.atlassian.net", "a@b.c"), "must start with http"),
            (basic("work", "https://x.net", ""), "email cannot be empty"),
            (basic("work", "https://x.net", "not-an-email"), "valid email"),
        ];

        for (profile, expected) in cases {
            let err = profile.validate().unwrap_err().to_string();
            assert!(err.contains(expected), "{:?}: {}", profile, err);
        }
    }

    #[test]
    fn test_oauth_profile_without_url_is_valid() {
        let profile = oauth("client-123", AUTHORIZE_URL);
        assert!(profile.is_oauth());
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_invalid_oauth_profiles() {
        let err = oauth(" ", AUTHORIZE_URL).validate().unwrap_err();
        assert!(err.to_string().contains("client_id cannot be empty"));

        let err = oauth("client", "http://localhost/cb").validate().unwrap_err();
        assert!(err.to_string().contains("callback_url must start with https://"));

        let mut profile = oauth("client", AUTHORIZE_URL);
        profile.url = "ftp://example.com".to_string();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_oauth_callback_must_carry_redirect_uri() {
        let err = oauth("client", "https://localhost:8080/callback")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("redirect_uri"), "{}", err);
    }

    #[test]
    fn test_oauth_profile_from_toml() {
        let profile: Profile = toml::from_str(
            r#"
            name = "cloud"

            [oauth]
            client_id = "abc"
            callback_url = "https://auth.atlassian.com/authorize?redirect_uri=https%3A%2F%2Flocalhost%2Fcb"
            instance_name = "acme"
            "#,
        )
        .unwrap();

        let oauth = profile.oauth.as_ref().unwrap();
        assert_eq!(oauth.instance_name.as_deref(), Some("acme"));
        assert!(profile.url.is_empty());
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn test_basic_profile_serialization_omits_oauth() {
        let profile = basic("work", "https://company.atlassian.net", "user@company.com");

        let toml_str = toml::to_string(&profile).unwrap();
        let parsed: Profile = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed, profile);
        assert!(!toml_str.contains("oauth"));
    }
}
