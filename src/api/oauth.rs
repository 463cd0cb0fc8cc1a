//! OAuth 2.0 (3LO) for Atlassian Cloud.
//!
//! Covers the whole token lifecycle: building the authorization URL,
//! validating the redirect, exchanging the authorization code, refreshing
//! (Atlassian rotates refresh tokens on every use) and resolving which Jira
//! site the token is for.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::error::{extract_error_message, ApiError, Result};

/// Atlassian's token endpoint.
pub const TOKEN_URL: &str = "https://auth.atlassian.com/oauth/token";

/// Lists the sites an access token can reach.
pub const ACCESSIBLE_RESOURCES_URL: &str =
    "https://api.atlassian.com/oauth/token/accessible-resources";

/// Jira API gateway; the cloud id is appended.
pub const API_GATEWAY_URL: &str = "https://api.atlassian.com/ex/jira";

/// Placeholder Atlassian's developer console puts in the `state` parameter.
const STATE_PLACEHOLDER: &str = "${YOUR_USER_BOUND_VALUE}";

/// Scope that makes the token endpoint issue a refresh token.
const OFFLINE_ACCESS: &str = "offline_access";

const STATE_LEN: usize = 12;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Settings for an OAuth 2.0 app registered in the Atlassian developer console.
#[derive(Clone)]
pub struct OAuthConfig {
    /// App client id.
    pub client_id: String,
    /// App client secret.
    pub client_secret: String,
    /// The full authorization URL copied from the developer console.
    ///
    /// Its `redirect_uri` query parameter is the registered callback.
    pub callback_url: String,
    /// Name of the Jira site to use when the token reaches several.
    pub instance_name: Option<String>,
    pub token_url: String,
    pub resources_url: String,
    pub gateway_url: String,
}

impl OAuthConfig {
    /// Create a config against Atlassian's production endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            callback_url: callback_url.into(),
            instance_name: None,
            token_url: TOKEN_URL.to_string(),
            resources_url: ACCESSIBLE_RESOURCES_URL.to_string(),
            gateway_url: API_GATEWAY_URL.to_string(),
        }
    }

    /// Select a Jira site by name.
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    /// Point the token, resources and gateway endpoints somewhere else.
    pub fn with_endpoints(
        mut self,
        token_url: impl Into<String>,
        resources_url: impl Into<String>,
        gateway_url: impl Into<String>,
    ) -> Self {
        self.token_url = token_url.into();
        self.resources_url = resources_url.into();
        self.gateway_url = gateway_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Check that the config can drive a handshake.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(ApiError::validation("client_id", "cannot be empty"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ApiError::validation("client_secret", "cannot be empty"));
        }
        self.redirect_uri().map(|_| ())
    }

    /// The registered callback, taken from the authorization URL.
    pub fn redirect_uri(&self) -> Result<String> {
        redirect_uri_from(&self.callback_url)
    }
}

/// Extract the `redirect_uri` parameter from an authorization URL.
///
/// Profiles store the authorization URL copied from the developer console;
/// the callback the app registered travels inside it.
pub fn redirect_uri_from(callback_url: &str) -> Result<String> {
    let url = Url::parse(callback_url)
        .map_err(|e| ApiError::validation("callback_url", e.to_string()))?;

    url.query_pairs()
        .find(|(k, _)| k == "redirect_uri")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::validation("callback_url", "missing the redirect_uri query parameter")
        })
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("callback_url", &self.callback_url)
            .field("instance_name", &self.instance_name)
            .field("token_url", &self.token_url)
            .finish()
    }
}

/// An access token plus everything needed to refresh and route it.
///
/// This is the record callers persist between runs.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    /// Absolute expiry. Records without one load as already expired.
    #[serde(default = "already_expired")]
    pub expires_at: DateTime<Utc>,
    /// Gateway URL for the selected site.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, alias = "ins_name", skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_id: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn already_expired() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// `secs` from now, clamped to the representable range.
fn expiry_after(secs: i64) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::try_seconds(secs.max(0))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl OAuthToken {
    fn from_response(response: TokenResponse, previous_refresh: Option<&str>) -> Self {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        Self {
            access_token: response.access_token,
            refresh_token: response
                .refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            token_type: response.token_type.unwrap_or_else(default_token_type),
            scope: response.scope.unwrap_or_default(),
            expires_at: expiry_after(expires_in),
            base_url: None,
            instance_name: None,
            cloud_id: None,
        }
    }

    /// Whether the access token is past its expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Whether the access token expires within `skew`.
    ///
    /// A skew too large to represent covers every expiry.
    pub fn expires_within(&self, skew: Duration) -> bool {
        chrono::Duration::from_std(skew)
            .ok()
            .and_then(|skew| Utc::now().checked_add_signed(skew))
            .map_or(true, |horizon| horizon >= self.expires_at)
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Serialize for persistence.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ApiError::TokenStore(format!("failed to serialize token: {}", e)))
    }

    /// Load a persisted token.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ApiError::TokenStore(format!("failed to parse token: {}", e)))
    }
}

impl fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("base_url", &self.base_url)
            .field("instance_name", &self.instance_name)
            .finish()
    }
}

/// Token endpoint response body.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// A Jira site reachable with a token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleResource {
    /// The cloud id.
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The URL to send the user to, and the state it carries.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Drives the OAuth 2.0 handshake against the Atlassian endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    config: OAuthConfig,
}

impl OAuthClient {
    /// Create a client for an app config.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is incomplete or the HTTP client
    /// cannot be built.
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(ApiError::Network)?;
        Self::with_http_client(config, http)
    }

    /// Create a client that reuses an existing HTTP client.
    pub fn with_http_client(config: OAuthConfig, http: Client) -> Result<Self> {
        config.validate()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the URL the user must visit to grant access.
    ///
    /// Ensures `offline_access` is requested and sets a fresh `state`.
    pub fn authorization_request(&self) -> Result<AuthorizationRequest> {
        let mut url = Url::parse(&self.config.callback_url)
            .map_err(|e| ApiError::validation("callback_url", e.to_string()))?;
        let state = generate_state();

        let mut has_scope = false;
        let mut has_state = false;
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .into_owned()
            .map(|(k, v)| {
                if k == "scope" {
                    has_scope = true;
                    let scope = with_offline_access(&v);
                    (k, scope)
                } else if k == "state" {
                    has_state = true;
                    if v != STATE_PLACEHOLDER {
                        debug!("Replacing preset state in authorization URL");
                    }
                    (k, state.clone())
                } else {
                    (k, v)
                }
            })
            .collect();

        if !has_scope {
            pairs.push(("scope".to_string(), OFFLINE_ACCESS.to_string()));
        }
        if !has_state {
            pairs.push(("state".to_string(), state.clone()));
        }

        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));

        Ok(AuthorizationRequest {
            url: url.to_string(),
            state,
        })
    }

    /// Validate the URL the browser was redirected to and extract the code.
    pub fn parse_redirect(&self, redirect_url: &str, expected_state: Option<&str>) -> Result<String> {
        let redirect = Url::parse(redirect_url.trim())
            .map_err(|e| ApiError::OAuth(format!("invalid redirect URL: {}", e)))?;

        let registered = self.config.redirect_uri()?;
        let registered = Url::parse(&registered)
            .map_err(|e| ApiError::validation("redirect_uri", e.to_string()))?;

        let mut landed = redirect.clone();
        landed.set_query(None);
        landed.set_fragment(None);
        if landed.as_str().trim_end_matches('/') != registered.as_str().trim_end_matches('/') {
            return Err(ApiError::OAuth(format!(
                "redirect URL '{}' does not match the registered callback '{}'",
                landed, registered
            )));
        }

        let param = |name: &str| {
            redirect
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };

        if let Some(error) = param("error") {
            let description = param("error_description").unwrap_or_default();
            return Err(ApiError::OAuth(format!(
                "authorization was not granted: {} {}",
                error, description
            )));
        }

        if let Some(expected) = expected_state {
            if param("state").as_deref() != Some(expected) {
                return Err(ApiError::OAuth(
                    "state mismatch in redirect; the response may not be for this request"
                        .to_string(),
                ));
            }
        }

        param("code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ApiError::OAuth("redirect URL carries no authorization code".to_string()))
    }

    /// Exchange an authorization code for a token and resolve its site.
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthToken> {
        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret,
            "code": code,
            "redirect_uri": self.config.redirect_uri()?,
        });

        let response = self.post_token(&body).await.map_err(|e| match e {
            ApiError::TokenRefreshFailed { status, message } => {
                ApiError::OAuth(format!("code exchange failed (HTTP {}): {}", status, message))
            }
            other => other,
        })?;

        let mut token = OAuthToken::from_response(response, None);
        if token.refresh_token.is_none() {
            warn!("No refresh token issued; the token cannot be renewed without re-authorizing");
        }
        self.resolve_site(&mut token).await?;

        info!(site = ?token.instance_name, "OAuth authorization complete");
        Ok(token)
    }

    /// Trade a refresh token for a new access token.
    ///
    /// The returned token carries the rotated refresh token, or the old one
    /// when the endpoint did not send a replacement.
    #[instrument(skip(self, token))]
    pub async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            ApiError::ReauthorizationRequired(
                "token has no refresh token; authorize again with the offline_access scope"
                    .to_string(),
            )
        })?;

        debug!("Refreshing OAuth access token");
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.config.client_id,
            "client_secret": self.config.client_secret,
            "refresh_token": refresh_token,
        });

        let response = self.post_token(&body).await?;
        let mut refreshed = OAuthToken::from_response(response, Some(refresh_token));
        refreshed.base_url = token.base_url.clone();
        refreshed.instance_name = token.instance_name.clone();
        refreshed.cloud_id = token.cloud_id.clone();

        if refreshed.base_url.is_none() {
            self.resolve_site(&mut refreshed).await?;
        }

        info!(expires_at = %refreshed.expires_at, "OAuth access token refreshed");
        Ok(refreshed)
    }

    async fn post_token(&self, body: &serde_json::Value) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = extract_error_message(&text).unwrap_or_else(|| status.to_string());
            warn!(status = status.as_u16(), "Token endpoint rejected request");
            return Err(ApiError::TokenRefreshFailed {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("malformed token response: {}", e)))
    }

    /// List the Jira sites an access token can reach.
    #[instrument(skip(self, access_token))]
    pub async fn accessible_resources(&self, access_token: &str) -> Result<Vec<AccessibleResource>> {
        let response = self
            .http
            .get(&self.config.resources_url)
            .bearer_auth(access_token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::OAuth(format!(
                "could not list accessible sites (HTTP {}): {}",
                status.as_u16(),
                extract_error_message(&text).unwrap_or_default()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("malformed resource list: {}", e)))
    }

    /// Attach the configured site (or the first reachable one) to a token.
    pub async fn resolve_site(&self, token: &mut OAuthToken) -> Result<()> {
        let resources = self.accessible_resources(&token.access_token).await?;
        let site = select_site(&resources, self.config.instance_name.as_deref())
            .ok_or_else(|| ApiError::OAuth("the token cannot reach any Jira site".to_string()))?;

        token.base_url = Some(format!("{}/{}", self.config.gateway_url, site.id));
        token.instance_name = Some(site.name.clone());
        token.cloud_id = Some(site.id.clone());
        debug!(site = %site.name, "Resolved Jira site");
        Ok(())
    }

    /// Run the whole handshake.
    ///
    /// `prompt` receives the authorization request and must resolve to the
    /// URL the browser was redirected to after the user granted access.
    pub async fn authorize<F, Fut>(&self, prompt: F) -> Result<OAuthToken>
    where
        F: FnOnce(AuthorizationRequest) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let request = self.authorization_request()?;
        let state = request.state.clone();
        let redirect = prompt(request).await?;
        let code = self.parse_redirect(&redirect, Some(&state))?;
        self.exchange_code(&code).await
    }
}

/// Open the authorization URL in the user's browser.
pub fn open_in_browser(url: &str) -> Result<()> {
    open::that(url).map_err(|e| ApiError::OAuth(format!("could not open a browser: {}", e)))
}

fn select_site<'a>(
    resources: &'a [AccessibleResource],
    instance_name: Option<&str>,
) -> Option<&'a AccessibleResource> {
    if let Some(name) = instance_name {
        if let Some(site) = resources.iter().find(|r| r.name.eq_ignore_ascii_case(name)) {
            return Some(site);
        }
        warn!(requested = %name, "Requested Jira site not reachable, using the first one");
    }
    resources.first()
}

fn with_offline_access(scope: &str) -> String {
    if scope.split_whitespace().any(|s| s == OFFLINE_ACCESS) {
        return scope.trim().to_string();
    }
    format!("{} {}", OFFLINE_ACCESS, scope.trim()).trim().to_string()
}

fn generate_state() -> String {
    let mut rng = rand::thread_rng();
    (0..STATE_LEN)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}
