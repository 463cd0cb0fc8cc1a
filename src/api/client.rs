//! Jira API client implementation.
//!
//! This module provides the main client for interacting with the Jira REST API.
//! It handles authentication, request/response processing, error handling, and
//! retry logic. Clones share one connection pool and one session.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::auth::{get_secret, Auth, SecretKind};
use super::endpoints::EndpointBuilder;
use super::error::{ApiError, Result};
use super::oauth::{OAuthClient, OAuthConfig, OAuthToken};
use super::pagination::Paginator;
use super::retry::{retry, RetryConfig};
use super::session::Session;
use super::token_store::{KeyringTokenStore, TokenStore};
use super::types::{CurrentUser, Issue, SearchResult};
use super::validation::{validate_issue_key, validate_jql};
use crate::config::{OAuthProfile, Profile, Settings};

/// Jira caps search pages at this size.
pub const MAX_SEARCH_PAGE: u32 = 100;

/// Per-request options for [`JiraClient::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    pub headers: Vec<(String, String)>,
    /// Overrides the client-wide timeout.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The Jira API client.
///
/// Provides async methods for interacting with the Jira REST API.
/// Handles authentication, error handling, and retry logic for transient failures.
#[derive(Debug, Clone)]
pub struct JiraClient {
    /// The HTTP client.
    client: Client,
    /// The base URL for the Jira site.
    base_url: String,
    endpoints: EndpointBuilder,
    /// Credentials, shared by clones.
    session: Arc<Session>,
    retry: RetryConfig,
    timeout: Duration,
}

impl JiraClient {
    /// Create a new Jira client from a profile.
    ///
    /// Basic Auth profiles read the API token from the OS keyring. OAuth
    /// profiles read the client secret and the saved token from the keyring,
    /// refreshing the token if needed. The connection is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A secret cannot be retrieved from the keyring
    /// - The OAuth token is missing or can no longer be refreshed
    /// - The HTTP client cannot be built
    /// - Connection validation fails
    #[instrument(skip(profile, settings), fields(profile_name = %profile.name))]
    pub async fn new(profile: &Profile, settings: &Settings) -> Result<Self> {
        info!("Creating Jira client for profile");

        let jira = match &profile.oauth {
            Some(oauth) => {
                let secret = get_secret(&profile.name, SecretKind::ClientSecret)?;
                let config = oauth_config(oauth, secret);
                let store: Arc<dyn TokenStore> = Arc::new(KeyringTokenStore::new(&profile.name));
                let session = Session::load_oauth(OAuthClient::new(config)?, store).await?;
                let base_url = session.oauth_base_url().await.ok_or_else(|| {
                    ApiError::ReauthorizationRequired("saved token has no Jira site".to_string())
                })?;
                Self::with_session(&base_url, session, settings)?
            }
            None => {
                let auth = Auth::from_keyring(&profile.name, &profile.email)?;
                Self::with_session(&profile.url, Session::with_auth(auth), settings)?
            }
        };

        jira.validate_connection().await?;

        info!("Jira client created and connection validated");
        Ok(jira)
    }

    /// Create a new Jira client with Basic Auth credentials.
    ///
    /// Does NOT validate the connection automatically.
    pub fn with_credentials(base_url: &str, email: &str, token: &str) -> Result<Self> {
        Self::with_session(
            base_url,
            Session::with_auth(Auth::new(email, token)),
            &Settings::default(),
        )
    }

    /// Create a new Jira client that sends a bearer token.
    pub fn with_bearer_token(base_url: &str, token: &str) -> Result<Self> {
        Self::with_session(
            base_url,
            Session::with_auth(Auth::bearer(token)),
            &Settings::default(),
        )
    }

    /// Create a client for an OAuth token.
    ///
    /// Requests go through the API gateway URL recorded in the token. Every
    /// refreshed token is written to `store` when one is given.
    pub fn with_oauth(
        oauth: OAuthClient,
        token: OAuthToken,
        store: Option<Arc<dyn TokenStore>>,
        settings: &Settings,
    ) -> Result<Self> {
        let base_url = token.base_url.clone().ok_or_else(|| {
            ApiError::OAuth("token has no Jira site; call resolve_site first".to_string())
        })?;
        Self::with_session(&base_url, Session::with_oauth(oauth, token, store), settings)
    }

    /// Create a client around an existing session.
    pub fn with_session(base_url: &str, session: Session, settings: &Settings) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let session = session.with_refresh_skew(Duration::from_secs(settings.refresh_skew_secs));

        Ok(Self {
            client: Self::build_http_client(settings)?,
            endpoints: EndpointBuilder::new(&base_url, settings.api_version),
            base_url,
            session: Arc::new(session),
            retry: settings.retry.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    /// Build the HTTP client with appropriate settings.
    fn build_http_client(settings: &Settings) -> Result<Client> {
        if !settings.verify_ssl {
            warn!("TLS certificate verification is disabled");
        }

        Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .build()
            .map_err(ApiError::Network)
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the connection by calling the /myself endpoint.
    ///
    /// This verifies that:
    /// - The URL is reachable
    /// - The credentials are valid
    /// - The user has access to the Jira site
    #[instrument(skip(self))]
    pub async fn validate_connection(&self) -> Result<CurrentUser> {
        debug!("Validating Jira connection");

        let user = self.get_current_user().await.map_err(|e| {
            error!("Connection validation failed: {}", e);
            match e {
                ApiError::Unauthorized | ApiError::ReauthorizationRequired(_) => e,
                ApiError::Network(_) | ApiError::Timeout { .. } => {
                    ApiError::ConnectionFailed(format!("Cannot connect to {}: {}", self.base_url, e))
                }
                _ => ApiError::ConnectionFailed(e.to_string()),
            }
        })?;

        info!("Connected as user: {}", user.display_name);
        Ok(user)
    }

    /// Get the current authenticated user.
    #[instrument(skip(self))]
    pub async fn get_current_user(&self) -> Result<CurrentUser> {
        self.get(&self.endpoints.myself()).await
    }

    /// Search for issues using JQL.
    ///
    /// # Arguments
    ///
    /// * `jql` - The JQL query string
    /// * `start_at` - The index of the first issue to return (0-based)
    /// * `max_results` - Maximum number of issues to return (max 100)
    #[instrument(skip(self), fields(jql = %jql))]
    pub async fn search_issues(
        &self,
        jql: &str,
        start_at: u32,
        max_results: u32,
    ) -> Result<SearchResult> {
        let jql = validate_jql(jql)?;
        debug!("Searching issues: startAt={}, maxResults={}", start_at, max_results);

        let url = self.endpoints.search_issues_jql(
            &jql,
            start_at,
            max_results.min(MAX_SEARCH_PAGE),
            &[],
        );

        let result: SearchResult = self.get(&url).await?;
        debug!("Found {} issues (total: {})", result.issues.len(), result.total);
        Ok(result)
    }

    /// Page through every issue matching a JQL query.
    pub fn search_paginator(&self, jql: &str) -> Result<Paginator<Issue>> {
        Paginator::search(self.clone(), jql)
    }

    /// Get a single issue by key.
    #[instrument(skip(self), fields(issue_key = %key))]
    pub async fn get_issue(&self, key: &str) -> Result<Issue> {
        let key = validate_issue_key(key)?;
        debug!("Fetching issue");

        let issue: Issue = self
            .get(&self.endpoints.issue(Some(&key), None))
            .await
            .map_err(|e| {
                if matches!(e, ApiError::NotFound(_)) {
                    ApiError::NotFound(format!("Issue '{}' not found", key))
                } else {
                    e
                }
            })?;

        debug!("Fetched issue: {}", issue.key);
        Ok(issue)
    }

    /// GET and decode JSON.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_json(Method::GET, path, RequestOptions::default())
            .await
    }

    /// POST a JSON body and decode the JSON reply.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(Method::POST, path, RequestOptions::new().json(to_json(body)?))
            .await
    }

    /// PUT a JSON body and decode the JSON reply.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(Method::PUT, path, RequestOptions::new().json(to_json(body)?))
            .await
    }

    /// PATCH a JSON body and decode the JSON reply.
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_json(Method::PATCH, path, RequestOptions::new().json(to_json(body)?))
            .await
    }

    /// DELETE a resource, ignoring any reply body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.request(Method::DELETE, path, RequestOptions::default())
            .await
            .map(|_| ())
    }

    /// Send a request and decode the JSON reply. An empty body decodes as `null`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let response = self.request(method, path, options).await?;
        let body = response.text().await?;
        let body = if body.trim().is_empty() { "null" } else { &body };

        serde_json::from_str(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    /// Send a request and return the successful response.
    ///
    /// `path` may be relative to the base URL or absolute; credentials are
    /// only sent to the base URL's origin. Transient failures are retried;
    /// non-2xx statuses become errors.
    #[instrument(skip(self, options), fields(method = %method, path = %path))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let url = self.build_url(path);
        let timeout = options.timeout.unwrap_or(self.timeout);

        self.execute(method, &url, timeout, |mut request| {
            if !options.query.is_empty() {
                request = request.query(&options.query);
            }
            if let Some(body) = &options.json {
                request = request.json(body);
            }
            for (name, value) in &options.headers {
                request = request.header(name.as_str(), value.as_str());
            }
            Ok(request)
        })
        .await
    }

    /// Run an authenticated request with retries and OAuth recovery.
    ///
    /// `customize` is called once per attempt to add the body and headers.
    pub(crate) async fn execute<F>(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
        customize: F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder>,
    {
        let mut recovered = false;
        let trusted = self.is_same_origin(url);
        if !trusted {
            debug!("Sending request to a foreign origin without credentials");
        }

        loop {
            let auth = if trusted {
                self.session.authorization_header().await?
            } else {
                None
            };

            let result = retry(&self.retry, |_| {
                self.send_once(&method, url, timeout, auth.as_deref(), &customize)
            })
            .await;

            match result {
                Err(ApiError::Unauthorized) if !recovered && auth.is_some() => {
                    if !self.session.refresh_after_rejection(auth.as_deref()).await? {
                        return Err(ApiError::Unauthorized);
                    }
                    info!("Retrying request with a refreshed token");
                    recovered = true;
                }
                other => return other,
            }
        }
    }

    async fn send_once<F>(
        &self,
        method: &Method,
        url: &str,
        timeout: Duration,
        auth: Option<&str>,
        customize: &F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder>,
    {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(header::ACCEPT, "application/json")
            .timeout(timeout);
        if let Some(auth) = auth {
            request = request.header(header::AUTHORIZATION, auth);
        }
        let request = customize(request)?;

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    url: url.to_string(),
                    timeout_secs: timeout.as_secs(),
                }
            } else {
                ApiError::Network(e)
            }
        })?;

        Self::check_status(response).await
    }

    /// Turn a non-2xx response into an error.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        // Try to get error details from response body
        let error_body = response.text().await.unwrap_or_default();
        debug!("Error response body: {}", error_body);

        Err(ApiError::from_response(status, retry_after, &url, &error_body))
    }

    /// Resolve a path against the base URL; absolute URLs pass through.
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Whether `url` shares scheme, host and port with the base URL.
    ///
    /// Credentials are only ever sent to this origin.
    pub fn is_same_origin(&self, url: &str) -> bool {
        match (Url::parse(&self.base_url), Url::parse(url)) {
            (Ok(base), Ok(target)) => base.origin() == target.origin(),
            _ => false,
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoints(&self) -> &EndpointBuilder {
        &self.endpoints
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Default per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }
}

/// App settings for an OAuth profile, with the secret read from the keyring.
fn oauth_config(oauth: &OAuthProfile, client_secret: String) -> OAuthConfig {
    let config = OAuthConfig::new(&oauth.client_id, client_secret, &oauth.callback_url);
    match &oauth.instance_name {
        Some(name) => config.with_instance_name(name),
        None => config,
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| ApiError::validation("request body", e.to_string()))
}

/// Normalize the base URL by removing trailing slashes and checking the scheme.
fn normalize_base_url(url: &str) -> Result<String> {
    let url = url.trim().trim_end_matches('/');

    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(ApiError::InvalidUrl(format!(
            "'{}' must start with http:// or https://",
            url
        )));
    }

    // Warn if not HTTPS (but don't enforce for local testing)
    if !url.starts_with("https://") && !url.contains("localhost") && !url.contains("127.0.0.1") {
        warn!("URL does not use HTTPS: {}. This is insecure for production use.", url);
    }

    Ok(url.to_string())
}
