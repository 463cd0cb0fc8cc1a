//! The login object: credentials plus the current OAuth token.
//!
//! A session is shared by every clone of a client. OAuth refreshes are
//! single-flight: the first caller to notice an expiring token refreshes it
//! under the write lock, everyone else reuses the result.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::auth::Auth;
use super::error::{ApiError, Result};
use super::oauth::{OAuthClient, OAuthToken};
use super::token_store::TokenStore;

/// Tokens expiring within this window are refreshed before use.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

enum Credentials {
    Anonymous,
    Static(Auth),
    OAuth(OAuthState),
}

struct OAuthState {
    client: OAuthClient,
    token: OAuthToken,
    store: Option<Arc<dyn TokenStore>>,
}

impl OAuthState {
    async fn refresh(&mut self) -> Result<()> {
        let refreshed = self.client.refresh(&self.token).await.map_err(|e| {
            if e.requires_reauthorization() {
                ApiError::ReauthorizationRequired(e.to_string())
            } else {
                e
            }
        })?;

        // A rotated refresh token that is not saved is lost for good.
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&refreshed) {
                warn!("Failed to persist refreshed OAuth token: {}", e);
            }
        }

        self.token = refreshed;
        Ok(())
    }
}

/// Credentials for talking to Jira.
pub struct Session {
    credentials: RwLock<Credentials>,
    refresh_skew: Duration,
}

impl Session {
    /// A session that sends no `Authorization` header.
    pub fn anonymous() -> Self {
        Self::from_credentials(Credentials::Anonymous)
    }

    /// A session with fixed Basic or token credentials.
    pub fn with_auth(auth: Auth) -> Self {
        Self::from_credentials(Credentials::Static(auth))
    }

    /// A session backed by an OAuth token that refreshes itself.
    ///
    /// When a store is given, every newly issued token is saved to it.
    pub fn with_oauth(
        client: OAuthClient,
        token: OAuthToken,
        store: Option<Arc<dyn TokenStore>>,
    ) -> Self {
        Self::from_credentials(Credentials::OAuth(OAuthState {
            client,
            token,
            store,
        }))
    }

    /// Reload a persisted OAuth token, refreshing it if it is stale.
    ///
    /// # Errors
    ///
    /// Returns `ReauthorizationRequired` if the store holds no token or the
    /// saved refresh token was rejected.
    #[instrument(skip(client, store))]
    pub async fn load_oauth(client: OAuthClient, store: Arc<dyn TokenStore>) -> Result<Self> {
        let token = store.load()?.ok_or_else(|| {
            ApiError::ReauthorizationRequired("no saved OAuth token".to_string())
        })?;
        debug!(expires_at = %token.expires_at, "Loaded saved OAuth token");

        let session = Self::with_oauth(client, token, Some(store));
        session.authorization_header().await?;
        Ok(session)
    }

    fn from_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            refresh_skew: DEFAULT_REFRESH_SKEW,
        }
    }

    /// Change how early tokens are refreshed.
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// The header value for the next request.
    ///
    /// Refreshes an OAuth token first if it is about to expire.
    pub async fn authorization_header(&self) -> Result<Option<String>> {
        {
            let credentials = self.credentials.read().await;
            match &*credentials {
                Credentials::Anonymous => return Ok(None),
                Credentials::Static(auth) => return Ok(Some(auth.header_value().to_string())),
                Credentials::OAuth(state) if !state.token.expires_within(self.refresh_skew) => {
                    return Ok(Some(state.token.authorization_header()));
                }
                Credentials::OAuth(_) => {}
            }
        }

        let mut credentials = self.credentials.write().await;
        match &mut *credentials {
            Credentials::OAuth(state) => {
                // Another task may have refreshed while we waited for the lock.
                if state.token.expires_within(self.refresh_skew) {
                    info!("OAuth access token expiring, refreshing");
                    state.refresh().await?;
                }
                Ok(Some(state.token.authorization_header()))
            }
            Credentials::Static(auth) => Ok(Some(auth.header_value().to_string())),
            Credentials::Anonymous => Ok(None),
        }
    }

    /// React to a 401 for a request sent with `rejected_header`.
    ///
    /// Returns `true` when a new token is available and the request should be
    /// sent again. Static credentials never recover.
    #[instrument(skip(self, rejected_header))]
    pub async fn refresh_after_rejection(&self, rejected_header: Option<&str>) -> Result<bool> {
        let mut credentials = self.credentials.write().await;
        let Credentials::OAuth(state) = &mut *credentials else {
            return Ok(false);
        };

        if rejected_header != Some(state.token.authorization_header().as_str()) {
            debug!("Token already replaced by a concurrent refresh");
            return Ok(true);
        }

        if state.token.refresh_token.is_none() {
            return Err(ApiError::ReauthorizationRequired(
                "access token rejected and no refresh token is available".to_string(),
            ));
        }

        warn!("Access token rejected, refreshing");
        state.refresh().await?;
        Ok(true)
    }

    /// Snapshot of the current OAuth token, for callers persisting it themselves.
    pub async fn oauth_token(&self) -> Option<OAuthToken> {
        match &*self.credentials.read().await {
            Credentials::OAuth(state) => Some(state.token.clone()),
            _ => None,
        }
    }

    /// Gateway base URL for the OAuth site, if any.
    pub async fn oauth_base_url(&self) -> Option<String> {
        match &*self.credentials.read().await {
            Credentials::OAuth(state) => state.token.base_url.clone(),
            _ => None,
        }
    }

    pub async fn is_oauth(&self) -> bool {
        matches!(&*self.credentials.read().await, Credentials::OAuth(_))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.credentials.try_read() {
            Ok(guard) => match &*guard {
                Credentials::Anonymous => "anonymous",
                Credentials::Static(_) => "static",
                Credentials::OAuth(_) => "oauth",
            },
            Err(_) => "locked",
        };
        f.debug_struct("Session")
            .field("credentials", &kind)
            .field("refresh_skew", &self.refresh_skew)
            .finish()
    }
}
