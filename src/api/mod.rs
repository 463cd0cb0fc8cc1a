//! Jira REST API client and types.
//!
//! This module provides the interface for communicating with the Jira REST
//! API: credentials and the OAuth 2.0 token lifecycle, request execution with
//! retries, endpoint URLs, pagination and the data helpers built on them.

pub mod attachments;
pub mod auth;
mod client;
pub mod endpoints;
mod error;
pub mod oauth;
pub mod pagination;
pub mod retry;
mod session;
pub mod token_store;
mod types;
pub mod users;
pub mod validation;

pub use auth::Auth;
pub use client::{JiraClient, RequestOptions, MAX_SEARCH_PAGE};
pub use endpoints::{ApiVersion, EndpointBuilder};
pub use error::{ApiError, Result};
pub use oauth::{OAuthClient, OAuthConfig, OAuthToken};
pub use pagination::Paginator;
pub use retry::RetryConfig;
pub use session::{Session, DEFAULT_REFRESH_SKEW};
pub use token_store::{FileTokenStore, KeyringTokenStore, MemoryTokenStore, TokenStore};
pub use types::{Attachment, AvatarUrls, CurrentUser, Group, Issue, Project, SearchResult, User};
pub use users::{UserDirectory, UserFilter, UserStatus};
