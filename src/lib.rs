//! jiraone - a client library for the Jira Cloud REST API.
//!
//! Authenticates with Basic Auth (email + API token) or OAuth 2.0 (3LO),
//! keeps OAuth tokens fresh across process restarts, retries rate-limited
//! calls with backoff and builds endpoint URLs for the REST, Agile and
//! Service Desk APIs.
//!
//! ```no_run
//! use jiraone::api::JiraClient;
//! use jiraone::config::Config;
//!
//! # async fn run() -> jiraone::Result<()> {
//! let config = Config::load()?;
//! let profile = config.default_profile()?;
//! let client = JiraClient::new(profile, &config.settings).await?;
//!
//! let issues = client.search_issues("project = ABC", 0, 50).await?;
//! println!("{} issues", issues.total);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod logging;

pub use api::{ApiError, JiraClient, Session};
pub use config::{Config, ConfigError, Profile, Settings};
pub use error::{Error, Result};
