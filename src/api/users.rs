//! User directory: bulk listing, local search, group lookup and mentions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::client::JiraClient;
use super::error::{ApiError, Result};
use super::pagination::Paginator;
use super::types::{Group, User};
use super::validation::validate_account_id;

/// Users requested per page from `users/search`.
pub const USER_PAGE_SIZE: u32 = 1000;

const ACCOUNT_TYPES: [&str; 4] = ["atlassian", "customer", "app", "unknown"];

/// Which users to keep by their `active` flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Both,
    Active,
    Inactive,
}

impl UserStatus {
    fn matches(self, active: bool) -> bool {
        match self {
            UserStatus::Both => true,
            UserStatus::Active => active,
            UserStatus::Inactive => !active,
        }
    }
}

impl FromStr for UserStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "both" => Ok(UserStatus::Both),
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            other => Err(ApiError::validation(
                "status",
                format!("'{}' is not one of both, active, inactive", other),
            )),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UserStatus::Both => "both",
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Filter applied while listing users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFilter {
    pub status: UserStatus,
    /// Only keep this account type; `None` keeps every type.
    pub account_type: Option<String>,
}

impl Default for UserFilter {
    fn default() -> Self {
        Self {
            status: UserStatus::Both,
            account_type: Some("atlassian".to_string()),
        }
    }
}

impl UserFilter {
    pub fn new(status: UserStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn account_type(mut self, account_type: Option<&str>) -> Self {
        self.account_type = account_type.map(str::to_string);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(account_type) = &self.account_type {
            if !ACCOUNT_TYPES.contains(&account_type.as_str()) {
                return Err(ApiError::validation(
                    "account_type",
                    format!(
                        "'{}' is not one of {}",
                        account_type,
                        ACCOUNT_TYPES.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn matches(&self, user: &User) -> bool {
        let type_ok = self
            .account_type
            .as_deref()
            .map_or(true, |t| user.account_type == t);
        type_ok && self.status.matches(user.active)
    }
}

/// Lists users of a site and keeps the last listing for local lookups.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    client: JiraClient,
    page_size: u32,
    users: Vec<User>,
}

impl UserDirectory {
    pub fn new(client: JiraClient) -> Self {
        Self {
            client,
            page_size: USER_PAGE_SIZE,
            users: Vec::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Users from the last [`fetch_users`](Self::fetch_users) call.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// List every user matching `filter`.
    pub async fn fetch_users(&mut self, filter: &UserFilter) -> Result<&[User]> {
        self.fetch_users_with_progress(filter, |_| {}).await
    }

    /// Like [`fetch_users`](Self::fetch_users), reporting the running count
    /// of kept users after every page.
    #[instrument(skip(self, progress), fields(status = %filter.status))]
    pub async fn fetch_users_with_progress<P>(
        &mut self,
        filter: &UserFilter,
        mut progress: P,
    ) -> Result<&[User]>
    where
        P: FnMut(usize),
    {
        filter.validate()?;
        self.client.validate_connection().await?;

        let endpoints = self.client.endpoints().clone();
        let mut pages: Paginator<User> = Paginator::new(self.client.clone(), move |start, max| {
            endpoints.search_users(start, max, false)
        })
        .page_size(self.page_size);

        let mut users = Vec::new();
        while let Some(page) = pages.next_page().await? {
            users.extend(page.into_iter().filter(|u| filter.matches(u)));
            debug!(count = users.len(), "Fetched users so far");
            progress(users.len());
        }

        info!(count = users.len(), "Fetched users");
        self.users = users;
        Ok(&self.users)
    }

    /// Search the fetched users, listing them first if nothing was fetched.
    pub async fn search(&mut self, queries: &[&str]) -> Result<Vec<User>> {
        if self.users.is_empty() {
            self.fetch_users(&UserFilter::default()).await?;
        }
        Ok(search_users(&self.users, queries)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Mention markup for every user matching one of `names`.
    pub async fn mentions(&mut self, names: &[&str]) -> Result<Vec<String>> {
        Ok(self.search(names).await?.iter().map(User::mention).collect())
    }

    /// Names of the groups a user belongs to.
    #[instrument(skip(self))]
    pub async fn groups(&self, account_id: &str) -> Result<Vec<String>> {
        let account_id = validate_account_id(account_id)?;
        let groups: Vec<Group> = self
            .client
            .get(&self.client.endpoints().user_groups(&account_id))
            .await?;
        Ok(groups.into_iter().map(|g| g.name).collect())
    }

    /// Server-side lookup by name or email.
    pub async fn find(&self, query: &str, max_results: u32) -> Result<Vec<User>> {
        if query.trim().is_empty() {
            return Err(ApiError::validation("query", "cannot be empty"));
        }
        self.client
            .get(&self.client.endpoints().user_search(query.trim(), 0, max_results))
            .await
    }
}

/// Users whose display name contains a query (ignoring case) or whose
/// account id equals one. Each user appears at most once.
pub fn search_users<'a>(users: &'a [User], queries: &[&str]) -> Vec<&'a User> {
    let lowered: Vec<String> = queries.iter().map(|q| q.to_lowercase()).collect();

    users
        .iter()
        .filter(|user| {
            let name = user.display_name.to_lowercase();
            queries
                .iter()
                .zip(&lowered)
                .any(|(q, lower)| name.contains(lower.as_str()) || *q == user.account_id)
        })
        .collect()
}
