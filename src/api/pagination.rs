//! Offset pagination over Jira list endpoints.
//!
//! Jira pages with `startAt`/`maxResults`. Most endpoints wrap a page in an
//! envelope (`{"values": [...], "total": n}`, or `issues` for search); a few,
//! such as user search, return a bare array and paging stops at the first
//! empty page, since the server may cap `maxResults` below what was asked.

use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::stream::{self, Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::client::{JiraClient, MAX_SEARCH_PAGE};
use super::error::{ApiError, Result};
use super::types::Issue;
use super::validation::validate_jql;

/// Default number of items requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

type UrlFn = Arc<dyn Fn(u32, u32) -> String + Send + Sync>;

/// Walks a paginated endpoint one page at a time.
pub struct Paginator<T> {
    client: JiraClient,
    url_for: UrlFn,
    results_key: String,
    total_key: String,
    page_size: u32,
    start_at: u32,
    total: Option<u64>,
    exhausted: bool,
    /// Items fetched but not yet handed out.
    pending: VecDeque<T>,
    _item: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Paginator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("results_key", &self.results_key)
            .field("page_size", &self.page_size)
            .field("start_at", &self.start_at)
            .field("total", &self.total)
            .field("exhausted", &self.exhausted)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl<T: DeserializeOwned> Paginator<T> {
    /// Page through the URLs produced by `url_for(start_at, max_results)`.
    pub fn new<F>(client: JiraClient, url_for: F) -> Self
    where
        F: Fn(u32, u32) -> String + Send + Sync + 'static,
    {
        Self {
            client,
            url_for: Arc::new(url_for),
            results_key: "values".to_string(),
            total_key: "total".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            start_at: 0,
            total: None,
            exhausted: false,
            pending: VecDeque::new(),
            _item: PhantomData,
        }
    }

    /// Envelope key holding the items (default `values`).
    pub fn results_key(mut self, key: impl Into<String>) -> Self {
        self.results_key = key.into();
        self
    }

    /// Envelope key holding the total count (default `total`).
    pub fn total_key(mut self, key: impl Into<String>) -> Self {
        self.total_key = key.into();
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Total number of items, once the first envelope page reported it.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Whether every item has been fetched and handed out.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.pending.is_empty()
    }

    /// Start over from the first page.
    pub fn reset(&mut self) {
        self.start_at = 0;
        self.total = None;
        self.exhausted = false;
        self.pending.clear();
    }

    /// Fetch the next page, or `None` once every item has been returned.
    ///
    /// Items left over from a capped [`collect`](Self::collect) come back
    /// first, as a page of their own.
    pub async fn next_page(&mut self) -> Result<Option<Vec<T>>> {
        if !self.pending.is_empty() {
            return Ok(Some(self.pending.drain(..).collect()));
        }
        if self.exhausted {
            return Ok(None);
        }

        let url = (self.url_for)(self.start_at, self.page_size);
        debug!(start_at = self.start_at, page_size = self.page_size, "Fetching page");
        let body: Value = self.client.get(&url).await?;

        let items = match body {
            Value::Array(items) => items,
            Value::Object(mut map) => {
                if self.total.is_none() {
                    self.total = map.get(&self.total_key).and_then(Value::as_u64);
                }
                if map.get("isLast").and_then(Value::as_bool) == Some(true) {
                    self.exhausted = true;
                }
                let items = match map.remove(&self.results_key) {
                    Some(Value::Array(items)) => items,
                    Some(_) => {
                        return Err(ApiError::InvalidResponse(format!(
                            "'{}' is not an array",
                            self.results_key
                        )))
                    }
                    None => Vec::new(),
                };
                items
            }
            other => {
                return Err(ApiError::InvalidResponse(format!(
                    "expected a page of results, got {}",
                    other
                )))
            }
        };

        if items.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        let count = items.len();
        self.start_at = self.start_at.saturating_add(count as u32);
        if self.total.is_some_and(|total| u64::from(self.start_at) >= total) {
            self.exhausted = true;
        }

        let items = items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<std::result::Result<Vec<T>, _>>()
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse page item: {}", e)))?;

        Ok(Some(items))
    }

    /// Gather items into memory, stopping after `max_items` if given.
    ///
    /// Items past the cap stay queued, so a later call resumes where this
    /// one stopped.
    pub async fn collect(&mut self, max_items: Option<usize>) -> Result<Vec<T>> {
        let mut all = Vec::new();
        if max_items == Some(0) {
            return Ok(all);
        }

        while let Some(page) = self.next_page().await? {
            all.extend(page);
            if let Some(max) = max_items {
                if all.len() >= max {
                    self.pending.extend(all.drain(max..));
                    break;
                }
            }
        }

        Ok(all)
    }

    /// Yield items one by one, fetching pages lazily.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        stream::try_unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await;
            page.map(|items| {
                items.map(|items| {
                    let page = stream::iter(items.into_iter().map(Ok::<T, ApiError>));
                    (page, paginator)
                })
            })
        })
        .try_flatten()
    }
}

impl Paginator<Issue> {
    /// Page through the issues matching a JQL query.
    pub fn search(client: JiraClient, jql: &str) -> Result<Self> {
        let jql = validate_jql(jql)?;
        let endpoints = client.endpoints().clone();

        Ok(Self::new(client, move |start_at, max_results| {
            endpoints.search_issues_jql(&jql, start_at, max_results, &[])
        })
        .results_key("issues")
        .page_size(MAX_SEARCH_PAGE))
    }
}
