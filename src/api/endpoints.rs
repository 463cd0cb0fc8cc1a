//! URL builders for the Jira REST, Agile and Service Desk APIs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Jira platform REST API version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiVersion {
    #[serde(rename = "2")]
    V2,
    #[default]
    #[serde(rename = "3")]
    V3,
    #[serde(rename = "latest")]
    Latest,
}

impl ApiVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V2 => "2",
            ApiVersion::V3 => "3",
            ApiVersion::Latest => "latest",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds absolute endpoint URLs for one Jira site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointBuilder {
    base_url: String,
    api_version: ApiVersion,
}

impl EndpointBuilder {
    pub fn new(base_url: &str, api_version: ApiVersion) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    /// `{base}/rest/api/{version}`
    pub fn api_base(&self) -> String {
        format!("{}/rest/api/{}", self.base_url, self.api_version)
    }

    /// `{base}/rest/agile/1.0`
    pub fn agile_base(&self) -> String {
        format!("{}/rest/agile/1.0", self.base_url)
    }

    /// `{base}/rest/servicedeskapi`
    pub fn servicedesk_base(&self) -> String {
        format!("{}/rest/servicedeskapi", self.base_url)
    }

    // Users

    pub fn myself(&self) -> String {
        format!("{}/myself", self.api_base())
    }

    /// All users. `default` selects `/users` over `/users/search`.
    pub fn search_users(&self, start_at: u32, max_results: u32, default: bool) -> String {
        let resource = if default { "users" } else { "users/search" };
        with_query(
            format!("{}/{}", self.api_base(), resource),
            &page(start_at, max_results),
        )
    }

    pub fn user_groups(&self, account_id: &str) -> String {
        with_query(
            format!("{}/user/groups", self.api_base()),
            &[("accountId", account_id.to_string())],
        )
    }

    pub fn user(&self, account_id: &str) -> String {
        with_query(
            format!("{}/user", self.api_base()),
            &[("accountId", account_id.to_string())],
        )
    }

    pub fn user_search(&self, query: &str, start_at: u32, max_results: u32) -> String {
        let mut params = vec![("query", query.to_string())];
        params.extend(page(start_at, max_results));
        with_query(format!("{}/user/search", self.api_base()), &params)
    }

    // Projects

    /// Paginated project search; `None` extras are skipped.
    pub fn project_search(
        &self,
        start_at: u32,
        max_results: u32,
        extra: &[(&str, Option<&str>)],
    ) -> String {
        let mut params = page(start_at, max_results);
        params.extend(present(extra));
        with_query(format!("{}/project/search", self.api_base()), &params)
    }

    pub fn project(&self, key_or_id: Option<&str>) -> String {
        match key_or_id {
            Some(key) => format!("{}/project/{}", self.api_base(), segment(key)),
            None => format!("{}/project", self.api_base()),
        }
    }

    pub fn project_roles(&self, key_or_id: &str) -> String {
        format!("{}/project/{}/role", self.api_base(), segment(key_or_id))
    }

    pub fn project_role(&self, key_or_id: &str, role_id: u64) -> String {
        format!(
            "{}/project/{}/role/{}",
            self.api_base(),
            segment(key_or_id),
            role_id
        )
    }

    // Issues

    /// An issue, or the issue collection; `query` is appended verbatim.
    pub fn issue(&self, key_or_id: Option<&str>, query: Option<&str>) -> String {
        match (key_or_id, query) {
            (Some(key), Some(q)) => format!("{}/issue/{}?{}", self.api_base(), segment(key), q),
            (Some(key), None) => format!("{}/issue/{}", self.api_base(), segment(key)),
            (None, _) => format!("{}/issue", self.api_base()),
        }
    }

    pub fn search_issues_jql(
        &self,
        jql: &str,
        start_at: u32,
        max_results: u32,
        extra: &[(&str, Option<&str>)],
    ) -> String {
        let mut params = vec![("jql", jql.to_string())];
        params.extend(page(start_at, max_results));
        params.extend(present(extra));
        with_query(format!("{}/search", self.api_base()), &params)
    }

    pub fn issue_attachments(&self, key_or_id: &str) -> String {
        format!("{}/issue/{}/attachments", self.api_base(), segment(key_or_id))
    }

    pub fn attachment(&self, attachment_id: &str) -> String {
        format!("{}/attachment/{}", self.api_base(), segment(attachment_id))
    }

    pub fn attachment_content(&self, attachment_id: &str) -> String {
        format!(
            "{}/attachment/content/{}",
            self.api_base(),
            segment(attachment_id)
        )
    }

    pub fn comments(&self, key_or_id: &str, start_at: u32, max_results: u32) -> String {
        with_query(
            format!("{}/issue/{}/comment", self.api_base(), segment(key_or_id)),
            &page(start_at, max_results),
        )
    }

    pub fn comment(&self, key_or_id: &str, comment_id: &str) -> String {
        format!(
            "{}/issue/{}/comment/{}",
            self.api_base(),
            segment(key_or_id),
            segment(comment_id)
        )
    }

    pub fn worklogs(&self, key_or_id: &str, worklog_id: Option<&str>) -> String {
        let base = format!("{}/issue/{}/worklog", self.api_base(), segment(key_or_id));
        match worklog_id {
            Some(id) => format!("{}/{}", base, segment(id)),
            None => base,
        }
    }

    // Metadata

    pub fn fields(&self) -> String {
        format!("{}/field", self.api_base())
    }

    pub fn resolutions(&self) -> String {
        format!("{}/resolution", self.api_base())
    }

    pub fn priorities(&self) -> String {
        format!("{}/priority", self.api_base())
    }

    pub fn issue_types(&self) -> String {
        format!("{}/issuetype", self.api_base())
    }

    pub fn server_info(&self) -> String {
        format!("{}/serverInfo", self.api_base())
    }

    /// Cloud licence info; only exists under v3.
    pub fn instance_license(&self) -> String {
        format!("{}/rest/api/3/instance/license", self.base_url)
    }

    // Agile

    pub fn boards(&self, start_at: u32, max_results: u32, extra: &[(&str, Option<&str>)]) -> String {
        let mut params = page(start_at, max_results);
        params.extend(present(extra));
        with_query(format!("{}/board", self.agile_base()), &params)
    }

    pub fn board(&self, board_id: u64) -> String {
        format!("{}/board/{}", self.agile_base(), board_id)
    }

    pub fn sprints(
        &self,
        board_id: u64,
        start_at: u32,
        max_results: u32,
        state: Option<&str>,
    ) -> String {
        let mut params = page(start_at, max_results);
        params.extend(present(&[("state", state)]));
        with_query(
            format!("{}/board/{}/sprint", self.agile_base(), board_id),
            &params,
        )
    }

    pub fn sprint(&self, sprint_id: u64) -> String {
        format!("{}/sprint/{}", self.agile_base(), sprint_id)
    }

    // Service desk

    pub fn service_desks(&self, start: u32, limit: u32) -> String {
        with_query(
            format!("{}/servicedesk", self.servicedesk_base()),
            &[("start", start.to_string()), ("limit", limit.to_string())],
        )
    }

    pub fn service_desk(&self, service_desk_id: u64) -> String {
        format!("{}/servicedesk/{}", self.servicedesk_base(), service_desk_id)
    }
}

fn page(start_at: u32, max_results: u32) -> Vec<(&'static str, String)> {
    vec![
        ("startAt", start_at.to_string()),
        ("maxResults", max_results.to_string()),
    ]
}

fn present<'a>(extra: &[(&'a str, Option<&str>)]) -> Vec<(&'a str, String)> {
    extra
        .iter()
        .filter_map(|(k, v)| v.map(|v| (*k, v.to_string())))
        .collect()
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn with_query(base: String, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return base;
    }
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", base, query)
}
