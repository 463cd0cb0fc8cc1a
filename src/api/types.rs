//! Jira API request and response types.
//!
//! Only the shapes the client itself relies on are typed; issue fields stay
//! as JSON because every site configures its own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Avatar image URLs keyed by size, e.g. `48x48`.
pub type AvatarUrls = BTreeMap<String, String>;

/// The account behind the credentials, from `GET /myself`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub account_id: String,
    #[serde(default)]
    pub account_type: Option<String>,
    pub display_name: String,
    /// Empty when the user hides it.
    #[serde(default)]
    pub email_address: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub avatar_urls: AvatarUrls,
}

impl CurrentUser {
    /// Largest avatar available.
    pub fn avatar(&self) -> Option<&str> {
        self.avatar_urls
            .iter()
            .max_by_key(|(size, _)| size.split('x').next().and_then(|w| w.parse::<u32>().ok()))
            .map(|(_, url)| url.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// A user as returned by the user search endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub account_id: String,
    /// `atlassian`, `app` or `customer`.
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub email_address: Option<String>,
}

impl User {
    /// Jira wiki markup that mentions this user.
    pub fn mention(&self) -> String {
        format!("[~accountId:{}]", self.account_id)
    }
}

/// A group the user belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Search result from a JQL query.
///
/// Returned by `GET /rest/api/3/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(default)]
    pub start_at: u32,
    #[serde(default)]
    pub max_results: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// A Jira issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    /// The issue key (e.g., "PROJ-123").
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: String,
    /// Raw field values keyed by field id.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Issue {
    /// A field value by id (`summary`, `customfield_10010`, ...).
    pub fn field(&self, id: &str) -> Option<&Value> {
        self.fields.get(id).filter(|v| !v.is_null())
    }

    pub fn summary(&self) -> Option<&str> {
        self.field("summary").and_then(Value::as_str)
    }

    pub fn status_name(&self) -> Option<&str> {
        self.field("status")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
    }

    pub fn assignee_account_id(&self) -> Option<&str> {
        self.field("assignee")
            .and_then(|a| a.get("accountId"))
            .and_then(Value::as_str)
    }
}

/// A project reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub project_type_key: Option<String>,
}

/// Attachment metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Download URL.
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_user_deserialization() {
        let json = r#"{
            "accountId": "5b10a2844c20165700ede21g",
            "displayName": "Mia Krystof",
            "emailAddress": "mia@example.com",
            "active": true,
            "timeZone": "Australia/Sydney",
            "avatarUrls": {"16x16": "https://avatar/16", "48x48": "https://avatar/48"}
        }"#;
        let user: CurrentUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.display_name, "Mia Krystof");
        assert_eq!(user.avatar(), Some("https://avatar/48"));
    }

    #[test]
    fn test_current_user_defaults() {
        let user: CurrentUser =
            serde_json::from_str(r#"{"accountId": "a", "displayName": "A"}"#).unwrap();
        assert!(user.active);
        assert!(user.email_address.is_empty());
        assert_eq!(user.avatar(), None);
    }

    #[test]
    fn test_user_mention() {
        let user: User = serde_json::from_str(
            r#"{"accountId": "557058:abc", "accountType": "atlassian", "displayName": "Prince"}"#,
        )
        .unwrap();
        assert_eq!(user.mention(), "[~accountId:557058:abc]");
        assert!(user.active);
    }

    #[test]
    fn test_search_result_with_raw_fields() {
        let json = r#"{
            "startAt": 0, "maxResults": 50, "total": 1,
            "issues": [{
                "id": "10001", "key": "PROJ-1", "self": "https://x/rest/api/3/issue/10001",
                "fields": {
                    "summary": "Fix login",
                    "status": {"name": "In Progress"},
                    "assignee": null,
                    "customfield_10010": 5
                }
            }]
        }"#;
        let result: SearchResult = serde_json::from_str(json).unwrap();
        let issue = &result.issues[0];
        assert_eq!(result.total, 1);
        assert_eq!(issue.summary(), Some("Fix login"));
        assert_eq!(issue.status_name(), Some("In Progress"));
        assert_eq!(issue.assignee_account_id(), None);
        assert_eq!(issue.field("customfield_10010"), Some(&Value::from(5)));
    }

    #[test]
    fn test_attachment_deserialization() {
        let attachment: Attachment = serde_json::from_str(
            r#"{"id": "1", "filename": "log.txt", "size": 42, "mimeType": "text/plain",
                "content": "https://x/rest/api/3/attachment/content/1"}"#,
        )
        .unwrap();
        assert_eq!(attachment.size, 42);
        assert_eq!(attachment.mime_type.as_deref(), Some("text/plain"));
    }
}
