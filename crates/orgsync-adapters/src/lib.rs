//! Remote source contracts (directory service, HR system of record) and the
//! readers that turn their raw payloads into core records.

use std::collections::BTreeSet;

use async_trait::async_trait;
use orgsync_storage::{AuthError, BearerToken, RawResponse, TransportError};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info};

mod directory;
mod graph;
mod records;
mod salesforce;

pub use directory::{project_user, DirectoryFilters, DirectoryReader};
pub use graph::{GraphClient, MANAGER_EXPAND, USER_SELECT};
pub use records::{SorSchema, SystemOfRecordReader};
pub use salesforce::{SalesforceClient, SalesforceCredentials};

pub const CRATE_NAME: &str = "orgsync-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{context}: expected field `{field}` is missing")]
    Schema { field: String, context: String },
}

impl AdapterError {
    pub fn schema(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Schema {
            field: field.into(),
            context: context.into(),
        }
    }
}

/// One page of the directory roster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsersPage {
    pub value: Vec<JsonValue>,
    pub next_link: Option<String>,
}

impl UsersPage {
    pub fn from_json(body: JsonValue) -> Result<Self, AdapterError> {
        let JsonValue::Object(mut map) = body else {
            return Err(AdapterError::schema("value", "users page is not an object"));
        };
        let value = match map.remove("value") {
            Some(JsonValue::Array(items)) => items,
            _ => return Err(AdapterError::schema("value", "users page")),
        };
        let next_link = map
            .remove("@odata.nextLink")
            .and_then(|v| v.as_str().map(str::to_string));
        Ok(Self { value, next_link })
    }
}

/// Body of the profile update written back to the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPatch {
    #[serde(rename = "manager@odata.bind")]
    pub manager_reference: String,
    pub department: String,
    #[serde(rename = "jobTitle")]
    pub job_title: String,
}

#[async_trait]
pub trait DirectoryApi: Send + Sync {
    /// First roster page when `next_link` is `None`, otherwise the page behind the link.
    async fn users_page(
        &self,
        token: &BearerToken,
        next_link: Option<&str>,
    ) -> Result<UsersPage, AdapterError>;

    async fn get_user(&self, token: &BearerToken, id: &str) -> Result<JsonValue, AdapterError>;

    /// Transport failures are errors; every HTTP status is returned to the caller.
    async fn patch_user(
        &self,
        token: &BearerToken,
        id: &str,
        patch: &UserPatch,
    ) -> Result<RawResponse, AdapterError>;

    /// Reference string used to bind a user as someone's manager.
    fn manager_reference(&self, directory_id: &str) -> String;
}

#[async_trait]
pub trait RecordQuery: Send + Sync {
    /// Every row matching `soql`, following continuation until exhausted.
    async fn query_all(&self, soql: &str) -> Result<Vec<JsonValue>, AdapterError>;
}

/// Addresses that are never processed, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyList {
    addresses: BTreeSet<String>,
}

impl DenyList {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_ascii_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, email: &str) -> bool {
        self.addresses.contains(&email.trim().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Drop every item whose address is deny-listed. Listed addresses that are
    /// absent from `items` are only logged.
    pub fn remove_from<T>(
        &self,
        items: Vec<T>,
        email_of: impl Fn(&T) -> Option<&str>,
        source: &str,
    ) -> Vec<T> {
        if self.is_empty() {
            return items;
        }
        let mut dropped = BTreeSet::new();
        let kept: Vec<T> = items
            .into_iter()
            .filter(|item| match email_of(item) {
                Some(email) if self.contains(email) => {
                    dropped.insert(email.trim().to_ascii_lowercase());
                    false
                }
                _ => true,
            })
            .collect();

        for absent in self.addresses.difference(&dropped) {
            debug!(source, address = %absent, "deny-listed address not present; nothing to drop");
        }
        if !dropped.is_empty() {
            info!(source, dropped = dropped.len(), "removed deny-listed addresses");
        }
        kept
    }
}

pub(crate) fn require<'a>(
    raw: &'a JsonValue,
    key: &str,
    context: &str,
) -> Result<&'a JsonValue, AdapterError> {
    raw.get(key).ok_or_else(|| AdapterError::schema(key, context))
}

/// Non-blank string value; null, blank and non-string values read as `None`.
pub(crate) fn text(value: &JsonValue) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub(crate) fn flag(value: &JsonValue) -> bool {
    value.as_bool().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn users_page_requires_value_array() {
        let page = UsersPage::from_json(json!({
            "value": [{ "id": "1" }],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/users?$skiptoken=x"
        }))
        .expect("page");
        assert_eq!(page.value.len(), 1);
        assert!(page.next_link.is_some());

        let err = UsersPage::from_json(json!({ "items": [] })).expect_err("schema");
        assert!(matches!(err, AdapterError::Schema { ref field, .. } if field == "value"));
    }

    #[test]
    fn patch_serializes_with_directory_field_names() {
        let patch = UserPatch {
            manager_reference: "https://graph.microsoft.com/v1.0/users/42".into(),
            department: "Platform".into(),
            job_title: "Engineer".into(),
        };
        assert_eq!(
            serde_json::to_value(&patch).expect("json"),
            json!({
                "manager@odata.bind": "https://graph.microsoft.com/v1.0/users/42",
                "department": "Platform",
                "jobTitle": "Engineer"
            })
        );
    }

    #[test]
    fn deny_list_drops_matches_case_insensitively_and_tolerates_absence() {
        let deny = DenyList::new(["User1@Example.com", "ghost@example.com"]);
        let items = vec!["user1@example.com", "keep@example.com"];
        let kept = deny.remove_from(items, |e| Some(*e), "test");
        assert_eq!(kept, vec!["keep@example.com"]);
    }

    #[test]
    fn deny_list_normalizes_entries_and_empty_list_keeps_everything() {
        let deny = DenyList::new(["A@example.com", " a@example.com ", ""]);
        assert_eq!(deny.len(), 1);

        let empty = DenyList::default();
        assert!(empty.is_empty());
        let kept = empty.remove_from(vec!["a@example.com"], |e| Some(*e), "test");
        assert_eq!(kept, vec!["a@example.com"]);
    }

    #[test]
    fn text_treats_blank_as_missing() {
        assert_eq!(text(&json!("  ")), None);
        assert_eq!(text(&JsonValue::Null), None);
        assert_eq!(text(&json!(" Ops ")), Some("Ops".to_string()));
    }
}
