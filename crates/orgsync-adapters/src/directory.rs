//! Directory roster reader: paging, projection and actionable-subset filtering.

use orgsync_core::DirectoryRecord;
use orgsync_storage::{BearerToken, TokenProvider};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{flag, require, text, AdapterError, DenyList, DirectoryApi};

#[derive(Debug, Clone)]
pub struct DirectoryFilters {
    /// Bare domain such as `example.com`; only addresses under it are kept.
    pub org_domain: String,
    pub deny_list: DenyList,
}

impl DirectoryFilters {
    fn in_org_domain(&self, email: &str) -> bool {
        let domain = self.org_domain.trim().trim_start_matches('@');
        email
            .to_ascii_lowercase()
            .ends_with(&format!("@{}", domain.to_ascii_lowercase()))
    }

    /// Reduce a projected roster to the enabled, fully described accounts of
    /// the organization, with canonical lower-case addresses.
    pub fn apply(&self, records: Vec<DirectoryRecord>) -> Vec<DirectoryRecord> {
        let total = records.len();
        let filtered: Vec<DirectoryRecord> = records
            .into_iter()
            .filter(|r| self.in_org_domain(&r.email))
            .filter(|r| r.first_name.is_some() && r.last_name.is_some() && r.job_title.is_some())
            .filter(|r| r.manager_name.is_some())
            .collect();
        let described = filtered.len();

        let filtered = self
            .deny_list
            .remove_from(filtered, |r| Some(r.email.as_str()), "directory");

        let enabled: Vec<DirectoryRecord> = filtered
            .into_iter()
            .filter(|r| r.is_enabled)
            .map(|mut r| {
                r.email = r.email.to_ascii_lowercase();
                r
            })
            .collect();

        info!(
            total,
            described,
            deny_listed = self.deny_list.len(),
            enabled = enabled.len(),
            "directory roster filtered"
        );
        enabled
    }
}

/// Project one raw roster row. Every selected key must be present; values may be null.
pub fn project_user(raw: &JsonValue) -> Result<DirectoryRecord, AdapterError> {
    const CONTEXT: &str = "directory user";

    let email = text(require(raw, "userPrincipalName", CONTEXT)?)
        .ok_or_else(|| AdapterError::schema("userPrincipalName", "directory user without address"))?;
    let manager = raw.get("manager").unwrap_or(&JsonValue::Null);

    Ok(DirectoryRecord {
        name: text(require(raw, "displayName", CONTEXT)?),
        first_name: text(require(raw, "givenName", CONTEXT)?),
        last_name: text(require(raw, "surname", CONTEXT)?),
        email,
        job_title: text(require(raw, "jobTitle", CONTEXT)?),
        department: text(require(raw, "department", CONTEXT)?),
        manager_name: manager.get("displayName").and_then(text),
        manager_email: manager.get("userPrincipalName").and_then(text),
        is_hybrid: flag(require(raw, "onPremisesSyncEnabled", CONTEXT)?),
        is_enabled: flag(require(raw, "accountEnabled", CONTEXT)?),
    })
}

pub struct DirectoryReader<'a> {
    api: &'a dyn DirectoryApi,
    tokens: &'a dyn TokenProvider,
    filters: &'a DirectoryFilters,
}

impl<'a> DirectoryReader<'a> {
    pub fn new(
        api: &'a dyn DirectoryApi,
        tokens: &'a dyn TokenProvider,
        filters: &'a DirectoryFilters,
    ) -> Self {
        Self {
            api,
            tokens,
            filters,
        }
    }

    pub async fn fetch_roster(&self) -> Result<Vec<DirectoryRecord>, AdapterError> {
        let token = self.tokens.acquire().await?;
        let raw = self.fetch_all_pages(&token).await?;
        let projected = raw
            .iter()
            .map(project_user)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.filters.apply(projected))
    }

    /// Concatenate every roster page, stopping at the first page without a
    /// continuation link.
    pub async fn fetch_all_pages(&self, token: &BearerToken) -> Result<Vec<JsonValue>, AdapterError> {
        let mut page = self.api.users_page(token, None).await?;
        let mut users = std::mem::take(&mut page.value);
        let mut pages = 1usize;

        while let Some(next) = page.next_link.take() {
            page = self.api.users_page(token, Some(&next)).await?;
            users.append(&mut page.value);
            pages += 1;
            debug!(pages, users = users.len(), "roster page appended");
        }

        info!(pages, users = users.len(), "directory roster fetched");
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orgsync_storage::{AuthError, RawResponse, TransportError};
    use serde_json::json;
    use std::sync::Mutex;

    use crate::{UserPatch, UsersPage};

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn acquire(&self) -> Result<BearerToken, AuthError> {
            Ok(BearerToken::new("t"))
        }
    }

    struct FailingToken;

    #[async_trait]
    impl TokenProvider for FailingToken {
        async fn acquire(&self) -> Result<BearerToken, AuthError> {
            Err(AuthError::MissingToken("https://login.example/token".into()))
        }
    }

    /// Serves pre-built pages; page `n` links to `page-{n+1}` unless it is last.
    struct PagedRoster {
        pages: Vec<Vec<JsonValue>>,
        requested: Mutex<Vec<Option<String>>>,
    }

    impl PagedRoster {
        fn new(pages: Vec<Vec<JsonValue>>) -> Self {
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DirectoryApi for PagedRoster {
        async fn users_page(
            &self,
            _token: &BearerToken,
            next_link: Option<&str>,
        ) -> Result<UsersPage, AdapterError> {
            self.requested
                .lock()
                .unwrap()
                .push(next_link.map(str::to_string));
            let index = match next_link {
                None => 0,
                Some(link) => link.trim_start_matches("page-").parse::<usize>().unwrap(),
            };
            let next_link = (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1));
            Ok(UsersPage {
                value: self.pages[index].clone(),
                next_link,
            })
        }

        async fn get_user(&self, _token: &BearerToken, _id: &str) -> Result<JsonValue, AdapterError> {
            Err(TransportError::HttpStatus {
                status: 404,
                url: "unused".into(),
                body: String::new(),
            }
            .into())
        }

        async fn patch_user(
            &self,
            _token: &BearerToken,
            _id: &str,
            _patch: &UserPatch,
        ) -> Result<RawResponse, AdapterError> {
            unreachable!("reader never writes")
        }

        fn manager_reference(&self, directory_id: &str) -> String {
            directory_id.to_string()
        }
    }

    fn user(upn: &str) -> JsonValue {
        json!({
            "displayName": "Ada Lovelace",
            "givenName": "Ada",
            "surname": "Lovelace",
            "userPrincipalName": upn,
            "jobTitle": "Engineer",
            "department": "Platform",
            "manager": { "displayName": "Grace Hopper", "userPrincipalName": "grace@example.com" },
            "onPremisesSyncEnabled": null,
            "accountEnabled": true
        })
    }

    fn filters() -> DirectoryFilters {
        DirectoryFilters {
            org_domain: "example.com".into(),
            deny_list: DenyList::new(["user1@example.com"]),
        }
    }

    #[tokio::test]
    async fn pages_are_concatenated_until_the_link_disappears() {
        let api = PagedRoster::new(vec![
            vec![user("a@example.com"), user("b@example.com")],
            vec![user("c@example.com")],
            vec![user("d@example.com"), user("e@example.com"), user("f@example.com")],
        ]);
        let filters = filters();
        let reader = DirectoryReader::new(&api, &StaticToken, &filters);

        let users = reader
            .fetch_all_pages(&BearerToken::new("t"))
            .await
            .expect("pages");
        assert_eq!(users.len(), 6);
        assert_eq!(
            *api.requested.lock().unwrap(),
            vec![None, Some("page-1".to_string()), Some("page-2".to_string())]
        );
    }

    #[tokio::test]
    async fn token_failure_aborts_the_roster_fetch() {
        let api = PagedRoster::new(vec![vec![user("a@example.com")]]);
        let filters = filters();
        let reader = DirectoryReader::new(&api, &FailingToken, &filters);

        let err = reader.fetch_roster().await.expect_err("auth");
        assert!(matches!(err, AdapterError::Auth(_)));
        assert!(api.requested.lock().unwrap().is_empty());
    }

    #[test]
    fn flags_come_only_from_their_source_booleans() {
        let mut raw = user("a@example.com");
        raw["onPremisesSyncEnabled"] = json!(true);
        raw["accountEnabled"] = json!(false);
        let record = project_user(&raw).expect("record");
        assert!(record.is_hybrid);
        assert!(!record.is_enabled);

        raw["onPremisesSyncEnabled"] = JsonValue::Null;
        raw["accountEnabled"] = JsonValue::Null;
        let record = project_user(&raw).expect("record");
        assert!(!record.is_hybrid);
        assert!(!record.is_enabled);
    }

    #[test]
    fn missing_selected_key_is_a_schema_error() {
        let mut raw = user("a@example.com");
        raw.as_object_mut().unwrap().remove("jobTitle");
        let err = project_user(&raw).expect_err("schema");
        assert!(matches!(err, AdapterError::Schema { ref field, .. } if field == "jobTitle"));
    }

    #[test]
    fn incomplete_records_are_dropped_even_when_flags_are_set() {
        let mut no_first = user("first@example.com");
        no_first["givenName"] = JsonValue::Null;
        let mut no_last = user("last@example.com");
        no_last["surname"] = JsonValue::Null;
        let mut no_title = user("title@example.com");
        no_title["jobTitle"] = JsonValue::Null;
        let mut no_manager = user("mgr@example.com");
        no_manager.as_object_mut().unwrap().remove("manager");

        let mut raws = vec![no_first, no_last, no_title, no_manager, user("Kept@Example.com")];
        for raw in &mut raws {
            raw["onPremisesSyncEnabled"] = json!(true);
            raw["accountEnabled"] = json!(true);
        }
        let records = raws
            .iter()
            .map(project_user)
            .collect::<Result<Vec<_>, _>>()
            .expect("projection");

        let kept = filters().apply(records);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].email, "kept@example.com");
    }

    #[test]
    fn domain_deny_list_and_enabled_filters_apply() {
        let mut disabled = user("off@example.com");
        disabled["accountEnabled"] = json!(false);
        let raws = vec![
            user("guest@partner.org"),
            user("user1@example.com"),
            disabled,
            user("on@example.com"),
        ];
        let records = raws.iter().map(project_user).collect::<Result<Vec<_>, _>>().unwrap();

        let kept = filters().apply(records);
        let emails: Vec<_> = kept.iter().map(|r| r.email.as_str()).collect();
        assert_eq!(emails, vec!["on@example.com"]);
    }
}
