//! Microsoft Graph implementation of [`DirectoryApi`].

use anyhow::{bail, Context};
use async_trait::async_trait;
use orgsync_storage::{Attempts, BearerToken, HttpFetcher, RawResponse};
use reqwest::Url;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{AdapterError, DirectoryApi, UserPatch, UsersPage};

/// Field projection requested for every roster row.
pub const USER_SELECT: &str = "displayName,givenName,surname,userPrincipalName,jobTitle,department,manager,onPremisesSyncEnabled,accountEnabled";
pub const MANAGER_EXPAND: &str = "manager($select=displayName,userPrincipalName)";

#[derive(Debug, Clone)]
pub struct GraphClient {
    http: HttpFetcher,
    base_url: Url,
}

impl GraphClient {
    /// `base_url` is the versioned API root, e.g. `https://graph.microsoft.com/v1.0`.
    pub fn new(http: HttpFetcher, base_url: &str) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("parsing graph base url {base_url}"))?;
        if base_url.cannot_be_a_base() {
            bail!("graph base url {base_url} cannot carry a path");
        }
        Ok(Self { http, base_url })
    }

    fn users_url(&self, id: Option<&str>) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("users");
            if let Some(id) = id {
                segments.push(id);
            }
        }
        url.to_string()
    }
}

#[async_trait]
impl DirectoryApi for GraphClient {
    async fn users_page(
        &self,
        token: &BearerToken,
        next_link: Option<&str>,
    ) -> Result<UsersPage, AdapterError> {
        let body = match next_link {
            None => {
                self.http
                    .get_json(
                        &self.users_url(None),
                        token.secret(),
                        &[("$select", USER_SELECT), ("$expand", MANAGER_EXPAND)],
                        Attempts::Backoff,
                    )
                    .await?
            }
            Some(link) => {
                debug!(link, "following roster continuation link");
                self.http
                    .get_json(link, token.secret(), &[], Attempts::Backoff)
                    .await?
            }
        };
        UsersPage::from_json(body)
    }

    async fn get_user(&self, token: &BearerToken, id: &str) -> Result<JsonValue, AdapterError> {
        let body = self
            .http
            .get_json(&self.users_url(Some(id)), token.secret(), &[], Attempts::Once)
            .await?;
        Ok(body)
    }

    async fn patch_user(
        &self,
        token: &BearerToken,
        id: &str,
        patch: &UserPatch,
    ) -> Result<RawResponse, AdapterError> {
        let resp = self
            .http
            .patch_json(&self.users_url(Some(id)), token.secret(), patch)
            .await?;
        Ok(resp)
    }

    fn manager_reference(&self, directory_id: &str) -> String {
        self.users_url(Some(directory_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgsync_storage::HttpClientConfig;

    fn client(base: &str) -> GraphClient {
        GraphClient::new(HttpFetcher::new(HttpClientConfig::default()).expect("http"), base)
            .expect("client")
    }

    #[test]
    fn user_urls_are_built_under_the_versioned_root() {
        let graph = client("https://graph.microsoft.com/v1.0");
        assert_eq!(graph.users_url(None), "https://graph.microsoft.com/v1.0/users");
        assert_eq!(
            graph.manager_reference("5f1c"),
            "https://graph.microsoft.com/v1.0/users/5f1c"
        );

        let trailing = client("https://graph.microsoft.com/v1.0/");
        assert_eq!(
            trailing.users_url(Some("a@example.com")),
            "https://graph.microsoft.com/v1.0/users/a@example.com"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("http");
        assert!(GraphClient::new(http.clone(), "not a url").is_err());
        assert!(GraphClient::new(http, "mailto:ops@example.com").is_err());
    }
}
