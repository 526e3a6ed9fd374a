//! Salesforce REST implementation of [`RecordQuery`].

use std::fmt;

use async_trait::async_trait;
use orgsync_storage::{Attempts, AuthError, BearerToken, HttpFetcher};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::{AdapterError, RecordQuery};

#[derive(Clone)]
pub struct SalesforceCredentials {
    pub login_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub security_token: String,
}

impl fmt::Debug for SalesforceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SalesforceCredentials")
            .field("login_url", &self.login_url)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    access_token: Option<String>,
    instance_url: Option<String>,
}

#[derive(Debug)]
struct Session {
    token: BearerToken,
    instance_url: String,
}

#[derive(Debug, Clone)]
pub struct SalesforceClient {
    http: HttpFetcher,
    credentials: SalesforceCredentials,
    api_version: String,
}

impl SalesforceClient {
    pub fn new(http: HttpFetcher, credentials: SalesforceCredentials, api_version: impl Into<String>) -> Self {
        Self {
            http,
            credentials,
            api_version: api_version.into(),
        }
    }

    /// OAuth2 username-password flow; the security token is appended to the password.
    async fn login(&self) -> Result<Session, AuthError> {
        let token_url = format!(
            "{}/services/oauth2/token",
            self.credentials.login_url.trim_end_matches('/')
        );
        let password = format!("{}{}", self.credentials.password, self.credentials.security_token);
        let form = [
            ("grant_type", "password"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("username", self.credentials.username.as_str()),
            ("password", password.as_str()),
        ];
        let resp: SessionResponse = self.http.post_form(&token_url, &form).await?;
        match (resp.access_token, resp.instance_url) {
            (Some(token), Some(instance_url)) if !token.is_empty() => Ok(Session {
                token: BearerToken::new(token),
                instance_url: instance_url.trim_end_matches('/').to_string(),
            }),
            _ => Err(AuthError::MissingToken(token_url)),
        }
    }
}

struct QueryPage {
    records: Vec<JsonValue>,
    done: bool,
    next_records_url: Option<String>,
}

impl QueryPage {
    fn from_json(body: JsonValue) -> Result<Self, AdapterError> {
        let JsonValue::Object(mut map) = body else {
            return Err(AdapterError::schema("records", "query result is not an object"));
        };
        let records = match map.remove("records") {
            Some(JsonValue::Array(rows)) => rows,
            _ => return Err(AdapterError::schema("records", "query result")),
        };
        let done = map.get("done").and_then(JsonValue::as_bool).unwrap_or(true);
        let next_records_url = map
            .remove("nextRecordsUrl")
            .and_then(|v| v.as_str().map(str::to_string));
        Ok(Self {
            records,
            done,
            next_records_url,
        })
    }
}

#[async_trait]
impl RecordQuery for SalesforceClient {
    #[tracing::instrument(skip(self))]
    async fn query_all(&self, soql: &str) -> Result<Vec<JsonValue>, AdapterError> {
        let session = self.login().await?;
        let query_url = format!(
            "{}/services/data/{}/query",
            session.instance_url, self.api_version
        );

        let mut body = self
            .http
            .get_json(&query_url, session.token.secret(), &[("q", soql)], Attempts::Backoff)
            .await?;
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = QueryPage::from_json(body)?;
            pages += 1;
            records.extend(page.records);

            match page.next_records_url {
                Some(next) if !page.done => {
                    debug!(next = %next, "following query continuation");
                    let url = format!("{}{}", session.instance_url, next);
                    body = self
                        .http
                        .get_json(&url, session.token.secret(), &[], Attempts::Backoff)
                        .await?;
                }
                _ => break,
            }
        }

        info!(pages, records = records.len(), "system of record query complete");
        Ok(records)
    }
}
