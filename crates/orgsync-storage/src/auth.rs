//! Service token acquisition (OAuth2 client credentials).

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{HttpFetcher, TransportError};

#[derive(Clone)]
pub struct BearerToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl BearerToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: Some(expires_at),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// True when the token expires within `grace` from now. Tokens without a
    /// known expiry never report as expired.
    pub fn is_expired(&self, grace: Duration) -> bool {
        self.expires_at
            .map(|at| Utc::now() + grace >= at)
            .unwrap_or(false)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("token response from {0} carried no access_token")]
    MissingToken(String),
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self) -> Result<BearerToken, AuthError>;
}

#[derive(Clone)]
pub struct ClientCredentials {
    pub authority_host: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("authority_host", &self.authority_host)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}

impl ClientCredentials {
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Acquires application tokens for the directory API.
#[derive(Debug, Clone)]
pub struct ClientCredentialsProvider {
    http: HttpFetcher,
    credentials: ClientCredentials,
}

impl ClientCredentialsProvider {
    pub fn new(http: HttpFetcher, credentials: ClientCredentials) -> Self {
        Self { http, credentials }
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    #[tracing::instrument(skip(self), fields(tenant_id = %self.credentials.tenant_id))]
    async fn acquire(&self) -> Result<BearerToken, AuthError> {
        let token_url = self.credentials.token_url();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", self.credentials.scope.as_str()),
        ];
        let response: TokenResponse = self.http.post_form(&token_url, &form).await?;
        let Some(access_token) = response.access_token.filter(|t| !t.is_empty()) else {
            return Err(AuthError::MissingToken(token_url));
        };

        let token = match response.expires_in {
            Some(secs) => {
                let expires_at = Utc::now() + Duration::seconds(secs);
                debug!("acquired directory token, expires at {}", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
                BearerToken::with_expiry(access_token, expires_at)
            }
            None => BearerToken::new(access_token),
        };
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpClientConfig;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials(host: String) -> ClientCredentials {
        ClientCredentials {
            authority_host: host,
            tenant_id: "tenant-1".into(),
            client_id: "client-1".into(),
            client_secret: "s3cret".into(),
            scope: "https://graph.microsoft.com/.default".into(),
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let token = BearerToken::new("eyJ-very-secret");
        assert!(!format!("{token:?}").contains("eyJ"));
        let creds = credentials("https://login.microsoftonline.com".into());
        assert!(!format!("{creds:?}").contains("s3cret"));
    }

    #[test]
    fn expiry_respects_grace_period() {
        let token = BearerToken::with_expiry("t", Utc::now() + Duration::minutes(10));
        assert!(!token.is_expired(Duration::minutes(5)));
        assert!(token.is_expired(Duration::minutes(15)));
        assert!(!BearerToken::new("t").is_expired(Duration::minutes(60)));
    }

    #[tokio::test]
    async fn client_credentials_grant_yields_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "abc",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClientCredentialsProvider::new(
            HttpFetcher::new(HttpClientConfig::default()).expect("fetcher"),
            credentials(server.uri()),
        );
        let token = provider.acquire().await.expect("token");
        assert_eq!(token.secret(), "abc");
        assert!(token.expires_at().is_some());
    }

    #[tokio::test]
    async fn rejected_credentials_are_auth_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client"
            })))
            .mount(&server)
            .await;

        let provider = ClientCredentialsProvider::new(
            HttpFetcher::new(HttpClientConfig::default()).expect("fetcher"),
            credentials(server.uri()),
        );
        let err = provider.acquire().await.expect_err("401");
        assert!(matches!(err, AuthError::Transport(TransportError::HttpStatus { status: 401, .. })));
    }
}
