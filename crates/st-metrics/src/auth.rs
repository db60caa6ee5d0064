//! OAuth client-credentials token cache.

use crate::{Credentials, Error, Result, Token, TokenSource};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_TOKEN_URL: &str = "https://auth-global.api.smartthings.com/oauth/token";
pub const DEFAULT_SCOPE: &str = "devices:read";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub token_url: String,
    pub scope: String,
    pub timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            scope: DEFAULT_SCOPE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// Holds the current token and refreshes it once it expires.
///
/// The lock is held across the refresh, so concurrent callers wait for a
/// single exchange instead of racing their own.
pub struct OAuthClient {
    credentials: Credentials,
    config: OAuthConfig,
    client: reqwest::Client,
    token: Mutex<Option<Token>>,
}

impl OAuthClient {
    pub fn new(credentials: Credentials, config: OAuthConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Client)?;
        Ok(Self {
            credentials,
            config,
            client,
            token: Mutex::new(None),
        })
    }

    /// Snapshot of the cached token, if any.
    pub async fn cached_token(&self) -> Option<Token> {
        self.token.lock().await.clone()
    }

    async fn refresh(&self) -> Result<Token> {
        debug!(url = %self.config.token_url, "requesting OAuth token");
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", self.config.scope.as_str()),
        ];
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(Error::TokenRequest)?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(Error::TokenStatus(resp.status().as_u16()));
        }

        let body: TokenResponse = resp.json().await.map_err(Error::TokenDecode)?;
        let expires_at = OffsetDateTime::now_utc()
            .checked_add(time::Duration::seconds(body.expires_in))
            .ok_or(Error::TokenExpiry(body.expires_in))?;
        info!(%expires_at, "OAuth token refreshed");

        Ok(Token {
            access_token: body.access_token,
            token_type: body.token_type,
            expires_in: body.expires_in,
            refresh_token: body.refresh_token,
            scope: body.scope,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenSource for OAuthClient {
    async fn get_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.access_token.clone());
            }
        }

        // On failure the previous token stays in place.
        let token = self.refresh().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use std::sync::Arc;

    fn client_for(server: &Server) -> OAuthClient {
        let config = OAuthConfig {
            token_url: format!("{}/oauth/token", server.url()),
            ..Default::default()
        };
        OAuthClient::new(Credentials::new("my-id", "my-secret"), config).unwrap()
    }

    fn token_body(access_token: &str, expires_in: i64) -> String {
        serde_json::json!({
            "access_token": access_token,
            "token_type": "bearer",
            "expires_in": expires_in,
            "refresh_token": "refresh",
            "scope": "devices:read",
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_sends_client_credentials_grant() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "my-id".into()),
                Matcher::UrlEncoded("client_secret".into(), "my-secret".into()),
                Matcher::UrlEncoded("scope".into(), "devices:read".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(token_body("abc", 3600))
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.get_token().await.unwrap(), "abc");

        let cached = client.cached_token().await.unwrap();
        assert_eq!(cached.token_type, "bearer");
        assert_eq!(cached.refresh_token.as_deref(), Some("refresh"));
        assert!(!cached.is_expired());

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_valid_token_is_reused() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(token_body("abc", 3600))
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.get_token().await.unwrap(), "abc");
        assert_eq!(client.get_token().await.unwrap(), "abc");
        assert_eq!(client.get_token().await.unwrap(), "abc");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let mut server = Server::new_async().await;
        // expires_in of zero makes the token expire as soon as it is stored
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(token_body("short", 0))
            .expect(2)
            .create_async()
            .await;

        let client = client_for(&server);
        client.get_token().await.unwrap();
        client.get_token().await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_token() {
        let mut server = Server::new_async().await;
        let client = client_for(&server);

        let ok = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(token_body("first", 0))
            .create_async()
            .await;
        assert_eq!(client.get_token().await.unwrap(), "first");
        ok.remove_async().await;

        let failing = server
            .mock("POST", "/oauth/token")
            .with_status(500)
            .create_async()
            .await;
        let err = client.get_token().await.unwrap_err();
        assert!(matches!(err, Error::TokenStatus(500)));
        let cached = client.cached_token().await.unwrap();
        assert_eq!(cached.access_token, "first");
        failing.remove_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(token_body("second", 3600))
            .create_async()
            .await;
        assert_eq!(client.get_token().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_malformed_body_is_not_cached() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body("{\"token_type\": \"bearer\"}")
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.get_token().await.unwrap_err();
        assert!(matches!(err, Error::TokenDecode(_)));
        assert!(client.cached_token().await.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_not_cached() {
        let mut server = Server::new_async().await;
        let client = client_for(&server);

        let huge = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(token_body("forever", i64::MAX))
            .create_async()
            .await;
        let err = client.get_token().await.unwrap_err();
        assert!(matches!(err, Error::TokenExpiry(i64::MAX)));
        assert!(client.cached_token().await.is_none());
        huge.remove_async().await;

        server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(token_body("normal", 3600))
            .create_async()
            .await;
        assert_eq!(client.get_token().await.unwrap(), "normal");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_refresh() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(token_body("shared", 3600))
            .expect(1)
            .create_async()
            .await;

        let client = Arc::new(client_for(&server));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.get_token().await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "shared");
        }

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let config = OAuthConfig {
            token_url: "http://127.0.0.1:1/oauth/token".to_string(),
            timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let client = OAuthClient::new(Credentials::new("id", "secret"), config).unwrap();
        let err = client.get_token().await.unwrap_err();
        assert!(matches!(err, Error::TokenRequest(_)));
    }
}
