//! OAuth2 helpers for the drive API
//!
//! Only the two grants drivefs needs are implemented: exchanging a pasted
//! authorization code for tokens, and trading a stored refresh token for a
//! short-lived access token.

use std::time::{Duration, Instant};

use serde::Deserialize;
use url::Url;

use super::provider::RemoteError;

pub const SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const REDIRECT_URL: &str = "urn:ietf:wg:oauth:2.0:oob";
pub const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";

/// Tokens handed out by the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// A bearer token together with the moment it stops being usable
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Instant,
}

impl AccessToken {
    /// Refresh this long before the token actually expires
    const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

    pub fn from_response(response: &TokenResponse) -> Self {
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        Self {
            token: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        }
    }

    pub fn is_fresh(&self) -> bool {
        Instant::now() + Self::EXPIRY_MARGIN < self.expires_at
    }
}

/// OAuth2 client credentials
#[derive(Debug, Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    /// Token endpoint; the Google endpoint unless overridden
    token_url: Option<Url>,
}

impl OAuthClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: None,
        }
    }

    /// Point the client at a different token endpoint
    pub fn with_token_url(mut self, token_url: Url) -> Self {
        self.token_url = Some(token_url);
        self
    }

    /// URL the user visits to grant offline access
    pub fn authorization_url(&self) -> Result<Url, RemoteError> {
        Url::parse_with_params(
            AUTH_URL,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", REDIRECT_URL),
                ("response_type", "code"),
                ("scope", SCOPE),
                ("access_type", "offline"),
                ("state", "state"),
            ],
        )
        .map_err(RemoteError::from)
    }

    /// Exchange an authorization code for an access and refresh token
    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
    ) -> Result<TokenResponse, RemoteError> {
        self.request_token(
            http,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT_URL),
            ],
        )
        .await
    }

    /// Trade a refresh token for a fresh access token
    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<TokenResponse, RemoteError> {
        self.request_token(
            http,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    async fn request_token(
        &self,
        http: &reqwest::Client,
        grant: &[(&str, &str)],
    ) -> Result<TokenResponse, RemoteError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let token_url = match &self.token_url {
            Some(url) => url.clone(),
            None => Url::parse(TOKEN_URL)?,
        };
        let response = http.post(token_url).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Auth(format!("{}: {}", status, body)));
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_url() {
        let client = OAuthClient::new("my-client", "secret");
        let url = client.authorization_url().unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(params.get("client_id").map(String::as_str), Some("my-client"));
        assert_eq!(params.get("access_type").map(String::as_str), Some("offline"));
        assert_eq!(params.get("scope").map(String::as_str), Some(SCOPE));
        assert_eq!(params.get("redirect_uri").map(String::as_str), Some(REDIRECT_URL));
        assert!(!params.contains_key("client_secret"));
    }

    #[test]
    fn test_access_token_freshness() {
        let fresh = AccessToken::from_response(&TokenResponse {
            access_token: "a".to_string(),
            expires_in: Some(3600),
            refresh_token: None,
        });
        assert!(fresh.is_fresh());

        let nearly_expired = AccessToken::from_response(&TokenResponse {
            access_token: "b".to_string(),
            expires_in: Some(30),
            refresh_token: None,
        });
        assert!(!nearly_expired.is_fresh());
    }
}
