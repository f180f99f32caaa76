//! Refresh-token exchange with the identity provider.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Google's token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Public desktop-client credentials the login tooling authenticates with.
/// These identify the application, not a user; deployments can override
/// them in configuration.
pub const DEFAULT_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
pub const DEFAULT_CLIENT_SECRET: &str = "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";

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The refresh token was revoked; the account cannot recover without a
    /// fresh login.
    #[error("refresh token rejected: {0}")]
    InvalidGrant(String),
    #[error("token refresh failed with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error during token refresh: {0}")]
    Network(#[from] reqwest::Error),
}

/// A fresh access token. `refresh_token` is present only when the provider
/// rotated it.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Client for the refresh-token grant.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl Default for OAuthClient {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_URL, DEFAULT_CLIENT_ID, DEFAULT_CLIENT_SECRET)
    }
}

impl OAuthClient {
    #[must_use]
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Exchange a refresh token for a fresh access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
        let response = reqwest::Client::new()
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                return Err(RefreshError::InvalidGrant(body));
            }
            return Err(RefreshError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        Ok(RefreshedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
            refresh_token: token.refresh_token,
        })
    }
}
