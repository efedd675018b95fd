use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

use crate::error::{BackendError, ErrorClass};

/// Bearer tokens for the management API.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<String, BackendError>;
}

pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self { Self(token.into()) }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer_token(&self) -> Result<String, BackendError> { Ok(self.0.clone()) }
}

// Refresh this long before the reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// OAuth2 client-credentials grant against the identity platform token endpoint
/// (`{authority}/{tenant}/oauth2/v2.0/token`), cached until shortly before expiry.
pub struct ClientSecretCredential {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: RwLock<Option<CachedToken>>,
}

impl ClientSecretCredential {
    pub fn new(
        client: reqwest::Client,
        authority: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!("{}/{}/oauth2/v2.0/token", authority.trim_end_matches('/'), tenant_id),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            cached: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken, BackendError> {
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BackendError::transient(format!("token request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let class = if status.is_server_error() || status.as_u16() == 429 { ErrorClass::Transient } else { ErrorClass::Other };
            return Err(BackendError::new(class, "TokenAcquisitionFailed".to_string(), format!("HTTP {status}: {body}")));
        }
        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::other("TokenAcquisitionFailed".to_string(), format!("invalid token response: {e}")))?;
        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(REFRESH_MARGIN);
        debug!(target: "role_orchestrator::token", lifetime_secs = lifetime.as_secs(), "acquired management token");
        Ok(CachedToken { token: parsed.access_token, refresh_at: Instant::now() + lifetime })
    }
}

#[async_trait]
impl TokenSource for ClientSecretCredential {
    async fn bearer_token(&self) -> Result<String, BackendError> {
        let cached = self.cached.read().as_ref().filter(|c| Instant::now() < c.refresh_at).map(|c| c.token.clone());
        if let Some(token) = cached {
            return Ok(token);
        }
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *self.cached.write() = Some(fresh);
        Ok(token)
    }
}
