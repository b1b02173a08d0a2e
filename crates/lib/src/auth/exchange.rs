//! On-behalf-of exchange against an OAuth 2.0 v2 token endpoint.

use super::AccessToken;
use crate::config::IdentitySettings;
use async_trait::async_trait;
use serde::Deserialize;

/// Grant type for the on-behalf-of flow.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("token endpoint request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("identity provider rejected the exchange ({status}): {category}")]
    Provider { status: u16, category: String },
    #[error("token endpoint response had no access token")]
    MissingToken,
}

impl ExchangeError {
    /// Short category suitable for logs: the provider's `error` code, or a local label.
    pub fn category(&self) -> &str {
        match self {
            Self::Request(e) if e.is_timeout() => "timeout",
            Self::Request(_) => "transport",
            Self::Provider { category, .. } => category,
            Self::MissingToken => "malformed_response",
        }
    }
}

/// Exchanges an inbound user token for a token scoped to the downstream agent service.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, inbound: &str) -> Result<AccessToken, ExchangeError>;
}

/// Confidential client performing the exchange with a client secret.
#[derive(Clone)]
pub struct OboTokenExchanger {
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    scope: String,
    timeout: std::time::Duration,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

impl OboTokenExchanger {
    pub fn new(settings: &IdentitySettings, client: reqwest::Client) -> Self {
        Self {
            token_endpoint: settings.token_endpoint(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            scope: settings.scope.clone(),
            timeout: settings.timeout,
            client,
        }
    }

    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    async fn request_token(&self, inbound: &str) -> Result<AccessToken, ExchangeError> {
        let res = self
            .client
            .post(&self.token_endpoint)
            .timeout(self.timeout)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("assertion", inbound),
                ("scope", self.scope.as_str()),
                ("requested_token_use", "on_behalf_of"),
            ])
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let category = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|e| e.error)
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| format!("http_{}", status.as_u16()));
            return Err(ExchangeError::Provider {
                status: status.as_u16(),
                category,
            });
        }
        let data: TokenResponse = res.json().await?;
        if let Some(secs) = data.expires_in {
            log::debug!("exchanged token expires in {}s", secs);
        }
        data.access_token
            .filter(|t| !t.is_empty())
            .map(AccessToken::new)
            .ok_or(ExchangeError::MissingToken)
    }
}

#[async_trait]
impl TokenExchanger for OboTokenExchanger {
    async fn exchange(&self, inbound: &str) -> Result<AccessToken, ExchangeError> {
        match self.request_token(inbound).await {
            Ok(token) => {
                log::info!("token exchange succeeded");
                Ok(token)
            }
            Err(e) => {
                log::warn!("token exchange failed: {}", e.category());
                Err(e)
            }
        }
    }
}
