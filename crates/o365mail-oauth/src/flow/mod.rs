//! `OAuth2` network flows against the identity provider.

mod device;

pub use device::DeviceAuthorization;

use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::token::{ErrorResponse, TokenResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Timeout applied to every request made to the identity provider.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The network calls the token cache needs from an identity provider.
///
/// [`OAuthClient`] implements this over HTTP; tests substitute in-memory fakes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Requests a device code and user code (RFC 8628 section 3.1).
    async fn request_device_authorization(&self, scopes: &[String])
    -> Result<DeviceAuthorization>;

    /// Polls the token endpoint once for a device code.
    ///
    /// Returns [`Error::AuthorizationPending`] or [`Error::SlowDown`] while the
    /// user has not finished, [`Error::AccessDenied`] or [`Error::ExpiredToken`]
    /// when the flow is over.
    async fn poll_device_token(&self, device_code: &str) -> Result<TokenResponse>;

    /// Redeems a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str, scopes: &[String]) -> Result<TokenResponse>;
}

/// Common `OAuth2` client configuration.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Client ID from provider.
    pub client_id: String,
    /// Provider configuration.
    pub provider: Provider,
    /// HTTP client.
    http_client: Client,
}

impl OAuthClient {
    /// Creates a new OAuth client.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        let http_client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client_id: client_id.into(),
            provider,
            http_client,
        }
    }

    /// Posts a form to `url` and decodes a token response or an `OAuth2` error.
    async fn post_token_form(
        &self,
        url: url::Url,
        params: &HashMap<&str, &str>,
    ) -> Result<TokenResponse> {
        let response = self.http_client.post(url).form(params).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            return Err(match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(error) => error.into_error(),
                Err(_) => Error::InvalidResponse(format!("HTTP {status}: {body}")),
            });
        }

        response.json().await.map_err(Into::into)
    }
}

#[async_trait]
impl IdentityProvider for OAuthClient {
    async fn request_device_authorization(
        &self,
        scopes: &[String],
    ) -> Result<DeviceAuthorization> {
        self.device_authorization(scopes).await
    }

    async fn poll_device_token(&self, device_code: &str) -> Result<TokenResponse> {
        let mut params = HashMap::new();
        params.insert("grant_type", "urn:ietf:params:oauth:grant-type:device_code");
        params.insert("device_code", device_code);
        params.insert("client_id", &self.client_id);

        self.post_token_form(self.provider.token_url.clone(), &params)
            .await
    }

    async fn refresh(&self, refresh_token: &str, scopes: &[String]) -> Result<TokenResponse> {
        let scope_str = scopes.join(" ");

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("client_id", &self.client_id);
        if !scope_str.is_empty() {
            params.insert("scope", &scope_str);
        }

        debug!(provider = %self.provider.name, "Redeeming refresh token");
        self.post_token_form(self.provider.token_url.clone(), &params)
            .await
    }
}
