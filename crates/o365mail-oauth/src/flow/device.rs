//! Device Authorization Flow implementation (RFC 8628).

use super::OAuthClient;
use crate::error::{Error, Result};
use crate::token::ErrorResponse;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Device authorization response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceAuthorization {
    /// Device code for polling.
    pub device_code: String,
    /// User code to display to the user.
    pub user_code: String,
    /// Verification URI where user should go.
    #[serde(default, alias = "verification_url")]
    pub verification_uri: String,
    /// Complete verification URI (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Expiration time in seconds.
    pub expires_in: u32,
    /// Polling interval in seconds (minimum 5 seconds).
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Instruction text prepared by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

const fn default_interval() -> u32 {
    5
}

impl DeviceAuthorization {
    /// Polling interval as a [`Duration`], never below one second.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval.max(1)))
    }

    /// Lifetime of the device code as a [`Duration`].
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(u64::from(self.expires_in))
    }
}

impl OAuthClient {
    /// Requests device authorization from the server.
    ///
    /// Returns the device code and user code that should be displayed to the user.
    ///
    /// # Arguments
    ///
    /// * `scopes` - Scopes to request (uses provider defaults if empty)
    ///
    /// # Errors
    ///
    /// Returns an error if the provider has no device endpoint or the request fails.
    pub async fn device_authorization(&self, scopes: &[String]) -> Result<DeviceAuthorization> {
        let device_auth_url = self.provider.device_auth_url.as_ref().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "Provider {} does not support device flow",
                self.provider.name
            ))
        })?;

        let scope_str = if scopes.is_empty() {
            self.provider.default_scopes.join(" ")
        } else {
            scopes.join(" ")
        };

        let mut params = HashMap::new();
        params.insert("client_id", self.client_id.as_str());
        if !scope_str.is_empty() {
            params.insert("scope", &scope_str);
        }

        debug!(provider = %self.provider.name, scope = %scope_str, "Requesting device code");
        let response = self
            .http_client
            .post(device_auth_url.clone())
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error: ErrorResponse = response.json().await?;
            return Err(error.into_error());
        }

        response.json().await.map_err(Into::into)
    }
}
