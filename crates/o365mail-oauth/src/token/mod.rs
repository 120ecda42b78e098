//! `OAuth2` token responses and id token claims.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Seconds before nominal expiry at which a token is treated as expired.
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// Token response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    /// Access token.
    pub access_token: String,
    /// Token type.
    pub token_type: String,
    /// Expires in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u32>,
    /// Refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// `OpenID` Connect id token (present when `openid` was requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Decodes the claims of the id token, if one was returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the id token is malformed.
    pub fn id_token_claims(&self) -> Result<Option<IdTokenClaims>> {
        self.id_token
            .as_deref()
            .map(IdTokenClaims::decode)
            .transpose()
    }

    /// Granted scopes as a list.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().map(ToString::to_string).collect())
            .unwrap_or_default()
    }
}

/// Identity claims read from an id token.
///
/// The signature is not verified; the token arrives over TLS straight from
/// the token endpoint and is only used to name the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IdTokenClaims {
    /// Sign-in name of the user, usually the mailbox address.
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// Object id of the user in the directory.
    #[serde(default)]
    pub oid: Option<String>,
    /// Tenant id.
    #[serde(default)]
    pub tid: Option<String>,
    /// Subject.
    #[serde(default)]
    pub sub: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

impl IdTokenClaims {
    /// Decodes the payload segment of a compact JWT.
    ///
    /// # Errors
    ///
    /// Returns an error if the token does not have three segments or the
    /// payload is not base64url-encoded JSON.
    pub fn decode(id_token: &str) -> Result<Self> {
        let mut segments = id_token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_)) => payload,
            _ => return Err(Error::InvalidResponse("id_token is not a JWT".into())),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| Error::InvalidResponse(format!("id_token payload: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Stable identifier of the account across tenants (`<oid>.<tid>`).
    #[must_use]
    pub fn home_account_id(&self) -> Option<String> {
        match (&self.oid, &self.tid) {
            (Some(oid), Some(tid)) => Some(format!("{oid}.{tid}")),
            _ => self.sub.clone(),
        }
    }
}

/// Error response from `OAuth2` server.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    /// Error code.
    pub error: String,
    /// Error description.
    #[serde(default)]
    pub error_description: String,
}

impl ErrorResponse {
    /// Converts to an Error, mapping the device-flow codes of RFC 8628.
    #[must_use]
    pub fn into_error(self) -> Error {
        match self.error.as_str() {
            "authorization_pending" => Error::AuthorizationPending,
            "slow_down" => Error::SlowDown,
            "access_denied" | "authorization_declined" => Error::AccessDenied,
            "expired_token" | "bad_verification_code" => Error::ExpiredToken,
            _ => Error::oauth_error(self.error, self.error_description),
        }
    }
}
