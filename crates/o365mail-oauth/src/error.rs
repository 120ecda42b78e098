//! Error types for `OAuth2` operations.

use std::io;

/// Result type alias for `OAuth2` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `OAuth2` error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `OAuth2` error from server.
    #[error("OAuth2 error: {error} - {description}")]
    OAuth {
        /// Error code (e.g., `invalid_grant`).
        error: String,
        /// Human-readable description.
        description: String,
    },

    /// The user has not completed the device sign-in yet (RFC 8628 `authorization_pending`).
    #[error("User has not yet authorized")]
    AuthorizationPending,

    /// The client polls too fast (RFC 8628 `slow_down`).
    #[error("Polling too frequently, slow down")]
    SlowDown,

    /// The device code expired before the user completed sign-in.
    #[error("Device code expired")]
    ExpiredToken,

    /// No refresh token available.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The account is not present in the token cache.
    #[error("Account {0} is not in the token cache")]
    AccountNotCached(String),

    /// Invalid token response.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// User denied authorization.
    #[error("User denied authorization")]
    AccessDenied,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// URL parsing error.
    #[error("URL error: {0}")]
    UrlError(#[from] url::ParseError),

    /// The cache persistence hook failed.
    #[error("{context}: {source}")]
    Persistence {
        /// What the hook was doing.
        context: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Creates an OAuth error from error code and description.
    #[must_use]
    pub fn oauth_error(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }

    /// Creates a persistence error with context.
    #[must_use]
    pub fn persistence(context: impl Into<String>, source: io::Error) -> Self {
        Self::Persistence {
            context: context.into(),
            source,
        }
    }

    /// Returns true if the server rejected a refresh token as invalid, expired or revoked.
    #[must_use]
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, Self::OAuth { error, .. } if error == "invalid_grant")
    }

    /// Returns true if only a new interactive sign-in can get past this error.
    ///
    /// Network failures, server errors and unreadable responses are not in
    /// this set; the same request may succeed later.
    #[must_use]
    pub fn requires_sign_in(&self) -> bool {
        match self {
            Self::NoRefreshToken
            | Self::AccountNotCached(_)
            | Self::AccessDenied
            | Self::ExpiredToken => true,
            Self::OAuth { error, .. } => matches!(
                error.as_str(),
                "invalid_grant" | "interaction_required" | "login_required" | "consent_required"
            ),
            _ => false,
        }
    }

    /// Returns true if the identity provider rejected the client registration
    /// or the requested scopes rather than the user.
    #[must_use]
    pub fn is_client_misconfigured(&self) -> bool {
        match self {
            Self::InvalidConfig(_) | Self::UrlError(_) => true,
            Self::OAuth { error, .. } => matches!(
                error.as_str(),
                "invalid_client" | "unauthorized_client" | "invalid_scope"
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_grant_detection() {
        let err = Error::oauth_error("invalid_grant", "AADSTS700082: refresh token expired");
        assert!(err.is_invalid_grant());
        assert!(!Error::AccessDenied.is_invalid_grant());
        assert!(!Error::oauth_error("invalid_client", "").is_invalid_grant());
    }

    #[test]
    fn test_sign_in_classification() {
        assert!(Error::oauth_error("invalid_grant", "AADSTS70043").requires_sign_in());
        assert!(Error::oauth_error("interaction_required", "").requires_sign_in());
        assert!(Error::NoRefreshToken.requires_sign_in());
        assert!(!Error::InvalidResponse("HTTP 503 Service Unavailable: ".into()).requires_sign_in());
        assert!(!Error::oauth_error("temporarily_unavailable", "").requires_sign_in());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::TimedOut)).requires_sign_in());

        assert!(Error::oauth_error("invalid_client", "AADSTS7000215").is_client_misconfigured());
        assert!(!Error::oauth_error("invalid_grant", "").is_client_misconfigured());
    }

    #[test]
    fn test_persistence_message_keeps_context() {
        let err = Error::persistence(
            "failed to write token file",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "failed to write token file: denied");
    }
}
