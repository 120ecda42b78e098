//! Error types for the core library.

use std::path::PathBuf;
use thiserror::Error;

/// What the user should do about an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Sign in with `auth login`.
    RunLogin,
    /// Start the sign-in again.
    RetryLogin,
    /// Transient; try the same command later.
    RetryLater,
    /// Fix ownership or permissions of the cache directory.
    CheckPermissions,
    /// Discard the unreadable token file and sign in again.
    ResetTokens,
    /// Fix the configuration file or environment.
    CheckConfig,
    /// Nothing to do.
    None,
}

impl Remediation {
    /// One-line hint for the user, if there is one.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::RunLogin => Some("run `o365mail auth login` to sign in"),
            Self::RetryLogin => Some("run `o365mail auth login` again"),
            Self::RetryLater => Some("try again in a moment"),
            Self::CheckPermissions => {
                Some("check that the cache directory is owned by you and writable")
            }
            Self::ResetTokens => Some(
                "run `o365mail auth logout --all` to discard the unreadable token file, then sign in again",
            ),
            Self::CheckConfig => Some("check `o365mail config show` and your O365_* variables"),
            Self::None => None,
        }
    }
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The device flow could not be started.
    #[error("could not start sign-in: {0}")]
    StartAuth(#[source] o365mail_oauth::Error),

    /// The user code expired before sign-in completed.
    #[error("the sign-in code expired before sign-in completed")]
    DeviceCodeExpired,

    /// The user declined the sign-in.
    #[error("sign-in was declined")]
    AccessDenied,

    /// The caller stopped waiting for a pending sign-in.
    #[error("gave up waiting for sign-in")]
    LoginTimedOut,

    /// The identity provider rejected the sign-in while polling.
    #[error("sign-in failed: {0}")]
    LoginFailed(#[source] o365mail_oauth::Error),

    /// The background sign-in task ended without reporting a result.
    #[error("sign-in was aborted")]
    LoginAborted,

    /// No cached credentials for the account.
    #[error("not logged in{}", account_suffix(.0))]
    NotLoggedIn(String),

    /// A cached account could not be refreshed silently.
    #[error("could not refresh the token for {account}: {source}")]
    RefreshFailed {
        /// Account the refresh was for.
        account: String,
        /// Why the identity provider or cache refused.
        #[source]
        source: o365mail_oauth::Error,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The token store could not be read or written.
    #[error("token store {}: {source}", path.display())]
    Persistence {
        /// Token file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// A pending sign-in handle was read after its result was delivered.
    #[error("sign-in result was already taken")]
    HandleClosed,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication library error.
    #[error("OAuth error: {0}")]
    OAuth(#[from] o365mail_oauth::Error),
}

fn account_suffix(account: &str) -> String {
    if account.is_empty() {
        String::new()
    } else {
        format!(" as {account}")
    }
}

impl Error {
    /// What the user should do next.
    ///
    /// A failed refresh sends the user to `auth login` only when the identity
    /// provider has rejected the cached grant; network and server failures
    /// are worth retrying as they are.
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::StartAuth(source) if source.is_client_misconfigured() => {
                Remediation::CheckConfig
            }
            Self::StartAuth(_)
            | Self::DeviceCodeExpired
            | Self::AccessDenied
            | Self::LoginTimedOut
            | Self::LoginFailed(_)
            | Self::LoginAborted => Remediation::RetryLogin,
            Self::NotLoggedIn(_) => Remediation::RunLogin,
            Self::RefreshFailed { source, .. } => {
                if source.requires_sign_in() {
                    Remediation::RunLogin
                } else if source.is_client_misconfigured() {
                    Remediation::CheckConfig
                } else {
                    Remediation::RetryLater
                }
            }
            Self::Cancelled => Remediation::RetryLater,
            Self::Persistence { source, .. } if source.kind() == std::io::ErrorKind::InvalidData => {
                Remediation::ResetTokens
            }
            Self::Persistence { .. } => Remediation::CheckPermissions,
            Self::Config(_) | Self::Toml(_) => Remediation::CheckConfig,
            Self::AccountNotFound(_)
            | Self::HandleClosed
            | Self::Serde(_)
            | Self::Io(_)
            | Self::OAuth(_) => Remediation::None,
        }
    }

    /// Returns true if a pending sign-in ended because the code expired,
    /// the user declined, or the caller stopped waiting.
    #[must_use]
    pub const fn is_pending_expired_or_denied(&self) -> bool {
        matches!(
            self,
            Self::DeviceCodeExpired | Self::AccessDenied | Self::LoginTimedOut
        )
    }

    /// Rewrites a persistence failure reported through the cache hooks so it
    /// names the token file; every other error goes through `otherwise`.
    pub(crate) fn from_oauth(
        err: o365mail_oauth::Error,
        path: &std::path::Path,
        otherwise: impl FnOnce(o365mail_oauth::Error) -> Self,
    ) -> Self {
        match err {
            o365mail_oauth::Error::Persistence { source, .. } => Self::Persistence {
                path: path.to_path_buf(),
                source,
            },
            other => otherwise(other),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io;
    use std::path::Path;

    #[test]
    fn test_remediation_mapping() {
        assert_eq!(
            Error::NotLoggedIn(String::new()).remediation(),
            Remediation::RunLogin
        );
        assert_eq!(
            Error::RefreshFailed {
                account: "x@y.com".into(),
                source: o365mail_oauth::Error::NoRefreshToken,
            }
            .remediation(),
            Remediation::RunLogin
        );
        assert_eq!(
            Error::DeviceCodeExpired.remediation(),
            Remediation::RetryLogin
        );
        assert_eq!(Error::Cancelled.remediation(), Remediation::RetryLater);
        assert_eq!(
            Error::AccountNotFound("x@y.com".into()).remediation(),
            Remediation::None
        );
        assert!(Remediation::None.hint().is_none());
        assert!(Remediation::RunLogin.hint().is_some());
    }

    fn refresh_failed(source: o365mail_oauth::Error) -> Error {
        Error::RefreshFailed {
            account: "x@y.com".into(),
            source,
        }
    }

    #[test]
    fn test_refresh_remediation_follows_cause() {
        assert_eq!(
            refresh_failed(o365mail_oauth::Error::oauth_error("invalid_grant", "AADSTS70043"))
                .remediation(),
            Remediation::RunLogin
        );
        assert_eq!(
            refresh_failed(o365mail_oauth::Error::InvalidResponse(
                "HTTP 503 Service Unavailable: upstream".into()
            ))
            .remediation(),
            Remediation::RetryLater
        );
        assert_eq!(
            refresh_failed(o365mail_oauth::Error::oauth_error("temporarily_unavailable", ""))
                .remediation(),
            Remediation::RetryLater
        );
        assert_eq!(
            refresh_failed(o365mail_oauth::Error::Io(io::Error::from(io::ErrorKind::TimedOut)))
                .remediation(),
            Remediation::RetryLater
        );
        assert_eq!(
            refresh_failed(o365mail_oauth::Error::oauth_error("invalid_client", "")).remediation(),
            Remediation::CheckConfig
        );
    }

    #[test]
    fn test_unreadable_token_file_asks_for_reset() {
        let unreadable = Error::Persistence {
            path: "/tmp/token.json".into(),
            source: io::Error::new(io::ErrorKind::InvalidData, "key must be a string"),
        };
        assert_eq!(unreadable.remediation(), Remediation::ResetTokens);
        assert!(
            unreadable
                .remediation()
                .hint()
                .unwrap()
                .contains("logout --all")
        );

        let denied = Error::Persistence {
            path: "/tmp/token.json".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(denied.remediation(), Remediation::CheckPermissions);
    }

    #[test]
    fn test_pending_classification() {
        assert!(Error::DeviceCodeExpired.is_pending_expired_or_denied());
        assert!(Error::AccessDenied.is_pending_expired_or_denied());
        assert!(Error::LoginTimedOut.is_pending_expired_or_denied());
        assert!(!Error::LoginAborted.is_pending_expired_or_denied());
        assert!(!Error::Cancelled.is_pending_expired_or_denied());
    }

    #[test]
    fn test_not_logged_in_message() {
        assert_eq!(Error::NotLoggedIn(String::new()).to_string(), "not logged in");
        assert_eq!(
            Error::NotLoggedIn("x@y.com".into()).to_string(),
            "not logged in as x@y.com"
        );
    }

    #[test]
    fn test_persistence_names_token_file() {
        let oauth = o365mail_oauth::Error::persistence(
            "failed to write token file",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let err = Error::from_oauth(oauth, Path::new("/tmp/token.json"), Error::OAuth);
        assert!(matches!(err, Error::Persistence { .. }));
        assert_eq!(err.to_string(), "token store /tmp/token.json: denied");

        let err = Error::from_oauth(
            o365mail_oauth::Error::AccessDenied,
            Path::new("/tmp/token.json"),
            Error::LoginFailed,
        );
        assert!(matches!(err, Error::LoginFailed(_)));
    }
}
