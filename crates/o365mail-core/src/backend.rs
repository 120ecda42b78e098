//! Credentials handed to the mail backends.
//!
//! Two backends consume a bearer token: the protocol path (IMAP and SMTP),
//! which authenticates with the XOAUTH2 SASL mechanism, and the REST path,
//! which sends the token in an `Authorization` header. The backends
//! themselves live outside this crate; they see only [`BearerCredentials`]
//! and, for SASL, the [`SaslAuthenticate`] seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use o365mail_oauth::provider::{GRAPH_MAIL_SCOPES, OUTLOOK_PROTOCOL_SCOPES};
use o365mail_oauth::sasl::{SaslMechanism, XOAuth2, xoauth2_response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Which backend mail traffic goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// IMAP and SMTP with XOAUTH2.
    Protocol,
    /// JSON/HTTP mail API with a bearer header.
    #[default]
    Rest,
}

impl BackendKind {
    /// Name used in the configuration file.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Protocol => "protocol",
            Self::Rest => "rest",
        }
    }

    /// Resource scopes a token for this backend must carry.
    #[must_use]
    pub fn scopes(self) -> Vec<String> {
        let scopes: &[&str] = match self {
            Self::Protocol => &OUTLOOK_PROTOCOL_SCOPES,
            Self::Rest => &GRAPH_MAIL_SCOPES,
        };
        scopes.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "protocol" | "imap" => Ok(Self::Protocol),
            "rest" | "graph" => Ok(Self::Rest),
            other => Err(format!("unknown backend '{other}' (expected protocol or rest)")),
        }
    }
}

/// Host and port of one mail server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Servers of the protocol backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoints {
    /// IMAP server (implicit TLS).
    pub imap: Endpoint,
    /// SMTP submission server (STARTTLS).
    pub smtp: Endpoint,
}

impl Default for ServerEndpoints {
    fn default() -> Self {
        Self {
            imap: Endpoint {
                host: "outlook.office365.com".into(),
                port: 993,
            },
            smtp: Endpoint {
                host: "smtp.office365.com".into(),
                port: 587,
            },
        }
    }
}

/// A bearer token bound to the mailbox it was issued for.
#[derive(Clone)]
pub struct BearerCredentials {
    account: String,
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl fmt::Debug for BearerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredentials")
            .field("account", &self.account)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl BearerCredentials {
    /// Creates credentials for `account`.
    #[must_use]
    pub fn new(
        account: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account: account.into(),
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Mailbox the token was issued for.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Bearer string.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Absolute expiry of the token.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// XOAUTH2 mechanism for the protocol path.
    #[must_use]
    pub fn mechanism(&self) -> XOAuth2 {
        XOAuth2::new(&self.account, &self.access_token)
    }

    /// Raw XOAUTH2 initial response.
    #[must_use]
    pub fn sasl_payload(&self) -> Vec<u8> {
        self.mechanism().initial_response()
    }

    /// Base64 XOAUTH2 initial response, for `AUTHENTICATE XOAUTH2 <...>`.
    #[must_use]
    pub fn sasl_line(&self) -> String {
        xoauth2_response(&self.account, &self.access_token)
    }

    /// `Authorization` header value for the REST path.
    #[must_use]
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// A protocol session that can run a client-first SASL exchange.
///
/// Implemented by the IMAP and SMTP clients.
#[async_trait]
pub trait SaslAuthenticate: Send {
    /// Error the session reports when the server rejects the exchange.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends `AUTHENTICATE <mechanism>` (or `AUTH`) with the raw initial response.
    async fn authenticate(
        &mut self,
        mechanism: &str,
        initial_response: &[u8],
    ) -> Result<(), Self::Error>;
}

/// Authenticates `session` with XOAUTH2.
///
/// # Errors
///
/// Returns the session's error if the server rejects the token.
pub async fn authenticate_protocol<S: SaslAuthenticate>(
    session: &mut S,
    credentials: &BearerCredentials,
) -> Result<(), S::Error> {
    let mechanism = credentials.mechanism();
    debug!(account = credentials.account(), mechanism = mechanism.name(), "Authenticating");
    session
        .authenticate(mechanism.name(), &mechanism.initial_response())
        .await
}
