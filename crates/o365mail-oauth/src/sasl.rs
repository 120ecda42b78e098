//! SASL authentication mechanisms.
//!
//! Implements:
//! - XOAUTH2 (Google/Microsoft proprietary) - the mechanism Exchange Online
//!   accepts for IMAP and SMTP
//! - OAUTHBEARER (RFC 7628) - Standard `OAuth2` authentication

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Name of the XOAUTH2 mechanism as sent in `AUTHENTICATE` / `AUTH`.
pub const XOAUTH2: &str = "XOAUTH2";

/// Name of the OAUTHBEARER mechanism.
pub const OAUTHBEARER: &str = "OAUTHBEARER";

/// A client-first SASL mechanism.
pub trait SaslMechanism {
    /// Mechanism name.
    fn name(&self) -> &'static str;

    /// Raw (not base64-encoded) initial response.
    fn initial_response(&self) -> Vec<u8>;

    /// Answers a server challenge.
    fn next(&self, challenge: &[u8], has_more: bool) -> Vec<u8>;
}

/// XOAUTH2 credentials for one mailbox.
///
/// The initial response is `user=<user>\x01auth=Bearer <token>\x01\x01`.
/// The mechanism has no challenge-response step: a challenge from the server
/// carries an error report, and the client answers it with an empty line so
/// the server can send its final status.
#[derive(Clone)]
pub struct XOAuth2 {
    user: String,
    token: String,
}

impl std::fmt::Debug for XOAuth2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XOAuth2")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl XOAuth2 {
    /// Creates XOAUTH2 credentials.
    #[must_use]
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
        }
    }
}

impl SaslMechanism for XOAuth2 {
    fn name(&self) -> &'static str {
        XOAUTH2
    }

    fn initial_response(&self) -> Vec<u8> {
        xoauth2_payload(&self.user, &self.token)
    }

    fn next(&self, _challenge: &[u8], _has_more: bool) -> Vec<u8> {
        Vec::new()
    }
}

/// Raw XOAUTH2 initial response bytes.
///
/// Format: `user=<user>\x01auth=Bearer <token>\x01\x01`
#[must_use]
pub fn xoauth2_payload(user: &str, token: &str) -> Vec<u8> {
    format!("user={user}\x01auth=Bearer {token}\x01\x01").into_bytes()
}

/// Generates OAUTHBEARER initial response (RFC 7628).
///
/// Format: `n,a=<user>,\x01auth=Bearer <token>\x01\x01`
///
/// # Arguments
///
/// * `user` - User email address
/// * `token` - `OAuth2` access token
///
/// # Example
///
/// ```
/// use o365mail_oauth::sasl::oauthbearer_response;
///
/// let response = oauthbearer_response("user@example.com", "eyJ0eXAi...");
/// // Can be used with IMAP AUTHENTICATE OAUTHBEARER or SMTP AUTH OAUTHBEARER
/// ```
#[must_use]
pub fn oauthbearer_response(user: &str, token: &str) -> String {
    let auth_string = format!("n,a={user},\x01auth=Bearer {token}\x01\x01");
    STANDARD.encode(auth_string.as_bytes())
}

/// Generates the base64 XOAUTH2 initial response for line-based protocols.
///
/// # Example
///
/// ```
/// use o365mail_oauth::sasl::xoauth2_response;
///
/// let response = xoauth2_response("user@example.com", "eyJ0eXAi...");
/// // Send: AUTHENTICATE XOAUTH2 {response}
/// ```
#[must_use]
pub fn xoauth2_response(user: &str, token: &str) -> String {
    STANDARD.encode(xoauth2_payload(user, token))
}

/// Parses an `OAuth2` error challenge from the server.
///
/// `OAuth2` errors are JSON-encoded: `{"status":"401", "schemes":"bearer", "scope":"..."}`
///
/// # Errors
///
/// Returns an error if the response cannot be parsed.
pub fn parse_oauth_error(response: &str) -> Result<OAuthError, serde_json::Error> {
    serde_json::from_str(response)
}

/// `OAuth2` error challenge from server.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct OAuthError {
    /// HTTP status code.
    pub status: String,
    /// Authentication schemes supported.
    #[serde(default)]
    pub schemes: String,
    /// `OAuth2` scope required.
    #[serde(default)]
    pub scope: Option<String>,
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_xoauth2_exact_bytes() {
        let mech = XOAuth2::new("alice@example.com", "tok123");
        assert_eq!(mech.name(), "XOAUTH2");
        assert_eq!(
            mech.initial_response(),
            b"user=alice@example.com\x01auth=Bearer tok123\x01\x01".to_vec()
        );
    }

    #[test]
    fn test_xoauth2_challenge_gets_empty_answer() {
        let mech = XOAuth2::new("alice@example.com", "tok123");
        let challenge = br#"{"status":"401","schemes":"bearer","scope":"https://outlook.office.com/IMAP.AccessAsUser.All"}"#;
        assert!(mech.next(challenge, false).is_empty());
        assert!(mech.next(b"", true).is_empty());
    }

    #[test]
    fn test_debug_redacts_token() {
        let mech = XOAuth2::new("alice@example.com", "secret-token");
        let debug = format!("{mech:?}");
        assert!(debug.contains("alice@example.com"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn test_xoauth2_response_is_base64_of_payload() {
        let response = xoauth2_response("test@test.com", "abc");
        let decoded = STANDARD.decode(&response).unwrap();
        assert_eq!(decoded, b"user=test@test.com\x01auth=Bearer abc\x01\x01");
    }

    #[test]
    fn test_oauthbearer_format() {
        let response = oauthbearer_response("test@test.com", "abc");
        let decoded = STANDARD.decode(&response).unwrap();
        let decoded_str = String::from_utf8(decoded).unwrap();

        // Check exact format per RFC 7628
        assert_eq!(decoded_str, "n,a=test@test.com,\x01auth=Bearer abc\x01\x01");
    }

    #[test]
    fn test_parse_oauth_error() {
        let json = r#"{"status":"401","schemes":"bearer","scope":"https://outlook.office.com/SMTP.Send"}"#;
        let error = parse_oauth_error(json).unwrap();

        assert_eq!(error.status, "401");
        assert_eq!(error.schemes, "bearer");
        assert_eq!(
            error.scope.as_deref(),
            Some("https://outlook.office.com/SMTP.Send")
        );
    }

    proptest! {
        #[test]
        fn xoauth2_payload_splits_into_two_fields(
            user in "[a-z0-9.]{1,20}@[a-z]{1,10}\\.com",
            token in "[A-Za-z0-9._-]{1,64}",
        ) {
            let payload = xoauth2_payload(&user, &token);
            prop_assert!(payload.ends_with(b"\x01\x01"));
            prop_assert!(!payload.ends_with(b"\x01\x01\x01"));

            let text = String::from_utf8(payload).unwrap();
            let fields: Vec<&str> = text.trim_end_matches('\x01').split('\x01').collect();
            let user_field = format!("user={user}");
            let auth_field = format!("auth=Bearer {token}");
            prop_assert_eq!(fields, vec![user_field.as_str(), auth_field.as_str()]);
        }
    }
}
