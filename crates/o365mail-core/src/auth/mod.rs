//! Token lifecycle: persistence, device-code sign-in and multi-account access.
//!
//! [`AuthContext`] wires one [`PublicClient`] to one [`TokenStore`]; the
//! [`TokenManager`] and [`DeviceCodeAuthenticator`] it hands out share that
//! client, so a token obtained by one is visible to the other.

mod device;
mod manager;
mod store;

pub use device::{DeviceCodeAuthenticator, DisplayInfo, PendingAuthentication, PendingState};
pub use manager::{AuthStatus, DetailedAuthStatus, TokenManager};
pub use store::{TOKEN_FILE_NAME, TokenStore};

use crate::backend::BearerCredentials;
use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use o365mail_oauth::{
    Account, AuthenticationResult, IdentityProvider, OAuthClient, Provider, PublicClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// A bearer token for one account.
#[derive(Clone)]
pub struct AccessToken {
    /// Account the token was issued to.
    pub account: String,
    /// Bearer string.
    pub secret: String,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// Time left until expiry, zero if already expired.
    #[must_use]
    pub fn remaining(&self) -> chrono::Duration {
        (self.expires_at - Utc::now()).max(chrono::Duration::zero())
    }

    /// Credentials to hand to a mail backend.
    #[must_use]
    pub fn credentials(&self) -> BearerCredentials {
        BearerCredentials::new(&self.account, &self.secret, self.expires_at)
    }
}

impl From<&AuthenticationResult> for AccessToken {
    fn from(result: &AuthenticationResult) -> Self {
        Self {
            account: result.account.preferred_username.clone(),
            secret: result.access_token.clone(),
            expires_at: result.expires_on,
        }
    }
}

/// Outcome of a completed device-code sign-in.
#[derive(Debug, Clone)]
pub struct AuthResult {
    /// Account that signed in, as recorded in the token cache.
    pub account: Account,
    /// Token issued at sign-in.
    pub token: AccessToken,
}

impl AuthResult {
    /// Sign-in name of the account.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.account.preferred_username
    }
}

impl From<AuthenticationResult> for AuthResult {
    fn from(result: AuthenticationResult) -> Self {
        Self {
            token: AccessToken::from(&result),
            account: result.account,
        }
    }
}

/// A token client bound to its file store.
#[derive(Debug, Clone)]
pub struct AuthContext {
    client: PublicClient,
    store: Arc<TokenStore>,
}

impl AuthContext {
    /// Builds the Microsoft identity platform client described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the client id or tenant is unusable, or a
    /// persistence error if the token file is unreadable.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(Error::Config("client_id is empty".into()));
        }
        let provider = Provider::microsoft_tenant(&config.tenant)
            .and_then(|provider| provider.validate().map(|()| provider))
            .map_err(|e| Error::Config(e.to_string()))?;
        debug!(tenant = %config.tenant, client_id = %config.client_id, "Using Microsoft identity platform");

        let environment = provider.environment();
        let scopes = config.backend.scopes();
        let idp = Arc::new(OAuthClient::new(&config.client_id, provider));
        Self::with_identity_provider(idp, environment, scopes, config.cache_dir.clone())
    }

    /// Builds a context over any identity provider, storing tokens in `cache_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token file exists but cannot be read.
    pub fn with_identity_provider(
        idp: Arc<dyn IdentityProvider>,
        environment: impl Into<String>,
        scopes: Vec<String>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let store = Arc::new(TokenStore::open(cache_dir)?);
        let client = PublicClient::with_cache(idp, environment, scopes, store.clone());
        Ok(Self { client, store })
    }

    /// Token manager over this context.
    #[must_use]
    pub fn manager(&self) -> TokenManager {
        TokenManager::new(self.client.clone(), self.store.clone())
    }

    /// Device-code authenticator over this context.
    #[must_use]
    pub fn authenticator(&self) -> DeviceCodeAuthenticator {
        DeviceCodeAuthenticator::new(self.client.clone(), self.store.path())
    }

    /// The token store.
    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    //! In-memory identity provider for unit tests.

    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use o365mail_oauth::token::TokenResponse;
    use o365mail_oauth::{DeviceAuthorization, Error, IdentityProvider, Result};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    pub fn response(user: &str, token: &str, expires_in: u32) -> TokenResponse {
        let claims = format!(r#"{{"preferred_username":"{user}","oid":"{user}","tid":"t"}}"#);
        TokenResponse {
            access_token: token.into(),
            token_type: "Bearer".into(),
            expires_in: Some(expires_in),
            refresh_token: Some(format!("refresh-{token}")),
            scope: None,
            id_token: Some(format!("h.{}.s", URL_SAFE_NO_PAD.encode(claims))),
        }
    }

    #[derive(Default)]
    pub struct FakeIdp {
        pub start: Mutex<Option<Error>>,
        pub polls: Mutex<VecDeque<Result<TokenResponse>>>,
        pub refreshes: Mutex<VecDeque<Result<TokenResponse>>>,
        pub device_calls: AtomicUsize,
        pub refresh_calls: AtomicUsize,
        pub refresh_delay: Mutex<Option<Duration>>,
        pub expires_in: u32,
    }

    impl FakeIdp {
        pub fn new(expires_in: u32) -> Self {
            Self {
                expires_in,
                ..Self::default()
            }
        }

        pub fn push_poll(&self, outcome: Result<TokenResponse>) {
            self.polls.lock().unwrap().push_back(outcome);
        }

        pub fn push_refresh(&self, outcome: Result<TokenResponse>) {
            self.refreshes.lock().unwrap().push_back(outcome);
        }

        pub fn delay_refresh(&self, delay: Duration) {
            *self.refresh_delay.lock().unwrap() = Some(delay);
        }

        pub fn refresh_calls(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl IdentityProvider for FakeIdp {
        async fn request_device_authorization(
            &self,
            _scopes: &[String],
        ) -> Result<DeviceAuthorization> {
            self.device_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.start.lock().unwrap().take() {
                return Err(err);
            }
            Ok(DeviceAuthorization {
                device_code: "device".into(),
                user_code: "ABCD-EFGH".into(),
                verification_uri: String::new(),
                verification_uri_complete: None,
                expires_in: self.expires_in,
                interval: 5,
                message: Some("To sign in, enter ABCD-EFGH".into()),
            })
        }

        async fn poll_device_token(&self, _device_code: &str) -> Result<TokenResponse> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(Error::AuthorizationPending))
        }

        async fn refresh(&self, _refresh_token: &str, _scopes: &[String]) -> Result<TokenResponse> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.refresh_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.refreshes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::oauth_error("invalid_grant", "expired")))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> Config {
        Config {
            cache_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_from_config_rejects_unusable_settings() {
        let dir = tempfile::tempdir().unwrap();

        let mut bad = config(dir.path());
        bad.client_id = "  ".into();
        assert!(matches!(AuthContext::from_config(&bad), Err(Error::Config(_))));

        let mut bad = config(dir.path());
        bad.tenant = "contoso/evil".into();
        assert!(matches!(AuthContext::from_config(&bad), Err(Error::Config(_))));

        let ctx = AuthContext::from_config(&config(dir.path())).unwrap();
        assert_eq!(ctx.store().path(), dir.path().join(TOKEN_FILE_NAME));
    }

    #[test]
    fn test_access_token_debug_redacts_secret() {
        let token = AccessToken {
            account: "x@y.com".into(),
            secret: "abc".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
        };
        assert!(!format!("{token:?}").contains("abc"));
        assert!(token.remaining() > chrono::Duration::zero());
        assert_eq!(token.credentials().authorization_header(), "Bearer abc");
    }
}
