//! Public client application: the entry point applications use to sign
//! accounts in and obtain tokens for them.

use crate::cache::{AccessTokenEntry, Account, CacheAccessor, TokenCache};
use crate::error::{Error, Result};
use crate::flow::IdentityProvider;
use crate::provider::with_reserved_scopes;
use crate::token::TokenResponse;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Lifetime assumed when a token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u32 = 3600;

/// RFC 8628 section 3.5: add five seconds to the interval on `slow_down`.
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Outcome of a successful token acquisition.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    /// Bearer token.
    pub access_token: String,
    /// Absolute expiry of the bearer token.
    pub expires_on: DateTime<Utc>,
    /// Account the token belongs to.
    pub account: Account,
    /// Scopes granted.
    pub scopes: Vec<String>,
}

impl AuthenticationResult {
    fn from_entry(account: Account, entry: &AccessTokenEntry) -> Self {
        Self {
            access_token: entry.secret.clone(),
            expires_on: entry.expires_on,
            account,
            scopes: entry.scopes.clone(),
        }
    }
}

/// What the user needs to see to complete a device sign-in.
#[derive(Debug, Clone)]
pub struct DeviceCodeResult {
    /// Code to type at the verification page.
    pub user_code: String,
    /// Code the client polls with. Not for display.
    pub device_code: String,
    /// Verification page, empty if the server did not send one.
    pub verification_uri: String,
    /// When the user code stops being accepted.
    pub expires_on: DateTime<Utc>,
    /// Polling interval requested by the server.
    pub interval: Duration,
    /// Instruction text from the server.
    pub message: String,
}

/// An in-flight device code sign-in.
///
/// Created by [`PublicClient::acquire_token_by_device_code`]; awaiting
/// [`DeviceCode::authentication_result`] polls until the user finishes, the
/// user declines, or the code expires.
#[derive(Debug)]
pub struct DeviceCode {
    /// Display data for the user.
    pub result: DeviceCodeResult,
    client: PublicClient,
    scopes: Vec<String>,
    deadline: Instant,
}

impl DeviceCode {
    /// Polls the token endpoint until the sign-in completes.
    ///
    /// On success the account is written to the cache and exported before
    /// this returns.
    ///
    /// # Errors
    ///
    /// [`Error::ExpiredToken`] once the code's lifetime has elapsed,
    /// [`Error::AccessDenied`] if the user declined, or whatever error the
    /// identity provider or the cache export produced.
    pub async fn authentication_result(self) -> Result<AuthenticationResult> {
        let mut interval = self.result.interval;

        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return Err(Error::ExpiredToken);
            }
            tokio::time::sleep(interval.min(self.deadline - now)).await;
            if Instant::now() >= self.deadline {
                return Err(Error::ExpiredToken);
            }

            let poll = self
                .client
                .inner
                .idp
                .poll_device_token(&self.result.device_code);
            let Ok(outcome) = tokio::time::timeout_at(self.deadline, poll).await else {
                return Err(Error::ExpiredToken);
            };

            match outcome {
                Ok(response) => {
                    let result = self.client.store_response(&response, None, &self.scopes)?;
                    info!(account = %result.account.preferred_username, "Device code sign-in completed");
                    return Ok(result);
                }
                Err(Error::AuthorizationPending) => {}
                Err(Error::SlowDown) => {
                    interval += SLOW_DOWN_STEP;
                    debug!(?interval, "Identity provider asked to slow down");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Time left before the code expires.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

struct Inner {
    idp: Arc<dyn IdentityProvider>,
    environment: String,
    scopes: Vec<String>,
    cache: Mutex<TokenCache>,
    accessor: Option<Arc<dyn CacheAccessor>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

/// Public (secretless) client over a multi-account token cache.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct PublicClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PublicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicClient")
            .field("environment", &self.inner.environment)
            .field("scopes", &self.inner.scopes)
            .field("persistent", &self.inner.accessor.is_some())
            .finish_non_exhaustive()
    }
}

impl PublicClient {
    /// Creates a client with an in-memory cache only.
    ///
    /// `environment` is recorded on cached accounts (normally the authority
    /// host); `scopes` are the resource scopes tokens are requested for.
    #[must_use]
    pub fn new(
        idp: Arc<dyn IdentityProvider>,
        environment: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self::build(idp, environment.into(), scopes, None)
    }

    /// Creates a client whose cache is persisted through `accessor`.
    #[must_use]
    pub fn with_cache(
        idp: Arc<dyn IdentityProvider>,
        environment: impl Into<String>,
        scopes: Vec<String>,
        accessor: Arc<dyn CacheAccessor>,
    ) -> Self {
        Self::build(idp, environment.into(), scopes, Some(accessor))
    }

    fn build(
        idp: Arc<dyn IdentityProvider>,
        environment: String,
        scopes: Vec<String>,
        accessor: Option<Arc<dyn CacheAccessor>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                idp,
                environment,
                scopes,
                cache: Mutex::new(TokenCache::new()),
                accessor,
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Resource scopes tokens are requested for.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.inner.scopes
    }

    fn lock_cache(&self) -> MutexGuard<'_, TokenCache> {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reloads the cache through the accessor and returns the guard.
    fn load(&self) -> Result<MutexGuard<'_, TokenCache>> {
        let mut cache = self.lock_cache();
        if let Some(accessor) = &self.inner.accessor {
            accessor.replace(&mut *cache)?;
        }
        Ok(cache)
    }

    /// Applies `f` to a freshly loaded cache and exports the result.
    fn mutate<T>(&self, f: impl FnOnce(&mut TokenCache) -> T) -> Result<T> {
        let mut cache = self.load()?;
        let out = f(&mut cache);
        if let Some(accessor) = &self.inner.accessor {
            accessor.export(&*cache)?;
        }
        Ok(out)
    }

    /// Lists every cached account in enumeration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be loaded.
    pub fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.load()?.accounts())
    }

    /// Returns a token for `account` without user interaction.
    ///
    /// A cached token that is still live is returned as is. Otherwise the
    /// refresh token is redeemed once; concurrent callers in this process wait
    /// for that refresh and reuse its result.
    ///
    /// # Errors
    ///
    /// [`Error::AccountNotCached`], [`Error::NoRefreshToken`], or the identity
    /// provider's error (typically `invalid_grant` once the refresh token has
    /// expired or been revoked).
    pub async fn acquire_token_silent(&self, account: &Account) -> Result<AuthenticationResult> {
        if let Some(result) = self.cached_result(account)? {
            return Ok(result);
        }

        let _refreshing = self.inner.refresh_lock.lock().await;
        if let Some(result) = self.cached_result(account)? {
            debug!(account = %account.preferred_username, "Token refreshed by a concurrent caller");
            return Ok(result);
        }

        let refresh_token = {
            let cache = self.lock_cache();
            let entry = cache
                .entry(&account.home_account_id)
                .ok_or_else(|| Error::AccountNotCached(account.preferred_username.clone()))?;
            entry.refresh_token.clone().ok_or(Error::NoRefreshToken)?
        };

        debug!(account = %account.preferred_username, "Refreshing access token");
        let request_scopes = with_reserved_scopes(&self.inner.scopes);
        let response = self
            .inner
            .idp
            .refresh(&refresh_token, &request_scopes)
            .await?;
        let scopes = self.inner.scopes.clone();
        self.store_response(&response, Some(account), &scopes)
    }

    fn cached_result(&self, account: &Account) -> Result<Option<AuthenticationResult>> {
        let cache = self.load()?;
        let entry = cache
            .entry(&account.home_account_id)
            .ok_or_else(|| Error::AccountNotCached(account.preferred_username.clone()))?;

        Ok(entry
            .access_token
            .as_ref()
            .filter(|t| t.is_live_at(Utc::now()) && t.covers(&self.inner.scopes))
            .map(|t| AuthenticationResult::from_entry(entry.account.clone(), t)))
    }

    /// Starts a device code sign-in for `scopes` (client scopes if empty).
    ///
    /// Returns as soon as the identity provider has issued a user code.
    ///
    /// # Errors
    ///
    /// Returns an error if the device authorization request fails.
    pub async fn acquire_token_by_device_code(&self, scopes: &[String]) -> Result<DeviceCode> {
        let scopes = if scopes.is_empty() {
            self.inner.scopes.clone()
        } else {
            scopes.to_vec()
        };

        let auth = self
            .inner
            .idp
            .request_device_authorization(&with_reserved_scopes(&scopes))
            .await?;
        debug!(user_code = %auth.user_code, expires_in = auth.expires_in, "Device code issued");

        let lifetime = auth.lifetime();
        let expires_on = Utc::now()
            + ChronoDuration::from_std(lifetime).unwrap_or_else(|_| ChronoDuration::zero());

        Ok(DeviceCode {
            result: DeviceCodeResult {
                interval: auth.poll_interval(),
                user_code: auth.user_code,
                device_code: auth.device_code,
                verification_uri: auth.verification_uri,
                expires_on,
                message: auth.message.unwrap_or_default(),
            },
            client: self.clone(),
            scopes,
            deadline: Instant::now() + lifetime,
        })
    }

    /// Writes a token response to the cache and exports it.
    fn store_response(
        &self,
        response: &TokenResponse,
        known: Option<&Account>,
        requested_scopes: &[String],
    ) -> Result<AuthenticationResult> {
        let account = match response.id_token_claims()? {
            Some(claims) => match (claims.home_account_id(), claims.preferred_username.clone()) {
                (Some(home_account_id), Some(preferred_username)) => Account {
                    home_account_id,
                    preferred_username,
                    realm: claims.tid.clone().unwrap_or_default(),
                    environment: self.inner.environment.clone(),
                },
                _ => known.cloned().ok_or_else(|| {
                    Error::InvalidResponse("id_token lacks preferred_username".into())
                })?,
            },
            None => known.cloned().ok_or_else(|| {
                Error::InvalidResponse("token response carries no id_token".into())
            })?,
        };

        let granted = response.scopes();
        let lifetime = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let entry = AccessTokenEntry {
            secret: response.access_token.clone(),
            expires_on: Utc::now() + ChronoDuration::seconds(i64::from(lifetime)),
            scopes: if granted.is_empty() {
                requested_scopes.to_vec()
            } else {
                granted
            },
        };

        let result = AuthenticationResult::from_entry(account.clone(), &entry);
        let refresh_token = response.refresh_token.clone();
        self.mutate(move |cache| cache.upsert(account, entry, refresh_token))?;
        Ok(result)
    }

    /// Returns true if a refresh token is cached for `account`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be loaded.
    pub fn has_refresh_token(&self, account: &Account) -> Result<bool> {
        Ok(self
            .load()?
            .entry(&account.home_account_id)
            .is_some_and(|e| e.refresh_token.is_some()))
    }

    /// Removes an account and its tokens from the cache.
    ///
    /// # Errors
    ///
    /// [`Error::AccountNotCached`] if the account is unknown, or an export error.
    pub fn remove_account(&self, account: &Account) -> Result<()> {
        let removed = self.mutate(|cache| cache.remove(&account.home_account_id))?;
        if removed {
            info!(account = %account.preferred_username, "Removed account from token cache");
            Ok(())
        } else {
            Err(Error::AccountNotCached(account.preferred_username.clone()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cache::{CacheMarshaler, CacheUnmarshaler};
    use crate::flow::DeviceAuthorization;
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id_token(user: &str) -> String {
        let payload = format!(r#"{{"preferred_username":"{user}","oid":"{user}-oid","tid":"t"}}"#);
        format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload))
    }

    fn response(user: &str, token: &str, expires_in: u32) -> TokenResponse {
        TokenResponse {
            access_token: token.into(),
            token_type: "Bearer".into(),
            expires_in: Some(expires_in),
            refresh_token: Some(format!("refresh-{token}")),
            scope: None,
            id_token: Some(id_token(user)),
        }
    }

    #[derive(Default)]
    struct FakeIdp {
        polls: Mutex<VecDeque<Result<TokenResponse>>>,
        refreshes: Mutex<VecDeque<Result<TokenResponse>>>,
        poll_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        expires_in: u32,
    }

    impl FakeIdp {
        fn with_polls(polls: Vec<Result<TokenResponse>>, expires_in: u32) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                expires_in,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeIdp {
        async fn request_device_authorization(
            &self,
            _scopes: &[String],
        ) -> Result<DeviceAuthorization> {
            Ok(DeviceAuthorization {
                device_code: "device".into(),
                user_code: "ABCD-EFGH".into(),
                verification_uri: "https://microsoft.com/devicelogin".into(),
                verification_uri_complete: None,
                expires_in: self.expires_in,
                interval: 5,
                message: None,
            })
        }

        async fn poll_device_token(&self, _device_code: &str) -> Result<TokenResponse> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(Error::AuthorizationPending))
        }

        async fn refresh(&self, _refresh_token: &str, _scopes: &[String]) -> Result<TokenResponse> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.refreshes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::oauth_error("invalid_grant", "expired")))
        }
    }

    #[derive(Default)]
    struct MemoryAccessor {
        blob: Mutex<Vec<u8>>,
        exports: AtomicUsize,
    }

    impl CacheAccessor for MemoryAccessor {
        fn replace(&self, cache: &mut dyn CacheUnmarshaler) -> Result<()> {
            let blob = self.blob.lock().unwrap();
            if blob.is_empty() {
                return Ok(());
            }
            cache.unmarshal(&blob)
        }

        fn export(&self, cache: &dyn CacheMarshaler) -> Result<()> {
            *self.blob.lock().unwrap() = cache.marshal()?;
            self.exports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn client(idp: &Arc<FakeIdp>, accessor: &Arc<MemoryAccessor>) -> PublicClient {
        PublicClient::with_cache(
            idp.clone(),
            "login.microsoftonline.com",
            vec!["Mail.Send".into()],
            accessor.clone(),
        )
    }

    async fn sign_in(client: &PublicClient) -> AuthenticationResult {
        client
            .acquire_token_by_device_code(&[])
            .await
            .unwrap()
            .authentication_result()
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_code_success_exports_before_returning() {
        let idp = Arc::new(FakeIdp::with_polls(
            vec![
                Err(Error::AuthorizationPending),
                Ok(response("x@y.com", "abc", 3600)),
            ],
            900,
        ));
        let accessor = Arc::new(MemoryAccessor::default());
        let client = client(&idp, &accessor);

        let result = sign_in(&client).await;
        assert_eq!(result.access_token, "abc");
        assert_eq!(result.account.preferred_username, "x@y.com");
        assert_eq!(accessor.exports.load(Ordering::SeqCst), 1);
        assert!(!accessor.blob.lock().unwrap().is_empty());
        assert_eq!(idp.poll_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_code_expires_instead_of_hanging() {
        let idp = Arc::new(FakeIdp::with_polls(Vec::new(), 30));
        let accessor = Arc::new(MemoryAccessor::default());
        let client = client(&idp, &accessor);

        let code = client.acquire_token_by_device_code(&[]).await.unwrap();
        let err = code.authentication_result().await.unwrap_err();
        assert!(matches!(err, Error::ExpiredToken));
        assert_eq!(accessor.exports.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_code_denied() {
        let idp = Arc::new(FakeIdp::with_polls(vec![Err(Error::AccessDenied)], 900));
        let accessor = Arc::new(MemoryAccessor::default());
        let client = client(&idp, &accessor);

        let code = client.acquire_token_by_device_code(&[]).await.unwrap();
        assert!(matches!(
            code.authentication_result().await,
            Err(Error::AccessDenied)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_down_widens_interval() {
        let idp = Arc::new(FakeIdp::with_polls(
            vec![Err(Error::SlowDown), Ok(response("x@y.com", "abc", 3600))],
            900,
        ));
        let accessor = Arc::new(MemoryAccessor::default());
        let client = client(&idp, &accessor);

        let started = Instant::now();
        sign_in(&client).await;
        // 5s before the first poll, 10s before the second.
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_uses_cached_token_without_network() {
        let idp = Arc::new(FakeIdp::with_polls(
            vec![Ok(response("x@y.com", "abc", 3600))],
            900,
        ));
        let accessor = Arc::new(MemoryAccessor::default());
        let signed_in = sign_in(&client(&idp, &accessor)).await;

        // Fresh client over the same persisted blob.
        let fresh = client(&idp, &accessor);
        let accounts = fresh.accounts().unwrap();
        assert_eq!(accounts, vec![signed_in.account.clone()]);

        let silent = fresh.acquire_token_silent(&accounts[0]).await.unwrap();
        assert_eq!(silent.access_token, "abc");
        assert_eq!(idp.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_token_refreshes_once_for_concurrent_callers() {
        let idp = Arc::new(FakeIdp::with_polls(
            vec![Ok(response("x@y.com", "old", 10))],
            900,
        ));
        idp.refreshes
            .lock()
            .unwrap()
            .push_back(Ok(response("x@y.com", "new", 3600)));
        let accessor = Arc::new(MemoryAccessor::default());
        let client = client(&idp, &accessor);
        let account = sign_in(&client).await.account;

        let (a, b) = tokio::join!(
            client.acquire_token_silent(&account),
            client.acquire_token_silent(&account)
        );
        assert_eq!(a.unwrap().access_token, "new");
        assert_eq!(b.unwrap().access_token, "new");
        assert_eq!(idp.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_surfaces_cause() {
        let idp = Arc::new(FakeIdp::with_polls(
            vec![Ok(response("x@y.com", "old", 10))],
            900,
        ));
        let accessor = Arc::new(MemoryAccessor::default());
        let client = client(&idp, &accessor);
        let account = sign_in(&client).await.account;

        let err = client.acquire_token_silent(&account).await.unwrap_err();
        assert!(err.is_invalid_grant());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_account() {
        let idp = Arc::new(FakeIdp::with_polls(
            vec![Ok(response("x@y.com", "abc", 3600))],
            900,
        ));
        let accessor = Arc::new(MemoryAccessor::default());
        let client = client(&idp, &accessor);
        let account = sign_in(&client).await.account;

        assert!(client.has_refresh_token(&account).unwrap());
        client.remove_account(&account).unwrap();
        assert!(client.accounts().unwrap().is_empty());
        assert!(!client.has_refresh_token(&account).unwrap());
        assert!(matches!(
            client.remove_account(&account),
            Err(Error::AccountNotCached(_))
        ));
        assert!(matches!(
            client.acquire_token_silent(&account).await,
            Err(Error::AccountNotCached(_))
        ));
    }

    #[tokio::test]
    async fn test_response_without_id_token_is_rejected_for_new_accounts() {
        let mut bare = response("x@y.com", "abc", 3600);
        bare.id_token = None;
        let idp = Arc::new(FakeIdp::default());
        let client = PublicClient::new(idp, "env", Vec::new());

        let err = client.store_response(&bare, None, &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }
}
