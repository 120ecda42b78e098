//! Multi-account access to cached tokens.

use super::{AccessToken, TokenStore};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use o365mail_oauth::{Account, PublicClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sign-in state of one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// No matching account in the token cache.
    NotLoggedIn,
    /// A usable token was available or obtained silently.
    Valid {
        /// Account name.
        account: String,
        /// Expiry of the token.
        expires_at: DateTime<Utc>,
    },
    /// The account is cached but no token could be obtained silently.
    Expired {
        /// Account name.
        account: String,
        /// Why silent acquisition failed.
        cause: String,
    },
}

impl AuthStatus {
    /// Account the status is about, if one was found.
    #[must_use]
    pub fn account(&self) -> Option<&str> {
        match self {
            Self::NotLoggedIn => None,
            Self::Valid { account, .. } | Self::Expired { account, .. } => Some(account),
        }
    }

    /// Returns true if the account is in the token cache.
    #[must_use]
    pub const fn is_logged_in(&self) -> bool {
        !matches!(self, Self::NotLoggedIn)
    }
}

/// Diagnostics for one account and the token file behind it.
#[derive(Debug, Clone)]
pub struct DetailedAuthStatus {
    /// Account asked about.
    pub account: String,
    /// Token file.
    pub cache_file: PathBuf,
    /// Size of the token file, `None` if it does not exist.
    pub cache_size: Option<u64>,
    /// Whether the store holds a blob.
    pub has_cached_token: bool,
    /// Number of accounts in the cache.
    pub cached_accounts: usize,
    /// Whether the account is in the cache.
    pub found: bool,
    /// Whether a refresh token is cached for the account.
    pub refresh_present: bool,
    /// Whether a token could be obtained without user interaction.
    pub silent_refresh_ok: bool,
    /// Expiry of the token obtained silently.
    pub access_expiry: Option<DateTime<Utc>>,
    /// Last failure seen while collecting the diagnostics.
    pub last_error: Option<String>,
}

/// Answers token requests for every signed-in account.
///
/// Never starts an interactive sign-in; a missing or unrefreshable account
/// is reported so the caller can send the user to `auth login`.
#[derive(Debug, Clone)]
pub struct TokenManager {
    client: PublicClient,
    store: Arc<TokenStore>,
}

impl TokenManager {
    /// Creates a manager over `client`, whose cache persists to `store`.
    #[must_use]
    pub const fn new(client: PublicClient, store: Arc<TokenStore>) -> Self {
        Self { client, store }
    }

    fn lift(&self, err: o365mail_oauth::Error) -> Error {
        Error::from_oauth(err, self.store.path(), Error::OAuth)
    }

    fn accounts(&self) -> Result<Vec<Account>> {
        self.client.accounts().map_err(|e| self.lift(e))
    }

    /// Finds a cached account by name; an empty name selects the first one.
    fn find(&self, account: &str) -> Result<Option<Account>> {
        Ok(self.accounts()?.into_iter().find(|a| {
            account.is_empty() || a.preferred_username.eq_ignore_ascii_case(account)
        }))
    }

    /// Returns a usable access token for `account` without user interaction.
    ///
    /// # Errors
    ///
    /// [`Error::NotLoggedIn`] if the account is not cached, or
    /// [`Error::RefreshFailed`] with the identity provider's reason.
    pub async fn get_access_token(&self, account: &str) -> Result<AccessToken> {
        let cached = self
            .find(account)?
            .filter(|_| !account.is_empty())
            .ok_or_else(|| Error::NotLoggedIn(account.to_string()))?;

        match self.client.acquire_token_silent(&cached).await {
            Ok(result) => {
                debug!(account = %cached.preferred_username, expires_at = %result.expires_on, "Access token ready");
                Ok(AccessToken::from(&result))
            }
            Err(e) => {
                warn!(account = %cached.preferred_username, error = %e, "Silent token acquisition failed");
                Err(Error::from_oauth(e, self.store.path(), |source| {
                    Error::RefreshFailed {
                        account: cached.preferred_username.clone(),
                        source,
                    }
                }))
            }
        }
    }

    /// Like [`get_access_token`](Self::get_access_token), but gives up when
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if cancelled first, otherwise as `get_access_token`.
    pub async fn get_access_token_with_cancel(
        &self,
        account: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessToken> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(account, "Token request cancelled");
                Err(Error::Cancelled)
            }
            result = self.get_access_token(account) => result,
        }
    }

    /// Names of every cached account in enumeration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cache cannot be loaded.
    pub fn list_accounts(&self) -> Result<Vec<String>> {
        Ok(self
            .accounts()?
            .into_iter()
            .map(|a| a.preferred_username)
            .collect())
    }

    async fn status_of(&self, account: &Account) -> AuthStatus {
        match self.client.acquire_token_silent(account).await {
            Ok(result) => AuthStatus::Valid {
                account: result.account.preferred_username,
                expires_at: result.expires_on,
            },
            Err(e) => AuthStatus::Expired {
                account: account.preferred_username.clone(),
                cause: e.to_string(),
            },
        }
    }

    /// Sign-in state of `account`, or of the first cached account if empty.
    ///
    /// Refreshes the token if that is needed to tell.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cache cannot be loaded.
    pub async fn status(&self, account: &str) -> Result<AuthStatus> {
        match self.find(account)? {
            Some(found) => Ok(self.status_of(&found).await),
            None => Ok(AuthStatus::NotLoggedIn),
        }
    }

    /// Sign-in state of every cached account.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cache cannot be loaded.
    pub async fn all_statuses(&self) -> Result<Vec<AuthStatus>> {
        let mut statuses = Vec::new();
        for account in self.accounts()? {
            statuses.push(self.status_of(&account).await);
        }
        Ok(statuses)
    }

    /// Collects diagnostics for `account`. Failures end up in `last_error`.
    pub async fn detailed_status(&self, account: &str) -> DetailedAuthStatus {
        let mut status = DetailedAuthStatus {
            account: account.to_string(),
            cache_file: self.store.path().to_path_buf(),
            cache_size: self.store.size_on_disk(),
            has_cached_token: self.store.has_token(),
            cached_accounts: 0,
            found: false,
            refresh_present: false,
            silent_refresh_ok: false,
            access_expiry: None,
            last_error: None,
        };

        let accounts = match self.accounts() {
            Ok(accounts) => accounts,
            Err(e) => {
                status.last_error = Some(format!("failed to load accounts: {e}"));
                return status;
            }
        };
        status.cached_accounts = accounts.len();

        let Some(cached) = accounts
            .into_iter()
            .find(|a| a.preferred_username.eq_ignore_ascii_case(account))
        else {
            status.last_error = Some(format!("account {account} not found in cache"));
            return status;
        };
        status.found = true;
        status.refresh_present = self.client.has_refresh_token(&cached).unwrap_or(false);

        match self.client.acquire_token_silent(&cached).await {
            Ok(result) => {
                status.silent_refresh_ok = true;
                status.access_expiry = Some(result.expires_on);
            }
            Err(e) => status.last_error = Some(e.to_string()),
        }
        status
    }

    /// Removes `account` from the cache and flushes the store.
    ///
    /// # Errors
    ///
    /// [`Error::AccountNotFound`] if the account is not cached, or a
    /// persistence error.
    pub fn logout(&self, account: &str) -> Result<()> {
        let cached = self
            .find(account)?
            .filter(|_| !account.is_empty())
            .ok_or_else(|| Error::AccountNotFound(account.to_string()))?;

        self.client.remove_account(&cached).map_err(|e| self.lift(e))?;
        info!(account = %cached.preferred_username, "Logged out");
        Ok(())
    }

    /// Removes every account, then deletes the token file.
    ///
    /// Returns the number of accounts removed.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the cache cannot be flushed or the file
    /// cannot be deleted.
    ///
    /// A token file that cannot be decoded is deleted as well; it then
    /// counts as zero accounts.
    pub fn logout_all(&self) -> Result<usize> {
        let count = match self.accounts() {
            Ok(accounts) => {
                for account in &accounts {
                    self.client.remove_account(account).map_err(|e| self.lift(e))?;
                }
                accounts.len()
            }
            Err(e) => {
                warn!(error = %e, "Token cache unreadable, deleting it");
                0
            }
        };
        self.store.clear()?;
        info!(count, "Logged out of every account");
        Ok(count)
    }
}
