//! Multi-account token cache and its persistence hooks.
//!
//! The cache is the library's in-memory state: every signed-in account with
//! its access token, expiry and refresh token. It is serialized as one blob
//! through [`CacheMarshaler`] and restored through [`CacheUnmarshaler`].
//! Where that blob lives is decided by the application, which plugs a
//! [`CacheAccessor`] into the [`PublicClient`](crate::PublicClient).

use crate::error::Result;
use crate::token::EXPIRY_BUFFER_SECS;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Serializes the cache into an opaque blob.
pub trait CacheMarshaler {
    /// Returns the serialized cache.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn marshal(&self) -> Result<Vec<u8>>;
}

/// Restores the cache from an opaque blob.
pub trait CacheUnmarshaler {
    /// Replaces the cache contents with the deserialized blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob cannot be decoded.
    fn unmarshal(&mut self, data: &[u8]) -> Result<()>;
}

/// Export/replace hooks through which the cache is persisted.
///
/// `replace` is called before the library reads the cache, `export` after
/// every mutation. `export` must not return before the blob is durable.
pub trait CacheAccessor: Send + Sync {
    /// Loads persisted state into `cache`. Leaves it untouched if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state cannot be read or decoded.
    fn replace(&self, cache: &mut dyn CacheUnmarshaler) -> Result<()>;

    /// Persists the state of `cache`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized or written.
    fn export(&self, cache: &dyn CacheMarshaler) -> Result<()>;
}

/// An account known to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable id across tenants (`<oid>.<tid>`).
    pub home_account_id: String,
    /// Sign-in name, normally the mailbox address.
    pub preferred_username: String,
    /// Tenant the account signed in to.
    pub realm: String,
    /// Authority host.
    pub environment: String,
}

/// Cached access token for an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenEntry {
    /// Bearer token.
    pub secret: String,
    /// Absolute expiry.
    pub expires_on: DateTime<Utc>,
    /// Scopes the token was granted for.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AccessTokenEntry {
    /// Returns true if the token is still usable at `now`, allowing for clock skew.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_BUFFER_SECS) < self.expires_on
    }

    /// Returns true if the token was granted every scope in `wanted`.
    ///
    /// Servers may echo scopes as short names where resource URLs were
    /// requested, so `Mail.Send` covers `https://graph.microsoft.com/Mail.Send`.
    /// Tokens stored without a `scope` in the response carry the requested
    /// scopes, so an empty list only covers an empty request.
    #[must_use]
    pub fn covers(&self, wanted: &[String]) -> bool {
        wanted.iter().all(|w| {
            self.scopes
                .iter()
                .any(|s| s.eq_ignore_ascii_case(w) || w.ends_with(&format!("/{s}")))
        })
    }
}

/// One cached account with its credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Account identity.
    pub account: Account,
    /// Last access token issued for the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<AccessTokenEntry>,
    /// Refresh token, opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// In-memory token cache, ordered by first sign-in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

impl TokenCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts in enumeration order.
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        self.entries.iter().map(|e| e.account.clone()).collect()
    }

    /// Number of cached accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no account is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an account by home account id.
    #[must_use]
    pub fn entry(&self, home_account_id: &str) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|e| e.account.home_account_id == home_account_id)
    }

    /// Inserts or updates an account. A refresh token is only overwritten
    /// when a new one was issued.
    pub fn upsert(
        &mut self,
        account: Account,
        access_token: AccessTokenEntry,
        refresh_token: Option<String>,
    ) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.account.home_account_id == account.home_account_id)
        {
            entry.account = account;
            entry.access_token = Some(access_token);
            if refresh_token.is_some() {
                entry.refresh_token = refresh_token;
            }
            return;
        }

        self.entries.push(CacheEntry {
            account,
            access_token: Some(access_token),
            refresh_token,
        });
    }

    /// Removes an account. Returns false if it was not cached.
    pub fn remove(&mut self, home_account_id: &str) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.account.home_account_id != home_account_id);
        self.entries.len() != before
    }

    /// Removes every account.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl CacheMarshaler for TokenCache {
    fn marshal(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl CacheUnmarshaler for TokenCache {
    fn unmarshal(&mut self, data: &[u8]) -> Result<()> {
        *self = if data.is_empty() {
            Self::default()
        } else {
            serde_json::from_slice(data)?
        };
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn account(name: &str) -> Account {
        Account {
            home_account_id: format!("{name}.tenant"),
            preferred_username: format!("{name}@example.com"),
            realm: "tenant".into(),
            environment: "login.microsoftonline.com".into(),
        }
    }

    fn access(secret: &str, secs: i64) -> AccessTokenEntry {
        AccessTokenEntry {
            secret: secret.into(),
            expires_on: Utc::now() + Duration::seconds(secs),
            scopes: Vec::new(),
        }
    }

    #[test]
    fn test_upsert_keeps_enumeration_order() {
        let mut cache = TokenCache::new();
        cache.upsert(account("bob"), access("b", 3600), Some("rb".into()));
        cache.upsert(account("alice"), access("a", 3600), Some("ra".into()));
        cache.upsert(account("bob"), access("b2", 3600), None);

        let names: Vec<_> = cache
            .accounts()
            .into_iter()
            .map(|a| a.preferred_username)
            .collect();
        assert_eq!(names, vec!["bob@example.com", "alice@example.com"]);

        let bob = cache.entry("bob.tenant").unwrap();
        assert_eq!(bob.access_token.as_ref().unwrap().secret, "b2");
        assert_eq!(bob.refresh_token.as_deref(), Some("rb"));
    }

    #[test]
    fn test_remove() {
        let mut cache = TokenCache::new();
        cache.upsert(account("bob"), access("b", 3600), None);
        assert!(cache.remove("bob.tenant"));
        assert!(!cache.remove("bob.tenant"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_marshal_restores_state() {
        let mut cache = TokenCache::new();
        cache.upsert(account("bob"), access("b", 3600), Some("rb".into()));
        let blob = cache.marshal().unwrap();

        let mut restored = TokenCache::new();
        restored.unmarshal(&blob).unwrap();
        assert_eq!(restored.accounts(), cache.accounts());

        restored.unmarshal(&[]).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_unmarshal_rejects_garbage() {
        let mut cache = TokenCache::new();
        assert!(cache.unmarshal(b"{not json").is_err());
    }

    #[test]
    fn test_liveness_buffer() {
        let now = Utc::now();
        assert!(access("a", 3600).is_live_at(now));
        assert!(!access("a", 30).is_live_at(now));
        assert!(!access("a", -10).is_live_at(now));
    }

    #[test]
    fn test_scope_coverage() {
        let token = AccessTokenEntry {
            secret: "a".into(),
            expires_on: Utc::now(),
            scopes: vec!["Mail.ReadWrite".into(), "Mail.Send".into()],
        };
        assert!(token.covers(&["https://graph.microsoft.com/Mail.Send".into()]));
        assert!(!token.covers(&["https://outlook.office.com/IMAP.AccessAsUser.All".into()]));

        let unscoped = AccessTokenEntry {
            scopes: Vec::new(),
            ..token
        };
        assert!(!unscoped.covers(&["https://graph.microsoft.com/Mail.Send".into()]));
        assert!(unscoped.covers(&[]));
    }
}
