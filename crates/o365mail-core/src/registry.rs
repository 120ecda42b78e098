//! Local list of signed-in accounts.
//!
//! Bookkeeping for display and default-account selection only. The token
//! cache decides whether an account can actually get a token.

use crate::error::Result;
use crate::fs::write_private;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Registry file name inside the configuration directory.
pub const REGISTRY_FILE_NAME: &str = "accounts.json";

/// One registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredAccount {
    /// Mailbox address.
    pub email: String,
    /// Last time the account signed in.
    pub added_at: DateTime<Utc>,
    /// Optional short name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Accounts in the order they were first added.
#[derive(Debug, Clone)]
pub struct AccountRegistry {
    path: PathBuf,
    accounts: Vec<RegisteredAccount>,
}

impl AccountRegistry {
    /// Opens the registry in `dir`. A missing file is an empty registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(REGISTRY_FILE_NAME);
        let accounts = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, accounts })
    }

    fn save(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.accounts)?;
        write_private(&self.path, &data)?;
        debug!(path = %self.path.display(), count = self.accounts.len(), "Saved account registry");
        Ok(())
    }

    /// Registered accounts.
    #[must_use]
    pub fn accounts(&self) -> &[RegisteredAccount] {
        &self.accounts
    }

    /// Looks up an account by address, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, email: &str) -> Option<&RegisteredAccount> {
        self.accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }

    /// Returns true if `email` is registered.
    #[must_use]
    pub fn contains(&self, email: &str) -> bool {
        self.get(email).is_some()
    }

    /// Address of the first registered account.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.accounts.first().map(|a| a.email.as_str())
    }

    /// Registers `email`, or refreshes its timestamp if already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be written.
    pub fn add(&mut self, email: &str) -> Result<()> {
        let now = Utc::now();
        match self
            .accounts
            .iter_mut()
            .find(|a| a.email.eq_ignore_ascii_case(email))
        {
            Some(existing) => existing.added_at = now,
            None => self.accounts.push(RegisteredAccount {
                email: email.to_string(),
                added_at: now,
                alias: None,
            }),
        }
        self.save()
    }

    /// Unregisters `email`. Returns false if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be written.
    pub fn remove(&mut self, email: &str) -> Result<bool> {
        let before = self.accounts.len();
        self.accounts.retain(|a| !a.email.eq_ignore_ascii_case(email));
        if self.accounts.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Unregisters every account.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be written.
    pub fn clear(&mut self) -> Result<()> {
        self.accounts.clear();
        self.save()
    }
}
