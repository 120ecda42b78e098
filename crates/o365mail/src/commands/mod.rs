//! Command implementations.

pub mod auth;
pub mod config;

use o365mail_core::{AccountRegistry, AuthContext, Config};
use std::path::{Path, PathBuf};

/// State shared by every command of one invocation.
pub struct Session {
    config: Config,
    config_path: PathBuf,
    account: Option<String>,
}

impl Session {
    pub const fn new(config: Config, config_path: PathBuf, account: Option<String>) -> Self {
        Self {
            config,
            config_path,
            account,
        }
    }

    /// Effective configuration, environment overrides applied.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory holding the configuration file and the account registry.
    fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map_or_else(o365mail_core::config::config_dir, Path::to_path_buf)
    }

    pub fn registry(&self) -> o365mail_core::Result<AccountRegistry> {
        AccountRegistry::open(&self.config_dir())
    }

    /// Account a command acts on, if any can be determined.
    pub fn active_account(&self, registry: &AccountRegistry) -> Option<String> {
        self.config
            .resolve_account(self.account.as_deref(), registry)
    }

    /// Applies `change` to the configuration file as written on disk.
    ///
    /// Environment overrides are left out so they never get persisted.
    pub fn update_config(
        &self,
        change: impl FnOnce(&mut Config) -> o365mail_core::Result<()>,
    ) -> o365mail_core::Result<()> {
        let mut on_disk = Config::read(&self.config_path)?;
        change(&mut on_disk)?;
        on_disk.save(&self.config_path)
    }

    pub fn auth(&self) -> o365mail_core::Result<AuthContext> {
        AuthContext::from_config(&self.config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_update_config_keeps_env_overrides_out_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut effective = Config::default();
        effective.tenant = "from-env".to_string();

        let session = Session::new(effective, path.clone(), None);
        session
            .update_config(|c| c.set("current_account", "a@y.com"))
            .unwrap();

        let written = Config::read(&path).unwrap();
        assert_eq!(written.current_account, "a@y.com");
        assert_eq!(written.tenant, "common");
    }

    #[test]
    fn test_active_account_prefers_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.current_account = "saved@y.com".to_string();
        let registry = AccountRegistry::open(dir.path()).unwrap();

        let with_flag = Session::new(
            config.clone(),
            dir.path().join("config.toml"),
            Some("flag@y.com".into()),
        );
        assert_eq!(with_flag.active_account(&registry).as_deref(), Some("flag@y.com"));

        let without = Session::new(config, dir.path().join("config.toml"), None);
        assert_eq!(without.active_account(&registry).as_deref(), Some("saved@y.com"));
    }
}
