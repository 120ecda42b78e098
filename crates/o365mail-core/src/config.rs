//! Configuration file and environment overrides.
//!
//! Settings are read from `~/.o365-mail-cli/config.toml`, then overridden by
//! `O365_*` environment variables. Every key has a default, so a missing
//! file is not an error.

use crate::backend::{BackendKind, Endpoint, ServerEndpoints};
use crate::error::{Error, Result};
use crate::fs::write_private;
use crate::registry::AccountRegistry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under the home directory holding configuration and tokens.
pub const CONFIG_DIR_NAME: &str = ".o365-mail-cli";

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Public client id registered for the command-line tool.
pub const DEFAULT_CLIENT_ID: &str = "5aa6d895-1072-41c4-beb6-d8e3fdf0e7cd";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "O365_";

/// Keys accepted by [`Config::get`] and [`Config::set`].
pub const KEYS: [&str; 10] = [
    "client_id",
    "current_account",
    "tenant",
    "backend",
    "imap_server",
    "imap_port",
    "smtp_server",
    "smtp_port",
    "cache_dir",
    "debug",
];

/// Application configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Application (client) id registered with the identity platform.
    pub client_id: String,
    /// Account used when none is given on the command line.
    pub current_account: String,
    /// Tenant to sign in to (`common`, `organizations`, a tenant id or domain).
    pub tenant: String,
    /// Backend mail traffic goes through; decides the token scopes.
    pub backend: BackendKind,
    /// IMAP server.
    pub imap_server: String,
    /// IMAP port.
    pub imap_port: u16,
    /// SMTP server.
    pub smtp_server: String,
    /// SMTP port.
    pub smtp_port: u16,
    /// Directory holding the token file.
    pub cache_dir: PathBuf,
    /// Verbose logging.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        let endpoints = ServerEndpoints::default();
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            current_account: String::new(),
            tenant: "common".to_string(),
            backend: BackendKind::default(),
            imap_server: endpoints.imap.host,
            imap_port: endpoints.imap.port,
            smtp_server: endpoints.smtp.host,
            smtp_port: endpoints.smtp.port,
            cache_dir: config_dir(),
            debug: false,
        }
    }
}

/// `~/.o365-mail-cli`, or a relative directory if there is no home directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default location of the configuration file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{key}: expected true or false, got '{value}'"))),
    }
}

fn parse_port(key: &str, value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::Config(format!("{key}: port must be 1-65535, got '{value}'"))),
    }
}

impl Config {
    /// Reads the file at `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn read(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "Loaded configuration");
                Ok(toml::from_str(&text)?)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the file at `path` (or the default path) and applies the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or an override is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map_or_else(default_config_path, Path::to_path_buf);
        let mut config = Self::read(&path)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies `O365_<KEY>` overrides found through `lookup`.
    ///
    /// `current_account` is not overridden here; `O365_ACCOUNT` is resolved
    /// together with the `--account` flag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an override has an invalid value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        for key in KEYS {
            if key == "current_account" {
                continue;
            }
            let name = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
            if let Some(value) = lookup(&name) {
                debug!(%name, "Applying environment override");
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    /// Writes the configuration to `path`, owner-only, through a temporary
    /// file and a rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        write_private(path, text.as_bytes())?;
        debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Returns the value of `key` as text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown key.
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(match key {
            "client_id" => self.client_id.clone(),
            "current_account" => self.current_account.clone(),
            "tenant" => self.tenant.clone(),
            "backend" => self.backend.to_string(),
            "imap_server" => self.imap_server.clone(),
            "imap_port" => self.imap_port.to_string(),
            "smtp_server" => self.smtp_server.clone(),
            "smtp_port" => self.smtp_port.to_string(),
            "cache_dir" => self.cache_dir.display().to_string(),
            "debug" => self.debug.to_string(),
            _ => return Err(unknown_key(key)),
        })
    }

    /// Sets `key` from text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unknown key or a malformed value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "client_id" => self.client_id = value.trim().to_string(),
            "current_account" => self.current_account = value.trim().to_string(),
            "tenant" => self.tenant = value.trim().to_string(),
            "backend" => self.backend = value.parse().map_err(Error::Config)?,
            "imap_server" => self.imap_server = value.trim().to_string(),
            "imap_port" => self.imap_port = parse_port(key, value)?,
            "smtp_server" => self.smtp_server = value.trim().to_string(),
            "smtp_port" => self.smtp_port = parse_port(key, value)?,
            "cache_dir" => self.cache_dir = PathBuf::from(value.trim()),
            "debug" => self.debug = parse_bool(key, value)?,
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// Servers of the protocol backend.
    #[must_use]
    pub fn endpoints(&self) -> ServerEndpoints {
        ServerEndpoints {
            imap: Endpoint {
                host: self.imap_server.clone(),
                port: self.imap_port,
            },
            smtp: Endpoint {
                host: self.smtp_server.clone(),
                port: self.smtp_port,
            },
        }
    }

    /// Picks the account a command acts on.
    ///
    /// Order: `explicit` (the `--account` flag or `O365_ACCOUNT`), then
    /// `current_account`, then the first registered account.
    #[must_use]
    pub fn resolve_account(
        &self,
        explicit: Option<&str>,
        registry: &AccountRegistry,
    ) -> Option<String> {
        explicit
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .or_else(|| Some(self.current_account.as_str()).filter(|a| !a.is_empty()))
            .map(ToString::to_string)
            .or_else(|| registry.first().map(ToString::to_string))
    }
}

fn unknown_key(key: &str) -> Error {
    Error::Config(format!(
        "unknown config key '{key}' (valid keys: {})",
        KEYS.join(", ")
    ))
}
