//! File-backed persistence for the token cache blob.
//!
//! The blob lives in `<cache_dir>/token.json`. The store keeps an in-memory
//! copy, read once at construction, and writes through on every save. The
//! authentication library reaches the store only through its
//! [`CacheAccessor`] hooks.

use crate::error::{Error, Result};
use crate::fs::write_private;
use o365mail_oauth::{CacheAccessor, CacheMarshaler, CacheUnmarshaler};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Name of the token file inside the cache directory.
pub const TOKEN_FILE_NAME: &str = "token.json";

/// Durable storage for the serialized token cache.
#[derive(Debug)]
pub struct TokenStore {
    cache_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Vec<u8>>,
}

impl TokenStore {
    /// Opens the store in `cache_dir`, reading any existing token file.
    ///
    /// A missing file or directory is a fresh install and yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the file exists but cannot be read.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let path = cache_dir.join(TOKEN_FILE_NAME);

        let data = match fs::read(&path) {
            Ok(data) => {
                debug!(path = %path.display(), bytes = data.len(), "Loaded token cache");
                data
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(Error::Persistence { path, source }),
        };

        Ok(Self {
            cache_dir,
            path,
            data: Mutex::new(data),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current blob, empty if nothing was ever saved.
    #[must_use]
    pub fn load(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Replaces the persisted blob with `data`.
    ///
    /// The directory and file are created owner-only. The write goes through
    /// a temporary file and a rename.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the directory or file cannot be written.
    pub fn save(&self, data: &[u8]) -> Result<()> {
        let mut current = self.lock();
        write_private(&self.path, data).map_err(|source| Error::Persistence {
            path: self.path.clone(),
            source,
        })?;
        *current = data.to_vec();
        debug!(path = %self.path.display(), bytes = data.len(), "Saved token cache");
        Ok(())
    }

    /// Deletes the token file and forgets the in-memory blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the file exists and cannot be removed.
    pub fn clear(&self) -> Result<()> {
        let mut current = self.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed token cache"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(Error::Persistence {
                    path: self.path.clone(),
                    source,
                });
            }
        }
        current.clear();
        Ok(())
    }

    /// Returns true if a blob is held in memory.
    #[must_use]
    pub fn has_token(&self) -> bool {
        !self.lock().is_empty()
    }

    /// Path of the token file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the token file.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Size of the token file, if it exists.
    #[must_use]
    pub fn size_on_disk(&self) -> Option<u64> {
        fs::metadata(&self.path).ok().map(|m| m.len())
    }
}

impl CacheAccessor for TokenStore {
    fn replace(&self, cache: &mut dyn CacheUnmarshaler) -> o365mail_oauth::Result<()> {
        let data = self.lock();
        if data.is_empty() {
            return Ok(());
        }
        cache.unmarshal(&data).map_err(|e| {
            o365mail_oauth::Error::persistence(
                "failed to decode token file",
                io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            )
        })
    }

    fn export(&self, cache: &dyn CacheMarshaler) -> o365mail_oauth::Result<()> {
        let data = cache.marshal()?;
        self.save(&data).map_err(|e| match e {
            Error::Persistence { source, .. } => {
                o365mail_oauth::Error::persistence("failed to write token file", source)
            }
            other => o365mail_oauth::Error::persistence(
                "failed to write token file",
                io::Error::other(other.to_string()),
            ),
        })
    }
}
