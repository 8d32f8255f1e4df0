//! Local persisted state
//!
//! Small JSON documents keyed by name, one file per key:
//!
//! ```text
//! <state dir>/
//!   seen.json            # Note seen-state
//!   daily_target.json    # Cached daily target
//!   session.json         # Persisted auth session
//! ```
//!
//! The state dir defaults to the platform data directory and can be moved
//! with `--state-dir` or `JOBLINK_STATE_DIR`.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};
use crate::lock::{self, DEFAULT_LOCK_TIMEOUT_MS};

pub const STATE_DIR_ENV: &str = "JOBLINK_STATE_DIR";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    lock_timeout_ms: u64,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }

    /// Use `state_dir` when given, otherwise the platform data directory.
    pub fn open(state_dir: Option<PathBuf>) -> Result<Self> {
        match state_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => Self::default_root().map(Self::new),
        }
    }

    pub fn default_root() -> Result<PathBuf> {
        ProjectDirs::from("", "", "joblink")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                Error::OperationFailed("could not determine a home directory for local state".into())
            })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Read a key; missing or unreadable documents yield the default value.
    pub fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        let path = self.path(key);
        let Some(bytes) = lock::read_locked(&path, self.lock_timeout_ms)? else {
            return Ok(T::default());
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "corrupt local state ignored");
                Ok(T::default())
            }
        }
    }

    pub fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)?;
        lock::write_atomic_locked(self.path(key), &data, self.lock_timeout_ms)?;
        tracing::debug!(key, "local state written");
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        lock::remove_locked(self.path(key), self.lock_timeout_ms)
    }
}
