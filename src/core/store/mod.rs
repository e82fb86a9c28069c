//! Durable key/value persistence.
//!
//! [`Store`] is a thin typed layer over a raw string-valued
//! [`StoreBackend`]: values are JSON on the way in and out, every key lives
//! under the application namespace, and reads never fail: a missing or
//! unparseable value falls back to the caller's default. The one failure a
//! caller must handle is storage exhaustion, surfaced as
//! [`StoreError::QuotaExceeded`] with a message fit for direct display.

pub mod keys;

mod file;
mod memory;

#[cfg(test)]
mod tests;

pub use file::FileStore;
pub use memory::MemoryStore;

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Raw storage medium underneath [`Store`].
pub trait StoreBackend: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> Result<(), BackendError>;
    fn remove(&self, key: &str);
    fn keys(&self) -> Vec<String>;
}

/// Failure writing to the backing medium.
#[derive(Debug)]
pub enum BackendError {
    /// The medium is full; the user has to free space.
    QuotaExceeded,

    /// Any other I/O failure.
    Io(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::QuotaExceeded => write!(f, "storage quota exceeded"),
            BackendError::Io(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Failure surfaced to callers of [`Store::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    QuotaExceeded,
}

impl fmt::Display for StoreError {
    // The quota message doubles as the user-facing notice text.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::QuotaExceeded => write!(
                f,
                "Storage quota exceeded. Please clear some old data to continue."
            ),
        }
    }
}

impl std::error::Error for StoreError {}

/// Typed, namespaced view over a [`StoreBackend`]. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn StoreBackend>,
}

impl Store {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by per-key JSON files under the platform data dir.
    pub fn open_default() -> Result<Self, std::io::Error> {
        Ok(Self::new(Arc::new(FileStore::open_default()?)))
    }

    /// Ephemeral store; nothing survives the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Read and decode a value, falling back to `default` when the key is
    /// absent or the stored value cannot be decoded.
    ///
    /// Early revisions of the storage layout wrote booleans without JSON
    /// encoding; bare `true`/`false` values are still accepted.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.backend.read(key) else {
            return default;
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => {
                if raw == "true" || raw == "false" {
                    if let Ok(value) =
                        serde_json::from_value(serde_json::Value::Bool(raw == "true"))
                    {
                        return value;
                    }
                }
                tracing::warn!(key, "discarding unreadable stored value");
                default
            }
        }
    }

    /// Encode and write a value.
    ///
    /// Quota exhaustion is the only error callers see; other backend
    /// failures are logged and swallowed so a flaky disk cannot take the
    /// application down mid-conversation.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode value for storage");
                return Ok(());
            }
        };
        match self.backend.write(key, &raw) {
            Ok(()) => Ok(()),
            Err(BackendError::QuotaExceeded) => Err(StoreError::QuotaExceeded),
            Err(err) => {
                tracing::warn!(key, error = %err, "storage write failed");
                Ok(())
            }
        }
    }

    pub fn remove(&self, key: &str) {
        self.backend.remove(key);
    }

    /// All stored keys starting with `prefix`, unordered.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.backend
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect()
    }

    /// Remove every key in the application namespace. Keys outside the
    /// namespace (another application sharing the medium) are untouched.
    pub fn clear_all(&self) {
        for key in self.keys_with_prefix(keys::NAMESPACE) {
            self.backend.remove(&key);
        }
    }
}
