use std::collections::HashMap;
use std::sync::Mutex;

use super::{BackendError, StoreBackend};

/// In-memory backend. Used for ephemeral hosts and throughout the test
/// suite; the optional quota makes storage-exhaustion paths reachable
/// without filling a disk.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    /// Backend that refuses writes once total stored bytes would exceed
    /// `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryStore {
    fn read(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut entries = self.lock();
        if let Some(quota) = self.quota_bytes {
            let occupied: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if occupied + key.len() + value.len() > quota {
                return Err(BackendError::QuotaExceeded);
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}
