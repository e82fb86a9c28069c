use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tempfile::NamedTempFile;

use super::{BackendError, StoreBackend};

/// File-per-key backend: each key is stored as `<key>.json` in one
/// directory. Writes go through a temp file and an atomic rename so a crash
/// mid-write never leaves a truncated value behind.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Backend rooted at the platform data directory.
    pub fn open_default() -> Result<Self, std::io::Error> {
        let proj_dirs = ProjectDirs::from("org", "parlour", "parlour")
            .expect("Failed to determine data directory");
        let dir = proj_dirs.data_dir().join("store");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Backend rooted at an explicit directory (created lazily on write).
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn write_atomic(&self, path: &Path, value: &str) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.dir)?;
        let mut temp_file = NamedTempFile::new_in(&self.dir)?;
        temp_file.write_all(value.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl StoreBackend for FileStore {
    fn read(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn write(&self, key: &str, value: &str) -> Result<(), BackendError> {
        self.write_atomic(&self.path_for(key), value)
            .map_err(|err| {
                if is_quota_error(&err) {
                    BackendError::QuotaExceeded
                } else {
                    BackendError::Io(err.to_string())
                }
            })
    }

    fn remove(&self, key: &str) {
        let _ = fs::remove_file(self.path_for(key));
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json") {
                    path.file_stem()
                        .map(|stem| stem.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect()
    }
}

/// ENOSPC and EDQUOT both mean the user has to free space.
fn is_quota_error(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(28) | Some(122))
}
