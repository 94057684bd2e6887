//! Artifact storage for published versions and the current-version pointer.
//!
//! Keys are relative, `/`-separated paths such as `versions/v1/manifest.json`.

use newsdex_core::{AppError, AppResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Key/value storage for immutable version artifacts and the pointer.
///
/// Every `put` must be individually atomic: readers see either the previous
/// bytes or the new bytes, never a partial write.
pub trait ArtifactStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()>;

    /// Read an artifact; `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;

    /// All keys under `prefix`, sorted.
    fn list(&self, prefix: &str) -> AppResult<Vec<String>>;

    /// Take the exclusive build lock for this store.
    ///
    /// Held until the returned guard is dropped. Fails with
    /// [`AppError::BuildInProgress`] while any other holder, in this process
    /// or another, has it.
    fn lock_builds(&self) -> AppResult<BuildLock>;
}

const TEMP_MARKER: &str = ".tmp-";

/// Name of the lock file under the store root.
pub const BUILD_LOCK_KEY: &str = "build.lock";

/// Exclusive build lock backed by a file; the file is removed on drop.
#[derive(Debug)]
pub struct BuildLock {
    path: PathBuf,
}

impl BuildLock {
    /// Create `path` exclusively, recording the holder's process id.
    pub fn acquire(path: PathBuf) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                tracing::warn!(
                    lock = %path.display(),
                    holder = %holder.trim(),
                    "Build lock is held; remove the file if no build is running"
                );
                return Err(AppError::BuildInProgress);
            }
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "failed to create build lock {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let lock = Self { path };
        writeln!(file, "{}", std::process::id()).map_err(|e| {
            AppError::Storage(format!("failed to write build lock {}: {}", lock.path.display(), e))
        })?;
        tracing::debug!(lock = %lock.path.display(), "Acquired build lock");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release build lock");
        }
    }
}

/// Filesystem artifact store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> AppResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(AppError::Storage(format!("invalid artifact key: {:?}", key)));
        }
        Ok(self.root.join(relative))
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .ok_or_else(|| AppError::Storage(format!("artifact key has no parent: {}", key)))?;
        std::fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp_path = parent.join(format!(
            ".{}{}{}",
            file_name,
            TEMP_MARKER,
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = (|| -> std::io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &path)?;
            sync_dir(parent)
        })();

        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(AppError::Storage(format!(
                "failed to write artifact {}: {}",
                key, e
            )));
        }

        tracing::debug!(key = %key, bytes = bytes.len(), "Wrote artifact");
        Ok(())
    }

    fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Storage(format!(
                "failed to read artifact {}: {}",
                key, e
            ))),
        }
    }

    fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        let base = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix)?
        };
        if !base.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| AppError::Storage(format!("failed to list {}: {}", prefix, e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().contains(TEMP_MARKER) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
        keys.sort();
        Ok(keys)
    }

    fn lock_builds(&self) -> AppResult<BuildLock> {
        BuildLock::acquire(self.resolve(BUILD_LOCK_KEY)?)
    }
}

fn sync_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        File::open(path)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
