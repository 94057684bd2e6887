//! Filesystem blob store: body references are paths relative to a root directory.

use super::{BlobError, BlobStore};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, body_ref: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(body_ref.trim_start_matches('/'));
        let valid = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if body_ref.trim().is_empty() || !valid {
            return Err(BlobError::NotFound(body_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, body_ref: &str) -> Result<String, BlobError> {
        let path = self.resolve(body_ref)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(body_ref.to_string()))
            }
            Err(e) => Err(BlobError::Io {
                key: body_ref.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_get_existing_and_missing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("2024/05")).unwrap();
        std::fs::write(dir.path().join("2024/05/doc-1.txt"), "Full article body").unwrap();

        let store = FsBlobStore::new(dir.path());
        assert_eq!(store.get("2024/05/doc-1.txt").await.unwrap(), "Full article body");
        assert!(matches!(store.get("2024/05/none.txt").await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.get("../escape.txt").await, Err(BlobError::NotFound(_))));
    }
}
