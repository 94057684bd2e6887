//! Immutable index versions and the current-version pointer.
//!
//! Layout inside an [`ArtifactStore`]:
//!
//! ```text
//! latest.json                      {"current_version": <id>}
//! versions/v<id>/vectors.bin
//! versions/v<id>/metadata.jsonl
//! versions/v<id>/manifest.json     written last
//! ```
//!
//! A version only exists once its manifest is written, and it only becomes
//! current once the pointer names it. The pointer is the single point of
//! atomicity.

use crate::digest::sha256_hex;
use crate::metadata_table::MetadataTable;
use crate::snapshot;
use crate::store::ArtifactStore;
use crate::vector_store::VectorStore;
use chrono::{DateTime, Utc};
use newsdex_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const POINTER_KEY: &str = "latest.json";
pub const VERSIONS_PREFIX: &str = "versions";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.jsonl";

/// Monotonically increasing version identifier (unix milliseconds at creation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(pub u64);

impl VersionId {
    /// Next identifier after `previous`, from the wall clock but always strictly greater.
    pub fn next(previous: Option<VersionId>, now: DateTime<Utc>) -> Self {
        let clock = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        match previous {
            Some(prev) => VersionId(clock.max(prev.0 + 1)),
            None => VersionId(clock),
        }
    }

    /// Directory key of this version inside the artifact store.
    pub fn dir_key(&self) -> String {
        format!("{}/{}", VERSIONS_PREFIX, self)
    }

    fn artifact_key(&self, file: &str) -> String {
        format!("{}/{}", self.dir_key(), file)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl std::str::FromStr for VersionId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('v').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(VersionId)
            .map_err(|_| AppError::Other(format!("invalid version id: {:?}", s)))
    }
}

/// Durable description of one published version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionManifest {
    pub version: VersionId,
    pub created_at: DateTime<Utc>,
    pub row_count: usize,
    /// `None` only for a version with no rows
    pub dim: Option<usize>,
    pub vector_snapshot_ref: String,
    pub metadata_snapshot_ref: String,
    pub vector_sha256: String,
    pub metadata_sha256: String,
    #[serde(default)]
    pub parent_version: Option<VersionId>,
}

/// Contents of `latest.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pointer {
    pub current_version: VersionId,
}

/// The loaded pair of parallel structures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub vectors: VectorStore,
    pub metadata: MetadataTable,
}

impl Snapshot {
    pub fn new(vectors: VectorStore, metadata: MetadataTable) -> Self {
        Self { vectors, metadata }
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Structural checks a version must pass before it is written or served.
    pub fn validate(&self, expected_dim: Option<usize>) -> AppResult<()> {
        if self.vectors.len() != self.metadata.len() {
            return Err(AppError::Invariant(format!(
                "row count mismatch: {} vectors vs {} metadata rows",
                self.vectors.len(),
                self.metadata.len()
            )));
        }
        self.metadata.validate_contiguity()?;
        self.vectors.validate_norms()?;
        if let (Some(expected), Some(actual)) = (expected_dim, self.vectors.dimension()) {
            if expected != actual {
                return Err(AppError::DimensionMismatch { expected, actual });
            }
        }
        Ok(())
    }
}

/// A version loaded from storage. `manifest` is `None` on cold start.
#[derive(Debug, Clone, Default)]
pub struct LoadedSnapshot {
    pub manifest: Option<VersionManifest>,
    pub snapshot: Snapshot,
}

impl LoadedSnapshot {
    pub fn version(&self) -> Option<VersionId> {
        self.manifest.as_ref().map(|m| m.version)
    }
}

/// Reads and writes versions and the pointer in an artifact store.
#[derive(Clone)]
pub struct VersionCatalog {
    store: Arc<dyn ArtifactStore>,
}

impl VersionCatalog {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Version named by the pointer, `None` before the first publish.
    pub fn current_version(&self) -> AppResult<Option<VersionId>> {
        match self.store.get(POINTER_KEY)? {
            Some(bytes) => {
                let pointer: Pointer = serde_json::from_slice(&bytes).map_err(|e| {
                    AppError::Storage(format!("corrupt pointer {}: {}", POINTER_KEY, e))
                })?;
                Ok(Some(pointer.current_version))
            }
            None => Ok(None),
        }
    }

    pub fn load_manifest(&self, version: VersionId) -> AppResult<VersionManifest> {
        let bytes = self
            .store
            .get(&version.artifact_key(MANIFEST_FILE))?
            .ok_or_else(|| AppError::VersionNotFound(version.to_string()))?;
        let manifest: VersionManifest = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Storage(format!("corrupt manifest for {}: {}", version, e))
        })?;
        if manifest.version != version {
            return Err(AppError::Storage(format!(
                "manifest under {} names version {}",
                version, manifest.version
            )));
        }
        Ok(manifest)
    }

    /// Load a version, verifying checksums, row counts, dimension and contiguity.
    pub fn load_version(&self, version: VersionId) -> AppResult<LoadedSnapshot> {
        let manifest = self.load_manifest(version)?;

        let vector_bytes = self.read_artifact(&manifest.vector_snapshot_ref)?;
        verify_checksum(&manifest.vector_snapshot_ref, &vector_bytes, &manifest.vector_sha256)?;
        let metadata_bytes = self.read_artifact(&manifest.metadata_snapshot_ref)?;
        verify_checksum(
            &manifest.metadata_snapshot_ref,
            &metadata_bytes,
            &manifest.metadata_sha256,
        )?;

        let vectors = snapshot::decode_vectors(&vector_bytes)?;
        let metadata = snapshot::decode_metadata(&metadata_bytes)?;
        let snapshot = Snapshot::new(vectors, metadata);

        if snapshot.len() != manifest.row_count {
            return Err(AppError::Invariant(format!(
                "{} declares {} rows, snapshot holds {}",
                version,
                manifest.row_count,
                snapshot.len()
            )));
        }
        snapshot.validate(manifest.dim)?;

        tracing::debug!(
            version = %version,
            rows = manifest.row_count,
            dim = ?manifest.dim,
            "Loaded version"
        );

        Ok(LoadedSnapshot {
            manifest: Some(manifest),
            snapshot,
        })
    }

    /// Load the version named by the pointer, or an empty snapshot on cold start.
    pub fn load_current(&self) -> AppResult<LoadedSnapshot> {
        match self.current_version()? {
            Some(version) => self.load_version(version),
            None => Ok(LoadedSnapshot::default()),
        }
    }

    /// Write a new immutable version without touching the pointer.
    pub fn write_version(
        &self,
        snapshot: &Snapshot,
        parent: Option<VersionId>,
        now: DateTime<Utc>,
    ) -> AppResult<VersionManifest> {
        snapshot.validate(None)?;

        let latest_known = self.list_versions()?.last().copied().max(parent);
        let version = VersionId::next(latest_known, now);

        let vector_bytes = snapshot::encode_vectors(&snapshot.vectors);
        let metadata_bytes = snapshot::encode_metadata(&snapshot.metadata)?;

        let manifest = VersionManifest {
            version,
            created_at: now,
            row_count: snapshot.len(),
            dim: snapshot.vectors.dimension(),
            vector_snapshot_ref: version.artifact_key(VECTORS_FILE),
            metadata_snapshot_ref: version.artifact_key(METADATA_FILE),
            vector_sha256: sha256_hex(&vector_bytes),
            metadata_sha256: sha256_hex(&metadata_bytes),
            parent_version: parent,
        };

        self.store.put(&manifest.vector_snapshot_ref, &vector_bytes)?;
        self.store.put(&manifest.metadata_snapshot_ref, &metadata_bytes)?;
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        self.store.put(&version.artifact_key(MANIFEST_FILE), &manifest_bytes)?;

        tracing::info!(
            version = %version,
            rows = manifest.row_count,
            "Wrote version artifacts"
        );
        Ok(manifest)
    }

    /// Atomically make `version` current.
    pub fn point_to(&self, version: VersionId) -> AppResult<()> {
        let pointer = Pointer {
            current_version: version,
        };
        let bytes = serde_json::to_vec(&pointer)?;
        self.store.put(POINTER_KEY, &bytes)?;
        tracing::info!(version = %version, "Pointer updated");
        Ok(())
    }

    /// Write a version and then swap the pointer to it.
    ///
    /// Any failure before the pointer write leaves the current version untouched.
    pub fn publish(
        &self,
        snapshot: &Snapshot,
        parent: Option<VersionId>,
        now: DateTime<Utc>,
    ) -> AppResult<VersionManifest> {
        let manifest = self.write_version(snapshot, parent, now)?;
        self.point_to(manifest.version)?;
        Ok(manifest)
    }

    /// Re-point to an older retained version after verifying it loads cleanly.
    pub fn rollback(&self, version: VersionId) -> AppResult<VersionManifest> {
        let loaded = self.load_version(version)?;
        let manifest = loaded
            .manifest
            .ok_or_else(|| AppError::VersionNotFound(version.to_string()))?;
        self.point_to(version)?;
        tracing::warn!(version = %version, "Rolled back current version");
        Ok(manifest)
    }

    /// Every version with a manifest, ascending.
    pub fn list_versions(&self) -> AppResult<Vec<VersionId>> {
        let mut versions: Vec<VersionId> = self
            .store
            .list(VERSIONS_PREFIX)?
            .iter()
            .filter_map(|key| {
                let mut parts = key.split('/');
                match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(VERSIONS_PREFIX), Some(dir), Some(MANIFEST_FILE), None) => {
                        dir.parse::<VersionId>().ok()
                    }
                    _ => None,
                }
            })
            .collect();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }

    /// Manifests of every retained version, ascending.
    pub fn list_manifests(&self) -> AppResult<Vec<VersionManifest>> {
        self.list_versions()?
            .into_iter()
            .map(|v| self.load_manifest(v))
            .collect()
    }

    fn read_artifact(&self, key: &str) -> AppResult<Vec<u8>> {
        self.store
            .get(key)?
            .ok_or_else(|| AppError::Storage(format!("missing artifact {}", key)))
    }
}

fn verify_checksum(key: &str, bytes: &[u8], expected: &str) -> AppResult<()> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(AppError::Storage(format!(
            "checksum mismatch for {}: expected {}, got {}",
            key, expected, actual
        )));
    }
    Ok(())
}
