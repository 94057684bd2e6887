//! Collaborators that supply raw documents and their externally stored bodies.

pub mod fs_blob;
pub mod import;
pub mod memory;
pub mod sqlite;

use crate::types::{DateRange, SourceDocument};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsdex_core::AppResult;
use thiserror::Error;

pub use fs_blob::FsBlobStore;
pub use import::ImportRecord;
pub use memory::{MemoryBlobStore, MemoryDocumentSource};
pub use sqlite::SqliteDocumentSource;

/// Supplies raw documents newer than a watermark.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Documents with `published_at` or `fetched_at` strictly after
    /// `watermark` (all documents when `None`), restricted to `window` when
    /// given, at most `limit` of them.
    ///
    /// Results are ordered by the later of the two timestamps, then by id,
    /// so repeated calls with the same arguments return the same sequence.
    async fn fetch_since(
        &self,
        watermark: Option<DateTime<Utc>>,
        window: Option<&DateRange>,
        limit: Option<usize>,
    ) -> AppResult<Vec<SourceDocument>>;
}

/// Errors from fetching an externally stored body.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob I/O error for {key}: {message}")]
    Io { key: String, message: String },
}

/// Fetches document bodies by reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, body_ref: &str) -> Result<String, BlobError>;
}

/// Ordering shared by the in-process sources.
pub(crate) fn delta_order(a: &SourceDocument, b: &SourceDocument) -> std::cmp::Ordering {
    let ka = a.published_at.max(a.fetched_at);
    let kb = b.published_at.max(b.fetched_at);
    ka.cmp(&kb).then_with(|| a.id.cmp(&b.id))
}
