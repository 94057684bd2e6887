//! In-memory document source and blob store.

use super::{delta_order, BlobError, BlobStore, DocumentSource};
use crate::types::{DateRange, SourceDocument};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsdex_core::{AppError, AppResult};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Document source backed by a vector of documents.
#[derive(Debug, Default)]
pub struct MemoryDocumentSource {
    documents: RwLock<Vec<SourceDocument>>,
}

impl MemoryDocumentSource {
    pub fn new(documents: Vec<SourceDocument>) -> Self {
        Self {
            documents: RwLock::new(documents),
        }
    }

    pub fn push(&self, document: SourceDocument) {
        if let Ok(mut docs) = self.documents.write() {
            docs.push(document);
        }
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn fetch_since(
        &self,
        watermark: Option<DateTime<Utc>>,
        window: Option<&DateRange>,
        limit: Option<usize>,
    ) -> AppResult<Vec<SourceDocument>> {
        let docs = self
            .documents
            .read()
            .map_err(|_| AppError::Source("document list lock poisoned".to_string()))?;

        let mut delta: Vec<SourceDocument> = docs
            .iter()
            .filter(|d| d.is_newer_than(watermark))
            .filter(|d| window.map_or(true, |w| d.overlaps(w)))
            .cloned()
            .collect();
        delta.sort_by(delta_order);
        if let Some(limit) = limit {
            delta.truncate(limit);
        }
        Ok(delta)
    }
}

/// Blob store backed by a map, with optional injected I/O failures.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, String>>,
    failing: RwLock<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, body_ref: impl Into<String>, body: impl Into<String>) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(body_ref.into(), body.into());
        }
    }

    /// Make every `get` for `body_ref` fail with an I/O error.
    pub fn fail_on(&self, body_ref: impl Into<String>) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(body_ref.into());
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, body_ref: &str) -> Result<String, BlobError> {
        let injected = self
            .failing
            .read()
            .map(|f| f.contains(body_ref))
            .unwrap_or(false);
        if injected {
            return Err(BlobError::Io {
                key: body_ref.to_string(),
                message: "injected failure".to_string(),
            });
        }

        let blobs = self.blobs.read().map_err(|_| BlobError::Io {
            key: body_ref.to_string(),
            message: "blob map lock poisoned".to_string(),
        })?;
        blobs
            .get(body_ref)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(body_ref.to_string()))
    }
}
