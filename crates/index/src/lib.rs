//! Versioned vector index for financial news retrieval.
//!
//! Documents are pulled incrementally from a [`DocumentSource`], split into
//! fragments, embedded, and appended to an immutable snapshot. Every build
//! publishes a new version behind a single atomic pointer; the
//! [`SearchEngine`] serves exact top-k cosine search over the active version
//! with optional ticker and date pre-filtering.

pub mod builder;
pub mod chunker;
pub mod digest;
pub mod embeddings;
pub mod filter;
pub mod metadata_table;
pub mod progress;
pub mod search;
pub mod snapshot;
pub mod sources;
pub mod store;
pub mod types;
pub mod vector_store;
pub mod version;

#[cfg(test)]
mod tests;

pub use builder::{BuildOptions, BuildOutcome, BuildReport, IncrementalBuilder};
pub use chunker::{Chunker, TextChunker};
pub use embeddings::{create_provider, EmbeddingProvider};
pub use filter::{CandidateFilter, CandidateSet, FallbackReason, FilterQuery};
pub use metadata_table::MetadataTable;
pub use progress::{BuildPhase, ProgressEvent, ProgressReporter};
pub use search::{EngineStatus, LoadedVersion, SearchEngine, SearchHit, SearchQuery, SearchResponse};
pub use sources::{BlobStore, DocumentSource, FsBlobStore, SqliteDocumentSource};
pub use store::{ArtifactStore, BuildLock, FsArtifactStore};
pub use types::{DateRange, FragmentRecord, SourceDocument};
pub use vector_store::{ScoredRow, VectorStore};
pub use version::{Snapshot, VersionCatalog, VersionId, VersionManifest};
