//! Query-side engine: the active version, its candidate filter, and top-k search.
//!
//! The active version is held behind an [`ArcSwap`]. A reload builds the next
//! version's structures completely before swapping them in; queries already
//! running keep the `Arc` they loaded and never observe a half-built state.

use crate::filter::{CandidateFilter, CandidateSet, FallbackReason, FilterQuery};
use crate::types::{DateRange, FragmentRecord};
use crate::vector_store::ScoredRow;
use crate::version::{LoadedSnapshot, Snapshot, VersionCatalog, VersionId, VersionManifest};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use newsdex_core::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// An immutable loaded version plus its derived filter.
#[derive(Debug, Default)]
pub struct LoadedVersion {
    pub manifest: Option<VersionManifest>,
    pub snapshot: Snapshot,
    pub filter: CandidateFilter,
}

impl LoadedVersion {
    pub fn from_snapshot(loaded: LoadedSnapshot) -> Self {
        let filter = CandidateFilter::build(&loaded.snapshot.metadata);
        Self {
            manifest: loaded.manifest,
            snapshot: loaded.snapshot,
            filter,
        }
    }

    pub fn version(&self) -> Option<VersionId> {
        self.manifest.as_ref().map(|m| m.version)
    }
}

/// A top-k query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub tickers: Vec<String>,
    pub date_range: Option<DateRange>,
    pub use_filter: bool,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            vector,
            top_k,
            tickers: Vec::new(),
            date_range: None,
            use_filter: true,
        }
    }

    pub fn with_tickers(mut self, tickers: Vec<String>) -> Self {
        self.tickers = tickers;
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn without_filter(mut self) -> Self {
        self.use_filter = false;
        self
    }

    fn filter_query(&self) -> FilterQuery {
        FilterQuery {
            tickers: self.tickers.clone(),
            date_range: self.date_range,
            use_filter: self.use_filter,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub row_index: usize,
    pub score: f32,
    pub fragment: FragmentRecord,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SearchTimings {
    pub filter_ms: f64,
    pub search_ms: f64,
    pub total_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub version: Option<VersionId>,
    pub hits: Vec<SearchHit>,
    /// `none`, `filtered` or `fallback_full`
    pub filter_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub timings: SearchTimings,
}

/// Summary of the active version.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: Option<VersionId>,
    pub created_at: Option<DateTime<Utc>>,
    pub rows: usize,
    pub dim: Option<usize>,
    pub documents: usize,
    pub tickers: usize,
    pub latest_published: Option<DateTime<Utc>>,
}

pub struct SearchEngine {
    catalog: VersionCatalog,
    active: ArcSwap<LoadedVersion>,
    max_candidates: usize,
}

impl SearchEngine {
    /// Engine serving an empty index until the first reload.
    pub fn new(catalog: VersionCatalog, max_candidates: usize) -> Self {
        Self {
            catalog,
            active: ArcSwap::from_pointee(LoadedVersion::default()),
            max_candidates,
        }
    }

    /// Engine serving the catalog's current version.
    pub fn open(catalog: VersionCatalog, max_candidates: usize) -> AppResult<Self> {
        let engine = Self::new(catalog, max_candidates);
        engine.reload()?;
        Ok(engine)
    }

    /// Load whatever the pointer names and swap it in.
    ///
    /// A failed load leaves the previously active version serving.
    pub fn reload(&self) -> AppResult<Option<VersionId>> {
        let current = self.catalog.current_version()?;
        if current.is_some() && current == self.active.load().version() {
            return Ok(current);
        }

        let loaded = match current {
            Some(version) => self.catalog.load_version(version)?,
            None => LoadedSnapshot::default(),
        };
        Ok(self.install(LoadedVersion::from_snapshot(loaded)))
    }

    /// Swap in a fully built version.
    pub fn install(&self, next: LoadedVersion) -> Option<VersionId> {
        let version = next.version();
        let rows = next.snapshot.len();
        let previous = self.active.swap(Arc::new(next));
        tracing::info!(
            version = ?version,
            previous = ?previous.version(),
            rows,
            "Activated index version"
        );
        version
    }

    /// The version queries currently run against.
    pub fn active(&self) -> Arc<LoadedVersion> {
        self.active.load_full()
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    pub fn search(&self, query: &SearchQuery) -> AppResult<SearchResponse> {
        let started = Instant::now();
        let active = self.active.load_full();

        let filter_started = Instant::now();
        let candidates = active
            .filter
            .candidates(&query.filter_query(), self.max_candidates);
        let filter_ms = elapsed_ms(filter_started);

        let search_started = Instant::now();
        let scored: Vec<ScoredRow> = match &candidates {
            CandidateSet::Filtered(rows) => {
                active
                    .snapshot
                    .vectors
                    .score_rows(&query.vector, rows, query.top_k)?
            }
            CandidateSet::NoFilter | CandidateSet::FallbackToFull(_) => {
                active.snapshot.vectors.search(&query.vector, query.top_k)?
            }
        };
        let search_ms = elapsed_ms(search_started);

        let hits = scored
            .into_iter()
            .map(|hit| {
                let fragment = active.snapshot.metadata.get(hit.row_index).cloned().ok_or_else(|| {
                    AppError::Invariant(format!(
                        "row {} has a vector but no metadata",
                        hit.row_index
                    ))
                })?;
                Ok(SearchHit {
                    row_index: hit.row_index,
                    score: hit.score,
                    fragment,
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        let fallback_reason = match &candidates {
            CandidateSet::FallbackToFull(reason) => {
                tracing::debug!(reason = %reason, "Filter fell back to full search");
                Some(*reason)
            }
            _ => None,
        };

        let timings = SearchTimings {
            filter_ms,
            search_ms,
            total_ms: elapsed_ms(started),
        };
        tracing::debug!(
            hits = hits.len(),
            mode = candidates.mode(),
            filter_ms,
            search_ms,
            "Search completed"
        );

        Ok(SearchResponse {
            version: active.version(),
            hits,
            filter_mode: candidates.mode(),
            candidate_count: candidates.candidate_count(),
            fallback_reason,
            timings,
        })
    }

    pub fn status(&self) -> EngineStatus {
        let active = self.active.load();
        let metadata = &active.snapshot.metadata;
        EngineStatus {
            version: active.version(),
            created_at: active.manifest.as_ref().map(|m| m.created_at),
            rows: active.snapshot.len(),
            dim: active.snapshot.vectors.dimension(),
            documents: metadata.document_count(),
            tickers: active.filter.ticker_count(),
            latest_published: metadata.iter().map(|r| r.published_at).max(),
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsArtifactStore;
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn record(ticker: &str, day: u32) -> FragmentRecord {
        FragmentRecord {
            row_index: 0,
            fragment_id: format!("{}-{}", ticker, day),
            document_id: format!("doc-{}-{}", ticker, day),
            fragment_sequence: 0,
            token_count: 5,
            title: format!("{} news", ticker),
            source: "wire".to_string(),
            url: String::new(),
            tickers: BTreeSet::from([ticker.to_string()]),
            published_at: Utc.with_ymd_and_hms(2024, 9, day, 0, 0, 0).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2024, 9, day, 1, 0, 0).unwrap(),
            raw_body_ref: None,
            text: String::new(),
        }
    }

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0; 3];
        v[i] = 1.0;
        v
    }

    fn published_catalog(dir: &TempDir) -> VersionCatalog {
        let catalog = VersionCatalog::new(Arc::new(FsArtifactStore::new(dir.path())));
        let mut snapshot = Snapshot::default();
        snapshot
            .vectors
            .add(&[axis(0), axis(1), axis(0), axis(2)])
            .unwrap();
        snapshot.metadata.append(vec![
            record("AAPL", 1),
            record("MSFT", 2),
            record("MSFT", 3),
            record("AAPL", 4),
        ]);
        catalog
            .publish(&snapshot, None, Utc.with_ymd_and_hms(2024, 9, 5, 0, 0, 0).unwrap())
            .unwrap();
        catalog
    }

    #[test]
    fn test_empty_engine() {
        let dir = TempDir::new().unwrap();
        let catalog = VersionCatalog::new(Arc::new(FsArtifactStore::new(dir.path())));
        let engine = SearchEngine::open(catalog, 5000).unwrap();

        let response = engine.search(&SearchQuery::new(axis(0), 5)).unwrap();
        assert!(response.hits.is_empty());
        assert_eq!(response.version, None);
        assert_eq!(engine.status().rows, 0);
    }

    #[test]
    fn test_unfiltered_search_joins_metadata() {
        let dir = TempDir::new().unwrap();
        let engine = SearchEngine::open(published_catalog(&dir), 5000).unwrap();

        let response = engine.search(&SearchQuery::new(axis(0), 2)).unwrap();
        assert_eq!(response.filter_mode, "none");
        let rows: Vec<usize> = response.hits.iter().map(|h| h.row_index).collect();
        assert_eq!(rows, vec![0, 2]);
        assert_eq!(response.hits[1].fragment.document_id, "doc-MSFT-3");
        assert!(response.timings.total_ms >= response.timings.search_ms);
    }

    #[test]
    fn test_filtered_search() {
        let dir = TempDir::new().unwrap();
        let engine = SearchEngine::open(published_catalog(&dir), 5000).unwrap();

        let query = SearchQuery::new(axis(0), 2).with_tickers(vec!["msft".to_string()]);
        let response = engine.search(&query).unwrap();
        assert_eq!(response.filter_mode, "filtered");
        assert_eq!(response.candidate_count, Some(2));
        let rows: Vec<usize> = response.hits.iter().map(|h| h.row_index).collect();
        assert_eq!(rows, vec![2, 1]);
    }

    #[test]
    fn test_unbounded_top_k() {
        let dir = TempDir::new().unwrap();
        let engine = SearchEngine::open(published_catalog(&dir), 5000).unwrap();

        let all = engine.search(&SearchQuery::new(axis(0), usize::MAX)).unwrap();
        assert_eq!(all.hits.len(), 4);

        let query = SearchQuery::new(axis(0), usize::MAX).with_tickers(vec!["AAPL".to_string()]);
        let filtered = engine.search(&query).unwrap();
        let rows: Vec<usize> = filtered.hits.iter().map(|h| h.row_index).collect();
        assert_eq!(rows, vec![0, 3]);
    }

    #[test]
    fn test_fallback_matches_unfiltered() {
        let dir = TempDir::new().unwrap();
        let engine = SearchEngine::open(published_catalog(&dir), 1).unwrap();

        let baseline = engine.search(&SearchQuery::new(axis(0), 3)).unwrap();
        let fallback = engine
            .search(&SearchQuery::new(axis(0), 3).with_tickers(vec!["AAPL".to_string()]))
            .unwrap();

        assert_eq!(fallback.filter_mode, "fallback_full");
        assert_eq!(
            fallback.fallback_reason,
            Some(FallbackReason::TooMany {
                count: 2,
                ceiling: 1
            })
        );
        let a: Vec<(usize, f32)> = baseline.hits.iter().map(|h| (h.row_index, h.score)).collect();
        let b: Vec<(usize, f32)> = fallback.hits.iter().map(|h| (h.row_index, h.score)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_status_and_reload() {
        let dir = TempDir::new().unwrap();
        let catalog = published_catalog(&dir);
        let engine = SearchEngine::new(catalog.clone(), 5000);
        assert_eq!(engine.status().version, None);

        let held = engine.active();
        let version = engine.reload().unwrap();
        assert!(version.is_some());
        // a reader holding the old Arc still sees the old version
        assert_eq!(held.version(), None);

        let status = engine.status();
        assert_eq!(status.version, version);
        assert_eq!(status.rows, 4);
        assert_eq!(status.dim, Some(3));
        assert_eq!(status.tickers, 2);
        assert_eq!(status.documents, 4);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let engine = SearchEngine::open(published_catalog(&dir), 5000).unwrap();
        let result = engine.search(&SearchQuery::new(vec![1.0, 0.0], 1));
        assert!(matches!(result, Err(AppError::DimensionMismatch { .. })));
    }
}
