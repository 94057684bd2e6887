//! Incremental index builder.
//!
//! One run walks a fixed sequence of phases:
//!
//! ```text
//! LoadCurrent → DetermineWatermark → FetchDelta → Transform → Merge
//!   → Validate → WriteVersion → Publish → Done
//! ```
//!
//! Any error before `Publish` ends the run in `Failed` with the pointer
//! untouched, so readers keep the last good version. A run that finds no new
//! documents (or no usable fragments) ends in `Done` without writing anything.

use crate::chunker::Chunker;
use crate::digest;
use crate::embeddings::EmbeddingProvider;
use crate::progress::{BuildPhase, ProgressReporter};
use crate::sources::{BlobStore, DocumentSource};
use crate::types::{normalize_tickers, DateRange, FragmentRecord, SourceDocument};
use crate::version::{Snapshot, VersionCatalog, VersionId, VersionManifest};
use chrono::{DateTime, Utc};
use newsdex_core::config::BuildSettings;
use newsdex_core::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Per-run build options.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildOptions {
    /// Maximum number of delta documents fetched
    pub limit: Option<usize>,

    /// Only fetch documents whose timestamps fall in this range
    pub window: Option<DateRange>,

    /// Inline bodies shorter than this are replaced from the blob store or skipped
    pub min_body_chars: usize,

    /// Fragments per embedding call
    pub batch_size: usize,

    /// Stop after fetching and report the delta size
    pub dry_run: bool,

    /// Ignore the current version's rows and watermark and re-index every
    /// source document into a fresh version
    pub full_rebuild: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from_settings(&BuildSettings::default(), Utc::now())
    }
}

impl BuildOptions {
    pub fn from_settings(settings: &BuildSettings, now: DateTime<Utc>) -> Self {
        Self {
            limit: Some(settings.limit),
            window: settings.window_days.map(|days| DateRange::last_days(now, days)),
            min_body_chars: settings.min_body_chars,
            batch_size: settings.batch_size,
            dry_run: false,
            full_rebuild: false,
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// Nothing new to index; no version written
    NoNewDocuments,

    /// Dry run: the delta was fetched and counted only
    DryRun { delta_documents: usize },

    /// A new version was written and made current
    Published { manifest: VersionManifest },
}

/// Summary of one build run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub run_id: String,
    pub phase: BuildPhase,
    pub outcome: BuildOutcome,
    pub watermark: Option<DateTime<Utc>>,
    pub fetched: usize,
    pub accepted: usize,
    pub skipped: usize,
    pub fragments: usize,
    pub warnings: Vec<String>,
    pub rows_before: usize,
    pub rows_after: usize,
    pub version: Option<VersionId>,
    pub elapsed_ms: u64,
}

/// Mutable bookkeeping for one run.
struct BuildRun {
    run_id: String,
    started: Instant,
    phase: BuildPhase,
    watermark: Option<DateTime<Utc>>,
    fetched: usize,
    accepted: usize,
    skipped: usize,
    fragments: usize,
    warnings: Vec<String>,
    rows_before: usize,
    rows_after: usize,
}

impl BuildRun {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            started: Instant::now(),
            phase: BuildPhase::LoadCurrent,
            watermark: None,
            fetched: 0,
            accepted: 0,
            skipped: 0,
            fragments: 0,
            warnings: Vec::new(),
            rows_before: 0,
            rows_after: 0,
        }
    }

    fn skip(&mut self, document_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(document_id = %document_id, reason = %reason, "Skipping document");
        self.skipped += 1;
        self.warnings.push(format!("{}: {}", document_id, reason));
    }

    fn into_report(self, outcome: BuildOutcome) -> BuildReport {
        let version = match &outcome {
            BuildOutcome::Published { manifest } => Some(manifest.version),
            _ => None,
        };
        BuildReport {
            run_id: self.run_id,
            phase: self.phase,
            outcome,
            watermark: self.watermark,
            fetched: self.fetched,
            accepted: self.accepted,
            skipped: self.skipped,
            fragments: self.fragments,
            warnings: self.warnings,
            rows_before: self.rows_before,
            rows_after: self.rows_after,
            version,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// A fragment waiting for its embedding.
struct PendingFragment {
    record: FragmentRecord,
}

/// Merges new documents into a new immutable version.
///
/// At most one build runs at a time against an artifact store, across
/// builders and processes; a concurrent call is rejected with
/// [`AppError::BuildInProgress`] rather than queued.
pub struct IncrementalBuilder {
    catalog: VersionCatalog,
    source: Arc<dyn DocumentSource>,
    blobs: Arc<dyn BlobStore>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn EmbeddingProvider>,
    progress: ProgressReporter,
    in_flight: tokio::sync::Mutex<()>,
}

impl IncrementalBuilder {
    pub fn new(
        catalog: VersionCatalog,
        source: Arc<dyn DocumentSource>,
        blobs: Arc<dyn BlobStore>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            catalog,
            source,
            blobs,
            chunker,
            embedder,
            progress: ProgressReporter::noop(),
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    /// Run one build using the wall clock for the new version id.
    pub async fn build(&self, options: &BuildOptions) -> AppResult<BuildReport> {
        self.build_at(options, Utc::now()).await
    }

    /// Run one build, stamping any new version with `now`.
    pub async fn build_at(&self, options: &BuildOptions, now: DateTime<Utc>) -> AppResult<BuildReport> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            tracing::warn!("Rejected build: another build is in progress");
            AppError::BuildInProgress
        })?;
        let _lock = self.catalog.store().lock_builds()?;

        let mut run = BuildRun::new(uuid::Uuid::new_v4().to_string());
        let span = tracing::info_span!("build", run_id = %run.run_id);

        let result = self.execute(&mut run, options, now).instrument(span).await;
        match result {
            Ok(outcome) => {
                run.phase = BuildPhase::Done;
                self.progress.phase(BuildPhase::Done, "build finished");
                let report = run.into_report(outcome);
                tracing::info!(
                    run_id = %report.run_id,
                    fetched = report.fetched,
                    accepted = report.accepted,
                    skipped = report.skipped,
                    rows_before = report.rows_before,
                    rows_after = report.rows_after,
                    version = ?report.version,
                    elapsed_ms = report.elapsed_ms,
                    "Build finished"
                );
                Ok(report)
            }
            Err(e) => {
                let failed_in = run.phase;
                run.phase = BuildPhase::Failed;
                self.progress
                    .phase(BuildPhase::Failed, format!("failed in {}: {}", failed_in, e));
                if e.is_invariant_violation() {
                    tracing::error!(run_id = %run.run_id, phase = %failed_in, error = %e, "Build refused: invariant violated");
                } else {
                    tracing::error!(run_id = %run.run_id, phase = %failed_in, error = %e, "Build failed");
                }
                Err(e)
            }
        }
    }

    fn enter(&self, run: &mut BuildRun, phase: BuildPhase, message: impl Into<String>) {
        run.phase = phase;
        let message = message.into();
        tracing::info!(phase = %phase, "{}", message);
        self.progress.phase(phase, message);
    }

    async fn execute(
        &self,
        run: &mut BuildRun,
        options: &BuildOptions,
        now: DateTime<Utc>,
    ) -> AppResult<BuildOutcome> {
        self.enter(run, BuildPhase::LoadCurrent, "loading current version");
        let current = self.catalog.load_current()?;
        let parent = current.version();
        // a full rebuild starts empty and may change the embedding dimension
        let (base, prior_dim) = if options.full_rebuild {
            tracing::info!(parent = ?parent, rows = current.snapshot.len(), "Full rebuild requested");
            (Snapshot::default(), None)
        } else {
            let dim = current.snapshot.vectors.dimension();
            (current.snapshot, dim)
        };
        run.rows_before = base.len();
        run.rows_after = run.rows_before;

        self.enter(run, BuildPhase::DetermineWatermark, "deriving watermark");
        run.watermark = base.metadata.watermark();
        match run.watermark {
            Some(ts) => tracing::info!(watermark = %ts, "Resuming after watermark"),
            None => tracing::info!("No watermark, indexing all documents"),
        }

        self.enter(run, BuildPhase::FetchDelta, "fetching new documents");
        let documents = self
            .source
            .fetch_since(run.watermark, options.window.as_ref(), options.limit)
            .await?;
        run.fetched = documents.len();
        self.progress
            .fetch(run.fetched as u64, options.limit.map(|l| l as u64));

        if options.dry_run {
            return Ok(BuildOutcome::DryRun {
                delta_documents: run.fetched,
            });
        }
        if documents.is_empty() {
            tracing::info!("No new documents");
            return Ok(BuildOutcome::NoNewDocuments);
        }

        self.enter(run, BuildPhase::Transform, "chunking and embedding");
        let pending = self.transform(run, &documents, options).await;
        if pending.is_empty() {
            tracing::info!("No fragments produced from the delta");
            return Ok(BuildOutcome::NoNewDocuments);
        }
        let vectors = self.embed_all(&pending, options.batch_size).await?;

        self.enter(run, BuildPhase::Merge, "appending fragments");
        let mut next: Snapshot = base;
        let vector_start = next.vectors.add(&vectors)?;
        let metadata_start = next
            .metadata
            .append(pending.into_iter().map(|p| p.record).collect());
        if vector_start != metadata_start || vector_start != run.rows_before {
            return Err(AppError::Invariant(format!(
                "append offsets disagree: vectors at {}, metadata at {}, previous rows {}",
                vector_start, metadata_start, run.rows_before
            )));
        }

        self.enter(run, BuildPhase::Validate, "validating merged version");
        next.validate(prior_dim)?;
        run.rows_after = next.len();

        self.enter(run, BuildPhase::WriteVersion, "writing version artifacts");
        let manifest = self.catalog.write_version(&next, parent, now)?;

        self.enter(run, BuildPhase::Publish, "swapping pointer");
        self.catalog.point_to(manifest.version)?;

        Ok(BuildOutcome::Published { manifest })
    }

    /// Resolve bodies and chunk every document, skipping the ones that cannot be used.
    async fn transform(
        &self,
        run: &mut BuildRun,
        documents: &[SourceDocument],
        options: &BuildOptions,
    ) -> Vec<PendingFragment> {
        let mut pending = Vec::new();
        let total = documents.len() as u64;

        for (i, doc) in documents.iter().enumerate() {
            let Some(body) = self.resolve_body(run, doc, options.min_body_chars).await else {
                continue;
            };

            let fragments = self.chunker.split(&doc.title, &body);
            if fragments.is_empty() {
                run.skip(&doc.id, "no fragments after cleaning");
                continue;
            }

            let tickers = normalize_tickers(&doc.tickers);
            for (sequence, fragment) in fragments.into_iter().enumerate() {
                let sequence = sequence as u32;
                pending.push(PendingFragment {
                    record: FragmentRecord {
                        row_index: 0,
                        fragment_id: digest::fragment_id(&doc.id, sequence),
                        document_id: doc.id.clone(),
                        fragment_sequence: sequence,
                        token_count: fragment.token_count,
                        title: doc.title.clone(),
                        source: doc.source.clone(),
                        url: doc.url.clone(),
                        tickers: tickers.clone(),
                        published_at: doc.published_at,
                        fetched_at: doc.fetched_at,
                        raw_body_ref: doc.body_ref.clone(),
                        text: fragment.text,
                    },
                });
            }
            run.accepted += 1;
            self.progress
                .transform(i as u64 + 1, total, pending.len() as u64);
        }

        run.fragments = pending.len();
        tracing::info!(
            accepted = run.accepted,
            skipped = run.skipped,
            fragments = run.fragments,
            "Transformed delta"
        );
        pending
    }

    /// Body to index for `doc`, or `None` (with the skip recorded) when unusable.
    async fn resolve_body(
        &self,
        run: &mut BuildRun,
        doc: &SourceDocument,
        min_body_chars: usize,
    ) -> Option<String> {
        let inline = doc.body.as_deref().unwrap_or("").trim();
        if doc.title.trim().is_empty() && inline.is_empty() && doc.body_ref.is_none() {
            run.skip(&doc.id, "malformed: no title, body or body reference");
            return None;
        }

        let mut body = inline.to_string();
        if body.chars().count() < min_body_chars {
            if let Some(body_ref) = &doc.body_ref {
                match self.blobs.get(body_ref).await {
                    Ok(fetched) => {
                        if fetched.trim().chars().count() > body.chars().count() {
                            body = fetched.trim().to_string();
                        }
                    }
                    Err(e) => {
                        run.skip(&doc.id, format!("body fetch failed: {}", e));
                        return None;
                    }
                }
            }
        }

        let length = body.chars().count();
        if length < min_body_chars {
            run.skip(
                &doc.id,
                format!("body too short ({} < {} chars)", length, min_body_chars),
            );
            return None;
        }
        Some(body)
    }

    /// Embed every pending fragment in batches; any failing batch aborts the run.
    async fn embed_all(&self, pending: &[PendingFragment], batch_size: usize) -> AppResult<Vec<Vec<f32>>> {
        let batch_size = batch_size.max(1);
        let total = pending.len() as u64;
        let mut vectors = Vec::with_capacity(pending.len());

        for batch in pending.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.record.text.clone()).collect();
            let embedded = self.embedder.embed_batch(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(AppError::Embedding(format!(
                    "embedder returned {} vectors for a batch of {}",
                    embedded.len(),
                    texts.len()
                )));
            }
            vectors.extend(embedded);
            self.progress
                .embed(vectors.len() as u64, total, self.embedder.model_name());
        }

        tracing::debug!(
            vectors = vectors.len(),
            provider = self.embedder.provider_name(),
            "Embedded fragments"
        );
        Ok(vectors)
    }
}
