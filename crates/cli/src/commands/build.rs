//! Build command handler.
//!
//! Runs one incremental build against the workspace's document database and
//! publishes the result as a new version.

use super::open_catalog;
use chrono::Utc;
use clap::Args;
use newsdex_core::{config::AppConfig, AppResult};
use newsdex_index::{
    create_provider, BuildOptions, BuildOutcome, DateRange, FsBlobStore, IncrementalBuilder,
    ProgressEvent, ProgressReporter, SqliteDocumentSource, TextChunker,
};
use std::sync::Arc;

/// Run one incremental build
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Fetch and count the delta without writing a version
    #[arg(long)]
    pub dry_run: bool,

    /// Re-index every source document into a fresh version instead of
    /// appending to the current one
    #[arg(long)]
    pub full: bool,

    /// Maximum number of new documents to ingest
    #[arg(long)]
    pub limit: Option<usize>,

    /// Only ingest documents from the last N days
    #[arg(long)]
    pub window_days: Option<u32>,

    /// Bodies shorter than this are fetched from the blob store or skipped
    #[arg(long)]
    pub min_body_chars: Option<usize>,

    /// Fragments per embedding call
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Print progress events to stderr
    #[arg(long)]
    pub progress: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl BuildCommand {
    fn options(&self, config: &AppConfig) -> BuildOptions {
        let now = Utc::now();
        let mut options = BuildOptions::from_settings(&config.build, now);
        if let Some(limit) = self.limit {
            options.limit = Some(limit);
        }
        if let Some(days) = self.window_days {
            options.window = Some(DateRange::last_days(now, days));
        }
        if let Some(min) = self.min_body_chars {
            options.min_body_chars = min;
        }
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        options.dry_run = self.dry_run;
        options.full_rebuild = self.full;
        options
    }

    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing build command");
        tracing::debug!("Build options: {:?}", self);

        let source = SqliteDocumentSource::open(&config.documents_db_path())?;
        let embedder = create_provider(&config.embedding)?;
        let chunker = TextChunker::new(&config.chunking)?;

        let mut builder = IncrementalBuilder::new(
            open_catalog(config),
            Arc::new(source),
            Arc::new(FsBlobStore::new(config.blob_root())),
            Arc::new(chunker),
            embedder,
        );
        if self.progress {
            builder = builder.with_progress(ProgressReporter::new(Arc::new(|event: ProgressEvent| {
                eprintln!("{}", event.format_simple());
            })));
        }

        let report = builder.build(&self.options(config)).await?;

        if self.json {
            return super::print_json(&report);
        }

        match &report.outcome {
            BuildOutcome::NoNewDocuments => {
                println!("No new documents; current version unchanged");
            }
            BuildOutcome::DryRun { delta_documents } => {
                println!(
                    "Dry run: {} new documents since {}",
                    delta_documents,
                    report
                        .watermark
                        .map(|w| w.to_rfc3339())
                        .unwrap_or_else(|| "the beginning".to_string())
                );
            }
            BuildOutcome::Published { manifest } if self.full => {
                println!(
                    "Rebuilt {} with {} rows from {} documents (replaces {})",
                    manifest.version,
                    manifest.row_count,
                    report.accepted,
                    manifest
                        .parent_version
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "nothing".to_string())
                );
            }
            BuildOutcome::Published { manifest } => {
                println!(
                    "Published {} with {} rows (+{}) from {} documents",
                    manifest.version,
                    manifest.row_count,
                    report.rows_after - report.rows_before,
                    report.accepted
                );
            }
        }
        if report.skipped > 0 {
            println!("Skipped {} documents:", report.skipped);
            for warning in &report.warnings {
                println!("  {}", warning);
            }
        }

        Ok(())
    }
}
