//! Import command handler.
//!
//! Loads raw documents from a JSON-lines file into the SQLite document
//! database that builds read from.

use clap::Args;
use newsdex_core::{config::AppConfig, AppError, AppResult};
use newsdex_index::sources::ImportRecord;
use newsdex_index::SqliteDocumentSource;
use std::path::{Path, PathBuf};

/// Import raw documents from a JSON-lines file
#[derive(Args, Debug)]
pub struct ImportCommand {
    /// JSON-lines file, one document per line
    pub path: PathBuf,

    /// Abort on the first malformed line instead of skipping it
    #[arg(long)]
    pub strict: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Counts from one import.
#[derive(Debug, Default, PartialEq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
    pub total_documents: usize,
}

impl ImportCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing import command for {:?}", self.path);

        let source = SqliteDocumentSource::open(&config.documents_db_path())?;
        let summary = import_file(&source, &self.path, self.strict)?;

        if self.json {
            let output = serde_json::json!({
                "path": self.path,
                "imported": summary.imported,
                "skipped": summary.skipped,
                "totalDocuments": summary.total_documents,
            });
            super::print_json(&output)?;
        } else {
            println!(
                "Imported {} documents ({} skipped); database now holds {}",
                summary.imported, summary.skipped, summary.total_documents
            );
        }

        Ok(())
    }
}

/// Parse every line of `path` and upsert the documents into `source`.
pub fn import_file(source: &SqliteDocumentSource, path: &Path, strict: bool) -> AppResult<ImportSummary> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AppError::Source(format!("Failed to read {:?}: {}", path, e)))?;

    let mut documents = Vec::new();
    let mut skipped = 0;
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match ImportRecord::parse_line(line) {
            Ok(record) => documents.push(record.into_document()),
            Err(e) if strict => {
                return Err(AppError::Source(format!("line {}: {}", line_no + 1, e)));
            }
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "Skipping malformed import line");
                skipped += 1;
            }
        }
    }

    let imported = source.insert_documents(&documents)?;
    Ok(ImportSummary {
        imported,
        skipped,
        total_documents: source.count()?,
    })
}
