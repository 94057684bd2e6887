//! JSON-lines import records for loading raw documents into a source.
//!
//! Accepts the field names used by the upstream ingestion job (`doc_id`,
//! `published_utc`, `s3_key`, `matched_tickers`, `query_ticker`) alongside
//! the canonical ones.

use crate::types::{normalize_tickers, SourceDocument};
use chrono::{DateTime, Utc};
use newsdex_core::{AppError, AppResult};
use serde::Deserialize;

/// A ticker field given either as one symbol or a list of symbols.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TickerField {
    One(String),
    Many(Vec<String>),
}

impl TickerField {
    fn into_vec(self) -> Vec<String> {
        match self {
            TickerField::One(t) => vec![t],
            TickerField::Many(ts) => ts,
        }
    }
}

/// One line of an import file.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRecord {
    #[serde(alias = "doc_id")]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub body: Option<String>,

    #[serde(default, alias = "s3_key")]
    pub body_ref: Option<String>,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    tickers: Option<TickerField>,

    #[serde(default)]
    matched_tickers: Option<TickerField>,

    #[serde(default)]
    query_ticker: Option<TickerField>,

    #[serde(alias = "published_utc")]
    pub published_at: DateTime<Utc>,

    /// Defaults to `published_at` when absent
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ImportRecord {
    /// Parse one JSON line.
    pub fn parse_line(line: &str) -> AppResult<Self> {
        serde_json::from_str(line)
            .map_err(|e| AppError::Source(format!("invalid import record: {}", e)))
    }

    /// Convert to a source document, merging and normalizing every ticker field.
    pub fn into_document(self) -> SourceDocument {
        let tickers = normalize_tickers(
            [self.tickers, self.matched_tickers, self.query_ticker]
                .into_iter()
                .flatten()
                .flat_map(TickerField::into_vec),
        );

        SourceDocument {
            id: self.id,
            title: self.title.trim().to_string(),
            body: self.body.filter(|b| !b.trim().is_empty()),
            body_ref: self.body_ref.filter(|r| !r.trim().is_empty()),
            source: self.source,
            url: self.url,
            tickers,
            fetched_at: self.fetched_at.unwrap_or(self.published_at),
            published_at: self.published_at,
        }
    }
}
