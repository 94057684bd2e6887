//! Record types shared across the index engine.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One row of the metadata table.
///
/// `row_index` is the physical position of the fragment's embedding in the
/// vector store of the same version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentRecord {
    /// Dense, zero-based position in the version
    pub row_index: usize,

    /// Stable fragment identifier derived from document id and sequence
    pub fragment_id: String,

    /// Source document identifier
    pub document_id: String,

    /// Position of the fragment within its source document
    pub fragment_sequence: u32,

    /// Approximate token count of `text`
    pub token_count: u32,

    pub title: String,
    pub source: String,
    pub url: String,

    /// Normalized (upper-case) ticker symbols
    pub tickers: BTreeSet<String>,

    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,

    /// Pointer to the externally stored body, when the document had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body_ref: Option<String>,

    /// Fragment text, kept for snippets
    #[serde(default)]
    pub text: String,
}

impl FragmentRecord {
    /// Latest of `published_at` and `fetched_at`; the watermark contribution of this row.
    pub fn latest_timestamp(&self) -> DateTime<Utc> {
        self.published_at.max(self.fetched_at)
    }

    /// Short snippet of the fragment text, cut on a char boundary.
    pub fn snippet(&self, max_chars: usize) -> String {
        if self.text.chars().count() <= max_chars {
            return self.text.clone();
        }
        let cut: String = self.text.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

/// A raw document as returned by the document source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Inline body text
    #[serde(default)]
    pub body: Option<String>,

    /// Reference to a body held by the blob store
    #[serde(default)]
    pub body_ref: Option<String>,

    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub tickers: BTreeSet<String>,

    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
}

impl SourceDocument {
    /// Whether either timestamp is strictly newer than `watermark`.
    pub fn is_newer_than(&self, watermark: Option<DateTime<Utc>>) -> bool {
        match watermark {
            Some(ts) => self.published_at > ts || self.fetched_at > ts,
            None => true,
        }
    }

    /// Whether either timestamp falls inside `window`.
    pub fn overlaps(&self, window: &DateRange) -> bool {
        window.contains(self.published_at) || window.contains(self.fetched_at)
    }
}

/// A fragment produced by the chunker, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentText {
    pub text: String,
    pub token_count: u32,
}

/// Inclusive timestamp range; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    /// Range of `days` either side of `center`.
    ///
    /// A bound that would fall outside the representable time range is left open.
    pub fn around(center: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: shift_days(center, days, false),
            end: shift_days(center, days, true),
        }
    }

    /// Range covering the last `days` up to `now`; open when `days` reaches
    /// past the representable time range.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: shift_days(now, days, false),
            end: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

fn shift_days(ts: DateTime<Utc>, days: u32, forward: bool) -> Option<DateTime<Utc>> {
    let span = Duration::try_days(i64::from(days))?;
    if forward {
        ts.checked_add_signed(span)
    } else {
        ts.checked_sub_signed(span)
    }
}

/// Normalize a ticker symbol: trimmed, upper-case, `None` when empty.
pub fn normalize_ticker(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_uppercase())
    }
}

/// Normalize a collection of ticker symbols into a set.
pub fn normalize_tickers<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|t| normalize_ticker(t.as_ref()))
        .collect()
}
