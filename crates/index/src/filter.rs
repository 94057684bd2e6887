//! Candidate filter over a loaded metadata table.
//!
//! Two derived indices, rebuilt whenever a version is loaded and never persisted:
//! an inverted index from ticker to sorted rows, and the `(published_at, row)`
//! pairs sorted by time for range queries.

use crate::metadata_table::MetadataTable;
use crate::types::{normalize_ticker, DateRange};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Why a filtered query ran against the full index instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FallbackReason {
    /// The constraints matched no rows
    Empty,
    /// More rows matched than the candidate ceiling allows
    TooMany { count: usize, ceiling: usize },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Empty => write!(f, "no rows matched the filter"),
            FallbackReason::TooMany { count, ceiling } => {
                write!(f, "{} candidates exceed the ceiling of {}", count, ceiling)
            }
        }
    }
}

/// Outcome of candidate selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateSet {
    /// No constraints were supplied (or filtering was disabled)
    NoFilter,
    /// Scan exactly these rows, ascending
    Filtered(Vec<usize>),
    /// Constraints were supplied but the full index must be searched
    FallbackToFull(FallbackReason),
}

impl CandidateSet {
    /// Short label for reporting: `none`, `filtered` or `fallback_full`.
    pub fn mode(&self) -> &'static str {
        match self {
            CandidateSet::NoFilter => "none",
            CandidateSet::Filtered(_) => "filtered",
            CandidateSet::FallbackToFull(_) => "fallback_full",
        }
    }

    pub fn candidate_count(&self) -> Option<usize> {
        match self {
            CandidateSet::Filtered(rows) => Some(rows.len()),
            _ => None,
        }
    }
}

/// Constraints a query may place on candidate rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterQuery {
    /// Rows mentioning any of these tickers
    pub tickers: Vec<String>,
    /// Rows published inside this range
    pub date_range: Option<DateRange>,
    /// `false` skips filtering entirely
    pub use_filter: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    by_ticker: HashMap<String, Vec<usize>>,
    by_published: Vec<(DateTime<Utc>, usize)>,
}

impl CandidateFilter {
    /// Build both indices from a metadata table.
    pub fn build(metadata: &MetadataTable) -> Self {
        let mut by_ticker: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_published = Vec::with_capacity(metadata.len());

        for record in metadata.iter() {
            for ticker in &record.tickers {
                if let Some(key) = normalize_ticker(ticker) {
                    by_ticker.entry(key).or_default().push(record.row_index);
                }
            }
            by_published.push((record.published_at, record.row_index));
        }

        // rows are visited in ascending order; dedup covers tickers that
        // normalize to the same key
        for rows in by_ticker.values_mut() {
            rows.dedup();
        }
        by_published.sort_unstable();

        tracing::debug!(
            tickers = by_ticker.len(),
            rows = by_published.len(),
            "Built candidate filter"
        );

        Self {
            by_ticker,
            by_published,
        }
    }

    pub fn ticker_count(&self) -> usize {
        self.by_ticker.len()
    }

    pub fn rows_for_ticker(&self, ticker: &str) -> &[usize] {
        normalize_ticker(ticker)
            .and_then(|key| self.by_ticker.get(&key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Rows with `published_at` inside `range`, ascending by row.
    pub fn rows_in_range(&self, range: &DateRange) -> Vec<usize> {
        let lo = match range.start {
            Some(start) => self.by_published.partition_point(|(ts, _)| *ts < start),
            None => 0,
        };
        let hi = match range.end {
            Some(end) => self.by_published.partition_point(|(ts, _)| *ts <= end),
            None => self.by_published.len(),
        };
        if lo >= hi {
            return Vec::new();
        }
        let mut rows: Vec<usize> = self.by_published[lo..hi].iter().map(|(_, row)| *row).collect();
        rows.sort_unstable();
        rows
    }

    /// Select candidates: union over tickers, intersected with the date range.
    ///
    /// Falls back to the full index when the result is empty or larger than
    /// `max_candidates`.
    pub fn candidates(&self, query: &FilterQuery, max_candidates: usize) -> CandidateSet {
        if !query.use_filter {
            return CandidateSet::NoFilter;
        }

        let tickers: BTreeSet<String> = query
            .tickers
            .iter()
            .filter_map(|t| normalize_ticker(t))
            .collect();
        let range = query.date_range.filter(|r| !r.is_unbounded());

        if tickers.is_empty() && range.is_none() {
            return CandidateSet::NoFilter;
        }

        let mut allow: Option<Vec<usize>> = None;

        if !tickers.is_empty() {
            let mut union = BTreeSet::new();
            for ticker in &tickers {
                if let Some(rows) = self.by_ticker.get(ticker) {
                    union.extend(rows.iter().copied());
                }
            }
            allow = Some(union.into_iter().collect());
        }

        if let Some(range) = range {
            let in_range = self.rows_in_range(&range);
            allow = Some(match allow {
                Some(current) => intersect_sorted(&current, &in_range),
                None => in_range,
            });
        }

        let rows = allow.unwrap_or_default();
        if rows.is_empty() {
            CandidateSet::FallbackToFull(FallbackReason::Empty)
        } else if rows.len() > max_candidates {
            CandidateSet::FallbackToFull(FallbackReason::TooMany {
                count: rows.len(),
                ceiling: max_candidates,
            })
        } else {
            CandidateSet::Filtered(rows)
        }
    }
}

fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FragmentRecord;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, d, 12, 0, 0).unwrap()
    }

    /// Rows as (comma-separated tickers, day of month).
    fn table(rows: &[(&str, u32)]) -> MetadataTable {
        let mut table = MetadataTable::new();
        table.append(
            rows.iter()
                .map(|(tickers, d)| FragmentRecord {
                    row_index: 0,
                    fragment_id: String::new(),
                    document_id: String::new(),
                    fragment_sequence: 0,
                    token_count: 0,
                    title: String::new(),
                    source: String::new(),
                    url: String::new(),
                    tickers: tickers
                        .split(',')
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect(),
                    published_at: day(*d),
                    fetched_at: day(*d),
                    raw_body_ref: None,
                    text: String::new(),
                })
                .collect(),
        );
        table
    }

    fn sample() -> CandidateFilter {
        CandidateFilter::build(&table(&[
            ("AAPL", 1),
            ("MSFT", 2),
            ("AAPL,MSFT", 3),
            ("TSLA", 3),
            ("", 5),
            ("AAPL", 9),
        ]))
    }

    fn query(tickers: &[&str], range: Option<DateRange>) -> FilterQuery {
        FilterQuery {
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
            date_range: range,
            use_filter: true,
        }
    }

    #[test]
    fn test_no_constraints() {
        let filter = sample();
        assert_eq!(filter.candidates(&query(&[], None), 10), CandidateSet::NoFilter);
        assert_eq!(
            filter.candidates(&query(&[" "], Some(DateRange::default())), 10),
            CandidateSet::NoFilter
        );

        let mut disabled = query(&["AAPL"], None);
        disabled.use_filter = false;
        assert_eq!(filter.candidates(&disabled, 10), CandidateSet::NoFilter);
    }

    #[test]
    fn test_ticker_union_case_insensitive() {
        let filter = sample();
        assert_eq!(filter.ticker_count(), 3);
        assert_eq!(filter.rows_for_ticker("aapl"), &[0, 2, 5]);
        assert_eq!(
            filter.candidates(&query(&["aapl", "tsla"], None), 10),
            CandidateSet::Filtered(vec![0, 2, 3, 5])
        );
    }

    #[test]
    fn test_date_range_inclusive() {
        let filter = sample();
        let range = DateRange::new(Some(day(2)), Some(day(3)));
        assert_eq!(filter.rows_in_range(&range), vec![1, 2, 3]);
        assert_eq!(
            filter.rows_in_range(&DateRange::new(Some(day(4)), None)),
            vec![4, 5]
        );
        assert!(filter
            .rows_in_range(&DateRange::new(Some(day(6)), Some(day(8))))
            .is_empty());
    }

    #[test]
    fn test_tickers_intersect_dates() {
        let filter = sample();
        let range = DateRange::around(day(2), 1);
        assert_eq!(
            filter.candidates(&query(&["AAPL"], Some(range)), 10),
            CandidateSet::Filtered(vec![0, 2])
        );
    }

    #[test]
    fn test_fallbacks() {
        let filter = sample();
        assert_eq!(
            filter.candidates(&query(&["NVDA"], None), 10),
            CandidateSet::FallbackToFull(FallbackReason::Empty)
        );
        assert_eq!(
            filter.candidates(&query(&["AAPL", "MSFT"], None), 3),
            CandidateSet::FallbackToFull(FallbackReason::TooMany {
                count: 4,
                ceiling: 3
            })
        );
        assert_eq!(
            filter
                .candidates(&query(&["AAPL"], Some(DateRange::new(Some(day(20)), None))), 10)
                .mode(),
            "fallback_full"
        );
    }

    #[test]
    fn test_intersect_sorted() {
        assert_eq!(intersect_sorted(&[1, 3, 5, 7], &[2, 3, 7, 9]), vec![3, 7]);
        assert!(intersect_sorted(&[], &[1]).is_empty());
    }
}
