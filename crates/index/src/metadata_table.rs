//! Ordered fragment metadata, parallel to the vector store.

use crate::types::FragmentRecord;
use chrono::{DateTime, Utc};
use newsdex_core::{AppError, AppResult};

/// Ordered collection of fragment records.
///
/// Row `i` always carries `row_index == i`; every constructor and mutator
/// preserves that.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    rows: Vec<FragmentRecord>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from rows that must already be contiguous and in order.
    pub fn from_rows(rows: Vec<FragmentRecord>) -> AppResult<Self> {
        let table = Self { rows };
        table.validate_contiguity()?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, row_index: usize) -> Option<&FragmentRecord> {
        self.rows.get(row_index)
    }

    pub fn rows(&self) -> &[FragmentRecord] {
        &self.rows
    }

    pub fn iter(&self) -> impl Iterator<Item = &FragmentRecord> {
        self.rows.iter()
    }

    /// Append records after the last row, assigning their `row_index`.
    ///
    /// Returns the row index of the first appended record.
    pub fn append(&mut self, records: Vec<FragmentRecord>) -> usize {
        let start = self.rows.len();
        for (offset, mut record) in records.into_iter().enumerate() {
            record.row_index = start + offset;
            self.rows.push(record);
        }
        start
    }

    /// Check that `row_index` values are exactly `0..len` in order.
    pub fn validate_contiguity(&self) -> AppResult<()> {
        for (position, record) in self.rows.iter().enumerate() {
            if record.row_index != position {
                return Err(AppError::Invariant(format!(
                    "non-contiguous row_index: position {} holds row_index {} (fragment {})",
                    position, record.row_index, record.fragment_id
                )));
            }
        }
        Ok(())
    }

    /// Latest `published_at`/`fetched_at` over all rows; `None` for an empty table.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.rows.iter().map(FragmentRecord::latest_timestamp).max()
    }

    /// Number of distinct source documents.
    pub fn document_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.document_id.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }
}
