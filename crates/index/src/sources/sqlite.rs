//! SQLite-backed document source.

use super::DocumentSource;
use crate::types::{normalize_tickers, DateRange, SourceDocument};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsdex_core::{AppError, AppResult};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL DEFAULT '',
        body TEXT,
        body_ref TEXT,
        source TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL DEFAULT '',
        tickers TEXT NOT NULL DEFAULT '[]',
        published_at INTEGER NOT NULL,
        fetched_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_published ON documents(published_at);
    CREATE INDEX IF NOT EXISTS idx_documents_fetched ON documents(fetched_at);
"#;

/// Raw documents stored in a SQLite table; timestamps are unix milliseconds.
pub struct SqliteDocumentSource {
    conn: Mutex<Connection>,
}

impl SqliteDocumentSource {
    /// Open (and create if needed) the document database at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Source(format!("Failed to create database directory: {}", e))
            })?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Source(format!("Failed to open document database: {}", e)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Source(format!("Failed to open document database: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| AppError::Source(format!("Failed to create tables: {}", e)))?;
        tracing::debug!("Initialized document database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Source("document database lock poisoned".to_string()))
    }

    /// Insert or replace documents in one transaction; returns the number written.
    pub fn insert_documents(&self, documents: &[SourceDocument]) -> AppResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Source(format!("Failed to begin transaction: {}", e)))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO documents
                     (id, title, body, body_ref, source, url, tickers, published_at, fetched_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(|e| AppError::Source(format!("Failed to prepare insert: {}", e)))?;

            for doc in documents {
                let tickers = serde_json::to_string(&normalize_tickers(&doc.tickers))?;
                stmt.execute(params![
                    doc.id,
                    doc.title,
                    doc.body,
                    doc.body_ref,
                    doc.source,
                    doc.url,
                    tickers,
                    doc.published_at.timestamp_millis(),
                    doc.fetched_at.timestamp_millis(),
                ])
                .map_err(|e| {
                    AppError::Source(format!("Failed to insert document {}: {}", doc.id, e))
                })?;
            }
        }
        tx.commit()
            .map_err(|e| AppError::Source(format!("Failed to commit documents: {}", e)))?;
        Ok(documents.len())
    }

    pub fn count(&self) -> AppResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(|e| AppError::Source(format!("Failed to count documents: {}", e)))?;
        Ok(count as usize)
    }

    fn query_since(
        &self,
        watermark: Option<DateTime<Utc>>,
        window: Option<&DateRange>,
        limit: Option<usize>,
    ) -> AppResult<Vec<SourceDocument>> {
        let mut sql = String::from(
            "SELECT id, title, body, body_ref, source, url, tickers, published_at, fetched_at
             FROM documents WHERE 1 = 1",
        );
        let mut args: Vec<i64> = Vec::new();

        if let Some(ts) = watermark {
            sql.push_str(" AND (published_at > ? OR fetched_at > ?)");
            args.push(ts.timestamp_millis());
            args.push(ts.timestamp_millis());
        }

        if let Some(window) = window.filter(|w| !w.is_unbounded()) {
            let published = range_clause("published_at", window, &mut args);
            let fetched = range_clause("fetched_at", window, &mut args);
            sql.push_str(&format!(" AND (({}) OR ({}))", published, fetched));
        }

        sql.push_str(" ORDER BY MAX(published_at, fetched_at), id");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            args.push(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::Source(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let tickers_json: String = row.get(6)?;
                let tickers: BTreeSet<String> = serde_json::from_str(&tickers_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

                Ok(SourceDocument {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    body: row.get(2)?,
                    body_ref: row.get(3)?,
                    source: row.get(4)?,
                    url: row.get(5)?,
                    tickers,
                    published_at: millis_to_datetime(row.get(7)?, 7)?,
                    fetched_at: millis_to_datetime(row.get(8)?, 8)?,
                })
            })
            .map_err(|e| AppError::Source(format!("Failed to query documents: {}", e)))?;

        let documents = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Source(format!("Failed to read document row: {}", e)))?;

        tracing::debug!(
            count = documents.len(),
            watermark = ?watermark,
            "Fetched documents from SQLite"
        );
        Ok(documents)
    }
}

#[async_trait]
impl DocumentSource for SqliteDocumentSource {
    async fn fetch_since(
        &self,
        watermark: Option<DateTime<Utc>>,
        window: Option<&DateRange>,
        limit: Option<usize>,
    ) -> AppResult<Vec<SourceDocument>> {
        self.query_since(watermark, window, limit)
    }
}

/// `column` within the inclusive window, pushing bound parameters onto `args`.
fn range_clause(column: &str, window: &DateRange, args: &mut Vec<i64>) -> String {
    let mut parts = Vec::new();
    if let Some(start) = window.start {
        parts.push(format!("{} >= ?", column));
        args.push(start.timestamp_millis());
    }
    if let Some(end) = window.end {
        parts.push(format!("{} <= ?", column));
        args.push(end.timestamp_millis());
    }
    parts.join(" AND ")
}

fn millis_to_datetime(ms: i64, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            Type::Integer,
            format!("timestamp out of range: {}", ms).into(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn doc(id: &str, day: u32) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            title: format!("Title {}", id),
            body: Some(format!("Body of {}", id)),
            body_ref: if day % 2 == 0 {
                Some(format!("bodies/{}.txt", id))
            } else {
                None
            },
            source: "wire".to_string(),
            url: format!("https://news.example/{}", id),
            tickers: BTreeSet::from(["aapl".to_string()]),
            published_at: Utc.with_ymd_and_hms(2024, 4, day, 8, 0, 0).unwrap(),
            fetched_at: Utc.with_ymd_and_hms(2024, 4, day, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_all() {
        let dir = TempDir::new().unwrap();
        let source = SqliteDocumentSource::open(&dir.path().join("docs/documents.sqlite")).unwrap();
        source
            .insert_documents(&[doc("b", 3), doc("a", 1), doc("c", 2)])
            .unwrap();
        assert_eq!(source.count().unwrap(), 3);

        let docs = source.fetch_since(None, None, None).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(docs[0], {
            let mut expected = doc("a", 1);
            expected.tickers = BTreeSet::from(["AAPL".to_string()]);
            expected
        });
    }

    #[tokio::test]
    async fn test_fetch_since_watermark_window_limit() {
        let source = SqliteDocumentSource::open_in_memory().unwrap();
        source
            .insert_documents(&[doc("a", 1), doc("b", 2), doc("c", 3), doc("d", 4)])
            .unwrap();

        let watermark = Utc.with_ymd_and_hms(2024, 4, 2, 9, 0, 0).unwrap();
        let delta = source.fetch_since(Some(watermark), None, None).await.unwrap();
        let ids: Vec<&str> = delta.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d"]);

        let window = DateRange::new(
            None,
            Some(Utc.with_ymd_and_hms(2024, 4, 3, 0, 0, 0).unwrap()),
        );
        let windowed = source.fetch_since(None, Some(&window), None).await.unwrap();
        assert_eq!(windowed.len(), 2);

        let limited = source.fetch_since(None, None, Some(3)).await.unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[2].id, "c");
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let source = SqliteDocumentSource::open_in_memory().unwrap();
        source.insert_documents(&[doc("a", 1)]).unwrap();
        source.insert_documents(&[doc("a", 1)]).unwrap();
        assert_eq!(source.count().unwrap(), 1);
    }
}
