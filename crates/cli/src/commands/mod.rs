//! Command handlers for the newsdex CLI.
//!
//! Each command lives in its own submodule; the helpers here wire the index
//! engine to the workspace configuration.

pub mod build;
pub mod import;
pub mod rollback;
pub mod search;
pub mod stats;
pub mod versions;

pub use build::BuildCommand;
pub use import::ImportCommand;
pub use rollback::RollbackCommand;
pub use search::SearchCommand;
pub use stats::StatsCommand;
pub use versions::VersionsCommand;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use newsdex_core::{config::AppConfig, AppError, AppResult};
use newsdex_index::{FsArtifactStore, VersionCatalog};
use serde::Serialize;
use std::sync::Arc;

/// Version catalog over the workspace's artifact directory.
pub fn open_catalog(config: &AppConfig) -> VersionCatalog {
    VersionCatalog::new(Arc::new(FsArtifactStore::new(config.artifact_root())))
}

/// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` date.
///
/// A bare date is taken as the start of the day, or its last second when
/// `end_of_day` is set, so that date-only bounds stay inclusive.
pub fn parse_timestamp(value: &str, end_of_day: bool) -> AppResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        AppError::Config(format!(
            "Invalid date {:?}: expected YYYY-MM-DD or an RFC 3339 timestamp",
            value
        ))
    })?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        Some(NaiveTime::MIN)
    };
    let time = time.ok_or_else(|| AppError::Other("invalid time of day".to_string()))?;
    Ok(date.and_time(time).and_utc())
}

/// Pretty-print a serializable value to stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_date_bounds() {
        assert_eq!(
            parse_timestamp("2024-09-03", false).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 3, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp("2024-09-03", true).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 3, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(
            parse_timestamp("2024-09-03T14:30:00+02:00", true).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 3, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_invalid() {
        let err = parse_timestamp("yesterday", false).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
