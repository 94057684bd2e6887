//! Rollback command handler.
//!
//! Re-points the index at a retained version after verifying that it loads.

use super::open_catalog;
use clap::Args;
use newsdex_core::{config::AppConfig, AppResult};
use newsdex_index::VersionId;

/// Point the index back at an older version
#[derive(Args, Debug)]
pub struct RollbackCommand {
    /// Version to restore (as listed by `newsdex versions`, e.g. v1727000000000)
    pub version: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RollbackCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing rollback command to {}", self.version);

        let version: VersionId = self.version.parse()?;
        let catalog = open_catalog(config);
        let previous = catalog.current_version()?;
        let manifest = catalog.rollback(version)?;

        if self.json {
            let output = serde_json::json!({
                "previous": previous,
                "current": manifest.version,
                "rows": manifest.row_count,
            });
            return super::print_json(&output);
        }

        println!(
            "Current version is now {} ({} rows), was {}",
            manifest.version,
            manifest.row_count,
            previous
                .map(|p| p.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        Ok(())
    }
}
