//! Stats command handler.
//!
//! Loads the current version and reports its size and coverage.

use super::open_catalog;
use clap::Args;
use newsdex_core::{config::AppConfig, AppResult};
use newsdex_index::SearchEngine;

/// Show statistics for the current version
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");

        let engine = SearchEngine::open(open_catalog(config), config.filter.max_candidates)?;
        let status = engine.status();

        if self.json {
            return super::print_json(&status);
        }

        let Some(version) = status.version else {
            println!("Index is empty; run `newsdex build` first");
            return Ok(());
        };
        println!("Version:        {}", version);
        if let Some(created_at) = status.created_at {
            println!("Created:        {}", created_at.to_rfc3339());
        }
        println!("Rows:           {}", status.rows);
        println!(
            "Dimension:      {}",
            status
                .dim
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        println!("Documents:      {}", status.documents);
        println!("Tickers:        {}", status.tickers);
        if let Some(latest) = status.latest_published {
            println!("Latest article: {}", latest.to_rfc3339());
        }
        Ok(())
    }
}
