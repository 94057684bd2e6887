//! Versions command handler.

use super::open_catalog;
use clap::Args;
use newsdex_core::{config::AppConfig, AppResult};

/// List retained versions, newest first
#[derive(Args, Debug)]
pub struct VersionsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl VersionsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing versions command");

        let catalog = open_catalog(config);
        let current = catalog.current_version()?;
        let mut manifests = catalog.list_manifests()?;
        manifests.reverse();

        if self.json {
            let output = serde_json::json!({
                "current": current,
                "versions": manifests,
            });
            return super::print_json(&output);
        }

        if manifests.is_empty() {
            println!("No versions published yet");
            return Ok(());
        }

        for manifest in &manifests {
            let marker = if Some(manifest.version) == current { "*" } else { " " };
            let parent = manifest
                .parent_version
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{} {:<16} {}  rows={:<8} dim={:<5} parent={}",
                marker,
                manifest.version.to_string(),
                manifest.created_at.format("%Y-%m-%d %H:%M:%S"),
                manifest.row_count,
                manifest
                    .dim
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                parent
            );
        }

        Ok(())
    }
}
