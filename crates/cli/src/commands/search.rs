//! Search command handler.
//!
//! Embeds the query text with the configured provider and runs a top-k
//! search over the current version.

use super::{open_catalog, parse_timestamp};
use clap::Args;
use newsdex_core::{config::AppConfig, AppError, AppResult};
use newsdex_index::{create_provider, DateRange, SearchEngine, SearchQuery};

/// Search the current version
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Query text
    pub query: String,

    /// Number of fragments to return
    #[arg(short = 'k', long, default_value = "10")]
    pub top_k: usize,

    /// Restrict to fragments mentioning these tickers (repeat or comma-separate)
    #[arg(short, long, value_delimiter = ',')]
    pub ticker: Vec<String>,

    /// Earliest publication date (YYYY-MM-DD or RFC 3339)
    #[arg(long, conflicts_with = "date")]
    pub from: Option<String>,

    /// Latest publication date (YYYY-MM-DD or RFC 3339)
    #[arg(long, conflicts_with = "date")]
    pub to: Option<String>,

    /// Centre date; combined with --window-days
    #[arg(long)]
    pub date: Option<String>,

    /// Half-width of the window around --date, in days
    #[arg(long, requires = "date")]
    pub window_days: Option<u32>,

    /// Ignore ticker and date constraints
    #[arg(long)]
    pub no_filter: bool,

    /// Characters of fragment text to show per hit
    #[arg(long, default_value = "240")]
    pub snippet_chars: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    fn date_range(&self, default_window_days: u32) -> AppResult<Option<DateRange>> {
        if let Some(date) = &self.date {
            let center = parse_timestamp(date, false)?;
            let days = self.window_days.unwrap_or(default_window_days);
            return Ok(Some(DateRange::around(center, days)));
        }

        let start = self
            .from
            .as_deref()
            .map(|v| parse_timestamp(v, false))
            .transpose()?;
        let end = self
            .to
            .as_deref()
            .map(|v| parse_timestamp(v, true))
            .transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(AppError::Config(format!(
                    "--from {} is after --to {}",
                    start, end
                )));
            }
        }
        if start.is_none() && end.is_none() {
            return Ok(None);
        }
        Ok(Some(DateRange::new(start, end)))
    }

    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing search command");
        tracing::debug!("Search options: {:?}", self);

        if self.top_k == 0 {
            return Err(AppError::Config("-k must be at least 1".to_string()));
        }

        let engine = SearchEngine::open(open_catalog(config), config.filter.max_candidates)?;
        let embedder = create_provider(&config.embedding)?;
        let vector = embedder.embed(&self.query).await?;

        let mut query = SearchQuery::new(vector, self.top_k).with_tickers(self.ticker.clone());
        if let Some(range) = self.date_range(config.filter.time_window_days)? {
            query = query.with_date_range(range);
        }
        if self.no_filter {
            query = query.without_filter();
        }

        let response = engine.search(&query)?;

        if self.json {
            return super::print_json(&response);
        }

        let version = response
            .version
            .map(|v| v.to_string())
            .unwrap_or_else(|| "empty index".to_string());
        match (&response.fallback_reason, response.candidate_count) {
            (Some(reason), _) => println!(
                "{} hits from {} (filter fell back to full search: {})",
                response.hits.len(),
                version,
                reason
            ),
            (None, Some(candidates)) => println!(
                "{} hits from {} ({} candidates)",
                response.hits.len(),
                version,
                candidates
            ),
            (None, None) => println!("{} hits from {}", response.hits.len(), version),
        }

        for (rank, hit) in response.hits.iter().enumerate() {
            let fragment = &hit.fragment;
            let tickers: Vec<&str> = fragment.tickers.iter().map(String::as_str).collect();
            println!();
            println!(
                "{:>2}. [{:.4}] {} ({})",
                rank + 1,
                hit.score,
                fragment.title,
                fragment.published_at.format("%Y-%m-%d %H:%M")
            );
            println!(
                "    {} #{} {} {}",
                fragment.document_id,
                fragment.fragment_sequence,
                fragment.source,
                tickers.join(",")
            );
            if !fragment.url.is_empty() {
                println!("    {}", fragment.url);
            }
            println!("    {}", fragment.snippet(self.snippet_chars));
        }

        tracing::debug!(
            filter_ms = response.timings.filter_ms,
            search_ms = response.timings.search_ms,
            total_ms = response.timings.total_ms,
            "Search timings"
        );

        Ok(())
    }
}
