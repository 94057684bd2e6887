//! Splitting document bodies into embeddable fragments.

use crate::types::FragmentText;
use newsdex_core::config::ChunkingSettings;
use newsdex_core::{AppError, AppResult};
use text_splitter::{Characters, ChunkConfig, TextSplitter};
use unicode_segmentation::UnicodeSegmentation;

/// Rough characters-per-token ratio used to turn token budgets into splitter capacity.
const CHARS_PER_TOKEN: usize = 4;

/// Separator placed between the title and the body of the first fragment.
pub const TITLE_SEPARATOR: &str = " —— ";

/// Lines containing any of these (case-insensitive) are dropped before chunking.
const BOILERPLATE_MARKERS: &[&str] = &[
    "subscribe",
    "sign up",
    "copyright",
    "all rights reserved",
    "share this",
    "follow us",
    "newsletter",
    "cookie",
    "privacy policy",
    "terms of service",
    "contact us",
    "advertisement",
    "sponsored",
    "click here",
    "read more",
    "continue reading",
];

/// Splits a document into ordered fragments.
pub trait Chunker: Send + Sync {
    fn split(&self, title: &str, body: &str) -> Vec<FragmentText>;
}

/// Remove blank and boilerplate lines.
pub fn clean_body(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| {
            let lower = line.to_lowercase();
            !BOILERPLATE_MARKERS.iter().any(|m| lower.contains(m))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Approximate token count: Unicode word segments.
pub fn count_tokens(text: &str) -> u32 {
    u32::try_from(text.unicode_words().count()).unwrap_or(u32::MAX)
}

/// Title folded in front of the cleaned body.
pub fn fold_title(title: &str, body: &str) -> String {
    let title = title.trim();
    let body = body.trim();
    match (title.is_empty(), body.is_empty()) {
        (true, _) => body.to_string(),
        (false, true) => title.to_string(),
        (false, false) => format!("{}{}{}", title, TITLE_SEPARATOR, body),
    }
}

/// Default chunker: boilerplate cleaning, title folding, then semantic
/// splitting with `text-splitter` sized from token budgets.
pub struct TextChunker {
    splitter: TextSplitter<Characters>,
    min_tokens: u32,
    max_tokens: u32,
}

impl TextChunker {
    pub fn new(settings: &ChunkingSettings) -> AppResult<Self> {
        if settings.target_tokens == 0 || settings.max_tokens < settings.target_tokens {
            return Err(AppError::Config(format!(
                "chunking needs 0 < target_tokens <= max_tokens (got {} / {})",
                settings.target_tokens, settings.max_tokens
            )));
        }

        let target_chars = settings.target_tokens * CHARS_PER_TOKEN;
        let max_chars = (settings.max_tokens * CHARS_PER_TOKEN).max(target_chars + 1);
        let overlap_chars = settings.overlap_tokens * CHARS_PER_TOKEN;

        let config = ChunkConfig::new(target_chars..max_chars)
            .with_overlap(overlap_chars)
            .map_err(|e| AppError::Config(format!("invalid chunk overlap: {}", e)))?;

        Ok(Self {
            splitter: TextSplitter::new(config),
            min_tokens: u32::try_from(settings.min_tokens).unwrap_or(u32::MAX),
            max_tokens: u32::try_from(settings.max_tokens).unwrap_or(u32::MAX),
        })
    }
}

impl Chunker for TextChunker {
    fn split(&self, title: &str, body: &str) -> Vec<FragmentText> {
        let text = fold_title(title, &clean_body(body));
        if text.is_empty() {
            return Vec::new();
        }

        let mut fragments: Vec<FragmentText> = self
            .splitter
            .chunks(&text)
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| FragmentText {
                text: chunk.to_string(),
                token_count: count_tokens(chunk),
            })
            .collect();

        merge_trailing_orphan(&mut fragments, self.min_tokens, self.max_tokens);

        tracing::trace!(
            fragments = fragments.len(),
            chars = text.len(),
            "Split document"
        );
        fragments
    }
}

/// Fold a too-small final fragment into its predecessor when the result stays within budget.
fn merge_trailing_orphan(fragments: &mut Vec<FragmentText>, min_tokens: u32, max_tokens: u32) {
    if fragments.len() < 2 {
        return;
    }
    let last = fragments.len() - 1;
    let orphan_tokens = fragments[last].token_count;
    if orphan_tokens >= min_tokens
        || fragments[last - 1].token_count + orphan_tokens > max_tokens
    {
        return;
    }
    if let Some(orphan) = fragments.pop() {
        if let Some(prev) = fragments.last_mut() {
            prev.text.push(' ');
            prev.text.push_str(&orphan.text);
            prev.token_count = count_tokens(&prev.text);
        }
    }
}
