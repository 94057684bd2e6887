//! Configuration management for newsdex.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config file (`.newsdex/config.yaml` in the workspace)
//! - Environment variables
//! - Command-line flags
//!
//! Later sources override earlier ones. All state (published versions, the
//! document database, blob bodies) lives under the workspace's `.newsdex/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .newsdex/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Emit logs as JSON lines
    pub log_json: bool,

    pub index: IndexSettings,
    pub build: BuildSettings,
    pub filter: FilterSettings,
    pub chunking: ChunkingSettings,
    pub embedding: EmbeddingSettings,
    pub sources: SourceSettings,
}

/// Where published versions and the pointer are stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSettings {
    /// Artifact root, relative to `.newsdex/` unless absolute.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

/// Incremental build knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildSettings {
    /// Maximum number of delta documents fetched per run
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Restrict the fetch to the last N days
    #[serde(default)]
    pub window_days: Option<u32>,

    /// Bodies shorter than this are replaced from the blob store or skipped
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,

    /// Number of fragments sent to the embedder per call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// Candidate filter policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterSettings {
    /// Candidate sets larger than this fall back to a full-index search
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Default half-width of a date window built around a centre date
    #[serde(default = "default_time_window_days")]
    pub time_window_days: u32,
}

/// Token budgets for the default chunker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingSettings {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

/// Embedding provider selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingSettings {
    /// Provider name: "mock" or "ollama"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model identifier (provider-specific)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Provider endpoint (ollama only)
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Locations of the default document source and blob store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSettings {
    /// SQLite database holding raw documents, relative to `.newsdex/`
    #[serde(default = "default_documents_db")]
    pub documents_db: PathBuf,

    /// Root directory for externally stored bodies, relative to `.newsdex/`
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("index")
}

fn default_limit() -> usize {
    2000
}

fn default_min_body_chars() -> usize {
    400
}

fn default_batch_size() -> usize {
    100
}

fn default_max_candidates() -> usize {
    5000
}

fn default_time_window_days() -> u32 {
    3
}

fn default_target_tokens() -> usize {
    360
}

fn default_max_tokens() -> usize {
    460
}

fn default_overlap_tokens() -> usize {
    40
}

fn default_min_tokens() -> usize {
    200
}

fn default_embedding_provider() -> String {
    "mock".to_string()
}

fn default_embedding_model() -> String {
    "trigram-v1".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_documents_db() -> PathBuf {
    PathBuf::from("documents.sqlite")
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("blobs")
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_days: None,
            min_body_chars: default_min_body_chars(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            time_window_days: default_time_window_days(),
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
            min_tokens: default_min_tokens(),
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            endpoint: None,
        }
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            documents_db: default_documents_db(),
            blob_dir: default_blob_dir(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
    index: Option<IndexSettings>,
    build: Option<BuildSettings>,
    filter: Option<FilterSettings>,
    chunking: Option<ChunkingSettings>,
    embedding: Option<EmbeddingSettings>,
    sources: Option<SourceSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            log_level: None,
            verbose: false,
            no_color: false,
            log_json: false,
            index: IndexSettings::default(),
            build: BuildSettings::default(),
            filter: FilterSettings::default(),
            chunking: ChunkingSettings::default(),
            embedding: EmbeddingSettings::default(),
            sources: SourceSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML file and environment variables.
    ///
    /// Environment variables:
    /// - `NEWSDEX_WORKSPACE`: Override workspace path
    /// - `NEWSDEX_CONFIG`: Path to config file
    /// - `NEWSDEX_EMBEDDING_PROVIDER`: Embedding provider
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("NEWSDEX_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("NEWSDEX_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.data_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        if let Ok(provider) = std::env::var("NEWSDEX_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(json) = logging.json {
                result.log_json = json;
            }
        }

        if let Some(index) = config_file.index {
            result.index = index;
        }
        if let Some(build) = config_file.build {
            result.build = build;
        }
        if let Some(filter) = config_file.filter {
            result.filter = filter;
        }
        if let Some(chunking) = config_file.chunking {
            result.chunking = chunking;
        }
        if let Some(embedding) = config_file.embedding {
            result.embedding = embedding;
        }
        if let Some(sources) = config_file.sources {
            result.sources = sources;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over the file and environment.
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
        log_json: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        if log_json {
            self.log_json = true;
        }

        self
    }

    /// Get the path to the .newsdex directory.
    pub fn data_dir(&self) -> PathBuf {
        self.workspace.join(".newsdex")
    }

    /// Ensure the .newsdex directory exists.
    pub fn ensure_data_dir(&self) -> AppResult<()> {
        let data_dir = self.data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).map_err(|e| {
                AppError::Config(format!("Failed to create .newsdex directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Resolve a path that may be relative to the data directory.
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }

    /// Root of the versioned artifact store.
    pub fn artifact_root(&self) -> PathBuf {
        self.resolve(&self.index.artifact_dir)
    }

    /// SQLite database backing the default document source.
    pub fn documents_db_path(&self) -> PathBuf {
        self.resolve(&self.sources.documents_db)
    }

    /// Root directory of the default blob store.
    pub fn blob_root(&self) -> PathBuf {
        self.resolve(&self.sources.blob_dir)
    }

    /// Validate settings that would otherwise fail deep inside a build.
    pub fn validate(&self) -> AppResult<()> {
        let known_providers = ["mock", "ollama"];
        if !known_providers.contains(&self.embedding.provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                self.embedding.provider,
                known_providers.join(", ")
            )));
        }

        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }

        if self.build.batch_size == 0 {
            return Err(AppError::Config(
                "build.batch_size must be greater than zero".to_string(),
            ));
        }

        if self.filter.max_candidates == 0 {
            return Err(AppError::Config(
                "filter.max_candidates must be greater than zero".to_string(),
            ));
        }

        let c = &self.chunking;
        if c.overlap_tokens >= c.target_tokens || c.target_tokens > c.max_tokens {
            return Err(AppError::Config(format!(
                "Invalid chunking budget: overlap {} < target {} <= max {} is required",
                c.overlap_tokens, c.target_tokens, c.max_tokens
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.provider, "mock");
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.filter.max_candidates, 5000);
        assert_eq!(config.build.min_body_chars, 400);
        assert!(!config.verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths_resolve_under_data_dir() {
        let config = AppConfig {
            workspace: PathBuf::from("/tmp/ws"),
            ..AppConfig::default()
        };
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/ws/.newsdex"));
        assert_eq!(
            config.artifact_root(),
            PathBuf::from("/tmp/ws/.newsdex/index")
        );
        assert_eq!(
            config.documents_db_path(),
            PathBuf::from("/tmp/ws/.newsdex/documents.sqlite")
        );
    }

    #[test]
    fn test_with_overrides() {
        let overridden = AppConfig::default().with_overrides(
            Some(PathBuf::from("/srv/news")),
            None,
            None,
            true,
            false,
            true,
        );

        assert_eq!(overridden.workspace, PathBuf::from("/srv/news"));
        assert!(overridden.verbose);
        assert!(overridden.log_json);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_merge_yaml_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
logging:
  level: warn
  json: true
filter:
  max_candidates: 250
build:
  limit: 50
  min_body_chars: 0
"#,
        )
        .unwrap();

        let merged = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(merged.log_level, Some("warn".to_string()));
        assert!(merged.log_json);
        assert_eq!(merged.filter.max_candidates, 250);
        assert_eq!(merged.filter.time_window_days, 3);
        assert_eq!(merged.build.limit, 50);
        assert_eq!(merged.build.min_body_chars, 0);
        assert_eq!(merged.build.batch_size, 100);
        assert_eq!(merged.embedding.provider, "mock");
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = AppConfig::default();
        config.embedding.provider = "unknown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_chunking_budget() {
        let mut config = AppConfig::default();
        config.chunking.overlap_tokens = 500;
        assert!(config.validate().is_err());
    }
}
