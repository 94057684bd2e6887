//! newsdex CLI
//!
//! Main entry point for the newsdex command-line tool.
//! Builds and queries the versioned financial-news vector index.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    BuildCommand, ImportCommand, RollbackCommand, SearchCommand, StatsCommand, VersionsCommand,
};
use newsdex_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// newsdex - versioned vector index for financial news retrieval
#[derive(Parser, Debug)]
#[command(name = "newsdex")]
#[command(about = "Versioned vector index for financial news retrieval", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "NEWSDEX_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "NEWSDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import raw documents from a JSON-lines file into the document database
    Import(ImportCommand),

    /// Run one incremental build and publish a new version
    Build(BuildCommand),

    /// Top-k search over the current version
    Search(SearchCommand),

    /// List retained versions
    Versions(VersionsCommand),

    /// Point the index back at an older version
    Rollback(RollbackCommand),

    /// Show statistics for the current version
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load()?;

    let config = config.with_overrides(
        cli.workspace,
        cli.config,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.log_json,
    );

    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_json)?;

    tracing::info!("newsdex starting");
    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!(
        "Embedding: {} ({}, {} dims)",
        config.embedding.provider,
        config.embedding.model,
        config.embedding.dimensions
    );

    config.validate()?;
    config.ensure_data_dir()?;

    let command_name = match &cli.command {
        Commands::Import(_) => "import",
        Commands::Build(_) => "build",
        Commands::Search(_) => "search",
        Commands::Versions(_) => "versions",
        Commands::Rollback(_) => "rollback",
        Commands::Stats(_) => "stats",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Import(cmd) => cmd.execute(&config).await,
        Commands::Build(cmd) => cmd.execute(&config).await,
        Commands::Search(cmd) => cmd.execute(&config).await,
        Commands::Versions(cmd) => cmd.execute(&config).await,
        Commands::Rollback(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
