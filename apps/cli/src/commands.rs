//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use awardsearch_core::build_service;
use awardsearch_shared::{
    AppConfig, CacheBackend, RetrievalStrategy, init_config, load_config, load_config_from,
};
use awardsearch_storage::{FreshnessCache, Storage};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// awardsearch: answer questions about award programs from their websites.
#[derive(Parser)]
#[command(
    name = "awardsearch",
    version,
    about = "Answer questions about award programs with cited sources.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.awardsearch/awardsearch.toml.
    #[arg(long, global = true, env = "AWARDSEARCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Retrieval strategy override.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum RetrievalArg {
    Crawl,
    Reader,
}

impl From<RetrievalArg> for RetrievalStrategy {
    fn from(arg: RetrievalArg) -> Self {
        match arg {
            RetrievalArg::Crawl => Self::Crawl,
            RetrievalArg::Reader => Self::Reader,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Answer a question.
    Search {
        /// The question, e.g. "What is the deadline for ABA 2026?".
        query: String,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,

        /// Override the configured retrieval strategy.
        #[arg(long, value_enum)]
        retrieval: Option<RetrievalArg>,

        /// Keep cached pages in memory only for this run.
        #[arg(long)]
        no_persist: bool,

        /// Override the crawl depth.
        #[arg(long)]
        max_depth: Option<u32>,

        /// Print request metrics (Prometheus text format) to stderr afterwards.
        #[arg(long)]
        metrics: bool,
    },

    /// Print the search plan for a question without running it.
    Plan {
        /// The question to plan.
        query: String,
    },

    /// Page cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Evict expired pages from the persistent cache.
    Purge,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "awardsearch=warn",
        1 => "awardsearch=info",
        2 => "awardsearch=debug",
        _ => "awardsearch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    match cli.command {
        Command::Search {
            query,
            json,
            retrieval,
            no_persist,
            max_depth,
            metrics,
        } => {
            let mut config = resolve_config(config_path.as_ref())?;
            if let Some(strategy) = retrieval {
                config.search.retrieval = strategy.into();
            }
            if no_persist {
                config.cache.backend = CacheBackend::Memory;
            }
            if let Some(depth) = max_depth {
                config.crawl_policies.max_depth = depth;
            }
            cmd_search(&config, &query, json, metrics).await
        }
        Command::Plan { query } => cmd_plan(&resolve_config(config_path.as_ref())?, &query).await,
        Command::Cache { action } => match action {
            CacheAction::Purge => cmd_cache_purge(&resolve_config(config_path.as_ref())?).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_ref()).await,
        },
    }
}

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_search(config: &AppConfig, query: &str, json: bool, metrics: bool) -> Result<()> {
    let service = build_service(config).await?;

    info!(query, retrieval = ?config.search.retrieval, "running search");

    let spinner = (!json).then(|| progress_spinner("Searching award program sources..."));
    let result = service.search(query).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    if metrics {
        eprint!("{}", service.telemetry().encode_text());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if let Some(error) = &result.error {
        return Err(eyre!("{} ({:?})", error.message, error.code));
    }

    let meta = &result.metadata;
    println!("{}", result.answer);
    println!();
    println!(
        "  confidence: {}  sources: {}  cache hit: {}  time: {} ms",
        meta.confidence
            .map(|c| format!("{c:?}").to_lowercase())
            .unwrap_or_else(|| "n/a".into()),
        meta.sources_used,
        if meta.cache_hit { "yes" } else { "no" },
        meta.response_time_ms,
    );
    if !meta.missing_info.is_empty() {
        println!("  missing: {}", meta.missing_info.join("; "));
    }

    Ok(())
}

async fn cmd_plan(config: &AppConfig, query: &str) -> Result<()> {
    let service = build_service(config).await?;
    let plan = service.plan(query).await;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn cmd_cache_purge(config: &AppConfig) -> Result<()> {
    if config.cache.backend != CacheBackend::Sqlite {
        println!("Cache backend is in-memory; nothing persisted to purge.");
        return Ok(());
    }

    let path = config.cache.resolved_db_path()?;
    let storage = Storage::open(&path, config.cache.ttl()).await?;
    let removed = storage.purge_expired().await?;
    let remaining = storage.len().await?;

    info!(path = %path.display(), removed, remaining, "cache purged");
    println!("Removed {removed} expired page(s); {remaining} remain in {}", path.display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

/// Steady-ticking spinner on stderr.
fn progress_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_flags() {
        let cli = Cli::try_parse_from([
            "awardsearch",
            "-vv",
            "search",
            "ABA deadline?",
            "--json",
            "--retrieval",
            "reader",
            "--max-depth",
            "0",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Search {
                query,
                json,
                retrieval,
                max_depth,
                no_persist,
                metrics,
            } => {
                assert_eq!(query, "ABA deadline?");
                assert!(json);
                assert!(matches!(retrieval, Some(RetrievalArg::Reader)));
                assert_eq!(max_depth, Some(0));
                assert!(!no_persist);
                assert!(!metrics);
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn parses_cache_purge() {
        let cli = Cli::try_parse_from(["awardsearch", "cache", "purge"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheAction::Purge
            }
        ));
    }

    #[test]
    fn retrieval_arg_maps_to_strategy() {
        assert_eq!(RetrievalStrategy::from(RetrievalArg::Crawl), RetrievalStrategy::Crawl);
        assert_eq!(RetrievalStrategy::from(RetrievalArg::Reader), RetrievalStrategy::Reader);
    }
}
