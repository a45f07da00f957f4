use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cache;
mod cli;
mod config;
mod error;
mod index;
mod indexer;
mod query;
mod resolver;

use config::{Config, LoggingConfig};

#[derive(Parser)]
#[command(name = "structgraph")]
#[command(author = "Intent Project Team")]
#[command(version)]
#[command(about = "Incremental structural map of Python and TypeScript repositories", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache database location (overrides STRUCTGRAPH_CACHE and config)
    #[arg(long, global = true, value_name = "PATH")]
    cache: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repository and update its cached graph
    Start {
        /// Repository root
        #[arg(default_value = ".")]
        path: String,

        /// Re-resolve every relationship instead of only the affected ones
        #[arg(long)]
        full: bool,
    },

    /// Print the structural map of a repository, file or directory
    Map {
        /// Repository, or a file or directory inside one
        #[arg(default_value = ".")]
        path: String,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Only these symbol kinds (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        kind: Vec<String>,
    },

    /// Clear a repository's cached graph, or the whole cache
    Drop {
        /// Repository root; omit to clear every repository
        path: Option<String>,
    },

    /// Show graph statistics
    Stats {
        /// Repository root
        #[arg(default_value = ".")]
        path: String,
    },

    /// List supported languages
    Languages,
}

impl Commands {
    fn project_dir(&self) -> &str {
        match self {
            Commands::Start { path, .. } | Commands::Map { path, .. } | Commands::Stats { path } => {
                path.as_str()
            }
            Commands::Drop { path } => path.as_deref().unwrap_or("."),
            Commands::Languages => ".",
        }
    }
}

fn init_logging(debug: bool, verbose: bool, logging: &LoggingConfig) {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.level.as_str()
    };

    // RUST_LOG wins over flags and config
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("structgraph={}", level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.format == "pretty" {
        builder.pretty().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let project_dir = cli.command.project_dir();
    let loaded = Config::load(project_dir);
    let config = match &loaded {
        Ok(Some(config)) => config.clone(),
        _ => Config::default(),
    };
    init_logging(cli.debug, cli.verbose, &config.logging);

    match loaded {
        Ok(Some(_)) => info!("Loaded configuration from {}", project_dir),
        Ok(None) => debug!("No {} in {}, using defaults", config::CONFIG_FILE, project_dir),
        Err(e) => warn!("Ignoring {:#}; using defaults", e),
    }

    info!("structgraph v{} starting...", env!("CARGO_PKG_VERSION"));

    let cache = cli.cache.as_deref();
    match &cli.command {
        Commands::Start { path, full } => {
            cli::start::sync_repository(path, *full, &config, cache).await?;
        }

        Commands::Map { path, format, kind } => {
            cli::map::show_map(path, format, kind, &config, cache).await?;
        }

        Commands::Drop { path } => {
            cli::drop::drop_cache(path.as_deref(), &config, cache).await?;
        }

        Commands::Stats { path } => {
            cli::stats::show_stats(path, &config, cache).await?;
        }

        Commands::Languages => {
            cli::languages::list_languages();
        }
    }

    Ok(())
}
