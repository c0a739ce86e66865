use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod repl;

use commands::{fetch, show_version};
use config::{Config, OutputFormat};
use repl::Repl;

#[derive(Parser)]
#[command(name = "refdata")]
#[command(author, version, about = "Reference datasets served from a freshness-gated cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session with a long-lived cache
    Repl,

    /// Load the dataset once and print it
    Fetch {
        /// Output format
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,

        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Print the source's current version marker
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Commands::Fetch { output, out }) => {
            let format = output.unwrap_or(config.output_format);
            fetch(&config, format, out.as_deref()).await?;
        }
        Some(Commands::Version) => {
            show_version(&config).await?;
        }
        Some(Commands::Repl) | None => {
            let mut repl = Repl::new(config)?;
            repl.run().await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "refdata_cli=debug,refdata_core=debug,refdata_executor=debug,refdata_cache=debug"
    } else {
        "refdata_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
