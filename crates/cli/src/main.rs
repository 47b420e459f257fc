//! dirwatch CLI - dw command

use anyhow::Result;
use clap::{Parser, Subcommand};
use dirwatch_cli::{config, logging};

mod cmd;

/// dirwatch - Stream directory change notifications
#[derive(Parser)]
#[command(name = "dw")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories and print every change until Ctrl+C
    Watch(cmd::watch::WatchArgs),
    /// Show the effective configuration
    Config {
        /// Print the config file location only
        #[arg(long, conflicts_with = "example")]
        path: bool,
        /// Print an example config file
        #[arg(long)]
        example: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Must work even when the config file is broken
    if let Commands::Config { path, example } = &cli.command {
        if *path || *example {
            return cmd::config::run(&config::CliConfig::default(), *path, *example).await;
        }
    }

    let config = config::load()?;
    let _guard = logging::init(&config.log)?;

    match cli.command {
        Commands::Watch(args) => cmd::watch::run(args, config).await,
        Commands::Config { path, example } => cmd::config::run(&config, path, example).await,
    }
}
