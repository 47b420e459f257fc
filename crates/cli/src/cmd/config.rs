//! `dw config` - show the effective configuration
//!
//! Prints where the config file lives, an example file, or the values
//! `dw watch` would run with.

use anyhow::{Context, Result};
use dirwatch_cli::config::{self, CliConfig};
use owo_colors::OwoColorize;

pub async fn run(config: &CliConfig, show_path: bool, show_example: bool) -> Result<()> {
    if show_path {
        let path = config::config_file_path().context("Could not determine config file path")?;
        println!("{}", path.display());
        return Ok(());
    }

    if show_example {
        print!("{}", config::example()?);
        return Ok(());
    }

    let location = match config::config_file_path() {
        Some(path) if path.exists() => path.display().to_string(),
        Some(path) => format!("{} (not found, using defaults)", path.display()),
        None => "(no config directory, using defaults)".to_string(),
    };
    println!("{}", "Effective configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), location.dimmed());

    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
