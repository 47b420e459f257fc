//! `dw watch` - stream notifications for one or more directories

use anyhow::{Context, Result};
use clap::Args;
use dirwatch::{Notification, NotificationKind, WatchConfig, WatchId, WatchService};
use dirwatch_cli::config::CliConfig;
use dirwatch_cli::filter::ExcludeFilter;
use dirwatch_cli::output::{self, Format};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Directories to watch
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Print one JSON object per line
    #[arg(long)]
    pub json: bool,

    /// Gitignore-style pattern to hide, relative to each watched directory
    #[arg(long = "exclude", value_name = "GLOB")]
    pub excludes: Vec<String>,

    /// Receive buffer size in bytes
    #[arg(long, value_name = "N")]
    pub buffer_size: Option<usize>,

    /// Only report changes directly inside each directory
    #[arg(long)]
    pub no_recursive: bool,
}

/// Output state for one `dw watch` run
struct Session {
    format: Format,
    /// Watches still alive or still being set up
    filters: HashMap<WatchId, ExcludeFilter>,
    acknowledged: HashSet<WatchId>,
}

impl Session {
    /// Update watch liveness and print `notification` unless it is excluded
    fn emit(&mut self, notification: &Notification) -> Result<()> {
        let id = notification.id;
        match notification.kind {
            NotificationKind::TaskAdd => {
                self.acknowledged.insert(id);
            }
            // An error before the acknowledgment means the add failed
            NotificationKind::Error if !self.acknowledged.contains(&id) => {
                self.filters.remove(&id);
            }
            NotificationKind::TaskRemove => {
                self.filters.remove(&id);
            }
            NotificationKind::TaskTerminate => self.filters.clear(),
            _ => {}
        }

        if let (true, Some(filter), Some(path)) = (
            notification.kind.is_change(),
            self.filters.get(&id),
            notification.path(),
        ) {
            if filter.is_excluded(path) {
                debug!(path = %path.display(), "excluded");
                return Ok(());
            }
        }

        println!("{}", output::render(notification, self.format)?);
        Ok(())
    }

    fn is_watching(&self) -> bool {
        !self.filters.is_empty()
    }
}

pub async fn run(args: WatchArgs, config: CliConfig) -> Result<()> {
    let watch_config = WatchConfig {
        buffer_size: args.buffer_size.unwrap_or(config.watch.buffer_size),
        recursive: config.watch.recursive && !args.no_recursive,
        ..config.watch.clone()
    };
    let service = WatchService::new(watch_config).context("Invalid watch settings")?;

    let format = if args.json || config.output.json {
        Format::Json
    } else {
        Format::human(config.output.color)
    };
    let mut session = Session {
        format,
        filters: HashMap::new(),
        acknowledged: HashSet::new(),
    };

    for path in &args.paths {
        let filter = ExcludeFilter::new(path, &args.excludes)?;
        let id = service.add(path);
        if !id.is_valid() {
            anyhow::bail!("Failed to start the watch service");
        }
        session.filters.insert(id, filter);
    }
    info!(count = args.paths.len(), "Watching directories");

    let mut ticker = tokio::time::interval(Duration::from_millis(config.output.poll_interval_ms));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for Ctrl+C")?;
                info!("Ctrl+C detected");
                break Ok(());
            }
            _ = ticker.tick() => {
                for notification in service.drain() {
                    session.emit(&notification)?;
                }
                if !session.is_watching() {
                    break Err(anyhow::anyhow!("No directories left to watch"));
                }
            }
        }
    };

    // Joins the worker thread
    tokio::task::block_in_place(|| service.stop());
    for notification in service.drain() {
        session.emit(&notification)?;
    }

    outcome
}
