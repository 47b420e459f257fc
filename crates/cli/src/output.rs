//! Rendering notifications for the terminal

use anyhow::{Context, Result};
use dirwatch::{Notification, NotificationKind, Payload};
use owo_colors::OwoColorize;
use std::io::IsTerminal;

/// Output style for `dw watch`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Aligned text, optionally colored
    Human { color: bool },
    /// One JSON object per line
    Json,
}

impl Format {
    /// Human-readable output; `color` only applies when stdout is a terminal
    pub fn human(color: bool) -> Self {
        Self::human_for(color, std::io::stdout().is_terminal())
    }

    fn human_for(color: bool, terminal: bool) -> Self {
        Format::Human {
            color: color && terminal,
        }
    }
}

/// Render one notification as a single line
pub fn render(notification: &Notification, format: Format) -> Result<String> {
    match format {
        Format::Json => {
            serde_json::to_string(notification).context("Failed to serialize notification")
        }
        Format::Human { color } => Ok(render_human(notification, color)),
    }
}

fn render_human(notification: &Notification, color: bool) -> String {
    let label = format!("{:<14}", notification.kind.as_str());
    let label = if color {
        paint(notification.kind, &label)
    } else {
        label
    };

    let detail = match &notification.payload {
        Payload::Path(path) => path.display().to_string(),
        Payload::Message(message) => message.clone(),
        Payload::Empty => String::new(),
    };

    if notification.id.is_valid() {
        let id = format!("#{}", notification.id);
        let id = if color { id.dimmed().to_string() } else { id };
        format!("{} {} {}", label, id, detail).trim_end().to_string()
    } else {
        format!("{} {}", label, detail).trim_end().to_string()
    }
}

fn paint(kind: NotificationKind, label: &str) -> String {
    match kind {
        NotificationKind::Create => label.green().to_string(),
        NotificationKind::Delete => label.red().to_string(),
        NotificationKind::Modify => label.yellow().to_string(),
        NotificationKind::Rename => label.cyan().to_string(),
        NotificationKind::Error => label.red().bold().to_string(),
        NotificationKind::TaskAdd | NotificationKind::TaskRemove => label.blue().to_string(),
        NotificationKind::TaskTerminate => label.dimmed().to_string(),
    }
}
