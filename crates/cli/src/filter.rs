//! Exclude patterns for `dw watch`
//!
//! Patterns use gitignore syntax and are matched against paths relative
//! to the watched root, so `target/` or `*.tmp` behave as they would in a
//! `.gitignore` at that root.

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

/// Exclude rules for one watched root
#[derive(Debug)]
pub struct ExcludeFilter {
    root: PathBuf,
    /// `None` when no patterns were given
    matcher: Option<Gitignore>,
}

impl ExcludeFilter {
    /// Build a filter for `root` from gitignore-style `patterns`
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let root = std::path::absolute(root)
            .with_context(|| format!("Failed to resolve {}", root.display()))?;

        if patterns.is_empty() {
            return Ok(Self {
                root,
                matcher: None,
            });
        }

        let mut builder = GitignoreBuilder::new(&root);
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .with_context(|| format!("Invalid exclude pattern '{}'", pattern))?;
        }
        let matcher = builder.build().context("Failed to build exclude patterns")?;

        Ok(Self {
            root,
            matcher: Some(matcher),
        })
    }

    /// Root the patterns are relative to
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` matches an exclude pattern
    ///
    /// Paths outside the root are never excluded.
    pub fn is_excluded(&self, path: &Path) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        // The entry may already be gone; fall back to a file match
        let is_dir = path.is_dir();
        matcher
            .matched_path_or_any_parents(relative, is_dir)
            .is_ignore()
    }
}
