//! File discovery for STDF inputs
//!
//! The input may be a single file, taken as is, or a directory searched
//! recursively for file names matching the configured glob patterns.

use crate::error::{Result, StdfError};

use glob::Pattern;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// File discovery component for STDF inputs
#[derive(Debug)]
pub struct FileDiscovery {
    input_path: PathBuf,
    patterns: Vec<Pattern>,
    directory_count: usize,
}

impl FileDiscovery {
    /// Create a discovery over `input_path` with file name globs
    pub fn new(input_path: PathBuf, patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| StdfError::Configuration {
                    message: format!("invalid file pattern '{}': {}", p, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            input_path,
            patterns,
            directory_count: 0,
        })
    }

    /// Distinct directories holding discovered files
    pub fn directory_count(&self) -> usize {
        self.directory_count
    }

    /// Discover input files, sorted by path
    pub async fn discover_files(&mut self) -> Result<Vec<PathBuf>> {
        if !self.input_path.exists() {
            return Err(StdfError::InputNotFound {
                path: self.input_path.clone(),
            });
        }

        if self.input_path.is_file() {
            self.directory_count = 1;
            return Ok(vec![self.input_path.clone()]);
        }

        debug!("Searching for STDF files in: {}", self.input_path.display());

        let root = self.input_path.clone();
        let patterns = self.patterns.clone();
        let mut files = task::spawn_blocking(move || walk(&root, &patterns))
            .await
            .map_err(|e| StdfError::ProcessingFailed {
                path: self.input_path.clone(),
                reason: format!("File discovery task failed: {}", e),
            })?;
        files.sort();

        let directories: HashSet<&Path> = files.iter().filter_map(|f| f.parent()).collect();
        self.directory_count = directories.len();
        debug!(
            "Found {} STDF files in {} directories",
            files.len(),
            self.directory_count
        );

        Ok(files)
    }
}

fn walk(root: &Path, patterns: &[Pattern]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        match entry {
            Ok(entry) if entry.file_type().is_file() && matches_any(entry.path(), patterns) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => warn!("Skipping unreadable entry: {}", e),
        }
    }
    files
}

/// Check a path's file name against the patterns
fn matches_any(path: &Path, patterns: &[Pattern]) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy())
        .is_some_and(|name| patterns.iter().any(|p| p.matches(&name)))
}
