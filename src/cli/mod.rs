// CLI command implementations

pub mod drop;
pub mod languages;
pub mod map;
pub mod start;
pub mod stats;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::cache::SourceInput;
use crate::config::Config;
use crate::error::{StoreError, SyncError};
use crate::index::db::GraphStore;
use crate::index::Language;

/// Absolute repository root with symlinks resolved
pub fn canonical_root(path: &str) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("Cannot read repository path {}", path))
}

/// Key a repository root is stored under
pub fn root_key(root: &Path) -> String {
    root.to_string_lossy().replace('\\', "/")
}

pub fn open_store(store_path: &Path) -> Result<GraphStore> {
    GraphStore::open(store_path).map_err(|e| store_error(e, store_path))
}

pub fn store_error(err: StoreError, store_path: &Path) -> anyhow::Error {
    let message = if err.is_corruption() {
        format!(
            "Cache at {} is damaged; run `structgraph drop` and sync again",
            store_path.display()
        )
    } else {
        format!("Cache at {} could not be used", store_path.display())
    };
    anyhow::Error::new(err).context(message)
}

pub fn sync_error(err: SyncError, store_path: &Path) -> anyhow::Error {
    match err {
        SyncError::Store(e) => store_error(e, store_path),
        other => anyhow::Error::new(other),
    }
}

fn is_hidden_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry.file_name().to_string_lossy().starts_with('.')
}

/// Walk `root` and read every file with a known language extension that the
/// config does not exclude. Paths are relative to `root` with `/` separators.
pub fn collect_sources(root: &Path, config: &Config) -> Result<Vec<SourceInput>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(path) => path.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if Language::from_path(&relative).is_none() || !config.should_index_file(&relative) {
            continue;
        }

        // Unreadable files still count as present so sync keeps their previous analysis.
        match std::fs::read(entry.path()) {
            Ok(content) => files.push(SourceInput::new(relative, content)),
            Err(e) => {
                warn!("Cannot read {}: {}", entry.path().display(), e);
                files.push(SourceInput::unreadable(relative, e.to_string()));
            }
        }
    }

    debug!("Found {} candidate files under {}", files.len(), root.display());
    Ok(files)
}
