use anyhow::{bail, Result};
use std::path::Path;
use tracing::{info, warn};

use super::{canonical_root, collect_sources, open_store, root_key, sync_error};
use crate::cache::{CacheManager, SyncCancellation, SyncOptions};
use crate::config::Config;

/// Analyze a repository and bring its cached graph up to date
pub async fn sync_repository(
    path: &str,
    full: bool,
    config: &Config,
    cache: Option<&Path>,
) -> Result<()> {
    let root = canonical_root(path)?;
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let root_str = root_key(&root);
    let store_path = config.resolve_store_path(cache);

    let store = open_store(&store_path)?;

    println!("structgraph v{}", env!("CARGO_PKG_VERSION"));
    println!("Repository: {}", root_str);
    println!("Cache: {}", store.path().display());

    let files = collect_sources(&root, config)?;
    info!("Discovered {} source files in {}", files.len(), root_str);

    let mut options = SyncOptions::from_config(config);
    options.force_full = full;
    options.show_progress = true;

    let cancel = SyncCancellation::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing files already in flight");
                cancel.cancel();
            }
        })
    };

    let manager = CacheManager::new(store.clone());
    let result = manager.sync(&root_str, files, &cancel, &options).await;
    interrupt.abort();
    store.close();
    let report = result.map_err(|e| sync_error(e, &store_path))?;

    for notice in &report.unavailable {
        println!("⚠️  {}", notice);
    }
    if !options.languages.is_empty() && report.unavailable.len() == options.languages.len() {
        bail!("No language adapter is available; nothing was analyzed");
    }

    println!("\n📊 Sync complete (revision {})", report.revision);
    println!("  Analyzed: {}", report.analyzed);
    println!("  Unchanged: {}", report.skipped);
    println!("  Removed: {}", report.removed);
    println!("  Unsupported: {}", report.unsupported);
    if report.deferred + report.unreadable > 0 {
        println!("  Kept from previous runs: {}", report.deferred + report.unreadable);
    }
    println!("  Failed: {}", report.failed.len());
    for failure in &report.failed {
        println!("    {}", failure);
    }
    println!(
        "  Relationships: {} of {} resolved ({:?} resolution)",
        report.resolution.resolved, report.resolution.considered, report.resolution.scope
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::drop::drop_cache;
    use crate::index::db::GraphStore;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_then_drop() {
        let repo = tempdir().unwrap();
        fs::create_dir_all(repo.path().join("lib")).unwrap();
        fs::write(repo.path().join("lib/base.py"), "class Base:\n    pass\n").unwrap();
        fs::write(
            repo.path().join("lib/child.py"),
            "from lib.base import Base\n\nclass Child(Base):\n    pass\n",
        )
        .unwrap();
        let cache = tempdir().unwrap();
        let db = cache.path().join("graph.db");
        let config = Config::default();
        let path = repo.path().to_string_lossy().to_string();

        sync_repository(&path, false, &config, Some(db.as_path())).await.unwrap();

        let root = root_key(&canonical_root(&path).unwrap());
        let store = GraphStore::open(&db).unwrap();
        let stored = store.repository(&root).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(store.source_files(stored.id).unwrap().len(), 2);
        assert_eq!(store.stats(stored.id).unwrap().resolved_relationships, 1);

        drop_cache(Some(path.as_str()), &config, Some(db.as_path())).await.unwrap();
        assert!(store.repository(&root).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_missing_path() {
        let cache = tempdir().unwrap();
        let db = cache.path().join("graph.db");
        let result =
            sync_repository("/definitely/not/here", false, &Config::default(), Some(db.as_path())).await;
        assert!(result.is_err());
    }
}
