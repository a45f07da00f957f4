use anyhow::{Context, Result};
use std::path::Path;

use super::{canonical_root, open_store, store_error};
use crate::config::Config;
use crate::query::QueryEngine;

pub async fn show_stats(path: &str, config: &Config, cache: Option<&Path>) -> Result<()> {
    let target = canonical_root(path)?;
    let store_path = config.resolve_store_path(cache);
    let store = open_store(&store_path)?;

    let repo = store
        .repository_containing(&target)
        .map_err(|e| store_error(e, &store_path))?
        .with_context(|| format!("{} is not inside a synced repository", target.display()))?;

    let engine = QueryEngine::new(store.clone());
    let stats = engine
        .stats(&repo.root)
        .map_err(|e| store_error(e, &store_path))?
        .unwrap_or_default();
    store.close();

    println!("structgraph statistics v{}", env!("CARGO_PKG_VERSION"));
    println!("Repository: {}", repo.root);
    println!("Revision: {}", repo.revision);

    println!("\n📊 Graph Statistics:");
    println!("  Total files: {}", stats.total_files);
    println!("  Total symbols: {}", stats.total_symbols);
    println!(
        "  Total relationships: {} ({} resolved)",
        stats.total_relationships, stats.resolved_relationships
    );
    println!("  Cache size: {:.2} MB", get_db_size(&store_path)?);

    print_breakdown("Languages", &stats.files_by_language, "files");
    print_breakdown("Symbols by kind", &stats.symbols_by_kind, "");
    print_breakdown("Relationships by kind", &stats.relationships_by_kind, "");

    Ok(())
}

fn print_breakdown(title: &str, counts: &[(String, usize)], unit: &str) {
    if counts.is_empty() {
        return;
    }
    println!("  {}:", title);
    for (name, count) in counts {
        if unit.is_empty() {
            println!("    {}: {}", name, count);
        } else {
            println!("    {}: {} {}", name, count, unit);
        }
    }
}

fn get_db_size(db_path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(db_path)?;
    Ok(metadata.len() as f64 / (1024.0 * 1024.0))
}
