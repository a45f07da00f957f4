use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{canonical_root, open_store, root_key, store_error};
use crate::config::Config;

/// Clear one repository's cached graph, or the whole cache when no path is given
pub async fn drop_cache(path: Option<&str>, config: &Config, cache: Option<&Path>) -> Result<()> {
    let store_path = config.resolve_store_path(cache);
    if !store_path.exists() {
        println!("Cache {} does not exist; nothing to drop", store_path.display());
        return Ok(());
    }
    let store = open_store(&store_path)?;

    match path {
        Some(path) => {
            // The repository may have been deleted since it was synced.
            let root = canonical_root(path).unwrap_or_else(|_| PathBuf::from(path));
            let root = root_key(&root);
            if store
                .drop_repository(&root)
                .map_err(|e| store_error(e, &store_path))?
            {
                info!("Dropped cached graph for {}", root);
                println!("🗑️  Dropped {}", root);
            } else {
                println!("{} has no cached graph", root);
            }
        }
        None => {
            let dropped = store.drop_all().map_err(|e| store_error(e, &store_path))?;
            info!("Dropped {} cached repositories", dropped);
            println!("🗑️  Dropped {} repositories from {}", dropped, store_path.display());
        }
    }
    store.close();

    Ok(())
}
