use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreError;

/// SQLite schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    debug!("Current schema version: {}", current_version);

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::corruption(format!(
            "schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    }

    if current_version < SCHEMA_VERSION {
        info!("Upgrading schema from v{} to v{}", current_version, SCHEMA_VERSION);
        apply_migrations(conn, current_version)?;
    }

    Ok(())
}

/// Apply migrations from current version to latest, in one transaction
fn apply_migrations(conn: &Connection, from_version: i32) -> Result<(), StoreError> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    let result = (|| {
        for version in (from_version + 1)..=SCHEMA_VERSION {
            info!("Applying migration v{}", version);
            if version == 1 {
                create_v1_schema(conn)?;
            }
            conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        }
        Ok::<(), rusqlite::Error>(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(e) => {
            conn.execute_batch("ROLLBACK")?;
            Err(e.into())
        }
    }
}

/// Create v1 schema (initial schema)
///
/// Every per-file row references `source_files(repo_id, path)` so that deleting the
/// file row removes everything the file contributed.
fn create_v1_schema(conn: &Connection) -> rusqlite::Result<()> {
    info!("Creating v1 schema tables");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            root TEXT NOT NULL UNIQUE,
            revision INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS source_files (
            repo_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            language TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            revision INTEGER NOT NULL,
            analyzed_at INTEGER NOT NULL,
            PRIMARY KEY (repo_id, path)
        );

        CREATE TABLE IF NOT EXISTS symbols (
            repo_id INTEGER NOT NULL,
            id TEXT NOT NULL,
            file TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            qualified_name TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            start_column INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            end_column INTEGER NOT NULL,
            signature TEXT NOT NULL,
            parent_id TEXT,
            language TEXT NOT NULL,
            details TEXT NOT NULL,
            PRIMARY KEY (repo_id, id),
            FOREIGN KEY (repo_id, file) REFERENCES source_files(repo_id, path) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_symbols_qualified_name
            ON symbols(repo_id, qualified_name);

        CREATE INDEX IF NOT EXISTS idx_symbols_position
            ON symbols(repo_id, file, start_line, start_column);

        CREATE TABLE IF NOT EXISTS relationships (
            repo_id INTEGER NOT NULL,
            id TEXT NOT NULL,
            file TEXT NOT NULL,
            source_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            target_name TEXT NOT NULL,
            target_key TEXT NOT NULL,
            module_hint TEXT,
            target_id TEXT,
            line INTEGER NOT NULL,
            PRIMARY KEY (repo_id, id),
            FOREIGN KEY (repo_id, file) REFERENCES source_files(repo_id, path) ON DELETE CASCADE,
            FOREIGN KEY (repo_id, source_id) REFERENCES symbols(repo_id, id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_relationships_source
            ON relationships(repo_id, source_id);

        CREATE INDEX IF NOT EXISTS idx_relationships_target
            ON relationships(repo_id, target_id);

        CREATE INDEX IF NOT EXISTS idx_relationships_target_key
            ON relationships(repo_id, target_key);

        CREATE TABLE IF NOT EXISTS cache_entries (
            repo_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            symbol_ids TEXT NOT NULL,
            relationship_ids TEXT NOT NULL,
            written_at INTEGER NOT NULL,
            PRIMARY KEY (repo_id, path),
            FOREIGN KEY (repo_id, path) REFERENCES source_files(repo_id, path) ON DELETE CASCADE
        );",
    )?;

    info!("v1 schema created successfully");

    Ok(())
}

/// Drop all tables (for testing/rebuilding)
#[cfg(test)]
pub fn drop_schema(conn: &Connection) -> rusqlite::Result<()> {
    info!("Dropping all schema tables");

    conn.execute_batch(
        "DROP TABLE IF EXISTS cache_entries;
         DROP TABLE IF EXISTS relationships;
         DROP TABLE IF EXISTS symbols;
         DROP TABLE IF EXISTS source_files;
         DROP TABLE IF EXISTS repositories;
         DROP TABLE IF EXISTS schema_version;",
    )
}
