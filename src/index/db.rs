use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::schema::init_schema;
use super::{
    CacheEntry, ExtractedFile, Language, Relationship, RelationshipKind, SourceFile, Span,
    Symbol, SymbolKind,
};
use crate::error::StoreError;

/// Type alias for connection pool
pub type ConnectionPool = Pool<SqliteConnectionManager>;

pub type StoreResult<T> = Result<T, StoreError>;

/// A repository tracked by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub root: String,
    pub revision: u64,
}

/// Symbol fields the resolver needs, plus the revision of its file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSymbol {
    pub id: String,
    pub kind: SymbolKind,
    pub qualified_name: String,
    pub file: String,
    pub start_line: u32,
    pub start_column: u32,
    pub revision: u64,
}

/// Relationship as read for reporting, with the target's location when resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRelationship {
    pub relationship: Relationship,
    pub target_qualified_name: Option<String>,
    pub target_file: Option<String>,
}

/// Graph statistics for one repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_files: usize,
    pub total_symbols: usize,
    pub total_relationships: usize,
    pub resolved_relationships: usize,
    pub symbols_by_kind: Vec<(String, usize)>,
    pub relationships_by_kind: Vec<(String, usize)>,
    pub files_by_language: Vec<(String, usize)>,
}

/// Handle on the persisted graph. Opened explicitly per command, closed with `close`.
#[derive(Clone)]
pub struct GraphStore {
    pool: ConnectionPool,
    db_path: PathBuf,
}

impl GraphStore {
    /// Create or open a store
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        info!("Opening graph store at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
        });

        let pool = Pool::builder().max_size(4).build(manager)?;

        {
            let conn = pool.get()?;
            init_schema(&conn).map_err(classify_open_error)?;
            check_file_integrity(&conn).map_err(classify_open_error)?;
        }

        Ok(Self { pool, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> StoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Release the store. Pending pooled connections are closed when dropped.
    pub fn close(self) {
        debug!("Closing graph store at: {}", self.db_path.display());
    }

    /// Run `f` inside one write transaction. Any error rolls everything back.
    pub fn write<T>(
        &self,
        repo_id: i64,
        f: impl FnOnce(&mut GraphWriter<'_>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let mut writer = GraphWriter { tx, repo_id };
        let value = f(&mut writer)?;
        writer.tx.commit()?;
        Ok(value)
    }

    pub fn repository(&self, root: &str) -> StoreResult<Option<Repository>> {
        let conn = self.get_conn()?;
        let repo = conn
            .query_row(
                "SELECT id, root, revision FROM repositories WHERE root = ?1",
                [root],
                row_to_repository,
            )
            .optional()?;
        Ok(repo)
    }

    pub fn ensure_repository(&self, root: &str) -> StoreResult<Repository> {
        if let Some(repo) = self.repository(root)? {
            return Ok(repo);
        }
        let conn = self.get_conn()?;
        conn.execute("INSERT OR IGNORE INTO repositories (root) VALUES (?1)", [root])?;
        let repo = conn.query_row(
            "SELECT id, root, revision FROM repositories WHERE root = ?1",
            [root],
            row_to_repository,
        )?;
        info!("Registered repository {} (id {})", repo.root, repo.id);
        Ok(repo)
    }

    pub fn repositories(&self) -> StoreResult<Vec<Repository>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT id, root, revision FROM repositories ORDER BY root")?;
        let repos = stmt
            .query_map([], row_to_repository)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    /// Repository whose root contains `path`, preferring the deepest root.
    pub fn repository_containing(&self, path: &Path) -> StoreResult<Option<Repository>> {
        let repo = self
            .repositories()?
            .into_iter()
            .filter(|repo| path.starts_with(&repo.root))
            .max_by_key(|repo| repo.root.len());
        Ok(repo)
    }

    pub fn source_files(&self, repo_id: i64) -> StoreResult<Vec<SourceFile>> {
        let conn = self.get_conn()?;
        load_source_files(&conn, repo_id)
    }

    pub fn cache_entry(&self, repo_id: i64, path: &str) -> StoreResult<Option<CacheEntry>> {
        let conn = self.get_conn()?;
        let entry = conn
            .query_row(
                "SELECT path, fingerprint, symbol_ids, relationship_ids
                 FROM cache_entries WHERE repo_id = ?1 AND path = ?2",
                params![repo_id, path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match entry {
            Some((path, fingerprint, symbol_ids, relationship_ids)) => Ok(Some(CacheEntry {
                path,
                fingerprint,
                symbol_ids: serde_json::from_str(&symbol_ids)?,
                relationship_ids: serde_json::from_str(&relationship_ids)?,
            })),
            None => Ok(None),
        }
    }

    /// Check that every file's rows agree with its cache entry.
    pub fn verify_repository(&self, repo_id: i64) -> StoreResult<()> {
        let conn = self.get_conn()?;
        verify_repository(&conn, repo_id)
    }

    pub fn symbols(&self, repo_id: i64) -> StoreResult<Vec<Symbol>> {
        let conn = self.get_conn()?;
        load_symbols(&conn, repo_id, None)
    }

    /// Symbols under a path prefix (a file or a directory), in declaration order.
    pub fn symbols_under(&self, repo_id: i64, prefix: &str) -> StoreResult<Vec<Symbol>> {
        let conn = self.get_conn()?;
        load_symbols(&conn, repo_id, Some(prefix))
    }

    pub fn relationships(&self, repo_id: i64) -> StoreResult<Vec<StoredRelationship>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.kind, r.source_id, r.file, r.target_id, r.target_name, r.module_hint, r.line,
                    t.qualified_name, t.file
             FROM relationships r
             LEFT JOIN symbols t ON t.repo_id = r.repo_id AND t.id = r.target_id
             WHERE r.repo_id = ?1
             ORDER BY r.source_id, r.kind, r.target_name, r.id",
        )?;
        let rels = stmt
            .query_map([repo_id], |row| {
                Ok(StoredRelationship {
                    relationship: row_to_relationship(row)?,
                    target_qualified_name: row.get(8)?,
                    target_file: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rels)
    }

    pub fn stats(&self, repo_id: i64) -> StoreResult<GraphStats> {
        let conn = self.get_conn()?;
        let count = |sql: &str| -> StoreResult<usize> {
            let n: i64 = conn.query_row(sql, [repo_id], |row| row.get(0))?;
            Ok(n as usize)
        };
        let grouped = |sql: &str| -> StoreResult<Vec<(String, usize)>> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([repo_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        };

        Ok(GraphStats {
            total_files: count("SELECT COUNT(*) FROM source_files WHERE repo_id = ?1")?,
            total_symbols: count("SELECT COUNT(*) FROM symbols WHERE repo_id = ?1")?,
            total_relationships: count("SELECT COUNT(*) FROM relationships WHERE repo_id = ?1")?,
            resolved_relationships: count(
                "SELECT COUNT(*) FROM relationships WHERE repo_id = ?1 AND target_id IS NOT NULL",
            )?,
            symbols_by_kind: grouped(
                "SELECT kind, COUNT(*) AS n FROM symbols WHERE repo_id = ?1
                 GROUP BY kind ORDER BY n DESC, kind",
            )?,
            relationships_by_kind: grouped(
                "SELECT kind, COUNT(*) AS n FROM relationships WHERE repo_id = ?1
                 GROUP BY kind ORDER BY n DESC, kind",
            )?,
            files_by_language: grouped(
                "SELECT language, COUNT(*) AS n FROM source_files WHERE repo_id = ?1
                 GROUP BY language ORDER BY n DESC, language",
            )?,
        })
    }

    /// Forget one repository entirely. All-or-nothing.
    pub fn drop_repository(&self, root: &str) -> StoreResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM repositories WHERE root = ?1", [root])?;
        tx.commit()?;
        info!("Dropped cache for {} ({} repository rows)", root, removed);
        Ok(removed > 0)
    }

    /// Forget every repository. All-or-nothing.
    pub fn drop_all(&self) -> StoreResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM repositories", [])?;
        tx.commit()?;
        info!("Dropped cache for {} repositories", removed);
        Ok(removed)
    }
}

/// Write access to one repository's graph inside a transaction
pub struct GraphWriter<'conn> {
    tx: Transaction<'conn>,
    repo_id: i64,
}

impl GraphWriter<'_> {
    /// Increment and return the repository revision
    pub fn bump_revision(&mut self) -> StoreResult<u64> {
        self.tx.execute(
            "UPDATE repositories SET revision = revision + 1 WHERE id = ?1",
            [self.repo_id],
        )?;
        let revision: i64 = self.tx.query_row(
            "SELECT revision FROM repositories WHERE id = ?1",
            [self.repo_id],
            |row| row.get(0),
        )?;
        Ok(revision as u64)
    }

    /// Remove everything `path` contributed. Relationships elsewhere that pointed at
    /// its symbols become unresolved. Returns the removed symbols' qualified names.
    pub fn remove_file(&mut self, path: &str) -> StoreResult<Vec<String>> {
        let removed_names = {
            let mut stmt = self
                .tx
                .prepare("SELECT qualified_name FROM symbols WHERE repo_id = ?1 AND file = ?2")?;
            let names = stmt
                .query_map(params![self.repo_id, path], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        };

        let unlinked = self.tx.execute(
            "UPDATE relationships SET target_id = NULL
             WHERE repo_id = ?1 AND file != ?2 AND target_id IN
                 (SELECT id FROM symbols WHERE repo_id = ?1 AND file = ?2)",
            params![self.repo_id, path],
        )?;
        self.tx.execute(
            "DELETE FROM source_files WHERE repo_id = ?1 AND path = ?2",
            params![self.repo_id, path],
        )?;

        debug!(
            "Removed {} ({} symbols, {} inbound relationships unlinked)",
            path,
            removed_names.len(),
            unlinked
        );
        Ok(removed_names)
    }

    /// Insert a freshly extracted file with unresolved relationships and its cache entry.
    pub fn insert_file(
        &mut self,
        extracted: &ExtractedFile,
        fingerprint: &str,
        revision: u64,
    ) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp();

        self.tx.execute(
            "INSERT INTO source_files (repo_id, path, language, fingerprint, revision, analyzed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.repo_id,
                extracted.path,
                extracted.language.as_str(),
                fingerprint,
                revision as i64,
                now
            ],
        )?;

        let mut symbol_ids = Vec::with_capacity(extracted.symbols.len());
        {
            let mut stmt = self.tx.prepare(
                "INSERT INTO symbols (
                    repo_id, id, file, kind, name, qualified_name,
                    start_line, start_column, end_line, end_column,
                    signature, parent_id, language, details
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?;
            for symbol in &extracted.symbols {
                stmt.execute(params![
                    self.repo_id,
                    symbol.id,
                    symbol.file,
                    symbol.kind.as_str(),
                    symbol.name,
                    symbol.qualified_name,
                    symbol.span.start_line,
                    symbol.span.start_column,
                    symbol.span.end_line,
                    symbol.span.end_column,
                    serde_json::to_string(&symbol.signature)?,
                    symbol.parent_id,
                    symbol.language.as_str(),
                    serde_json::to_string(&symbol.details)?,
                ])?;
                symbol_ids.push(symbol.id.clone());
            }
        }

        let mut relationship_ids = Vec::with_capacity(extracted.stubs.len());
        {
            let mut stmt = self.tx.prepare(
                "INSERT INTO relationships (
                    repo_id, id, file, source_id, kind, target_name, target_key, module_hint, target_id, line
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9)",
            )?;
            for stub in &extracted.stubs {
                let id = stub.relationship_id();
                stmt.execute(params![
                    self.repo_id,
                    id,
                    stub.file,
                    stub.source_id,
                    stub.kind.as_str(),
                    stub.target_name,
                    stub.target_key(),
                    stub.module_hint,
                    stub.line,
                ])?;
                relationship_ids.push(id);
            }
        }

        self.tx.execute(
            "INSERT INTO cache_entries (repo_id, path, fingerprint, symbol_ids, relationship_ids, written_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.repo_id,
                extracted.path,
                fingerprint,
                serde_json::to_string(&symbol_ids)?,
                serde_json::to_string(&relationship_ids)?,
                now
            ],
        )?;

        Ok(())
    }

    pub fn symbol_index(&self) -> StoreResult<Vec<IndexedSymbol>> {
        let mut stmt = self.tx.prepare(
            "SELECT s.id, s.kind, s.qualified_name, s.file, s.start_line, s.start_column, f.revision
             FROM symbols s
             JOIN source_files f ON f.repo_id = s.repo_id AND f.path = s.file
             WHERE s.repo_id = ?1
             ORDER BY s.file, s.start_line, s.start_column, s.id",
        )?;
        let symbols = stmt
            .query_map([self.repo_id], |row| {
                let kind: String = row.get(1)?;
                Ok(IndexedSymbol {
                    id: row.get(0)?,
                    kind: SymbolKind::from_str(&kind).ok_or_else(|| decode_error(1, "symbol kind", &kind))?,
                    qualified_name: row.get(2)?,
                    file: row.get(3)?,
                    start_line: row.get(4)?,
                    start_column: row.get(5)?,
                    revision: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(symbols)
    }

    pub fn all_relationships(&self) -> StoreResult<Vec<Relationship>> {
        let mut stmt = self.tx.prepare(
            "SELECT id, kind, source_id, file, target_id, target_name, module_hint, line
             FROM relationships WHERE repo_id = ?1 ORDER BY id",
        )?;
        let rels = stmt
            .query_map([self.repo_id], row_to_relationship)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rels)
    }

    /// Relationships declared in `files` or whose target key is in `keys`, ordered by id.
    pub fn relationships_affected_by(
        &self,
        files: &BTreeSet<String>,
        keys: &BTreeSet<String>,
    ) -> StoreResult<Vec<Relationship>> {
        let mut selected: BTreeMap<String, Relationship> = BTreeMap::new();

        let mut by_file = self.tx.prepare(
            "SELECT id, kind, source_id, file, target_id, target_name, module_hint, line
             FROM relationships WHERE repo_id = ?1 AND file = ?2",
        )?;
        for file in files {
            for rel in by_file.query_map(params![self.repo_id, file], row_to_relationship)? {
                let rel = rel?;
                selected.insert(rel.id.clone(), rel);
            }
        }

        let mut by_key = self.tx.prepare(
            "SELECT id, kind, source_id, file, target_id, target_name, module_hint, line
             FROM relationships WHERE repo_id = ?1 AND target_key = ?2",
        )?;
        for key in keys {
            for rel in by_key.query_map(params![self.repo_id, key], row_to_relationship)? {
                let rel = rel?;
                selected.insert(rel.id.clone(), rel);
            }
        }

        Ok(selected.into_values().collect())
    }

    /// Persist resolution results
    pub fn set_targets(&mut self, relationships: &[Relationship]) -> StoreResult<usize> {
        let mut stmt = self.tx.prepare(
            "UPDATE relationships SET target_id = ?3
             WHERE repo_id = ?1 AND id = ?2 AND target_id IS NOT ?3",
        )?;
        let mut changed = 0;
        for rel in relationships {
            changed += stmt.execute(params![self.repo_id, rel.id, rel.target_id])?;
        }
        Ok(changed)
    }
}

fn classify_open_error(err: StoreError) -> StoreError {
    match err {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, ref msg))
            if matches!(code.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) =>
        {
            StoreError::corruption(
                msg.clone()
                    .unwrap_or_else(|| "file is not a valid graph store".to_string()),
            )
        }
        other => other,
    }
}

fn check_file_integrity(conn: &Connection) -> StoreResult<()> {
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if verdict != "ok" {
        return Err(StoreError::corruption(format!("integrity check failed: {}", verdict)));
    }
    Ok(())
}

fn verify_repository(conn: &Connection, repo_id: i64) -> StoreResult<()> {
    let missing_entries: i64 = conn.query_row(
        "SELECT COUNT(*) FROM source_files f
         LEFT JOIN cache_entries c ON c.repo_id = f.repo_id AND c.path = f.path
         WHERE f.repo_id = ?1 AND (c.path IS NULL OR c.fingerprint != f.fingerprint)",
        [repo_id],
        |row| row.get(0),
    )?;
    if missing_entries > 0 {
        return Err(StoreError::corruption(format!(
            "{} files have no matching cache entry",
            missing_entries
        )));
    }

    let orphans: i64 = conn.query_row(
        "SELECT COUNT(*) FROM symbols s
         LEFT JOIN cache_entries c ON c.repo_id = s.repo_id AND c.path = s.file
         WHERE s.repo_id = ?1 AND c.path IS NULL",
        [repo_id],
        |row| row.get(0),
    )?;
    if orphans > 0 {
        return Err(StoreError::corruption(format!("{} orphaned symbols", orphans)));
    }

    let dangling: i64 = conn.query_row(
        "SELECT COUNT(*) FROM relationships r
         LEFT JOIN symbols t ON t.repo_id = r.repo_id AND t.id = r.target_id
         WHERE r.repo_id = ?1 AND r.target_id IS NOT NULL AND t.id IS NULL",
        [repo_id],
        |row| row.get(0),
    )?;
    if dangling > 0 {
        return Err(StoreError::corruption(format!("{} dangling relationship targets", dangling)));
    }

    let mut stmt = conn.prepare(
        "SELECT c.path, c.symbol_ids, c.relationship_ids,
                (SELECT COUNT(*) FROM symbols s WHERE s.repo_id = c.repo_id AND s.file = c.path),
                (SELECT COUNT(*) FROM relationships r WHERE r.repo_id = c.repo_id AND r.file = c.path)
         FROM cache_entries c WHERE c.repo_id = ?1",
    )?;
    let rows = stmt.query_map([repo_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)? as usize,
            row.get::<_, i64>(4)? as usize,
        ))
    })?;
    for row in rows {
        let (path, symbol_ids, relationship_ids, symbols, relationships) = row?;
        let symbol_ids: Vec<String> = serde_json::from_str(&symbol_ids)?;
        let relationship_ids: Vec<String> = serde_json::from_str(&relationship_ids)?;
        if symbol_ids.len() != symbols || relationship_ids.len() != relationships {
            return Err(StoreError::corruption(format!(
                "cache entry for {} does not match its stored rows",
                path
            )));
        }
    }

    Ok(())
}

fn load_source_files(conn: &Connection, repo_id: i64) -> StoreResult<Vec<SourceFile>> {
    let mut stmt = conn.prepare(
        "SELECT path, language, fingerprint, revision, analyzed_at
         FROM source_files WHERE repo_id = ?1 ORDER BY path",
    )?;
    let files = stmt
        .query_map([repo_id], |row| {
            let language: String = row.get(1)?;
            Ok(SourceFile {
                path: row.get(0)?,
                language: Language::from_str(&language)
                    .ok_or_else(|| decode_error(1, "language", &language))?,
                fingerprint: row.get(2)?,
                revision: row.get::<_, i64>(3)? as u64,
                analyzed_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(files)
}

fn load_symbols(conn: &Connection, repo_id: i64, prefix: Option<&str>) -> StoreResult<Vec<Symbol>> {
    const COLUMNS: &str = "id, kind, name, qualified_name, file, start_line, start_column,
                           end_line, end_column, signature, parent_id, language, details";

    let symbols = match prefix {
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM symbols WHERE repo_id = ?1
                 ORDER BY file, start_line, start_column, id",
                COLUMNS
            ))?;
            let rows = stmt
                .query_map([repo_id], row_to_symbol)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        Some(prefix) => {
            let prefix = prefix.trim_end_matches('/');
            let pattern = format!("{}/%", escape_like(prefix));
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM symbols
                 WHERE repo_id = ?1 AND (file = ?2 OR file LIKE ?3 ESCAPE '\\')
                 ORDER BY file, start_line, start_column, id",
                COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![repo_id, prefix, pattern], row_to_symbol)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(symbols)
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn decode_error(column: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unknown {}: {}", what, value).into(),
    )
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, column: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_repository(row: &Row) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        root: row.get(1)?,
        revision: row.get::<_, i64>(2)? as u64,
    })
}

/// Convert database row to Symbol
fn row_to_symbol(row: &Row) -> rusqlite::Result<Symbol> {
    let kind: String = row.get(1)?;
    let language: String = row.get(11)?;

    Ok(Symbol {
        id: row.get(0)?,
        kind: SymbolKind::from_str(&kind).ok_or_else(|| decode_error(1, "symbol kind", &kind))?,
        name: row.get(2)?,
        qualified_name: row.get(3)?,
        file: row.get(4)?,
        span: Span {
            start_line: row.get(5)?,
            start_column: row.get(6)?,
            end_line: row.get(7)?,
            end_column: row.get(8)?,
        },
        signature: json_column(row, 9)?,
        parent_id: row.get(10)?,
        language: Language::from_str(&language)
            .ok_or_else(|| decode_error(11, "language", &language))?,
        details: json_column(row, 12)?,
    })
}

/// Convert database row to Relationship
fn row_to_relationship(row: &Row) -> rusqlite::Result<Relationship> {
    let kind: String = row.get(1)?;

    Ok(Relationship {
        id: row.get(0)?,
        kind: RelationshipKind::from_str(&kind)
            .ok_or_else(|| decode_error(1, "relationship kind", &kind))?,
        source_id: row.get(2)?,
        file: row.get(3)?,
        target_id: row.get(4)?,
        target_name: row.get(5)?,
        module_hint: row.get(6)?,
        line: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{symbol_id, ReferenceStub, Signature, SymbolDetails};
    use tempfile::tempdir;

    fn class_symbol(file: &str, name: &str, line: u32) -> Symbol {
        Symbol {
            id: symbol_id(file, name, SymbolKind::Class, 0),
            kind: SymbolKind::Class,
            name: name.to_string(),
            qualified_name: name.to_string(),
            file: file.to_string(),
            span: Span {
                start_line: line,
                start_column: 0,
                end_line: line + 1,
                end_column: 8,
            },
            signature: Signature::default(),
            parent_id: None,
            language: Language::Python,
            details: SymbolDetails::default(),
        }
    }

    fn extracted(path: &str, symbols: Vec<Symbol>, stubs: Vec<ReferenceStub>) -> ExtractedFile {
        ExtractedFile {
            path: path.to_string(),
            language: Language::Python,
            symbols,
            imports: Vec::new(),
            stubs,
        }
    }

    fn open_store() -> (tempfile::TempDir, GraphStore) {
        let dir = tempdir().unwrap();
        let store = GraphStore::open(dir.path().join("cache").join("graph.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("graph.db");

        let store = GraphStore::open(&db_path).unwrap();
        assert!(db_path.exists());
        store.close();
    }

    #[test]
    fn test_garbage_file_is_corruption() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("graph.db");
        std::fs::write(&db_path, vec![0x42u8; 8192]).unwrap();

        let err = GraphStore::open(&db_path).err().unwrap();
        assert!(err.is_corruption(), "unexpected error: {}", err);
    }

    #[test]
    fn test_insert_and_read_file() {
        let (_dir, store) = open_store();
        let repo = store.ensure_repository("/repo").unwrap();

        let base = class_symbol("a.py", "Base", 1);
        let derived = class_symbol("a.py", "Derived", 4);
        let stub = ReferenceStub {
            source_id: derived.id.clone(),
            file: "a.py".to_string(),
            kind: RelationshipKind::InheritsFrom,
            target_name: "Base".to_string(),
            module_hint: None,
            line: 4,
        };
        let file = extracted("a.py", vec![base.clone(), derived.clone()], vec![stub.clone()]);

        store
            .write(repo.id, |w| {
                let revision = w.bump_revision()?;
                w.insert_file(&file, "fp-1", revision)
            })
            .unwrap();

        let symbols = store.symbols(repo.id).unwrap();
        assert_eq!(symbols, vec![base.clone(), derived]);

        let entry = store.cache_entry(repo.id, "a.py").unwrap().unwrap();
        assert_eq!(entry.fingerprint, "fp-1");
        assert_eq!(entry.symbol_ids.len(), 2);
        assert_eq!(entry.relationship_ids, vec![stub.relationship_id()]);

        let rels = store.relationships(repo.id).unwrap();
        assert_eq!(rels.len(), 1);
        assert!(!rels[0].relationship.is_resolved());

        store.verify_repository(repo.id).unwrap();
        assert_eq!(store.repository("/repo").unwrap().unwrap().revision, 1);
    }

    #[test]
    fn test_remove_file_unlinks_inbound_targets() {
        let (_dir, store) = open_store();
        let repo = store.ensure_repository("/repo").unwrap();

        let base = class_symbol("a.py", "Base", 1);
        let derived = class_symbol("b.py", "Derived", 1);
        let stub = ReferenceStub {
            source_id: derived.id.clone(),
            file: "b.py".to_string(),
            kind: RelationshipKind::InheritsFrom,
            target_name: "Base".to_string(),
            module_hint: None,
            line: 1,
        };

        store
            .write(repo.id, |w| {
                w.insert_file(&extracted("a.py", vec![base.clone()], vec![]), "fp-a", 1)?;
                w.insert_file(&extracted("b.py", vec![derived.clone()], vec![stub.clone()]), "fp-b", 1)?;
                let mut rel = w.all_relationships()?.remove(0);
                rel.target_id = Some(base.id.clone());
                w.set_targets(&[rel])?;
                Ok(())
            })
            .unwrap();

        let removed = store.write(repo.id, |w| w.remove_file("a.py")).unwrap();
        assert_eq!(removed, vec!["Base".to_string()]);

        let rels = store.relationships(repo.id).unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relationship.target_id, None);
        assert_eq!(rels[0].relationship.target_name, "Base");
        assert!(store.cache_entry(repo.id, "a.py").unwrap().is_none());
        store.verify_repository(repo.id).unwrap();
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let (_dir, store) = open_store();
        let repo = store.ensure_repository("/repo").unwrap();
        let file = extracted("a.py", vec![class_symbol("a.py", "Base", 1)], vec![]);

        let result: StoreResult<()> = store.write(repo.id, |w| {
            w.insert_file(&file, "fp", 1)?;
            Err(StoreError::corruption("simulated"))
        });
        assert!(result.is_err());

        assert!(store.symbols(repo.id).unwrap().is_empty());
        assert!(store.source_files(repo.id).unwrap().is_empty());
    }

    #[test]
    fn test_symbols_under_prefix() {
        let (_dir, store) = open_store();
        let repo = store.ensure_repository("/repo").unwrap();

        store
            .write(repo.id, |w| {
                w.insert_file(&extracted("pkg/a.py", vec![class_symbol("pkg/a.py", "A", 1)], vec![]), "1", 1)?;
                w.insert_file(&extracted("pkg_x/b.py", vec![class_symbol("pkg_x/b.py", "B", 1)], vec![]), "2", 1)?;
                w.insert_file(&extracted("c.py", vec![class_symbol("c.py", "C", 1)], vec![]), "3", 1)
            })
            .unwrap();

        let names: Vec<_> = store
            .symbols_under(repo.id, "pkg")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["A"]);

        let names: Vec<_> = store
            .symbols_under(repo.id, "c.py")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["C"]);
    }

    #[test]
    fn test_drop_repository_and_all() {
        let (_dir, store) = open_store();
        let one = store.ensure_repository("/one").unwrap();
        let two = store.ensure_repository("/two").unwrap();

        for repo in [&one, &two] {
            store
                .write(repo.id, |w| {
                    w.insert_file(&extracted("a.py", vec![class_symbol("a.py", "A", 1)], vec![]), "fp", 1)
                })
                .unwrap();
        }

        assert!(store.drop_repository("/one").unwrap());
        assert!(store.repository("/one").unwrap().is_none());
        assert_eq!(store.symbols(one.id).unwrap().len(), 0);
        assert_eq!(store.symbols(two.id).unwrap().len(), 1);

        assert_eq!(store.drop_all().unwrap(), 1);
        assert!(store.repositories().unwrap().is_empty());
        assert_eq!(store.symbols(two.id).unwrap().len(), 0);
    }

    #[test]
    fn test_repository_containing_prefers_deepest_root() {
        let (_dir, store) = open_store();
        store.ensure_repository("/work").unwrap();
        store.ensure_repository("/work/app").unwrap();

        let repo = store
            .repository_containing(Path::new("/work/app/src"))
            .unwrap()
            .unwrap();
        assert_eq!(repo.root, "/work/app");
        assert!(store
            .repository_containing(Path::new("/elsewhere"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = open_store();
        let repo = store.ensure_repository("/repo").unwrap();

        let stats = store.stats(repo.id).unwrap();
        assert_eq!(stats.total_symbols, 0);
        assert_eq!(stats.total_files, 0);
        assert_eq!(stats.total_relationships, 0);
    }
}
