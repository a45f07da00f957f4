// Query execution engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::StoreError;
use crate::index::db::{GraphStats, GraphStore, StoredRelationship};
use crate::index::{RelationshipKind, Symbol, SymbolKind};

/// Part of a repository a map covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapScope {
    Repository,
    /// A file or directory, relative to the repository root
    Path(String),
}

#[derive(Debug, Clone)]
pub struct MapQuery {
    pub scope: MapScope,
    /// Only these symbol kinds; `None` keeps all
    pub kinds: Option<Vec<SymbolKind>>,
}

impl MapQuery {
    pub fn repository() -> Self {
        Self {
            scope: MapScope::Repository,
            kinds: None,
        }
    }
}

/// Outgoing relationship as shown in a map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipView {
    pub id: String,
    pub kind: RelationshipKind,
    pub target_name: String,
    pub module_hint: Option<String>,
    pub line: u32,
    pub resolved: bool,
    pub target_id: Option<String>,
    pub target_qualified_name: Option<String>,
    pub target_file: Option<String>,
}

impl From<StoredRelationship> for RelationshipView {
    fn from(stored: StoredRelationship) -> Self {
        let rel = stored.relationship;
        Self {
            resolved: rel.is_resolved(),
            id: rel.id,
            kind: rel.kind,
            target_name: rel.target_name,
            module_hint: rel.module_hint,
            line: rel.line,
            target_id: rel.target_id,
            target_qualified_name: stored.target_qualified_name,
            target_file: stored.target_file,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub file: String,
    pub symbol: Symbol,
    pub relationships: Vec<RelationshipView>,
}

/// Symbols with their outgoing relationships, ordered by file then position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuralReport {
    pub entries: Vec<MapEntry>,
}

impl StructuralReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.entries.iter().map(|e| e.relationships.len()).sum()
    }
}

/// Read-only queries over the stored graph
pub struct QueryEngine {
    store: GraphStore,
}

impl QueryEngine {
    pub fn new(store: GraphStore) -> Self {
        Self { store }
    }

    /// Structural map of a repository, or of one file or directory inside it
    pub fn map(&self, root: &str, query: &MapQuery) -> Result<StructuralReport, StoreError> {
        let Some(repo) = self.store.repository(root)? else {
            return Ok(StructuralReport::default());
        };

        let symbols = match &query.scope {
            MapScope::Repository => self.store.symbols(repo.id)?,
            MapScope::Path(prefix) if prefix.is_empty() || prefix == "." => {
                self.store.symbols(repo.id)?
            }
            MapScope::Path(prefix) => self.store.symbols_under(repo.id, prefix)?,
        };

        let mut outgoing: HashMap<String, Vec<RelationshipView>> = HashMap::new();
        for stored in self.store.relationships(repo.id)? {
            outgoing
                .entry(stored.relationship.source_id.clone())
                .or_default()
                .push(stored.into());
        }

        let mut entries: Vec<MapEntry> = symbols
            .into_iter()
            .filter(|s| {
                query
                    .kinds
                    .as_ref()
                    .map_or(true, |kinds| kinds.contains(&s.kind))
            })
            .map(|symbol| {
                let mut relationships = outgoing.remove(&symbol.id).unwrap_or_default();
                relationships.sort_by(|a, b| {
                    (a.kind.as_str(), &a.target_name, &a.id).cmp(&(b.kind.as_str(), &b.target_name, &b.id))
                });
                MapEntry {
                    file: symbol.file.clone(),
                    symbol,
                    relationships,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            (&a.file, a.symbol.span.start_line, a.symbol.span.start_column, &a.symbol.id).cmp(&(
                &b.file,
                b.symbol.span.start_line,
                b.symbol.span.start_column,
                &b.symbol.id,
            ))
        });

        Ok(StructuralReport { entries })
    }

    pub fn stats(&self, root: &str) -> Result<Option<GraphStats>, StoreError> {
        match self.store.repository(root)? {
            Some(repo) => Ok(Some(self.store.stats(repo.id)?)),
            None => Ok(None),
        }
    }
}
