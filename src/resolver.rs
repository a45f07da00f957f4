// Relationship resolution: reference stubs to symbol ids

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::index::db::IndexedSymbol;
use crate::index::{module_stem, Relationship, ReferenceStub};

/// How much of the graph a sync re-resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionScope {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSummary {
    pub scope: ResolutionScope,
    pub considered: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

/// All symbols currently known in a repository, by qualified name
pub struct SymbolIndex {
    by_name: HashMap<String, Vec<IndexedSymbol>>,
    stems: HashMap<String, String>,
}

impl SymbolIndex {
    pub fn new(symbols: Vec<IndexedSymbol>) -> Self {
        let mut by_name: HashMap<String, Vec<IndexedSymbol>> = HashMap::new();
        let mut stems = HashMap::new();
        for symbol in symbols {
            stems
                .entry(symbol.file.clone())
                .or_insert_with(|| module_stem(&symbol.file));
            by_name
                .entry(symbol.qualified_name.clone())
                .or_default()
                .push(symbol);
        }
        Self { by_name, stems }
    }

    fn stem_of(&self, file: &str) -> &str {
        self.stems.get(file).map(String::as_str).unwrap_or("")
    }

    fn candidates<'a>(
        &'a self,
        stub: &ReferenceStub,
        qualified_name: &str,
    ) -> impl Iterator<Item = &'a IndexedSymbol> + 'a {
        let kind = stub.kind;
        self.by_name
            .get(qualified_name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter(move |s| kind.accepts_target(s.kind))
    }

    /// Pick the target for one stub. `None` leaves the relationship unresolved.
    ///
    /// Order: same file, then the imported module, then anywhere in the repository.
    /// Ties go to the most recently analyzed file, then path, then position, then id.
    pub fn resolve(&self, stub: &ReferenceStub) -> Option<&IndexedSymbol> {
        let name = stub.target_name.as_str();

        if let Some(found) = best(self.candidates(stub, name).filter(|s| s.file == stub.file)) {
            return Some(found);
        }

        if let Some(hint) = stub.module_hint.as_deref() {
            if let Some(found) =
                best(self.candidates(stub, name).filter(|s| self.stem_of(&s.file) == hint))
            {
                return Some(found);
            }
            if let Some((module, rest)) = name.split_once('.') {
                let stem = if hint.is_empty() {
                    module.to_string()
                } else {
                    format!("{}/{}", hint, module)
                };
                if let Some(found) =
                    best(self.candidates(stub, rest).filter(|s| self.stem_of(&s.file) == stem))
                {
                    return Some(found);
                }
            }
        }

        best(self.candidates(stub, name))
    }
}

fn best<'a>(candidates: impl Iterator<Item = &'a IndexedSymbol>) -> Option<&'a IndexedSymbol> {
    candidates.min_by(|a, b| tie_break_key(a).cmp(&tie_break_key(b)))
}

fn tie_break_key(s: &IndexedSymbol) -> (Reverse<u64>, &str, u32, u32, &str) {
    (
        Reverse(s.revision),
        s.file.as_str(),
        s.start_line,
        s.start_column,
        s.id.as_str(),
    )
}

/// Resolve a batch of relationships against the index. Pure: output depends only on inputs.
pub fn resolve_all(
    index: &SymbolIndex,
    relationships: Vec<Relationship>,
    scope: ResolutionScope,
) -> (Vec<Relationship>, ResolutionSummary) {
    let mut summary = ResolutionSummary {
        scope,
        considered: relationships.len(),
        resolved: 0,
        unresolved: 0,
    };

    let resolved = relationships
        .into_iter()
        .map(|mut rel| {
            rel.target_id = index.resolve(&rel.stub()).map(|s| s.id.clone());
            if rel.target_id.is_some() {
                summary.resolved += 1;
            } else {
                tracing::debug!(
                    "Unresolved {} reference to {} in {}",
                    rel.kind,
                    rel.target_name,
                    rel.file
                );
                summary.unresolved += 1;
            }
            rel
        })
        .collect();

    (resolved, summary)
}
