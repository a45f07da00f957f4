// Symbol model and graph storage

pub mod db;
pub mod schema;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Supported source languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    TypeScript,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::TypeScript];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::TypeScript => "typescript",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "python" => Some(Language::Python),
            "typescript" => Some(Language::TypeScript),
            _ => None,
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py", "pyi"],
            Language::TypeScript => &["ts", "tsx", "mts", "cts"],
        }
    }

    /// Detect the language from a file extension. `None` means unsupported.
    pub fn from_path(path: &str) -> Option<Self> {
        let ext = Path::new(path).extension()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbol kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    TypeAlias,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 5] = [
        SymbolKind::Function,
        SymbolKind::Method,
        SymbolKind::Class,
        SymbolKind::Interface,
        SymbolKind::TypeAlias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Interface => "interface",
            SymbolKind::TypeAlias => "type_alias",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    InheritsFrom,
    Implements,
    ReferencesType,
    Calls,
}

impl RelationshipKind {
    pub const ALL: [RelationshipKind; 4] = [
        RelationshipKind::InheritsFrom,
        RelationshipKind::Implements,
        RelationshipKind::ReferencesType,
        RelationshipKind::Calls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::InheritsFrom => "inherits_from",
            RelationshipKind::Implements => "implements",
            RelationshipKind::ReferencesType => "references_type",
            RelationshipKind::Calls => "calls",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Symbol kinds a relationship of this kind may point at
    pub fn accepts_target(&self, kind: SymbolKind) -> bool {
        match self {
            RelationshipKind::InheritsFrom => {
                matches!(kind, SymbolKind::Class | SymbolKind::Interface)
            }
            RelationshipKind::Implements | RelationshipKind::ReferencesType => matches!(
                kind,
                SymbolKind::Class | SymbolKind::Interface | SymbolKind::TypeAlias
            ),
            RelationshipKind::Calls => matches!(
                kind,
                SymbolKind::Function | SymbolKind::Method | SymbolKind::Class
            ),
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source span. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Span {
    pub fn from_node(node: tree_sitter::Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self {
            start_line: start.row as u32 + 1,
            start_column: start.column as u32,
            end_line: end.row as u32 + 1,
            end_column: end.column as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_annotation: Option<String>,
}

/// Callable signature. Empty for classes, interfaces and type aliases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
    pub return_type: Option<String>,
}

/// Extra facts about a symbol that are not needed for resolution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDetails {
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
    pub is_async: bool,
    pub aliased_type: Option<String>,
}

/// A named structural element extracted from a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub kind: SymbolKind,
    pub name: String,
    pub qualified_name: String,
    pub file: String,
    pub span: Span,
    pub signature: Signature,
    pub parent_id: Option<String>,
    pub language: Language,
    pub details: SymbolDetails,
}

/// A name brought into a file's scope by an import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    /// Name as used in the importing file
    pub local: String,
    /// Name inside the imported module; `None` for module or namespace imports
    pub imported: Option<String>,
    /// Module stem the name comes from
    pub module: String,
}

/// An unresolved mention of a name, captured during extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceStub {
    pub source_id: String,
    pub file: String,
    pub kind: RelationshipKind,
    pub target_name: String,
    pub module_hint: Option<String>,
    pub line: u32,
}

impl ReferenceStub {
    pub fn relationship_id(&self) -> String {
        relationship_id(
            &self.source_id,
            self.kind,
            &self.target_name,
            self.module_hint.as_deref(),
        )
    }

    /// Last dotted segment of the target; used to find stubs a symbol change may affect.
    pub fn target_key(&self) -> &str {
        name_key(&self.target_name)
    }
}

/// Typed edge from a symbol to another symbol or to an external name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub kind: RelationshipKind,
    pub source_id: String,
    pub file: String,
    pub target_id: Option<String>,
    pub target_name: String,
    pub module_hint: Option<String>,
    pub line: u32,
}

impl Relationship {
    pub fn is_resolved(&self) -> bool {
        self.target_id.is_some()
    }

    pub fn stub(&self) -> ReferenceStub {
        ReferenceStub {
            source_id: self.source_id.clone(),
            file: self.file.clone(),
            kind: self.kind,
            target_name: self.target_name.clone(),
            module_hint: self.module_hint.clone(),
            line: self.line,
        }
    }
}

/// Everything one adapter call produced for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: String,
    pub language: Language,
    pub symbols: Vec<Symbol>,
    pub imports: Vec<ImportBinding>,
    pub stubs: Vec<ReferenceStub>,
}

/// A file as tracked by the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub language: Language,
    pub fingerprint: String,
    pub revision: u64,
    pub analyzed_at: i64,
}

/// What a file contributed to the graph, keyed by its fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: String,
    pub fingerprint: String,
    pub symbol_ids: Vec<String>,
    pub relationship_ids: Vec<String>,
}

/// Content fingerprint of a file
pub fn fingerprint(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\0");
        }
        hasher.update(part.as_bytes());
    }
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..32].to_string()
}

/// Stable symbol id. `ordinal` disambiguates repeated definitions in one file.
pub fn symbol_id(file: &str, qualified_name: &str, kind: SymbolKind, ordinal: usize) -> String {
    if ordinal == 0 {
        short_hash(&[file, qualified_name, kind.as_str()])
    } else {
        let ordinal = ordinal.to_string();
        short_hash(&[file, qualified_name, kind.as_str(), &ordinal])
    }
}

pub fn relationship_id(
    source_id: &str,
    kind: RelationshipKind,
    target_name: &str,
    module_hint: Option<&str>,
) -> String {
    short_hash(&[source_id, kind.as_str(), target_name, module_hint.unwrap_or("")])
}

/// Last segment of a dotted name
pub fn name_key(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Module stem of a repository path: no extension, no `__init__` / `index` suffix.
pub fn module_stem(path: &str) -> String {
    let without_ext = match path.rfind('.') {
        Some(dot) if !path[dot..].contains('/') => &path[..dot],
        _ => path,
    };
    for suffix in ["/__init__", "/index"] {
        if let Some(stripped) = without_ext.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    match without_ext {
        "__init__" | "index" => String::new(),
        other => other.to_string(),
    }
}
