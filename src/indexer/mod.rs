// Language adapters: source text to symbols and reference stubs

pub mod python;
pub mod typescript;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tree_sitter::{Node, ParseOptions, ParseState, Parser, Tree};

use crate::error::{AdapterUnavailableError, ParseError};
use crate::index::{
    symbol_id, ExtractedFile, ImportBinding, Language, ReferenceStub, RelationshipKind, Span,
    Symbol, SymbolKind,
};

pub use python::PythonAdapter;
pub use typescript::TypeScriptAdapter;

/// One file handed to an adapter
#[derive(Debug, Clone, Copy)]
pub struct SourceText<'a> {
    pub path: &'a str,
    pub text: &'a str,
}

/// Imports and reference stubs found in one file
#[derive(Debug, Default)]
pub struct References {
    pub imports: Vec<ImportBinding>,
    pub stubs: Vec<ReferenceStub>,
}

/// Capability shared by every language front-end
pub trait LanguageAdapter {
    fn language(&self) -> Language;

    /// Grammar used for `path`
    fn grammar(&self, path: &str) -> tree_sitter::Language;

    fn extract_symbols(&self, tree: &Tree, source: SourceText<'_>) -> Vec<Symbol>;

    fn extract_references(
        &self,
        tree: &Tree,
        source: SourceText<'_>,
        symbols: &[Symbol],
    ) -> References;

    /// Parse once and run both passes
    fn extract(&self, path: &str, content: &[u8]) -> Result<ExtractedFile, ParseError> {
        self.extract_within(path, content, None)
    }

    /// Like `extract`, but tree-sitter gives up once `budget` has elapsed.
    fn extract_within(
        &self,
        path: &str,
        content: &[u8],
        budget: Option<Duration>,
    ) -> Result<ExtractedFile, ParseError> {
        let started = Instant::now();
        let text = std::str::from_utf8(content).map_err(|_| ParseError::InvalidEncoding {
            path: path.to_string(),
        })?;

        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar(path))
            .map_err(|e| ParseError::TreeSitter {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        let bytes = text.as_bytes();
        let mut read = |offset: usize, _: tree_sitter::Point| bytes.get(offset..).unwrap_or(&[]);
        let mut out_of_time =
            |_: &ParseState| budget.is_some_and(|budget| started.elapsed() >= budget);
        let options = ParseOptions::new().progress_callback(&mut out_of_time);

        let tree = match parser.parse_with_options(&mut read, None, Some(options)) {
            Some(tree) => tree,
            None => {
                return Err(match budget {
                    Some(budget) if started.elapsed() >= budget => ParseError::Timeout {
                        path: path.to_string(),
                        timeout_ms: budget.as_millis() as u64,
                    },
                    _ => ParseError::TreeSitter {
                        path: path.to_string(),
                        message: "parser returned no tree".to_string(),
                    },
                });
            }
        };

        if let Some(error) = first_syntax_error(tree.root_node()) {
            let span = Span::from_node(error);
            return Err(ParseError::Syntax {
                path: path.to_string(),
                line: span.start_line,
                column: span.start_column,
            });
        }

        let source = SourceText { path, text };
        let symbols = self.extract_symbols(&tree, source);
        let references = self.extract_references(&tree, source, &symbols);

        Ok(ExtractedFile {
            path: path.to_string(),
            language: self.language(),
            symbols,
            imports: references.imports,
            stubs: references.stubs,
        })
    }
}

/// Closed set of adapters, one per supported language
#[derive(Debug, Clone, Copy)]
pub enum Adapter {
    Python(PythonAdapter),
    TypeScript(TypeScriptAdapter),
}

impl Adapter {
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::Python => Adapter::Python(PythonAdapter),
            Language::TypeScript => Adapter::TypeScript(TypeScriptAdapter),
        }
    }

    pub fn for_path(path: &str) -> Option<Self> {
        Language::from_path(path).map(Self::for_language)
    }

    pub fn language(&self) -> Language {
        match self {
            Adapter::Python(a) => a.language(),
            Adapter::TypeScript(a) => a.language(),
        }
    }

    fn grammars(&self) -> Vec<tree_sitter::Language> {
        match self {
            Adapter::Python(a) => vec![a.grammar("module.py")],
            Adapter::TypeScript(a) => vec![a.grammar("module.ts"), a.grammar("module.tsx")],
        }
    }

    /// Check that every grammar this adapter needs loads into a parser
    pub fn check_available(&self) -> Result<(), AdapterUnavailableError> {
        let mut parser = Parser::new();
        for grammar in self.grammars() {
            parser
                .set_language(&grammar)
                .map_err(|e| AdapterUnavailableError {
                    language: self.language(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    pub fn extract(&self, path: &str, content: &[u8]) -> Result<ExtractedFile, ParseError> {
        self.extract_within(path, content, None)
    }

    pub fn extract_within(
        &self,
        path: &str,
        content: &[u8],
        budget: Option<Duration>,
    ) -> Result<ExtractedFile, ParseError> {
        match self {
            Adapter::Python(a) => a.extract_within(path, content, budget),
            Adapter::TypeScript(a) => a.extract_within(path, content, budget),
        }
    }
}

/// First ERROR or MISSING node in document order
pub(crate) fn first_syntax_error(root: Node<'_>) -> Option<Node<'_>> {
    if !root.has_error() {
        return None;
    }
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
    None
}

pub(crate) fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

pub(crate) fn line_of(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

pub(crate) fn qualify(scope: &[String], name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope.join("."), name)
    }
}

/// First line of a docstring or comment body, trimmed
pub(crate) fn summary_line(raw: &str) -> Option<String> {
    raw.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Assigns ids, counting repeated definitions of the same name and kind
pub(crate) struct SymbolIds<'a> {
    file: &'a str,
    seen: HashMap<(String, SymbolKind), usize>,
}

impl<'a> SymbolIds<'a> {
    pub fn new(file: &'a str) -> Self {
        Self {
            file,
            seen: HashMap::new(),
        }
    }

    pub fn next(&mut self, qualified_name: &str, kind: SymbolKind) -> String {
        let ordinal = self
            .seen
            .entry((qualified_name.to_string(), kind))
            .or_insert(0);
        let id = symbol_id(self.file, qualified_name, kind, *ordinal);
        *ordinal += 1;
        id
    }
}

/// Definition node start position to symbol id
pub(crate) fn definitions_by_position(symbols: &[Symbol]) -> HashMap<(u32, u32), String> {
    symbols
        .iter()
        .map(|s| ((s.span.start_line, s.span.start_column), s.id.clone()))
        .collect()
}

pub(crate) fn position_key(node: Node<'_>) -> (u32, u32) {
    let span = Span::from_node(node);
    (span.start_line, span.start_column)
}

/// Collects stubs for one file, canonicalising names through its imports.
pub(crate) struct StubSink<'a> {
    file: &'a str,
    imports: &'a [ImportBinding],
    seen: HashSet<(String, RelationshipKind, String, Option<String>)>,
    stubs: Vec<ReferenceStub>,
}

impl<'a> StubSink<'a> {
    pub fn new(file: &'a str, imports: &'a [ImportBinding]) -> Self {
        Self {
            file,
            imports,
            seen: HashSet::new(),
            stubs: Vec::new(),
        }
    }

    pub fn push(&mut self, source_id: &str, kind: RelationshipKind, name: &str, line: u32) {
        if name.is_empty() {
            return;
        }
        let (target_name, module_hint) = canonicalize(name, self.imports);
        let key = (
            source_id.to_string(),
            kind,
            target_name.clone(),
            module_hint.clone(),
        );
        if !self.seen.insert(key) {
            return;
        }
        self.stubs.push(ReferenceStub {
            source_id: source_id.to_string(),
            file: self.file.to_string(),
            kind,
            target_name,
            module_hint,
            line,
        });
    }

    pub fn finish(self) -> Vec<ReferenceStub> {
        self.stubs
    }
}

/// Rewrite a referenced name through the import that introduced its leading segments.
///
/// The longest matching binding wins. A binding for a single name replaces the
/// matched prefix with the imported name; a module binding drops it.
pub(crate) fn canonicalize(name: &str, imports: &[ImportBinding]) -> (String, Option<String>) {
    let binding = imports
        .iter()
        .filter(|b| {
            name == b.local
                || (name.starts_with(b.local.as_str())
                    && name.as_bytes().get(b.local.len()) == Some(&b'.'))
        })
        .max_by_key(|b| b.local.len());

    let Some(binding) = binding else {
        return (name.to_string(), None);
    };

    let rest = name[binding.local.len()..].trim_start_matches('.');
    match (&binding.imported, rest.is_empty()) {
        (Some(imported), true) => (imported.clone(), Some(binding.module.clone())),
        (Some(imported), false) => (format!("{}.{}", imported, rest), Some(binding.module.clone())),
        (None, true) => (name.to_string(), None),
        (None, false) => (rest.to_string(), Some(binding.module.clone())),
    }
}

/// Join `relative` onto `base` and fold `.` / `..` segments
pub(crate) fn join_module_path(base: &str, relative: &str) -> String {
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Directory part of a repository-relative path
pub(crate) fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(local: &str, imported: Option<&str>, module: &str) -> ImportBinding {
        ImportBinding {
            local: local.to_string(),
            imported: imported.map(str::to_string),
            module: module.to_string(),
        }
    }

    #[test]
    fn test_canonicalize_named_import() {
        let imports = vec![binding("B", Some("Base"), "pkg/base")];
        assert_eq!(
            canonicalize("B", &imports),
            ("Base".to_string(), Some("pkg/base".to_string()))
        );
        assert_eq!(
            canonicalize("B.create", &imports),
            ("Base.create".to_string(), Some("pkg/base".to_string()))
        );
        assert_eq!(canonicalize("Bee", &imports), ("Bee".to_string(), None));
    }

    #[test]
    fn test_canonicalize_module_import() {
        let imports = vec![
            binding("models", None, "app/models"),
            binding("models.user", None, "app/models/user"),
        ];
        assert_eq!(
            canonicalize("models.Order", &imports),
            ("Order".to_string(), Some("app/models".to_string()))
        );
        assert_eq!(
            canonicalize("models.user.User", &imports),
            ("User".to_string(), Some("app/models/user".to_string()))
        );
        assert_eq!(canonicalize("models", &imports), ("models".to_string(), None));
    }

    #[test]
    fn test_join_module_path() {
        assert_eq!(join_module_path("src/app", "./models"), "src/app/models");
        assert_eq!(join_module_path("src/app", "../lib/util"), "src/lib/util");
        assert_eq!(join_module_path("", "./x"), "x");
        assert_eq!(parent_dir("src/app/main.ts"), "src/app");
        assert_eq!(parent_dir("main.ts"), "");
    }

    #[test]
    fn test_symbol_ids_disambiguate_repeats() {
        let mut ids = SymbolIds::new("a.py");
        let first = ids.next("f", SymbolKind::Function);
        let second = ids.next("f", SymbolKind::Function);
        assert_ne!(first, second);
        assert_eq!(first, symbol_id("a.py", "f", SymbolKind::Function, 0));
    }

    #[test]
    fn test_stub_sink_deduplicates() {
        let imports = vec![];
        let mut sink = StubSink::new("a.py", &imports);
        sink.push("s1", RelationshipKind::Calls, "helper", 3);
        sink.push("s1", RelationshipKind::Calls, "helper", 9);
        sink.push("s1", RelationshipKind::ReferencesType, "helper", 9);
        let stubs = sink.finish();
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].line, 3);
    }

    #[test]
    fn test_both_adapters_available() {
        for language in Language::ALL {
            assert!(Adapter::for_language(language).check_available().is_ok());
        }
    }

    #[test]
    fn test_unsupported_path_has_no_adapter() {
        assert!(Adapter::for_path("README.md").is_none());
        assert!(matches!(Adapter::for_path("a.tsx"), Some(Adapter::TypeScript(_))));
    }

    #[test]
    fn test_invalid_utf8_is_encoding_error() {
        let err = Adapter::for_language(Language::Python)
            .extract("bad.py", &[0xff, 0xfe, 0x00])
            .unwrap_err();
        assert_eq!(err, ParseError::InvalidEncoding { path: "bad.py".to_string() });
    }

    fn large_python_module(functions: usize) -> String {
        (0..functions)
            .map(|i| format!("def f{i}(a, b):\n    return g{i}(a) + b\n\n"))
            .collect()
    }

    #[test]
    fn test_parse_budget_stops_tree_sitter() {
        let source = large_python_module(20_000);
        let err = Adapter::for_language(Language::Python)
            .extract_within("big.py", source.as_bytes(), Some(Duration::ZERO))
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::Timeout {
                path: "big.py".to_string(),
                timeout_ms: 0
            }
        );
    }

    #[test]
    fn test_generous_budget_extracts_normally() {
        let source = large_python_module(50);
        let file = Adapter::for_language(Language::Python)
            .extract_within("small.py", source.as_bytes(), Some(Duration::from_secs(60)))
            .unwrap();
        assert_eq!(file.symbols.len(), 50);
    }
}
