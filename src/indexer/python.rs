// Python adapter

use std::collections::HashMap;
use tree_sitter::{Node, Tree};

use super::{
    definitions_by_position, join_module_path, line_of, named_children, node_text, parent_dir,
    position_key, qualify, summary_line, LanguageAdapter, References, SourceText, StubSink,
    SymbolIds,
};
use crate::index::{
    ImportBinding, Language, Parameter, RelationshipKind, Signature, Span, Symbol,
    SymbolDetails, SymbolKind,
};

/// Names that never produce `references_type` stubs
const PRIMITIVE_TYPES: &[&str] = &[
    "int", "str", "float", "bool", "bytes", "object", "None", "complex", "list", "dict",
    "set", "tuple", "frozenset", "type", "Any", "Optional", "Union", "List", "Dict", "Set",
    "Tuple", "Callable", "Iterable", "Iterator", "Sequence", "Mapping", "TypeAlias",
];

/// Builtin functions that never produce `calls` stubs
const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "chr", "dict", "dir", "divmod",
    "enumerate", "filter", "float", "format", "frozenset", "getattr", "hasattr", "hash",
    "hex", "id", "input", "int", "isinstance", "issubclass", "iter", "len", "list", "map",
    "max", "min", "next", "object", "open", "ord", "pow", "print", "range", "repr",
    "reversed", "round", "set", "setattr", "slice", "sorted", "str", "sum", "super",
    "tuple", "type", "vars", "zip",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PythonAdapter;

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> Language {
        Language::Python
    }

    fn grammar(&self, _path: &str) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn extract_symbols(&self, tree: &Tree, source: SourceText<'_>) -> Vec<Symbol> {
        let mut walker = SymbolWalker {
            source,
            ids: SymbolIds::new(source.path),
            symbols: Vec::new(),
        };
        walker.visit(tree.root_node(), &Scope::default());
        walker.symbols
    }

    fn extract_references(
        &self,
        tree: &Tree,
        source: SourceText<'_>,
        symbols: &[Symbol],
    ) -> References {
        let mut imports = Vec::new();
        collect_imports(tree.root_node(), source, &mut imports);

        let stubs = {
            let mut walker = ReferenceWalker {
                text: source.text,
                definitions: definitions_by_position(symbols),
                names: symbols
                    .iter()
                    .map(|s| (s.id.clone(), s.qualified_name.clone()))
                    .collect(),
                sink: StubSink::new(source.path, &imports),
            };
            walker.visit(tree.root_node(), &Context::default());
            walker.sink.finish()
        };

        References { imports, stubs }
    }
}

#[derive(Clone, Default)]
struct Scope {
    names: Vec<String>,
    parent_id: Option<String>,
    in_class: bool,
}

struct SymbolWalker<'a> {
    source: SourceText<'a>,
    ids: SymbolIds<'a>,
    symbols: Vec<Symbol>,
}

impl SymbolWalker<'_> {
    fn text(&self, node: Node<'_>) -> String {
        node_text(node, self.source.text).to_string()
    }

    fn visit(&mut self, node: Node<'_>, scope: &Scope) {
        match node.kind() {
            "decorated_definition" => {
                let decorators = named_children(node)
                    .into_iter()
                    .filter(|c| c.kind() == "decorator")
                    .map(|c| self.text(c).trim_start_matches('@').trim().to_string())
                    .collect();
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.definition(definition, scope, decorators);
                }
            }
            "function_definition" | "class_definition" => self.definition(node, scope, Vec::new()),
            "expression_statement" => {
                for child in named_children(node) {
                    if child.kind() == "assignment" {
                        self.annotated_alias(child, scope);
                    }
                }
            }
            "type_alias_statement" => self.alias_statement(node, scope),
            _ => {
                for child in named_children(node) {
                    self.visit(child, scope);
                }
            }
        }
    }

    fn definition(&mut self, node: Node<'_>, scope: &Scope, decorators: Vec<String>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let qualified_name = qualify(&scope.names, &name);
        let is_class = node.kind() == "class_definition";
        let kind = if is_class {
            SymbolKind::Class
        } else if scope.in_class {
            SymbolKind::Method
        } else {
            SymbolKind::Function
        };
        let id = self.ids.next(&qualified_name, kind);

        let signature = if is_class {
            Signature::default()
        } else {
            Signature {
                parameters: node
                    .child_by_field_name("parameters")
                    .map(|p| self.parameters(p))
                    .unwrap_or_default(),
                return_type: node.child_by_field_name("return_type").map(|r| self.text(r)),
            }
        };

        let body = node.child_by_field_name("body");
        let details = SymbolDetails {
            docstring: body.and_then(|b| self.docstring(b)),
            decorators,
            is_async: !is_class && has_async_keyword(node),
            aliased_type: None,
        };

        self.symbols.push(Symbol {
            id: id.clone(),
            kind,
            name: name.clone(),
            qualified_name,
            file: self.source.path.to_string(),
            span: Span::from_node(node),
            signature,
            parent_id: scope.parent_id.clone(),
            language: Language::Python,
            details,
        });

        if let Some(body) = body {
            let mut names = scope.names.clone();
            names.push(name);
            let inner = Scope {
                names,
                parent_id: Some(id),
                in_class: is_class,
            };
            self.visit(body, &inner);
        }
    }

    /// `X: TypeAlias = ...`
    fn annotated_alias(&mut self, node: Node<'_>, scope: &Scope) {
        let (Some(left), Some(annotation), Some(right)) = (
            node.child_by_field_name("left"),
            node.child_by_field_name("type"),
            node.child_by_field_name("right"),
        ) else {
            return;
        };
        let annotation = self.text(annotation);
        if left.kind() != "identifier"
            || !(annotation == "TypeAlias" || annotation.ends_with(".TypeAlias"))
        {
            return;
        }
        let name = self.text(left);
        let aliased = self.text(right);
        self.push_alias(node, scope, name, aliased);
    }

    /// `type X = ...`
    fn alias_statement(&mut self, node: Node<'_>, scope: &Scope) {
        let types: Vec<_> = named_children(node)
            .into_iter()
            .filter(|c| c.kind() == "type")
            .collect();
        let (Some(left), Some(right)) = (types.first(), types.last()) else {
            return;
        };
        if left.id() == right.id() {
            return;
        }
        let left = self.text(*left);
        let name = left.split('[').next().unwrap_or(&left).trim().to_string();
        let aliased = self.text(*right);
        self.push_alias(node, scope, name, aliased);
    }

    fn push_alias(&mut self, node: Node<'_>, scope: &Scope, name: String, aliased: String) {
        let qualified_name = qualify(&scope.names, &name);
        let id = self.ids.next(&qualified_name, SymbolKind::TypeAlias);
        self.symbols.push(Symbol {
            id,
            kind: SymbolKind::TypeAlias,
            name,
            qualified_name,
            file: self.source.path.to_string(),
            span: Span::from_node(node),
            signature: Signature::default(),
            parent_id: scope.parent_id.clone(),
            language: Language::Python,
            details: SymbolDetails {
                aliased_type: Some(aliased),
                ..SymbolDetails::default()
            },
        });
    }

    fn parameters(&self, node: Node<'_>) -> Vec<Parameter> {
        let mut parameters = Vec::new();
        for child in named_children(node) {
            let (name, annotation) = match child.kind() {
                "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                    (Some(child), None)
                }
                "typed_parameter" => {
                    let annotation = child.child_by_field_name("type");
                    let name = named_children(child)
                        .into_iter()
                        .find(|c| Some(c.id()) != annotation.map(|a| a.id()));
                    (name, annotation)
                }
                "default_parameter" => (child.child_by_field_name("name"), None),
                "typed_default_parameter" => (
                    child.child_by_field_name("name"),
                    child.child_by_field_name("type"),
                ),
                _ => (None, None),
            };
            if let Some(name) = name {
                parameters.push(Parameter {
                    name: self.text(name),
                    type_annotation: annotation.map(|a| self.text(a)),
                });
            }
        }
        parameters
    }

    fn docstring(&self, body: Node<'_>) -> Option<String> {
        let first = named_children(body).into_iter().next()?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = named_children(first).into_iter().next()?;
        if string.kind() != "string" {
            return None;
        }
        summary_line(strip_string_quotes(node_text(string, self.source.text)))
    }
}

fn has_async_keyword(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == "async");
    found
}

fn strip_string_quotes(raw: &str) -> &str {
    raw.trim_start_matches(|c: char| "rRbBuUfF".contains(c))
        .trim_matches(|c| c == '"' || c == '\'')
}

fn collect_imports(node: Node<'_>, source: SourceText<'_>, out: &mut Vec<ImportBinding>) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let (dotted, alias) = split_alias(name, source.text);
                if dotted.is_empty() {
                    continue;
                }
                out.push(ImportBinding {
                    local: alias.unwrap_or_else(|| dotted.clone()),
                    imported: None,
                    module: dotted.replace('.', "/"),
                });
            }
        }
        "import_from_statement" => {
            let Some(module_node) = node.child_by_field_name("module_name") else {
                return;
            };
            let module_text = node_text(module_node, source.text);
            let module = if module_node.kind() == "relative_import" {
                resolve_relative(module_text, source.path)
            } else {
                module_text.replace('.', "/")
            };

            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let (imported, alias) = split_alias(name, source.text);
                if imported.is_empty() {
                    continue;
                }
                out.push(ImportBinding {
                    local: alias.unwrap_or_else(|| imported.clone()),
                    imported: Some(imported),
                    module: module.clone(),
                });
            }
        }
        _ => {
            for child in named_children(node) {
                collect_imports(child, source, out);
            }
        }
    }
}

fn split_alias(node: Node<'_>, text: &str) -> (String, Option<String>) {
    if node.kind() == "aliased_import" {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, text).to_string())
            .unwrap_or_default();
        let alias = node
            .child_by_field_name("alias")
            .map(|n| node_text(n, text).to_string());
        (name, alias)
    } else {
        (node_text(node, text).to_string(), None)
    }
}

/// `..pkg.mod` relative to `a/b/c.py` is `a/pkg/mod`
fn resolve_relative(module: &str, path: &str) -> String {
    let dots = module.chars().take_while(|&c| c == '.').count();
    let rest = module[dots..].replace('.', "/");
    let mut base = parent_dir(path);
    for _ in 1..dots {
        base = parent_dir(base);
    }
    join_module_path(base, &rest)
}

#[derive(Clone, Default)]
struct Context {
    source: Option<String>,
    class: Option<String>,
}

struct ReferenceWalker<'a> {
    text: &'a str,
    definitions: HashMap<(u32, u32), String>,
    names: HashMap<String, String>,
    sink: StubSink<'a>,
}

impl ReferenceWalker<'_> {
    fn visit(&mut self, node: Node<'_>, ctx: &Context) {
        match node.kind() {
            "function_definition" => {
                let id = self.definitions.get(&position_key(node)).cloned();
                if let Some(id) = &id {
                    if let Some(params) = node.child_by_field_name("parameters") {
                        for param in named_children(params) {
                            if let Some(annotation) = param.child_by_field_name("type") {
                                self.type_references(annotation, id);
                            }
                        }
                    }
                    if let Some(ret) = node.child_by_field_name("return_type") {
                        self.type_references(ret, id);
                    }
                }
                let inner = Context {
                    source: id.or_else(|| ctx.source.clone()),
                    class: ctx.class.clone(),
                };
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body, &inner);
                }
            }
            "class_definition" => {
                let id = self.definitions.get(&position_key(node)).cloned();
                if let (Some(id), Some(bases)) = (&id, node.child_by_field_name("superclasses")) {
                    for base in named_children(bases) {
                        let base = if base.kind() == "subscript" {
                            base.child_by_field_name("value")
                        } else {
                            Some(base)
                        };
                        if let Some(name) = base.and_then(|b| dotted_name(b, self.text)) {
                            self.sink
                                .push(id, RelationshipKind::InheritsFrom, &name, line_of(node));
                        }
                    }
                }
                let inner = Context {
                    class: id
                        .as_ref()
                        .and_then(|i| self.names.get(i).cloned())
                        .or_else(|| ctx.class.clone()),
                    source: id.or_else(|| ctx.source.clone()),
                };
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body, &inner);
                }
            }
            "assignment" | "type_alias_statement" => {
                if let Some(id) = self.definitions.get(&position_key(node)).cloned() {
                    let aliased = if node.kind() == "assignment" {
                        node.child_by_field_name("right")
                    } else {
                        named_children(node)
                            .into_iter()
                            .filter(|c| c.kind() == "type")
                            .last()
                    };
                    if let Some(aliased) = aliased {
                        self.type_references(aliased, &id);
                    }
                    return;
                }
                self.visit_children(node, ctx);
            }
            "call" => {
                if let (Some(source), Some(callee)) = (&ctx.source, node.child_by_field_name("function")) {
                    if let Some(name) = self.callee_name(callee, ctx) {
                        self.sink.push(source, RelationshipKind::Calls, &name, line_of(node));
                    }
                }
                self.visit_children(node, ctx);
            }
            "import_statement" | "import_from_statement" => {}
            _ => self.visit_children(node, ctx),
        }
    }

    fn visit_children(&mut self, node: Node<'_>, ctx: &Context) {
        for child in named_children(node) {
            self.visit(child, ctx);
        }
    }

    fn callee_name(&self, callee: Node<'_>, ctx: &Context) -> Option<String> {
        let name = dotted_name(callee, self.text)?;
        if let Some((head, rest)) = name.split_once('.') {
            if head == "self" || head == "cls" {
                return ctx.class.as_ref().map(|class| format!("{}.{}", class, rest));
            }
            return Some(name);
        }
        if BUILTIN_FUNCTIONS.contains(&name.as_str()) {
            return None;
        }
        Some(name)
    }

    fn type_references(&mut self, node: Node<'_>, source_id: &str) {
        match node.kind() {
            "identifier" | "attribute" => {
                if let Some(name) = dotted_name(node, self.text) {
                    let key = crate::index::name_key(&name);
                    if !PRIMITIVE_TYPES.contains(&key) {
                        self.sink.push(
                            source_id,
                            RelationshipKind::ReferencesType,
                            &name,
                            line_of(node),
                        );
                    }
                }
            }
            "string" => {
                let inner = strip_string_quotes(node_text(node, self.text));
                let is_name = !inner.is_empty()
                    && inner
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
                if is_name && !PRIMITIVE_TYPES.contains(&crate::index::name_key(inner)) {
                    self.sink.push(
                        source_id,
                        RelationshipKind::ReferencesType,
                        inner,
                        line_of(node),
                    );
                }
            }
            _ => {
                for child in named_children(node) {
                    self.type_references(child, source_id);
                }
            }
        }
    }
}

/// `a`, `a.b.c`; anything else is not a name
fn dotted_name(node: Node<'_>, text: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, text).to_string()),
        "attribute" => {
            let object = dotted_name(node.child_by_field_name("object")?, text)?;
            let attribute = node.child_by_field_name("attribute")?;
            Some(format!("{}.{}", object, node_text(attribute, text)))
        }
        _ => None,
    }
}
