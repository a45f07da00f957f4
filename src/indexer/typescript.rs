// TypeScript adapter (.ts, .mts, .cts and .tsx)

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

const FUNCTION_VALUES: &[&str] = &["arrow_function", "function_expression", "function"];

const MODULE_EXTENSIONS: &[&str] = &[".ts", ".tsx", ".mts", ".cts", ".js", ".jsx", ".mjs", ".cjs"];

#[derive(Debug, Clone, Copy, Default)]
pub struct TypeScriptAdapter;

impl LanguageAdapter for TypeScriptAdapter {
    fn language(&self) -> Language {
        Language::TypeScript
    }

    fn grammar(&self, path: &str) -> tree_sitter::Language {
        if path.ends_with(".tsx") {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        }
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
    in_type: bool,
    in_function: bool,
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
            "function_declaration" | "generator_function_declaration" => {
                self.callable(node, node, scope, SymbolKind::Function);
            }
            "method_definition" | "method_signature" | "abstract_method_signature"
                if scope.in_type =>
            {
                self.callable(node, node, scope, SymbolKind::Method);
            }
            "lexical_declaration" | "variable_declaration" if !scope.in_function && !scope.in_type => {
                for declarator in named_children(node) {
                    let value = declarator.child_by_field_name("value");
                    match value {
                        Some(value) if FUNCTION_VALUES.contains(&value.kind()) => {
                            self.callable(declarator, value, scope, SymbolKind::Function);
                        }
                        Some(value) => self.visit(value, scope),
                        None => {}
                    }
                }
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                self.container(node, scope, SymbolKind::Class);
            }
            "interface_declaration" => self.container(node, scope, SymbolKind::Interface),
            "type_alias_declaration" => self.type_alias(node, scope),
            "internal_module" | "module" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| self.text(n))
                    .unwrap_or_default();
                let mut inner = scope.clone();
                if name
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.')
                {
                    inner.names.extend(name.split('.').map(str::to_string));
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body, &inner);
                }
            }
            _ => {
                for child in named_children(node) {
                    self.visit(child, scope);
                }
            }
        }
    }

    /// Functions and methods. `decl` carries the name and span, `func` the signature and body.
    fn callable(&mut self, decl: Node<'_>, func: Node<'_>, scope: &Scope, kind: SymbolKind) {
        let Some(name_node) = decl.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let qualified_name = qualify(&scope.names, &name);
        let id = self.ids.next(&qualified_name, kind);

        let parameters = match func.child_by_field_name("parameters") {
            Some(params) => self.parameters(params),
            None => func
                .child_by_field_name("parameter")
                .map(|p| {
                    vec![Parameter {
                        name: self.text(p),
                        type_annotation: None,
                    }]
                })
                .unwrap_or_default(),
        };

        let signature = Signature {
            parameters,
            return_type: func
                .child_by_field_name("return_type")
                .map(|r| annotation_text(r, self.source.text)),
        };

        let details = SymbolDetails {
            docstring: jsdoc(decl, self.source.text),
            decorators: decorators(decl, self.source.text),
            is_async: has_async_keyword(func),
            aliased_type: None,
        };

        self.symbols.push(Symbol {
            id: id.clone(),
            kind,
            name: name.clone(),
            qualified_name,
            file: self.source.path.to_string(),
            span: Span::from_node(decl),
            signature,
            parent_id: scope.parent_id.clone(),
            language: Language::TypeScript,
            details,
        });

        if let Some(body) = func.child_by_field_name("body") {
            let mut names = scope.names.clone();
            names.push(name);
            let inner = Scope {
                names,
                parent_id: Some(id),
                in_type: false,
                in_function: true,
            };
            self.visit(body, &inner);
        }
    }

    /// Classes and interfaces
    fn container(&mut self, node: Node<'_>, scope: &Scope, kind: SymbolKind) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let qualified_name = qualify(&scope.names, &name);
        let id = self.ids.next(&qualified_name, kind);

        self.symbols.push(Symbol {
            id: id.clone(),
            kind,
            name: name.clone(),
            qualified_name,
            file: self.source.path.to_string(),
            span: Span::from_node(node),
            signature: Signature::default(),
            parent_id: scope.parent_id.clone(),
            language: Language::TypeScript,
            details: SymbolDetails {
                docstring: jsdoc(node, self.source.text),
                decorators: decorators(node, self.source.text),
                ..SymbolDetails::default()
            },
        });

        if let Some(body) = node.child_by_field_name("body") {
            let mut names = scope.names.clone();
            names.push(name);
            let inner = Scope {
                names,
                parent_id: Some(id),
                in_type: true,
                in_function: scope.in_function,
            };
            self.visit(body, &inner);
        }
    }

    fn type_alias(&mut self, node: Node<'_>, scope: &Scope) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
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
            language: Language::TypeScript,
            details: SymbolDetails {
                docstring: jsdoc(node, self.source.text),
                aliased_type: node.child_by_field_name("value").map(|v| self.text(v)),
                ..SymbolDetails::default()
            },
        });
    }

    fn parameters(&self, node: Node<'_>) -> Vec<Parameter> {
        named_children(node)
            .into_iter()
            .filter(|p| matches!(p.kind(), "required_parameter" | "optional_parameter"))
            .filter_map(|p| {
                let pattern = p.child_by_field_name("pattern")?;
                Some(Parameter {
                    name: self.text(pattern),
                    type_annotation: p
                        .child_by_field_name("type")
                        .map(|t| annotation_text(t, self.source.text)),
                })
            })
            .collect()
    }
}

/// `: Foo<T>` to `Foo<T>`
fn annotation_text(node: Node<'_>, text: &str) -> String {
    node_text(node, text)
        .trim_start_matches(':')
        .trim()
        .to_string()
}

fn has_async_keyword(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == "async");
    found
}

/// Node whose preceding siblings hold the declaration's comments and decorators
fn declaration_anchor(node: Node<'_>) -> Node<'_> {
    let mut anchor = node;
    while let Some(parent) = anchor.parent() {
        if matches!(
            parent.kind(),
            "lexical_declaration" | "variable_declaration" | "export_statement" | "ambient_declaration"
        ) {
            anchor = parent;
        } else {
            break;
        }
    }
    anchor
}

fn jsdoc(node: Node<'_>, text: &str) -> Option<String> {
    let mut sibling = declaration_anchor(node).prev_named_sibling();
    while let Some(prev) = sibling {
        match prev.kind() {
            "decorator" => sibling = prev.prev_named_sibling(),
            "comment" => {
                let raw = node_text(prev, text);
                let body = raw.strip_prefix("/**")?.trim_end_matches("*/");
                let cleaned: Vec<&str> = body
                    .lines()
                    .map(|line| line.trim().trim_start_matches('*').trim())
                    .collect();
                return summary_line(&cleaned.join("\n"));
            }
            _ => return None,
        }
    }
    None
}

fn decorators(node: Node<'_>, text: &str) -> Vec<String> {
    let clean = |d: Node<'_>| node_text(d, text).trim_start_matches('@').trim().to_string();

    let mut found: Vec<String> = Vec::new();

    let mut preceding = Vec::new();
    let mut sibling = declaration_anchor(node).prev_named_sibling();
    while let Some(prev) = sibling {
        if prev.kind() != "decorator" {
            break;
        }
        preceding.push(clean(prev));
        sibling = prev.prev_named_sibling();
    }
    preceding.reverse();
    found.extend(preceding);

    let mut current = Some(node);
    while let Some(n) = current {
        found.extend(
            named_children(n)
                .into_iter()
                .filter(|c| c.kind() == "decorator")
                .map(|d| clean(d)),
        );
        current = n.parent().filter(|p| p.kind() == "export_statement");
    }

    found
}

fn collect_imports(node: Node<'_>, source: SourceText<'_>, out: &mut Vec<ImportBinding>) {
    if node.kind() != "import_statement" {
        for child in named_children(node) {
            collect_imports(child, source, out);
        }
        return;
    }

    let Some(specifier) = node.child_by_field_name("source") else {
        return;
    };
    let module = resolve_specifier(
        node_text(specifier, source.text).trim_matches(|c| c == '"' || c == '\'' || c == '`'),
        source.path,
    );

    for clause in named_children(node)
        .into_iter()
        .filter(|c| c.kind() == "import_clause")
    {
        for part in named_children(clause) {
            match part.kind() {
                "identifier" => {
                    let local = node_text(part, source.text).to_string();
                    out.push(ImportBinding {
                        imported: Some(local.clone()),
                        local,
                        module: module.clone(),
                    });
                }
                "namespace_import" => {
                    if let Some(alias) = named_children(part)
                        .into_iter()
                        .find(|c| c.kind() == "identifier")
                    {
                        out.push(ImportBinding {
                            local: node_text(alias, source.text).to_string(),
                            imported: None,
                            module: module.clone(),
                        });
                    }
                }
                "named_imports" => {
                    for specifier in named_children(part)
                        .into_iter()
                        .filter(|c| c.kind() == "import_specifier")
                    {
                        let Some(name) = specifier.child_by_field_name("name") else {
                            continue;
                        };
                        let imported = node_text(name, source.text)
                            .trim_matches(|c| c == '"' || c == '\'')
                            .to_string();
                        let local = specifier
                            .child_by_field_name("alias")
                            .map(|a| node_text(a, source.text).to_string())
                            .unwrap_or_else(|| imported.clone());
                        out.push(ImportBinding {
                            local,
                            imported: Some(imported),
                            module: module.clone(),
                        });
                    }
                }
                _ => {}
            }
        }
    }
}

/// Relative specifiers become module stems; bare specifiers are kept as written.
fn resolve_specifier(specifier: &str, path: &str) -> String {
    if !specifier.starts_with('.') {
        return specifier.to_string();
    }
    let mut joined = join_module_path(parent_dir(path), specifier);
    for ext in MODULE_EXTENSIONS {
        if let Some(stripped) = joined.strip_suffix(ext) {
            joined = stripped.to_string();
            break;
        }
    }
    match joined.strip_suffix("/index") {
        Some(stripped) => stripped.to_string(),
        None if joined == "index" => String::new(),
        None => joined,
    }
}

#[derive(Clone, Default)]
struct Context {
    source: Option<String>,
    class: Option<String>,
    type_params: Vec<String>,
}

struct ReferenceWalker<'a> {
    text: &'a str,
    definitions: HashMap<(u32, u32), String>,
    names: HashMap<String, String>,
    sink: StubSink<'a>,
}

impl ReferenceWalker<'_> {
    fn definition_at(&self, node: Node<'_>) -> Option<String> {
        self.definitions.get(&position_key(node)).cloned()
    }

    fn visit(&mut self, node: Node<'_>, ctx: &Context) {
        match node.kind() {
            "function_declaration"
            | "generator_function_declaration"
            | "method_definition"
            | "method_signature"
            | "abstract_method_signature" => self.callable(node, node, ctx),
            "variable_declarator" => {
                let value = node.child_by_field_name("value");
                match (self.definition_at(node), value) {
                    (Some(_), Some(value)) if FUNCTION_VALUES.contains(&value.kind()) => {
                        self.callable(node, value, ctx)
                    }
                    _ => self.visit_children(node, ctx),
                }
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                let id = self.definition_at(node);
                let inner = self.enter_type(node, id.clone(), ctx);
                if let Some(id) = &id {
                    for heritage in named_children(node)
                        .into_iter()
                        .filter(|c| c.kind() == "class_heritage")
                    {
                        for clause in named_children(heritage) {
                            match clause.kind() {
                                "extends_clause" => {
                                    if let Some(value) = clause.child_by_field_name("value") {
                                        self.heritage(value, id, RelationshipKind::InheritsFrom);
                                    }
                                }
                                "implements_clause" => {
                                    for ty in named_children(clause) {
                                        self.heritage(ty, id, RelationshipKind::Implements);
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body, &inner);
                }
            }
            "interface_declaration" => {
                let id = self.definition_at(node);
                let inner = self.enter_type(node, id.clone(), ctx);
                if let Some(id) = &id {
                    for clause in named_children(node)
                        .into_iter()
                        .filter(|c| c.kind() == "extends_type_clause")
                    {
                        for ty in named_children(clause) {
                            self.heritage(ty, id, RelationshipKind::InheritsFrom);
                        }
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit(body, &inner);
                }
            }
            "type_alias_declaration" => {
                if let Some(id) = self.definition_at(node) {
                    let mut type_params = ctx.type_params.clone();
                    type_params.extend(self.type_parameters(node));
                    if let Some(value) = node.child_by_field_name("value") {
                        self.type_references(value, &id, &type_params);
                    }
                }
            }
            "call_expression" | "new_expression" => {
                let field = if node.kind() == "call_expression" {
                    "function"
                } else {
                    "constructor"
                };
                if let (Some(source), Some(callee)) = (&ctx.source, node.child_by_field_name(field)) {
                    if let Some(name) = self.callee_name(callee, ctx) {
                        self.sink.push(source, RelationshipKind::Calls, &name, line_of(node));
                    }
                }
                self.visit_children(node, ctx);
            }
            "import_statement" => {}
            _ => self.visit_children(node, ctx),
        }
    }

    fn visit_children(&mut self, node: Node<'_>, ctx: &Context) {
        for child in named_children(node) {
            self.visit(child, ctx);
        }
    }

    fn enter_type(&self, node: Node<'_>, id: Option<String>, ctx: &Context) -> Context {
        let mut type_params = ctx.type_params.clone();
        type_params.extend(self.type_parameters(node));
        Context {
            class: id
                .as_ref()
                .and_then(|i| self.names.get(i).cloned())
                .or_else(|| ctx.class.clone()),
            source: id.or_else(|| ctx.source.clone()),
            type_params,
        }
    }

    fn callable(&mut self, decl: Node<'_>, func: Node<'_>, ctx: &Context) {
        let id = self.definition_at(decl);
        let mut type_params = ctx.type_params.clone();
        type_params.extend(self.type_parameters(func));

        if let Some(id) = &id {
            if let Some(params) = func.child_by_field_name("parameters") {
                for param in named_children(params) {
                    if let Some(annotation) = param.child_by_field_name("type") {
                        self.type_references(annotation, id, &type_params);
                    }
                }
            }
            if let Some(ret) = func.child_by_field_name("return_type") {
                self.type_references(ret, id, &type_params);
            }
        }

        let inner = Context {
            source: id.or_else(|| ctx.source.clone()),
            class: ctx.class.clone(),
            type_params,
        };
        if let Some(body) = func.child_by_field_name("body") {
            self.visit(body, &inner);
        }
    }

    fn type_parameters(&self, node: Node<'_>) -> Vec<String> {
        node.child_by_field_name("type_parameters")
            .map(|params| {
                named_children(params)
                    .into_iter()
                    .filter_map(|p| p.child_by_field_name("name"))
                    .map(|n| node_text(n, self.text).to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Heritage entries: `Base`, `ns.Base`, `Base<T>`
    fn heritage(&mut self, node: Node<'_>, source_id: &str, kind: RelationshipKind) {
        let name = match node.kind() {
            "generic_type" => node
                .child_by_field_name("name")
                .map(|n| node_text(n, self.text).to_string()),
            "type_identifier" | "nested_type_identifier" => Some(node_text(node, self.text).to_string()),
            _ => member_chain(node, self.text),
        };
        if let Some(name) = name {
            self.sink.push(source_id, kind, &name, line_of(node));
        }
    }

    fn type_references(&mut self, node: Node<'_>, source_id: &str, type_params: &[String]) {
        match node.kind() {
            "type_identifier" | "nested_type_identifier" => {
                let name = node_text(node, self.text);
                if !type_params.iter().any(|p| p == name) {
                    self.sink.push(
                        source_id,
                        RelationshipKind::ReferencesType,
                        name,
                        line_of(node),
                    );
                }
            }
            _ => {
                for child in named_children(node) {
                    self.type_references(child, source_id, type_params);
                }
            }
        }
    }

    fn callee_name(&self, callee: Node<'_>, ctx: &Context) -> Option<String> {
        let name = member_chain(callee, self.text)?;
        match name.split_once('.') {
            Some(("this", rest)) => ctx.class.as_ref().map(|class| format!("{}.{}", class, rest)),
            _ if name == "this" => None,
            _ => Some(name),
        }
    }
}

/// `a`, `a.b.c`, `this.a`; anything else is not a name
fn member_chain(node: Node<'_>, text: &str) -> Option<String> {
    match node.kind() {
        "identifier" | "this" | "type_identifier" => Some(node_text(node, text).to_string()),
        "member_expression" => {
            let object = member_chain(node.child_by_field_name("object")?, text)?;
            let property = node.child_by_field_name("property")?;
            if property.kind() != "property_identifier" {
                return None;
            }
            Some(format!("{}.{}", object, node_text(property, text)))
        }
        _ => None,
    }
}
