use anyhow::{bail, Context, Result};
use std::path::Path;

use super::{canonical_root, open_store, root_key, store_error};
use crate::config::Config;
use crate::index::{Symbol, SymbolKind};
use crate::query::{MapQuery, MapScope, QueryEngine, StructuralReport};

/// Print the structural map of a synced repository, or of a file or directory inside one
pub async fn show_map(
    path: &str,
    format: &str,
    kinds: &[String],
    config: &Config,
    cache: Option<&Path>,
) -> Result<()> {
    if format != "text" && format != "json" {
        bail!("Unknown output format '{}' (expected text or json)", format);
    }
    let kinds = parse_kinds(kinds)?;

    let target = canonical_root(path)?;
    let store_path = config.resolve_store_path(cache);
    let store = open_store(&store_path)?;

    let repo = store
        .repository_containing(&target)
        .map_err(|e| store_error(e, &store_path))?
        .with_context(|| {
            format!(
                "{} is not inside a synced repository; run `structgraph start <repo>` first",
                target.display()
            )
        })?;

    let relative = target
        .strip_prefix(&repo.root)
        .map(root_key)
        .unwrap_or_default();
    let scope = if relative.is_empty() {
        MapScope::Repository
    } else {
        MapScope::Path(relative)
    };

    let engine = QueryEngine::new(store.clone());
    let report = engine
        .map(&repo.root, &MapQuery { scope, kinds })
        .map_err(|e| store_error(e, &store_path))?;
    store.close();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print!("{}", format_text(&report)),
    }

    Ok(())
}

fn parse_kinds(kinds: &[String]) -> Result<Option<Vec<SymbolKind>>> {
    if kinds.is_empty() {
        return Ok(None);
    }
    let mut parsed = Vec::with_capacity(kinds.len());
    for name in kinds {
        match SymbolKind::from_str(name.trim()) {
            Some(kind) => parsed.push(kind),
            None => {
                let valid: Vec<_> = SymbolKind::ALL.iter().map(|k| k.as_str()).collect();
                bail!("Unknown symbol kind '{}' (expected one of: {})", name, valid.join(", "));
            }
        }
    }
    Ok(Some(parsed))
}

fn describe(symbol: &Symbol) -> String {
    let mut line = format!(
        "{} {} ({}:{})",
        symbol.kind, symbol.qualified_name, symbol.span.start_line, symbol.span.start_column
    );
    if symbol.kind.is_callable() {
        let params: Vec<String> = symbol
            .signature
            .parameters
            .iter()
            .map(|p| match &p.type_annotation {
                Some(ty) => format!("{}: {}", p.name, ty),
                None => p.name.clone(),
            })
            .collect();
        line.push_str(&format!(" ({})", params.join(", ")));
        if let Some(ret) = &symbol.signature.return_type {
            line.push_str(&format!(" -> {}", ret));
        }
    }
    line
}

fn format_text(report: &StructuralReport) -> String {
    if report.is_empty() {
        return "No symbols found\n".to_string();
    }

    let mut out = String::new();
    let mut current_file: Option<&str> = None;
    for entry in &report.entries {
        if current_file != Some(entry.file.as_str()) {
            if current_file.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("📄 {}\n", entry.file));
            current_file = Some(entry.file.as_str());
        }
        out.push_str(&format!("  {}\n", describe(&entry.symbol)));
        for rel in &entry.relationships {
            let target = match (&rel.target_qualified_name, &rel.target_file) {
                (Some(name), Some(file)) => format!("{} ({})", name, file),
                _ => format!("{} (unresolved)", rel.target_name),
            };
            out.push_str(&format!("    {} {} @{}\n", rel.kind, target, rel.line));
        }
    }
    out.push_str(&format!(
        "\n{} symbols, {} relationships\n",
        report.len(),
        report.relationship_count()
    ));
    out
}
