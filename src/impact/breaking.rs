//! Signature diff between two versions of one file.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ParseError;
use crate::model::{ParsedSymbol, Signature};
use crate::parser::ParserService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ExportRemoved,
    VisibilityReduced,
    KindChanged,
    ParameterRemoved,
    RequiredParameterAdded,
    ParameterBecameRequired,
    ParameterTypeChanged,
    ReturnTypeChanged,
    AsyncChanged,
    OptionalParameterAdded,
    ExportAdded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl ChangeKind {
    pub fn severity(self) -> Severity {
        match self {
            ChangeKind::ExportRemoved
            | ChangeKind::VisibilityReduced
            | ChangeKind::KindChanged
            | ChangeKind::ParameterRemoved
            | ChangeKind::RequiredParameterAdded
            | ChangeKind::ParameterBecameRequired => Severity::Error,
            ChangeKind::ParameterTypeChanged
            | ChangeKind::ReturnTypeChanged
            | ChangeKind::AsyncChanged => Severity::Warning,
            ChangeKind::OptionalParameterAdded | ChangeKind::ExportAdded => Severity::Info,
        }
    }

    pub fn is_breaking(self) -> bool {
        self.severity() != Severity::Info
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingChange {
    pub symbol: String,
    pub change: ChangeKind,
    pub breaking: bool,
    pub severity: Severity,
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingSummary {
    pub breaking: usize,
    pub non_breaking: usize,
    pub errors: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingReport {
    pub file_path: String,
    pub has_breaking_changes: bool,
    pub changes: Vec<BreakingChange>,
    pub summary: BreakingSummary,
}

/// Parses both versions of `path` and classifies every change to its public
/// surface. `symbol` narrows the report to one symbol and its members.
pub fn analyze_breaking_changes(
    parser: &mut dyn ParserService,
    path: &Path,
    old_content: &str,
    new_content: &str,
    symbol: Option<&str>,
) -> Result<BreakingReport, ParseError> {
    let old = parser.parse(path, old_content)?;
    let new = parser.parse(path, new_content)?;
    let old_symbols = by_qualified_name(&old.symbols);
    let new_symbols = by_qualified_name(&new.symbols);

    let mut changes = Vec::new();
    for (name, before) in &old_symbols {
        if !before.is_exported || !selected(before, symbol) {
            continue;
        }
        let Some(after) = new_symbols.get(name) else {
            changes.push(change(
                name,
                ChangeKind::ExportRemoved,
                before.line,
                format!("exported {} `{name}` was removed", kind_label(before)),
            ));
            continue;
        };
        if !after.is_exported {
            changes.push(change(
                name,
                ChangeKind::VisibilityReduced,
                after.line,
                format!("`{name}` is no longer exported"),
            ));
            continue;
        }
        if before.kind != after.kind {
            changes.push(change(
                name,
                ChangeKind::KindChanged,
                after.line,
                format!(
                    "`{name}` changed from {} to {}",
                    kind_label(before),
                    kind_label(after)
                ),
            ));
            continue;
        }
        if let (Some(old_sig), Some(new_sig)) = (&before.signature, &after.signature) {
            diff_signatures(name, after.line, old_sig, new_sig, &mut changes);
        }
    }
    for (name, after) in &new_symbols {
        if after.is_exported
            && selected(after, symbol)
            && !old_symbols.get(name).is_some_and(|before| before.is_exported)
        {
            changes.push(change(
                name,
                ChangeKind::ExportAdded,
                after.line,
                format!("new export `{name}`"),
            ));
        }
    }

    let mut summary = BreakingSummary::default();
    for item in &changes {
        if item.breaking {
            summary.breaking += 1;
        } else {
            summary.non_breaking += 1;
        }
        match item.severity {
            Severity::Error => summary.errors += 1,
            Severity::Warning => summary.warnings += 1,
            Severity::Info => {}
        }
    }
    Ok(BreakingReport {
        file_path: path.to_string_lossy().to_string(),
        has_breaking_changes: summary.breaking > 0,
        changes,
        summary,
    })
}

fn by_qualified_name(symbols: &[ParsedSymbol]) -> BTreeMap<&str, &ParsedSymbol> {
    let mut map = BTreeMap::new();
    for symbol in symbols {
        map.entry(symbol.qualified_name.as_str()).or_insert(symbol);
    }
    map
}

fn selected(symbol: &ParsedSymbol, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(name) => {
            symbol.name == name
                || symbol.qualified_name == name
                || symbol.parent.as_deref() == Some(name)
        }
    }
}

fn kind_label(symbol: &ParsedSymbol) -> String {
    serde_json::to_value(symbol.kind)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "symbol".to_string())
}

fn change(symbol: &str, kind: ChangeKind, line: usize, message: String) -> BreakingChange {
    BreakingChange {
        symbol: symbol.to_string(),
        change: kind,
        breaking: kind.is_breaking(),
        severity: kind.severity(),
        line,
        message,
    }
}

fn diff_signatures(
    name: &str,
    line: usize,
    old: &Signature,
    new: &Signature,
    out: &mut Vec<BreakingChange>,
) {
    for (idx, before) in old.params.iter().enumerate() {
        let Some(after) = new.params.get(idx) else {
            out.push(change(
                name,
                ChangeKind::ParameterRemoved,
                line,
                format!("parameter `{}` of `{name}` was removed", before.name),
            ));
            continue;
        };
        let was_optional = before.optional || before.variadic;
        let is_optional = after.optional || after.variadic;
        if was_optional && !is_optional {
            out.push(change(
                name,
                ChangeKind::ParameterBecameRequired,
                line,
                format!("parameter `{}` of `{name}` is now required", after.name),
            ));
        }
        if let (Some(old_type), Some(new_type)) = (&before.type_name, &after.type_name) {
            if normalize_type(old_type) != normalize_type(new_type) {
                out.push(change(
                    name,
                    ChangeKind::ParameterTypeChanged,
                    line,
                    format!(
                        "parameter `{}` of `{name}` changed type from `{old_type}` to `{new_type}`",
                        after.name
                    ),
                ));
            }
        }
    }
    for added in new.params.iter().skip(old.params.len()) {
        let (kind, label) = if added.optional || added.variadic {
            (ChangeKind::OptionalParameterAdded, "optional")
        } else {
            (ChangeKind::RequiredParameterAdded, "required")
        };
        out.push(change(
            name,
            kind,
            line,
            format!("{label} parameter `{}` added to `{name}`", added.name),
        ));
    }
    if let (Some(old_ret), Some(new_ret)) = (&old.return_type, &new.return_type) {
        if normalize_type(old_ret) != normalize_type(new_ret) {
            out.push(change(
                name,
                ChangeKind::ReturnTypeChanged,
                line,
                format!("return type of `{name}` changed from `{old_ret}` to `{new_ret}`"),
            ));
        }
    }
    if old.is_async != new.is_async {
        out.push(change(
            name,
            ChangeKind::AsyncChanged,
            line,
            format!(
                "`{name}` is {} async",
                if new.is_async { "now" } else { "no longer" }
            ),
        ));
    }
}

fn normalize_type(raw: &str) -> String {
    raw.trim_start_matches(':')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}
