use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Rust,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Language> {
        let ext = path.extension()?.to_str()?;
        crate::scan::language_for_extension(ext)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Rust => "rust",
        }
    }

    pub fn is_js_family(self) -> bool {
        matches!(
            self,
            Language::TypeScript | Language::Tsx | Language::JavaScript
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportType {
    Static,
    Dynamic,
    Require,
    ReExport,
    TypeOnly,
    /// `mod foo;` in Rust: the child file is part of the parent's module tree.
    ModuleDecl,
}

impl ImportType {
    pub fn is_type_only(self) -> bool {
        self == ImportType::TypeOnly
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBinding {
    /// Exported name in the target module (`default` or `*` for namespaces).
    pub imported: String,
    /// Name the binding is visible as in the importing file.
    pub local: String,
    pub type_only: bool,
    pub namespace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedImport {
    pub module: String,
    pub import_type: ImportType,
    pub line: usize,
    pub bindings: Vec<ImportBinding>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    TypeAlias,
    Enum,
    Variable,
    Constant,
    Struct,
    Trait,
    Module,
}

impl SymbolKind {
    pub fn is_callable(self) -> bool {
        matches!(self, SymbolKind::Function | SymbolKind::Method)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub optional: bool,
    pub variadic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    pub is_async: bool,
}

impl Signature {
    pub fn required_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| !p.optional && !p.variadic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSymbol {
    pub name: String,
    /// `Class.method` for members, plain name otherwise.
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub line: usize,
    pub end_line: usize,
    pub is_exported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// A use of a name inside a file: a call, a member access or a type mention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReference {
    /// Qualified name of the enclosing symbol; `None` at module top level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub name: String,
    /// `member` in `name.member(...)` / `name::member(...)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    pub line: usize,
    pub is_call: bool,
    pub type_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    pub language: Language,
    pub imports: Vec<ParsedImport>,
    pub symbols: Vec<ParsedSymbol>,
    pub references: Vec<ParsedReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub source_path: String,
    pub target_path: String,
    pub import_type: ImportType,
    pub line: usize,
    pub module_specifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedImport {
    pub source: String,
    pub module_specifier: String,
    pub import_type: ImportType,
    pub line: usize,
    pub reason: String,
}

pub const MODULE_SYMBOL: &str = "<module>";

pub fn symbol_id(path: &str, qualified_name: &str) -> String {
    format!("{path}:{qualified_name}")
}

/// Splits `path:Qualified.name` at the last colon that is followed by a name.
pub fn split_symbol_id(id: &str) -> Option<(&str, &str)> {
    let idx = id.rfind(':')?;
    let (path, rest) = id.split_at(idx);
    let name = &rest[1..];
    if path.is_empty() || name.is_empty() {
        return None;
    }
    Some((path, name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    pub id: String,
    pub name: String,
    pub qualified_name: String,
    pub kind: SymbolKind,
    pub file_path: String,
    pub line: usize,
    pub end_line: usize,
    pub is_exported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_symbol_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl Symbol {
    pub fn from_parsed(path: &str, parsed: &ParsedSymbol) -> Self {
        Symbol {
            id: symbol_id(path, &parsed.qualified_name),
            name: parsed.name.clone(),
            qualified_name: parsed.qualified_name.clone(),
            kind: parsed.kind,
            file_path: path.to_string(),
            line: parsed.line,
            end_line: parsed.end_line,
            is_exported: parsed.is_exported,
            parent_symbol_id: parsed.parent.as_ref().map(|parent| symbol_id(path, parent)),
            signature: parsed.signature.clone(),
        }
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name == name || self.qualified_name == name
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDependency {
    pub source_symbol_id: String,
    pub target_symbol_id: String,
    pub target_file_path: String,
    pub is_type_only: bool,
    pub line: usize,
}

/// Memoized parse + resolve output for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub path: String,
    pub language: Language,
    pub dependencies: Vec<Dependency>,
    pub unresolved: Vec<UnresolvedImport>,
    pub symbols: Vec<Symbol>,
}

impl FileNode {
    /// Node for a file that could not be parsed: a leaf with no edges.
    pub fn empty(path: impl Into<String>, language: Language) -> Self {
        FileNode {
            path: path.into(),
            language,
            dependencies: Vec::new(),
            unresolved: Vec::new(),
            symbols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Idle,
    Counting,
    Indexing,
    Validating,
    Complete,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub state: IndexState,
    pub processed: usize,
    pub total: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for IndexStatus {
    fn default() -> Self {
        Self {
            state: IndexState::Idle,
            processed: 0,
            total: 0,
            skipped: 0,
            current_file: None,
            error: None,
        }
    }
}

impl IndexStatus {
    /// Starts a new pass: counters reset, error cleared.
    pub fn begin(&mut self) {
        *self = IndexStatus {
            state: IndexState::Counting,
            ..IndexStatus::default()
        };
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = IndexState::Error;
        self.error = Some(message.into());
        self.current_file = None;
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            IndexState::Counting | IndexState::Indexing | IndexState::Validating
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupInfo {
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_indexed: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNodeSummary {
    pub path: String,
    pub language: Language,
    pub depth: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    pub entry: String,
    pub nodes: Vec<FileNodeSummary>,
    pub edges: Vec<Dependency>,
    pub circular_dependencies: Vec<Vec<String>>,
    pub unresolved: Vec<UnresolvedImport>,
    pub max_depth_reached: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSummary {
    pub duration_ms: u64,
    pub indexed_files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_symbol_id_handles_colons_in_path() {
        assert_eq!(
            split_symbol_id("C:/repo/a.ts:Foo.bar"),
            Some(("C:/repo/a.ts", "Foo.bar"))
        );
        assert_eq!(split_symbol_id("/a.ts:"), None);
    }

    #[test]
    fn import_type_serializes_kebab() {
        assert_eq!(
            serde_json::to_value(ImportType::ReExport).unwrap(),
            "re-export"
        );
        assert_eq!(
            serde_json::to_value(ImportType::TypeOnly).unwrap(),
            "type-only"
        );
    }

    #[test]
    fn index_status_begin_resets_counters() {
        let mut status = IndexStatus {
            state: IndexState::Complete,
            processed: 10,
            total: 10,
            skipped: 3,
            current_file: None,
            error: Some("x".into()),
        };
        status.begin();
        assert_eq!(status.state, IndexState::Counting);
        assert_eq!(status.processed, 0);
        assert!(status.error.is_none());
        assert!(status.is_active());
    }
}
