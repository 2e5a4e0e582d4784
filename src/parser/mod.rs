//! Parsing service: file content in, imports/symbols/references out.
//!
//! The rest of the crate only sees [`ParserService`]; the tree-sitter
//! extractors behind it are an implementation detail.

mod javascript;
mod python;
mod rust;

use std::collections::HashMap;
use std::path::Path;
use tree_sitter::Node;

use crate::error::ParseError;
use crate::model::{Language, ParsedFile};

pub trait ParserService: Send {
    fn parse(&mut self, path: &Path, content: &str) -> Result<ParsedFile, ParseError>;

    fn supports(&self, path: &Path) -> bool;

    /// Releases parser resources; later calls to `parse` fail with `Unavailable`.
    fn shutdown(&mut self) {}
}

pub(crate) trait LanguageExtractor: Send {
    fn extract(&mut self, source: &str) -> Option<ParsedFile>;
}

pub struct TreeSitterParsers {
    extractors: HashMap<Language, Box<dyn LanguageExtractor>>,
    closed: bool,
}

impl TreeSitterParsers {
    pub fn new() -> Result<Self, ParseError> {
        let mut extractors: HashMap<Language, Box<dyn LanguageExtractor>> = HashMap::new();
        extractors.insert(
            Language::TypeScript,
            Box::new(javascript::JsExtractor::new(Language::TypeScript)?),
        );
        extractors.insert(
            Language::Tsx,
            Box::new(javascript::JsExtractor::new(Language::Tsx)?),
        );
        extractors.insert(
            Language::JavaScript,
            Box::new(javascript::JsExtractor::new(Language::JavaScript)?),
        );
        extractors.insert(Language::Python, Box::new(python::PythonExtractor::new()?));
        extractors.insert(Language::Rust, Box::new(rust::RustExtractor::new()?));
        Ok(Self {
            extractors,
            closed: false,
        })
    }
}

impl ParserService for TreeSitterParsers {
    fn parse(&mut self, path: &Path, content: &str) -> Result<ParsedFile, ParseError> {
        if self.closed {
            return Err(ParseError::Unavailable("parser session closed".to_string()));
        }
        let display = path.display().to_string();
        let language =
            Language::from_path(path).ok_or_else(|| ParseError::Unsupported(display.clone()))?;
        let extractor = self
            .extractors
            .get_mut(&language)
            .ok_or_else(|| ParseError::Unavailable(language.as_str().to_string()))?;
        extractor
            .extract(content)
            .ok_or(ParseError::Timeout(display))
    }

    fn supports(&self, path: &Path) -> bool {
        Language::from_path(path).is_some_and(|lang| self.extractors.contains_key(&lang))
    }

    fn shutdown(&mut self) {
        self.extractors.clear();
        self.closed = true;
    }
}

pub(crate) fn set_language(
    parser: &mut tree_sitter::Parser,
    language: tree_sitter::Language,
    name: &str,
) -> Result<(), ParseError> {
    parser
        .set_language(&language)
        .map_err(|err| ParseError::Unavailable(format!("{name} grammar: {err}")))
}

pub(crate) fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
}

pub(crate) fn start_line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

pub(crate) fn end_line(node: Node<'_>) -> usize {
    node.end_position().row + 1
}

pub(crate) fn unquote(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let first = trimmed.chars().next()?;
    if !matches!(first, '"' | '\'' | '`') || trimmed.len() < 2 {
        return None;
    }
    trimmed
        .ends_with(first)
        .then(|| trimmed[1..trimmed.len() - 1].to_string())
}

pub(crate) fn has_child_kind(node: Node<'_>, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|child| child.kind() == kind);
    found
}

/// True when `node` is the child stored under `field` on its parent.
pub(crate) fn is_field_of_parent(node: Node<'_>, field: &str) -> bool {
    node.parent()
        .and_then(|parent| parent.child_by_field_name(field))
        .is_some_and(|child| child.id() == node.id())
}
