//! The crawler: owns the dependency cache, both reverse indexes and the
//! resolver, and is the only code that mutates them.

mod crawl;
mod index;
mod logic;
mod symbols;
mod verify;

pub use index::{IndexPass, IndexStep};
pub use logic::{FileLogic, LogicEdge, UnusedSymbol, UnusedSymbols};
pub use symbols::{CallStep, ExecutionTrace, SymbolCallers, SymbolDependents, SymbolGraph};
pub use verify::{DependencyUsage, UsageReport};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::cache::DependencyCache;
use crate::config::SpiderConfig;
use crate::error::{ParseError, ToolError};
use crate::model::{
    Dependency, FileNode, IndexStatus, Language, ParsedImport, Symbol, UnresolvedImport,
    WarmupInfo,
};
use crate::parser::{ParserService, TreeSitterParsers};
use crate::resolver::{Resolution, Resolver};
use crate::reverse_index::{ReverseEntry, ReverseIndex};
use crate::scan::{self, ExcludeFilter};
use crate::symbol_index::SymbolReverseIndex;
use crate::util;

pub struct Spider {
    config: SpiderConfig,
    root: PathBuf,
    resolver: Resolver,
    parser: Box<dyn ParserService>,
    cache: DependencyCache,
    reverse: ReverseIndex,
    symbols: SymbolReverseIndex,
    exclude: ExcludeFilter,
    status: IndexStatus,
    warmup: WarmupInfo,
}

impl Spider {
    pub fn new(mut config: SpiderConfig, parser: Box<dyn ParserService>) -> Result<Self> {
        config.validate()?;
        let root = config.workspace_root.clone();
        let mut resolver = Resolver::new(root.clone(), &config.aliases);
        if config.tsconfig_paths {
            match resolver.load_tsconfig_paths() {
                Ok(0) => {}
                Ok(count) => debug!(count, "loaded tsconfig path aliases"),
                Err(err) => warn!("ignoring tsconfig paths: {err:#}"),
            }
        }
        let exclude = ExcludeFilter::new(&root, &config.exclude_patterns)?;
        Ok(Self {
            config,
            root,
            resolver,
            parser,
            cache: DependencyCache::new(),
            reverse: ReverseIndex::new(),
            symbols: SymbolReverseIndex::new(),
            exclude,
            status: IndexStatus::default(),
            warmup: WarmupInfo::default(),
        })
    }

    pub fn with_default_parsers(config: SpiderConfig) -> Result<Self> {
        let parsers = TreeSitterParsers::new()?;
        Self::new(config, Box::new(parsers))
    }

    pub fn config(&self) -> &SpiderConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn cache(&self) -> &DependencyCache {
        &self.cache
    }

    pub fn reverse_index(&self) -> &ReverseIndex {
        &self.reverse
    }

    pub fn symbol_index(&self) -> &SymbolReverseIndex {
        &self.symbols
    }

    pub fn status(&self) -> &IndexStatus {
        &self.status
    }

    pub fn warmup(&self) -> &WarmupInfo {
        &self.warmup
    }

    pub fn exclude_filter(&self) -> &ExcludeFilter {
        &self.exclude
    }

    /// Joins a client-supplied path onto the workspace root, rejecting escapes.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, ToolError> {
        util::resolve_in_root(&self.root, raw)
    }

    /// Whether a watcher event for `path` should reach the cache at all.
    pub fn is_tracked(&self, path: &Path) -> bool {
        util::is_within(&self.root, path)
            && scan::is_analyzable(path)
            && !self.exclude.is_excluded(path, false)
    }

    /// Parse + resolve through the cache. A hit returns the stored node as is.
    pub fn analyze(&mut self, path: &Path) -> Result<FileNode, ToolError> {
        let key = util::path_key(path);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.node.clone());
        }
        let file = Path::new(&key);
        if !file.is_file() {
            return Err(ToolError::file_not_found(&key));
        }
        if !self.parser.supports(file) {
            return Err(ParseError::Unsupported(key.clone()).into());
        }
        let bytes = fs::read(file).with_context(|| format!("read {key}"))?;
        let hash = util::hash_bytes(&bytes);
        let content = String::from_utf8_lossy(&bytes);
        let node = self.build_node(&key, &content)?;
        self.store(key, hash, node.clone());
        Ok(node)
    }

    /// Like [`Spider::analyze`] but a file that fails to parse becomes a leaf
    /// with no dependencies instead of an error.
    pub fn analyze_lenient(&mut self, path: &Path) -> Option<FileNode> {
        match self.analyze(path) {
            Ok(node) => Some(node),
            Err(err) => {
                warn!(path = %path.display(), "treating file as a leaf: {err}");
                let language = Language::from_path(path)?;
                Some(FileNode::empty(util::path_key(path), language))
            }
        }
    }

    fn build_node(&mut self, key: &str, content: &str) -> Result<FileNode, ParseError> {
        let parsed = self.parser.parse(Path::new(key), content)?;
        let (dependencies, unresolved) = self.resolve_imports(key, &parsed.imports);
        let symbols = parsed
            .symbols
            .iter()
            .map(|symbol| Symbol::from_parsed(key, symbol))
            .collect();
        Ok(FileNode {
            path: key.to_string(),
            language: parsed.language,
            dependencies,
            unresolved,
            symbols,
        })
    }

    fn resolve_imports(
        &self,
        key: &str,
        imports: &[ParsedImport],
    ) -> (Vec<Dependency>, Vec<UnresolvedImport>) {
        let from = Path::new(key);
        let mut dependencies = Vec::new();
        let mut unresolved = Vec::new();
        let mut seen = HashSet::new();
        for import in imports {
            let reason = match self.resolver.resolve_detailed(from, &import.module) {
                Ok(Resolution::Resolved { path }) if !scan::is_analyzable(&path) => {
                    format!("resolves to non-source file {}", path.display())
                }
                Ok(Resolution::Resolved { path }) => {
                    let target = path.to_string_lossy().to_string();
                    if target == key {
                        continue;
                    }
                    let dep = Dependency {
                        source_path: key.to_string(),
                        target_path: target,
                        import_type: import.import_type,
                        line: import.line,
                        module_specifier: import.module.clone(),
                    };
                    if seen.insert(dep.clone()) {
                        dependencies.push(dep);
                    }
                    continue;
                }
                Ok(Resolution::Unresolved { reason }) => reason,
                Err(err) => err.to_string(),
            };
            unresolved.push(UnresolvedImport {
                source: key.to_string(),
                module_specifier: import.module.clone(),
                import_type: import.import_type,
                line: import.line,
                reason,
            });
        }
        (dependencies, unresolved)
    }

    /// Replaces the cache entry and its reverse-index contributions together.
    fn store(&mut self, key: String, hash: String, node: FileNode) {
        self.reverse.remove_all_from(&key);
        self.symbols.remove_file(&key);
        for dep in &node.dependencies {
            self.reverse.record_dependency(dep);
        }
        self.cache.put(key, hash, node);
    }

    pub fn invalidate_file(&mut self, path: &Path) -> bool {
        let key = util::path_key(path);
        self.invalidate_key(&key)
    }

    fn invalidate_key(&mut self, key: &str) -> bool {
        let removed = self.cache.invalidate(key);
        let edges = self.reverse.remove_all_from(key);
        self.symbols.remove_file(key);
        debug!(path = key, removed, edges, "invalidated");
        removed
    }

    /// Invalidates a changed file and, once the workspace has been indexed,
    /// re-analyzes it so the reverse index keeps covering it.
    pub fn handle_file_changed(&mut self, path: &Path) -> bool {
        let removed = self.invalidate_file(path);
        if self.warmup.completed && self.is_tracked(path) {
            self.analyze_lenient(path);
        }
        removed
    }

    /// Evicts a deleted file (or every file under a deleted directory) and
    /// every cached file that imported it. Returns the evicted paths.
    pub fn handle_file_deleted(&mut self, path: &Path) -> Vec<String> {
        let key = util::path_key(path);
        let doomed: Vec<String> = self
            .cache
            .paths()
            .into_iter()
            .filter(|cached| cached == &key || Path::new(cached).starts_with(&key))
            .collect();
        let mut referrers: Vec<String> = Vec::new();
        for target in doomed.iter().chain(std::iter::once(&key)) {
            referrers.extend(self.reverse.sources_of(target));
        }

        let mut invalidated = Vec::new();
        for target in doomed.iter().chain(referrers.iter()) {
            if self.invalidate_key(target) && !invalidated.contains(target) {
                invalidated.push(target.clone());
            }
        }
        if self.warmup.completed {
            for source in &referrers {
                if Path::new(source).is_file() {
                    self.analyze_lenient(Path::new(source));
                }
            }
        }
        invalidated
    }

    /// Invalidates cached files with an unresolved import that now resolves
    /// to `path`. Returns the invalidated paths.
    pub fn handle_file_added(&mut self, path: &Path) -> Vec<String> {
        let key = util::path_key(path);
        let mut stale: Vec<String> = self
            .cache
            .iter()
            .filter(|(source, cached)| {
                cached.node.unresolved.iter().any(|import| {
                    self.resolver
                        .resolve(Path::new(source.as_str()), &import.module_specifier)
                        .ok()
                        .flatten()
                        .is_some_and(|resolved| util::path_key(&resolved) == key)
                })
            })
            .map(|(source, _)| source.clone())
            .collect();
        stale.sort();

        let mut invalidated = Vec::new();
        if self.invalidate_key(&key) {
            invalidated.push(key.clone());
        }
        for source in stale {
            if self.invalidate_key(&source) {
                invalidated.push(source);
            }
        }
        if self.warmup.completed {
            for source in invalidated.iter().chain(std::iter::once(&key)) {
                let source = Path::new(source);
                if self.is_tracked(source) && source.is_file() {
                    self.analyze_lenient(source);
                }
            }
        }
        invalidated
    }

    /// Reverse index lookup, keeping only entries the current cache still
    /// backs with a live edge.
    pub fn find_referencing_files(&self, target: &Path) -> Vec<ReverseEntry> {
        let key = util::path_key(target);
        let entries = self.reverse.lookup(&key);
        let live: Vec<ReverseEntry> = entries
            .iter()
            .filter(|entry| {
                self.cache.get(&entry.source_path).is_some_and(|cached| {
                    cached
                        .node
                        .dependencies
                        .iter()
                        .any(|dep| dep.target_path == key && dep.line == entry.line)
                })
            })
            .cloned()
            .collect();
        if live.len() != entries.len() {
            debug!(
                target = %key,
                dropped = entries.len() - live.len(),
                "dropped stale reverse entries"
            );
        }
        live
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<crate::model::ParsedFile, ToolError> {
        let key = util::path_key(path);
        let file = Path::new(&key);
        if !file.is_file() {
            return Err(ToolError::file_not_found(&key));
        }
        let content = util::read_to_string(file)?;
        Ok(self.parser.parse(file, &content)?)
    }

    pub fn parser_mut(&mut self) -> &mut dyn ParserService {
        self.parser.as_mut()
    }

    /// Stops the parsing session; the spider answers nothing useful afterwards.
    pub fn shutdown(&mut self) {
        self.parser.shutdown();
        self.cache.clear();
        self.reverse.clear();
        self.symbols.clear();
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    pub fn workspace(files: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    pub fn spider(dir: &TempDir) -> Spider {
        let mut config = SpiderConfig::new(dir.path());
        config.tsconfig_paths = false;
        Spider::with_default_parsers(config).unwrap()
    }

    pub fn key(dir: &TempDir, rel: &str) -> String {
        util::path_key(&dir.path().join(rel))
    }
}
