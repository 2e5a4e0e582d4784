use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::debug;

use super::Spider;
use crate::error::ToolError;
use crate::model::{
    Language, MODULE_SYMBOL, ParsedFile, ParsedImport, Symbol, SymbolDependency, split_symbol_id,
    symbol_id,
};
use crate::symbol_index::CallerEntry;
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolGraph {
    pub file_path: String,
    pub language: Language,
    pub symbols: Vec<Symbol>,
    pub dependencies: Vec<SymbolDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDependents {
    pub file_path: String,
    pub symbol_name: String,
    pub symbol_ids: Vec<String>,
    pub dependents: Vec<CallerEntry>,
    pub runtime_count: usize,
    pub type_only_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolCallers {
    pub symbol_ids: Vec<String>,
    pub callers: Vec<CallerEntry>,
    /// True when the file had already been seeded before this query.
    pub from_index: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStep {
    pub caller: String,
    pub callee: String,
    pub callee_file: String,
    pub depth: usize,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    pub entry: Vec<String>,
    pub calls: Vec<CallStep>,
    pub visited_symbols: usize,
    pub max_depth_reached: bool,
}

struct Binding {
    target_file: String,
    imported: String,
    type_only: bool,
    namespace: bool,
}

impl Spider {
    /// Symbols of `path` and the edges leaving them, always from a fresh parse.
    pub fn symbol_graph(&mut self, path: &Path) -> Result<SymbolGraph, ToolError> {
        let parsed = self.parse_file(path)?;
        Ok(self.link_symbols(&util::path_key(path), &parsed))
    }

    pub(crate) fn link_symbols(&self, key: &str, parsed: &ParsedFile) -> SymbolGraph {
        let symbols: Vec<Symbol> = parsed
            .symbols
            .iter()
            .map(|symbol| Symbol::from_parsed(key, symbol))
            .collect();

        let mut local: HashMap<&str, &str> = HashMap::new();
        for symbol in &parsed.symbols {
            local
                .entry(symbol.qualified_name.as_str())
                .or_insert(symbol.qualified_name.as_str());
            if symbol.parent.is_none() {
                local
                    .entry(symbol.name.as_str())
                    .or_insert(symbol.qualified_name.as_str());
            }
        }
        let qualified: HashSet<&str> = parsed
            .symbols
            .iter()
            .map(|symbol| symbol.qualified_name.as_str())
            .collect();
        let bindings = self.import_bindings(key, &parsed.imports);

        let mut dependencies = Vec::new();
        let mut seen = HashSet::new();
        for reference in &parsed.references {
            let from = reference.from.as_deref().unwrap_or(MODULE_SYMBOL);
            let mut targets: Vec<(String, String, bool)> = Vec::new();

            if let Some(binding) = bindings.get(reference.name.as_str()) {
                let type_only = reference.type_only || binding.type_only;
                match (&reference.member, binding.namespace) {
                    (Some(member), true) => {
                        targets.push((binding.target_file.clone(), member.clone(), type_only));
                    }
                    (None, true) => {}
                    (member, false) => {
                        targets.push((
                            binding.target_file.clone(),
                            binding.imported.clone(),
                            type_only,
                        ));
                        if let Some(member) = member {
                            targets.push((
                                binding.target_file.clone(),
                                format!("{}.{member}", binding.imported),
                                type_only,
                            ));
                        }
                    }
                }
            } else if let Some(&target) = local.get(reference.name.as_str()) {
                let member = reference
                    .member
                    .as_ref()
                    .map(|member| format!("{target}.{member}"))
                    .filter(|member| qualified.contains(member.as_str()));
                let target = member.unwrap_or_else(|| target.to_string());
                if target != from {
                    targets.push((key.to_string(), target, reference.type_only));
                }
            }

            for (file, name, type_only) in targets {
                let dep = SymbolDependency {
                    source_symbol_id: symbol_id(key, from),
                    target_symbol_id: symbol_id(&file, &name),
                    target_file_path: file,
                    is_type_only: type_only,
                    line: reference.line,
                };
                let identity = (
                    dep.source_symbol_id.clone(),
                    dep.target_symbol_id.clone(),
                    dep.is_type_only,
                );
                if seen.insert(identity) {
                    dependencies.push(dep);
                }
            }
        }

        SymbolGraph {
            file_path: key.to_string(),
            language: parsed.language,
            symbols,
            dependencies,
        }
    }

    fn import_bindings(&self, key: &str, imports: &[ParsedImport]) -> HashMap<String, Binding> {
        let from = Path::new(key);
        let mut bindings = HashMap::new();
        for import in imports {
            let Ok(Some(target)) = self.resolver.resolve(from, &import.module) else {
                continue;
            };
            let target_file = target.to_string_lossy().to_string();
            for binding in &import.bindings {
                bindings.insert(
                    binding.local.clone(),
                    Binding {
                        target_file: target_file.clone(),
                        imported: binding.imported.clone(),
                        type_only: binding.type_only || import.import_type.is_type_only(),
                        namespace: binding.namespace,
                    },
                );
            }
        }
        bindings
    }

    /// Seeds the symbol reverse index with `key` and every file the file-level
    /// index says imports it. Already seeded files are left alone.
    pub(crate) fn ensure_symbol_index(&mut self, key: &str) -> bool {
        let path = Path::new(key);
        self.analyze_lenient(path);
        let already = self.symbols.is_indexed(key);

        let mut files = vec![key.to_string()];
        files.extend(
            self.find_referencing_files(path)
                .into_iter()
                .map(|entry| entry.source_path),
        );
        files.sort();
        files.dedup();

        for file in files {
            if self.symbols.is_indexed(&file) {
                continue;
            }
            match self.symbol_graph(Path::new(&file)) {
                Ok(graph) => {
                    for dep in &graph.dependencies {
                        self.symbols.record(&file, dep);
                    }
                }
                Err(err) => debug!(path = %file, "symbol index skipped file: {err}"),
            }
            self.symbols.mark_indexed(&file);
        }
        already
    }

    /// Ids of symbols in `path` matching `name` (bare or qualified).
    pub fn find_symbol_ids(&mut self, path: &Path, name: &str) -> Result<Vec<String>, ToolError> {
        let node = self.analyze(path)?;
        let ids: Vec<String> = node
            .symbols
            .iter()
            .filter(|symbol| symbol.matches_name(name))
            .map(|symbol| symbol.id.clone())
            .collect();
        if ids.is_empty() {
            return Err(ToolError::validation(format!(
                "symbol {name} not found in {}",
                node.path
            )));
        }
        Ok(ids)
    }

    /// One entry per calling symbol. A caller that references the target
    /// both as a type and at runtime is a runtime caller, reported at its
    /// first runtime line.
    fn callers_of(&self, ids: &[String]) -> Vec<CallerEntry> {
        let mut merged: BTreeMap<String, CallerEntry> = BTreeMap::new();
        for id in ids {
            for caller in self.symbols.lookup(id) {
                if ids.contains(&caller.caller_symbol_id) {
                    continue;
                }
                match merged.get_mut(&caller.caller_symbol_id) {
                    None => {
                        merged.insert(caller.caller_symbol_id.clone(), caller.clone());
                    }
                    Some(existing) => {
                        let runtime_upgrade = existing.is_type_only && !caller.is_type_only;
                        let same_kind_earlier = existing.is_type_only == caller.is_type_only
                            && caller.line < existing.line;
                        if runtime_upgrade || same_kind_earlier {
                            *existing = caller.clone();
                        }
                    }
                }
            }
        }
        merged.into_values().collect()
    }

    /// Direct dependents of the symbol `name` declared in `path`.
    pub fn get_symbol_dependents(
        &mut self,
        path: &Path,
        name: &str,
    ) -> Result<SymbolDependents, ToolError> {
        let ids = self.find_symbol_ids(path, name)?;
        let key = util::path_key(path);
        self.ensure_symbol_index(&key);
        let dependents = self.callers_of(&ids);
        let type_only_count = dependents.iter().filter(|c| c.is_type_only).count();
        Ok(SymbolDependents {
            file_path: key,
            symbol_name: name.to_string(),
            symbol_ids: ids,
            runtime_count: dependents.len() - type_only_count,
            type_only_count,
            dependents,
        })
    }

    pub fn get_symbol_callers(
        &mut self,
        path: &Path,
        name: &str,
    ) -> Result<SymbolCallers, ToolError> {
        let ids = self.find_symbol_ids(path, name)?;
        let from_index = self.ensure_symbol_index(&util::path_key(path));
        Ok(SymbolCallers {
            callers: self.callers_of(&ids),
            symbol_ids: ids,
            from_index,
        })
    }

    /// Dependents of an arbitrary symbol id; used by transitive impact walks.
    pub(crate) fn dependents_of_id(&mut self, id: &str) -> Vec<CallerEntry> {
        let Some((file, name)) = split_symbol_id(id) else {
            return Vec::new();
        };
        if name == MODULE_SYMBOL {
            return Vec::new();
        }
        let file = file.to_string();
        self.ensure_symbol_index(&file);
        self.callers_of(&[id.to_string()])
    }

    /// Forward call chain from `name`, breadth first. Type-only edges are not
    /// followed.
    pub fn trace_function_execution(
        &mut self,
        path: &Path,
        name: &str,
        max_depth: usize,
    ) -> Result<ExecutionTrace, ToolError> {
        let entry = self.find_symbol_ids(path, name)?;
        let mut graphs: HashMap<String, Option<SymbolGraph>> = HashMap::new();
        let mut visited: HashSet<String> = entry.iter().cloned().collect();
        let mut queue: VecDeque<(String, usize)> =
            entry.iter().map(|id| (id.clone(), 0)).collect();
        let mut calls = Vec::new();
        let mut max_depth_reached = false;

        while let Some((id, depth)) = queue.pop_front() {
            let Some((file, _)) = split_symbol_id(&id) else {
                continue;
            };
            let file = file.to_string();
            if !graphs.contains_key(&file) {
                let graph = if util::is_within(&self.root, Path::new(&file)) {
                    self.symbol_graph(Path::new(&file)).ok()
                } else {
                    None
                };
                graphs.insert(file.clone(), graph);
            }
            let Some(Some(graph)) = graphs.get(&file) else {
                continue;
            };
            let outgoing: Vec<SymbolDependency> = graph
                .dependencies
                .iter()
                .filter(|dep| dep.source_symbol_id == id && !dep.is_type_only)
                .cloned()
                .collect();
            if outgoing.is_empty() {
                continue;
            }
            if depth >= max_depth {
                max_depth_reached = true;
                continue;
            }
            for dep in outgoing {
                calls.push(CallStep {
                    caller: id.clone(),
                    callee: dep.target_symbol_id.clone(),
                    callee_file: dep.target_file_path.clone(),
                    depth: depth + 1,
                    line: dep.line,
                });
                if visited.insert(dep.target_symbol_id.clone()) {
                    queue.push_back((dep.target_symbol_id, depth + 1));
                }
            }
        }

        Ok(ExecutionTrace {
            entry,
            calls,
            visited_symbols: visited.len(),
            max_depth_reached,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn project() -> tempfile::TempDir {
        workspace(&[
            (
                "src/util.ts",
                "export function helper(x: number): number { return inner(x); }\n\
                 function inner(x: number) { return x; }\n\
                 export interface Shape { size: number }\n",
            ),
            (
                "src/a.ts",
                "import { helper } from './util';\nexport function runA() { return helper(1); }\n",
            ),
            (
                "src/b.ts",
                "import { helper, type Shape } from './util';\n\
                 export function runB(s: Shape) { return helper(s.size); }\n",
            ),
            (
                "src/main.ts",
                "import { runA } from './a';\nexport function main() { runA(); }\n",
            ),
        ])
    }

    #[test]
    fn symbol_graph_links_imports_and_locals() {
        let dir = project();
        let mut spider = spider(&dir);
        let graph = spider.symbol_graph(&dir.path().join("src/util.ts")).unwrap();
        let util = key(&dir, "src/util.ts");
        assert!(graph.symbols.iter().any(|s| s.id == format!("{util}:helper")));
        assert!(graph.dependencies.iter().any(|d| {
            d.source_symbol_id == format!("{util}:helper")
                && d.target_symbol_id == format!("{util}:inner")
        }));

        let graph = spider.symbol_graph(&dir.path().join("src/a.ts")).unwrap();
        assert!(graph.dependencies.iter().any(|d| {
            d.target_symbol_id == format!("{util}:helper") && !d.is_type_only
        }));
    }

    #[test]
    fn dependents_come_from_importing_files() {
        let dir = project();
        let mut spider = spider(&dir);
        spider.build_full_index(|_| {}).unwrap();
        let dependents = spider
            .get_symbol_dependents(&dir.path().join("src/util.ts"), "helper")
            .unwrap();
        let callers: HashSet<_> = dependents
            .dependents
            .iter()
            .map(|c| c.caller_file_path.clone())
            .collect();
        assert!(callers.contains(&key(&dir, "src/a.ts")));
        assert!(callers.contains(&key(&dir, "src/b.ts")));
        assert_eq!(dependents.type_only_count, 0);

        let shape = spider
            .get_symbol_dependents(&dir.path().join("src/util.ts"), "Shape")
            .unwrap();
        assert!(shape.dependents.iter().all(|c| c.is_type_only));
    }

    #[test]
    fn callers_report_whether_the_index_was_warm() {
        let dir = project();
        let mut spider = spider(&dir);
        spider.build_full_index(|_| {}).unwrap();
        let first = spider
            .get_symbol_callers(&dir.path().join("src/util.ts"), "helper")
            .unwrap();
        let second = spider
            .get_symbol_callers(&dir.path().join("src/util.ts"), "helper")
            .unwrap();
        assert!(!first.from_index);
        assert!(second.from_index);
        assert_eq!(first.callers, second.callers);
    }

    #[test]
    fn trace_follows_calls_across_files_and_flags_truncation() {
        let dir = project();
        let mut spider = spider(&dir);
        let trace = spider
            .trace_function_execution(&dir.path().join("src/main.ts"), "main", 5)
            .unwrap();
        let util = key(&dir, "src/util.ts");
        assert!(trace.calls.iter().any(|c| c.callee == format!("{util}:inner")));
        assert!(!trace.max_depth_reached);

        let short = spider
            .trace_function_execution(&dir.path().join("src/main.ts"), "main", 1)
            .unwrap();
        assert_eq!(short.calls.len(), 1);
        assert!(short.max_depth_reached);
    }

    #[test]
    fn unknown_symbol_is_a_validation_error() {
        let dir = project();
        let mut spider = spider(&dir);
        let err = spider
            .get_symbol_dependents(&dir.path().join("src/util.ts"), "nope")
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationError);
    }
}
