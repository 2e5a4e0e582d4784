use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use super::Spider;
use crate::error::ToolError;
use crate::model::{MODULE_SYMBOL, Symbol, SymbolKind};
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnusedSymbol {
    pub symbol: Symbol,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnusedSymbols {
    pub file_path: String,
    pub total_symbols: usize,
    pub unused: Vec<UnusedSymbol>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicEdge {
    pub from: String,
    pub to: String,
    pub line: usize,
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileLogic {
    pub file_path: String,
    pub symbols: Vec<Symbol>,
    pub calls: Vec<LogicEdge>,
    pub entry_points: Vec<String>,
    pub internal_calls: usize,
    pub external_calls: usize,
}

/// Names conventionally invoked by a runtime rather than by code.
const RUNTIME_ENTRY_NAMES: &[&str] = &["main", "__init__", "constructor", "__main__"];

impl Spider {
    pub fn find_unused_symbols(&mut self, path: &Path) -> Result<UnusedSymbols, ToolError> {
        let key = util::path_key(path);
        let graph = self.symbol_graph(path)?;
        self.ensure_symbol_index(&key);

        let referenced_here: HashSet<&str> = graph
            .dependencies
            .iter()
            .filter(|dep| dep.target_file_path == key && dep.source_symbol_id != dep.target_symbol_id)
            .map(|dep| dep.target_symbol_id.as_str())
            .collect();

        let mut unused = Vec::new();
        for symbol in &graph.symbols {
            if symbol.kind == SymbolKind::Method
                || RUNTIME_ENTRY_NAMES.contains(&symbol.name.as_str())
            {
                continue;
            }
            let external = self
                .symbols
                .lookup(&symbol.id)
                .iter()
                .any(|caller| caller.caller_file_path != key);
            let reason = if symbol.is_exported {
                (!external).then_some("exported but not referenced by any other indexed file")
            } else {
                (!external && !referenced_here.contains(symbol.id.as_str()))
                    .then_some("never referenced")
            };
            if let Some(reason) = reason {
                unused.push(UnusedSymbol {
                    symbol: symbol.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        Ok(UnusedSymbols {
            file_path: key,
            total_symbols: graph.symbols.len(),
            unused,
        })
    }

    /// Call hierarchy inside one file.
    pub fn analyze_file_logic(
        &mut self,
        path: &Path,
        include_external: bool,
    ) -> Result<FileLogic, ToolError> {
        let key = util::path_key(path);
        let graph = self.symbol_graph(path)?;

        let mut calls = Vec::new();
        let mut called: HashSet<String> = HashSet::new();
        let mut internal_calls = 0;
        let mut external_calls = 0;
        for dep in graph.dependencies.iter().filter(|dep| !dep.is_type_only) {
            let external = dep.target_file_path != key;
            if external {
                external_calls += 1;
            } else {
                internal_calls += 1;
                if dep.source_symbol_id != dep.target_symbol_id {
                    called.insert(dep.target_symbol_id.clone());
                }
            }
            if external && !include_external {
                continue;
            }
            calls.push(LogicEdge {
                from: dep.source_symbol_id.clone(),
                to: dep.target_symbol_id.clone(),
                line: dep.line,
                external,
            });
        }

        let mut entry_points: Vec<String> = graph
            .symbols
            .iter()
            .filter(|symbol| symbol.kind.is_callable() && !called.contains(&symbol.id))
            .map(|symbol| symbol.id.clone())
            .collect();
        let module_id = format!("{key}:{MODULE_SYMBOL}");
        if calls.iter().any(|edge| edge.from == module_id) {
            entry_points.insert(0, module_id);
        }

        Ok(FileLogic {
            file_path: key,
            symbols: graph.symbols,
            calls,
            entry_points,
            internal_calls,
            external_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::model::split_symbol_id;

    #[test]
    fn unused_symbols_distinguish_exported_and_private() {
        let dir = workspace(&[
            (
                "lib.ts",
                "export function used() { return 1; }\n\
                 export function orphan() { return 2; }\n\
                 function privateHelper() { return 3; }\n\
                 function dead() { return 4; }\n\
                 export function caller() { return privateHelper(); }\n",
            ),
            ("app.ts", "import { used, caller } from './lib';\nused();\ncaller();\n"),
        ]);
        let mut spider = spider(&dir);
        spider.build_full_index(|_| {}).unwrap();
        let report = spider.find_unused_symbols(&dir.path().join("lib.ts")).unwrap();
        let names: HashSet<&str> = report.unused.iter().map(|u| u.symbol.name.as_str()).collect();
        assert!(names.contains("orphan"));
        assert!(names.contains("dead"));
        assert!(!names.contains("used"));
        assert!(!names.contains("privateHelper"));
        assert!(!names.contains("caller"));
    }

    #[test]
    fn file_logic_finds_entry_points() {
        let dir = workspace(&[(
            "flow.py",
            "def start():\n    step()\n\n\ndef step():\n    finish()\n\n\ndef finish():\n    print('done')\n",
        )]);
        let mut spider = spider(&dir);
        let logic = spider
            .analyze_file_logic(&dir.path().join("flow.py"), false)
            .unwrap();
        assert_eq!(logic.internal_calls, 2);
        assert_eq!(logic.entry_points.len(), 1);
        let (_, name) = split_symbol_id(&logic.entry_points[0]).unwrap();
        assert_eq!(name, "start");
    }
}
