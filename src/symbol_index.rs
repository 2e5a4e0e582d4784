//! Symbol id -> callers, filled one file at a time on first query.
//!
//! Only files that have been indexed (see [`SymbolReverseIndex::is_indexed`])
//! contribute; completeness for a symbol holds after its own file and the
//! files importing it were indexed, never workspace-wide.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::model::SymbolDependency;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerEntry {
    pub caller_symbol_id: String,
    pub caller_file_path: String,
    pub is_type_only: bool,
    pub line: usize,
}

#[derive(Debug, Default)]
pub struct SymbolReverseIndex {
    callers: HashMap<String, Vec<CallerEntry>>,
    contributed: HashMap<String, BTreeSet<String>>,
    indexed: HashSet<String>,
}

impl SymbolReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, caller_file: &str, dep: &SymbolDependency) {
        let entry = CallerEntry {
            caller_symbol_id: dep.source_symbol_id.clone(),
            caller_file_path: caller_file.to_string(),
            is_type_only: dep.is_type_only,
            line: dep.line,
        };
        let entries = self.callers.entry(dep.target_symbol_id.clone()).or_default();
        if !entries.contains(&entry) {
            entries.push(entry);
        }
        self.contributed
            .entry(caller_file.to_string())
            .or_default()
            .insert(dep.target_symbol_id.clone());
    }

    /// Marks `file` as seeded even when it produced no edges.
    pub fn mark_indexed(&mut self, file: &str) {
        self.indexed.insert(file.to_string());
    }

    pub fn is_indexed(&self, file: &str) -> bool {
        self.indexed.contains(file)
    }

    /// Sweeps every edge `file` contributed and forgets that it was seeded.
    pub fn remove_file(&mut self, file: &str) -> usize {
        self.indexed.remove(file);
        let Some(targets) = self.contributed.remove(file) else {
            return 0;
        };
        let mut removed = 0;
        for target in targets {
            let Some(entries) = self.callers.get_mut(&target) else {
                continue;
            };
            let before = entries.len();
            entries.retain(|entry| entry.caller_file_path != file);
            removed += before - entries.len();
            if entries.is_empty() {
                self.callers.remove(&target);
            }
        }
        removed
    }

    pub fn lookup(&self, symbol_id: &str) -> &[CallerEntry] {
        self.callers
            .get(symbol_id)
            .map(|entries| entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn indexed_files(&self) -> usize {
        self.indexed.len()
    }

    pub fn clear(&mut self) {
        self.callers.clear();
        self.contributed.clear();
        self.indexed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, target: &str, type_only: bool) -> SymbolDependency {
        SymbolDependency {
            source_symbol_id: source.to_string(),
            target_symbol_id: target.to_string(),
            target_file_path: target.split(':').next().unwrap().to_string(),
            is_type_only: type_only,
            line: 1,
        }
    }

    #[test]
    fn records_and_sweeps_per_file() {
        let mut index = SymbolReverseIndex::new();
        index.record("/a.ts", &edge("/a.ts:run", "/c.ts:helper", false));
        index.record("/b.ts", &edge("/b.ts:Shape", "/c.ts:helper", true));
        index.mark_indexed("/a.ts");
        index.mark_indexed("/b.ts");
        assert_eq!(index.lookup("/c.ts:helper").len(), 2);

        assert_eq!(index.remove_file("/a.ts"), 1);
        assert!(!index.is_indexed("/a.ts"));
        let callers = index.lookup("/c.ts:helper");
        assert_eq!(callers.len(), 1);
        assert!(callers[0].is_type_only);
    }

    #[test]
    fn seeded_file_without_edges_stays_indexed() {
        let mut index = SymbolReverseIndex::new();
        index.mark_indexed("/empty.ts");
        assert!(index.is_indexed("/empty.ts"));
        assert_eq!(index.remove_file("/empty.ts"), 0);
        assert!(!index.is_indexed("/empty.ts"));
    }
}
