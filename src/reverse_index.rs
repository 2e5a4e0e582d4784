use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::model::{Dependency, ImportType};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseEntry {
    pub source_path: String,
    pub line: usize,
    pub module_specifier: String,
    pub import_type: ImportType,
}

impl ReverseEntry {
    pub fn from_dependency(dep: &Dependency) -> Self {
        ReverseEntry {
            source_path: dep.source_path.clone(),
            line: dep.line,
            module_specifier: dep.module_specifier.clone(),
            import_type: dep.import_type,
        }
    }
}

/// target -> sources that import it.
///
/// `contributed` remembers every target a source has ever recorded against,
/// so `remove_all_from` sweeps old edges even when the source's current
/// dependency list no longer mentions them.
#[derive(Debug, Default)]
pub struct ReverseIndex {
    by_target: HashMap<String, Vec<ReverseEntry>>,
    contributed: HashMap<String, BTreeSet<String>>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, source: &str, target: &str, entry: ReverseEntry) {
        let entries = self.by_target.entry(target.to_string()).or_default();
        if !entries.contains(&entry) {
            entries.push(entry);
        }
        self.contributed
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string());
    }

    pub fn record_dependency(&mut self, dep: &Dependency) {
        self.record(
            &dep.source_path,
            &dep.target_path,
            ReverseEntry::from_dependency(dep),
        );
    }

    /// Drops every entry `source` contributed. Returns how many were removed.
    pub fn remove_all_from(&mut self, source: &str) -> usize {
        let Some(targets) = self.contributed.remove(source) else {
            return 0;
        };
        let mut removed = 0;
        for target in targets {
            let Some(entries) = self.by_target.get_mut(&target) else {
                continue;
            };
            let before = entries.len();
            entries.retain(|entry| entry.source_path != source);
            removed += before - entries.len();
            if entries.is_empty() {
                self.by_target.remove(&target);
            }
        }
        removed
    }

    pub fn lookup(&self, target: &str) -> &[ReverseEntry] {
        self.by_target
            .get(target)
            .map(|entries| entries.as_slice())
            .unwrap_or(&[])
    }

    /// Distinct sources importing `target`, sorted.
    pub fn sources_of(&self, target: &str) -> Vec<String> {
        let sources: BTreeSet<&str> = self
            .lookup(target)
            .iter()
            .map(|entry| entry.source_path.as_str())
            .collect();
        sources.into_iter().map(str::to_string).collect()
    }

    pub fn clear(&mut self) {
        self.by_target.clear();
        self.contributed.clear();
    }

    pub fn target_count(&self) -> usize {
        self.by_target.len()
    }
}
