use std::collections::HashMap;

use crate::model::FileNode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    /// blake3 of the content the node was built from.
    pub hash: String,
    pub node: FileNode,
}

/// Per-file parse + resolve results keyed by normalized path. There is no
/// expiry; entries leave only through `invalidate` or `clear`.
#[derive(Debug, Default)]
pub struct DependencyCache {
    entries: HashMap<String, CachedFile>,
}

impl DependencyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&CachedFile> {
        self.entries.get(path)
    }

    pub fn put(&mut self, path: impl Into<String>, hash: impl Into<String>, node: FileNode) {
        self.entries.insert(
            path.into(),
            CachedFile {
                hash: hash.into(),
                node,
            },
        );
    }

    /// Returns whether an entry existed.
    pub fn invalidate(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CachedFile)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Language;

    fn node(path: &str) -> FileNode {
        FileNode {
            path: path.to_string(),
            language: Language::TypeScript,
            dependencies: Vec::new(),
            unresolved: Vec::new(),
            symbols: Vec::new(),
        }
    }

    #[test]
    fn hit_returns_the_stored_node() {
        let mut cache = DependencyCache::new();
        cache.put("/w/a.ts", "h1", node("/w/a.ts"));
        let hit = cache.get("/w/a.ts").unwrap();
        assert_eq!(hit.hash, "h1");
        assert_eq!(hit.node, node("/w/a.ts"));
        assert!(cache.get("/w/b.ts").is_none());
    }

    #[test]
    fn invalidate_reports_presence_once() {
        let mut cache = DependencyCache::new();
        cache.put("/w/a.ts", "h1", node("/w/a.ts"));
        assert!(cache.invalidate("/w/a.ts"));
        assert!(!cache.invalidate("/w/a.ts"));
        assert!(cache.is_empty());
    }

    #[test]
    fn put_replaces_wholesale() {
        let mut cache = DependencyCache::new();
        cache.put("/w/a.ts", "h1", node("/w/a.ts"));
        cache.put("/w/a.ts", "h2", node("/w/a.ts"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("/w/a.ts").unwrap().hash, "h2");
        cache.clear();
        assert!(cache.paths().is_empty());
    }
}
