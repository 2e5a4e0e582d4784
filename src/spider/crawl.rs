use std::collections::{HashSet, VecDeque};
use std::path::Path;
use tracing::debug;

use super::Spider;
use crate::cycles;
use crate::error::ToolError;
use crate::model::{CrawlResult, FileNode, FileNodeSummary};

impl Spider {
    /// Breadth-first crawl from `entry`, at most `max_depth` hops deep.
    pub fn crawl(&mut self, entry: &Path, max_depth: usize) -> Result<CrawlResult, ToolError> {
        self.traverse(entry, &HashSet::new(), max_depth)
    }

    /// Expands `node` by `extra_depth` hops without re-reporting anything in
    /// `known`. Edges from `node` into known nodes are still returned.
    pub fn crawl_from(
        &mut self,
        node: &Path,
        known: &HashSet<String>,
        extra_depth: usize,
    ) -> Result<CrawlResult, ToolError> {
        self.traverse(node, known, extra_depth)
    }

    fn traverse(
        &mut self,
        entry: &Path,
        known: &HashSet<String>,
        max_depth: usize,
    ) -> Result<CrawlResult, ToolError> {
        let root = self.analyze(entry)?;
        let mut result = CrawlResult {
            entry: root.path.clone(),
            ..CrawlResult::default()
        };
        if !known.contains(&root.path) {
            result.nodes.push(summary(&root, 0));
        }

        let mut visited: HashSet<String> = known.clone();
        visited.insert(root.path.clone());
        let mut seen_edges: HashSet<(String, String)> = HashSet::new();
        let mut seen_unresolved = HashSet::new();
        let mut queue: VecDeque<(FileNode, usize)> = VecDeque::from([(root, 0)]);

        while let Some((node, depth)) = queue.pop_front() {
            if depth >= max_depth {
                if !node.dependencies.is_empty() {
                    result.max_depth_reached = true;
                }
                continue;
            }
            for import in &node.unresolved {
                if seen_unresolved.insert((import.source.clone(), import.module_specifier.clone())) {
                    result.unresolved.push(import.clone());
                }
            }
            for dep in &node.dependencies {
                let pair = (dep.source_path.clone(), dep.target_path.clone());
                if seen_edges.insert(pair) {
                    result.edges.push(dep.clone());
                }
                if !visited.insert(dep.target_path.clone()) {
                    continue;
                }
                let Some(child) = self.analyze_lenient(Path::new(&dep.target_path)) else {
                    continue;
                };
                result.nodes.push(summary(&child, depth + 1));
                queue.push_back((child, depth + 1));
            }
        }

        result.circular_dependencies = cycles::find_dependency_cycles(&result.edges);
        debug!(
            entry = %result.entry,
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            cycles = result.circular_dependencies.len(),
            "crawl finished"
        );
        Ok(result)
    }
}

fn summary(node: &FileNode, depth: usize) -> FileNodeSummary {
    FileNodeSummary {
        path: node.path.clone(),
        language: node.language,
        depth,
    }
}
