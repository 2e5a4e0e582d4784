//! Blast radius of a symbol change.
//!
//! Direct dependents come from the symbol reverse index; transitive ones from
//! a breadth-first walk over dependents-of-dependents with one visited set
//! for the whole walk, so no symbol is expanded twice.

pub mod breaking;

pub use breaking::{BreakingChange, BreakingReport, ChangeKind, Severity, analyze_breaking_changes};

use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use crate::error::ToolError;
use crate::model::split_symbol_id;
use crate::spider::Spider;
use crate::symbol_index::CallerEntry;

pub const HIGH_RUNTIME_DEPENDENTS: usize = 10;
pub const HIGH_TOTAL_DEPENDENTS: usize = 20;
pub const MEDIUM_RUNTIME_DEPENDENTS: usize = 3;
pub const MEDIUM_TOTAL_DEPENDENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

pub fn impact_level(runtime_dependents: usize, total_dependents: usize) -> ImpactLevel {
    if runtime_dependents >= HIGH_RUNTIME_DEPENDENTS || total_dependents >= HIGH_TOTAL_DEPENDENTS {
        ImpactLevel::High
    } else if runtime_dependents >= MEDIUM_RUNTIME_DEPENDENTS
        || total_dependents >= MEDIUM_TOTAL_DEPENDENTS
    {
        ImpactLevel::Medium
    } else {
        ImpactLevel::Low
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactEntry {
    pub symbol_id: String,
    pub file_path: String,
    pub distance: usize,
    pub relationship: String,
    pub is_type_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileImpact {
    pub path: String,
    pub symbol_count: usize,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAnalysis {
    pub file_path: String,
    pub symbol_name: String,
    pub symbol_ids: Vec<String>,
    pub impact_level: ImpactLevel,
    pub direct_impact_count: usize,
    pub transitive_impact_count: usize,
    pub runtime_dependents: usize,
    pub type_only_dependents: usize,
    pub direct: Vec<ImpactEntry>,
    pub transitive: Vec<ImpactEntry>,
    pub affected_files: Vec<FileImpact>,
    pub max_depth_reached: bool,
}

fn relationship(distance: usize) -> String {
    if distance == 1 {
        "DIRECT".to_string()
    } else {
        format!("INDIRECT_{distance}")
    }
}

fn entry(caller: &CallerEntry, distance: usize) -> ImpactEntry {
    ImpactEntry {
        symbol_id: caller.caller_symbol_id.clone(),
        file_path: caller.caller_file_path.clone(),
        distance,
        relationship: relationship(distance),
        is_type_only: caller.is_type_only,
    }
}

/// Groups impacted symbols by file, most affected first.
fn aggregate_by_file(entries: &[ImpactEntry]) -> Vec<FileImpact> {
    let mut by_file: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let name = split_symbol_id(&entry.symbol_id)
            .map(|(_, name)| name)
            .unwrap_or(&entry.symbol_id);
        let symbols = by_file.entry(entry.file_path.as_str()).or_default();
        if !symbols.iter().any(|s| s == name) {
            symbols.push(name.to_string());
        }
    }
    let mut result: Vec<FileImpact> = by_file
        .into_iter()
        .map(|(path, symbols)| FileImpact {
            path: path.to_string(),
            symbol_count: symbols.len(),
            symbols,
        })
        .collect();
    result.sort_by(|a, b| b.symbol_count.cmp(&a.symbol_count).then(a.path.cmp(&b.path)));
    result
}

pub fn get_impact_analysis(
    spider: &mut Spider,
    path: &Path,
    name: &str,
    include_transitive: bool,
    max_depth: usize,
) -> Result<ImpactAnalysis, ToolError> {
    let dependents = spider.get_symbol_dependents(path, name)?;

    let mut visited: HashSet<String> = dependents.symbol_ids.iter().cloned().collect();
    let mut direct = Vec::new();
    for caller in &dependents.dependents {
        if visited.insert(caller.caller_symbol_id.clone()) {
            direct.push(entry(caller, 1));
        }
    }

    let mut transitive = Vec::new();
    let mut max_depth_reached = false;
    if include_transitive {
        let mut queue: VecDeque<(String, usize)> = direct
            .iter()
            .filter(|entry| !entry.is_type_only)
            .map(|entry| (entry.symbol_id.clone(), 1))
            .collect();
        while let Some((id, depth)) = queue.pop_front() {
            let callers = spider.dependents_of_id(&id);
            let fresh: Vec<&CallerEntry> = callers
                .iter()
                .filter(|caller| !visited.contains(&caller.caller_symbol_id))
                .collect();
            if fresh.is_empty() {
                continue;
            }
            if depth >= max_depth {
                max_depth_reached = true;
                continue;
            }
            for caller in fresh {
                if !visited.insert(caller.caller_symbol_id.clone()) {
                    continue;
                }
                transitive.push(entry(caller, depth + 1));
                if !caller.is_type_only {
                    queue.push_back((caller.caller_symbol_id.clone(), depth + 1));
                }
            }
        }
    }

    let runtime_dependents = direct.iter().filter(|e| !e.is_type_only).count();
    let type_only_dependents = direct.len() - runtime_dependents;
    let total = direct.len() + transitive.len();
    let all: Vec<ImpactEntry> = direct.iter().chain(transitive.iter()).cloned().collect();

    tracing::debug!(
        symbol = name,
        direct = direct.len(),
        transitive = transitive.len(),
        max_depth_reached,
        "impact analysis"
    );
    Ok(ImpactAnalysis {
        file_path: dependents.file_path,
        symbol_name: name.to_string(),
        symbol_ids: dependents.symbol_ids,
        impact_level: impact_level(runtime_dependents, total),
        direct_impact_count: direct.len(),
        transitive_impact_count: transitive.len(),
        runtime_dependents,
        type_only_dependents,
        affected_files: aggregate_by_file(&all),
        direct,
        transitive,
        max_depth_reached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_exact() {
        assert_eq!(impact_level(0, 0), ImpactLevel::Low);
        assert_eq!(impact_level(2, 4), ImpactLevel::Low);
        assert_eq!(impact_level(3, 3), ImpactLevel::Medium);
        assert_eq!(impact_level(0, 5), ImpactLevel::Medium);
        assert_eq!(impact_level(9, 19), ImpactLevel::Medium);
        assert_eq!(impact_level(10, 10), ImpactLevel::High);
        assert_eq!(impact_level(1, 20), ImpactLevel::High);
    }

    #[test]
    fn relationship_labels_follow_distance() {
        assert_eq!(relationship(1), "DIRECT");
        assert_eq!(relationship(3), "INDIRECT_3");
    }

    #[test]
    fn files_are_grouped_most_affected_first() {
        let entries = vec![
            ImpactEntry {
                symbol_id: "/b.ts:one".into(),
                file_path: "/b.ts".into(),
                distance: 1,
                relationship: relationship(1),
                is_type_only: false,
            },
            ImpactEntry {
                symbol_id: "/a.ts:x".into(),
                file_path: "/a.ts".into(),
                distance: 1,
                relationship: relationship(1),
                is_type_only: false,
            },
            ImpactEntry {
                symbol_id: "/b.ts:two".into(),
                file_path: "/b.ts".into(),
                distance: 2,
                relationship: relationship(2),
                is_type_only: false,
            },
        ];
        let files = aggregate_by_file(&entries);
        assert_eq!(files[0].path, "/b.ts");
        assert_eq!(files[0].symbols, vec!["one", "two"]);
        assert_eq!(files[1].symbol_count, 1);
    }
}
