use std::collections::{HashMap, HashSet};

use crate::model::Dependency;

/// Every distinct cycle in the directed graph `edges`, each reported once.
///
/// Iterative DFS with an on-stack set: a back edge to a node on the stack
/// yields the path slice from that node to the current one. Cycles found
/// from different roots are deduplicated by rotating the smallest node to
/// the front.
pub fn find_cycles<'a, I>(edges: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut nodes: Vec<&str> = Vec::new();
    for (from, to) in edges {
        if !adj.contains_key(from) {
            nodes.push(from);
        }
        let targets = adj.entry(from).or_default();
        if !targets.contains(&to) {
            targets.push(to);
        }
    }
    nodes.sort_unstable();
    for targets in adj.values_mut() {
        targets.sort_unstable();
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut cycles: Vec<Vec<String>> = Vec::new();

    for root in nodes {
        if visited.contains(root) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        let mut path: Vec<&str> = Vec::new();

        while let Some((node, idx)) = stack.last_mut() {
            let node = *node;
            if *idx == 0 && !on_stack.contains(node) {
                visited.insert(node);
                on_stack.insert(node);
                path.push(node);
            }
            let neighbors = adj.get(node).map(|v| v.as_slice()).unwrap_or(&[]);
            if *idx < neighbors.len() {
                let next = neighbors[*idx];
                *idx += 1;
                if on_stack.contains(next) {
                    if let Some(pos) = path.iter().position(|n| *n == next) {
                        cycles.push(path[pos..].iter().map(|n| n.to_string()).collect());
                    }
                } else if !visited.contains(next) {
                    stack.push((next, 0));
                }
            } else {
                on_stack.remove(node);
                path.pop();
                stack.pop();
            }
        }
    }

    let mut seen: HashSet<Vec<String>> = HashSet::new();
    cycles.retain(|cycle| seen.insert(canonical(cycle)));
    cycles
}

pub fn find_dependency_cycles(edges: &[Dependency]) -> Vec<Vec<String>> {
    find_cycles(
        edges
            .iter()
            .map(|dep| (dep.source_path.as_str(), dep.target_path.as_str())),
    )
}

fn canonical(cycle: &[String]) -> Vec<String> {
    let mut normalized = cycle.to_vec();
    if let Some(min_pos) = normalized
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        normalized.rotate_left(min_pos);
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triangle_is_one_cycle() {
        let cycles = find_cycles([("A", "B"), ("B", "C"), ("C", "A")]);
        assert_eq!(cycles.len(), 1);
        let mut members = cycles[0].clone();
        members.sort();
        assert_eq!(members, vec!["A", "B", "C"]);
    }

    #[test]
    fn dag_has_no_cycles() {
        let cycles = find_cycles([("A", "B"), ("A", "C"), ("B", "C"), ("C", "D")]);
        assert!(cycles.is_empty());
    }

    #[test]
    fn self_loop_and_disjoint_cycles() {
        let cycles = find_cycles([("A", "A"), ("B", "C"), ("C", "B"), ("C", "D")]);
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&vec!["A".to_string()]));
        assert!(cycles.contains(&vec!["B".to_string(), "C".to_string()]));
    }

    #[test]
    fn duplicate_edges_do_not_duplicate_cycles() {
        let cycles = find_cycles([("A", "B"), ("A", "B"), ("B", "A")]);
        assert_eq!(cycles.len(), 1);
    }
}
