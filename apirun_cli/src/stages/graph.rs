//! Stage dependency graph: cycle detection and batched topological order
//! over `petgraph`.

use std::collections::{HashMap, HashSet};

use apirun_core::{ErrorKind, Result};
use petgraph::graphmap::DiGraphMap;

use super::orchestrator::Direction;

/// DFS with on-stack marks; the first cycle found is returned as a
/// diagnostic path.
fn find_cycle<'a>(graph: &DiGraphMap<&'a str, ()>, order: &[&'a str]) -> Option<Vec<&'a str>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    fn visit<'a>(
        node: &'a str,
        graph: &DiGraphMap<&'a str, ()>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<&'a str>> {
        visited.insert(node);
        on_stack.insert(node);
        stack.push(node);

        let mut targets: Vec<&str> = graph.neighbors(node).collect();
        targets.sort_unstable();
        for next in targets {
            if on_stack.contains(next) {
                let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<&str> = stack[start..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            if !visited.contains(next) {
                if let Some(cycle) = visit(next, graph, visited, on_stack, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
        None
    }

    for node in order {
        if !visited.contains(node) {
            if let Some(cycle) = visit(node, graph, &mut visited, &mut on_stack, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn topological sort into batches; nodes of equal depth form a batch,
/// ordered lexicographically within it for deterministic tests.
pub fn topo_batches(names: &[String], depends_on: &HashMap<String, Vec<String>>) -> Result<Vec<Vec<String>>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in names {
        graph.add_node(name.as_str());
    }
    for (name, deps) in depends_on {
        for dep in deps {
            if !names.iter().any(|n| n == dep) {
                return Err(ErrorKind::Dependency(name.clone(), dep.clone()).into());
            }
            graph.add_edge(dep.as_str(), name.as_str(), ());
        }
    }

    let mut sorted: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
    sorted.sort_unstable();
    if let Some(cycle) = find_cycle(&graph, &sorted) {
        return Err(ErrorKind::Cycle(cycle.join(" -> ")).into());
    }

    let mut in_degree: HashMap<&str, usize> =
        names.iter().map(|n| (n.as_str(), graph.neighbors_directed(n.as_str(), petgraph::Incoming).count())).collect();

    let mut batches = Vec::new();
    let mut remaining: HashSet<&str> = names.iter().map(|s| s.as_str()).collect();

    while !remaining.is_empty() {
        let mut batch: Vec<&str> =
            remaining.iter().filter(|n| in_degree.get(**n).copied().unwrap_or(0) == 0).copied().collect();
        if batch.is_empty() {
            return Err(ErrorKind::Cycle("unresolved stage dependency set".into()).into());
        }
        batch.sort_unstable();

        for node in &batch {
            remaining.remove(node);
            let mut successors: Vec<&str> = graph.neighbors(node).collect();
            successors.sort_unstable();
            for succ in successors {
                if let Some(deg) = in_degree.get_mut(succ) {
                    *deg = deg.saturating_sub(1);
                }
            }
        }
        batches.push(batch.into_iter().map(|s| s.to_string()).collect());
    }

    Ok(batches)
}

/// Flattens batches into one linearized order, then slices it by `from`/`to`.
/// If either is named but absent from the order, the result is empty. For
/// `Direction::Up` the slice is inclusive on both ends; for `Direction::Down`
/// the `to` stage itself is excluded, since a rollback runs down to but not
/// including its target.
pub fn range_filter(batches: &[Vec<String>], from: Option<&str>, to: Option<&str>, direction: Direction) -> Vec<String> {
    let flat: Vec<String> = batches.iter().flatten().cloned().collect();
    let start = match from {
        Some(name) => match flat.iter().position(|n| n == name) {
            Some(idx) => idx,
            None => return Vec::new(),
        },
        None => 0,
    };
    let end = match to {
        Some(name) => match flat.iter().position(|n| n == name) {
            Some(idx) => idx,
            None => return Vec::new(),
        },
        None => flat.len().saturating_sub(1),
    };
    if start > end {
        return Vec::new();
    }
    match direction {
        Direction::Up => flat[start..=end].to_vec(),
        Direction::Down => {
            if to.is_some() {
                flat[start..end].to_vec()
            } else {
                flat[start..=end].to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_two_node_cycle() {
        let names = vec!["a".to_string(), "b".to_string()];
        let mut depends_on = HashMap::new();
        depends_on.insert("a".to_string(), vec!["b".to_string()]);
        depends_on.insert("b".to_string(), vec!["a".to_string()]);
        let err = topo_batches(&names, &depends_on).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Cycle(_)));
    }

    #[test]
    fn batches_independent_stages_together_in_lex_order() {
        let names = vec!["4".to_string(), "3".to_string(), "2".to_string(), "1".to_string()];
        let mut depends_on = HashMap::new();
        depends_on.insert("2".to_string(), vec!["1".to_string()]);
        depends_on.insert("3".to_string(), vec!["1".to_string()]);
        depends_on.insert("4".to_string(), vec!["2".to_string()]);
        let batches = topo_batches(&names, &depends_on).unwrap();
        assert_eq!(batches[0], vec!["1".to_string()]);
        assert_eq!(batches[1], vec!["2".to_string(), "3".to_string()]);
        assert_eq!(batches[2], vec!["4".to_string()]);
    }

    #[test]
    fn range_filter_is_empty_when_named_endpoint_is_absent() {
        let batches = vec![vec!["a".to_string()], vec!["b".to_string()]];
        assert!(range_filter(&batches, Some("nope"), None, Direction::Up).is_empty());
    }

    #[test]
    fn range_filter_is_an_inclusive_slice_going_up() {
        let batches = vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()], vec!["d".to_string()]];
        let filtered = range_filter(&batches, Some("b"), Some("d"), Direction::Up);
        assert_eq!(filtered, vec!["b".to_string(), "c".to_string(), "d".to_string()]);
    }

    #[test]
    fn range_filter_excludes_the_to_stage_going_down() {
        let batches = vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()], vec!["d".to_string()]];
        let filtered = range_filter(&batches, Some("b"), Some("d"), Direction::Down);
        assert_eq!(filtered, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn range_filter_going_down_without_to_is_still_inclusive_of_from() {
        let batches = vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()], vec!["d".to_string()]];
        let filtered = range_filter(&batches, Some("c"), None, Direction::Down);
        assert_eq!(filtered, vec!["c".to_string(), "d".to_string()]);
    }
}
