//! Dependency graph checks.

use std::collections::{HashMap, HashSet};

use super::StepId;

/// Return a step on a dependency cycle, if any.
///
/// `edges` lists each step with the steps it depends on. Dependencies on
/// steps that are not (yet) registered are ignored here.
pub(super) fn find_cycle(edges: &[(StepId, Vec<StepId>)]) -> Option<StepId> {
    let adj: HashMap<StepId, &[StepId]> = edges
        .iter()
        .map(|(id, deps)| (*id, deps.as_slice()))
        .collect();

    fn dfs(
        node: StepId,
        adj: &HashMap<StepId, &[StepId]>,
        visited: &mut HashSet<StepId>,
        on_stack: &mut HashSet<StepId>,
    ) -> Option<StepId> {
        visited.insert(node);
        on_stack.insert(node);

        for &dep in adj.get(node).copied().unwrap_or(&[]) {
            if on_stack.contains(dep) {
                return Some(dep);
            }
            if !visited.contains(dep) {
                if let Some(found) = dfs(dep, adj, visited, on_stack) {
                    return Some(found);
                }
            }
        }

        on_stack.remove(node);
        None
    }

    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    for &(id, _) in edges {
        if !visited.contains(id) {
            if let Some(found) = dfs(id, &adj, &mut visited, &mut on_stack) {
                return Some(found);
            }
        }
    }
    None
}
