//! Dependency-aware ordering of a selected set of artifact types.

use std::collections::{HashMap, HashSet};

/// Source of prerequisite edges between artifact types.
pub trait DependencyGraph {
    fn prerequisites(&self, artifact_type: &str) -> &[String];
}

impl DependencyGraph for HashMap<String, Vec<String>> {
    fn prerequisites(&self, artifact_type: &str) -> &[String] {
        self.get(artifact_type).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Reorder `selected` so every type comes after its selected prerequisites.
///
/// Depth-first over the selection in caller order. Prerequisites outside the
/// selection are ignored, duplicates collapse to their first occurrence, and
/// a back edge (a cycle) is dropped rather than reported: the output is
/// always a permutation of the distinct input types.
pub fn resolve_order<G: DependencyGraph + ?Sized>(selected: &[String], graph: &G) -> Vec<String> {
    let selected_set: HashSet<&str> = selected.iter().map(String::as_str).collect();
    let mut visiting: HashSet<&str> = HashSet::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut ordered: Vec<String> = Vec::with_capacity(selected_set.len());

    for artifact_type in selected {
        visit(
            artifact_type,
            graph,
            &selected_set,
            &mut visiting,
            &mut visited,
            &mut ordered,
        );
    }

    ordered
}

fn visit<'a, G: DependencyGraph + ?Sized>(
    artifact_type: &'a str,
    graph: &'a G,
    selected: &HashSet<&'a str>,
    visiting: &mut HashSet<&'a str>,
    visited: &mut HashSet<&'a str>,
    ordered: &mut Vec<String>,
) {
    if visited.contains(artifact_type) || visiting.contains(artifact_type) {
        return;
    }
    visiting.insert(artifact_type);
    for dep in graph.prerequisites(artifact_type) {
        if let Some(&dep) = selected.get(dep.as_str()) {
            visit(dep, graph, selected, visiting, visited, ordered);
        }
    }
    visiting.remove(artifact_type);
    visited.insert(artifact_type);
    ordered.push(artifact_type.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(k, deps)| (k.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|s| s == name).unwrap()
    }

    #[test]
    fn test_prerequisites_move_before_dependents() {
        let g = graph(&[("strategy-doc", &["prd"]), ("prd", &[])]);
        let order = resolve_order(&names(&["strategy-doc", "prd"]), &g);
        assert_eq!(order, names(&["prd", "strategy-doc"]));
    }

    #[test]
    fn test_independent_types_keep_caller_order() {
        let g = graph(&[]);
        let order = resolve_order(&names(&["c", "a", "b"]), &g);
        assert_eq!(order, names(&["c", "a", "b"]));
    }

    #[test]
    fn test_unselected_prerequisites_are_not_added() {
        let g = graph(&[("user-story", &["prd"])]);
        let order = resolve_order(&names(&["user-story"]), &g);
        assert_eq!(order, names(&["user-story"]));
    }

    #[test]
    fn test_transitive_chain_in_dag() {
        let g = graph(&[
            ("prototype", &["ui-design", "prd"]),
            ("ui-design", &["prd"]),
            ("design-spec", &["ui-design"]),
        ]);
        let selected = names(&["design-spec", "prototype", "ui-design", "prd"]);
        let order = resolve_order(&selected, &g);

        assert_eq!(order.len(), selected.len());
        for (dependent, deps) in [
            ("prototype", vec!["ui-design", "prd"]),
            ("ui-design", vec!["prd"]),
            ("design-spec", vec!["ui-design"]),
        ] {
            for dep in deps {
                assert!(
                    position(&order, dep) < position(&order, dependent),
                    "{} must precede {} in {:?}",
                    dep,
                    dependent,
                    order
                );
            }
        }
    }

    #[test]
    fn test_cycle_drops_back_edge_without_losing_types() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let order = resolve_order(&names(&["a", "b"]), &g);
        assert_eq!(order, names(&["b", "a"]));
    }

    #[test]
    fn test_duplicates_collapse() {
        let g = graph(&[("b", &["a"])]);
        let order = resolve_order(&names(&["b", "a", "b"]), &g);
        assert_eq!(order, names(&["a", "b"]));
    }

    #[test]
    fn test_empty_selection() {
        let g = graph(&[]);
        assert!(resolve_order(&[], &g).is_empty());
    }
}
