//! Dependency structure of a workflow graph.
//!
//! Structural rules checked while building:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `source` and `target`).
//!
//! Duplicate edges collapse into one. Stage ordering uses Kahn's algorithm:
//! every round removes all nodes whose dependencies are gone, and whatever
//! never reaches in-degree zero sits on a cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{Violation, models::WorkflowGraph};

/// Nodes by declaration index, with deduplicated dependency lists.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

/// Result of stage grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOrder {
    /// Node indices per stage, each stage in declaration order.
    pub stages: Vec<Vec<usize>>,
    /// Nodes that could not be placed (non-empty only for cyclic graphs).
    pub unresolved: Vec<usize>,
}

impl DependencyGraph {
    /// Index the graph, pushing structural violations into `violations`.
    pub fn build(graph: &WorkflowGraph, violations: &mut Vec<Violation>) -> Self {
        let count = graph.nodes.len();
        let mut index: HashMap<String, usize> = HashMap::with_capacity(count);
        let mut reported: HashSet<&str> = HashSet::new();

        // -------------------------------------------------------------------
        // 1. Ensure node IDs are unique
        // -------------------------------------------------------------------
        for (i, node) in graph.nodes.iter().enumerate() {
            if index.contains_key(&node.id) {
                if reported.insert(node.id.as_str()) {
                    violations.push(Violation::DuplicateNodeId(node.id.clone()));
                }
            } else {
                index.insert(node.id.clone(), i);
            }
        }

        // -------------------------------------------------------------------
        // 2. Validate edge endpoints and collapse duplicates
        // -------------------------------------------------------------------
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut seen_edges: HashSet<(usize, usize)> = HashSet::new();

        for edge in &graph.edges {
            let source = index.get(&edge.source).copied();
            let target = index.get(&edge.target).copied();
            if source.is_none() {
                violations.push(Violation::UnknownNodeReference {
                    node_id: edge.source.clone(),
                    side: "source",
                });
            }
            if target.is_none() {
                violations.push(Violation::UnknownNodeReference {
                    node_id: edge.target.clone(),
                    side: "target",
                });
            }
            if let (Some(s), Some(t)) = (source, target) {
                if seen_edges.insert((s, t)) {
                    dependencies[t].push(s);
                    dependents[s].push(t);
                }
            }
        }

        for list in dependencies.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
        }

        Self {
            ids: graph.nodes.iter().map(|n| n.id.clone()).collect(),
            index,
            dependencies,
            dependents,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, node: usize) -> &str {
        &self.ids[node]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Direct dependencies of `node`, in declaration order.
    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    /// Group nodes into stages (Kahn's algorithm).
    pub fn stages(&self) -> StageOrder {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut placed = vec![false; self.len()];

        // Seed with nodes that have no incoming edges.
        let mut current: Vec<usize> = (0..self.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut stages = Vec::new();

        while !current.is_empty() {
            let mut next = Vec::new();
            for &node in &current {
                placed[node] = true;
                for &dependent in &self.dependents[node] {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            stages.push(std::mem::replace(&mut current, next));
        }

        // If we didn't place every node the graph contains a cycle.
        let unresolved = (0..self.len()).filter(|&i| !placed[i]).collect();
        StageOrder { stages, unresolved }
    }

    /// All transitive dependencies of `node`. Contains `node` itself only when
    /// it sits on a cycle.
    pub fn ancestors(&self, node: usize) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = self.dependencies[node].iter().copied().collect();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current) {
                queue.extend(self.dependencies[current].iter().copied());
            }
        }
        seen
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node};

    fn make_graph(ids: &[&str], edges: &[(&str, &str)]) -> WorkflowGraph {
        WorkflowGraph::new(
            ids.iter().map(|id| Node::new(*id, "mock")).collect(),
            edges.iter().map(|(s, t)| Edge::new(*s, *t)).collect(),
        )
    }

    fn build(graph: &WorkflowGraph) -> (DependencyGraph, Vec<Violation>) {
        let mut violations = Vec::new();
        let dag = DependencyGraph::build(graph, &mut violations);
        (dag, violations)
    }

    #[test]
    fn linear_dag_has_one_node_per_stage() {
        // A → B → C
        let (dag, violations) = build(&make_graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")]));
        assert!(violations.is_empty());
        assert_eq!(dag.stages().stages, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn diamond_dag_groups_independent_nodes() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let (dag, _) = build(&make_graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        ));
        let order = dag.stages();
        assert_eq!(order.stages, vec![vec![0], vec![1, 2], vec![3]]);
        assert!(order.unresolved.is_empty());
    }

    #[test]
    fn stage_members_follow_declaration_order() {
        // c and a are both roots; c is declared first.
        let (dag, _) = build(&make_graph(&["c", "a", "b"], &[("a", "b"), ("c", "b")]));
        assert_eq!(dag.stages().stages, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let (dag, violations) = build(&make_graph(&["a", "b"], &[("a", "b"), ("a", "b")]));
        assert!(violations.is_empty());
        assert_eq!(dag.dependencies(1), &[0]);
    }

    #[test]
    fn duplicate_node_id_is_reported_once() {
        let (_, violations) = build(&make_graph(&["a", "a", "a"], &[]));
        assert_eq!(violations, vec![Violation::DuplicateNodeId("a".into())]);
    }

    #[test]
    fn edges_referencing_missing_nodes_are_all_reported() {
        let (_, violations) = build(&make_graph(&["a"], &[("ghost", "a"), ("a", "phantom")]));
        assert_eq!(
            violations,
            vec![
                Violation::UnknownNodeReference { node_id: "ghost".into(), side: "source" },
                Violation::UnknownNodeReference { node_id: "phantom".into(), side: "target" },
            ]
        );
    }

    #[test]
    fn cycle_leaves_nodes_unresolved() {
        // A → B → C → A  (cycle!), D hangs off C
        let (dag, _) = build(&make_graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")],
        ));
        let order = dag.stages();
        assert!(order.stages.is_empty());
        assert_eq!(order.unresolved, vec![0, 1, 2, 3]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let (dag, _) = build(&make_graph(&["solo", "x"], &[("solo", "solo")]));
        let order = dag.stages();
        assert_eq!(order.stages, vec![vec![1]]);
        assert_eq!(order.unresolved, vec![0]);
    }

    #[test]
    fn ancestors_are_transitive() {
        let (dag, _) = build(&make_graph(&["a", "b", "c", "x"], &[("a", "b"), ("b", "c")]));
        assert_eq!(dag.ancestors(2), HashSet::from([0, 1]));
        assert!(dag.ancestors(3).is_empty());
    }
}
