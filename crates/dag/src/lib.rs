//! Directed acyclic graph for spreadsheet dependency tracking.
//!
//! Nodes are cell locations. A node's `parents` are the cells it reads (they
//! must be evaluated first); its `children` are the cells that read it.

use gridcalc_primitives::CellLocation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagNode {
    parents: BTreeSet<CellLocation>,
    children: BTreeSet<CellLocation>,
}

impl DagNode {
    /// Locations that must be evaluated before this one.
    pub fn parents(&self) -> &BTreeSet<CellLocation> {
        &self.parents
    }

    /// Locations that depend on this one.
    pub fn children(&self) -> &BTreeSet<CellLocation> {
        &self.children
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagNodeJson {
    pub location: String,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

/// A circular reference. `path` starts and ends at the same location, e.g.
/// `[A1, B1, A1]`; a self-reference is `[A1, A1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub path: Vec<CellLocation>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.path.iter().map(CellLocation::label).collect();
        f.write_str(&labels.join(" -> "))
    }
}

impl std::error::Error for CycleError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    InProgress,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<CellLocation, DagNode>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(cell, cells it reads)` pairs and validate it.
    ///
    /// Every cell and every dependency target gets a node. Returns the graph
    /// together with its leaf set (nodes with no parents).
    pub fn from_dependencies<I, D>(cells: I) -> Result<(Self, BTreeSet<CellLocation>), CycleError>
    where
        I: IntoIterator<Item = (CellLocation, D)>,
        D: IntoIterator<Item = CellLocation>,
    {
        let mut graph = Self::new();
        for (location, dependencies) in cells {
            graph.ensure_node(location);
            for dependency in dependencies {
                graph.add_dependency(location, dependency);
            }
        }
        graph.validate_acyclic()?;
        let leaves = graph.leaves();
        Ok((graph, leaves))
    }

    /// Make sure a node exists for `location`.
    pub fn ensure_node(&mut self, location: CellLocation) {
        self.nodes.entry(location).or_default();
    }

    /// Record that `dependent` reads `dependency`. Cycles are not checked
    /// here; call [`DependencyGraph::validate_acyclic`] once the graph is complete.
    pub fn add_dependency(&mut self, dependent: CellLocation, dependency: CellLocation) {
        self.nodes
            .entry(dependent)
            .or_default()
            .parents
            .insert(dependency);
        self.nodes
            .entry(dependency)
            .or_default()
            .children
            .insert(dependent);
    }

    /// Validate that the graph is acyclic using a full depth-first traversal.
    pub fn validate_acyclic(&self) -> Result<(), CycleError> {
        self.depth_first().map(|_| ())
    }

    /// A sequential evaluation order: every node appears after all of its parents.
    pub fn topological_order(&self) -> Result<Vec<CellLocation>, CycleError> {
        self.depth_first()
    }

    /// Nodes with no parents, eligible for immediate evaluation.
    pub fn leaves(&self) -> BTreeSet<CellLocation> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parents.is_empty())
            .map(|(location, _)| *location)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, location: &CellLocation) -> bool {
        self.nodes.contains_key(location)
    }

    pub fn node(&self, location: &CellLocation) -> Option<&DagNode> {
        self.nodes.get(location)
    }

    /// Direct parents of a node (empty for unknown locations).
    pub fn parents_of(&self, location: &CellLocation) -> Vec<CellLocation> {
        self.nodes
            .get(location)
            .map(|node| node.parents.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Direct children of a node (empty for unknown locations).
    pub fn children_of(&self, location: &CellLocation) -> Vec<CellLocation> {
        self.nodes
            .get(location)
            .map(|node| node.children.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellLocation, &DagNode)> {
        self.nodes.iter()
    }

    /// Serialize the graph to JSON, keyed by A1 labels.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let labels = |set: &BTreeSet<CellLocation>| set.iter().map(CellLocation::label).collect();
        let nodes: Vec<DagNodeJson> = self
            .nodes
            .iter()
            .map(|(location, node)| DagNodeJson {
                location: location.label(),
                parents: labels(&node.parents),
                children: labels(&node.children),
            })
            .collect();
        serde_json::to_string(&nodes)
    }

    /// Post-order walk along parent edges, so each node is emitted after all
    /// of its parents. Roots are visited in location order, which makes the
    /// reported cycle deterministic for a given graph.
    fn depth_first(&self) -> Result<Vec<CellLocation>, CycleError> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut state: BTreeMap<CellLocation, VisitState> = BTreeMap::new();
        let mut path_stack: Vec<CellLocation> = Vec::new();

        for root in self.nodes.keys() {
            if state.contains_key(root) {
                continue;
            }

            let mut stack: Vec<(CellLocation, bool)> = vec![(*root, false)];

            while let Some((location, expanded)) = stack.pop() {
                if expanded {
                    state.insert(location, VisitState::Done);
                    order.push(location);
                    path_stack.pop();
                    continue;
                }

                match state.get(&location) {
                    Some(VisitState::Done) => continue,
                    Some(VisitState::InProgress) => {
                        let start = path_stack
                            .iter()
                            .position(|on_path| *on_path == location)
                            .unwrap_or(0);
                        let mut path = path_stack[start..].to_vec();
                        path.push(location);
                        return Err(CycleError { path });
                    }
                    None => {}
                }

                state.insert(location, VisitState::InProgress);
                path_stack.push(location);
                stack.push((location, true));

                if let Some(node) = self.nodes.get(&location) {
                    // reversed so the smallest parent is popped first
                    for parent in node.parents.iter().rev() {
                        if state.get(parent) != Some(&VisitState::Done) {
                            stack.push((*parent, false));
                        }
                    }
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(col: u32, row: u32) -> CellLocation {
        CellLocation::new(col, row)
    }

    #[test]
    fn test_dependency_edges_are_mirrored() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(loc(2, 1), loc(1, 1));

        assert_eq!(graph.parents_of(&loc(2, 1)), vec![loc(1, 1)]);
        assert_eq!(graph.children_of(&loc(1, 1)), vec![loc(2, 1)]);
        assert_eq!(graph.leaves(), BTreeSet::from([loc(1, 1)]));
    }

    #[test]
    fn test_two_cell_cycle_path() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(loc(1, 1), loc(2, 1));
        graph.add_dependency(loc(2, 1), loc(1, 1));

        let err = graph.validate_acyclic().unwrap_err();
        assert_eq!(err.path, vec![loc(1, 1), loc(2, 1), loc(1, 1)]);
        assert_eq!(err.to_string(), "A1 -> B1 -> A1");
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(loc(1, 1), loc(1, 1));

        let err = graph.validate_acyclic().unwrap_err();
        assert_eq!(err.path, vec![loc(1, 1), loc(1, 1)]);
    }

    #[test]
    fn test_cycle_path_excludes_lead_in() {
        // C1 -> A1 -> B1 -> A1: C1 is not part of the cycle
        let mut graph = DependencyGraph::new();
        graph.add_dependency(loc(3, 1), loc(1, 1));
        graph.add_dependency(loc(1, 1), loc(2, 1));
        graph.add_dependency(loc(2, 1), loc(1, 1));

        let err = graph.validate_acyclic().unwrap_err();
        assert_eq!(err.path.first(), err.path.last());
        assert!(!err.path.contains(&loc(3, 1)));
    }

    #[test]
    fn test_to_json_uses_labels() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(loc(2, 1), loc(1, 1));

        let json = graph.to_json().unwrap();
        let nodes: Vec<DagNodeJson> = serde_json::from_str(&json).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].location, "A1");
        assert_eq!(nodes[0].children, vec!["B1".to_string()]);
    }
}
