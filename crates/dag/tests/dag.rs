use gridcalc_dag::{CycleError, DependencyGraph};
use gridcalc_primitives::CellLocation;
use std::collections::BTreeSet;

fn loc(label: &str) -> CellLocation {
    CellLocation::from_label(label).expect("valid label")
}

fn deps(labels: &[&str]) -> Vec<CellLocation> {
    labels.iter().map(|l| loc(l)).collect()
}

#[test]
fn test_build_simple_chain() {
    let (graph, leaves) = DependencyGraph::from_dependencies(vec![
        (loc("A1"), deps(&[])),
        (loc("B1"), deps(&["A1"])),
    ])
    .expect("acyclic");

    assert_eq!(graph.len(), 2);
    assert_eq!(leaves, BTreeSet::from([loc("A1")]));
    assert_eq!(graph.parents_of(&loc("B1")), vec![loc("A1")]);
}

#[test]
fn test_dependency_on_empty_cell_creates_node() {
    let (graph, leaves) =
        DependencyGraph::from_dependencies(vec![(loc("B2"), deps(&["Z99"]))]).expect("acyclic");

    assert!(graph.contains(&loc("Z99")));
    assert_eq!(leaves, BTreeSet::from([loc("Z99")]));
}

#[test]
fn test_cell_without_dependencies_is_leaf() {
    let (_, leaves) = DependencyGraph::from_dependencies(vec![
        (loc("A1"), deps(&[])),
        (loc("A2"), deps(&[])),
        (loc("A3"), deps(&["A1", "A2"])),
    ])
    .expect("acyclic");

    assert_eq!(leaves, BTreeSet::from([loc("A1"), loc("A2")]));
}

#[test]
fn test_cycle_rejected_with_path() {
    let err = DependencyGraph::from_dependencies(vec![
        (loc("A1"), deps(&["B1"])),
        (loc("B1"), deps(&["A1"])),
    ])
    .expect_err("cycle");

    assert_eq!(
        err,
        CycleError {
            path: vec![loc("A1"), loc("B1"), loc("A1")],
        }
    );
}

#[test]
fn test_self_reference_rejected() {
    let err = DependencyGraph::from_dependencies(vec![(loc("C3"), deps(&["C3"]))])
        .expect_err("self cycle");
    assert_eq!(err.to_string(), "C3 -> C3");
}

#[test]
fn test_long_cycle_reported_in_order() {
    let err = DependencyGraph::from_dependencies(vec![
        (loc("A1"), deps(&["A2"])),
        (loc("A2"), deps(&["A3"])),
        (loc("A3"), deps(&["A1"])),
    ])
    .expect_err("cycle");
    assert_eq!(err.to_string(), "A1 -> A2 -> A3 -> A1");
}

#[test]
fn test_topological_order_respects_parents() {
    let (graph, _) = DependencyGraph::from_dependencies(vec![
        (loc("D1"), deps(&["B1", "C1"])),
        (loc("C1"), deps(&["A1"])),
        (loc("B1"), deps(&["A1"])),
        (loc("A1"), deps(&[])),
    ])
    .expect("acyclic");

    let order = graph.topological_order().expect("order");
    assert_eq!(order.len(), 4);
    let position = |l: &str| order.iter().position(|x| *x == loc(l)).unwrap();
    assert!(position("A1") < position("B1"));
    assert!(position("A1") < position("C1"));
    assert!(position("B1") < position("D1"));
    assert!(position("C1") < position("D1"));
}

#[test]
fn test_diamond_is_not_a_cycle() {
    let result = DependencyGraph::from_dependencies(vec![
        (loc("B1"), deps(&["A1"])),
        (loc("C1"), deps(&["A1"])),
        (loc("D1"), deps(&["B1", "C1"])),
    ]);
    assert!(result.is_ok());
}
