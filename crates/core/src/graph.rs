use gridcalc_dag::{CycleError, DependencyGraph};
use gridcalc_primitives::CellLocation;
use gridcalc_sheet::Worksheet;
use std::collections::BTreeSet;

/// Build the dependency graph of every stored cell.
///
/// Returns the graph and its leaves (nodes with no parents). Referenced
/// empty cells become nodes too.
pub fn build_dependency_graph(
    worksheet: &Worksheet,
) -> Result<(DependencyGraph, BTreeSet<CellLocation>), CycleError> {
    let (graph, leaves) = DependencyGraph::from_dependencies(
        worksheet
            .iter()
            .map(|(location, cell)| (*location, cell.dependencies().iter().copied())),
    )?;
    tracing::debug!(
        "built dependency graph: {} nodes, {} leaves",
        graph.len(),
        leaves.len()
    );
    Ok((graph, leaves))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_covers_cells_and_references() {
        let mut sheet = Worksheet::new();
        sheet.set_formula("A1", "1").unwrap();
        sheet.set_formula("B1", "=A1+C9").unwrap();

        let (graph, leaves) = build_dependency_graph(&sheet).unwrap();
        assert_eq!(graph.len(), 3);
        let labels: Vec<String> = leaves.iter().map(CellLocation::label).collect();
        assert_eq!(labels, vec!["A1", "C9"]);
    }

    #[test]
    fn test_cycle_reported() {
        let mut sheet = Worksheet::new();
        sheet.set_formula("A1", "=B1").unwrap();
        sheet.set_formula("B1", "=A1").unwrap();

        let err = build_dependency_graph(&sheet).unwrap_err();
        assert_eq!(err.to_string(), "A1 -> B1 -> A1");
    }
}
