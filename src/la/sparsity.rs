use crate::constraints::AffineConstraints;
use crate::dofs::DofHandler;
use nalgebra_sparse::pattern::SparsityPattern;

/// The sparsity pattern of the constrained system.
///
/// Couplings between constrained DoFs are replaced by couplings between their masters, and
/// every row contains its diagonal. The pattern is built from all cells, so it is identical on
/// every rank.
pub fn make_sparsity_pattern(dofs: &DofHandler, constraints: &AffineConstraints) -> SparsityPattern {
    let n = dofs.n_dofs();
    let mut rows: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

    let mut expanded = Vec::new();
    for cell_index in 0..dofs.n_cells() {
        expanded.clear();
        for &dof in dofs.cell_dofs(cell_index) {
            expanded.extend(constraints.expand(dof).into_iter().map(|(j, _)| j));
        }
        expanded.sort_unstable();
        expanded.dedup();
        for &i in &expanded {
            rows[i].extend_from_slice(&expanded);
        }
    }

    let mut offsets = Vec::with_capacity(n + 1);
    let mut column_indices = Vec::new();
    offsets.push(0);
    for mut row in rows {
        row.sort_unstable();
        row.dedup();
        column_indices.extend(row);
        offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(n, n, offsets, column_indices)
        .expect("Rows are sorted and deduplicated by construction")
}
