//! Marking strategies for adaptive refinement.
use crate::mesh::Triangulation;
use ordered_float::OrderedFloat;

/// Cells selected for refinement and coarsening.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkedCells {
    pub refine: Vec<usize>,
    pub coarsen: Vec<usize>,
}

/// Number of cells covered by `fraction` of `n` cells, rounded up.
///
/// Products that are integral up to rounding error are not rounded up, so that e.g.
/// `0.3 * 10` gives 3 rather than 4.
pub fn marked_count(fraction: f64, n: usize) -> usize {
    let exact = fraction.clamp(0.0, 1.0) * n as f64;
    let nearest = exact.round();
    let count = if (exact - nearest).abs() <= 1e-9 * (n as f64).max(1.0) {
        nearest
    } else {
        exact.ceil()
    };
    (count as usize).min(n)
}

/// Fixed-number marking.
///
/// The `ceil(top_fraction * n)` cells with the largest indicators are marked for refinement and
/// the `ceil(bottom_fraction * n)` cells with the smallest indicators are marked for coarsening.
/// Cells are ordered by decreasing indicator, ties broken by increasing cell index. A cell that
/// falls into both sets is only refined.
pub fn mark_fixed_number(indicators: &[f64], top_fraction: f64, bottom_fraction: f64) -> MarkedCells {
    let n = indicators.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (std::cmp::Reverse(OrderedFloat(indicators[i])), i));

    let n_refine = marked_count(top_fraction, n);
    let n_coarsen = marked_count(bottom_fraction, n);

    let refine: Vec<usize> = order[..n_refine].to_vec();
    let coarsen: Vec<usize> = order[n - n_coarsen..]
        .iter()
        .copied()
        .filter(|i| !refine.contains(i))
        .collect();
    MarkedCells { refine, coarsen }
}

/// Flags the cells selected by [`mark_fixed_number`] on the triangulation.
pub fn refine_and_coarsen_fixed_number(
    tria: &mut Triangulation,
    indicators: &[f64],
    top_fraction: f64,
    bottom_fraction: f64,
) -> MarkedCells {
    assert_eq!(indicators.len(), tria.n_active_cells());
    let marked = mark_fixed_number(indicators, top_fraction, bottom_fraction);
    tria.clear_flags();
    for &i in &marked.refine {
        tria.set_refine_flag(i);
    }
    for &i in &marked.coarsen {
        tria.set_coarsen_flag(i);
    }
    marked
}
