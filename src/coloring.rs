//! Graph coloring of index subsets, used to run cell loops in parallel without write conflicts.
use rustc_hash::FxHashMap;
use std::mem;

/// Partitions the subsets into colors such that no two subsets of the same color share an index.
///
/// Returns, for each color, the indices of the subsets in that color. Subsets are visited in
/// order, so the result is deterministic.
pub fn sequential_greedy_coloring<S: AsRef<[usize]>>(subsets: &[S]) -> Vec<Vec<usize>> {
    let mut colors = Vec::new();
    let mut postponed_subset_indices = Vec::new();
    let mut current_subset_indices: Vec<_> = (0..subsets.len()).collect();

    // Index of the last color to visit any given node. The table grows as we encounter
    // larger node indices.
    let mut last_visited_color: Vec<Option<usize>> = Vec::new();

    let mut color_idx = 0;
    while !current_subset_indices.is_empty() {
        let mut color = Vec::new();
        for &subset_idx in &current_subset_indices {
            let subset = subsets[subset_idx].as_ref();
            let is_blocked = subset
                .iter()
                .any(|&node_idx| last_visited_color.get(node_idx).copied().flatten() == Some(color_idx));
            if is_blocked {
                postponed_subset_indices.push(subset_idx);
            } else {
                for &node_idx in subset {
                    if node_idx >= last_visited_color.len() {
                        // Amortize resizes
                        last_visited_color.resize(2 * node_idx + 1, None);
                    }
                    last_visited_color[node_idx] = Some(color_idx);
                }
                color.push(subset_idx);
            }
        }

        debug_assert!(is_disjoint(subsets, &color));
        colors.push(color);
        mem::swap(&mut postponed_subset_indices, &mut current_subset_indices);
        postponed_subset_indices.clear();
        color_idx += 1;
    }

    colors
}

/// Whether the given subsets are pairwise disjoint.
///
/// Indices may repeat within a single subset.
pub fn is_disjoint<S: AsRef<[usize]>>(subsets: &[S], selection: &[usize]) -> bool {
    let mut owner: FxHashMap<usize, usize> = FxHashMap::default();
    for &subset_idx in selection {
        for &node_idx in subsets[subset_idx].as_ref() {
            if *owner.entry(node_idx).or_insert(subset_idx) != subset_idx {
                return false;
            }
        }
    }
    true
}
