//! Sorted sets of global indices.
use std::ops::Range;

/// A sorted set of indices drawn from `0 .. size`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexSet {
    size: usize,
    indices: Vec<usize>,
}

impl IndexSet {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            indices: Vec::new(),
        }
    }

    pub fn from_range(size: usize, range: Range<usize>) -> Self {
        assert!(range.end <= size);
        Self {
            size,
            indices: range.collect(),
        }
    }

    /// Builds a set from arbitrary (possibly duplicated, unsorted) indices.
    pub fn from_indices(size: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut indices: Vec<_> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        assert!(indices.last().map_or(true, |&i| i < size), "Index out of bounds");
        Self { size, indices }
    }

    pub fn add_indices(&mut self, indices: impl IntoIterator<Item = usize>) {
        let mut merged = std::mem::take(&mut self.indices);
        merged.extend(indices);
        *self = Self::from_indices(self.size, merged);
    }

    /// The size of the index space the set lives in.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n_elements(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn is_element(&self, index: usize) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    /// Position of `index` among the elements of the set.
    pub fn index_within_set(&self, index: usize) -> Option<usize> {
        self.indices.binary_search(&index).ok()
    }

    pub fn is_contiguous(&self) -> bool {
        match (self.indices.first(), self.indices.last()) {
            (Some(first), Some(last)) => last - first + 1 == self.indices.len(),
            _ => true,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    pub fn is_subset_of(&self, other: &IndexSet) -> bool {
        self.iter().all(|i| other.is_element(i))
    }
}
