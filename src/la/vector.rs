use crate::comm::Communicator;
use crate::index_set::IndexSet;
use std::ops::Range;

/// A vector whose entries are partitioned among ranks.
///
/// Only the owned entries are meaningful after [`DistributedVector::compress_add`].
#[derive(Debug, Clone, PartialEq)]
pub struct DistributedVector {
    values: Vec<f64>,
    owned: Range<usize>,
}

impl DistributedVector {
    pub fn zeros(len: usize, owned: Range<usize>) -> Self {
        assert!(owned.end <= len);
        Self {
            values: vec![0.0; len],
            owned,
        }
    }

    pub fn from_owned_set(owned: &IndexSet) -> Self {
        assert!(owned.is_contiguous(), "Owned index sets must be contiguous");
        let start = owned.as_slice().first().copied().unwrap_or(0);
        Self::zeros(owned.size(), start..start + owned.n_elements())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn owned_range(&self) -> Range<usize> {
        self.owned.clone()
    }

    pub fn owned_values(&self) -> &[f64] {
        &self.values[self.owned.clone()]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Adds a local contribution to any entry, owned or not.
    pub fn add(&mut self, index: usize, value: f64) {
        self.values[index] += value;
    }

    pub fn fill(&mut self, value: f64) {
        self.values.fill(value);
    }

    /// Sums the contributions of all ranks into the owners' entries.
    ///
    /// Entries not owned by this rank are zero afterwards.
    pub fn compress_add(&mut self, comm: &dyn Communicator) {
        comm.sum_in_place(&mut self.values);
        self.zero_ghosts();
    }

    fn zero_ghosts(&mut self) {
        let owned = self.owned.clone();
        for (i, v) in self.values.iter_mut().enumerate() {
            if !owned.contains(&i) {
                *v = 0.0;
            }
        }
    }

    /// The full vector assembled from the owned entries of every rank. Collective.
    pub fn gather(&self, comm: &dyn Communicator) -> Vec<f64> {
        let mut full = vec![0.0; self.values.len()];
        full[self.owned.clone()].copy_from_slice(self.owned_values());
        comm.sum_in_place(&mut full);
        full
    }

    /// Overwrites the owned entries from a full vector and zeroes the rest.
    pub fn set_owned_from(&mut self, full: &[f64]) {
        assert_eq!(full.len(), self.values.len());
        let owned = self.owned.clone();
        self.values[owned.clone()].copy_from_slice(&full[owned]);
        self.zero_ghosts();
    }

    /// Collective conversion into a ghosted vector with the given relevant entries.
    pub fn to_ghosted(&self, relevant: &IndexSet, comm: &dyn Communicator) -> GhostedVector {
        GhostedVector::new(self.gather(comm), relevant.clone())
    }

    /// Inner product of the owned parts, summed over all ranks. Collective.
    pub fn dot(&self, other: &DistributedVector, comm: &dyn Communicator) -> f64 {
        assert_eq!(self.owned, other.owned);
        let local: f64 = self
            .owned_values()
            .iter()
            .zip(other.owned_values())
            .map(|(a, b)| a * b)
            .sum();
        comm.sum_f64(local)
    }

    pub fn norm_l2(&self, comm: &dyn Communicator) -> f64 {
        self.dot(self, comm).sqrt()
    }
}

/// A read-only vector in which all locally relevant entries are valid.
#[derive(Debug, Clone, PartialEq)]
pub struct GhostedVector {
    values: Vec<f64>,
    relevant: IndexSet,
}

impl GhostedVector {
    fn new(mut values: Vec<f64>, relevant: IndexSet) -> Self {
        assert_eq!(values.len(), relevant.size());
        {
            let mut next = relevant.iter().peekable();
            for (i, v) in values.iter_mut().enumerate() {
                if next.peek() == Some(&i) {
                    next.next();
                } else {
                    *v = 0.0;
                }
            }
        }
        Self { values, relevant }
    }

    /// A zero vector with the given relevant entries.
    pub fn zeros(relevant: &IndexSet) -> Self {
        Self::new(vec![0.0; relevant.size()], relevant.clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn relevant(&self) -> &IndexSet {
        &self.relevant
    }

    /// # Panics
    ///
    /// Panics if `index` is not locally relevant.
    pub fn get(&self, index: usize) -> f64 {
        assert!(self.relevant.is_element(index), "Entry {} is not locally relevant", index);
        self.values[index]
    }

    /// All entries. Entries outside the relevant set are zero.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}
