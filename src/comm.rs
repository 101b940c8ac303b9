//! Explicit parallel context for collective operations.
//!
//! Every collective in this crate takes a `&dyn Communicator` (or a generic `C: Communicator`)
//! instead of relying on process-wide state. All ranks must call each collective in the same
//! order with arguments of the same length, otherwise the ranks deadlock.
use parking_lot::Mutex;
use std::sync::{Arc, Barrier};

pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Replaces `values` by the element-wise sum of `values` over all ranks.
    ///
    /// The summation order is the rank order, so every rank observes bit-identical results.
    fn sum_in_place(&self, values: &mut [f64]);

    fn barrier(&self);

    fn sum_usize(&self, value: usize) -> usize {
        let mut buffer = [value as f64];
        self.sum_in_place(&mut buffer);
        buffer[0] as usize
    }

    fn sum_f64(&self, value: f64) -> f64 {
        let mut buffer = [value];
        self.sum_in_place(&mut buffer);
        buffer[0]
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn sum_in_place(&self, values: &mut [f64]) {
        (**self).sum_in_place(values)
    }

    fn barrier(&self) {
        (**self).barrier()
    }
}

/// A single-process communicator. All collectives are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn sum_in_place(&self, _values: &mut [f64]) {}

    fn barrier(&self) {}
}

#[derive(Debug)]
struct SharedState {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// One rank of a group of ranks living as threads in the same process.
///
/// Create the whole group with [`ThreadComm::create`] and move each communicator into its own
/// thread.
#[derive(Debug, Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<SharedState>,
}

impl ThreadComm {
    pub fn create(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "A communicator needs at least one rank");
        let shared = Arc::new(SharedState {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sum_in_place(&self, values: &mut [f64]) {
        if self.size == 1 {
            return;
        }

        {
            let mut slots = self.shared.slots.lock();
            let slot = &mut slots[self.rank];
            slot.clear();
            slot.extend_from_slice(values);
        }
        self.shared.barrier.wait();

        {
            let slots = self.shared.slots.lock();
            values.fill(0.0);
            for slot in slots.iter() {
                assert_eq!(slot.len(), values.len(), "Ranks disagree on the length of a reduction");
                for (v, s) in values.iter_mut().zip(slot) {
                    *v += *s;
                }
            }
        }
        // Nobody may overwrite their slot before everyone has read it
        self.shared.barrier.wait();
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}
