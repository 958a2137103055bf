//! Per-slot outbound edge lists with fine-grained locking.
//!
//! One `RwLock` per slot; readers copy the list out under the lock and
//! traverse the copy, so a search never holds more than one edge lock at a
//! time and writers rewrite lists wholesale. Lists are `SmallVec`-backed:
//! they stay inline at typical degrees and spill to the heap during the
//! bounded overshoot between a back-edge append and the prune that follows.

use std::sync::{PoisonError, RwLock};

use smallvec::SmallVec;

/// A single slot's outbound neighbors.
pub type NeighborVec = SmallVec<[u32; 32]>;

/// All outbound edge lists, indexed by slot.
pub struct AdjacencyLists {
    lists: Vec<RwLock<NeighborVec>>,
}

impl AdjacencyLists {
    /// `capacity` empty lists.
    pub fn new(capacity: usize) -> Self {
        let mut lists = Vec::with_capacity(capacity);
        lists.resize_with(capacity, || RwLock::new(NeighborVec::new()));
        Self { lists }
    }

    pub fn capacity(&self) -> usize {
        self.lists.len()
    }

    /// Copies out the neighbors of `slot`.
    pub fn read(&self, slot: u32) -> NeighborVec {
        self.lists[slot as usize]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current out-degree of `slot`.
    pub fn degree(&self, slot: u32) -> usize {
        self.lists[slot as usize]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Replaces the neighbors of `slot` wholesale.
    pub fn write(&self, slot: u32, neighbors: NeighborVec) {
        debug_assert!(!neighbors.contains(&slot), "self-loop on slot {slot}");
        debug_assert!(
            {
                let mut sorted: Vec<u32> = neighbors.to_vec();
                sorted.sort_unstable();
                sorted.windows(2).all(|w| w[0] != w[1])
            },
            "duplicate edge on slot {slot}"
        );
        *self.lists[slot as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner) = neighbors;
    }

    /// Runs a read-modify-write of one list under its write lock.
    ///
    /// Distance evaluations inside `f` are fine; acquiring another slot's
    /// *write* lock inside `f` is not.
    pub fn update(&self, slot: u32, f: impl FnOnce(&mut NeighborVec)) {
        let mut list = self.lists[slot as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut list);
        debug_assert!(!list.contains(&slot), "self-loop on slot {slot}");
    }

    /// Appends one edge unless it would be a self-loop or a duplicate.
    /// Returns the out-degree after the append.
    pub fn append(&self, slot: u32, neighbor: u32) -> usize {
        let mut list = self.lists[slot as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if neighbor != slot && !list.contains(&neighbor) {
            list.push(neighbor);
        }
        list.len()
    }

    /// Empties the list of `slot`.
    pub fn clear(&self, slot: u32) {
        self.lists[slot as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
