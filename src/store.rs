//! Slot-indexed storage of fixed-dimension vectors.
//!
//! Vectors live in one contiguous buffer of `capacity * aligned_dim`
//! scalars, where `aligned_dim` rounds the logical dimension up to a
//! multiple of 8 and the trailing pad scalars are zero. Scoring a slot uses
//! the full padded row; zero padding contributes nothing to L2 or inner
//! product, so the hot path never needs the unpadded length.
//!
//! Writes go through [`VectorStore::write_slot`], which is `unsafe`: the
//! store itself has no per-slot synchronization. The index only writes a
//! slot while it is unreachable (freshly allocated, or recycled while the
//! consolidation guard excludes allocation), so readers and the single
//! writer of a slot never overlap.

use std::cell::UnsafeCell;

use crate::distance::Element;

/// Rounds a dimension up to the store's stride multiple.
pub fn aligned_dim(dim: usize) -> usize {
    dim.div_ceil(8) * 8
}

/// Contiguous slot-indexed vector storage.
pub struct VectorStore<T> {
    data: UnsafeCell<Box<[T]>>,
    dim: usize,
    aligned_dim: usize,
    capacity: usize,
}

// SAFETY: every slot has at most one writer, and only while the slot is not
// reachable by readers; see `write_slot`.
unsafe impl<T: Send + Sync> Sync for VectorStore<T> {}

impl<T: Element> VectorStore<T> {
    /// Allocates a zeroed store for `capacity` slots of `dim` scalars each.
    pub fn new(capacity: usize, dim: usize) -> Self {
        let stride = aligned_dim(dim);
        Self {
            data: UnsafeCell::new(vec![T::default(); capacity * stride].into_boxed_slice()),
            dim,
            aligned_dim: stride,
            capacity,
        }
    }

    /// Logical vector dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Padded row stride in scalars.
    pub fn aligned_dim(&self) -> usize {
        self.aligned_dim
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The padded row of `slot`, including its zero padding.
    pub fn vector(&self, slot: u32) -> &[T] {
        let start = slot as usize * self.aligned_dim;
        assert!(start + self.aligned_dim <= self.capacity * self.aligned_dim);
        // SAFETY: the row is only mutated while unreachable (see `write_slot`),
        // and the slice covers exactly one row, so no reference spans a row
        // another thread may be writing.
        unsafe {
            std::slice::from_raw_parts((*self.data.get()).as_ptr().add(start), self.aligned_dim)
        }
    }

    /// Copies `src` (exactly `dim` scalars) into `slot` and zeroes the
    /// stride padding.
    ///
    /// # Safety
    ///
    /// The caller must hold `slot` exclusively: the slot is freshly
    /// allocated and not yet published to the tag map or the graph, so no
    /// concurrent reader can observe the row mid-write.
    pub unsafe fn write_slot(&self, slot: u32, src: &[T]) {
        debug_assert_eq!(src.len(), self.dim);
        let start = slot as usize * self.aligned_dim;
        assert!(start + self.aligned_dim <= self.capacity * self.aligned_dim);
        let row = std::slice::from_raw_parts_mut(
            (*self.data.get()).as_mut_ptr().add(start),
            self.aligned_dim,
        );
        row[..self.dim].copy_from_slice(src);
        for pad in &mut row[self.dim..] {
            *pad = T::default();
        }
    }

    /// Pads a query vector of `dim` scalars out to the row stride.
    pub fn pad_query(&self, query: &[T]) -> Vec<T> {
        debug_assert_eq!(query.len(), self.dim);
        let mut padded = vec![T::default(); self.aligned_dim];
        padded[..self.dim].copy_from_slice(query);
        padded
    }
}
