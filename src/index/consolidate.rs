//! Batched repair that removes lazily deleted slots from the graph.
//!
//! A pass snapshots the delete set, then rewrites every live slot whose
//! out-list touches a deleted slot: the deleted neighbors are replaced by
//! their own live neighbors (the 2-hop expansion) and the merged pool is
//! pruned back under the degree bound. Afterwards the deleted slots'
//! own lists are cleared and their slots go back on the free list.
//!
//! The pass holds the consolidation guard throughout, which keeps slot
//! allocation out (a recycled slot must not be reissued mid-pass) and makes
//! the pass single-flight. Searches keep running: deleted slots stay
//! traversable until the very end, and each list rewrite happens under its
//! own edge lock. Taking the structural lock exclusively at the start
//! means every insert that was already past allocation has finished wiring
//! before the snapshot, so the set of lists the sweep sees is complete.
//!
//! The delete set is only shrunk after the sweep has fully succeeded, so a
//! failed or interrupted pass can simply be retried.

use std::collections::HashSet;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::distance::Element;
use crate::error::Result;
use crate::graph::{robust_prune, Scored};

use super::StreamingIndex;

/// What one consolidation pass did.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidateReport {
    /// Live user points after the pass.
    pub active_points: usize,
    /// User-addressable slot count.
    pub max_points: usize,
    /// Free slots after the pass.
    pub empty_slots: usize,
    /// Slots released by this pass.
    pub slots_released: usize,
    /// Deleted slots still pending (marked while the pass ran).
    pub delete_set_size: usize,
    /// Wall-clock seconds.
    pub time: f64,
}

impl<T: Element> StreamingIndex<T> {
    /// Removes every currently deleted slot from the graph and returns the
    /// slots to the free list. No-op when nothing is deleted.
    ///
    /// Repair parallelism follows the ambient rayon pool; wrap the call in
    /// `ThreadPool::install` to bound it.
    pub fn consolidate_deletes(&self) -> Result<ConsolidateReport> {
        let _pass = self.consolidate_lock();
        let timer = Instant::now();

        // Begin boundary: exclusive, so every in-flight insert has finished
        // wiring and the snapshot below sees all of its edges.
        let (dead, live) = {
            let map = self.tags_guard();
            let _excl = self.structural_write();
            let dead: HashSet<u32> = self.deleted_read().iter().copied().collect();
            let mut live: Vec<u32> = map
                .occupied_slots()
                .into_iter()
                .filter(|slot| !dead.contains(slot))
                .collect();
            live.extend_from_slice(self.frozen_slots());
            (dead, live)
        };

        if dead.is_empty() {
            return Ok(self.report(0, timer));
        }

        live.par_iter().for_each(|&p| self.repair_slot(p, &dead));

        for &d in &dead {
            self.adjacency().clear(d);
        }

        // End boundary: publish the freed slots. Allocation is still locked
        // out by the pass guard, so nothing can grab them early.
        {
            let mut map = self.tags_guard();
            let _excl = self.structural_write();
            let mut deleted = self.deleted_write();
            for &d in &dead {
                map.release(d);
                deleted.remove(&d);
            }
        }

        Ok(self.report(dead.len(), timer))
    }

    /// Rewrites `p`'s out-list if it touches any slot in `dead`.
    fn repair_slot(&self, p: u32, dead: &HashSet<u32>) {
        self.adjacency().update(p, |list| {
            if !list.iter().any(|n| dead.contains(n)) {
                return;
            }

            // 2-hop expansion: keep live neighbors, replace each dead one
            // with its own live neighbors.
            let mut expansion: Vec<u32> = Vec::with_capacity(list.len());
            for &n in list.iter() {
                if dead.contains(&n) {
                    for &nn in self.adjacency().read(n).iter() {
                        if nn != p && !dead.contains(&nn) {
                            expansion.push(nn);
                        }
                    }
                } else {
                    expansion.push(n);
                }
            }
            expansion.sort_unstable();
            expansion.dedup();

            let pool: Vec<Scored> = expansion
                .into_iter()
                .map(|n| {
                    Scored::new(
                        self.metric()
                            .score(self.store().vector(p), self.store().vector(n)),
                        n,
                    )
                })
                .collect();
            *list = robust_prune(
                p,
                pool,
                self.params().max_degree,
                self.params().alpha,
                |a, b| {
                    self.metric()
                        .score(self.store().vector(a), self.store().vector(b))
                },
            );
        });
    }

    fn report(&self, slots_released: usize, timer: Instant) -> ConsolidateReport {
        let (active, empty) = {
            let map = self.tags_guard();
            (map.occupied(), map.empty_slots())
        };
        let delete_set_size = self.deleted_read().len();
        ConsolidateReport {
            active_points: active - delete_set_size,
            max_points: self.max_points(),
            empty_slots: empty,
            slots_released,
            delete_set_size,
            time: timer.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::distance::Metric;
    use crate::error::IndexError;
    use crate::index::{IndexParams, StreamingIndex};

    fn grid_index(side: usize) -> StreamingIndex<f32> {
        let n = side * side;
        let index = StreamingIndex::new(
            Metric::L2,
            2,
            n,
            IndexParams {
                max_degree: 6,
                beam_width: 12,
                alpha: 1.2,
                candidate_cap: 20,
                num_frozen: 1,
            },
        )
        .unwrap();
        let mut data = vec![0.0f32; n * 8];
        let mut tags = Vec::with_capacity(n);
        for i in 0..n {
            data[i * 8] = (i % side) as f32;
            data[i * 8 + 1] = (i / side) as f32;
            tags.push(i as u32 + 1);
        }
        index.build(&data, n, &tags).unwrap();
        index
    }

    #[test]
    fn consolidation_on_empty_delete_set_is_a_noop() {
        let index = grid_index(4);
        let before = index.stats();
        let report = index.consolidate_deletes().unwrap();
        assert_eq!(report.slots_released, 0);
        assert_eq!(report.delete_set_size, 0);
        assert_eq!(report.active_points, before.active_points);
    }

    #[test]
    fn consolidation_releases_slots_and_scrubs_edges() {
        let index = grid_index(5);
        for tag in [3u32, 7, 12, 18] {
            index.lazy_delete(tag).unwrap();
        }

        let report = index.consolidate_deletes().unwrap();
        assert_eq!(report.slots_released, 4);
        assert_eq!(report.delete_set_size, 0);
        assert_eq!(report.active_points, 21);
        assert_eq!(report.empty_slots, 4);

        // validate() rejects edges into free slots, which is exactly what a
        // leftover reference to a consolidated slot would be.
        index.validate().unwrap();
    }

    #[test]
    fn released_slots_are_reusable() {
        let index = grid_index(3);
        index.lazy_delete(5).unwrap();
        index.consolidate_deletes().unwrap();

        index.insert_point(&[1.5, 1.5], 100).unwrap();
        let stats = index.validate().unwrap();
        assert_eq!(stats.active_points, 9);
        assert_eq!(stats.empty_slots, 0);

        let hits = index.search(&[1.5, 1.5], 1, 12).unwrap();
        assert_eq!(hits[0].0, 100);
    }

    #[test]
    fn insert_delete_consolidate_restores_occupancy() {
        let index = grid_index(4);
        let before = index.stats();

        index.insert_point(&[0.4, 0.4], 999).unwrap();
        index.lazy_delete(999).unwrap();
        let report = index.consolidate_deletes().unwrap();

        assert_eq!(report.active_points, before.active_points);
        assert_eq!(report.empty_slots, before.empty_slots);
        index.validate().unwrap();
    }

    #[test]
    fn deleted_tag_can_be_reinserted_after_consolidation() {
        let index = grid_index(3);
        index.lazy_delete(4).unwrap();

        // Tag is free for rebinding immediately after the lazy delete.
        assert_eq!(
            index.insert_point(&[9.0, 9.0], 4),
            Err(IndexError::Capacity { capacity: 9 })
        );
        index.consolidate_deletes().unwrap();
        index.insert_point(&[9.0, 9.0], 4).unwrap();
        index.validate().unwrap();
    }

    #[test]
    fn search_skips_deleted_points_before_consolidation() {
        let index = grid_index(4);
        index.lazy_delete(1).unwrap();

        let hits = index.search(&[0.0, 0.0], 4, 12).unwrap();
        assert!(hits.iter().all(|&(tag, _)| tag != 1));

        index.consolidate_deletes().unwrap();
        let hits = index.search(&[0.0, 0.0], 4, 12).unwrap();
        assert!(hits.iter().all(|&(tag, _)| tag != 1));
    }
}
