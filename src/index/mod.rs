//! The streaming index core.
//!
//! A [`StreamingIndex`] owns the vector store, the tag map and the
//! proximity graph, and exposes the three operations that may run
//! concurrently: batch [`build`](StreamingIndex::build), point
//! [`insert_point`](StreamingIndex::insert_point), and lazy
//! [`lazy_delete`](StreamingIndex::lazy_delete) followed by
//! [`consolidate_deletes`](StreamingIndex::consolidate_deletes).
//!
//! # Slot space
//!
//! User points occupy slots `[0, max_points)`. A fixed number of frozen
//! slots sits above that range, populated once (batch medoid, or a random
//! point of a requested norm) and used as the entry points of every greedy
//! search. Frozen slots are never tagged, deleted or returned as results.
//!
//! # Lock hierarchy
//!
//! Acquired in this order, never the reverse:
//!
//! 1. `tags` mutex: tag ↔ slot map and the slot free list.
//! 2. `structural` rwlock: shared by searches and the wiring stage of an
//!    insert; exclusive for slot allocation and the consolidation
//!    boundaries.
//! 3. Per-slot edge locks inside [`AdjacencyLists`].
//!
//! A separate `consolidate_guard` mutex is held for an entire
//! consolidation pass; slot allocation takes it briefly, so recycled slots
//! can never be reissued while the pass that is releasing them is still
//! running, and a second pass cannot start over the first.
//!
//! # References
//!
//! - Subramanya et al. (2019): "DiskANN: Fast Accurate Billion-point
//!   Nearest Neighbor Search on a Single Node"
//! - Singh et al. (2021): "FreshDiskANN: A Fast and Accurate Graph-Based
//!   ANN Index for Streaming Similarity Search"

mod consolidate;
mod snapshot;

pub use consolidate::ConsolidateReport;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::distance::{Element, Metric};
use crate::error::{IndexError, Result};
use crate::graph::{greedy_search, robust_prune, AdjacencyLists, Scored, SearchOutcome};
use crate::store::VectorStore;
use crate::tags::{TagMap, NULL_TAG};

/// Construction parameters of a [`StreamingIndex`].
#[derive(Debug, Clone)]
pub struct IndexParams {
    /// Maximum out-degree per slot (R).
    pub max_degree: usize,
    /// Beam width used when wiring new points (L). Must be >= `max_degree`.
    pub beam_width: usize,
    /// Pruning diversity parameter, >= 1.0.
    pub alpha: f32,
    /// Out-degree overshoot at which a back-edge append triggers a prune
    /// back down to `max_degree` (C).
    pub candidate_cap: usize,
    /// Number of frozen entry-point slots.
    pub num_frozen: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            max_degree: 64,
            beam_width: 100,
            alpha: 1.2,
            candidate_cap: 500,
            num_frozen: 1,
        }
    }
}

/// Point-in-time occupancy and graph statistics.
#[derive(Debug, Clone)]
pub struct IndexStats {
    /// Live user points (occupied slots minus frozen).
    pub active_points: usize,
    /// User-addressable slot count.
    pub max_points: usize,
    /// Free-list size plus the untouched slot range.
    pub empty_slots: usize,
    /// Slots currently marked deleted but not yet consolidated.
    pub delete_set_size: usize,
    /// Largest out-degree over occupied slots.
    pub max_observed_degree: usize,
}

/// A streaming in-memory Vamana index over `T` scalars.
pub struct StreamingIndex<T: Element> {
    metric: Metric,
    params: IndexParams,
    max_points: usize,
    store: VectorStore<T>,
    adj: AdjacencyLists,
    tags: Mutex<TagMap>,
    delete_set: RwLock<HashSet<u32>>,
    structural: RwLock<()>,
    consolidate_guard: Mutex<()>,
    start_slots: Vec<u32>,
    entry_ready: AtomicBool,
}

impl<T: Element> StreamingIndex<T> {
    /// Creates an empty index for up to `max_points` points of dimension
    /// `dim`.
    pub fn new(metric: Metric, dim: usize, max_points: usize, params: IndexParams) -> Result<Self> {
        if dim == 0 {
            return Err(IndexError::InvalidConfig("dimension must be positive".into()));
        }
        if max_points == 0 {
            return Err(IndexError::InvalidConfig("max_points must be positive".into()));
        }
        if params.max_degree == 0 {
            return Err(IndexError::InvalidConfig("max_degree must be positive".into()));
        }
        if params.beam_width < params.max_degree {
            return Err(IndexError::InvalidConfig(format!(
                "beam width {} must be >= max degree {}",
                params.beam_width, params.max_degree
            )));
        }
        if params.alpha < 1.0 {
            return Err(IndexError::InvalidConfig(format!(
                "alpha {} must be >= 1.0",
                params.alpha
            )));
        }
        if params.candidate_cap < params.max_degree {
            return Err(IndexError::InvalidConfig(format!(
                "candidate cap {} must be >= max degree {}",
                params.candidate_cap, params.max_degree
            )));
        }
        if params.num_frozen == 0 {
            return Err(IndexError::InvalidConfig(
                "at least one frozen entry point is required".into(),
            ));
        }

        let capacity = max_points + params.num_frozen;
        let start_slots = (max_points as u32..capacity as u32).collect();
        Ok(Self {
            metric,
            max_points,
            store: VectorStore::new(capacity, dim),
            adj: AdjacencyLists::new(capacity),
            tags: Mutex::new(TagMap::new(max_points)),
            delete_set: RwLock::new(HashSet::new()),
            structural: RwLock::new(()),
            consolidate_guard: Mutex::new(()),
            start_slots,
            entry_ready: AtomicBool::new(false),
            params,
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// The frozen entry-point slots.
    pub fn frozen_slots(&self) -> &[u32] {
        &self.start_slots
    }

    /// Live user points.
    pub fn num_active(&self) -> usize {
        let deleted = self.deleted_read().len();
        self.tags_guard().occupied() - deleted
    }

    pub(crate) fn tags_guard(&self) -> MutexGuard<'_, TagMap> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn structural_read(&self) -> RwLockReadGuard<'_, ()> {
        self.structural.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn structural_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.structural.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn deleted_read(&self) -> RwLockReadGuard<'_, HashSet<u32>> {
        self.delete_set.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn deleted_write(&self) -> RwLockWriteGuard<'_, HashSet<u32>> {
        self.delete_set.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn consolidate_lock(&self) -> MutexGuard<'_, ()> {
        self.consolidate_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn store(&self) -> &VectorStore<T> {
        &self.store
    }

    pub(crate) fn adjacency(&self) -> &AdjacencyLists {
        &self.adj
    }

    pub(crate) fn mark_entry_ready(&self) {
        self.entry_ready.store(true, Ordering::Release);
    }

    fn dist_slots(&self, a: u32, b: u32) -> f32 {
        self.metric.score(self.store.vector(a), self.store.vector(b))
    }

    /// Greedy traversal from the frozen entry points for an already-stored
    /// slot's vector. Returns the raw outcome, deleted and frozen included.
    fn traverse_for_slot(&self, slot: u32, l: usize) -> SearchOutcome {
        let query = self.store.vector(slot);
        greedy_search(
            &self.start_slots,
            l,
            |s| self.metric.score(query, self.store.vector(s)),
            |s| self.adj.read(s),
        )
    }

    /// Appends `new_slot` to the list of `q`, pruning back down to the
    /// degree bound when the list overshoots the candidate cap. Runs under
    /// `q`'s edge lock so a concurrent append cannot be lost.
    fn add_back_edge(&self, q: u32, new_slot: u32) {
        self.adj.update(q, |list| {
            if new_slot != q && !list.contains(&new_slot) {
                list.push(new_slot);
            }
            if list.len() > self.params.candidate_cap {
                let pool: Vec<Scored> = list
                    .iter()
                    .map(|&n| Scored::new(self.dist_slots(q, n), n))
                    .collect();
                *list = robust_prune(q, pool, self.params.max_degree, self.params.alpha, |a, b| {
                    self.dist_slots(a, b)
                });
            }
        });
    }

    /// Wires one stored slot into the graph: traverse, prune the visited
    /// pool into its out-list, then push back-edges.
    fn link_slot(&self, slot: u32) {
        let outcome = self.traverse_for_slot(slot, self.params.beam_width);
        let chosen = robust_prune(
            slot,
            outcome.visited,
            self.params.max_degree,
            self.params.alpha,
            |a, b| self.dist_slots(a, b),
        );
        self.adj.write(slot, chosen.clone());
        for &q in chosen.iter() {
            self.add_back_edge(q, slot);
        }
    }

    /// Batch-builds the index over `num_points` rows laid out at the
    /// aligned stride in `data`, binding `tags[i]` to row `i`.
    ///
    /// The frozen entry points are set to the batch medoid, every row is
    /// wired in parallel, and one global pass prunes every list back under
    /// the degree bound (per-insert back-edge pruning is bypassed).
    pub fn build(&self, data: &[T], num_points: usize, tags: &[u32]) -> Result<()> {
        let aligned = self.store.aligned_dim();
        if num_points == 0 {
            return Err(IndexError::InvalidConfig("cannot build from zero points".into()));
        }
        if tags.len() != num_points {
            return Err(IndexError::InvalidConfig(format!(
                "{} tags for {num_points} build points",
                tags.len()
            )));
        }
        if data.len() < num_points * aligned {
            return Err(IndexError::InvalidConfig(
                "build buffer shorter than num_points rows".into(),
            ));
        }
        if num_points > self.max_points {
            return Err(IndexError::Capacity {
                capacity: self.max_points,
            });
        }

        {
            let mut map = self.tags_guard();
            if map.allocated_range() > 0 || self.entry_ready.load(Ordering::Acquire) {
                return Err(IndexError::InvalidConfig("index is already built".into()));
            }
            for (i, &tag) in tags.iter().enumerate() {
                let slot = map.allocate()?;
                debug_assert_eq!(slot as usize, i);
                map.bind(tag, slot)?;
            }
        }
        for point in 0..num_points {
            let row = &data[point * aligned..point * aligned + self.store.dim()];
            // SAFETY: slots are fresh and nothing searches until the entry
            // point is published below.
            unsafe { self.store.write_slot(point as u32, row) };
        }

        let medoid = self.batch_medoid(num_points);
        let medoid_row = self.store.vector(medoid)[..self.store.dim()].to_vec();
        for &frozen in &self.start_slots {
            // SAFETY: frozen slots are not yet reachable.
            unsafe { self.store.write_slot(frozen, &medoid_row) };
        }
        self.mark_entry_ready();

        (0..num_points as u32)
            .into_par_iter()
            .for_each(|slot| self.link_slot(slot));

        // Global prune: one pass instead of per-insert back-edge work.
        let frozen = self.start_slots.clone();
        (0..num_points as u32)
            .into_par_iter()
            .chain(frozen.into_par_iter())
            .for_each(|slot| {
                self.adj.update(slot, |list| {
                    if list.len() > self.params.max_degree {
                        let pool: Vec<Scored> = list
                            .iter()
                            .map(|&n| Scored::new(self.dist_slots(slot, n), n))
                            .collect();
                        *list = robust_prune(
                            slot,
                            pool,
                            self.params.max_degree,
                            self.params.alpha,
                            |a, b| self.dist_slots(a, b),
                        );
                    }
                });
            });

        Ok(())
    }

    /// The batch point closest to the batch centroid.
    fn batch_medoid(&self, num_points: usize) -> u32 {
        let aligned = self.store.aligned_dim();
        let mut centroid = vec![0.0f32; aligned];
        for point in 0..num_points {
            for (acc, &x) in centroid.iter_mut().zip(self.store.vector(point as u32)) {
                *acc += x.to_f32();
            }
        }
        for acc in centroid.iter_mut() {
            *acc /= num_points as f32;
        }

        let mut best = Scored::new(f32::INFINITY, 0);
        for point in 0..num_points as u32 {
            let dist: f32 = self
                .store
                .vector(point)
                .iter()
                .zip(centroid.iter())
                .map(|(&x, &c)| {
                    let d = x.to_f32() - c;
                    d * d
                })
                .sum();
            let scored = Scored::new(dist, point);
            if scored < best {
                best = scored;
            }
        }
        best.slot
    }

    /// Initializes the frozen entry points with a random direction scaled
    /// to `norm`. Only valid on an index that holds no points yet.
    pub fn set_start_point_at_random(&self, norm: f32) -> Result<()> {
        if !(norm > 0.0) {
            return Err(IndexError::InvalidConfig(format!(
                "start point norm {norm} must be positive"
            )));
        }
        if self.tags_guard().allocated_range() > 0 {
            return Err(IndexError::InvalidConfig(
                "cannot move the entry point of a non-empty index".into(),
            ));
        }

        let mut rng = rand::rng();
        let mut direction: Vec<f32> = (0..self.store.dim())
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();
        let len = direction.iter().map(|x| x * x).sum::<f32>().sqrt();
        if len == 0.0 {
            direction[0] = 1.0;
        }
        let scale = norm / len.max(f32::MIN_POSITIVE);
        let row: Vec<T> = direction.iter().map(|&x| T::from_f32(x * scale)).collect();
        for &frozen in &self.start_slots {
            // SAFETY: the index is empty, so no search is traversing yet.
            unsafe { self.store.write_slot(frozen, &row) };
        }
        self.mark_entry_ready();
        Ok(())
    }

    /// Inserts one point under `tag`.
    ///
    /// The new slot is wired with at most `max_degree` out-edges; back-edge
    /// targets may overshoot the degree bound up to the candidate cap
    /// before their own prune runs. The tag binding is published last, so a
    /// point is observable to subsequent searches only once fully wired.
    pub fn insert_point(&self, vector: &[T], tag: u32) -> Result<()> {
        if vector.len() != self.store.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.store.dim(),
                actual: vector.len(),
            });
        }
        if tag == NULL_TAG {
            return Err(IndexError::InvalidConfig("tag 0 is reserved".into()));
        }
        if !self.entry_ready.load(Ordering::Acquire) {
            return Err(IndexError::InvalidConfig(
                "index has no entry point; build it or set a start point".into(),
            ));
        }

        // Slot allocation: excluded while a consolidation pass is running,
        // exclusive against readers so a recycled slot is never handed out
        // while an old traversal could still hold a stale edge to it.
        let slot = {
            let _guard = self.consolidate_lock();
            let mut map = self.tags_guard();
            if map.resolve(tag).is_some() {
                return Err(IndexError::DuplicateTag(tag));
            }
            let _excl = self.structural_write();
            map.allocate()?
        };

        {
            let _shared = self.structural_read();
            // SAFETY: `slot` was just allocated and is unpublished; nothing
            // can read it until the graph links below exist.
            unsafe { self.store.write_slot(slot, vector) };

            let outcome = self.traverse_for_slot(slot, self.params.beam_width);
            // Deleted slots are traversable but must not become neighbors:
            // an edge wired to one after a consolidation sweep has passed
            // this slot would dangle once the sweep frees it. The frozen
            // entry points are never deleted, so the pool stays non-empty.
            let pool: Vec<Scored> = {
                let deleted = self.deleted_read();
                if deleted.is_empty() {
                    outcome.visited
                } else {
                    outcome
                        .visited
                        .into_iter()
                        .filter(|s| !deleted.contains(&s.slot))
                        .collect()
                }
            };
            let chosen = robust_prune(
                slot,
                pool,
                self.params.max_degree,
                self.params.alpha,
                |a, b| self.dist_slots(a, b),
            );
            self.adj.write(slot, chosen.clone());
            for &q in chosen.iter() {
                self.add_back_edge(q, slot);
            }
        }

        // Publish last.
        self.tags_guard().bind(tag, slot)
    }

    /// Marks the point under `tag` deleted: the binding disappears, the
    /// slot keeps its vector and edges until the next consolidation.
    pub fn lazy_delete(&self, tag: u32) -> Result<()> {
        let slot = self.tags_guard().unbind(tag)?;
        self.deleted_write().insert(slot);
        Ok(())
    }

    /// Searches for the `k` nearest live points with beam width `l`,
    /// returning `(tag, distance)` pairs ascending by distance.
    pub fn search(&self, query: &[T], k: usize, l: usize) -> Result<Vec<(u32, f32)>> {
        if query.len() != self.store.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: self.store.dim(),
                actual: query.len(),
            });
        }
        if !self.entry_ready.load(Ordering::Acquire) {
            return Err(IndexError::InvalidConfig(
                "index has no entry point; build it or set a start point".into(),
            ));
        }
        let l = l.max(k);
        let padded = self.store.pad_query(query);

        let results: Vec<Scored> = {
            let _shared = self.structural_read();
            let outcome = greedy_search(
                &self.start_slots,
                l,
                |s| self.metric.score(&padded, self.store.vector(s)),
                |s| self.adj.read(s),
            );
            let deleted = self.deleted_read();
            outcome
                .beam
                .into_iter()
                .filter(|s| (s.slot as usize) < self.max_points)
                .filter(|s| !deleted.contains(&s.slot))
                .take(k)
                .collect()
        };

        let map = self.tags_guard();
        Ok(results
            .into_iter()
            .filter_map(|s| map.tag_of(s.slot).map(|tag| (tag, s.dist)))
            .collect())
    }

    /// Occupancy and degree statistics.
    pub fn stats(&self) -> IndexStats {
        let (active_candidates, empty, range) = {
            let map = self.tags_guard();
            (map.occupied(), map.empty_slots(), map.allocated_range())
        };
        let delete_set_size = self.deleted_read().len();
        let mut max_degree = 0;
        for slot in (0..range).chain(self.start_slots.iter().copied()) {
            max_degree = max_degree.max(self.adj.degree(slot));
        }
        IndexStats {
            active_points: active_candidates - delete_set_size,
            max_points: self.max_points,
            empty_slots: empty,
            delete_set_size,
            max_observed_degree: max_degree,
        }
    }

    /// Walks the whole graph and tag map checking structural invariants:
    /// degree bounds, no self-loops or duplicate edges, no edges into free
    /// slots, and tag-map bijectivity. Intended for tests and debugging;
    /// call it only on a quiescent index.
    pub fn validate(&self) -> std::result::Result<IndexStats, String> {
        let map = self.tags_guard();
        map.check_consistency()?;
        let deleted = self.deleted_read();
        for &slot in deleted.iter() {
            if map.is_free(slot) {
                return Err(format!("deleted slot {slot} is on the free list"));
            }
            if map.tag_of(slot).is_some() {
                return Err(format!("deleted slot {slot} still carries a tag"));
            }
        }

        let range = map.allocated_range();
        let capacity = self.max_points + self.params.num_frozen;
        for slot in (0..range).chain(self.start_slots.iter().copied()) {
            if map.is_free(slot) && (slot as usize) < self.max_points {
                if self.adj.degree(slot) != 0 {
                    return Err(format!("free slot {slot} has outbound edges"));
                }
                continue;
            }
            let list = self.adj.read(slot);
            if list.len() > self.params.candidate_cap {
                return Err(format!(
                    "slot {slot} has degree {} over the candidate cap",
                    list.len()
                ));
            }
            let mut seen = HashSet::new();
            for &n in list.iter() {
                if n == slot {
                    return Err(format!("slot {slot} has a self-loop"));
                }
                if !seen.insert(n) {
                    return Err(format!("slot {slot} lists neighbor {n} twice"));
                }
                if n as usize >= capacity {
                    return Err(format!("slot {slot} points at out-of-range slot {n}"));
                }
                if (n as usize) < self.max_points && map.is_free(n) {
                    return Err(format!("slot {slot} points at free slot {n}"));
                }
            }
        }
        drop(deleted);
        drop(map);
        Ok(self.stats())
    }
}
