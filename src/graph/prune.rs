//! Robust pruning (α-RNG rule) for neighbor selection.
//!
//! Given a scored candidate pool for a point `p`, keep the closest
//! candidate `q`, then discard every remaining candidate `r` that `q`
//! covers, i.e. `α · d(q, r) ≤ d(p, r)`. Repeat until the degree bound is
//! reached or the pool is exhausted. With `α = 1` this is the strict
//! relative-neighborhood graph; larger `α` keeps more long-range edges and
//! lowers graph diameter at the cost of density.
//!
//! # References
//!
//! - Subramanya et al. (2019): "DiskANN: Fast Accurate Billion-point
//!   Nearest Neighbor Search on a Single Node"

use super::adjacency::NeighborVec;
use super::search::Scored;

/// Selects at most `max_degree` diverse neighbors for `p` from
/// `candidates`.
///
/// Self-references and duplicate slots in the pool are dropped. The pool is
/// processed in (distance, slot) order, so the output is deterministic for
/// a fixed pool. `dist_between` scores two slots against each other.
pub fn robust_prune<D>(
    p: u32,
    mut candidates: Vec<Scored>,
    max_degree: usize,
    alpha: f32,
    dist_between: D,
) -> NeighborVec
where
    D: Fn(u32, u32) -> f32,
{
    debug_assert!(alpha >= 1.0);

    candidates.retain(|c| c.slot != p);
    candidates.sort_unstable();
    candidates.dedup_by_key(|c| c.slot);

    let mut chosen = NeighborVec::new();
    let mut covered = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if covered[i] {
            continue;
        }
        let q = candidates[i];
        chosen.push(q.slot);
        if chosen.len() == max_degree {
            break;
        }
        for (j, r) in candidates.iter().enumerate().skip(i + 1) {
            if covered[j] {
                continue;
            }
            if alpha * dist_between(q.slot, r.slot) <= r.dist {
                covered[j] = true;
            }
        }
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l2(points: &[(f32, f32)]) -> impl Fn(u32, u32) -> f32 + '_ {
        move |a, b| {
            let (ax, ay) = points[a as usize];
            let (bx, by) = points[b as usize];
            (ax - bx).powi(2) + (ay - by).powi(2)
        }
    }

    fn scored(points: &[(f32, f32)], p: u32, slots: &[u32]) -> Vec<Scored> {
        let dist = l2(points);
        slots.iter().map(|&s| Scored::new(dist(p, s), s)).collect()
    }

    #[test]
    fn closest_candidate_is_always_kept() {
        let points = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)];
        let chosen = robust_prune(0, scored(&points, 0, &[1, 2, 3]), 2, 1.0, l2(&points));
        assert_eq!(chosen[0], 1);
    }

    #[test]
    fn collinear_tail_is_covered_at_alpha_one() {
        // 1 covers 2 and 3: they sit behind it on the same ray.
        let points = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)];
        let chosen = robust_prune(0, scored(&points, 0, &[1, 2, 3]), 3, 1.0, l2(&points));
        assert_eq!(chosen.as_slice(), &[1]);
    }

    #[test]
    fn orthogonal_directions_survive() {
        let points = [(0.0, 0.0), (1.0, 0.0), (1.1, 0.0), (0.0, 1.0)];
        let chosen = robust_prune(0, scored(&points, 0, &[1, 2, 3]), 3, 1.2, l2(&points));
        assert!(chosen.contains(&1));
        assert!(chosen.contains(&3));
        // 2 hides right behind 1.
        assert!(!chosen.contains(&2));
    }

    #[test]
    fn degree_bound_is_respected() {
        let points: Vec<(f32, f32)> = (0..20)
            .map(|i| ((i as f32).cos() * 10.0, (i as f32).sin() * 10.0))
            .collect();
        let slots: Vec<u32> = (1..20).collect();
        let chosen = robust_prune(0, scored(&points, 0, &slots), 4, 1.2, l2(&points));
        assert!(chosen.len() <= 4);
    }

    #[test]
    fn self_and_duplicates_are_dropped() {
        let points = [(0.0, 0.0), (1.0, 0.0)];
        let pool = vec![
            Scored::new(0.0, 0),
            Scored::new(1.0, 1),
            Scored::new(1.0, 1),
        ];
        let chosen = robust_prune(0, pool, 4, 1.0, l2(&points));
        assert_eq!(chosen.as_slice(), &[1]);
    }

    #[test]
    fn empty_pool_yields_empty_selection() {
        let points = [(0.0, 0.0)];
        let chosen = robust_prune(0, Vec::new(), 4, 1.2, l2(&points));
        assert!(chosen.is_empty());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Selected neighbors respect the degree bound, exclude the point
        /// itself, and never repeat, for arbitrary 2-d pools.
        #[test]
        fn prop_selection_is_well_formed(
            coords in proptest::collection::vec((-50.0f32..50.0, -50.0f32..50.0), 2..40),
            max_degree in 1usize..8,
            alpha in 1.0f32..2.0,
        ) {
            let dist = |a: u32, b: u32| {
                let (ax, ay) = coords[a as usize];
                let (bx, by) = coords[b as usize];
                (ax - bx).powi(2) + (ay - by).powi(2)
            };
            let pool: Vec<Scored> = (0..coords.len() as u32)
                .map(|s| Scored::new(dist(0, s), s))
                .collect();

            let chosen = robust_prune(0, pool, max_degree, alpha, dist);

            prop_assert!(chosen.len() <= max_degree);
            prop_assert!(!chosen.contains(&0));
            let mut sorted: Vec<u32> = chosen.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), chosen.len());
        }

        /// The closest candidate is always selected first.
        #[test]
        fn prop_closest_survives(
            coords in proptest::collection::vec((-50.0f32..50.0, -50.0f32..50.0), 3..30),
        ) {
            let dist = |a: u32, b: u32| {
                let (ax, ay) = coords[a as usize];
                let (bx, by) = coords[b as usize];
                (ax - bx).powi(2) + (ay - by).powi(2)
            };
            let pool: Vec<Scored> = (1..coords.len() as u32)
                .map(|s| Scored::new(dist(0, s), s))
                .collect();
            let closest = pool.iter().min().copied();

            let chosen = robust_prune(0, pool, 4, 1.2, dist);

            if let Some(closest) = closest {
                prop_assert_eq!(chosen.first().copied(), Some(closest.slot));
            }
        }
    }
}
