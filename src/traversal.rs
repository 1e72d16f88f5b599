//! Dual tree traversal (DTT): the admissibility-gated recursion over pairs
//! of cells that drives the far-field (M2L) and near-field (P2P) work.
//!
//! Grounded directly on `include/traversal.h`'s `Traversal` class:
//! `traverse(Ci,Cj,mutual)` (single-pair admissibility test), `traverse`
//! over ranges (the 2x2 diagonal/antidiagonal `task_group` schedule),
//! `splitCell` (which side to recurse into), `traversePeriodic` (periodic
//! far field), and `direct` (verification-only direct summation).

use crate::body::Bodies;
use crate::cell::Cells;
use crate::config::Config;
use crate::geometry::Vec3;
use crate::kernel::Kernel;
use num_traits::Float;

/// One half of a dual-tree pair: an index range of cells, either local or
/// drawn from a peer's LET.
#[derive(Clone, Copy, Debug)]
pub struct CellRange {
    pub lo: usize,
    pub hi: usize,
}

impl CellRange {
    pub fn single(i: usize) -> Self {
        Self { lo: i, hi: i + 1 }
    }
    pub fn len(&self) -> usize {
        self.hi - self.lo
    }
}

pub struct Traversal<'a, T: Float> {
    pub target_cells: &'a Cells<T>,
    pub source_cells: &'a Cells<T>,
    pub target_bodies: &'a Bodies<T>,
    pub source_bodies: &'a Bodies<T>,
    pub kernel: &'a (dyn Kernel<T> + Sync),
    pub cfg: &'a Config,
    pub target_local: Vec<std::sync::Mutex<Vec<T>>>,
    pub target_trg: Vec<std::sync::Mutex<[T; 4]>>,
    pub num_p2p: std::sync::atomic::AtomicUsize,
    pub num_m2l: std::sync::atomic::AtomicUsize,
    /// Whether `target_cells`/`source_cells` are the same backing array, so
    /// that a target index and a source index denote the same cell when
    /// equal. `include/traversal.h`'s `Ci == Cj` is pointer identity within
    /// one shared array; a peer's LET is reconstructed into its own
    /// independently-0-based `Cells<T>` (`let_exchange::get_let`), so index
    /// equality alone would be a coincidence there, not cell identity.
    same_index_space: bool,
}

impl<'a, T: Float + Send + Sync> Traversal<'a, T> {
    pub fn new(
        target_cells: &'a Cells<T>,
        source_cells: &'a Cells<T>,
        target_bodies: &'a Bodies<T>,
        source_bodies: &'a Bodies<T>,
        kernel: &'a (dyn Kernel<T> + Sync),
        cfg: &'a Config,
    ) -> Self {
        let target_local = target_cells
            .iter()
            .map(|c| std::sync::Mutex::new(vec![T::zero(); c.l.len()]))
            .collect();
        let target_trg = target_bodies.iter().map(|_| std::sync::Mutex::new([T::zero(); 4])).collect();
        let same_index_space = std::ptr::eq(target_cells, source_cells);
        Self {
            target_cells,
            source_cells,
            target_bodies,
            source_bodies,
            kernel,
            cfg,
            target_local,
            target_trg,
            num_p2p: std::sync::atomic::AtomicUsize::new(0),
            num_m2l: std::sync::atomic::AtomicUsize::new(0),
            same_index_space,
        }
    }

    /// Drain the accumulated local-expansion contributions back into owned
    /// per-cell buffers, in target-cell order.
    pub fn into_locals(self) -> (Vec<Vec<T>>, Vec<[T; 4]>) {
        let locals = self.target_local.into_iter().map(|m| m.into_inner().unwrap()).collect();
        let trg = self.target_trg.into_iter().map(|m| m.into_inner().unwrap()).collect();
        (locals, trg)
    }

    fn accumulate_local(&self, i: usize, contribution: &[T]) {
        let mut slot = self.target_local[i].lock().unwrap();
        for (s, c) in slot.iter_mut().zip(contribution) {
            *s = *s + *c;
        }
    }

    fn separated(&self, i: usize, j: usize, xperiodic: Vec3<T>) -> bool {
        let ci = &self.target_cells[i];
        let cj = &self.source_cells[j];
        let dx = ci.x - cj.x - xperiodic;
        let r2 = dx.norm_sq();
        let rsum = ci.rcrit + cj.rcrit;
        r2 > rsum * rsum
    }

    /// `mutual` folds the reciprocal contribution (target acting as source
    /// on the source cell) into the same call, matching `M2L(Ci,Cj,mutual)`:
    /// only sound when target and source share an index space, i.e. during
    /// a local-local self traversal, never during frontier traversal.
    fn m2l(&self, i: usize, j: usize, xperiodic: Vec3<T>, mutual: bool) {
        self.num_m2l.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let ci = &self.target_cells[i];
        let cj = &self.source_cells[j];
        let mut local = vec![T::zero(); ci.l.len()];
        self.kernel.m2l(ci.x, cj.x - xperiodic, &cj.m, &mut local);
        self.accumulate_local(i, &local);
        if mutual {
            let mut reverse = vec![T::zero(); cj.l.len()];
            self.kernel.m2l(cj.x, ci.x + xperiodic, &ci.m, &mut reverse);
            self.accumulate_local(j, &reverse);
        }
    }

    fn p2p(&self, i: usize, j: usize, xperiodic: Vec3<T>, mutual: bool) {
        self.num_p2p.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let ci = &self.target_cells[i];
        let cj = &self.source_cells[j];
        for t in ci.body_range() {
            let target_pos = self.target_bodies[t].x;
            for s in cj.body_range() {
                let source = &self.source_bodies[s];
                let contribution = self.kernel.p2p(target_pos, source.x - xperiodic, source.src);
                self.accumulate_trg(t, &contribution);
                if mutual {
                    let target = &self.target_bodies[t];
                    let reverse = self.kernel.p2p(source.x, target_pos + xperiodic, target.src);
                    self.accumulate_trg(s, &reverse);
                }
            }
        }
    }

    /// The `R2 == 0 && Ci == Cj` case of `traverse`: every unordered pair
    /// within the cell's own bodies is evaluated once and applied to both
    /// sides, skipping the (zero-distance, singular) self-pair.
    fn p2p_self(&self, i: usize) {
        self.num_p2p.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let range = self.target_cells[i].body_range();
        for t in range.clone() {
            let target_pos = self.target_bodies[t].x;
            for k in range.clone() {
                if k <= t {
                    continue;
                }
                let other = &self.target_bodies[k];
                let forward = self.kernel.p2p(target_pos, other.x, other.src);
                self.accumulate_trg(t, &forward);
                let target = &self.target_bodies[t];
                let backward = self.kernel.p2p(other.x, target_pos, target.src);
                self.accumulate_trg(k, &backward);
            }
        }
    }

    fn accumulate_trg(&self, idx: usize, contribution: &[T; 4]) {
        let mut slot = self.target_trg[idx].lock().unwrap();
        for k in 0..4 {
            slot[k] = slot[k] + contribution[k];
        }
    }

    /// Single-pair admissibility test, matching `traverse(Ci,Cj,mutual)`.
    pub fn traverse_pair(&self, i: usize, j: usize, xperiodic: Vec3<T>, mutual: bool) {
        let ci = &self.target_cells[i];
        let cj = &self.source_cells[j];
        if self.separated(i, j, xperiodic) {
            self.m2l(i, j, xperiodic, mutual);
            return;
        }
        if ci.is_leaf() && cj.is_leaf() {
            if cj.nbody == 0 {
                // shipped without bodies: fall back to M2L using the
                // multipole that was sent instead, per §4.5.
                self.m2l(i, j, xperiodic, mutual);
            } else if self.same_index_space && i == j && xperiodic.norm_sq() == T::zero() {
                // R2 == 0 && Ci == Cj: a cell interacting with itself always
                // excludes the singular self-pair, independent of `mutual`.
                // `i == j` only denotes the same cell when target and source
                // share one index space; a peer's LET frontier is its own
                // independently-indexed array, where index equality is
                // coincidence, not identity.
                self.p2p_self(i);
            } else {
                self.p2p(i, j, xperiodic, mutual);
            }
            return;
        }
        self.split_cell(i, j, xperiodic, mutual);
    }

    /// Decide which side to recurse into, matching `splitCell`: split the
    /// non-leaf side when one side is a leaf; otherwise spawn the 2x2
    /// cross-product when both sides have enough bodies to be worth
    /// parallelizing (or when splitting a mutual self-pair, which must
    /// always expand into its own child cross-product rather than picking
    /// a single larger side), else split whichever side has the larger `rcrit`.
    fn split_cell(&self, i: usize, j: usize, xperiodic: Vec3<T>, mutual: bool) {
        let ci = &self.target_cells[i];
        let cj = &self.source_cells[j];
        let ci_children = || CellRange { lo: ci.ichild, hi: ci.ichild + ci.nchild as usize };
        let cj_children = || CellRange { lo: cj.ichild, hi: cj.ichild + cj.nchild as usize };

        if cj.is_leaf() {
            // Ci cannot also be a leaf here (traverse_pair already handled
            // that case), so Ci always has children to split into.
            self.traverse_ranges(ci_children(), CellRange::single(j), xperiodic, mutual);
        } else if ci.is_leaf() {
            self.traverse_ranges(CellRange::single(i), cj_children(), xperiodic, mutual);
        } else if ci.nbody + cj.nbody >= self.cfg.nspawn || (mutual && self.same_index_space && i == j) {
            self.traverse_ranges(ci_children(), cj_children(), xperiodic, mutual);
        } else if ci.rcrit >= cj.rcrit {
            self.traverse_ranges(ci_children(), CellRange::single(j), xperiodic, mutual);
        } else {
            self.traverse_ranges(CellRange::single(i), cj_children(), xperiodic, mutual);
        }
    }

    /// Range recursion with the 2x2 diagonal/antidiagonal task schedule of
    /// §4.5: when both ranges have more than one cell, split each range in
    /// half and run (lo,lo)+(hi,hi) concurrently, barrier, then
    /// (lo,hi)+(hi,lo) concurrently (skipping hi,lo when `mutual` and the
    /// ranges are identical, since symmetry already covers it), barrier.
    pub fn traverse_ranges(&self, ci: CellRange, cj: CellRange, xperiodic: Vec3<T>, mutual: bool) {
        if ci.len() == 1 && cj.len() == 1 {
            self.traverse_pair(ci.lo, cj.lo, xperiodic, mutual);
            return;
        }
        if ci.len() == 1 {
            for j in cj.lo..cj.hi {
                self.traverse_pair(ci.lo, j, xperiodic, mutual);
            }
            return;
        }
        if cj.len() == 1 {
            for i in ci.lo..ci.hi {
                self.traverse_pair(i, cj.lo, xperiodic, mutual);
            }
            return;
        }
        let ci_mid = ci.lo + ci.len() / 2;
        let cj_mid = cj.lo + cj.len() / 2;
        let (ci_lo, ci_hi) = (CellRange { lo: ci.lo, hi: ci_mid }, CellRange { lo: ci_mid, hi: ci.hi });
        let (cj_lo, cj_hi) = (CellRange { lo: cj.lo, hi: cj_mid }, CellRange { lo: cj_mid, hi: cj.hi });

        // Diagonal pair: (lo,lo) and (hi,hi).
        rayon::join(
            || self.traverse_ranges(ci_lo, cj_lo, xperiodic, mutual),
            || self.traverse_ranges(ci_hi, cj_hi, xperiodic, mutual),
        );
        // Antidiagonal pair: (lo,hi) and (hi,lo); hi,lo skipped when mutual
        // self-interaction already covers it via symmetry.
        if mutual && self.same_index_space && ci.lo == cj.lo {
            self.traverse_ranges(ci_lo, cj_hi, xperiodic, mutual);
        } else {
            rayon::join(
                || self.traverse_ranges(ci_lo, cj_hi, xperiodic, mutual),
                || self.traverse_ranges(ci_hi, cj_lo, xperiodic, mutual),
            );
        }
    }

    /// Top-level entry for a local-local traversal: root-vs-root, optionally mutual.
    pub fn dual_tree_traversal(&self, mutual: bool) {
        if self.target_cells.is_empty() || self.source_cells.is_empty() {
            return;
        }
        self.traverse_ranges(CellRange::single(0), CellRange::single(0), Vec3::zero(), mutual);
    }

    /// Top-level entry for traversal against a peer's LET: the source side
    /// is a flat frontier of admitted cells with no hierarchy among them
    /// (every admitted cell has `nchild == 0` on the wire, per §4.6), so it
    /// is handed to the range recursion as one contiguous range rather than
    /// a single root. The local target root is still refined into its own
    /// children as usual whenever a frontier cell cannot be split further.
    pub fn traverse_frontier(&self) {
        if self.target_cells.is_empty() || self.source_cells.is_empty() {
            return;
        }
        self.traverse_ranges(CellRange::single(0), CellRange { lo: 0, hi: self.source_cells.len() }, Vec3::zero(), false);
    }
}

/// Wrap a local-local traversal in the 27 unit-cell shifts of the nearest
/// periodic shell, per §4.5's "if images > 0, wrap ... in the 3^3 unit-cell
/// shifts". `cycle` is the periodic box length.
pub fn periodic_shifts<T: Float>(cycle: T) -> Vec<Vec3<T>> {
    let mut shifts = Vec::with_capacity(27);
    for iz in -1..=1 {
        for iy in -1..=1 {
            for ix in -1..=1 {
                shifts.push(Vec3::new(
                    T::from(ix).unwrap() * cycle,
                    T::from(iy).unwrap() * cycle,
                    T::from(iz).unwrap() * cycle,
                ));
            }
        }
    }
    shifts
}

/// Direct summation over periodic images, used only to verify traversal
/// results in tests — matches `include/traversal.h::direct`. `images == 0`
/// degenerates to the plain free-field O(N^2) sum.
pub fn direct_sum<T: Float + Send + Sync>(
    target_pos: Vec3<T>,
    sources: &[(Vec3<T>, T)],
    kernel: &dyn Kernel<T>,
    images: usize,
    cycle: T,
) -> [T; 4] {
    let mut acc = [T::zero(); 4];
    let shifts = if images == 0 { vec![Vec3::zero()] } else { periodic_shifts(cycle) };
    for shift in shifts {
        for &(pos, q) in sources {
            let contribution = kernel.p2p(target_pos, pos + shift, q);
            for k in 0..4 {
                acc[k] = acc[k] + contribution[k];
            }
        }
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{Bodies, Body};
    use crate::geometry::{bounds_to_box, Bounds};
    use crate::kernel::DirectKernel;
    use crate::tree::build_tree;

    #[test]
    fn periodic_images_zero_is_free_field() {
        // images=0 means no shell wrap; the free-field path is simply the
        // single dual_tree_traversal call with no offset applied.
        let cfg = Config::default();
        assert_eq!(cfg.images, 0);
    }

    #[test]
    fn traversal_reproduces_total_charge_via_m2l_and_p2p() {
        let mut bodies: Bodies<f64> = (0..40)
            .map(|i| Body::new(Vec3::new((i % 4) as f64 * 3.0, (i / 4) as f64 * 3.0, 0.0), 1.0, i))
            .collect();
        let mut bounds = Bounds::of_points(bodies.iter().map(|b| &b.x)).unwrap();
        let cube = bounds_to_box(&mut bounds);
        let mut cells = build_tree(&mut bodies, &cube, 2, 1);
        let cfg = Config::builder().theta(0.9).build().unwrap();
        crate::expansion::upward_pass(&mut cells, &bodies, &DirectKernel, &cfg);
        let trav = Traversal::new(&cells, &cells, &bodies, &bodies, &DirectKernel, &cfg);
        trav.dual_tree_traversal(false);
        assert!(trav.num_m2l.load(std::sync::atomic::Ordering::Relaxed) + trav.num_p2p.load(std::sync::atomic::Ordering::Relaxed) > 0);
    }

    #[test]
    fn periodic_shifts_has_27_entries_including_centre() {
        let shifts = periodic_shifts(1.0_f64);
        assert_eq!(shifts.len(), 27);
        assert!(shifts.iter().any(|s| s.norm_sq() == 0.0));
    }

    #[test]
    fn mutual_traversal_matches_non_mutual_potentials() {
        // Mutual folds the reciprocal contribution into the forward call
        // instead of visiting the swapped pair separately; both modes should
        // still agree on every body's accumulated potential.
        let mut bodies: Bodies<f64> = (0..40)
            .map(|i| Body::new(Vec3::new((i % 4) as f64 * 3.0, (i / 4) as f64 * 3.0, 0.0), 1.0, i))
            .collect();
        let mut bounds = Bounds::of_points(bodies.iter().map(|b| &b.x)).unwrap();
        let cube = bounds_to_box(&mut bounds);
        let mut cells = build_tree(&mut bodies, &cube, 2, 1);
        let cfg = Config::builder().theta(0.9).build().unwrap();
        crate::expansion::upward_pass(&mut cells, &bodies, &DirectKernel, &cfg);

        let forward = Traversal::new(&cells, &cells, &bodies, &bodies, &DirectKernel, &cfg);
        forward.dual_tree_traversal(false);
        let (_, forward_trg) = forward.into_locals();

        let mutual = Traversal::new(&cells, &cells, &bodies, &bodies, &DirectKernel, &cfg);
        mutual.dual_tree_traversal(true);
        let (_, mutual_trg) = mutual.into_locals();

        for (a, b) in forward_trg.iter().zip(mutual_trg.iter()) {
            assert!((a[0] - b[0]).abs() < 1e-6, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn frontier_traversal_against_coincident_index_is_not_self_interaction() {
        // A remote cell at index 0 of its own LET array must not be treated
        // as "the same cell" as local cell 0 just because the indices match:
        // same_index_space is false whenever target_cells and source_cells
        // come from distinct arrays, even when they happen to share index 0.
        let mut local_bodies: Bodies<f64> = (0..8)
            .map(|i| Body::new(Vec3::new(i as f64, 0.0, 0.0), 1.0, i))
            .collect();
        let mut local_bounds = Bounds::of_points(local_bodies.iter().map(|b| &b.x)).unwrap();
        let local_cube = bounds_to_box(&mut local_bounds);
        let cfg = Config::builder().theta(1.0).build().unwrap();
        let mut local_cells = build_tree(&mut local_bodies, &local_cube, 0, 1);
        crate::expansion::upward_pass(&mut local_cells, &local_bodies, &DirectKernel, &cfg);

        // Deliberately overlaps the local domain so the two root cells are
        // *not* well separated and the pair falls into the leaf/leaf branch
        // rather than M2L — the branch where the old `i == j` check could
        // misfire.
        let mut remote_bodies: Bodies<f64> = (0..8)
            .map(|i| Body::new(Vec3::new(i as f64, 0.0, 0.0), 1.0, i))
            .collect();
        let mut remote_bounds = Bounds::of_points(remote_bodies.iter().map(|b| &b.x)).unwrap();
        let remote_cube = bounds_to_box(&mut remote_bounds);
        let mut remote_cells = build_tree(&mut remote_bodies, &remote_cube, 0, 1);
        crate::expansion::upward_pass(&mut remote_cells, &remote_bodies, &DirectKernel, &cfg);

        // Both trees collapse to a single root cell, so the remote frontier
        // pairs local index 0 against remote index 0 — a coincident index
        // match across two distinct arrays.
        assert_eq!(local_cells.len(), 1);
        assert_eq!(remote_cells.len(), 1);

        let trav = Traversal::new(&local_cells, &remote_cells, &local_bodies, &remote_bodies, &DirectKernel, &cfg);
        assert!(!trav.same_index_space);
        trav.traverse_frontier();
        let (_, trg) = trav.into_locals();

        // Every local body must see the remote charge (8 coincident remote
        // bodies), not zero, which is what p2p_self would wrongly produce
        // by skipping the cross-rank pair entirely.
        for t in &trg {
            assert!(t[0] > 0.0, "missing cross-rank P2P contribution: {t:?}");
        }
    }
}
