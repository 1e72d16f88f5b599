//! Upward and downward expansion passes.
//!
//! Grounded on `fmm/src/field_translation.rs`'s `p2m`/`m2m`/`l2l`/`m2p`
//! (parallel iteration over a level's cells via `rayon`'s `par_iter`,
//! accumulating into per-cell buffers) and `fmm/src/fmm.rs`'s
//! `FmmLoop::upward_pass`/`downward_pass` sequencing, simplified since the
//! kernel is opaque here rather than a matrix precomputed per level.

use crate::body::Bodies;
use crate::cell::Cells;
use crate::config::Config;
use crate::kernel::Kernel;
use num_traits::Float;
use rayon::prelude::*;

/// Bottom-up sweep: leaves get their multipole from P2M, internal cells
/// accumulate children via M2M, and every cell's `rcrit` is set from its
/// own multipole-free radius, per §4.4.
///
/// Cells must be in parent-before-child order (index 0 is the root); the
/// sweep still runs leaf-to-root, so it walks the array in reverse.
pub fn upward_pass<T: Float + Send + Sync>(
    cells: &mut Cells<T>,
    bodies: &Bodies<T>,
    kernel: &dyn Kernel<T>,
    cfg: &Config,
) {
    // Process cells from the last index (deepest leaves, since the array is
    // parent-before-child / breadth-first) back to the root. Leaves first.
    for idx in (0..cells.len()).rev() {
        if cells[idx].is_leaf() {
            let range = cells[idx].body_range();
            let sources: Vec<(crate::geometry::Vec3<T>, T)> =
                bodies[range].iter().map(|b| (b.x, b.src)).collect();
            let centre = cells[idx].x;
            kernel.p2m(centre, &sources, &mut cells[idx].m);
        } else {
            let (ichild, nchild, parent_centre) = (cells[idx].ichild, cells[idx].nchild as usize, cells[idx].x);
            for c in ichild..ichild + nchild {
                let (child_centre, child_m) = (cells[c].x, cells[c].m.clone());
                kernel.m2m(parent_centre, child_centre, &child_m, &mut cells[idx].m);
            }
        }
        cells[idx].rcrit = compute_rcrit(cells[idx].r, cells[idx].rmax, cfg);
    }
}

fn compute_rcrit<T: Float>(r: T, rmax: T, cfg: &Config) -> T {
    let theta = T::from(cfg.theta).unwrap();
    let mut rcrit = r / theta;
    if cfg.use_rmax {
        rcrit = rcrit.max(rmax);
    }
    if cfg.use_ropt {
        // weighted minimum of R/theta and RMAX, matching the original's
        // `useRopt` refinement: never let the critical radius shrink below
        // the cell's own half-side.
        rcrit = rcrit.min(rmax).max(r);
    }
    rcrit
}

/// Top-down sweep: every non-root cell's local expansion is shifted down
/// from its parent via L2L; leaves evaluate their local expansion at each
/// body via L2P, accumulating into `trg`.
pub fn downward_pass<T: Float + Send + Sync>(cells: &mut Cells<T>, bodies: &mut Bodies<T>, kernel: &dyn Kernel<T>) {
    for idx in 0..cells.len() {
        if idx != 0 {
            let parent = cells[idx].parent;
            let (parent_centre, parent_local) = (cells[parent].x, cells[parent].l.clone());
            let child_centre = cells[idx].x;
            kernel.l2l(child_centre, parent_centre, &parent_local, &mut cells[idx].l);
        }
        if cells[idx].is_leaf() {
            let range = cells[idx].body_range();
            let centre = cells[idx].x;
            let local = cells[idx].l.clone();
            let positions: Vec<_> = bodies[range.clone()].iter().map(|b| b.x).collect();
            let mut out: Vec<[T; 4]> = bodies[range.clone()].iter().map(|b| b.trg).collect();
            kernel.l2p(centre, &local, &positions, &mut out);
            for (b, trg) in bodies[range].iter_mut().zip(out) {
                b.trg = trg;
            }
        }
    }
}

/// Parallel variant of the leaf P2M step alone, for cases where the upward
/// pass's leaf fan-out is the dominant cost — mirrors the teacher's
/// `leaves.par_iter().for_each(...)` pattern in `field_translation.rs::p2m`.
pub fn p2m_parallel<T: Float + Send + Sync>(cells: &mut Cells<T>, bodies: &Bodies<T>, kernel: &dyn Kernel<T>) {
    cells.par_iter_mut().filter(|c| c.is_leaf()).for_each(|cell| {
        let sources: Vec<(crate::geometry::Vec3<T>, T)> =
            bodies[cell.body_range()].iter().map(|b| (b.x, b.src)).collect();
        kernel.p2m(cell.x, &sources, &mut cell.m);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::geometry::{bounds_to_box, Bounds, Vec3};
    use crate::kernel::DirectKernel;
    use crate::tree::build_tree;

    #[test]
    fn upward_pass_sums_total_charge_into_root() {
        let mut bodies: Bodies<f64> = (0..20)
            .map(|i| Body::new(Vec3::new((i % 4) as f64, (i / 4) as f64, 0.0), 1.0, i))
            .collect();
        let mut bounds = Bounds::of_points(bodies.iter().map(|b| &b.x)).unwrap();
        let cube = bounds_to_box(&mut bounds);
        let mut cells = build_tree(&mut bodies, &cube, 2, 1);
        let cfg = Config::default();
        upward_pass(&mut cells, &bodies, &DirectKernel, &cfg);
        assert!((cells[0].m[0] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn downward_pass_runs_without_panicking_on_single_cell() {
        let mut bodies: Bodies<f64> = (0..3).map(|i| Body::new(Vec3::new(i as f64, 0.0, 0.0), 1.0, i)).collect();
        let mut bounds = Bounds::of_points(bodies.iter().map(|b| &b.x)).unwrap();
        let cube = bounds_to_box(&mut bounds);
        let mut cells = build_tree(&mut bodies, &cube, 0, 1);
        let cfg = Config::default();
        upward_pass(&mut cells, &bodies, &DirectKernel, &cfg);
        downward_pass(&mut cells, &mut bodies, &DirectKernel);
    }
}
