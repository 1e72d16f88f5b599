//! The kernel abstraction: P2M/M2M/M2L/L2L/L2P/P2P as opaque multilinear
//! operators, plus one concrete reference kernel for tests.
//!
//! Grounded on the teacher's `SourceTranslation`/`TargetTranslation` traits
//! (`fmm/src/field_translation.rs`), which separate "what operator runs at
//! this cell" from "how the numerics work" — the teacher's own
//! implementations of these traits for the matrix-based FMM in
//! `new_types.rs` are themselves effectively opaque plug points (some, like
//! the `SourceTranslation for NewKiFmm<...>` stub, are literally no-ops).
//! The multipole/local coefficient layout (`MTERM`/`LTERM`-length `Vec<T>`)
//! matches `Cell::M`/`Cell::L` in `include/types.h`.

use crate::geometry::Vec3;
use num_traits::Float;

/// An opaque FMM kernel: given geometry, accumulate multipole/local
/// coefficients or evaluate direct particle interactions. Implementors
/// decide the physical content (gravitational, Coulomb, ...); this crate
/// does not prescribe it, matching the spec's treatment of P2M..P2P as
/// out-of-scope numerical internals.
pub trait Kernel<T: Float>: Send + Sync {
    /// Number of coefficients a multipole/local expansion holds.
    fn ncoeffs(&self) -> usize;

    /// Particle-to-multipole: accumulate `sources` (position, charge pairs)
    /// about `centre` into `multipole`.
    fn p2m(&self, centre: Vec3<T>, sources: &[(Vec3<T>, T)], multipole: &mut [T]);

    /// Multipole-to-multipole: shift and accumulate a child multipole about
    /// `child_centre` into the parent multipole about `parent_centre`.
    fn m2m(&self, parent_centre: Vec3<T>, child_centre: Vec3<T>, child_multipole: &[T], parent_multipole: &mut [T]);

    /// Multipole-to-local: translate a well-separated source multipole into
    /// a contribution to the target's local expansion.
    fn m2l(&self, target_centre: Vec3<T>, source_centre: Vec3<T>, source_multipole: &[T], target_local: &mut [T]);

    /// Local-to-local: shift a parent's local expansion down to a child centre.
    fn l2l(&self, child_centre: Vec3<T>, parent_centre: Vec3<T>, parent_local: &[T], child_local: &mut [T]);

    /// Local-to-particle: evaluate a local expansion at each target position,
    /// accumulating `[potential, ax, ay, az]` into `targets`.
    fn l2p(&self, centre: Vec3<T>, local: &[T], targets: &[Vec3<T>], out: &mut [[T; 4]]);

    /// Particle-to-particle: direct evaluation between two bodies, returning
    /// the contribution of `source` (at `source_pos`, charge `source_q`) to
    /// `target`'s `[potential, ax, ay, az]` accumulator.
    fn p2p(&self, target_pos: Vec3<T>, source_pos: Vec3<T>, source_q: T) -> [T; 4];
}

/// A plain 1/r (Coulomb/gravitational) kernel with a degree-0 multipole:
/// the "multipole" of a cell is just the sum of its source charges and
/// its centre, so M2L/M2M/L2L operate on a single coefficient. Sufficient
/// to validate tree shape, traversal admissibility and LET sufficiency
/// against direct summation; not a substitute for the teacher's
/// SVD/FFT-based high-order field translation, which is out of scope.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectKernel;

fn softened_inv_r<T: Float>(dx: Vec3<T>) -> (T, T) {
    let eps = T::from(1e-12).unwrap();
    let r2 = dx.norm_sq() + eps;
    let inv_r = r2.sqrt().recip();
    (inv_r, r2)
}

impl<T: Float> Kernel<T> for DirectKernel {
    fn ncoeffs(&self) -> usize {
        1
    }

    fn p2m(&self, _centre: Vec3<T>, sources: &[(Vec3<T>, T)], multipole: &mut [T]) {
        multipole[0] = multipole[0] + sources.iter().fold(T::zero(), |acc, &(_, q)| acc + q);
    }

    fn m2m(&self, _parent_centre: Vec3<T>, _child_centre: Vec3<T>, child_multipole: &[T], parent_multipole: &mut [T]) {
        parent_multipole[0] = parent_multipole[0] + child_multipole[0];
    }

    fn m2l(&self, target_centre: Vec3<T>, source_centre: Vec3<T>, source_multipole: &[T], target_local: &mut [T]) {
        let dx = target_centre - source_centre;
        let (inv_r, _) = softened_inv_r(dx);
        target_local[0] = target_local[0] + source_multipole[0] * inv_r;
    }

    fn l2l(&self, _child_centre: Vec3<T>, _parent_centre: Vec3<T>, parent_local: &[T], child_local: &mut [T]) {
        child_local[0] = child_local[0] + parent_local[0];
    }

    fn l2p(&self, _centre: Vec3<T>, local: &[T], targets: &[Vec3<T>], out: &mut [[T; 4]]) {
        for (_pos, slot) in targets.iter().zip(out.iter_mut()) {
            slot[0] = slot[0] + local[0];
        }
    }

    fn p2p(&self, target_pos: Vec3<T>, source_pos: Vec3<T>, source_q: T) -> [T; 4] {
        let dx = target_pos - source_pos;
        let (inv_r, r2) = softened_inv_r(dx);
        let inv_r3 = inv_r / r2;
        let phi = source_q * inv_r;
        let a = dx * (source_q * inv_r3);
        [phi, -a[0], -a[1], -a[2]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_kernel_p2p_matches_coulomb_law() {
        let k = DirectKernel;
        let out = k.p2p(Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), 2.0);
        assert!((out[0] - 2.0).abs() < 1e-9);
    }
}
