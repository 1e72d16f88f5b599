//! The [`Cell`] record: an octree node addressed only by integer index.
//!
//! Grounded on `include/types.h`'s `struct Cell` (`NCHILD`, `NCBODY`,
//! `NDBODY`, `PARENT`, `CHILD`, `ICELL`, `X`, `R`, `RMAX`, `RCRIT`, `M`,
//! `L`), reworked per the design notes in §9 of the spec: the source's
//! `B_iter` body-iterator field is replaced by a `(first_body, n_body)` pair
//! of plain indices, and `PARENT`/`ICHILD` are indices into a single flat
//! `Vec<Cell>` rather than pointers — both changes required because a
//! grow-only vector invalidates iterators/pointers into itself on reallocation.

use crate::geometry::Vec3;
use crate::morton::MortonKey;
use num_traits::Float;

/// An octree node. `ichild == 0 && nchild == 0` at a non-root index still
/// means "leaf" — leaves are identified by `nchild == 0`, not by `ichild`.
#[derive(Clone, Debug)]
pub struct Cell<T> {
    pub icell: MortonKey,
    pub level: u32,
    pub x: Vec3<T>,
    pub r: T,
    pub rmax: T,
    pub rcrit: T,

    /// Index of the parent cell in the same array; the root is its own parent.
    pub parent: usize,
    /// Index of the first child, valid when `nchild > 0`.
    pub ichild: usize,
    /// Number of children; 0 means leaf.
    pub nchild: u32,

    /// Index of the first body belonging to this subtree's contiguous range.
    pub ibody: usize,
    /// Number of bodies in the subtree rooted here.
    pub nbody: usize,
    /// Number of bodies stored inline at this cell (nonzero only at leaves
    /// that were shipped without full subtree expansion).
    pub ncbody: usize,

    /// Multipole expansion coefficients, length `MTERM`.
    pub m: Vec<T>,
    /// Local expansion coefficients, length `LTERM`.
    pub l: Vec<T>,
}

impl<T: Float> Cell<T> {
    pub fn is_leaf(&self) -> bool {
        self.nchild == 0
    }

    pub fn body_range(&self) -> std::ops::Range<usize> {
        self.ibody..self.ibody + self.nbody
    }
}

pub type Cells<T> = Vec<Cell<T>>;

/// Number of multipole/local coefficients for a given expansion order,
/// matching the teacher's `ncoeffs = 6*(order-1).pow(2) + 2` formula
/// (`tree/src/types/data.rs`, `fmm/src/new_types.rs`).
pub fn ncoeffs(order: usize) -> usize {
    6 * (order.saturating_sub(1)).pow(2) + 2
}
