//! Local octree construction: Morton assignment, radix sort, leaf
//! formation, level-by-level coalescing, and the final parent-before-child
//! reversal.
//!
//! Grounded on `include/build_tree_cilk.h` (Morton assignment, radix sort)
//! and the leaf/level-coalescing walk implied by `include/types.h`'s `Cell`
//! layout plus the original's `buildTree`/`linkTree`/`reverseOrder` sequence.

use crate::body::Bodies;
use crate::cell::{ncoeffs, Cell, Cells};
use crate::geometry::{Cube, Vec3};
use crate::morton::MortonKey;
use crate::radix_sort::sort_by_morton_key;
use num_traits::Float;

/// Depth chosen so that roughly `ncrit` bodies land per leaf:
/// `L = 1 + floor(log(N/ncrit) / (3 ln 2))`, clamped to 0 when `N < ncrit`.
pub fn choose_depth(n: usize, ncrit: usize) -> u32 {
    if n < ncrit || ncrit == 0 {
        return 0;
    }
    let ratio = n as f64 / ncrit as f64;
    let depth = 1.0 + (ratio.ln() / (3.0 * std::f64::consts::LN_2)).floor();
    depth.max(0.0) as u32
}

/// Build a local tree from an unsorted body set: assigns Morton keys at
/// depth `level`, sorts bodies into Morton order in place, and links cells
/// bottom-up. Returns the finished cell array (index 0 is the root) and
/// mutates `bodies` into Morton order.
pub fn build_tree<T: Float + Send + Sync>(
    bodies: &mut Bodies<T>,
    cube: &Cube<T>,
    level: u32,
    order: usize,
) -> Cells<T> {
    if bodies.is_empty() {
        return Vec::new();
    }

    for b in bodies.iter_mut() {
        b.icell = MortonKey::from_position(&b.x, cube, level);
    }
    sort_by_morton_key(bodies);

    let mut levels: Vec<Cells<T>> = vec![form_leaves(bodies, cube, level, order)];
    for l in (0..level).rev() {
        let coarser = coalesce_level(levels.last().unwrap(), cube, l, level, order);
        levels.push(coarser);
    }
    flatten_and_reverse(levels)
}

/// `key`'s dilated bits sit at the resolution of `leaf_level` even when the
/// key has been [`MortonKey::truncate`]d to a coarser `level` (the finer
/// bits are simply zeroed, not shifted out). Recover the coarse-level
/// integer index by shifting each axis right by `leaf_level - level`
/// before converting to a physical centre.
fn cell_centre<T: Float>(key: MortonKey, cube: &Cube<T>, level: u32, leaf_level: u32, half_side: T) -> Vec3<T> {
    let xmin = cube.centre - Vec3::splat(cube.radius);
    let shift = leaf_level - level;
    let (ix, iy, iz) = key.to_index();
    let (ix, iy, iz) = (ix >> shift, iy >> shift, iz >> shift);
    let side = half_side * T::from(2.0).unwrap();
    Vec3::new(
        xmin[0] + (T::from(ix).unwrap() + T::from(0.5).unwrap()) * side,
        xmin[1] + (T::from(iy).unwrap() + T::from(0.5).unwrap()) * side,
        xmin[2] + (T::from(iz).unwrap() + T::from(0.5).unwrap()) * side,
    )
}

/// Walk the Morton-sorted bodies once, opening a new leaf whenever the key
/// changes.
fn form_leaves<T: Float>(bodies: &Bodies<T>, cube: &Cube<T>, level: u32, order: usize) -> Cells<T> {
    let n = bodies.len();
    let mut cells = Vec::new();
    let mut start = 0usize;
    let half_side = cube.radius / T::from(1u64 << level).unwrap();
    while start < n {
        let key = bodies[start].icell;
        let mut end = start + 1;
        while end < n && bodies[end].icell == key {
            end += 1;
        }
        let x = cell_centre(key, cube, level, level, half_side);
        cells.push(Cell {
            icell: key,
            level,
            x,
            r: half_side,
            rmax: half_side,
            rcrit: half_side,
            parent: 0,
            ichild: 0,
            nchild: 0,
            ibody: start,
            nbody: end - start,
            ncbody: end - start,
            m: vec![T::zero(); ncoeffs(order)],
            l: vec![T::zero(); ncoeffs(order)],
        });
        start = end;
    }
    cells
}

/// Coalesce a child level into its parents: group consecutive children by
/// their key truncated one level up, recording `nbody` as the sum of the
/// children's (`PARENT` is back-filled once this cell's own index is known,
/// during [`flatten_and_reverse`]).
fn coalesce_level<T: Float>(
    children: &Cells<T>,
    cube: &Cube<T>,
    parent_level: u32,
    leaf_level: u32,
    order: usize,
) -> Cells<T> {
    let mut parents = Vec::new();
    let mut start = 0usize;
    let half_side = cube.radius / T::from(1u64 << parent_level).unwrap();
    while start < children.len() {
        let key = children[start].icell.truncate(parent_level + 1, parent_level);
        let mut end = start + 1;
        while end < children.len()
            && children[end].icell.truncate(parent_level + 1, parent_level) == key
        {
            end += 1;
        }
        let nbody: usize = children[start..end].iter().map(|c| c.nbody).sum();
        let ibody = children[start].ibody;
        let x = cell_centre(key, cube, parent_level, leaf_level, half_side);
        parents.push(Cell {
            icell: key,
            level: parent_level,
            x,
            r: half_side,
            rmax: half_side,
            rcrit: half_side,
            parent: 0,
            ichild: start,
            nchild: (end - start) as u32,
            ibody,
            nbody,
            ncbody: 0,
            m: vec![T::zero(); ncoeffs(order)],
            l: vec![T::zero(); ncoeffs(order)],
        });
        start = end;
    }
    parents
}

/// `levels[0]` is the leaf level, `levels.last()` is the root (a single
/// cell). Flatten into one array ordered root-first, remapping every
/// `ichild`/`parent` index through the concatenation offset, matching the
/// original's `reverseOrder` pass.
fn flatten_and_reverse<T: Float>(mut levels: Vec<Cells<T>>) -> Cells<T> {
    levels.reverse(); // now root-first: levels[0] = root level, last = leaves
    let mut offsets = vec![0usize; levels.len()];
    let mut acc = 0usize;
    for (i, level) in levels.iter().enumerate() {
        offsets[i] = acc;
        acc += level.len();
    }
    let mut flat: Cells<T> = Vec::with_capacity(acc);
    for (i, mut level) in levels.into_iter().enumerate() {
        if i + 1 < offsets.len() {
            // children live in the next level down; offset their ichild.
            let child_offset = offsets[i + 1];
            for cell in level.iter_mut() {
                if cell.nchild > 0 {
                    cell.ichild += child_offset;
                }
            }
        }
        flat.append(&mut level);
    }
    // back-fill parent indices: walk non-leaf cells and stamp their children.
    let n = flat.len();
    for idx in 0..n {
        let (ichild, nchild) = (flat[idx].ichild, flat[idx].nchild);
        for c in ichild..ichild + nchild as usize {
            flat[c].parent = idx;
        }
    }
    if !flat.is_empty() {
        flat[0].parent = 0;
    }
    flat
}
